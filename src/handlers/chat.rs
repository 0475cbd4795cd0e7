// src/handlers/chat.rs
use crate::error::ApiError;
use crate::models::{ChatRequest, ChatResponse, ResetRequest, ResetResponse};
use crate::AppState;
use axum::{extract::Extension, response::Json, routing::post, Router};
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

lazy_static! {
    static ref WEATHER_PATTERN: Regex =
        Regex::new(r"(?i)weather\s+in\s+([a-zA-Z\s]+)").expect("valid weather pattern");
}

/// Extracts the city from a weather-intent message, if it is one.
fn weather_city(message: &str) -> Option<String> {
    WEATHER_PATTERN
        .captures(message)
        .map(|caps| caps[1].trim().to_string())
        .filter(|city| !city.is_empty())
}

/// Fixed template sentence for a successful weather lookup.
fn weather_sentence(report: &crate::weather_client::WeatherReport) -> String {
    format!(
        "Weather in {}, {}: {}. Temperature: {}°C (feels like {}°C). Humidity: {}%. Wind speed: {} m/s.",
        report.city,
        report.country,
        report.description,
        report.temperature,
        report.feels_like,
        report.humidity,
        report.wind_speed
    )
}

pub fn chat_routes() -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/reset", post(reset))
}

async fn chat(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::Validation("No message provided".to_string()));
    }

    if let Some(city) = weather_city(&req.message) {
        let response = match &state.weather {
            Some(client) => match client.fetch(&city).await {
                Ok(report) => weather_sentence(&report),
                // Lookup failures read as a polite answer, not an API error.
                Err(e) => format!("I couldn't find weather information for {}. {}", city, e),
            },
            None => format!(
                "I couldn't find weather information for {}. Weather lookups are not configured.",
                city
            ),
        };

        return Ok(Json(ChatResponse {
            success: true,
            response,
        }));
    }

    let session = state.sessions.get_or_create(&req.session_id).await;
    let response = session.lock().await.converse(&req.message).await?;

    Ok(Json(ChatResponse {
        success: true,
        response,
    }))
}

async fn reset(
    Extension(state): Extension<Arc<AppState>>,
    req: Option<Json<ResetRequest>>,
) -> Result<Json<ResetResponse>, ApiError> {
    let Json(req) = req.unwrap_or_default();

    let session = state.sessions.get_or_create(&req.session_id).await;
    session.lock().await.reset();
    tracing::info!("Reset conversation for session '{}'", req.session_id);

    Ok(Json(ResetResponse {
        success: true,
        message: "Conversation reset".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weather_intent_matches_simple_city() {
        assert_eq!(weather_city("weather in Paris"), Some("Paris".to_string()));
    }

    #[test]
    fn weather_intent_is_case_and_spacing_insensitive() {
        assert_eq!(
            weather_city("Weather In   New York"),
            Some("New York".to_string())
        );
    }

    #[test]
    fn weather_intent_matches_mid_sentence() {
        assert_eq!(
            weather_city("what is the weather in tokyo today"),
            Some("tokyo today".to_string())
        );
    }

    #[test]
    fn bare_weather_falls_through_to_chat() {
        assert_eq!(weather_city("weather"), None);
        assert_eq!(weather_city("tell me about the weather"), None);
    }

    #[test]
    fn weather_sentence_renders_fixed_template() {
        let report = crate::weather_client::WeatherReport {
            city: "Paris".to_string(),
            country: "FR".to_string(),
            temperature: 18.5,
            feels_like: 17.9,
            humidity: 62,
            description: "clear sky".to_string(),
            wind_speed: 3.6,
        };

        assert_eq!(
            weather_sentence(&report),
            "Weather in Paris, FR: clear sky. Temperature: 18.5°C (feels like 17.9°C). \
             Humidity: 62%. Wind speed: 3.6 m/s."
        );
    }
}
