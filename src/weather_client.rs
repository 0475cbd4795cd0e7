// src/weather_client.rs
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::error::ApiError;

/// Normalized weather lookup result.
#[derive(Debug, Clone)]
pub struct WeatherReport {
    pub city: String,
    pub country: String,
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: u8,
    pub description: String,
    pub wind_speed: f64,
}

#[derive(Deserialize)]
struct OwmResponse {
    name: String,
    sys: OwmSys,
    main: OwmMain,
    weather: Vec<OwmWeather>,
    wind: OwmWind,
}

#[derive(Deserialize)]
struct OwmSys {
    country: String,
}

#[derive(Deserialize)]
struct OwmMain {
    temp: f64,
    feels_like: f64,
    humidity: u8,
}

#[derive(Deserialize)]
struct OwmWeather {
    description: String,
}

#[derive(Deserialize)]
struct OwmWind {
    speed: f64,
}

#[derive(Deserialize)]
struct OwmError {
    message: String,
}

#[derive(Debug, Clone)]
pub struct WeatherClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl WeatherClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.openweathermap.org".to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
        }
    }

    /// Single lookup, no retry. Every failure comes back as a descriptive
    /// error value.
    pub async fn fetch(&self, city: &str) -> Result<WeatherReport, ApiError> {
        info!("Fetching weather for '{}'", city);

        let response = self
            .client
            .get(format!("{}/data/2.5/weather", self.base_url))
            .query(&[("q", city), ("appid", &self.api_key), ("units", "metric")])
            .send()
            .await
            .map_err(|e| ApiError::ExternalService(format!("weather request failed: {}", e)))?;

        if !response.status().is_success() {
            let message = response
                .json::<OwmError>()
                .await
                .map(|e| e.message)
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ApiError::ExternalService(format!("Error: {}", message)));
        }

        let data = response
            .json::<OwmResponse>()
            .await
            .map_err(|e| ApiError::ExternalService(format!("invalid weather response: {}", e)))?;

        let description = data
            .weather
            .first()
            .map(|w| w.description.clone())
            .unwrap_or_else(|| "unknown conditions".to_string());

        Ok(WeatherReport {
            city: data.name,
            country: data.sys.country,
            temperature: data.main.temp,
            feels_like: data.main.feels_like,
            humidity: data.main.humidity,
            description,
            wind_speed: data.wind.speed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_server_is_an_error_value() {
        // Nothing listens on this port; connection is refused immediately.
        let client =
            WeatherClient::with_base_url("key".to_string(), "http://127.0.0.1:1".to_string());
        let err = client.fetch("Paris").await.unwrap_err();
        assert!(matches!(err, ApiError::ExternalService(_)));
    }
}
