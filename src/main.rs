use axum::{Extension, Router};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

mod chat_model;
mod error;
mod handlers;
mod inference_client;
mod middleware;
mod models;
mod preprocess;
mod session;
mod vision_client;
mod weather_client;

use session::SessionStore;
use vision_client::{VisionClient, VisualQa};
use weather_client::WeatherClient;

const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 120;

// AppState holds the session store and every model/service collaborator,
// injected into handlers instead of living as process-wide singletons.
pub struct AppState {
    pub sessions: SessionStore,
    pub vision: VisionClient,
    pub visual_qa: VisualQa,
    pub weather: Option<WeatherClient>,
    pub upload_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    let upload_dir = PathBuf::from(
        std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()),
    );
    if let Err(e) = std::fs::create_dir_all(&upload_dir) {
        tracing::warn!("Failed to create upload directory: {}", e);
    } else {
        tracing::info!("Upload directory ready: {}", upload_dir.display());
    }

    let model_server_url = std::env::var("MODEL_SERVER_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8500".to_string());

    let inference_timeout = Duration::from_secs(
        std::env::var("INFERENCE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_INFERENCE_TIMEOUT_SECS),
    );

    // The chat model is the one collaborator we cannot run without.
    tracing::info!("Connecting to model server at {}...", model_server_url);
    let generator = inference_client::GeneratorClient::connect(
        model_server_url.clone(),
        inference_timeout,
    )
    .await
    .expect("Failed to connect to the text-generation model server");

    let vision = VisionClient::new(model_server_url.clone(), inference_timeout);

    // Probed once at startup; unavailability degrades /image-question to
    // the chat-model fallback instead of failing requests.
    let visual_qa = VisualQa::probe(model_server_url, inference_timeout).await;

    let weather = match std::env::var("OPENWEATHER_API_KEY").ok() {
        Some(api_key) if !api_key.is_empty() => {
            tracing::info!("Initializing weather client...");
            Some(WeatherClient::new(api_key))
        }
        _ => {
            tracing::warn!("OPENWEATHER_API_KEY not found. Weather lookups will be disabled.");
            None
        }
    };

    let shared_state = Arc::new(AppState {
        sessions: SessionStore::new(Arc::new(generator)),
        vision,
        visual_qa,
        weather,
        upload_dir,
    });

    let app = Router::new()
        .merge(handlers::chat::chat_routes())
        .merge(handlers::image::image_routes())
        .route("/api/status", axum::routing::get(api_status))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state.clone()));

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind listen address");
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .await
        .expect("Server error");
}

// Logging configuration: EnvFilter plus a JSON layer for production when
// LOG_FORMAT=json, human-readable output otherwise.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,visionchat=trace,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,visionchat=info,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("VisionChat starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) { "development" } else { "production" }
    );

    let model_configured = std::env::var("MODEL_SERVER_URL").is_ok();
    let weather_configured = std::env::var("OPENWEATHER_API_KEY").is_ok();
    tracing::info!(
        "Configuration - Model server: {}, Weather API: {}",
        if model_configured { "set" } else { "default" },
        if weather_configured { "set" } else { "missing" }
    );

    Ok(())
}

async fn api_status(
    Extension(state): Extension<Arc<AppState>>,
) -> axum::response::Json<serde_json::Value> {
    axum::response::Json(json!({
        "success": true,
        "service": "visionchat",
        "version": env!("CARGO_PKG_VERSION"),
        "visual_qa_available": state.visual_qa.is_available(),
        "weather_configured": state.weather.is_some(),
    }))
}
