// src/models.rs - Request/response shapes for the JSON API
use serde::{Deserialize, Serialize};

use crate::vision_client::Description;

pub const DEFAULT_SESSION_ID: &str = "default";

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

impl Default for ResetRequest {
    fn default() -> Self {
        Self {
            session_id: default_session_id(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeImageResponse {
    pub success: bool,
    pub descriptions: Vec<Description>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub image_path: String,
}

#[derive(Debug, Serialize)]
pub struct CaptionResponse {
    pub success: bool,
    pub caption: String,
    pub image_path: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageQuestionRequest {
    pub image_path: String,
    pub question: String,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}
