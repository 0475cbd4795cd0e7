// src/vision_client.rs
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ApiError;

/// One ranked prediction from the image classifier. Confidence is a
/// percentage in [0, 100].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Description {
    pub label: String,
    pub confidence: f64,
}

/// Classifier output plus the optional caption attached afterwards.
/// Descriptions are sorted by confidence descending.
#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    pub descriptions: Vec<Description>,
    pub summary: String,
    pub caption: Option<String>,
}

impl ImageAnalysis {
    /// Builds the analysis from ranked predictions. Returns `None` when the
    /// classifier produced nothing to summarize.
    pub fn from_ranked(descriptions: Vec<Description>) -> Option<Self> {
        let top = descriptions.first()?;
        let summary = format!(
            "This appears to be a {} with {:.2}% confidence.",
            top.label, top.confidence
        );
        Some(Self {
            descriptions,
            summary,
            caption: None,
        })
    }
}

#[derive(Deserialize)]
struct ClassifyResponse {
    predictions: Vec<Description>,
}

#[derive(Deserialize)]
struct CaptionResponse {
    caption: String,
}

#[derive(Deserialize)]
struct VqaResponse {
    answer: String,
}

async fn image_part(path: &Path) -> Result<Part, ApiError> {
    let data = tokio::fs::read(path).await?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_string();
    Ok(Part::bytes(data).file_name(filename))
}

/// Client for the classification and captioning endpoints of the vision
/// sidecar.
#[derive(Debug, Clone)]
pub struct VisionClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl VisionClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url,
            timeout,
        }
    }

    async fn post_image<Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: Form,
    ) -> Result<Resp, ApiError> {
        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .multipart(form)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                ApiError::ExternalService(format!(
                    "vision request timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ApiError::ExternalService(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::ExternalService(format!(
                "vision server returned {}: {}",
                status, text
            )));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| ApiError::ExternalService(format!("invalid vision response: {}", e)))
    }

    /// Classifies an image and wraps the ranked predictions into an
    /// `ImageAnalysis` with the summary sentence.
    pub async fn classify(&self, image_path: &Path) -> Result<ImageAnalysis, ApiError> {
        let form = Form::new().part("image", image_part(image_path).await?);
        let resp: ClassifyResponse = self.post_image("/classify", form).await?;

        ImageAnalysis::from_ranked(resp.predictions).ok_or_else(|| {
            ApiError::ExternalService("classifier returned no predictions".to_string())
        })
    }

    pub async fn caption(&self, image_path: &Path) -> Result<String, ApiError> {
        let form = Form::new().part("image", image_part(image_path).await?);
        let resp: CaptionResponse = self.post_image("/caption", form).await?;
        Ok(resp.caption)
    }
}

/// Client for the dedicated visual question answering model.
#[derive(Debug, Clone)]
pub struct VisualQaClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl VisualQaClient {
    fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url,
            timeout,
        }
    }

    pub async fn answer(&self, image_path: &Path, question: &str) -> Result<String, ApiError> {
        let form = Form::new()
            .part("image", image_part(image_path).await?)
            .text("question", question.to_string());

        let request = self
            .client
            .post(format!("{}/vqa", self.base_url))
            .multipart(form)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                ApiError::ExternalService(format!(
                    "visual QA request timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ApiError::ExternalService(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::ExternalService(format!(
                "visual QA server returned {}: {}",
                status, text
            )));
        }

        let resp = response
            .json::<VqaResponse>()
            .await
            .map_err(|e| ApiError::ExternalService(format!("invalid visual QA response: {}", e)))?;
        Ok(resp.answer)
    }
}

/// The visual QA model may not be loaded at all. Probed exactly once at
/// startup; never re-probed per request.
pub enum VisualQa {
    Available(VisualQaClient),
    Unavailable(String),
}

impl VisualQa {
    pub async fn probe(base_url: String, timeout: Duration) -> Self {
        let client = Client::new();
        let health = tokio::time::timeout(
            Duration::from_secs(10),
            client.get(format!("{}/vqa/health", base_url)).send(),
        )
        .await;

        match health {
            Ok(Ok(resp)) if resp.status().is_success() => {
                info!("Visual QA model available");
                VisualQa::Available(VisualQaClient::new(base_url, timeout))
            }
            Ok(Ok(resp)) => {
                let reason = format!("visual QA health check returned {}", resp.status());
                warn!("Visual QA model not available, using fallback method: {}", reason);
                VisualQa::Unavailable(reason)
            }
            Ok(Err(e)) => {
                let reason = format!("visual QA health check failed: {}", e);
                warn!("Visual QA model not available, using fallback method: {}", reason);
                VisualQa::Unavailable(reason)
            }
            Err(_) => {
                let reason = "visual QA health check timed out".to_string();
                warn!("Visual QA model not available, using fallback method: {}", reason);
                VisualQa::Unavailable(reason)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, VisualQa::Available(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(label: &str, confidence: f64) -> Description {
        Description {
            label: label.to_string(),
            confidence,
        }
    }

    #[test]
    fn summary_uses_top_prediction_with_two_decimals() {
        let analysis = ImageAnalysis::from_ranked(vec![
            desc("Cat", 91.2),
            desc("Tabby", 4.5),
            desc("Couch", 1.3),
        ])
        .unwrap();

        assert_eq!(
            analysis.summary,
            "This appears to be a Cat with 91.20% confidence."
        );
        assert_eq!(analysis.descriptions.len(), 3);
        assert!(analysis.caption.is_none());
    }

    #[test]
    fn empty_predictions_produce_no_analysis() {
        assert!(ImageAnalysis::from_ranked(Vec::new()).is_none());
    }
}
