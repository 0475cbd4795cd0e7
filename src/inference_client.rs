// src/inference_client.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::chat_model::{DecodingParams, GenerativeBackend, ModelError};

/// HTTP client for the text-generation sidecar. The sidecar owns the actual
/// pretrained model; this client only moves token sequences back and forth.
#[derive(Debug, Clone)]
pub struct GeneratorClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    end_of_turn: u32,
}

#[derive(Serialize)]
struct TokenizeRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct TokenizeResponse {
    tokens: Vec<u32>,
}

#[derive(Serialize)]
struct DetokenizeRequest<'a> {
    tokens: &'a [u32],
}

#[derive(Deserialize)]
struct DetokenizeResponse {
    text: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    tokens: &'a [u32],
    #[serde(flatten)]
    params: &'a DecodingParams,
}

#[derive(Deserialize)]
struct GenerateResponse {
    tokens: Vec<u32>,
}

#[derive(Deserialize)]
struct ModelInfo {
    model: String,
    end_of_turn_token: u32,
}

impl GeneratorClient {
    /// Connects to the sidecar and reads its model info once. Failure here
    /// means the chat model is unusable, which the caller treats as fatal.
    pub async fn connect(base_url: String, timeout: Duration) -> Result<Self, ModelError> {
        let client = Client::new();
        let info = client
            .get(format!("{}/info", base_url))
            .send()
            .await
            .map_err(|e| ModelError::Backend(format!("model server unreachable: {}", e)))?
            .json::<ModelInfo>()
            .await
            .map_err(|e| ModelError::Backend(format!("invalid model info: {}", e)))?;

        info!(
            "Connected to generation model '{}' (end-of-turn token {})",
            info.model, info.end_of_turn_token
        );

        Ok(Self {
            client,
            base_url,
            timeout,
            end_of_turn: info.end_of_turn_token,
        })
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, ModelError> {
        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ModelError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ModelError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ModelError::Backend(format!(
                "model server returned {}: {}",
                status, text
            )));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| ModelError::Backend(format!("invalid model response: {}", e)))
    }
}

#[async_trait]
impl GenerativeBackend for GeneratorClient {
    async fn encode(&self, text: &str) -> Result<Vec<u32>, ModelError> {
        let resp: TokenizeResponse = self.post_json("/tokenize", &TokenizeRequest { text }).await?;
        Ok(resp.tokens)
    }

    async fn decode(&self, tokens: &[u32]) -> Result<String, ModelError> {
        let resp: DetokenizeResponse = self
            .post_json("/detokenize", &DetokenizeRequest { tokens })
            .await?;
        Ok(resp.text)
    }

    async fn generate(&self, input: &[u32], params: &DecodingParams) -> Result<Vec<u32>, ModelError> {
        let resp: GenerateResponse = self
            .post_json(
                "/generate",
                &GenerateRequest {
                    tokens: input,
                    params,
                },
            )
            .await?;

        // The sidecar echoes the prompt as a prefix of the output. If it
        // somehow returned less than the input, downstream suffix slicing
        // would silently produce an empty response, so reject it here.
        if resp.tokens.len() < input.len() {
            return Err(ModelError::Backend(
                "model returned fewer tokens than the prompt".to_string(),
            ));
        }

        Ok(resp.tokens)
    }

    fn end_of_turn_token(&self) -> u32 {
        self.end_of_turn
    }
}
