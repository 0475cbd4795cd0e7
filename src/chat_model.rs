// src/chat_model.rs
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("inference request failed: {0}")]
    Backend(String),
    #[error("inference timed out after {0}s")]
    Timeout(u64),
}

/// Returned when the model generates nothing but whitespace.
pub const EMPTY_RESPONSE_FALLBACK: &str =
    "I'm not sure how to respond to that question about this image. Could you try asking something else?";

/// Fixed decoding constants. These are deliberately not tunable per call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DecodingParams {
    pub top_p: f32,
    pub top_k: u32,
    pub temperature: f32,
    pub repetition_penalty: f32,
    pub max_length: u32,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            top_p: 0.92,
            top_k: 50,
            temperature: 0.85,
            repetition_penalty: 1.2,
            max_length: 2000,
        }
    }
}

/// Abstraction over the text-generation collaborator. The production
/// implementation talks to an inference sidecar; tests use a scripted mock.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<u32>, ModelError>;

    async fn decode(&self, tokens: &[u32]) -> Result<String, ModelError>;

    /// Extends `input` with newly sampled tokens and returns the full
    /// sequence, input prefix included.
    async fn generate(&self, input: &[u32], params: &DecodingParams) -> Result<Vec<u32>, ModelError>;

    /// Token appended after each encoded user turn.
    fn end_of_turn_token(&self) -> u32;
}

/// Turn-by-turn dialogue state machine. Fresh (no history) until the first
/// successful turn, then Ongoing until `reset`. The stored history is the
/// full token sequence returned by the last generation, so prior turns
/// always precede new input, oldest first.
pub struct ChatModel {
    backend: Arc<dyn GenerativeBackend>,
    params: DecodingParams,
    history: Option<Vec<u32>>,
}

impl ChatModel {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend,
            params: DecodingParams::default(),
            history: None,
        }
    }

    pub fn has_history(&self) -> bool {
        self.history.is_some()
    }

    #[cfg(test)]
    pub(crate) fn history_buffer(&self) -> Option<&[u32]> {
        self.history.as_deref()
    }

    /// Clears the history buffer. The next turn starts Fresh.
    pub fn reset(&mut self) {
        self.history = None;
    }

    /// Runs one conversation turn. On failure the history buffer is left
    /// exactly as it was.
    pub async fn generate_turn(&mut self, input: &str) -> Result<String, ModelError> {
        let mut turn = self.backend.encode(input).await?;
        turn.push(self.backend.end_of_turn_token());

        let input_ids: Vec<u32> = match &self.history {
            Some(history) => history.iter().copied().chain(turn).collect(),
            None => turn,
        };

        let output = self.backend.generate(&input_ids, &self.params).await?;

        // Only the newly generated suffix is the response; the full
        // sequence already embeds the history prefix.
        let suffix = output.get(input_ids.len()..).unwrap_or(&[]);
        let decoded = self.backend.decode(suffix).await?;

        let response = if decoded.trim().is_empty() {
            EMPTY_RESPONSE_FALLBACK.to_string()
        } else {
            decoded
        };

        self.history = Some(output);
        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    pub const END_OF_TURN: u32 = 0;

    /// Byte-level mock backend: tokens are input bytes, generation appends
    /// the scripted reply. Queued replies are consumed in order; the last
    /// one repeats.
    pub struct ScriptedBackend {
        replies: Mutex<Vec<String>>,
        fail_generation: bool,
    }

    impl ScriptedBackend {
        pub fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(String::from).collect()),
                fail_generation: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                replies: Mutex::new(Vec::new()),
                fail_generation: true,
            }
        }

        fn next_reply(&self) -> String {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies.first().cloned().unwrap_or_default()
            }
        }
    }

    pub fn encode_bytes(text: &str) -> Vec<u32> {
        text.bytes().map(|b| b as u32).collect()
    }

    #[async_trait]
    impl GenerativeBackend for ScriptedBackend {
        async fn encode(&self, text: &str) -> Result<Vec<u32>, ModelError> {
            Ok(encode_bytes(text))
        }

        async fn decode(&self, tokens: &[u32]) -> Result<String, ModelError> {
            let bytes: Vec<u8> = tokens
                .iter()
                .filter(|&&t| t != END_OF_TURN)
                .map(|&t| t as u8)
                .collect();
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }

        async fn generate(
            &self,
            input: &[u32],
            _params: &DecodingParams,
        ) -> Result<Vec<u32>, ModelError> {
            if self.fail_generation {
                return Err(ModelError::Backend("scripted failure".to_string()));
            }
            let mut output = input.to_vec();
            output.extend(encode_bytes(&self.next_reply()));
            Ok(output)
        }

        fn end_of_turn_token(&self) -> u32 {
            END_OF_TURN
        }
    }
}
