// src/session.rs
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::chat_model::{ChatModel, GenerativeBackend};
use crate::error::ApiError;
use crate::vision_client::ImageAnalysis;

/// Builds the textual context blob from an image analysis. The exact shape
/// is load-bearing: downstream question answering is grounded on it.
pub fn build_image_context(analysis: &ImageAnalysis) -> String {
    let mut context = String::from("I am looking at an image. ");
    context.push_str(&analysis.summary);
    context.push(' ');

    if let Some(caption) = &analysis.caption {
        context.push_str(&format!("The caption for this image is: {}. ", caption));
    }

    context.push_str("Other objects detected in the image: ");
    for desc in analysis.descriptions.iter().skip(1) {
        context.push_str(&format!("{} ({:.1}%), ", desc.label, desc.confidence));
    }

    context.push_str("\nI'll answer questions about this image based on what I can see.");
    context
}

/// One user's dialogue state: the chat model's history buffer plus the
/// context blob of the most recently analyzed image.
pub struct ConversationSession {
    chat: ChatModel,
    image_context: Option<String>,
}

impl ConversationSession {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            chat: ChatModel::new(backend),
            image_context: None,
        }
    }

    pub fn has_image_context(&self) -> bool {
        self.image_context.is_some()
    }

    /// Replaces the stored image context wholesale. History is untouched:
    /// analyzing a new image does not interrupt the running conversation.
    pub fn record_image_context(&mut self, analysis: &ImageAnalysis) {
        self.image_context = Some(build_image_context(analysis));
    }

    /// Ordinary chat turn. Image context is not consulted.
    pub async fn converse(&mut self, message: &str) -> Result<String, ApiError> {
        Ok(self.chat.generate_turn(message).await?)
    }

    /// Answers a question grounded on the stored image context. History is
    /// hard-reset first so the model's whole context window is the image
    /// description plus the question.
    pub async fn answer_about_image(&mut self, question: &str) -> Result<String, ApiError> {
        let context = self
            .image_context
            .as_ref()
            .ok_or_else(|| ApiError::NotFound("No image context available".to_string()))?;

        let prompt = format!("{}\n\nQuestion: {}\n\nAnswer:", context, question);
        self.chat.reset();
        Ok(self.chat.generate_turn(&prompt).await?)
    }

    /// Clears conversation history. Image context survives, so the user can
    /// keep asking about the same image after a reset.
    pub fn reset(&mut self) {
        self.chat.reset();
    }

    #[cfg(test)]
    fn history_present(&self) -> bool {
        self.chat.has_history()
    }
}

/// Sessions are created on first use and never expire on their own, so cap
/// the map: a client minting fresh ids must not grow it without bound. At
/// the cap an arbitrary session is dropped; all state is in-memory and
/// disposable anyway.
const MAX_SESSIONS: usize = 1024;

/// In-memory store of per-user sessions. Each session sits behind its own
/// mutex, so turns against one session are serialized while different
/// sessions run fully in parallel.
pub struct SessionStore {
    backend: Arc<dyn GenerativeBackend>,
    sessions: RwLock<HashMap<String, Arc<Mutex<ConversationSession>>>>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<ConversationSession>> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return session.clone();
        }

        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session_id) && sessions.len() >= MAX_SESSIONS {
            if let Some(evicted) = sessions.keys().next().cloned() {
                sessions.remove(&evicted);
                tracing::warn!("Session store full, evicting session '{}'", evicted);
            }
        }
        // Re-check under the write lock; another request may have raced us.
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("Creating conversation session '{}'", session_id);
                Arc::new(Mutex::new(ConversationSession::new(self.backend.clone())))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_model::test_support::ScriptedBackend;
    use crate::chat_model::EMPTY_RESPONSE_FALLBACK;
    use crate::vision_client::{Description, ImageAnalysis};

    fn cat_analysis() -> ImageAnalysis {
        let mut analysis = ImageAnalysis::from_ranked(vec![
            Description {
                label: "Cat".to_string(),
                confidence: 91.2,
            },
            Description {
                label: "Tabby".to_string(),
                confidence: 4.5,
            },
            Description {
                label: "Couch".to_string(),
                confidence: 1.3,
            },
        ])
        .unwrap();
        analysis.caption = Some("a cat sitting on a couch".to_string());
        analysis
    }

    fn session_with(replies: Vec<&'static str>) -> ConversationSession {
        ConversationSession::new(Arc::new(ScriptedBackend::new(replies)))
    }

    #[test]
    fn context_blob_contains_summary_caption_and_secondary_labels() {
        let context = build_image_context(&cat_analysis());

        assert!(context.starts_with("I am looking at an image. "));
        assert!(context.contains("This appears to be a Cat with 91.20% confidence."));
        assert!(context.contains("The caption for this image is: a cat sitting on a couch. "));
        assert!(context.contains("Other objects detected in the image: Tabby (4.5%), Couch (1.3%), "));
        assert!(context.ends_with("\nI'll answer questions about this image based on what I can see."));
        // The top label is the summary's job, not the secondary list's.
        assert!(!context.contains("Cat (91.2%)"));
    }

    #[test]
    fn recording_context_is_idempotent_and_replacing() {
        let mut session = session_with(vec!["ok"]);

        session.record_image_context(&cat_analysis());
        let first = session.image_context.clone().unwrap();
        session.record_image_context(&cat_analysis());
        assert_eq!(session.image_context.as_deref(), Some(first.as_str()));

        let dog = ImageAnalysis::from_ranked(vec![Description {
            label: "Dog".to_string(),
            confidence: 88.0,
        }])
        .unwrap();
        session.record_image_context(&dog);
        let replaced = session.image_context.clone().unwrap();
        assert!(replaced.contains("Dog"));
        assert!(!replaced.contains("Cat"));
    }

    #[tokio::test]
    async fn image_question_without_context_is_not_found() {
        let mut session = session_with(vec!["ok"]);
        let err = session.answer_about_image("what is it?").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn image_question_resets_history_before_answering() {
        let mut session = session_with(vec!["chat reply", "it is grey"]);

        session.converse("hello").await.unwrap();
        assert!(session.history_present());

        session.record_image_context(&cat_analysis());
        let answer = session.answer_about_image("what color is it?").await.unwrap();
        assert_eq!(answer, "it is grey");

        // A session that never chatted ends up with the identical history
        // buffer, so the earlier "hello" turn must have been discarded.
        let mut fresh = session_with(vec!["it is grey"]);
        fresh.record_image_context(&cat_analysis());
        fresh.answer_about_image("what color is it?").await.unwrap();
        assert_eq!(session.chat.history_buffer(), fresh.chat.history_buffer());
        assert!(session.chat.history_buffer().is_some());
    }

    #[tokio::test]
    async fn reset_clears_history_but_keeps_image_context() {
        let mut session = session_with(vec!["reply"]);

        session.record_image_context(&cat_analysis());
        session.converse("one").await.unwrap();
        session.converse("two").await.unwrap();

        session.reset();
        assert!(!session.history_present());
        assert!(session.has_image_context());

        // Still answers about the image after the reset.
        assert!(session.answer_about_image("still there?").await.is_ok());
    }

    #[tokio::test]
    async fn empty_model_output_falls_back_through_converse() {
        let mut session = session_with(vec![""]);
        let response = session.converse("hi").await.unwrap();
        assert_eq!(response, EMPTY_RESPONSE_FALLBACK);
    }

    #[tokio::test]
    async fn store_returns_same_session_for_same_key() {
        let store = SessionStore::new(Arc::new(ScriptedBackend::new(vec!["ok"])));
        let a = store.get_or_create("alice").await;
        let b = store.get_or_create("alice").await;
        let c = store.get_or_create("bob").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn store_never_grows_past_capacity() {
        let store = SessionStore::new(Arc::new(ScriptedBackend::new(vec!["ok"])));
        for i in 0..(MAX_SESSIONS + 8) {
            store.get_or_create(&format!("session-{}", i)).await;
        }
        assert_eq!(store.sessions.read().await.len(), MAX_SESSIONS);
    }
}
