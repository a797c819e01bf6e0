use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::classifier::{AspectRatio, ImageAttachment, OperationPlan, classify};
use crate::core::session::{
    ChatMessage, DeleteOutcome, KeyValueStore, Language, Session, SessionError, SessionStore,
};
use crate::core::tasks::TaskArtifact;

/// What the API server answered for one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantReply {
    Text(String),
    Images {
        results: Vec<TaskArtifact>,
        actual_prompt: Option<String>,
    },
    /// A 2xx answer without the expected payload, with the server's message if any.
    Notice(Option<String>),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiFailure {
    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("AI service unreachable: {0}")]
    Unreachable(String),
}

/// The API server as seen from the chat client.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn execute(&self, plan: &OperationPlan) -> Result<AssistantReply, ApiFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    pub operation: &'static str,
    pub succeeded: bool,
}

/// Drives one conversation: classifies input, calls the API, and records the
/// exchange in the session store.
pub struct Conversation<S, A> {
    store: SessionStore<S>,
    api: A,
    aspect_ratio: Option<AspectRatio>,
    language: Language,
}

impl<S: KeyValueStore, A: AssistantApi> Conversation<S, A> {
    pub fn new(store: SessionStore<S>, api: A) -> Self {
        let language = store.language();
        Self {
            store,
            api,
            aspect_ratio: None,
            language,
        }
    }

    pub fn store(&self) -> &SessionStore<S> {
        &self.store
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.store.messages()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn set_language(&mut self, language: Language) -> Result<(), SessionError> {
        self.store.set_language(language)?;
        self.language = language;
        Ok(())
    }

    pub fn aspect_ratio(&self) -> Option<AspectRatio> {
        self.aspect_ratio
    }

    pub fn set_aspect_ratio(&mut self, ratio: Option<AspectRatio>) {
        self.aspect_ratio = ratio;
    }

    /// Sends one user turn. Returns `None` when there is nothing to send.
    pub async fn send(&mut self, text: &str, image: Option<ImageAttachment>) -> Option<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return None;
        }

        if let Some(image) = &image {
            self.store.append_user_message(ChatMessage::user_image(
                image.file_name.clone(),
                image.data_url.clone(),
            ));
        }
        if !text.is_empty() {
            self.store.append_user_message(ChatMessage::user_text(text));
        }

        let plan = classify(text, image.as_ref(), self.aspect_ratio);
        info!("Sending {} request", plan.kind());

        let succeeded = match self.api.execute(&plan).await {
            Ok(reply) => {
                self.record_reply(&plan, reply);
                true
            }
            Err(ApiFailure::Rejected { status, message }) => {
                warn!("{} request rejected ({}): {}", plan.kind(), status, message);
                self.store
                    .append_ai_message(ChatMessage::ai_error(self.language.request_failed(&message)));
                false
            }
            Err(ApiFailure::Unreachable(reason)) => {
                warn!("{} request could not reach the server: {}", plan.kind(), reason);
                self.store
                    .append_ai_message(ChatMessage::ai_error(self.language.unreachable()));
                false
            }
        };

        if let Err(e) = self.store.save() {
            warn!("Auto-save failed: {}", e);
        }
        Some(TurnOutcome {
            operation: plan.kind(),
            succeeded,
        })
    }

    fn record_reply(&mut self, plan: &OperationPlan, reply: AssistantReply) {
        match reply {
            AssistantReply::Text(text) => self.store.append_ai_message(ChatMessage::ai_text(text)),
            AssistantReply::Images {
                results,
                actual_prompt,
            } => {
                let alt = plan.image_prompt().unwrap_or(match plan {
                    OperationPlan::EditImage(_) => "Edited image",
                    _ => "Generated image",
                });
                let mut shown = 0;
                for url in results.iter().filter_map(|r| r.url.as_deref()) {
                    self.store.append_ai_message(ChatMessage::ai_image(url, alt));
                    shown += 1;
                }
                if shown == 0 {
                    self.store
                        .append_ai_message(ChatMessage::ai_text(self.language.no_result()));
                    return;
                }
                if let (OperationPlan::GenerateImage(req), Some(actual)) = (plan, actual_prompt)
                    && actual.trim() != req.prompt.trim()
                {
                    self.store
                        .append_ai_message(ChatMessage::ai_text(self.language.actual_prompt(&actual)));
                }
            }
            AssistantReply::Notice(message) => {
                let text = message.unwrap_or_else(|| self.language.no_result().to_string());
                self.store.append_ai_message(ChatMessage::ai_text(text));
            }
        }
    }

    /// Best-effort save used at every exit point of the conversation.
    fn save_if_dirty(&mut self) -> bool {
        if !self.store.is_dirty() {
            return false;
        }
        match self.store.save() {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Could not save conversation: {}", e);
                false
            }
        }
    }

    /// Called when the user switches away from the conversation, e.g. to browse history.
    pub fn leave_view(&mut self) -> bool {
        self.save_if_dirty()
    }

    pub fn shutdown(&mut self) -> bool {
        self.save_if_dirty()
    }

    pub fn new_conversation(&mut self) {
        self.save_if_dirty();
        if let Err(e) = self.store.clear(false) {
            warn!("Could not clear conversation: {}", e);
        }
    }

    pub fn load_session(&mut self, id: &str) -> Result<Session, SessionError> {
        self.save_if_dirty();
        self.store.load(id)
    }

    pub fn delete_session(&mut self, id: &str) -> Result<DeleteOutcome, SessionError> {
        let outcome = self.store.delete_session(id)?;
        if outcome.was_active {
            self.store.clear(false)?;
        }
        Ok(outcome)
    }

    /// Removes every saved session and discards the current draft without saving it.
    pub fn clear_history(&mut self) -> Result<(), SessionError> {
        self.store.clear_all()?;
        self.store.clear(false)
    }

    pub fn sessions(&self) -> Result<Vec<Session>, SessionError> {
        self.store.sessions()
    }
}
