pub mod compatible;

use async_trait::async_trait;
use serde_json::Value;

pub use compatible::CompatibleAssistant;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnalysis {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("AI service API key not configured.")]
    MissingCredential,
    #[error("AI service error ({status}): {message}")]
    Upstream {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("AI service unreachable: {0}")]
    Transport(String),
    /// The reply parsed but carried no message content.
    #[error("AI service returned no content")]
    EmptyReply(Value),
}

/// Synchronous (request/response) model calls: text chat and image analysis.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn chat(&self, message: &str) -> Result<String, ChatError>;

    async fn analyze_image(
        &self,
        image_data_url: &str,
        question: &str,
    ) -> Result<ImageAnalysis, ChatError>;
}
