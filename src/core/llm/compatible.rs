use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

use super::{AssistantBackend, ChatError, ImageAnalysis, SYSTEM_PROMPT};
use crate::core::config::ProviderConfig;

pub const CHAT_COMPLETIONS_PATH: &str = "/compatible-mode/v1/chat/completions";

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    ImageUrl { image_url: ImageUrl<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionChoiceMessage,
}

#[derive(Deserialize)]
struct CompletionChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorDetail>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// DashScope's OpenAI-compatible chat completions endpoint.
pub struct CompatibleAssistant {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    chat_model: String,
    vision_model: String,
}

impl CompatibleAssistant {
    pub fn new(provider: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(provider.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}{}",
                provider.base_url.trim_end_matches('/'),
                CHAT_COMPLETIONS_PATH
            ),
            api_key: provider.api_key().map(str::to_string),
            chat_model: provider.chat_model.clone(),
            vision_model: provider.vision_model.clone(),
        })
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<(CompletionResponse, Value), ChatError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            error!("DASHSCOPE_API_KEY is not set, cannot call {}", request.model);
            ChatError::MissingCredential
        })?;

        debug!("Calling {} via compatible-mode API", request.model);
        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("{} request failed: {}", request.model, e);
                ChatError::Transport(e.to_string())
            })?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(env) => {
                    let detail = env.error;
                    let code = detail.as_ref().and_then(|d| d.code.clone()).or(env.code);
                    let message = detail.and_then(|d| d.message).or(env.message);
                    (code, message.unwrap_or_else(|| text.clone()))
                }
                Err(_) => (None, text.clone()),
            };
            error!("{} API Error ({}): {}", request.model, status, message);
            return Err(ChatError::Upstream {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let raw: Value = serde_json::from_str(&text).map_err(|_| {
            error!("{} returned non-JSON: {}", request.model, text);
            ChatError::EmptyReply(Value::String(text.clone()))
        })?;
        let parsed: CompletionResponse =
            serde_json::from_value(raw.clone()).map_err(|_| ChatError::EmptyReply(raw.clone()))?;
        Ok((parsed, raw))
    }
}

fn first_content(response: &CompletionResponse) -> Option<String> {
    response
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .filter(|c| !c.trim().is_empty())
}

#[async_trait]
impl AssistantBackend for CompatibleAssistant {
    async fn chat(&self, message: &str) -> Result<String, ChatError> {
        let request = CompletionRequest {
            model: &self.chat_model,
            messages: vec![
                CompletionMessage {
                    role: "system",
                    content: MessageContent::Text(SYSTEM_PROMPT),
                },
                CompletionMessage {
                    role: "user",
                    content: MessageContent::Text(message),
                },
            ],
        };
        let (response, raw) = self.complete(&request).await?;
        first_content(&response).ok_or(ChatError::EmptyReply(raw))
    }

    async fn analyze_image(
        &self,
        image_data_url: &str,
        question: &str,
    ) -> Result<ImageAnalysis, ChatError> {
        let request = CompletionRequest {
            model: &self.vision_model,
            messages: vec![CompletionMessage {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image_data_url,
                        },
                    },
                    ContentPart::Text { text: question },
                ]),
            }],
        };
        let (response, raw) = self.complete(&request).await?;
        let text = first_content(&response).ok_or(ChatError::EmptyReply(raw))?;
        Ok(ImageAnalysis {
            text,
            model: response.model,
            usage: response.usage,
        })
    }
}
