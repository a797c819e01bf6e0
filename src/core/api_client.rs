use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::core::classifier::OperationPlan;
use crate::core::conversation::{ApiFailure, AssistantApi, AssistantReply};
use crate::core::tasks::TaskArtifact;

/// Talks to a running `multichat serve` instance over HTTP.
pub struct HttpAssistantApi {
    client: Client,
    base_url: String,
}

impl HttpAssistantApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        // No overall timeout: image jobs poll server-side for minutes.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AssistantApi for HttpAssistantApi {
    async fn execute(&self, plan: &OperationPlan) -> Result<AssistantReply, ApiFailure> {
        let url = format!("{}{}", self.base_url, plan.endpoint());
        debug!("POST {}", url);
        let request = self.client.post(&url);
        let request = match plan {
            OperationPlan::Chat(body) => request.json(body),
            OperationPlan::GenerateImage(body) => request.json(body),
            OperationPlan::EditImage(body) => request.json(body),
            OperationPlan::AnalyzeImage(body) => request.json(body),
        };

        let res = request
            .send()
            .await
            .map_err(|e| ApiFailure::Unreachable(e.to_string()))?;
        let status = res.status();
        let body: Value = res.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(ApiFailure::Rejected {
                status: status.as_u16(),
                message: error_display_message(&body, status.as_u16()),
            });
        }
        Ok(interpret_reply(plan, body))
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `details.message`, then `message`, then `error`, then a generic status line.
pub fn error_display_message(body: &Value, status: u16) -> String {
    non_empty_str(body.pointer("/details/message"))
        .or_else(|| non_empty_str(body.get("message")))
        .or_else(|| non_empty_str(body.get("error")))
        .unwrap_or_else(|| format!("Service error ({})", status))
}

fn interpret_reply(plan: &OperationPlan, body: Value) -> AssistantReply {
    if let Some(analysis) = non_empty_str(body.get("analysis")) {
        return AssistantReply::Text(analysis);
    }

    let is_image_op = matches!(
        plan,
        OperationPlan::GenerateImage(_) | OperationPlan::EditImage(_)
    );
    if is_image_op {
        let results: Vec<TaskArtifact> = body
            .get("results")
            .cloned()
            .and_then(|r| serde_json::from_value(r).ok())
            .unwrap_or_default();
        if !results.is_empty() {
            let actual_prompt = non_empty_str(body.pointer("/details/actual_prompt")).or_else(|| {
                results
                    .first()
                    .and_then(|r| non_empty_str(r.metadata.get("actual_prompt")))
            });
            return AssistantReply::Images {
                results,
                actual_prompt,
            };
        }
    }

    if let Some(reply) = non_empty_str(body.get("reply")) {
        return AssistantReply::Text(reply);
    }
    if is_image_op {
        return AssistantReply::Notice(non_empty_str(body.get("message")));
    }
    AssistantReply::Notice(None)
}
