use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error};

use super::{ImageJob, PollError, SubmitError, TaskArtifact, TaskBackend, TaskId, TaskSnapshot, TaskStatus};
use crate::core::config::ProviderConfig;
use crate::core::protocol::{GenerateImageRequest, ImageEditRequest};

pub const TEXT_TO_IMAGE_PATH: &str = "/api/v1/services/aigc/text2image/image-synthesis";
pub const IMAGE_EDIT_PATH: &str = "/api/v1/services/aigc/image2image/image-synthesis";
pub const TASKS_PATH: &str = "/api/v1/tasks";
pub const DEFAULT_IMAGE_SIZE: &str = "1024*1024";

// ── Submission bodies ──

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a, I> {
    model: &'a str,
    input: I,
    parameters: SynthesisParameters<'a>,
}

#[derive(Debug, Serialize)]
struct TextToImageInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ImageEditInput<'a> {
    function: &'a str,
    prompt: &'a str,
    base_image_data: &'a str,
}

#[derive(Debug, Serialize)]
struct SynthesisParameters<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'a str>,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_extend: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    watermark: Option<bool>,
}

// ── Responses ──

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    task_status: Option<String>,
    #[serde(default)]
    results: Vec<TaskArtifact>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// DashScope's asynchronous image-synthesis task API.
pub struct DashScopeTasks {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    text_to_image_model: String,
    image_edit_model: String,
}

impl DashScopeTasks {
    pub fn new(provider: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(provider.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            api_key: provider.api_key().map(str::to_string),
            text_to_image_model: provider.text_to_image_model.clone(),
            image_edit_model: provider.image_edit_model.clone(),
        })
    }

    /// Endpoint path and JSON body for `job`, after field validation.
    pub fn submission(&self, job: &ImageJob) -> Result<(&'static str, Value), SubmitError> {
        let body = match job {
            ImageJob::Generate(req) => self.text_to_image_body(req)?,
            ImageJob::Edit(req) => self.image_edit_body(req)?,
        };
        let path = match job {
            ImageJob::Generate(_) => TEXT_TO_IMAGE_PATH,
            ImageJob::Edit(_) => IMAGE_EDIT_PATH,
        };
        Ok((path, body))
    }

    fn text_to_image_body(&self, req: &GenerateImageRequest) -> Result<Value, SubmitError> {
        let prompt = req.prompt.trim();
        if prompt.is_empty() {
            return Err(SubmitError::MissingField("prompt"));
        }
        let body = SynthesisRequest {
            model: &self.text_to_image_model,
            input: TextToImageInput {
                prompt,
                negative_prompt: req.negative_prompt.as_deref().filter(|p| !p.is_empty()),
            },
            parameters: SynthesisParameters {
                size: Some(req.size.as_deref().unwrap_or(DEFAULT_IMAGE_SIZE)),
                n: req.n.unwrap_or(1),
                seed: req.seed,
                prompt_extend: req.prompt_extend,
                watermark: req.watermark,
            },
        };
        serde_json::to_value(&body).map_err(|e| SubmitError::Malformed(e.to_string()))
    }

    fn image_edit_body(&self, req: &ImageEditRequest) -> Result<Value, SubmitError> {
        if req.base_image_data.trim().is_empty() {
            return Err(SubmitError::MissingField("base_image_data"));
        }
        let prompt = req.prompt().ok_or(SubmitError::MissingField("edit_prompt"))?;
        let body = SynthesisRequest {
            model: &self.image_edit_model,
            input: ImageEditInput {
                function: req.function(),
                prompt,
                base_image_data: &req.base_image_data,
            },
            parameters: SynthesisParameters {
                size: req.size.as_deref(),
                n: req.n.unwrap_or(1),
                seed: None,
                prompt_extend: None,
                watermark: None,
            },
        };
        serde_json::to_value(&body).map_err(|e| SubmitError::Malformed(e.to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl TaskBackend for DashScopeTasks {
    async fn submit(&self, job: &ImageJob) -> Result<TaskId, SubmitError> {
        let (path, body) = self.submission(job)?;
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            error!("DASHSCOPE_API_KEY is not set, cannot submit {} task", job.operation());
            SubmitError::MissingCredential
        })?;

        debug!("Submitting {} task to {}", job.operation(), path);
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(api_key)
            .header("X-DashScope-Async", "enable")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("{} submit request failed: {}", job.operation(), e);
                SubmitError::Transport(e.to_string())
            })?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;
        let envelope: TaskEnvelope = serde_json::from_str(&text).map_err(|_| {
            error!("{} submit returned non-JSON ({}): {}", job.operation(), status, text);
            SubmitError::Malformed(format!("HTTP {}: {}", status, text))
        })?;

        let task_id = envelope
            .output
            .as_ref()
            .and_then(|o| o.get("task_id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty());
        if let Some(task_id) = task_id
            && status.is_success()
        {
            return Ok(TaskId::new(task_id));
        }

        if envelope.code.is_some() || !status.is_success() {
            let code = envelope.code.unwrap_or_else(|| status.as_u16().to_string());
            let message = envelope
                .message
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            error!(
                "{} submit rejected: code={} message={} request_id={:?}",
                job.operation(),
                code,
                message,
                envelope.request_id
            );
            return Err(SubmitError::Provider {
                code,
                message,
                request_id: envelope.request_id,
            });
        }

        error!("{} submit response had no task id: {}", job.operation(), text);
        Err(SubmitError::Malformed(text))
    }

    async fn poll(&self, task_id: &TaskId) -> Result<TaskSnapshot, PollError> {
        let api_key = self.api_key.as_deref().ok_or(PollError::MissingCredential)?;
        let res = self
            .client
            .get(format!("{}/{}", self.url(TASKS_PATH), task_id))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;
        let envelope: TaskEnvelope = serde_json::from_str(&text)
            .map_err(|_| PollError::Malformed(format!("HTTP {}: {}", status, text)))?;

        match envelope.output {
            Some(output) if status == StatusCode::OK => snapshot_from_output(task_id, output),
            _ => Err(PollError::Provider {
                code: envelope.code.unwrap_or_else(|| status.as_u16().to_string()),
                message: envelope.message.unwrap_or(text),
            }),
        }
    }
}

fn snapshot_from_output(task_id: &TaskId, details: Value) -> Result<TaskSnapshot, PollError> {
    let output: TaskOutput = serde_json::from_value(details.clone())
        .map_err(|e| PollError::Malformed(e.to_string()))?;
    let raw_status = output.task_status.unwrap_or_default();
    Ok(TaskSnapshot {
        task_id: output.task_id.map(TaskId::new).unwrap_or_else(|| task_id.clone()),
        status: TaskStatus::from_provider(&raw_status),
        raw_status,
        results: output.results,
        code: output.code,
        message: output.message,
        details,
    })
}
