use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::error;

use crate::core::llm::ChatError;
use crate::core::protocol::ErrorBody;
use crate::core::tasks::{JobError, SubmitError, TaskError};

const NOT_CONFIGURED: &str = "AI service API key not configured.";
const UNREACHABLE: &str = "AI service unreachable.";

/// A failed API call: HTTP status plus the JSON error envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: error.into(),
                message: None,
                task_id: None,
                details: None,
            },
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.body.message = Some(message.into());
        self
    }

    fn with_details(mut self, details: Value) -> Self {
        self.body.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_configured() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, NOT_CONFIGURED)
    }

    pub fn unreachable() -> Self {
        Self::new(StatusCode::BAD_GATEWAY, UNREACHABLE)
    }

    /// Malformed or mistyped JSON bodies are validation failures; oversized ones keep 413.
    pub fn from_rejection(rejection: JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(
            status,
            format!("Invalid request body: {}", rejection.body_text()),
        )
    }

    /// Maps an image job failure; `label` names the operation, e.g. "Image generation".
    pub fn from_job(label: &str, err: JobError) -> Self {
        match err {
            JobError::Submit(e) => Self::from_submit(label, e),
            JobError::Task(e) => Self::from_task(label, e),
        }
    }

    fn from_submit(label: &str, err: SubmitError) -> Self {
        match err {
            SubmitError::MissingField(field) => Self::bad_request(format!("{} is required", field)),
            SubmitError::MissingCredential => Self::not_configured(),
            SubmitError::Transport(e) => {
                error!("{} submit could not reach the provider: {}", label, e);
                Self::unreachable()
            }
            SubmitError::Provider {
                code,
                message,
                request_id,
            } => Self::new(
                StatusCode::BAD_GATEWAY,
                format!("Failed to create {} task.", label.to_lowercase()),
            )
            .with_message(message.clone())
            .with_details(json!({"code": code, "message": message, "request_id": request_id})),
            SubmitError::Malformed(raw) => Self::new(
                StatusCode::BAD_GATEWAY,
                format!("Failed to create {} task.", label.to_lowercase()),
            )
            .with_details(json!({"message": "Unexpected response from AI service", "raw": raw})),
        }
    }

    fn from_task(label: &str, err: TaskError) -> Self {
        let task_id = err.task_id().clone();
        let mut api_error = match err {
            TaskError::Failed {
                status,
                message,
                details,
                ..
            } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{} task {}", label, status),
            )
            .with_message(message)
            .with_details(details),
            TaskError::EmptyResults { details, .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{} task returned no results.", label),
            )
            .with_details(details),
            TaskError::UnknownStatus {
                status, details, ..
            } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Unknown task status: {}", status),
            )
            .with_details(details),
            TaskError::Timeout { .. } => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                format!("{} task timeout.", label),
            ),
            TaskError::Unreachable { last_error, .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get task result after multiple attempts.",
            )
            .with_message(last_error),
        };
        api_error.body.task_id = Some(task_id);
        api_error
    }

    /// Maps a chat/vision failure; `label` names the operation, e.g. "Image analysis".
    pub fn from_chat(label: &str, err: ChatError) -> Self {
        match err {
            ChatError::MissingCredential => Self::not_configured(),
            ChatError::Transport(e) => {
                error!("{} could not reach the provider: {}", label, e);
                Self::unreachable()
            }
            ChatError::Upstream {
                status,
                code,
                message,
            } => Self::new(
                StatusCode::BAD_GATEWAY,
                format!("{} request failed: {}", label, message),
            )
            .with_details(json!({"status": status, "code": code, "message": message})),
            ChatError::EmptyReply(raw) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{} failed: unexpected API response format.", label),
            )
            .with_details(raw),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
