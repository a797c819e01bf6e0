//! Asynchronous provider jobs: submit once, then poll by id until the job
//! reaches a terminal status or the attempt budget runs out.

pub mod dashscope;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::protocol::{GenerateImageRequest, ImageEditRequest};

pub use dashscope::DashScopeTasks;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Unknown,
}

impl TaskStatus {
    /// Maps a provider status string; anything unrecognised is `Unknown`.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim() {
            "PENDING" => TaskStatus::Pending,
            "RUNNING" => TaskStatus::Running,
            "SUCCEEDED" => TaskStatus::Succeeded,
            "FAILED" => TaskStatus::Failed,
            "CANCELED" => TaskStatus::Canceled,
            _ => TaskStatus::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output of a finished job: the image URL plus whatever else the provider reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, Value>,
}

impl TaskArtifact {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            metadata: serde_json::Map::new(),
        }
    }
}

/// The result of a single status query.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Status string as the provider sent it, kept for unknown values.
    pub raw_status: String,
    pub results: Vec<TaskArtifact>,
    pub code: Option<String>,
    pub message: Option<String>,
    /// The provider's full `output` object.
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTask {
    pub task_id: TaskId,
    pub results: Vec<TaskArtifact>,
    pub details: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PollPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    20
}
fn default_interval_ms() -> u64 {
    5000
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl PollPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("AI service API key not configured.")]
    MissingCredential,
    #[error("AI service unreachable: {0}")]
    Transport(String),
    #[error("provider rejected the task ({code}): {message}")]
    Provider {
        code: String,
        message: String,
        request_id: Option<String>,
    },
    #[error("unexpected submit response: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("AI service API key not configured.")]
    MissingCredential,
    #[error("AI service unreachable: {0}")]
    Transport(String),
    #[error("provider error ({code}): {message}")]
    Provider { code: String, message: String },
    #[error("unexpected status response: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task {task_id} {status}: {message}")]
    Failed {
        task_id: TaskId,
        status: TaskStatus,
        message: String,
        details: Value,
    },
    #[error("task {task_id} succeeded without any result")]
    EmptyResults { task_id: TaskId, details: Value },
    #[error("task {task_id} reported unknown status {status}")]
    UnknownStatus {
        task_id: TaskId,
        status: String,
        details: Value,
    },
    #[error("task {task_id} did not finish after {attempts} polls")]
    Timeout { task_id: TaskId, attempts: u32 },
    #[error("task {task_id} could not be queried after {attempts} polls: {last_error}")]
    Unreachable {
        task_id: TaskId,
        attempts: u32,
        last_error: String,
    },
}

impl TaskError {
    pub fn task_id(&self) -> &TaskId {
        match self {
            TaskError::Failed { task_id, .. }
            | TaskError::EmptyResults { task_id, .. }
            | TaskError::UnknownStatus { task_id, .. }
            | TaskError::Timeout { task_id, .. }
            | TaskError::Unreachable { task_id, .. } => task_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageJob {
    Generate(GenerateImageRequest),
    Edit(ImageEditRequest),
}

impl ImageJob {
    pub fn operation(&self) -> &'static str {
        match self {
            ImageJob::Generate(_) => "text-to-image",
            ImageJob::Edit(_) => "image-edit",
        }
    }
}

/// The provider's asynchronous task API.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn submit(&self, job: &ImageJob) -> Result<TaskId, SubmitError>;
    async fn poll(&self, task_id: &TaskId) -> Result<TaskSnapshot, PollError>;
}

/// Polls `task_id` until it is terminal.
///
/// The first poll is immediate and consecutive polls are `policy.interval()`
/// apart. A failed poll uses up an attempt like a non-terminal one. When the
/// budget is spent the error is `Unreachable` if the final poll failed and
/// `Timeout` otherwise.
pub async fn await_completion<B>(
    backend: &B,
    task_id: &TaskId,
    policy: PollPolicy,
) -> Result<CompletedTask, TaskError>
where
    B: TaskBackend + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error: Option<PollError> = None;

    for attempt in 1..=max_attempts {
        match backend.poll(task_id).await {
            Ok(snapshot) => {
                last_error = None;
                match snapshot.status {
                    TaskStatus::Succeeded => return finish(snapshot),
                    TaskStatus::Failed | TaskStatus::Canceled => {
                        let message = snapshot
                            .message
                            .clone()
                            .unwrap_or_else(|| "Unknown error".to_string());
                        warn!(
                            "Task {} ended {}: {}",
                            task_id, snapshot.status, message
                        );
                        return Err(TaskError::Failed {
                            task_id: task_id.clone(),
                            status: snapshot.status,
                            message,
                            details: snapshot.details,
                        });
                    }
                    TaskStatus::Unknown => {
                        error!(
                            "Task {} reported unrecognised status '{}', giving up",
                            task_id, snapshot.raw_status
                        );
                        return Err(TaskError::UnknownStatus {
                            task_id: task_id.clone(),
                            status: snapshot.raw_status,
                            details: snapshot.details,
                        });
                    }
                    TaskStatus::Pending | TaskStatus::Running => {
                        debug!(
                            "Task {} is {} (poll {}/{})",
                            task_id, snapshot.status, attempt, max_attempts
                        );
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Polling task {} failed (poll {}/{}): {}",
                    task_id, attempt, max_attempts, e
                );
                last_error = Some(e);
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(policy.interval()).await;
        }
    }

    match last_error {
        Some(e) => {
            error!("Giving up on task {}: status queries kept failing", task_id);
            Err(TaskError::Unreachable {
                task_id: task_id.clone(),
                attempts: max_attempts,
                last_error: e.to_string(),
            })
        }
        None => {
            error!(
                "Task {} still not finished after {} polls",
                task_id, max_attempts
            );
            Err(TaskError::Timeout {
                task_id: task_id.clone(),
                attempts: max_attempts,
            })
        }
    }
}

fn finish(snapshot: TaskSnapshot) -> Result<CompletedTask, TaskError> {
    if !snapshot.results.iter().any(|r| r.url.is_some()) {
        error!(
            "Task {} succeeded but returned no image URL",
            snapshot.task_id
        );
        return Err(TaskError::EmptyResults {
            task_id: snapshot.task_id,
            details: snapshot.details,
        });
    }
    Ok(CompletedTask {
        task_id: snapshot.task_id,
        results: snapshot.results,
        details: snapshot.details,
    })
}

/// Runs an image job to completion. Implementations may submit-and-poll,
/// wait on a webhook, or stream; callers only see the finished task.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn run(&self, job: ImageJob) -> Result<CompletedTask, JobError>;
}

pub struct PollingImageGenerator<B> {
    backend: B,
    generate_policy: PollPolicy,
    edit_policy: PollPolicy,
}

impl<B: TaskBackend> PollingImageGenerator<B> {
    pub fn new(backend: B, generate_policy: PollPolicy, edit_policy: PollPolicy) -> Self {
        Self {
            backend,
            generate_policy,
            edit_policy,
        }
    }

    fn policy_for(&self, job: &ImageJob) -> PollPolicy {
        match job {
            ImageJob::Generate(_) => self.generate_policy,
            ImageJob::Edit(_) => self.edit_policy,
        }
    }
}

#[async_trait]
impl<B: TaskBackend> ImageGenerator for PollingImageGenerator<B> {
    async fn run(&self, job: ImageJob) -> Result<CompletedTask, JobError> {
        let task_id = self.backend.submit(&job).await?;
        info!("Submitted {} task {}", job.operation(), task_id);

        let completed = await_completion(&self.backend, &task_id, self.policy_for(&job)).await?;
        info!(
            "{} task {} succeeded with {} result(s)",
            job.operation(),
            task_id,
            completed.results.len()
        );
        Ok(completed)
    }
}
