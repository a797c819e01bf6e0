//! JSON bodies exchanged between the chat client and the API server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::tasks::{TaskArtifact, TaskId};

pub const CHAT_PATH: &str = "/api/chat";
pub const GENERATE_IMAGE_PATH: &str = "/api/generate-image";
pub const IMAGE_EDIT_PATH: &str = "/api/image-edit";
pub const ANALYZE_IMAGE_PATH: &str = "/api/analyze-image";

/// Question asked of the vision model when the caller supplies none.
pub const DEFAULT_ANALYSIS_QUESTION: &str = "这张图片里有什么？请详细描述。";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateImageRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_extend: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditFunction {
    StylizationAll,
    DescriptionEdit,
}

impl EditFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            EditFunction::StylizationAll => "stylization_all",
            EditFunction::DescriptionEdit => "description_edit",
        }
    }
}

impl std::fmt::Display for EditFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `edit_function` stays a free string: the provider accepts more functions
/// than the two the classifier picks from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageEditRequest {
    #[serde(default)]
    pub base_image_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl ImageEditRequest {
    /// `edit_prompt`, falling back to the legacy `style_prompt` alias.
    pub fn prompt(&self) -> Option<&str> {
        [&self.edit_prompt, &self.style_prompt]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .find(|p| !p.trim().is_empty())
    }

    pub fn function(&self) -> &str {
        self.edit_function
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(EditFunction::StylizationAll.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeImageRequest {
    #[serde(rename = "imageDataB64", default)]
    pub image_data_b64: String,
    #[serde(
        rename = "userQuestion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub user_question: Option<String>,
}

impl AnalyzeImageRequest {
    pub fn question(&self) -> &str {
        self.user_question
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(DEFAULT_ANALYSIS_QUESTION)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTaskResponse {
    pub message: String,
    pub results: Vec<TaskArtifact>,
    pub task_id: TaskId,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisDetails {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeImageResponse {
    pub message: String,
    pub analysis: String,
    pub details: AnalysisDetails,
}

/// Error envelope for every non-2xx API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
