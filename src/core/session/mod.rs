pub mod storage;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use storage::{FileStorage, KeyValueStore, MemoryStorage};
pub use store::{DeleteOutcome, SessionStore};

/// Stored in place of a user image's data URL; the bytes are not persisted.
pub const LOCAL_IMAGE_PLACEHOLDER: &str = "local-image-placeholder";

const TITLE_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    #[default]
    Text,
    UserImage,
    AiImage,
}

/// One conversation turn. For `AiImage` the text is the prompt that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Sender,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, rename = "fileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, rename = "isError", skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(sender: Sender, kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            sender,
            kind,
            text: text.into(),
            url: None,
            file_name: None,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Sender::User, MessageKind::Text, text)
    }

    pub fn user_image(file_name: impl Into<String>, data_url: impl Into<String>) -> Self {
        Self {
            url: Some(data_url.into()),
            file_name: Some(file_name.into()),
            ..Self::new(Sender::User, MessageKind::UserImage, "")
        }
    }

    pub fn ai_text(text: impl Into<String>) -> Self {
        Self::new(Sender::Ai, MessageKind::Text, text)
    }

    pub fn ai_error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::new(Sender::Ai, MessageKind::Text, text)
        }
    }

    pub fn ai_image(url: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::new(Sender::Ai, MessageKind::AiImage, prompt)
        }
    }

    /// The persisted form: user image bytes are swapped for the placeholder.
    pub fn for_storage(&self) -> ChatMessage {
        let mut stored = self.clone();
        if self.kind == MessageKind::UserImage
            && self.url.as_deref().is_some_and(|u| u.starts_with("data:"))
        {
            stored.url = Some(LOCAL_IMAGE_PLACEHOLDER.to_string());
        }
        stored
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub timestamp: DateTime<Utc>,
}

/// First user text message, cut to 30 characters, or the localized untitled label.
pub fn session_title(messages: &[ChatMessage], language: Language) -> String {
    let first = messages
        .iter()
        .find(|m| m.sender == Sender::User && m.kind == MessageKind::Text && !m.text.trim().is_empty());
    match first {
        Some(m) if m.text.chars().count() > TITLE_CHARS => {
            let cut: String = m.text.chars().take(TITLE_CHARS).collect();
            format!("{}...", cut)
        }
        Some(m) => m.text.clone(),
        None => language.untitled().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    Zh,
    En,
    #[default]
    Ru,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
            Language::Ru => "ru",
        }
    }

    pub fn untitled(self) -> &'static str {
        match self {
            Language::Zh => "无标题对话",
            Language::En => "Untitled Chat",
            Language::Ru => "Без названия чата",
        }
    }

    pub fn welcome(self) -> &'static str {
        match self {
            Language::Zh => "你好！有什么我可以帮助你的吗？",
            Language::En => "Hello! How can I help you?",
            Language::Ru => "Привет! Чем могу помочь?",
        }
    }

    pub fn thinking(self) -> &'static str {
        match self {
            Language::Zh => "AI正在思考中...",
            Language::En => "AI is thinking...",
            Language::Ru => "AI думает...",
        }
    }

    pub fn request_failed(self, reason: &str) -> String {
        match self {
            Language::Zh => format!("请求错误: {}", reason),
            Language::En => format!("Request failed: {}", reason),
            Language::Ru => format!("Ошибка запроса: {}", reason),
        }
    }

    pub fn unreachable(self) -> &'static str {
        match self {
            Language::Zh => "网络错误或无法连接到AI服务。",
            Language::En => "Network error or the AI service is unreachable.",
            Language::Ru => "Сетевая ошибка или AI-сервис недоступен.",
        }
    }

    pub fn actual_prompt(self, prompt: &str) -> String {
        match self {
            Language::Zh => format!("(模型实际使用提示词: {})", prompt),
            Language::En => format!("(Prompt the model actually used: {})", prompt),
            Language::Ru => format!("(Фактический промпт модели: {})", prompt),
        }
    }

    pub fn no_result(self) -> &'static str {
        match self {
            Language::Zh => "AI服务处理成功，但未返回预期的结果格式。",
            Language::En => "The AI service responded without the expected result.",
            Language::Ru => "AI-сервис ответил без ожидаемого результата.",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zh" => Ok(Language::Zh),
            "en" => Ok(Language::En),
            "ru" => Ok(Language::Ru),
            other => Err(format!("unsupported language '{}', expected zh, en or ru", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_truncates_long_first_user_text() {
        let messages = vec![
            ChatMessage::ai_text("welcome"),
            ChatMessage::user_image("a.png", "data:image/png;base64,AA"),
            ChatMessage::user_text("Please write me a long poem about autumn leaves"),
            ChatMessage::user_text("second"),
        ];
        assert_eq!(
            session_title(&messages, Language::En),
            "Please write me a long poem ab..."
        );
    }

    #[test]
    fn title_of_exactly_thirty_chars_has_no_ellipsis() {
        let text = "一".repeat(30);
        let messages = vec![ChatMessage::user_text(text.clone())];
        assert_eq!(session_title(&messages, Language::Zh), text);
    }

    #[test]
    fn title_falls_back_to_localized_label() {
        let messages = vec![ChatMessage::user_image("a.png", "data:image/png;base64,AA")];
        assert_eq!(session_title(&messages, Language::Ru), "Без названия чата");
        assert_eq!(session_title(&messages, Language::Zh), "无标题对话");
    }

    #[test]
    fn storage_form_replaces_user_image_data() {
        let msg = ChatMessage::user_image("cat.png", "data:image/png;base64,AAAA");
        let stored = msg.for_storage();
        assert_eq!(stored.url.as_deref(), Some(LOCAL_IMAGE_PLACEHOLDER));
        assert_eq!(stored.file_name.as_deref(), Some("cat.png"));

        let generated = ChatMessage::ai_image("https://x/img.png", "a cat");
        assert_eq!(generated.for_storage(), generated);
    }

    #[test]
    fn message_json_uses_wire_names() {
        let msg = ChatMessage::ai_error("boom");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["sender"], "ai");
        assert_eq!(value["kind"], "text");
        assert_eq!(value["isError"], true);
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));

        let img = serde_json::to_value(ChatMessage::user_image("a.png", "data:x")).unwrap();
        assert_eq!(img["kind"], "user-image");
        assert_eq!(img["fileName"], "a.png");
        assert!(img.get("isError").is_none());
    }

    #[test]
    fn language_parses_codes() {
        assert_eq!("ZH".parse::<Language>().unwrap(), Language::Zh);
        assert!("de".parse::<Language>().is_err());
        assert_eq!(Language::default(), Language::Ru);
    }
}
