//! Display model for a conversation, independent of how it is drawn.

use crate::core::session::{ChatMessage, LOCAL_IMAGE_PLACEHOLDER, MessageKind, Sender, Session};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry<'a> {
    Bubble { sender: Sender, text: &'a str },
    Error { text: &'a str },
    Image { sender: Sender, src: &'a str, alt: &'a str },
    /// A user image whose bytes were not kept when the session was saved.
    ImagePlaceholder { file_name: &'a str },
}

/// Lazily rendered view over a message slice. Copying it restarts iteration.
#[derive(Debug, Clone, Copy)]
pub struct Transcript<'a> {
    messages: &'a [ChatMessage],
}

impl<'a> Transcript<'a> {
    pub fn iter(&self) -> <Self as IntoIterator>::IntoIter {
        (*self).into_iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<'a> IntoIterator for Transcript<'a> {
    type Item = TranscriptEntry<'a>;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, ChatMessage>, fn(&'a ChatMessage) -> TranscriptEntry<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter().map(entry_for as fn(&'a ChatMessage) -> TranscriptEntry<'a>)
    }
}

pub fn render(messages: &[ChatMessage]) -> Transcript<'_> {
    Transcript { messages }
}

/// Transcript of a saved session.
pub fn restore(session: &Session) -> Transcript<'_> {
    render(&session.messages)
}

fn entry_for(message: &ChatMessage) -> TranscriptEntry<'_> {
    match message.kind {
        MessageKind::Text if message.is_error => TranscriptEntry::Error {
            text: &message.text,
        },
        MessageKind::Text => TranscriptEntry::Bubble {
            sender: message.sender,
            text: &message.text,
        },
        MessageKind::UserImage => {
            let file_name = message.file_name.as_deref().unwrap_or("image");
            match message.url.as_deref() {
                Some(src) if src != LOCAL_IMAGE_PLACEHOLDER => TranscriptEntry::Image {
                    sender: Sender::User,
                    src,
                    alt: file_name,
                },
                _ => TranscriptEntry::ImagePlaceholder { file_name },
            }
        }
        MessageKind::AiImage => {
            let alt = if message.text.trim().is_empty() {
                "Generated image"
            } else {
                message.text.as_str()
            };
            match message.url.as_deref() {
                Some(src) => TranscriptEntry::Image {
                    sender: Sender::Ai,
                    src,
                    alt,
                },
                None => TranscriptEntry::Error {
                    text: "Image result is missing its URL",
                },
            }
        }
    }
}
