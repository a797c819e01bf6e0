use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::storage::{HISTORY_KEY, KeyValueStore, LANGUAGE_KEY};
use super::{ChatMessage, Language, Sender, Session, SessionError, session_title};

pub const DEFAULT_MAX_SESSIONS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub removed: bool,
    /// The deleted session was the one the draft belongs to; the caller should clear the draft.
    pub was_active: bool,
}

/// The in-progress conversation plus the bounded collection of saved sessions.
pub struct SessionStore<S> {
    storage: S,
    max_sessions: usize,
    draft: Vec<ChatMessage>,
    dirty: bool,
    appended_since_save: usize,
    active_id: Option<String>,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(storage: S, max_sessions: usize) -> Self {
        Self {
            storage,
            max_sessions: max_sessions.max(1),
            draft: Vec::new(),
            dirty: false,
            appended_since_save: 0,
            active_id: None,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.draft
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Id of the saved session the draft belongs to, if it has been saved or loaded.
    pub fn active_session_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn append_user_message(&mut self, message: ChatMessage) {
        debug_assert_eq!(message.sender, Sender::User);
        self.draft.push(message);
        self.appended_since_save += 1;
        self.dirty = true;
    }

    pub fn append_ai_message(&mut self, message: ChatMessage) {
        debug_assert_eq!(message.sender, Sender::Ai);
        self.draft.push(message);
        self.appended_since_save += 1;
    }

    /// Persists the draft. Returns `false` when there is nothing new to save.
    pub fn save(&mut self) -> Result<bool, SessionError> {
        if self.draft.is_empty() || self.appended_since_save == 0 {
            return Ok(false);
        }

        let mut sessions = self.sessions()?;
        let id = match &self.active_id {
            Some(id) => id.clone(),
            None => next_session_id(&sessions),
        };
        sessions.retain(|s| s.id != id);
        sessions.insert(
            0,
            Session {
                id: id.clone(),
                title: session_title(&self.draft, self.language()),
                messages: self.draft.iter().map(ChatMessage::for_storage).collect(),
                timestamp: Utc::now(),
            },
        );
        if sessions.len() > self.max_sessions {
            let evicted = sessions.len() - self.max_sessions;
            sessions.truncate(self.max_sessions);
            debug!("Evicted {} oldest session(s)", evicted);
        }
        self.write_sessions(&sessions)?;

        info!("Saved session {} ({} messages)", id, self.draft.len());
        self.active_id = Some(id);
        self.dirty = false;
        self.appended_since_save = 0;
        Ok(true)
    }

    /// Empties the draft, saving it first when asked to and it is dirty.
    /// A failed save leaves the draft untouched.
    pub fn clear(&mut self, persist_if_dirty: bool) -> Result<(), SessionError> {
        if persist_if_dirty && self.dirty {
            self.save()?;
        }
        self.draft.clear();
        self.dirty = false;
        self.appended_since_save = 0;
        self.active_id = None;
        Ok(())
    }

    /// Replaces the draft with a copy of a saved session.
    pub fn load(&mut self, id: &str) -> Result<Session, SessionError> {
        let session = self
            .sessions()?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        self.draft = session.messages.clone();
        self.dirty = false;
        self.appended_since_save = 0;
        self.active_id = Some(session.id.clone());
        Ok(session)
    }

    pub fn delete_session(&mut self, id: &str) -> Result<DeleteOutcome, SessionError> {
        let mut sessions = self.sessions()?;
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        let removed = sessions.len() != before;
        if removed {
            self.write_sessions(&sessions)?;
        }

        let was_active = self.active_id.as_deref() == Some(id);
        if was_active {
            self.active_id = None;
        }
        Ok(DeleteOutcome {
            removed,
            was_active,
        })
    }

    /// Drops the whole saved collection. The draft is left to the caller.
    pub fn clear_all(&mut self) -> Result<(), SessionError> {
        self.storage.remove_item(HISTORY_KEY)?;
        self.active_id = None;
        Ok(())
    }

    /// Saved sessions, most recent first. Unreadable data is treated as empty.
    pub fn sessions(&self) -> Result<Vec<Session>, SessionError> {
        let Some(raw) = self.storage.get_item(HISTORY_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(sessions) => Ok(sessions),
            Err(e) => {
                warn!("Ignoring unreadable session history: {}", e);
                Ok(Vec::new())
            }
        }
    }

    pub fn language(&self) -> Language {
        match self.storage.get_item(LANGUAGE_KEY) {
            Ok(Some(code)) => code.parse().unwrap_or_default(),
            Ok(None) => Language::default(),
            Err(e) => {
                warn!("Could not read language preference: {}", e);
                Language::default()
            }
        }
    }

    pub fn set_language(&mut self, language: Language) -> Result<(), SessionError> {
        self.storage.set_item(LANGUAGE_KEY, language.code())?;
        Ok(())
    }

    fn write_sessions(&self, sessions: &[Session]) -> Result<(), SessionError> {
        let raw = serde_json::to_string(sessions).context("Failed to encode session history")?;
        self.storage.set_item(HISTORY_KEY, &raw)?;
        Ok(())
    }
}

/// `chat-<unix millis>`, bumped until it is unused.
fn next_session_id(sessions: &[Session]) -> String {
    let mut millis = Utc::now().timestamp_millis();
    loop {
        let id = format!("chat-{}", millis);
        if !sessions.iter().any(|s| s.id == id) {
            return id;
        }
        millis += 1;
    }
}
