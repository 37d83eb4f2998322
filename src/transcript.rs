//! Transcript state for a single chat session.
//!
//! The controller owns the ordered message log and the uncommitted draft.
//! Every mutation goes through one of its methods; callers observe state via
//! [`TranscriptController::current_snapshot`].

use crate::events::Role;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque, unique message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single entry in the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Rejected transcript operations. None of them change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("draft is empty")]
    EmptyDraft,
    #[error("an assistant reply is still streaming")]
    StreamInProgress,
    #[error("no assistant message is open")]
    NoOpenMessage,
}

/// What a provider needs to produce the reply for a submitted draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// The assistant message the streamed fragments belong to
    pub response_id: MessageId,
    /// Every message up to and including the new user message
    pub context: Vec<Message>,
}

/// Point-in-time copy of the transcript for rendering
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranscriptSnapshot {
    pub draft: String,
    pub messages: Vec<Message>,
    pub open_message: Option<MessageId>,
}

impl TranscriptSnapshot {
    pub fn is_open(&self, message: &Message) -> bool {
        self.open_message == Some(message.id)
    }
}

/// Owns the message log and draft input of one session
#[derive(Debug, Default)]
pub struct TranscriptController {
    draft: String,
    messages: Vec<Message>,
    /// Index into `messages` of the assistant message receiving fragments
    open: Option<usize>,
}

impl TranscriptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh session: empty log, empty draft, nothing open
    pub fn reset(&mut self) {
        self.draft.clear();
        self.messages.clear();
        self.open = None;
    }

    /// Replace the draft with the full current text of the input field
    pub fn update_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Commit the draft as a user message and open an empty assistant reply.
    ///
    /// The returned request carries the context to send to the provider,
    /// which is the log as it stood right after the user message was added.
    pub fn submit_draft(&mut self) -> Result<CompletionRequest, TranscriptError> {
        if self.open.is_some() {
            return Err(TranscriptError::StreamInProgress);
        }
        if self.draft.trim().is_empty() {
            return Err(TranscriptError::EmptyDraft);
        }

        let content = std::mem::take(&mut self.draft);
        self.messages.push(Message::new(Role::User, content));
        let context = self.messages.clone();

        let reply = Message::new(Role::Assistant, String::new());
        let response_id = reply.id;
        self.messages.push(reply);
        self.open = Some(self.messages.len() - 1);

        Ok(CompletionRequest {
            response_id,
            context,
        })
    }

    /// Append a streamed fragment to the open assistant message
    pub fn on_fragment_received(&mut self, fragment: &str) -> Result<(), TranscriptError> {
        let index = self.open.ok_or(TranscriptError::NoOpenMessage)?;
        self.messages[index].content.push_str(fragment);
        Ok(())
    }

    /// Close the open assistant message. Its content is left as is.
    pub fn on_stream_complete(&mut self) -> Result<MessageId, TranscriptError> {
        let index = self.open.take().ok_or(TranscriptError::NoOpenMessage)?;
        Ok(self.messages[index].id)
    }

    /// Stop accepting fragments for the open message, keeping what arrived
    pub fn cancel_stream(&mut self) -> Option<MessageId> {
        self.on_stream_complete().ok()
    }

    pub fn current_snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            draft: self.draft.clone(),
            messages: self.messages.clone(),
            open_message: self.open_message_id(),
        }
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    #[allow(dead_code)]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn open_message_id(&self) -> Option<MessageId> {
        self.open.map(|index| self.messages[index].id)
    }

    pub fn is_streaming(&self) -> bool {
        self.open.is_some()
    }
}
