//! crates/study_companion_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs carry no knowledge of HTTP, the LLM vendor or the PDF engine.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::quiz_session::QuizSession;

//=========================================================================================
// Uploaded Files and Extracted Content
//=========================================================================================

/// The kind of document the user uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pdf,
    Image,
}

/// A single file handed over by the UI (file picker or drag-and-drop).
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    /// The MIME type reported by the browser, if any.
    pub mime_type: Option<String>,
    pub bytes: Bytes,
}

/// An inline image payload, ready to be sent to a multimodal model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePart {
    pub mime_type: String,
    pub base64_data: String,
}

impl ImagePart {
    /// Formats the part as a `data:` URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }
}

/// What the extractor produced for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractedContent {
    Text { content: String },
    Image { parts: Vec<ImagePart> },
}

/// One piece of multimodal input for a generation request or chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image(ImagePart),
}

//=========================================================================================
// Model Selection
//=========================================================================================

/// The two model tiers the user can pick between.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelChoice {
    #[default]
    Fast,
    Pro,
}

//=========================================================================================
// Document Lifecycle
//=========================================================================================

/// Where a document is in its processing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Reading,
    Summarizing,
    GeneratingQuestions,
    Done,
    Error,
}

impl ProcessingState {
    fn rank(self) -> u8 {
        match self {
            ProcessingState::Reading => 0,
            ProcessingState::Summarizing => 1,
            ProcessingState::GeneratingQuestions => 2,
            ProcessingState::Done => 3,
            ProcessingState::Error => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingState::Done | ProcessingState::Error)
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// States only move forward along `reading → summarizing → generating_questions → done`
    /// (skipping is fine), and `error` is reachable from every non-terminal state.
    pub fn can_transition_to(self, next: ProcessingState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == ProcessingState::Error || next.rank() > self.rank()
    }
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Bot,
}

/// A single message in a document's displayed transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Monotonically increasing per document; streaming updates target this id.
    pub id: u64,
    pub sender: Sender,
    pub text: String,
    /// True while a bot reply is still being streamed or held back.
    pub pending: bool,
}

/// The role of a turn inside the model-facing chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

/// A turn as the model sees it (may carry images, unlike the displayed transcript).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub parts: Vec<ContentPart>,
}

impl ChatTurn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            parts: vec![ContentPart::Text(text.into())],
        }
    }
}

/// A persistent conversation with the model, seeded with the document content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    pub model: String,
    pub system_instruction: String,
    pub history: Vec<ChatTurn>,
}

/// A document uploaded by the user and everything derived from it.
#[derive(Debug)]
pub struct Document {
    pub id: Uuid,
    pub file_name: String,
    pub source_kind: SourceKind,
    pub extracted: Option<ExtractedContent>,
    pub summary: Option<String>,
    pub chat_session: Option<ChatSession>,
    pub chat_history: Vec<ChatMessage>,
    pub preset_questions: Option<Vec<String>>,
    pub processing_state: ProcessingState,
    pub error_message: Option<String>,
    pub model: ModelChoice,
    pub quiz: Option<QuizSession>,
    pub created_at: DateTime<Utc>,
    /// Id of the bot message whose turn is still in flight, if any.
    pub(crate) active_turn: Option<u64>,
    pub(crate) next_message_id: u64,
    /// Cancelled when the document is deleted; in-flight work checks it before writing.
    pub(crate) cancellation_token: CancellationToken,
}

impl Document {
    pub fn new(file_name: String, source_kind: SourceKind, model: ModelChoice) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name,
            source_kind,
            extracted: None,
            summary: None,
            chat_session: None,
            chat_history: Vec::new(),
            preset_questions: None,
            processing_state: ProcessingState::Reading,
            error_message: None,
            model,
            quiz: None,
            created_at: Utc::now(),
            active_turn: None,
            next_message_id: 0,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_turn_in_flight(&self) -> bool {
        self.active_turn.is_some()
    }

    pub(crate) fn push_message(&mut self, sender: Sender, text: String, pending: bool) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        self.chat_history.push(ChatMessage {
            id,
            sender,
            text,
            pending,
        });
        id
    }

    pub(crate) fn message_mut(&mut self, id: u64) -> Option<&mut ChatMessage> {
        self.chat_history.iter_mut().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_only_move_forward() {
        use ProcessingState::*;
        assert!(Reading.can_transition_to(Summarizing));
        assert!(Summarizing.can_transition_to(GeneratingQuestions));
        assert!(Summarizing.can_transition_to(Done));
        assert!(!GeneratingQuestions.can_transition_to(Summarizing));
        assert!(!Summarizing.can_transition_to(Summarizing));
    }

    #[test]
    fn error_is_reachable_only_from_non_terminal_states() {
        use ProcessingState::*;
        for state in [Reading, Summarizing, GeneratingQuestions] {
            assert!(state.can_transition_to(Error));
        }
        assert!(!Done.can_transition_to(Error));
        assert!(!Error.can_transition_to(Done));
    }

    #[test]
    fn message_ids_are_monotonic() {
        let mut doc = Document::new("notes.pdf".into(), SourceKind::Pdf, ModelChoice::Fast);
        let a = doc.push_message(Sender::User, "hi".into(), false);
        let b = doc.push_message(Sender::Bot, String::new(), true);
        assert!(b > a);
        if let Some(message) = doc.message_mut(b) {
            message.text.push_str("hello");
        }
        assert_eq!(doc.chat_history[1].text, "hello");
    }
}
