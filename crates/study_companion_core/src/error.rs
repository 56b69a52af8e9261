//! crates/study_companion_core/src/error.rs
//!
//! The error taxonomy of the document pipeline.
//!
//! Extraction and generation failures are terminal for a document. Chat and quiz
//! failures are scoped to a single exchange and recovered with an apology message.

use uuid::Uuid;

use crate::domain::ProcessingState;
use crate::ports::PortError;

/// The uploaded file could not be turned into text or images.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("The file could not be read: {0}")]
    Unreadable(String),
    #[error("Unsupported file type: {0}")]
    Unsupported(String),
    #[error("The document does not contain any readable content.")]
    Empty,
    #[error("The PDF library is unavailable: {0}")]
    DependencyUnavailable(String),
}

/// A summary or preset-question request failed.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Summary generation failed: {0}")]
    Summary(#[source] PortError),
    #[error("The model returned an empty summary.")]
    EmptySummary,
    #[error("Question generation failed: {0}")]
    Questions(#[source] PortError),
    #[error("Chat session could not be started: {0}")]
    ChatSession(#[source] PortError),
}

/// A single chat turn failed.
#[derive(Debug, thiserror::Error)]
pub enum ChatRequestError {
    #[error("Chat request failed: {0}")]
    Request(#[from] PortError),
    #[error("The chat response stream was interrupted: {0}")]
    Stream(String),
}

/// A `<quiz_data>` block was present but unusable.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum QuizFormatError {
    #[error("Quiz payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Quiz payload contains no questions.")]
    NoQuestions,
    #[error("Question {question} has {options} options but marks index {index} as correct.")]
    AnswerOutOfRange {
        question: usize,
        index: usize,
        options: usize,
    },
}

/// An intent that the quiz session rejected; the session is left unchanged.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QuizActionError {
    #[error("Options can only be selected while answering.")]
    NotAnswering,
    #[error("Option {index} does not exist (the question has {options} options).")]
    OptionOutOfRange { index: usize, options: usize },
    #[error("Select an option before submitting.")]
    NothingSelected,
    #[error("Submit the current answer before moving on.")]
    NotSubmitted,
}

/// An intent dispatched against the library could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),
    #[error("Document is not ready for chat (state: {0:?}).")]
    NotReady(ProcessingState),
    #[error("A reply is still being generated for this document.")]
    TurnInProgress,
    #[error("There is no quiz for this document.")]
    NoQuiz,
    #[error(transparent)]
    Quiz(#[from] QuizActionError),
}
