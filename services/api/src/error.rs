//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service.

use crate::config::ConfigError;
use axum::http::StatusCode;
use study_companion_core::{ExtractionError, LibraryError, QuizActionError};

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Maps a rejected library intent to the status code a handler returns.
pub fn library_error_response(e: LibraryError) -> (StatusCode, String) {
    let status = match &e {
        LibraryError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
        LibraryError::NoQuiz => StatusCode::NOT_FOUND,
        LibraryError::NotReady(_) | LibraryError::TurnInProgress => StatusCode::CONFLICT,
        LibraryError::Quiz(QuizActionError::OptionOutOfRange { .. }) => StatusCode::BAD_REQUEST,
        LibraryError::Quiz(_) => StatusCode::CONFLICT,
    };
    (status, e.to_string())
}

pub fn extraction_error_response(e: ExtractionError) -> (StatusCode, String) {
    let status = match &e {
        ExtractionError::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ExtractionError::Empty | ExtractionError::Unreadable(_) => StatusCode::BAD_REQUEST,
        ExtractionError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use study_companion_core::ProcessingState;
    use uuid::Uuid;

    #[test]
    fn library_errors_map_to_client_statuses() {
        assert_eq!(
            library_error_response(LibraryError::DocumentNotFound(Uuid::nil())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            library_error_response(LibraryError::NotReady(ProcessingState::Summarizing)).0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            library_error_response(LibraryError::Quiz(QuizActionError::OptionOutOfRange {
                index: 9,
                options: 4
            }))
            .0,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn unsupported_uploads_are_415() {
        let (status, message) =
            extraction_error_response(ExtractionError::Unsupported("notes.docx".into()));
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(message.contains("notes.docx"));
    }
}
