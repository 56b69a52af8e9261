//! crates/study_companion_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, keeping the core
//! independent of the LLM vendor and the PDF engine.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::domain::{ChatSession, ChatTurn, ContentPart, ImagePart};
use crate::error::ExtractionError;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (network, vendor SDKs).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("The service returned an empty response: {0}")]
    EmptyResponse(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A stream of incremental text chunks from a model.
pub type TextStream = Pin<Box<dyn Stream<Item = PortResult<String>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// One-shot generation requests (summary, preset questions).
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generates free-form text from a prompt and optional document content.
    async fn generate_text(
        &self,
        model: &str,
        prompt: &str,
        content: &[ContentPart],
    ) -> PortResult<String>;

    /// Generates JSON constrained by `schema` and returns the raw JSON text.
    ///
    /// The caller parses the text, so a response that does not match the schema
    /// surfaces as a parse failure rather than a port error.
    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        content: &[ContentPart],
        schema: &serde_json::Value,
    ) -> PortResult<String>;
}

/// A conversational model with a system persona and a running history.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Opens a chat session seeded with `seed_history`.
    async fn create_session(
        &self,
        model: &str,
        system_instruction: &str,
        seed_history: Vec<ChatTurn>,
    ) -> PortResult<ChatSession>;

    /// Sends `text` as the next user turn and returns the whole reply.
    async fn send_message(&self, session: &ChatSession, text: &str) -> PortResult<String>;

    /// Sends `text` as the next user turn and returns the reply as incremental chunks.
    async fn send_message_streaming(
        &self,
        session: &ChatSession,
        text: &str,
    ) -> PortResult<TextStream>;
}

/// The opaque PDF capability: per-page text and page rasterization.
#[async_trait]
pub trait PdfEngine: Send + Sync {
    /// Returns the text of every page, in page order.
    async fn page_texts(&self, pdf: &[u8]) -> Result<Vec<String>, ExtractionError>;

    /// Renders up to `max_pages` leading pages at `scale` into PNG image parts.
    async fn render_pages(
        &self,
        pdf: &[u8],
        max_pages: usize,
        scale: f32,
    ) -> Result<Vec<ImagePart>, ExtractionError>;
}
