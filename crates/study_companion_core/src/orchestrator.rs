//! crates/study_companion_core/src/orchestrator.rs
//!
//! Runs the per-document pipeline: extract, then summarize, generate the starter
//! questions and open the chat session concurrently. Progress is reported as
//! `DocumentEvent`s; the library decides what to keep.

use futures::TryFutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    ChatTurn, ContentPart, ExtractedContent, ModelChoice, ProcessingState, TurnRole, UploadedFile,
};
use crate::error::{ExtractionError, GenerationError};
use crate::extractor::Extractor;
use crate::library::{DocumentEvent, DocumentEventKind};
use crate::ports::{ChatService, GenerationService};
use crate::prompts;

/// Maps the user-facing model tiers to concrete model identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    pub fast: String,
    pub pro: String,
}

impl ModelCatalog {
    pub fn model_id(&self, choice: ModelChoice) -> &str {
        match choice {
            ModelChoice::Fast => &self.fast,
            ModelChoice::Pro => &self.pro,
        }
    }
}

/// Why a document ended up in the `error` state.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// One upload to process.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub document_id: Uuid,
    pub file: UploadedFile,
    pub model: ModelChoice,
    pub cancellation_token: CancellationToken,
}

/// Forwards events for one document until its token is cancelled.
struct EventSink<'a> {
    document_id: Uuid,
    token: &'a CancellationToken,
    events: &'a mpsc::UnboundedSender<DocumentEvent>,
}

impl EventSink<'_> {
    fn emit(&self, kind: DocumentEventKind) {
        if self.token.is_cancelled() {
            debug!("Document {} was removed; dropping event.", self.document_id);
            return;
        }
        // A closed channel means the server is shutting down.
        let _ = self.events.send(DocumentEvent {
            document_id: self.document_id,
            kind,
        });
    }
}

#[derive(Clone)]
pub struct DocumentProcessor {
    extractor: Extractor,
    generation: Arc<dyn GenerationService>,
    chat: Arc<dyn ChatService>,
    models: ModelCatalog,
}

impl DocumentProcessor {
    pub fn new(
        extractor: Extractor,
        generation: Arc<dyn GenerationService>,
        chat: Arc<dyn ChatService>,
        models: ModelCatalog,
    ) -> Self {
        Self {
            extractor,
            generation,
            chat,
            models,
        }
    }

    /// Processes one upload to completion, emitting a `Failed` event on any error.
    #[instrument(skip_all, fields(document_id = %job.document_id, file = %job.file.file_name))]
    pub async fn process(&self, job: ProcessingJob, events: mpsc::UnboundedSender<DocumentEvent>) {
        let sink = EventSink {
            document_id: job.document_id,
            token: &job.cancellation_token,
            events: &events,
        };

        tokio::select! {
            _ = job.cancellation_token.cancelled() => {
                info!("Processing cancelled.");
            }
            result = self.run(&job, &sink) => {
                if let Err(e) = result {
                    error!("Processing failed: {}", e);
                    sink.emit(DocumentEventKind::Failed { message: e.to_string() });
                }
            }
        }
    }

    async fn run(&self, job: &ProcessingJob, sink: &EventSink<'_>) -> Result<(), ProcessingError> {
        let content = self.extractor.extract(&job.file).await?;
        sink.emit(DocumentEventKind::Extracted(content.clone()));
        sink.emit(DocumentEventKind::StateChanged(ProcessingState::Summarizing));

        let model = self.models.model_id(job.model);
        let parts = document_parts(&content);
        info!("Generating with model '{}' over {} parts.", model, parts.len());

        let summary = async {
            let summary = self
                .generation
                .generate_text(model, prompts::SUMMARY_PROMPT, &parts)
                .await
                .map_err(GenerationError::Summary)?;
            if summary.trim().is_empty() {
                return Err(GenerationError::EmptySummary);
            }
            sink.emit(DocumentEventKind::StateChanged(
                ProcessingState::GeneratingQuestions,
            ));
            Ok(summary.trim().to_string())
        };

        let schema = prompts::questions_schema();
        let questions = self
            .generation
            .generate_structured(model, prompts::QUESTIONS_PROMPT, &parts, &schema)
            .map_ok(|raw| parse_preset_questions(&raw))
            .map_err(GenerationError::Questions);

        let chat_session = self
            .chat
            .create_session(model, prompts::SYSTEM_INSTRUCTIONS, seed_history(&content))
            .map_err(GenerationError::ChatSession);

        let (summary, preset_questions, chat_session) =
            tokio::try_join!(summary, questions, chat_session)?;

        sink.emit(DocumentEventKind::Completed {
            summary,
            preset_questions,
            chat_session,
        });
        Ok(())
    }
}

/// The document as model input: a preamble followed by the text or the page images.
pub fn document_parts(content: &ExtractedContent) -> Vec<ContentPart> {
    match content {
        ExtractedContent::Text { content } => vec![ContentPart::Text(format!(
            "{}\n\n{}",
            prompts::DOCUMENT_TEXT_PREAMBLE,
            content
        ))],
        ExtractedContent::Image { parts } => {
            std::iter::once(ContentPart::Text(prompts::DOCUMENT_IMAGES_PREAMBLE.to_string()))
                .chain(parts.iter().cloned().map(ContentPart::Image))
                .collect()
        }
    }
}

/// The scripted opening of every chat: the document, then the model's acknowledgement.
pub fn seed_history(content: &ExtractedContent) -> Vec<ChatTurn> {
    vec![
        ChatTurn {
            role: TurnRole::User,
            parts: document_parts(content),
        },
        ChatTurn::model_text(prompts::SEED_ACKNOWLEDGEMENT),
    ]
}

/// Parses the model's question list, falling back to the stock questions when the
/// payload is not a usable JSON array of strings. At most five are kept.
pub fn parse_preset_questions(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    match serde_json::from_str::<Vec<String>>(body.trim()) {
        Ok(questions) => {
            let questions: Vec<String> = questions
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .take(5)
                .collect();
            if questions.is_empty() {
                warn!("Model returned no starter questions; using the defaults.");
                prompts::fallback_questions()
            } else {
                questions
            }
        }
        Err(e) => {
            warn!("Could not parse starter questions ({}); using the defaults.", e);
            prompts::fallback_questions()
        }
    }
}
