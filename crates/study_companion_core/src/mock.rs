//! In-memory port implementations for deterministic testing.
//!
//! ```rust
//! use study_companion_core::mock::MockLlm;
//!
//! let llm = MockLlm::new()
//!     .with_summary("# Summary")
//!     .with_chat_reply("Sure, here you go.");
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::domain::{ChatSession, ChatTurn, ContentPart, ImagePart};
use crate::error::ExtractionError;
use crate::ports::{ChatService, GenerationService, PdfEngine, PortError, PortResult, TextStream};

//=========================================================================================
// PDF Engine
//=========================================================================================

#[derive(Debug, Clone, Default)]
enum PdfBehaviour {
    #[default]
    Pages,
    Unavailable,
    Corrupt,
}

/// A PDF engine that serves fixed page texts and fabricates one image per rendered page.
#[derive(Debug, Clone, Default)]
pub struct MockPdfEngine {
    pages: Vec<String>,
    behaviour: PdfBehaviour,
    render_calls: Arc<AtomicUsize>,
}

impl MockPdfEngine {
    pub fn with_pages(pages: Vec<String>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    /// Behaves as if the native PDF library could not be loaded.
    pub fn unavailable() -> Self {
        Self {
            behaviour: PdfBehaviour::Unavailable,
            ..Self::default()
        }
    }

    /// Rejects every document as unreadable.
    pub fn corrupt() -> Self {
        Self {
            behaviour: PdfBehaviour::Corrupt,
            ..Self::default()
        }
    }

    pub fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ExtractionError> {
        match self.behaviour {
            PdfBehaviour::Pages => Ok(()),
            PdfBehaviour::Unavailable => Err(ExtractionError::DependencyUnavailable(
                "mock pdfium missing".into(),
            )),
            PdfBehaviour::Corrupt => Err(ExtractionError::Unreadable("mock corrupt file".into())),
        }
    }
}

#[async_trait]
impl PdfEngine for MockPdfEngine {
    async fn page_texts(&self, _pdf: &[u8]) -> Result<Vec<String>, ExtractionError> {
        self.check()?;
        Ok(self.pages.clone())
    }

    async fn render_pages(
        &self,
        _pdf: &[u8],
        max_pages: usize,
        _scale: f32,
    ) -> Result<Vec<ImagePart>, ExtractionError> {
        self.check()?;
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..self.pages.len().min(max_pages))
            .map(|i| ImagePart {
                mime_type: "image/png".into(),
                base64_data: format!("page-{i}"),
            })
            .collect())
    }
}

//=========================================================================================
// LLM
//=========================================================================================

#[derive(Debug, Clone)]
struct MockLlmConfig {
    summary: Option<String>,
    questions: Option<String>,
    chat_replies: Vec<String>,
    chat_fails: bool,
    latency: Duration,
}

impl Default for MockLlmConfig {
    fn default() -> Self {
        Self {
            summary: Some("# Summary\n\nMock summary.".into()),
            questions: Some(
                r#"["💡 What is the **main idea**?","📝 List the **key terms**.","🔍 Explain the **method**.","🤔 Why does **it matter**?","🧠 Can you **quiz me**?"]"#
                    .into(),
            ),
            chat_replies: Vec::new(),
            chat_fails: false,
            latency: Duration::ZERO,
        }
    }
}

/// One recorded call against the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    GenerateText { model: String, parts: usize },
    GenerateStructured { model: String, parts: usize },
    CreateSession { model: String, seed_turns: usize },
    Send { history_turns: usize, text: String },
}

/// A scripted LLM. `None` for the summary or questions makes that request fail.
#[derive(Clone, Default)]
pub struct MockLlm {
    config: Arc<MockLlmConfig>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    chat_cursor: Arc<AtomicUsize>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).summary = Some(summary.into());
        self
    }

    pub fn failing_summary(mut self) -> Self {
        Arc::make_mut(&mut self.config).summary = None;
        self
    }

    pub fn with_questions_json(mut self, json: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).questions = Some(json.into());
        self
    }

    pub fn failing_questions(mut self) -> Self {
        Arc::make_mut(&mut self.config).questions = None;
        self
    }

    /// Replies are served in order; the last one repeats. Without any, a stock reply is used.
    pub fn with_chat_reply(mut self, reply: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).chat_replies.push(reply.into());
        self
    }

    pub fn failing_chat(mut self) -> Self {
        Arc::make_mut(&mut self.config).chat_fails = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: MockCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    async fn delay(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }

    fn next_reply(&self) -> PortResult<String> {
        if self.config.chat_fails {
            return Err(PortError::Unexpected("mock chat failure".into()));
        }
        let index = self.chat_cursor.fetch_add(1, Ordering::SeqCst);
        let replies = &self.config.chat_replies;
        Ok(replies
            .get(index.min(replies.len().saturating_sub(1)))
            .cloned()
            .unwrap_or_else(|| "Mock reply.".to_string()))
    }
}

#[async_trait]
impl GenerationService for MockLlm {
    async fn generate_text(
        &self,
        model: &str,
        _prompt: &str,
        content: &[ContentPart],
    ) -> PortResult<String> {
        self.record(MockCall::GenerateText {
            model: model.to_string(),
            parts: content.len(),
        });
        self.delay().await;
        self.config
            .summary
            .clone()
            .ok_or_else(|| PortError::Unexpected("mock summary failure".into()))
    }

    async fn generate_structured(
        &self,
        model: &str,
        _prompt: &str,
        content: &[ContentPart],
        _schema: &serde_json::Value,
    ) -> PortResult<String> {
        self.record(MockCall::GenerateStructured {
            model: model.to_string(),
            parts: content.len(),
        });
        self.delay().await;
        self.config
            .questions
            .clone()
            .ok_or_else(|| PortError::Unexpected("mock question failure".into()))
    }
}

#[async_trait]
impl ChatService for MockLlm {
    async fn create_session(
        &self,
        model: &str,
        system_instruction: &str,
        seed_history: Vec<ChatTurn>,
    ) -> PortResult<ChatSession> {
        self.record(MockCall::CreateSession {
            model: model.to_string(),
            seed_turns: seed_history.len(),
        });
        Ok(ChatSession {
            model: model.to_string(),
            system_instruction: system_instruction.to_string(),
            history: seed_history,
        })
    }

    async fn send_message(&self, session: &ChatSession, text: &str) -> PortResult<String> {
        self.record(MockCall::Send {
            history_turns: session.history.len(),
            text: text.to_string(),
        });
        self.delay().await;
        self.next_reply()
    }

    async fn send_message_streaming(
        &self,
        session: &ChatSession,
        text: &str,
    ) -> PortResult<TextStream> {
        let reply = self.send_message(session, text).await?;
        // Split into word-sized chunks so callers see several updates.
        let chunks: Vec<PortResult<String>> = reply
            .split_inclusive(' ')
            .map(|chunk| Ok(chunk.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}
