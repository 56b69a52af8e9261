//! crates/study_companion_core/src/library.rs
//!
//! The application state: every open document, the active selection and the
//! default model. It is the only writer of document fields. Processing results
//! arrive as `DocumentEvent`s and chat turns go through the turn methods, so late
//! results for a deleted document are dropped instead of landing somewhere else.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    ChatSession, ChatTurn, Document, ExtractedContent, ModelChoice, ProcessingState, Sender,
    SourceKind,
};
use crate::error::{ChatRequestError, LibraryError};
use crate::prompts;
use crate::quiz::{try_parse_quiz, QuizData, QuizScan};
use crate::quiz_session::{QuizSession, UserAnswer};

//=========================================================================================
// Processing Events
//=========================================================================================

#[derive(Debug, Clone)]
pub enum DocumentEventKind {
    StateChanged(ProcessingState),
    Extracted(ExtractedContent),
    Completed {
        summary: String,
        preset_questions: Vec<String>,
        chat_session: ChatSession,
    },
    Failed {
        message: String,
    },
}

/// A result emitted by the orchestrator for one document.
#[derive(Debug, Clone)]
pub struct DocumentEvent {
    pub document_id: Uuid,
    pub kind: DocumentEventKind,
}

//=========================================================================================
// Chat Turns
//=========================================================================================

/// Everything a chat task needs to run one turn outside the library lock.
#[derive(Debug, Clone)]
pub struct TurnTicket {
    pub document_id: Uuid,
    pub user_message_id: u64,
    /// Id of the pending bot message the reply is written into.
    pub message_id: u64,
    pub user_text: String,
    pub session: ChatSession,
    pub cancellation_token: CancellationToken,
}

/// How a finished turn was presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Answered,
    Failed,
    QuizMalformed,
    /// A valid quiz is held back behind the "crafting" placeholder until revealed.
    QuizPending { title: String, questions: usize },
}

//=========================================================================================
// Library
//=========================================================================================

#[derive(Debug, Default)]
pub struct Library {
    documents: Vec<Document>,
    active: Option<Uuid>,
    default_model: ModelChoice,
    /// Parsed quizzes waiting for `reveal_quiz`, keyed by document and message.
    pending_quizzes: Vec<(Uuid, u64, QuizData)>,
}

impl Library {
    pub fn new(default_model: ModelChoice) -> Self {
        Self {
            default_model,
            ..Self::default()
        }
    }

    //-------------------------------------------------------------------------------------
    // Documents and selection
    //-------------------------------------------------------------------------------------

    /// Registers a new document in the `reading` state and makes it active.
    pub fn add_document(
        &mut self,
        file_name: String,
        source_kind: SourceKind,
        model: Option<ModelChoice>,
    ) -> (Uuid, CancellationToken) {
        let document = Document::new(file_name, source_kind, model.unwrap_or(self.default_model));
        let id = document.id;
        let token = document.cancellation_token();
        info!("Added document {} ('{}').", id, document.file_name);
        self.documents.push(document);
        self.active = Some(id);
        (id, token)
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, id: Uuid) -> Result<&Document, LibraryError> {
        self.documents
            .iter()
            .find(|d| d.id == id)
            .ok_or(LibraryError::DocumentNotFound(id))
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut Document, LibraryError> {
        self.documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(LibraryError::DocumentNotFound(id))
    }

    /// Removes a document and cancels any in-flight work for it.
    pub fn remove(&mut self, id: Uuid) -> Result<Document, LibraryError> {
        let index = self
            .documents
            .iter()
            .position(|d| d.id == id)
            .ok_or(LibraryError::DocumentNotFound(id))?;
        let document = self.documents.remove(index);
        document.cancellation_token.cancel();
        self.pending_quizzes.retain(|(doc, _, _)| *doc != id);
        if self.active == Some(id) {
            self.active = self.documents.first().map(|d| d.id);
        }
        info!("Removed document {}.", id);
        Ok(document)
    }

    pub fn active(&self) -> Option<Uuid> {
        self.active
    }

    pub fn select(&mut self, id: Uuid) -> Result<(), LibraryError> {
        self.get(id)?;
        self.active = Some(id);
        Ok(())
    }

    pub fn default_model(&self) -> ModelChoice {
        self.default_model
    }

    pub fn set_default_model(&mut self, model: ModelChoice) {
        self.default_model = model;
    }

    //-------------------------------------------------------------------------------------
    // Processing events
    //-------------------------------------------------------------------------------------

    /// Applies an orchestrator event. Returns `false` when the event was discarded.
    pub fn apply(&mut self, event: DocumentEvent) -> bool {
        let Ok(document) = self.get_mut(event.document_id) else {
            debug!("Discarding event for removed document {}.", event.document_id);
            return false;
        };
        if document.cancellation_token.is_cancelled() {
            return false;
        }
        let current = document.processing_state;

        match event.kind {
            DocumentEventKind::StateChanged(next) => {
                if !current.can_transition_to(next) || next == ProcessingState::Done {
                    warn!(
                        "Ignoring transition {:?} -> {:?} for document {}.",
                        current, next, document.id
                    );
                    return false;
                }
                document.processing_state = next;
                if next == ProcessingState::Error && document.error_message.is_none() {
                    document.error_message = Some("Processing failed.".to_string());
                }
            }
            DocumentEventKind::Extracted(content) => {
                if current.is_terminal() {
                    return false;
                }
                document.extracted = Some(content);
            }
            DocumentEventKind::Completed {
                summary,
                preset_questions,
                chat_session,
            } => {
                if !current.can_transition_to(ProcessingState::Done) {
                    return false;
                }
                document.summary = Some(summary);
                document.preset_questions = Some(preset_questions);
                document.chat_session = Some(chat_session);
                if document.chat_history.is_empty() {
                    document.push_message(Sender::Bot, prompts::GREETING.to_string(), false);
                }
                document.processing_state = ProcessingState::Done;
                info!("Document {} is ready.", document.id);
            }
            DocumentEventKind::Failed { message } => {
                if !current.can_transition_to(ProcessingState::Error) {
                    return false;
                }
                warn!("Document {} failed: {}", document.id, message);
                document.processing_state = ProcessingState::Error;
                document.error_message = Some(message);
            }
        }
        true
    }

    //-------------------------------------------------------------------------------------
    // Chat turns
    //-------------------------------------------------------------------------------------

    /// Appends the user's message and a pending bot message, and hands back a ticket
    /// for running the turn.
    pub fn begin_turn(&mut self, id: Uuid, text: &str) -> Result<TurnTicket, LibraryError> {
        let document = self.get_mut(id)?;
        let session = match (&document.chat_session, document.processing_state) {
            (Some(session), ProcessingState::Done) => session.clone(),
            (_, state) => return Err(LibraryError::NotReady(state)),
        };
        if document.is_turn_in_flight() {
            return Err(LibraryError::TurnInProgress);
        }
        let user_message_id = document.push_message(Sender::User, text.to_string(), false);
        let message_id = document.push_message(Sender::Bot, String::new(), true);
        document.active_turn = Some(message_id);
        Ok(TurnTicket {
            document_id: id,
            user_message_id,
            message_id,
            user_text: text.to_string(),
            session,
            cancellation_token: document.cancellation_token(),
        })
    }

    /// Appends a streamed chunk to the pending bot message. Returns `false` once the
    /// document or message is gone, which tells the caller to stop streaming.
    pub fn append_chunk(&mut self, id: Uuid, message_id: u64, chunk: &str) -> bool {
        let Ok(document) = self.get_mut(id) else {
            return false;
        };
        match document.message_mut(message_id) {
            Some(message) if message.pending => {
                message.text.push_str(chunk);
                true
            }
            _ => false,
        }
    }

    /// Completes a turn with the model's reply or the error that ended it.
    ///
    /// Returns `None` when the document was removed while the turn was running.
    pub fn finish_turn(
        &mut self,
        ticket: &TurnTicket,
        result: Result<String, ChatRequestError>,
    ) -> Option<TurnOutcome> {
        let mut pending_quiz = None;
        let outcome = {
            let document = self.get_mut(ticket.document_id).ok()?;

            let (text, pending, outcome) = match result {
                Err(e) => {
                    warn!("Chat turn on document {} failed: {}", document.id, e);
                    (prompts::CHAT_ERROR_APOLOGY.to_string(), false, TurnOutcome::Failed)
                }
                Ok(reply) => {
                    if let Some(session) = document.chat_session.as_mut() {
                        session.history.push(ChatTurn::user_text(ticket.user_text.clone()));
                        session.history.push(ChatTurn::model_text(reply.clone()));
                    }
                    match try_parse_quiz(&reply) {
                        QuizScan::NotFound => (reply, false, TurnOutcome::Answered),
                        QuizScan::Malformed(e) => {
                            warn!("Quiz on document {} is malformed: {}", document.id, e);
                            (
                                prompts::QUIZ_FORMAT_APOLOGY.to_string(),
                                false,
                                TurnOutcome::QuizMalformed,
                            )
                        }
                        QuizScan::Found(quiz) => {
                            info!(
                                "Quiz '{}' with {} questions detected on document {}.",
                                quiz.title,
                                quiz.questions.len(),
                                document.id
                            );
                            let outcome = TurnOutcome::QuizPending {
                                title: quiz.title.clone(),
                                questions: quiz.questions.len(),
                            };
                            pending_quiz = Some(quiz);
                            (prompts::QUIZ_CRAFTING.to_string(), true, outcome)
                        }
                    }
                }
            };

            // A held-back quiz keeps the turn open until `reveal_quiz` or `abandon_turn`.
            if !pending {
                document.active_turn = None;
            }
            let message = document.message_mut(ticket.message_id)?;
            message.text = text;
            message.pending = pending;
            outcome
        };

        if let Some(quiz) = pending_quiz {
            self.pending_quizzes
                .push((ticket.document_id, ticket.message_id, quiz));
        }
        Some(outcome)
    }

    /// Closes a turn whose task stopped before finishing it normally. A still-pending
    /// reply becomes the chat apology and any held-back quiz for it is discarded.
    ///
    /// Returns `false` when there was nothing left to close.
    pub fn abandon_turn(&mut self, id: Uuid, message_id: u64) -> bool {
        self.pending_quizzes
            .retain(|(doc, msg, _)| !(*doc == id && *msg == message_id));
        let Ok(document) = self.get_mut(id) else {
            return false;
        };
        if document.active_turn != Some(message_id) {
            return false;
        }
        warn!("Chat turn {} on document {} was abandoned.", message_id, id);
        document.active_turn = None;
        if let Some(message) = document.message_mut(message_id) {
            if message.pending {
                message.text = prompts::CHAT_ERROR_APOLOGY.to_string();
                message.pending = false;
            }
        }
        true
    }

    /// Replaces the "crafting" placeholder with the success message and makes the
    /// held-back quiz the document's current quiz.
    pub fn reveal_quiz(&mut self, id: Uuid, message_id: u64) -> Result<&QuizSession, LibraryError> {
        let position = self
            .pending_quizzes
            .iter()
            .position(|(doc, msg, _)| *doc == id && *msg == message_id)
            .ok_or(LibraryError::NoQuiz)?;
        let (_, _, quiz) = self.pending_quizzes.remove(position);

        let document = self.get_mut(id)?;
        if document.active_turn == Some(message_id) {
            document.active_turn = None;
        }
        if let Some(message) = document.message_mut(message_id) {
            message.text = prompts::quiz_ready(&quiz.title, quiz.questions.len());
            message.pending = false;
        }
        Ok(document.quiz.insert(QuizSession::new(quiz)))
    }

    //-------------------------------------------------------------------------------------
    // Quiz intents
    //-------------------------------------------------------------------------------------

    pub fn quiz(&self, id: Uuid) -> Result<&QuizSession, LibraryError> {
        self.get(id)?.quiz.as_ref().ok_or(LibraryError::NoQuiz)
    }

    fn quiz_mut(&mut self, id: Uuid) -> Result<&mut QuizSession, LibraryError> {
        self.get_mut(id)?.quiz.as_mut().ok_or(LibraryError::NoQuiz)
    }

    pub fn select_option(&mut self, id: Uuid, option: usize) -> Result<&QuizSession, LibraryError> {
        let quiz = self.quiz_mut(id)?;
        quiz.select_option(option)?;
        Ok(quiz)
    }

    pub fn submit_answer(&mut self, id: Uuid) -> Result<UserAnswer, LibraryError> {
        let quiz = self.quiz_mut(id)?;
        Ok(*quiz.submit()?)
    }

    pub fn next_question(&mut self, id: Uuid) -> Result<&QuizSession, LibraryError> {
        let quiz = self.quiz_mut(id)?;
        quiz.next()?;
        Ok(quiz)
    }

    pub fn restart_quiz(&mut self, id: Uuid) -> Result<&QuizSession, LibraryError> {
        let quiz = self.quiz_mut(id)?;
        quiz.restart();
        Ok(quiz)
    }
}

/// Drains orchestrator events into the shared library until every sender is dropped.
pub async fn apply_events(
    library: Arc<Mutex<Library>>,
    mut events: mpsc::UnboundedReceiver<DocumentEvent>,
) {
    while let Some(event) = events.recv().await {
        library.lock().await.apply(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;

    fn session() -> ChatSession {
        ChatSession {
            model: "m".into(),
            system_instruction: "persona".into(),
            history: vec![ChatTurn::user_text("doc"), ChatTurn::model_text("ok")],
        }
    }

    fn ready_library() -> (Library, Uuid) {
        let mut library = Library::new(ModelChoice::Fast);
        let (id, _) = library.add_document("a.pdf".into(), SourceKind::Pdf, None);
        assert!(library.apply(DocumentEvent {
            document_id: id,
            kind: DocumentEventKind::StateChanged(ProcessingState::Summarizing),
        }));
        assert!(library.apply(DocumentEvent {
            document_id: id,
            kind: DocumentEventKind::Completed {
                summary: "# S".into(),
                preset_questions: vec!["q".into()],
                chat_session: session(),
            },
        }));
        (library, id)
    }

    const QUIZ_REPLY: &str = r#"<quiz_data>{"title":"T","questions":[{"questionText":"Q","options":["a","b"],"correctAnswerIndex":1,"explanation":"E"}]}</quiz_data>"#;

    #[test]
    fn completed_document_is_seeded_with_a_greeting() {
        let (library, id) = ready_library();
        let doc = library.get(id).unwrap();
        assert_eq!(doc.processing_state, ProcessingState::Done);
        assert_eq!(doc.chat_history.len(), 1);
        assert_eq!(doc.chat_history[0].sender, Sender::Bot);
    }

    #[test]
    fn backward_and_post_terminal_events_are_ignored() {
        let (mut library, id) = ready_library();
        assert!(!library.apply(DocumentEvent {
            document_id: id,
            kind: DocumentEventKind::StateChanged(ProcessingState::Summarizing),
        }));
        assert!(!library.apply(DocumentEvent {
            document_id: id,
            kind: DocumentEventKind::Failed {
                message: "late".into()
            },
        }));
        assert_eq!(library.get(id).unwrap().processing_state, ProcessingState::Done);
    }

    #[test]
    fn events_for_removed_documents_are_discarded() {
        let mut library = Library::new(ModelChoice::Fast);
        let (id, token) = library.add_document("a.png".into(), SourceKind::Image, None);
        let (other, _) = library.add_document("b.png".into(), SourceKind::Image, None);
        library.remove(id).unwrap();
        assert!(token.is_cancelled());
        assert_eq!(library.active(), Some(other));
        assert!(!library.apply(DocumentEvent {
            document_id: id,
            kind: DocumentEventKind::Failed {
                message: "late".into()
            },
        }));
        assert_eq!(
            library.get(other).unwrap().processing_state,
            ProcessingState::Reading
        );
    }

    #[test]
    fn chat_requires_a_ready_document() {
        let mut library = Library::new(ModelChoice::Pro);
        let (id, _) = library.add_document("a.pdf".into(), SourceKind::Pdf, None);
        assert_eq!(library.get(id).unwrap().model, ModelChoice::Pro);
        assert!(matches!(
            library.begin_turn(id, "hi"),
            Err(LibraryError::NotReady(ProcessingState::Reading))
        ));
    }

    #[test]
    fn streamed_chunks_update_the_pending_message_by_id() {
        let (mut library, id) = ready_library();
        let ticket = library.begin_turn(id, "What is it?").unwrap();
        assert!(matches!(
            library.begin_turn(id, "again"),
            Err(LibraryError::TurnInProgress)
        ));
        assert!(library.append_chunk(id, ticket.message_id, "It is "));
        assert!(library.append_chunk(id, ticket.message_id, "a test."));
        let outcome = library
            .finish_turn(&ticket, Ok("It is a test.".into()))
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Answered);

        let doc = library.get(id).unwrap();
        let reply = doc.chat_history.last().unwrap();
        assert_eq!(reply.id, ticket.message_id);
        assert_eq!(reply.text, "It is a test.");
        assert!(!reply.pending);
        assert_eq!(doc.chat_session.as_ref().unwrap().history.len(), 4);
        assert!(!library.append_chunk(id, ticket.message_id, "late"));
    }

    #[test]
    fn failed_turn_keeps_the_user_message_and_apologizes() {
        let (mut library, id) = ready_library();
        let ticket = library.begin_turn(id, "Hello?").unwrap();
        let outcome = library
            .finish_turn(
                &ticket,
                Err(ChatRequestError::Request(PortError::Unexpected("down".into()))),
            )
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Failed);
        let doc = library.get(id).unwrap();
        assert_eq!(doc.chat_history.len(), 3);
        assert_eq!(doc.chat_history[1].text, "Hello?");
        assert_eq!(doc.chat_history[2].text, prompts::CHAT_ERROR_APOLOGY);
        assert_eq!(doc.chat_session.as_ref().unwrap().history.len(), 2);
    }

    #[test]
    fn quiz_is_held_back_until_revealed() {
        let (mut library, id) = ready_library();
        let ticket = library.begin_turn(id, "Quiz me").unwrap();
        let outcome = library.finish_turn(&ticket, Ok(QUIZ_REPLY.into())).unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::QuizPending {
                title: "T".into(),
                questions: 1
            }
        );
        assert!(matches!(library.quiz(id), Err(LibraryError::NoQuiz)));
        assert_eq!(
            library.get(id).unwrap().chat_history.last().unwrap().text,
            prompts::QUIZ_CRAFTING
        );

        library.reveal_quiz(id, ticket.message_id).unwrap();
        library.select_option(id, 1).unwrap();
        assert!(library.submit_answer(id).unwrap().is_correct);
        let last = library.get(id).unwrap().chat_history.last().unwrap().clone();
        assert!(!last.pending);
        assert!(last.text.contains("**T**"));
    }

    #[test]
    fn new_quiz_replaces_the_previous_one() {
        let (mut library, id) = ready_library();
        for title in ["First", "Second"] {
            let ticket = library.begin_turn(id, "Quiz me").unwrap();
            let reply = QUIZ_REPLY.replace("\"T\"", &format!("\"{title}\""));
            library.finish_turn(&ticket, Ok(reply)).unwrap();
            library.reveal_quiz(id, ticket.message_id).unwrap();
        }
        assert_eq!(library.quiz(id).unwrap().quiz().title, "Second");
    }

    #[test]
    fn malformed_quiz_becomes_an_apology() {
        let (mut library, id) = ready_library();
        let ticket = library.begin_turn(id, "Quiz me").unwrap();
        let outcome = library
            .finish_turn(&ticket, Ok("<quiz_data>{not valid json</quiz_data>".into()))
            .unwrap();
        assert_eq!(outcome, TurnOutcome::QuizMalformed);
        assert_eq!(
            library.get(id).unwrap().chat_history.last().unwrap().text,
            prompts::QUIZ_FORMAT_APOLOGY
        );
        assert!(library.quiz(id).is_err());
    }

    #[test]
    fn finishing_a_turn_after_removal_is_a_no_op() {
        let (mut library, id) = ready_library();
        let ticket = library.begin_turn(id, "hi").unwrap();
        library.remove(id).unwrap();
        assert!(ticket.cancellation_token.is_cancelled());
        assert!(library.finish_turn(&ticket, Ok("late".into())).is_none());
    }

    #[test]
    fn quiz_turn_stays_in_flight_until_revealed() {
        let (mut library, id) = ready_library();
        let first = library.begin_turn(id, "Quiz me").unwrap();
        library.finish_turn(&first, Ok(QUIZ_REPLY.into())).unwrap();
        assert!(matches!(
            library.begin_turn(id, "Another quiz"),
            Err(LibraryError::TurnInProgress)
        ));

        library.reveal_quiz(id, first.message_id).unwrap();
        let second = library.begin_turn(id, "Another quiz").unwrap();
        library.finish_turn(&second, Ok("Sure.".into())).unwrap();
        let doc = library.get(id).unwrap();
        assert!(doc.chat_history.iter().all(|m| !m.pending));
    }

    #[test]
    fn abandoned_turn_is_closed_with_an_apology() {
        let (mut library, id) = ready_library();
        let ticket = library.begin_turn(id, "hi").unwrap();
        assert!(library.append_chunk(id, ticket.message_id, "Half an ans"));
        assert!(library.abandon_turn(id, ticket.message_id));

        let last = library.get(id).unwrap().chat_history.last().unwrap().clone();
        assert!(!last.pending);
        assert_eq!(last.text, prompts::CHAT_ERROR_APOLOGY);
        assert!(!library.abandon_turn(id, ticket.message_id));
        assert!(library.begin_turn(id, "again").is_ok());
    }

    #[test]
    fn abandoning_during_the_reveal_drops_the_held_quiz() {
        let (mut library, id) = ready_library();
        let ticket = library.begin_turn(id, "Quiz me").unwrap();
        library.finish_turn(&ticket, Ok(QUIZ_REPLY.into())).unwrap();
        assert!(library.abandon_turn(id, ticket.message_id));
        assert!(matches!(
            library.reveal_quiz(id, ticket.message_id),
            Err(LibraryError::NoQuiz)
        ));
        assert!(!library.get(id).unwrap().is_turn_in_flight());
    }
}
