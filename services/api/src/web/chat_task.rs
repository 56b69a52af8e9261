//! services/api/src/web/chat_task.rs
//!
//! This module contains the asynchronous "worker" function responsible for
//! running a single chat turn against a document's session.

use crate::web::{
    protocol::{ServerMessage, TurnStatus},
    state::AppState,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use study_companion_core::{
    starts_like_quiz_block, ChatRequestError, Library, LibraryError, TurnOutcome, TurnTicket,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinError;
use tracing::{info, warn};
use uuid::Uuid;

/// Where progress updates for a turn are sent, if anyone is listening.
pub type TurnUpdates = Option<mpsc::UnboundedSender<ServerMessage>>;

fn notify(updates: &TurnUpdates, message: ServerMessage) {
    if let Some(tx) = updates {
        // The listener may have disconnected; the turn still completes in the library.
        let _ = tx.send(message);
    }
}

/// The final state of a completed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub message_id: u64,
    pub outcome: TurnOutcome,
    /// The bot message text once everything (including any quiz reveal) is applied.
    pub text: String,
}

/// Closes the turn in the library if `chat_process` is dropped before it finishes.
struct TurnGuard {
    library: Arc<Mutex<Library>>,
    document_id: Uuid,
    message_id: u64,
    armed: bool,
}

impl TurnGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (document_id, message_id) = (self.document_id, self.message_id);
        if let Ok(mut library) = self.library.try_lock() {
            library.abandon_turn(document_id, message_id);
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let library = self.library.clone();
            handle.spawn(async move {
                library.lock().await.abandon_turn(document_id, message_id);
            });
        }
    }
}

/// Runs `chat_process` on its own task and waits for it. Dropping the returned future
/// leaves the turn running to completion in the library.
pub async fn chat_process_detached(
    app_state: Arc<AppState>,
    document_id: Uuid,
    text: String,
    updates: TurnUpdates,
) -> Result<Result<TurnReport, LibraryError>, JoinError> {
    tokio::spawn(chat_process(app_state, document_id, text, updates)).await
}

/// Runs one chat turn: records the user message, streams the reply into the pending
/// bot message and, when the reply carries a quiz, reveals it after the configured delay.
pub async fn chat_process(
    app_state: Arc<AppState>,
    document_id: Uuid,
    text: String,
    updates: TurnUpdates,
) -> Result<TurnReport, LibraryError> {
    let start_time = Instant::now();
    let ticket = app_state
        .library
        .lock()
        .await
        .begin_turn(document_id, &text)?;
    let guard = TurnGuard {
        library: app_state.library.clone(),
        document_id,
        message_id: ticket.message_id,
        armed: true,
    };
    info!("Chat turn {} started on document {}.", ticket.message_id, document_id);
    notify(
        &updates,
        ServerMessage::TurnStarted {
            user_message_id: ticket.user_message_id,
            message_id: ticket.message_id,
        },
    );

    let result = tokio::select! {
        _ = ticket.cancellation_token.cancelled() => {
            info!("Document {} was removed during a chat turn.", document_id);
            return Err(LibraryError::DocumentNotFound(document_id));
        }
        result = stream_reply(&app_state, &ticket, &updates) => result,
    };

    let outcome = app_state
        .library
        .lock()
        .await
        .finish_turn(&ticket, result)
        .ok_or(LibraryError::DocumentNotFound(document_id))?;
    info!("⏱️ Chat turn took: {:?}", start_time.elapsed());

    let text = current_text(&app_state, &ticket).await?;
    notify(
        &updates,
        ServerMessage::TurnFinished {
            message_id: ticket.message_id,
            status: TurnStatus::from(&outcome),
            text: text.clone(),
        },
    );

    let TurnOutcome::QuizPending { title, questions } = &outcome else {
        guard.disarm();
        return Ok(TurnReport {
            message_id: ticket.message_id,
            outcome,
            text,
        });
    };

    let delay = app_state.config.quiz_reveal_delay;
    if !delay.is_zero() {
        tokio::select! {
            _ = ticket.cancellation_token.cancelled() => {
                return Err(LibraryError::DocumentNotFound(document_id));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    app_state
        .library
        .lock()
        .await
        .reveal_quiz(document_id, ticket.message_id)?;
    let text = current_text(&app_state, &ticket).await?;
    notify(
        &updates,
        ServerMessage::QuizReady {
            message_id: ticket.message_id,
            title: title.clone(),
            questions: *questions,
            text: text.clone(),
        },
    );

    guard.disarm();
    Ok(TurnReport {
        message_id: ticket.message_id,
        outcome,
        text,
    })
}

/// Streams the model's reply, mirroring each chunk into the pending message.
///
/// Text that may still open a `<quiz_data>` block is held back, so quiz payloads never
/// reach the transcript or the listener.
async fn stream_reply(
    app_state: &AppState,
    ticket: &TurnTicket,
    updates: &TurnUpdates,
) -> Result<String, ChatRequestError> {
    let mut stream = app_state
        .chat
        .send_message_streaming(&ticket.session, &ticket.user_text)
        .await?;

    let mut reply = String::new();
    let mut shown = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ChatRequestError::Stream(e.to_string()))?;
        reply.push_str(&chunk);
        if starts_like_quiz_block(&reply) {
            continue;
        }
        let unseen = reply[shown..].to_string();
        shown = reply.len();
        let applied = app_state
            .library
            .lock()
            .await
            .append_chunk(ticket.document_id, ticket.message_id, &unseen);
        if !applied {
            warn!("Pending message {} is gone; stopping the stream.", ticket.message_id);
            break;
        }
        notify(
            updates,
            ServerMessage::Chunk {
                message_id: ticket.message_id,
                text: unseen,
            },
        );
    }
    Ok(reply)
}

async fn current_text(app_state: &AppState, ticket: &TurnTicket) -> Result<String, LibraryError> {
    let library = app_state.library.lock().await;
    let document = library.get(ticket.document_id)?;
    Ok(document
        .chat_history
        .iter()
        .find(|m| m.id == ticket.message_id)
        .map(|m| m.text.clone())
        .unwrap_or_default())
}
