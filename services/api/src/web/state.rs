//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use std::sync::Arc;
use study_companion_core::{ports::ChatService, DocumentEvent, DocumentProcessor, Library};
use tokio::sync::{mpsc, Mutex};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The single owner of every document; handlers only dispatch intents to it.
    pub library: Arc<Mutex<Library>>,
    pub processor: DocumentProcessor,
    pub chat: Arc<dyn ChatService>,
    /// Processing results flow through here to the task that applies them.
    pub events: mpsc::UnboundedSender<DocumentEvent>,
    pub config: Arc<Config>,
}
