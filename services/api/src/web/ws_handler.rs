//! services/api/src/web/ws_handler.rs
//!
//! This is the entry point and control loop for a document's chat WebSocket.
//! Each `send` runs as its own task; updates are forwarded to the socket in order.

use crate::web::{
    chat_task::chat_process,
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

/// The handler for upgrading HTTP requests to WebSocket connections.
#[utoipa::path(
    get,
    path = "/documents/{id}/chat",
    params(("id" = Uuid, Path, description = "The document to chat about.")),
    responses(
        (status = 101, description = "Switching to the chat WebSocket protocol"),
        (status = 404, description = "Document not found")
    )
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(document_id): Path<Uuid>,
    State(app_state): State<Arc<AppState>>,
) -> Result<Response, (StatusCode, String)> {
    if app_state.library.lock().await.get(document_id).is_err() {
        return Err((StatusCode::NOT_FOUND, "Document not found".to_string()));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app_state, document_id)))
}

async fn send_json(
    ws_sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>,
    message: &ServerMessage,
) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return true;
        }
    };
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_ok()
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, document_id: Uuid) {
    info!("New chat WebSocket connection for document {}", document_id);

    let (sender, mut receiver) = socket.split();
    let ws_sender = Arc::new(Mutex::new(sender));

    // --- 1. Forwarder: turn updates -> socket ---
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let forwarder = {
        let ws_sender = ws_sender.clone();
        tokio::spawn(async move {
            while let Some(message) = updates_rx.recv().await {
                if !send_json(&ws_sender, &message).await {
                    warn!("Client went away while updates were pending.");
                    break;
                }
            }
        })
    };

    // --- 2. Main Message Loop ---
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Send { text }) => {
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    let app_state = app_state.clone();
                    let updates = updates_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            chat_process(app_state, document_id, text, Some(updates.clone())).await
                        {
                            warn!("Chat turn rejected: {}", e);
                            let _ = updates.send(ServerMessage::Error {
                                message: e.to_string(),
                            });
                        }
                    });
                }
                Err(e) => {
                    warn!("Failed to deserialize client message: {}", e);
                    let _ = updates_tx.send(ServerMessage::Error {
                        message: format!("Invalid message: {}", e),
                    });
                }
            },
            Message::Close(_) => {
                info!("Client sent close message.");
                break;
            }
            _ => {}
        }
    }

    // --- 3. Cleanup ---
    // Turns already running keep writing into the library; only the socket goes away.
    drop(updates_tx);
    forwarder.abort();
    info!("Chat WebSocket for document {} closed.", document_id);
}
