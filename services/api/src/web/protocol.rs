//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for a document's chat.

use serde::{Deserialize, Serialize};
use study_companion_core::TurnOutcome;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sends a user message (typed, or a clicked preset question).
    Send { text: String },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// How a finished turn should be presented.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Answered,
    Failed,
    QuizMalformed,
    QuizPending,
}

impl From<&TurnOutcome> for TurnStatus {
    fn from(outcome: &TurnOutcome) -> Self {
        match outcome {
            TurnOutcome::Answered => TurnStatus::Answered,
            TurnOutcome::Failed => TurnStatus::Failed,
            TurnOutcome::QuizMalformed => TurnStatus::QuizMalformed,
            TurnOutcome::QuizPending { .. } => TurnStatus::QuizPending,
        }
    }
}

/// Streaming updates are keyed by the id of the bot message they modify.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The user message was accepted and a pending bot message was created.
    TurnStarted {
        user_message_id: u64,
        message_id: u64,
    },

    /// A piece of the reply, to be appended to the pending message.
    Chunk { message_id: u64, text: String },

    /// The final text of the bot message.
    TurnFinished {
        message_id: u64,
        status: TurnStatus,
        text: String,
    },

    /// The held-back quiz is now available through the quiz endpoints.
    QuizReady {
        message_id: u64,
        title: String,
        questions: usize,
        text: String,
    },

    /// The intent was rejected; the transcript is unchanged.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_send_is_tagged() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"send","text":"Explain **osmosis**"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Send {
                text: "Explain **osmosis**".into()
            }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"init"}"#).is_err());
    }

    #[test]
    fn server_messages_serialize_with_snake_case_tags() {
        let json = serde_json::to_value(ServerMessage::TurnFinished {
            message_id: 3,
            status: TurnStatus::QuizMalformed,
            text: "sorry".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "turn_finished");
        assert_eq!(json["status"], "quiz_malformed");
        assert_eq!(json["message_id"], 3);

        let json = serde_json::to_value(ServerMessage::Chunk {
            message_id: 1,
            text: "Hi".into(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "chunk", "message_id": 1, "text": "Hi"}));
    }
}
