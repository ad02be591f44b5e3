//! Wire format of the collaboration socket.
//!
//! Binary frames carry yrs v1 updates in both directions; the first binary
//! frame a client receives is the full document state. Text frames carry
//! JSON control messages.

use serde::{Deserialize, Serialize};

use super::presence::{ParticipantView, PresenceState};

/// Stateless payload type clients send after writing a document to disk
pub const SAVED_EVENT: &str = "doc:saved";

/// Control message sent by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Presence {
        #[serde(default)]
        user: PresenceState,
    },
    Stateless {
        payload: String,
    },
}

/// Control message sent by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Presence { participants: Vec<ParticipantView> },
    Stateless { payload: String },
    Error { message: String },
}

/// Whether a stateless payload is a save notice
pub fn is_saved_notice(payload: &str) -> bool {
    #[derive(Deserialize)]
    struct Typed {
        #[serde(rename = "type")]
        kind: String,
    }
    serde_json::from_str::<Typed>(payload).is_ok_and(|t| t.kind == SAVED_EVENT)
}

/// What a session sends to one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Full document state, sent once on connect
    Sync(Vec<u8>),
    /// Incremental update from another connection
    Update(Vec<u8>),
    Presence(Vec<ParticipantView>),
    Stateless(String),
    /// A message from this connection was rejected
    Error(String),
}

impl Outbound {
    /// Text-frame representation, `None` for binary payloads
    pub fn to_server_message(&self) -> Option<ServerMessage> {
        match self {
            Self::Sync(_) | Self::Update(_) => None,
            Self::Presence(participants) => Some(ServerMessage::Presence {
                participants: participants.clone(),
            }),
            Self::Stateless(payload) => Some(ServerMessage::Stateless {
                payload: payload.clone(),
            }),
            Self::Error(message) => Some(ServerMessage::Error {
                message: message.clone(),
            }),
        }
    }
}
