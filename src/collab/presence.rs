//! Participant presence.
//!
//! Every connection may publish a presence state. The participant list is
//! recomputed from all registered states whenever one changes, and each
//! connection receives its own view with itself marked.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier the server assigns to every connection
pub type ConnectionId = u64;

pub const DEFAULT_NAME: &str = "Anonymous";
pub const SELF_LABEL: &str = "Me";

/// Cursor colors, the first doubles as the fallback
pub const PALETTE: [&str; 10] = [
    "#e06c75", "#61afef", "#98c379", "#c678dd", "#e5c07b", "#56b6c2", "#be5046", "#d19a66",
    "#7ec8e3", "#c3a6ff",
];

/// Presence as published by a client; every field may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// A connected participant with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub client_id: String,
    pub display_name: String,
    pub color: String,
}

impl Participant {
    pub fn from_state(connection: ConnectionId, state: &PresenceState) -> Self {
        Self {
            client_id: state
                .id
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("client-{connection}")),
            display_name: state
                .name
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_NAME.to_string()),
            color: state
                .color
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| PALETTE[0].to_string()),
        }
    }
}

/// A participant as seen by one particular connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: String,
    pub name: String,
    pub color: String,
    pub display_name: String,
    pub is_self: bool,
}

/// Presence of every connection that published one
#[derive(Debug, Clone, Default)]
pub struct PresenceSet {
    participants: BTreeMap<ConnectionId, Participant>,
}

impl PresenceSet {
    pub fn set(&mut self, connection: ConnectionId, state: &PresenceState) {
        self.participants
            .insert(connection, Participant::from_state(connection, state));
    }

    pub fn remove(&mut self, connection: ConnectionId) {
        self.participants.remove(&connection);
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Participant list for `viewer`, ordered by connection.
    ///
    /// A participant is "self" when it is the viewer's own connection or
    /// shares the viewer's stable id (the same user in another tab).
    pub fn view_for(&self, viewer: ConnectionId) -> Vec<ParticipantView> {
        let viewer_id = self.participants.get(&viewer).map(|p| p.client_id.as_str());
        self.participants
            .iter()
            .map(|(connection, p)| {
                let is_self = *connection == viewer || viewer_id == Some(p.client_id.as_str());
                ParticipantView {
                    id: p.client_id.clone(),
                    name: p.display_name.clone(),
                    color: p.color.clone(),
                    display_name: if is_self {
                        SELF_LABEL.to_string()
                    } else {
                        p.display_name.clone()
                    },
                    is_self,
                }
            })
            .collect()
    }
}
