//! One collaboration session per document.
//!
//! Each session is a task that owns the shared document, the presence set and
//! the outbound channel of every attached connection. All mutations arrive as
//! [`SessionEvent`]s on a single channel, so no locking is needed around the
//! document itself.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::document::SharedDocument;
use super::hydrate::{hydrate, HydrationOutcome};
use super::manager::SessionRegistry;
use super::markdown::MarkdownConverter;
use super::name::DocumentName;
use super::presence::{ConnectionId, Participant, PresenceSet, PresenceState};
use super::protocol::{is_saved_notice, Outbound};

pub type OutboundSender = mpsc::Sender<Outbound>;

/// Input to a session task
#[derive(Debug)]
pub enum SessionEvent {
    Connect {
        connection: ConnectionId,
        presence: Option<PresenceState>,
        outbound: OutboundSender,
    },
    Disconnect {
        connection: ConnectionId,
    },
    Presence {
        connection: ConnectionId,
        state: PresenceState,
    },
    Update {
        connection: ConnectionId,
        update: Vec<u8>,
    },
    Stateless {
        connection: ConnectionId,
        payload: String,
    },
    Inspect {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Hydrating,
    Live,
    Closed,
}

/// Point-in-time view of a session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub document: String,
    pub state: SessionState,
    pub hydration: Option<HydrationOutcome>,
    pub participants: Vec<Participant>,
    pub connections: usize,
    /// XML rendering of the shared document
    pub content: String,
}

pub(crate) struct Session {
    id: u64,
    name: DocumentName,
    doc: SharedDocument,
    state: SessionState,
    hydration: Option<HydrationOutcome>,
    presence: PresenceSet,
    connections: BTreeMap<ConnectionId, OutboundSender>,
    converter: Arc<dyn MarkdownConverter>,
    registry: Arc<SessionRegistry>,
    unload_after: Duration,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        name: DocumentName,
        converter: Arc<dyn MarkdownConverter>,
        registry: Arc<SessionRegistry>,
        unload_after: Duration,
    ) -> Self {
        Self {
            id,
            name,
            doc: SharedDocument::new(),
            state: SessionState::Hydrating,
            hydration: None,
            presence: PresenceSet::default(),
            connections: BTreeMap::new(),
            converter,
            registry,
            unload_after,
        }
    }

    /// Hydrate, then serve events until the session has been idle for the
    /// unload delay
    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        self.hydration = Some(hydrate(&self.name, &self.doc, self.converter.as_ref()));
        self.state = SessionState::Live;

        loop {
            let event = if self.connections.is_empty() {
                tokio::select! {
                    event = events.recv() => event,
                    () = tokio::time::sleep(self.unload_after) => {
                        if self.registry.try_unload(self.name.as_str(), self.id) {
                            break;
                        }
                        continue;
                    }
                }
            } else {
                events.recv().await
            };

            match event {
                Some(event) => self.handle(event),
                None => break,
            }
        }

        self.state = SessionState::Closed;
        info!(document = %self.name, "Session unloaded");
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connect {
                connection,
                presence,
                outbound,
            } => {
                debug!(document = %self.name, connection, "Client connected");
                if !self.deliver(connection, &outbound, Outbound::Sync(self.doc.encode_state())) {
                    return;
                }
                self.connections.insert(connection, outbound);
                if let Some(state) = presence {
                    self.presence.set(connection, &state);
                }
                self.broadcast_presence();
            }
            SessionEvent::Disconnect { connection } => {
                debug!(document = %self.name, connection, "Client disconnected");
                self.forget([connection]);
            }
            SessionEvent::Presence { connection, state } => {
                if self.connections.contains_key(&connection) {
                    self.presence.set(connection, &state);
                    self.broadcast_presence();
                }
            }
            SessionEvent::Update { connection, update } => match self.doc.apply_update(&update) {
                Ok(()) => self.relay(connection, &Outbound::Update(update)),
                Err(e) => {
                    warn!(document = %self.name, connection, error = %e, "Rejected document update");
                    if let Some(tx) = self.connections.get(&connection) {
                        if !self.deliver(connection, tx, Outbound::Error(e.to_string())) {
                            self.forget([connection]);
                        }
                    }
                }
            },
            SessionEvent::Stateless {
                connection,
                payload,
            } => {
                if is_saved_notice(&payload) {
                    info!(document = %self.name, connection, "Document saved");
                }
                self.relay(connection, &Outbound::Stateless(payload));
            }
            SessionEvent::Inspect { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Queue a message without waiting. False when the connection is gone
    /// or its queue is full.
    fn deliver(&self, connection: ConnectionId, tx: &OutboundSender, message: Outbound) -> bool {
        match tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(document = %self.name, connection, "Client is not keeping up, dropping connection");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Send to every connection except the originator
    fn relay(&mut self, from: ConnectionId, message: &Outbound) {
        let failed: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(id, tx)| **id != from && !self.deliver(**id, tx, message.clone()))
            .map(|(id, _)| *id)
            .collect();
        self.forget(failed);
    }

    fn broadcast_presence(&mut self) {
        let failed: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(id, tx)| !self.deliver(**id, tx, Outbound::Presence(self.presence.view_for(**id))))
            .map(|(id, _)| *id)
            .collect();
        self.forget(failed);
    }

    /// Drop connections and tell the rest who is left. Dropping the sender
    /// ends the connection's stream.
    fn forget(&mut self, connections: impl IntoIterator<Item = ConnectionId>) {
        let mut changed = false;
        for connection in connections {
            changed |= self.connections.remove(&connection).is_some();
            self.presence.remove(connection);
        }
        if changed {
            self.broadcast_presence();
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            document: self.name.to_string(),
            state: self.state,
            hydration: self.hydration.clone(),
            participants: self.presence.participants().cloned().collect(),
            connections: self.connections.len(),
            content: self.doc.to_xml(),
        }
    }
}
