//! Session registry and connection handles.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::markdown::{CommonMarkConverter, MarkdownConverter};
use super::name::{DocumentAccess, DocumentName};
use super::presence::{ConnectionId, PresenceState};
use super::protocol::Outbound;
use super::session::{Session, SessionEvent, SessionSnapshot};
use super::SessionError;

pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

struct SessionEntry {
    id: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
    connections: usize,
}

/// Live sessions by document name
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    next_session: AtomicU64,
}

impl SessionRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Remove an idle session. Fails if it gained a connection meanwhile or
    /// was already replaced by a newer instance.
    pub(crate) fn try_unload(&self, name: &str, id: u64) -> bool {
        let mut sessions = self.lock();
        match sessions.get(name) {
            Some(entry) if entry.id == id && entry.connections == 0 => {
                sessions.remove(name);
                true
            }
            Some(entry) if entry.id == id => false,
            // Replaced or gone; this instance has nothing left to serve
            _ => true,
        }
    }

    fn detach(&self, name: &str, id: u64) {
        if let Some(entry) = self.lock().get_mut(name) {
            if entry.id == id {
                entry.connections = entry.connections.saturating_sub(1);
            }
        }
    }
}

/// Summary row for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub document: String,
    pub connections: usize,
}

/// Creates sessions on demand and hands out connections to them
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    converter: Arc<dyn MarkdownConverter>,
    access: DocumentAccess,
    unload_after: Duration,
    outbound_buffer: usize,
    next_connection: AtomicU64,
}

impl SessionManager {
    pub fn new(access: DocumentAccess, unload_after: Duration) -> Self {
        Self::with_converter(Arc::new(CommonMarkConverter), access, unload_after)
    }

    pub fn with_converter(
        converter: Arc<dyn MarkdownConverter>,
        access: DocumentAccess,
        unload_after: Duration,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::default()),
            converter,
            access,
            unload_after,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            next_connection: AtomicU64::new(1),
        }
    }

    /// Per-connection queue size. A connection whose queue fills up is
    /// dropped by its session.
    pub fn with_outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity.max(1);
        self
    }

    /// Attach a new connection to the session for `document`, creating the
    /// session (and hydrating it) if none is live.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        &self,
        document: &str,
        presence: Option<PresenceState>,
    ) -> Result<Connection, SessionError> {
        let name = DocumentName::parse(document)?;
        self.access.check(&name)?;

        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_buffer);
        let mut event = SessionEvent::Connect {
            connection,
            presence,
            outbound: outbound_tx,
        };

        let mut sessions = self.registry.lock();
        loop {
            let entry = match sessions.entry(name.as_str().to_string()) {
                Entry::Occupied(slot) if !slot.get().events.is_closed() => slot.into_mut(),
                Entry::Occupied(mut slot) => {
                    slot.insert(self.spawn_session(&name));
                    slot.into_mut()
                }
                Entry::Vacant(slot) => slot.insert(self.spawn_session(&name)),
            };

            match entry.events.send(event) {
                Ok(()) => {
                    entry.connections += 1;
                    return Ok(Connection {
                        id: connection,
                        name,
                        session_id: entry.id,
                        events: entry.events.clone(),
                        outbound: outbound_rx,
                        registry: self.registry.clone(),
                    });
                }
                // The task exited between the check and the send; the next
                // pass sees the closed channel and starts a fresh session
                Err(mpsc::error::SendError(returned)) => event = returned,
            }
        }
    }

    fn spawn_session(&self, name: &DocumentName) -> SessionEntry {
        let id = self.registry.next_session.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Session::new(
            id,
            name.clone(),
            self.converter.clone(),
            self.registry.clone(),
            self.unload_after,
        );
        debug!(document = %name, session = id, "Starting session");
        tokio::spawn(session.run(events_rx));
        SessionEntry {
            id,
            events: events_tx,
            connections: 0,
        }
    }

    /// Names of live sessions, sorted
    pub fn session_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = self
            .registry
            .lock()
            .iter()
            .map(|(document, entry)| SessionSummary {
                document: document.clone(),
                connections: entry.connections,
            })
            .collect();
        rows.sort_by(|a, b| a.document.cmp(&b.document));
        rows
    }

    /// Snapshot of a live session
    pub async fn inspect(&self, document: &str) -> Option<SessionSnapshot> {
        let events = self.registry.lock().get(document)?.events.clone();
        let (reply, rx) = oneshot::channel();
        events.send(SessionEvent::Inspect { reply }).ok()?;
        rx.await.ok()
    }
}

/// A client's attachment to a session. Dropping it disconnects.
pub struct Connection {
    id: ConnectionId,
    name: DocumentName,
    session_id: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
    outbound: mpsc::Receiver<Outbound>,
    registry: Arc<SessionRegistry>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn document(&self) -> &DocumentName {
        &self.name
    }

    pub fn set_presence(&self, state: PresenceState) {
        self.send(SessionEvent::Presence {
            connection: self.id,
            state,
        });
    }

    pub fn send_update(&self, update: Vec<u8>) {
        self.send(SessionEvent::Update {
            connection: self.id,
            update,
        });
    }

    pub fn send_stateless(&self, payload: impl Into<String>) {
        self.send(SessionEvent::Stateless {
            connection: self.id,
            payload: payload.into(),
        });
    }

    /// Next message for this connection; `None` once the session is gone
    /// or has dropped this connection for falling behind
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    pub fn disconnect(self) {}

    fn send(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!(document = %self.name, connection = self.id, "Session already closed");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.registry.detach(self.name.as_str(), self.session_id);
        let _ = self.events.send(SessionEvent::Disconnect {
            connection: self.id,
        });
    }
}
