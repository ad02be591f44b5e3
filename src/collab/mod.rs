//! Real-time collaborative editing of content files.
//!
//! A session per document name holds the shared document, hydrated once from
//! the markdown file on disk, plus presence for every attached connection.
//! Save notices travel between clients as stateless messages.

pub mod document;
pub mod hydrate;
pub mod manager;
pub mod markdown;
pub mod name;
pub mod presence;
pub mod protocol;
pub mod session;

use thiserror::Error;

pub use document::{DocumentError, SharedDocument};
pub use hydrate::{hydrate, HydrationError, HydrationOutcome};
pub use manager::{Connection, SessionManager, SessionSummary};
pub use markdown::{CommonMarkConverter, MarkdownConverter, StructuredDoc};
pub use name::{DocumentAccess, DocumentName};
pub use presence::{ParticipantView, PresenceState};
pub use protocol::{ClientMessage, Outbound, ServerMessage, SAVED_EVENT};
pub use session::{SessionSnapshot, SessionState};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid document name '{0}'")]
    InvalidDocumentName(String),

    #[error("document '{0}' is outside the served repositories")]
    AccessDenied(String),
}
