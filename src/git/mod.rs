//! Git operations - sync engine, commit pipeline and CLI wrapper.
//!
//! All repository access shells out to the git binary through a
//! [`CommandRunner`]:
//! - First-sync per repository, serialized with a per-repository lock
//! - Commit/rebase/push of eligible content files only

pub mod cli;
pub mod commit;
pub mod runner;
pub mod sync;

pub use cli::{ChangeStatus, GitCli, GitIdentity, GitTimeouts};
pub use commit::{ChangedFile, CommitOutcome, CommitPipeline, CommitReport, CommitSummary, PipelineError};
pub use runner::{CommandError, CommandOutput, CommandRequest, CommandRunner, SystemCommandRunner};
pub use sync::{SyncEngine, SyncError, SyncOutcome, SyncRecord};
