//! First-sync engine for fleet clones.
//!
//! Each repository is fetched (or cloned) and hard-reset to its remote branch
//! at most once per [`SyncRecord`]. Later calls are no-ops so edits made
//! through the UI are never discarded by a background refresh.

use futures_util::future::join_all;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use super::cli::GitCli;
use super::runner::CommandError;
use crate::repos::{RegistryError, RepoRegistry, Repository};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Clone failed for {repository}")]
    CloneFailure {
        repository: String,
        #[source]
        source: CommandError,
    },

    #[error("Fetch failed for {repository}")]
    FetchFailure {
        repository: String,
        #[source]
        source: CommandError,
    },

    #[error("Reset failed for {repository}")]
    ResetFailure {
        repository: String,
        #[source]
        source: CommandError,
    },

    #[error("Clone of {repository} is corrupt")]
    CorruptClone {
        repository: String,
        #[source]
        source: CommandError,
    },

    #[error("Could not remove {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of a sync request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local mode never syncs
    LocalMode,
    /// An earlier attempt in this process already ran
    AlreadySynced,
    Cloned,
    Refreshed { branch: String },
    /// The clone was corrupt and has been replaced
    Recloned,
    /// The refresh failed; the existing clone is served as-is
    Stale { reason: String },
}

impl SyncOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::LocalMode => "local",
            Self::AlreadySynced => "synced",
            Self::Cloned => "cloned",
            Self::Refreshed { .. } => "refreshed",
            Self::Recloned => "recloned",
            Self::Stale { .. } => "stale",
        }
    }
}

/// Per-repository sync bookkeeping
#[derive(Debug, Default)]
pub struct RepoSyncState {
    attempted: bool,
}

impl RepoSyncState {
    pub fn attempted(&self) -> bool {
        self.attempted
    }
}

/// Which repositories have been synced, plus a lock per repository.
///
/// The same lock serializes commit pipeline runs, so no two sync or commit
/// sequences for one repository ever overlap.
#[derive(Debug, Default)]
pub struct SyncRecord {
    entries: Mutex<HashMap<String, Arc<Mutex<RepoSyncState>>>>,
}

impl SyncRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the lock for a repository and acquire it
    pub async fn lock(&self, identifier: &str) -> OwnedMutexGuard<RepoSyncState> {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(identifier.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(RepoSyncState::default())))
                .clone()
        };
        entry.lock_owned().await
    }

    pub async fn is_synced(&self, identifier: &str) -> bool {
        self.lock(identifier).await.attempted
    }
}

/// Fetches, clones and resets fleet repositories
pub struct SyncEngine {
    git: GitCli,
    record: Arc<SyncRecord>,
    registry: Arc<RepoRegistry>,
}

impl SyncEngine {
    pub fn new(git: GitCli, record: Arc<SyncRecord>, registry: Arc<RepoRegistry>) -> Self {
        Self {
            git,
            record,
            registry,
        }
    }

    pub fn record(&self) -> &Arc<SyncRecord> {
        &self.record
    }

    pub fn registry(&self) -> &Arc<RepoRegistry> {
        &self.registry
    }

    /// Make sure a repository has been synced once in this process.
    ///
    /// The repository is marked attempted whatever the result, so a failed
    /// clone is not retried on every request.
    #[instrument(skip_all, fields(repository = %repo.identifier))]
    pub async fn ensure_synced(&self, repo: &Repository) -> Result<SyncOutcome, SyncError> {
        let Some(slug) = repo.slug.as_ref() else {
            return Ok(SyncOutcome::LocalMode);
        };

        let mut state = self.record.lock(&repo.identifier).await;
        if state.attempted {
            return Ok(SyncOutcome::AlreadySynced);
        }

        let url = self.registry.remote_url(slug);
        let result = self.sync_locked(repo, &url).await;
        state.attempted = true;

        match &result {
            Ok(outcome) => info!(outcome = outcome.label(), "Repository synced"),
            Err(e) => warn!(error = %e, detail = ?e, "Repository sync failed"),
        }
        result
    }

    async fn sync_locked(&self, repo: &Repository, url: &str) -> Result<SyncOutcome, SyncError> {
        let path = &repo.local_path;

        if !repo.has_clone() {
            self.clone_into(repo, url, path).await?;
            return Ok(SyncOutcome::Cloned);
        }

        match self.refresh(repo, path).await {
            Ok(branch) => Ok(SyncOutcome::Refreshed { branch }),
            Err(SyncError::CorruptClone { source, .. }) => {
                warn!(error = %source, "Clone is corrupt, cloning again");
                tokio::fs::remove_dir_all(path)
                    .await
                    .map_err(|source| SyncError::Io {
                        path: path.display().to_string(),
                        source,
                    })?;
                self.clone_into(repo, url, path).await?;
                Ok(SyncOutcome::Recloned)
            }
            Err(e) => {
                warn!(error = %e, detail = ?e, "Serving existing clone without refresh");
                Ok(SyncOutcome::Stale {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn clone_into(&self, repo: &Repository, url: &str, path: &Path) -> Result<(), SyncError> {
        debug!(path = %path.display(), "Cloning repository");
        self.git
            .clone_shallow(url, path)
            .await
            .map_err(|source| SyncError::CloneFailure {
                repository: repo.identifier.clone(),
                source,
            })
    }

    /// fetch, resolve the branch, then let the remote win
    async fn refresh(&self, repo: &Repository, path: &Path) -> Result<String, SyncError> {
        self.git
            .fetch(path, "origin")
            .await
            .map_err(|e| classify(repo, Step::Fetch, e))?;
        let branch = self
            .git
            .current_branch(path)
            .await
            .map_err(|e| classify(repo, Step::Reset, e))?;
        self.git
            .reset_hard(path, &format!("origin/{branch}"))
            .await
            .map_err(|e| classify(repo, Step::Reset, e))?;
        Ok(branch)
    }

    /// Sync every configured repository concurrently, in registry order
    pub async fn sync_all(
        &self,
    ) -> Result<Vec<(Repository, Result<SyncOutcome, SyncError>)>, RegistryError> {
        let repos = self.registry.list_repositories()?;
        let results = join_all(repos.iter().map(|repo| self.ensure_synced(repo))).await;
        Ok(repos.into_iter().zip(results).collect())
    }

    /// Repositories that can be served right now.
    ///
    /// Fleet repositories are synced first. One whose sync failed is still
    /// listed if a clone exists on disk; one that was never cloned is not.
    pub async fn list_available(&self) -> Result<Vec<Repository>, RegistryError> {
        if self.registry.is_local() {
            return Ok(vec![self.registry.local_repository()?]);
        }

        Ok(self
            .sync_all()
            .await?
            .into_iter()
            .filter_map(|(repo, _)| repo.has_clone().then_some(repo))
            .collect())
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Fetch,
    Reset,
}

fn classify(repo: &Repository, step: Step, source: CommandError) -> SyncError {
    let repository = repo.identifier.clone();
    if source.is_not_a_repository() {
        return SyncError::CorruptClone { repository, source };
    }
    match step {
        Step::Fetch => SyncError::FetchFailure { repository, source },
        Step::Reset => SyncError::ResetFailure { repository, source },
    }
}
