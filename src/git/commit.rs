//! Commit, rebase and push pipeline.
//!
//! Stages only eligible content files, commits them with a fixed message,
//! rebases onto the remote in fleet mode and pushes. Each repository runs
//! under its sync lock and a failure in one never stops the others.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::cli::{is_missing_push_destination, ChangeStatus, GitCli, PushTarget};
use super::runner::CommandError;
use super::sync::SyncRecord;
use crate::content::{resolve_title, ContentKind, ContentLayout};
use crate::repos::{Mode, RegistryError, RepoRegistry, Repository};

/// Shown with local-mode commit results
pub const LOCAL_MODE_ADVISORY: &str =
    "In local mode, commit from your terminal to avoid conflicts with your working tree.";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Status failed for {repository}")]
    Status {
        repository: String,
        #[source]
        source: CommandError,
    },

    #[error("Staging failed for {repository}")]
    Stage {
        repository: String,
        #[source]
        source: CommandError,
    },

    #[error("Commit failed for {repository}")]
    Commit {
        repository: String,
        #[source]
        source: CommandError,
    },

    #[error("Rebase failed for {repository}")]
    Rebase {
        repository: String,
        #[source]
        source: CommandError,
    },

    #[error("Push failed for {repository}")]
    Push {
        repository: String,
        #[source]
        source: CommandError,
    },
}

/// What happened in one repository
#[derive(Debug)]
pub struct CommitOutcome {
    pub repository: String,
    pub committed: bool,
    pub rebased: bool,
    pub pushed: bool,
    pub error: Option<PipelineError>,
}

impl CommitOutcome {
    fn new(repository: &Repository) -> Self {
        Self {
            repository: repository.display_name(),
            committed: false,
            rebased: false,
            pushed: false,
            error: None,
        }
    }

    fn failed(mut self, error: PipelineError) -> Self {
        warn!(repository = %self.repository, error = %error, detail = ?error, "Commit pipeline step failed");
        self.error = Some(error);
        self
    }
}

/// Aggregate result shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitSummary {
    /// Short error messages, one per failed repository
    Failed(Vec<String>),
    NothingToCommit,
    Committed { repositories: usize, pushed: bool },
}

impl fmt::Display for CommitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(messages) => write!(f, "{}", messages.join("; ")),
            Self::NothingToCommit => write!(f, "No changes to commit"),
            Self::Committed {
                repositories,
                pushed,
            } => {
                let noun = if *repositories == 1 {
                    "repository"
                } else {
                    "repositories"
                };
                let verb = if *pushed {
                    "Committed and pushed"
                } else {
                    "Committed"
                };
                write!(f, "{verb} in {repositories} {noun}")
            }
        }
    }
}

/// Outcomes of one pipeline run
#[derive(Debug)]
pub struct CommitReport {
    pub local_mode: bool,
    pub outcomes: Vec<CommitOutcome>,
}

impl CommitReport {
    pub fn committed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.committed).count()
    }

    /// Repositories that gained a commit or pushed one left over from before
    fn published_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.committed || o.pushed)
            .count()
    }

    pub fn summary(&self) -> CommitSummary {
        let errors: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| o.error.as_ref().map(ToString::to_string))
            .collect();
        if !errors.is_empty() {
            return CommitSummary::Failed(errors);
        }

        let repositories = self.published_count();
        if repositories == 0 {
            return CommitSummary::NothingToCommit;
        }
        CommitSummary::Committed {
            repositories,
            pushed: self.outcomes.iter().any(|o| o.pushed),
        }
    }

    pub fn message(&self) -> String {
        self.summary().to_string()
    }

    /// Advisory for local mode, where commits skip the rebase step
    pub fn advisory(&self) -> Option<&'static str> {
        self.local_mode.then_some(LOCAL_MODE_ADVISORY)
    }
}

/// An eligible uncommitted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub repository: String,
    /// Repository-relative path
    pub path: String,
    pub title: String,
    pub kind: ContentKind,
    pub status: ChangeStatus,
}

pub struct CommitPipeline {
    git: GitCli,
    record: Arc<SyncRecord>,
    registry: Arc<RepoRegistry>,
    layout: ContentLayout,
    message: String,
}

impl CommitPipeline {
    pub fn new(
        git: GitCli,
        record: Arc<SyncRecord>,
        registry: Arc<RepoRegistry>,
        layout: ContentLayout,
        message: impl Into<String>,
    ) -> Self {
        Self {
            git,
            record,
            registry,
            layout,
            message: message.into(),
        }
    }

    pub fn layout(&self) -> &ContentLayout {
        &self.layout
    }

    /// Commit and push eligible changes in every selected repository
    #[instrument(skip(self))]
    pub async fn commit_and_push(&self, filter: Option<&str>) -> Result<CommitReport, RegistryError> {
        let repos = self.registry.select(filter)?;
        let mut outcomes = Vec::with_capacity(repos.len());

        for repo in &repos {
            if !self.has_content_dir(repo) {
                debug!(repository = %repo.identifier, "No content directory, skipping");
                continue;
            }
            let _guard = self.record.lock(&repo.identifier).await;
            outcomes.push(self.process(repo).await);
        }

        let report = CommitReport {
            local_mode: self.registry.is_local(),
            outcomes,
        };
        info!(summary = %report.message(), "Commit pipeline finished");
        Ok(report)
    }

    fn has_content_dir(&self, repo: &Repository) -> bool {
        repo.local_path.join(self.layout.dir()).is_dir()
    }

    async fn eligible_changes(&self, path: &Path) -> Result<Vec<(String, ChangeStatus)>, CommandError> {
        let entries = self.git.status(path, self.layout.dir()).await?;
        Ok(entries
            .into_iter()
            .filter(|e| self.layout.is_eligible(&e.path))
            .map(|e| (e.path, e.status))
            .collect())
    }

    async fn process(&self, repo: &Repository) -> CommitOutcome {
        let mut outcome = CommitOutcome::new(repo);
        let name = outcome.repository.clone();
        let path = repo.local_path.as_path();

        let eligible: Vec<String> = match self.eligible_changes(path).await {
            Ok(changes) => changes.into_iter().map(|(p, _)| p).collect(),
            Err(source) => {
                return outcome.failed(PipelineError::Status {
                    repository: name,
                    source,
                })
            }
        };
        let staged = if eligible.is_empty() {
            Vec::new()
        } else {
            match self.stage(path, &eligible).await {
                Ok(staged) => staged,
                Err(source) => {
                    return outcome.failed(PipelineError::Stage {
                        repository: name,
                        source,
                    })
                }
            }
        };

        if staged.is_empty() {
            // Commits left by an earlier run whose rebase or push failed
            if repo.mode == Mode::Fleet && self.has_unpushed(path).await {
                info!(repository = %name, "Pushing commits left by an earlier run");
                return self.publish(repo.mode, path, outcome).await;
            }
            return outcome;
        }

        if let Err(source) = self.git.commit_paths(path, &self.message, &staged).await {
            return outcome.failed(PipelineError::Commit {
                repository: name,
                source,
            });
        }
        outcome.committed = true;
        info!(repository = %name, files = staged.len(), "Committed content changes");

        self.publish(repo.mode, path, outcome).await
    }

    /// Rebase (fleet) and push whatever HEAD holds
    async fn publish(&self, mode: Mode, path: &Path, mut outcome: CommitOutcome) -> CommitOutcome {
        let name = outcome.repository.clone();
        match mode {
            Mode::Fleet => {
                if let Err(source) = self.rebase(path).await {
                    return outcome.failed(PipelineError::Rebase {
                        repository: name,
                        source,
                    });
                }
                outcome.rebased = true;

                if let Err(source) = self.git.push(path, PushTarget::OriginHead).await {
                    return outcome.failed(PipelineError::Push {
                        repository: name,
                        source,
                    });
                }
                outcome.pushed = true;
            }
            Mode::Local => match self.push_local(path).await {
                Ok(pushed) => outcome.pushed = pushed,
                Err(source) => {
                    return outcome.failed(PipelineError::Push {
                        repository: name,
                        source,
                    })
                }
            },
        }

        outcome
    }

    async fn has_unpushed(&self, path: &Path) -> bool {
        match self.git.commits_ahead(path).await {
            Ok(ahead) => ahead > 0,
            Err(e) => {
                debug!(error = %e, "Could not compare with upstream");
                false
            }
        }
    }

    async fn stage(&self, path: &Path, eligible: &[String]) -> Result<Vec<String>, CommandError> {
        self.git.add_paths(path, eligible).await?;
        self.git.staged_paths(path, eligible).await
    }

    /// Rebase onto the remote branch, aborting on failure
    async fn rebase(&self, path: &Path) -> Result<(), CommandError> {
        let branch = self.git.current_branch(path).await?;
        if let Err(e) = self.git.pull_rebase(path, &branch).await {
            if let Err(abort) = self.git.rebase_abort(path).await {
                debug!(error = %abort, "rebase --abort failed");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Push in local mode. Returns false when there is nowhere to push to.
    async fn push_local(&self, path: &Path) -> Result<bool, CommandError> {
        if self.git.remotes(path).await?.is_empty() {
            debug!("No remote configured, keeping commit local");
            return Ok(false);
        }
        match self.git.push(path, PushTarget::Upstream).await {
            Ok(()) => Ok(true),
            Err(e) if is_missing_push_destination(&e) => {
                debug!(error = %e, "No push destination, keeping commit local");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Eligible uncommitted files, with display titles
    pub async fn pending_changes(&self, filter: Option<&str>) -> Result<Vec<ChangedFile>, RegistryError> {
        let repos = self.registry.select(filter)?;
        let mut files = Vec::new();

        for repo in &repos {
            if !self.has_content_dir(repo) {
                continue;
            }
            let changes = {
                let _guard = self.record.lock(&repo.identifier).await;
                self.eligible_changes(&repo.local_path).await
            };
            let changes = match changes {
                Ok(changes) => changes,
                Err(e) => {
                    warn!(repository = %repo.identifier, error = %e, "Could not read git status");
                    continue;
                }
            };

            let repository = repo.display_name();
            files.extend(changes.into_iter().map(|(path, status)| {
                let kind = self.layout.kind_of(&path);
                ChangedFile {
                    repository: repository.clone(),
                    title: resolve_title(&repo.local_path, &path, kind),
                    path,
                    kind,
                    status,
                }
            }));
        }

        Ok(files)
    }
}
