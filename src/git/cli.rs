//! Git CLI wrapper for the sync and commit pipelines.
//!
//! Uses the git CLI directly (rather than libgit2) so hooks, credential
//! helpers and the user's own git configuration keep working.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use super::runner::{CommandError, CommandRequest, CommandRunner};
use crate::config::GitConfig;

/// Timeouts applied per operation class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GitTimeouts {
    /// status, add, commit, rev-parse
    pub local: Duration,
    /// fetch, pull, push
    pub network: Duration,
    pub clone: Duration,
}

impl GitTimeouts {
    pub fn from_config(config: &GitConfig) -> Self {
        Self {
            local: Duration::from_secs(config.local_timeout_secs),
            network: Duration::from_secs(config.network_timeout_secs),
            clone: Duration::from_secs(config.clone_timeout_secs),
        }
    }
}

impl Default for GitTimeouts {
    fn default() -> Self {
        Self::from_config(&GitConfig::default())
    }
}

/// Committer identity passed with `-c` so repositories need no local config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl GitIdentity {
    pub fn from_config(config: &GitConfig) -> Self {
        Self {
            name: config.author_name.clone(),
            email: config.author_email.clone(),
        }
    }

    fn config_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(name) = &self.name {
            args.push("-c".to_string());
            args.push(format!("user.name={name}"));
        }
        if let Some(email) = &self.email {
            args.push("-c".to_string());
            args.push(format!("user.email={email}"));
        }
        args
    }
}

/// How a changed path differs from HEAD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    New,
    Modified,
}

impl ChangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Modified => "modified",
        }
    }
}

/// One entry of `git status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub status: ChangeStatus,
}

/// Parse `git status --porcelain=v1 -z` output.
///
/// Untracked and added paths are new; everything else, deletions included,
/// counts as modified. Rename and copy records carry a second path (the
/// source) which is skipped.
pub fn parse_porcelain_z(output: &str) -> Vec<StatusEntry> {
    let mut entries = Vec::new();
    let mut records = output.split('\0').filter(|r| !r.is_empty());

    while let Some(record) = records.next() {
        if record.len() < 4 {
            continue;
        }
        let (code, path) = record.split_at(3);
        let code = code.trim_end();
        let x = code.chars().next().unwrap_or(' ');

        if x == 'R' || x == 'C' {
            records.next();
        }

        let status = if code == "??" || x == 'A' {
            ChangeStatus::New
        } else {
            ChangeStatus::Modified
        };
        entries.push(StatusEntry {
            path: path.to_string(),
            status,
        });
    }

    entries
}

/// Which branch a push targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTarget {
    /// `git push`, relying on the configured upstream
    Upstream,
    /// `git push origin HEAD`
    OriginHead,
}

/// Git command wrapper bound to a runner
#[derive(Clone)]
pub struct GitCli {
    runner: Arc<dyn CommandRunner>,
    timeouts: GitTimeouts,
    identity: GitIdentity,
}

impl GitCli {
    pub fn new(runner: Arc<dyn CommandRunner>, timeouts: GitTimeouts, identity: GitIdentity) -> Self {
        Self {
            runner,
            timeouts,
            identity,
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &GitConfig) -> Self {
        Self::new(runner, GitTimeouts::from_config(config), GitIdentity::from_config(config))
    }

    pub fn timeouts(&self) -> GitTimeouts {
        self.timeouts
    }

    /// Execute a git command and return its raw stdout
    async fn run_raw(&self, args: &[&str], cwd: &Path, timeout: Duration) -> Result<String, CommandError> {
        let mut request = CommandRequest::new("git", cwd, timeout)
            .args(self.identity.config_args())
            .args(args.iter().copied())
            .env("GIT_TERMINAL_PROMPT", "0");
        // A broken `.git` must not make git fall back to an enclosing repository
        if let Some(parent) = cwd.parent().filter(|p| p.is_absolute()) {
            request = request.env("GIT_CEILING_DIRECTORIES", parent.to_string_lossy());
        }
        Ok(self.runner.run(request).await?.stdout)
    }

    /// Execute a git command and return trimmed stdout
    async fn run_git(&self, args: &[&str], cwd: &Path, timeout: Duration) -> Result<String, CommandError> {
        Ok(self.run_raw(args, cwd, timeout).await?.trim().to_string())
    }

    /// Shallow clone into `dest`, creating its parent directory first
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub async fn clone_shallow(&self, url: &str, dest: &Path) -> Result<(), CommandError> {
        let parent = dest.parent().unwrap_or(dest);
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| CommandError::Spawn {
                command: format!("mkdir {}", parent.display()),
                source,
            })?;
        let dest_str = dest.to_string_lossy();
        self.run_git(
            &["clone", "--depth", "1", url, &dest_str],
            parent,
            self.timeouts.clone,
        )
        .await?;
        Ok(())
    }

    /// Fetch from remote
    #[instrument(skip_all, fields(path = %path.display(), remote))]
    pub async fn fetch(&self, path: &Path, remote: &str) -> Result<(), CommandError> {
        self.run_git(&["fetch", remote], path, self.timeouts.network).await?;
        Ok(())
    }

    /// Get the current branch name
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn current_branch(&self, path: &Path) -> Result<String, CommandError> {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"], path, self.timeouts.local)
            .await
    }

    /// Get the HEAD commit SHA
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn head_commit(&self, path: &Path) -> Result<String, CommandError> {
        self.run_git(&["rev-parse", "HEAD"], path, self.timeouts.local).await
    }

    /// Reset the working tree and index to `target`, discarding local edits
    #[instrument(skip_all, fields(path = %path.display(), target))]
    pub async fn reset_hard(&self, path: &Path, target: &str) -> Result<(), CommandError> {
        self.run_git(&["reset", "--hard", target], path, self.timeouts.local)
            .await?;
        Ok(())
    }

    /// Changed and untracked files under `pathspec`
    #[instrument(skip_all, fields(path = %path.display(), pathspec))]
    pub async fn status(&self, path: &Path, pathspec: &str) -> Result<Vec<StatusEntry>, CommandError> {
        let output = self
            .run_raw(
                &["status", "--porcelain=v1", "-z", "--untracked-files=all", "--", pathspec],
                path,
                self.timeouts.local,
            )
            .await?;
        Ok(parse_porcelain_z(&output))
    }

    /// Stage exactly `paths`, including deletions
    #[instrument(skip_all, fields(path = %path.display(), count = paths.len()))]
    pub async fn add_paths(&self, path: &Path, paths: &[String]) -> Result<(), CommandError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "-A", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_git(&args, path, self.timeouts.local).await?;
        Ok(())
    }

    /// Which of `paths` differ between the index and HEAD
    #[instrument(skip_all, fields(path = %path.display(), count = paths.len()))]
    pub async fn staged_paths(&self, path: &Path, paths: &[String]) -> Result<Vec<String>, CommandError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["diff", "--cached", "--name-only", "-z", "--"];
        args.extend(paths.iter().map(String::as_str));
        let output = self.run_raw(&args, path, self.timeouts.local).await?;
        Ok(output
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Commit only `paths`, leaving anything else in the index untouched
    #[instrument(skip_all, fields(path = %path.display(), count = paths.len()))]
    pub async fn commit_paths(&self, path: &Path, message: &str, paths: &[String]) -> Result<(), CommandError> {
        let mut args = vec!["commit", "-m", message, "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run_git(&args, path, self.timeouts.local).await?;
        Ok(())
    }

    /// Rebase local commits onto the remote branch
    #[instrument(skip_all, fields(path = %path.display(), branch))]
    pub async fn pull_rebase(&self, path: &Path, branch: &str) -> Result<(), CommandError> {
        self.run_git(
            &["pull", "--rebase", "--autostash", "origin", branch],
            path,
            self.timeouts.network,
        )
        .await?;
        Ok(())
    }

    /// Abandon an in-progress rebase
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn rebase_abort(&self, path: &Path) -> Result<(), CommandError> {
        self.run_git(&["rebase", "--abort"], path, self.timeouts.local)
            .await?;
        Ok(())
    }

    /// Push the current branch
    #[instrument(skip_all, fields(path = %path.display(), push_target = ?target))]
    pub async fn push(&self, path: &Path, target: PushTarget) -> Result<(), CommandError> {
        let args: &[&str] = match target {
            PushTarget::Upstream => &["push"],
            PushTarget::OriginHead => &["push", "origin", "HEAD"],
        };
        self.run_git(args, path, self.timeouts.network).await?;
        Ok(())
    }

    /// Names of configured remotes
    /// Commits on HEAD that its upstream branch does not have
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn commits_ahead(&self, path: &Path) -> Result<usize, CommandError> {
        let output = self
            .run_git(&["rev-list", "--count", "@{upstream}..HEAD"], path, self.timeouts.local)
            .await?;
        Ok(output.trim().parse().unwrap_or(0))
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn remotes(&self, path: &Path) -> Result<Vec<String>, CommandError> {
        let output = self.run_git(&["remote"], path, self.timeouts.local).await?;
        Ok(output.lines().map(str::to_string).collect())
    }
}

/// Whether a push failure just means there is nowhere to push to
pub fn is_missing_push_destination(err: &CommandError) -> bool {
    let stderr = err.stderr();
    stderr.contains("No configured push destination")
        || stderr.contains("has no upstream branch")
        || stderr.contains("no upstream configured")
}
