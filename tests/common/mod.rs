//! Shared fixtures for integration tests.
//!
//! Every fixture lives in its own temp directory: a bare `origin` under
//! `remotes/`, a seed working copy used to push "remote" commits, and the
//! clone root quire syncs into.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use quire::config::Config;
use quire::git::{CommandError, CommandOutput, CommandRequest, CommandRunner, SystemCommandRunner};
use quire::rest::ApiState;

pub const OWNER: &str = "test-org";
pub const REPO: &str = "test-repo";
pub const SLUG: &str = "test-org/test-repo";
pub const AUTHOR_NAME: &str = "Quire Test";
pub const AUTHOR_EMAIL: &str = "quire@example.com";

/// Skip the test when no git binary is on PATH
macro_rules! skip_if_no_git {
    () => {
        if which::which("git").is_err() {
            eprintln!("Skipping test: git not found on PATH");
            return;
        }
    };
}

/// Run git synchronously in `cwd`, panicking on failure
pub fn git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", &format!("user.name={AUTHOR_NAME}")])
        .args(["-c", &format!("user.email={AUTHOR_EMAIL}")])
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// A bare origin, a seed working copy and an empty clone root
pub struct GitFixture {
    pub temp: TempDir,
}

impl GitFixture {
    /// Origin seeded with one commit on `main` containing content files
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let fixture = Self { temp };

        let origin = fixture.origin();
        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "--bare", "--quiet"]);
        git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let seed = fixture.seed();
        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["checkout", "-q", "-b", "main"]);
        write(
            &seed.join(".quire/tasks/first-task.mdx"),
            "---\ntitle: First task\nstatus: todo\n---\n\nDo the thing\n",
        );
        write(&seed.join(".quire/docs/readme.md"), "# Readme\n\nHello\n");
        write(&seed.join("README.md"), "# test-repo\n");
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-q", "-m", "Initial commit"]);
        git(&seed, &["remote", "add", "origin", &origin.to_string_lossy()]);
        git(&seed, &["push", "-q", "origin", "main"]);

        fixture
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn remotes(&self) -> PathBuf {
        self.root().join("remotes")
    }

    pub fn origin(&self) -> PathBuf {
        self.remotes().join(OWNER).join(format!("{REPO}.git"))
    }

    pub fn seed(&self) -> PathBuf {
        self.root().join("seed")
    }

    pub fn clone_dir(&self) -> PathBuf {
        self.root().join("clones")
    }

    /// Where quire clones the fleet repository
    pub fn clone_path(&self) -> PathBuf {
        self.clone_dir().join(OWNER).join(REPO)
    }

    /// Fleet-mode config pointing at this fixture
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.repos.fleet = SLUG.to_string();
        config.repos.token = None;
        config.repos.remote_base = self.remotes().to_string_lossy().to_string();
        config.repos.clone_dir = self.clone_dir().to_string_lossy().to_string();
        config.git.author_name = Some(AUTHOR_NAME.to_string());
        config.git.author_email = Some(AUTHOR_EMAIL.to_string());
        config
    }

    /// Commit a file from the seed copy and push it to origin
    pub fn push_remote_change(&self, relative: &str, contents: &str, message: &str) {
        let seed = self.seed();
        git(&seed, &["pull", "-q", "--rebase", "origin", "main"]);
        write(&seed.join(relative), contents);
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-q", "-m", message]);
        git(&seed, &["push", "-q", "origin", "main"]);
    }

    /// Head commit subject on origin/main
    pub fn origin_head_subject(&self) -> String {
        git(&self.origin(), &["log", "-1", "--format=%s", "main"])
    }

    /// Files touched by the head commit on origin/main
    pub fn origin_head_files(&self) -> Vec<String> {
        git(
            &self.origin(),
            &["show", "--name-only", "--format=", "main"],
        )
        .lines()
        .map(str::to_string)
        .collect()
    }

    pub fn origin_commit_count(&self) -> usize {
        git(&self.origin(), &["rev-list", "--count", "main"])
            .parse()
            .unwrap()
    }
}

/// Runs real git and records every command line
#[derive(Default)]
pub struct RecordingRunner {
    inner: SystemCommandRunner,
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls whose command line contains `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(request.display());
        self.inner.run(request).await
    }
}

/// API state backed by a recording runner
pub fn recording_state(config: Config) -> (ApiState, Arc<RecordingRunner>) {
    let runner = Arc::new(RecordingRunner::default());
    let state = ApiState::with_runner(config, runner.clone());
    (state, runner)
}
