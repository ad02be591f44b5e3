//! Process execution seam for git.
//!
//! Every git invocation goes through a [`CommandRunner`] so tests can observe
//! or script the commands without touching a real repository.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"x-access-token:[^@\s]+@").expect("token pattern is valid"));

/// Mask embedded access tokens in anything that may reach a log or a client
pub fn redact(text: &str) -> String {
    TOKEN_RE.replace_all(text, "x-access-token:***@").into_owned()
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` exited with code {code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl CommandError {
    /// Captured stderr, empty for spawn failures and timeouts
    pub fn stderr(&self) -> &str {
        match self {
            Self::NonZeroExit { stderr, .. } => stderr,
            _ => "",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether git reported that the directory is not a usable repository
    pub fn is_not_a_repository(&self) -> bool {
        let stderr = self.stderr().to_ascii_lowercase();
        stderr.contains("not a git repository") || stderr.contains("invalid gitfile format")
    }
}

/// A single process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout,
            env: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Redacted command line for logs and error messages
    pub fn display(&self) -> String {
        redact(&format!("{} {}", self.program, self.args.join(" ")))
    }
}

/// Captured output of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Trait abstracting process execution for testability
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion. Non-zero exits are errors.
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, request: CommandRequest) -> Result<CommandOutput, CommandError> {
        let command = request.display();
        debug!(%command, cwd = %request.cwd.display(), "Running command");

        let child = Command::new(&request.program)
            .args(&request.args)
            .current_dir(&request.cwd)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        // Dropping the wait future on timeout kills the child
        let output = match tokio::time::timeout(request.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(CommandError::Spawn { command, source }),
            Err(_) => {
                return Err(CommandError::Timeout {
                    command,
                    timeout: request.timeout,
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = redact(String::from_utf8_lossy(&output.stderr).trim());

        if !output.status.success() {
            return Err(CommandError::NonZeroExit {
                command,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: output.status.code(),
        })
    }
}
