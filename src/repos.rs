//! Repository registry.
//!
//! Resolves configuration into either local mode (the single repository that
//! encloses the working directory) or fleet mode (a list of `owner/repo`
//! slugs, each cloned under the clone directory).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::config::Config;

static SLUG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").expect("slug pattern is valid")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("not inside a git repository (searched upwards from {0})")]
    NotInRepository(PathBuf),

    #[error("invalid repository identifier '{0}', expected owner/repo")]
    InvalidRepositoryIdentifier(String),

    #[error("no configured repository matches '{0}'")]
    UnknownRepository(String),
}

/// Operating mode of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Local,
    Fleet,
}

/// A validated `owner/repo` identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSlug {
    owner: String,
    name: String,
}

impl RepoSlug {
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let raw = raw.trim();
        if !SLUG_RE.is_match(raw) {
            return Err(RegistryError::InvalidRepositoryIdentifier(raw.to_string()));
        }
        let (owner, name) = raw
            .split_once('/')
            .ok_or_else(|| RegistryError::InvalidRepositoryIdentifier(raw.to_string()))?;
        // `.` and `..` match the character class but are not usable path segments
        if [owner, name].iter().any(|part| *part == "." || *part == "..") {
            return Err(RegistryError::InvalidRepositoryIdentifier(raw.to_string()));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Result of parsing the fleet list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetSpec {
    pub valid: Vec<RepoSlug>,
    pub dropped: Vec<String>,
}

/// Parse a comma-separated slug list. Malformed entries are dropped with a warning.
pub fn parse_fleet(raw: &str) -> FleetSpec {
    let mut spec = FleetSpec::default();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match RepoSlug::parse(entry) {
            Ok(slug) if spec.valid.contains(&slug) => {
                warn!(%slug, "Ignoring duplicate repository slug");
            }
            Ok(slug) => spec.valid.push(slug),
            Err(e) => {
                warn!("Ignoring invalid repository slug: {}", e);
                spec.dropped.push(entry.to_string());
            }
        }
    }
    spec
}

/// A repository the process serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Slug in fleet mode, absolute root path in local mode
    pub identifier: String,
    pub local_path: PathBuf,
    pub mode: Mode,
    pub slug: Option<RepoSlug>,
}

impl Repository {
    /// Short human-readable name (slug, or the root directory name)
    pub fn display_name(&self) -> String {
        match &self.slug {
            Some(slug) => slug.to_string(),
            None => self
                .local_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&self.identifier)
                .to_string(),
        }
    }

    /// Whether a git clone (or worktree) exists on disk
    pub fn has_clone(&self) -> bool {
        self.local_path.join(".git").exists()
    }

    /// Whether a user-supplied filter selects this repository
    pub fn matches(&self, filter: &str) -> bool {
        self.identifier == filter || self.display_name() == filter
    }
}

/// Walk parent directories from `start` until one contains `.git`
pub fn find_git_root(start: &Path) -> Result<PathBuf, RegistryError> {
    let start = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(start)
    };

    let mut dir = start.as_path();
    loop {
        if dir.join(".git").exists() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Err(RegistryError::NotInRepository(start)),
        }
    }
}

/// How remote URLs are built for fleet repositories
#[derive(Clone)]
struct RemoteSpec {
    base: String,
    token: Option<String>,
}

impl fmt::Debug for RemoteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSpec")
            .field("base", &self.base)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Resolves configured repositories to local paths
#[derive(Debug, Clone)]
pub struct RepoRegistry {
    fleet_configured: bool,
    fleet: FleetSpec,
    workdir: PathBuf,
    clone_dir: PathBuf,
    remote: RemoteSpec,
}

impl RepoRegistry {
    pub fn from_config(config: &Config) -> Self {
        let raw = config.repos.fleet.trim();
        Self {
            fleet_configured: !raw.is_empty(),
            fleet: parse_fleet(raw),
            workdir: config.workdir(),
            clone_dir: config.clone_dir(),
            remote: RemoteSpec {
                base: config.repos.remote_base.trim_end_matches('/').to_string(),
                token: config.repos.token.clone(),
            },
        }
    }

    /// Fleet mode whenever a fleet value is configured, even if every slug was dropped
    pub fn mode(&self) -> Mode {
        if self.fleet_configured {
            Mode::Fleet
        } else {
            Mode::Local
        }
    }

    pub fn is_local(&self) -> bool {
        self.mode() == Mode::Local
    }

    pub fn fleet(&self) -> &FleetSpec {
        &self.fleet
    }

    pub fn clone_dir(&self) -> &Path {
        &self.clone_dir
    }

    /// Local clone path for a fleet slug
    pub fn clone_path(&self, slug: &RepoSlug) -> PathBuf {
        self.clone_dir.join(slug.owner()).join(slug.name())
    }

    /// Clone URL for a fleet slug, authenticated when a token is configured
    pub fn remote_url(&self, slug: &RepoSlug) -> String {
        if let (Some(token), Some(host)) = (&self.remote.token, self.remote.base.strip_prefix("https://")) {
            return format!("https://x-access-token:{token}@{host}/{slug}.git");
        }
        format!("{}/{}.git", self.remote.base, slug)
    }

    /// The single repository enclosing the working directory
    pub fn local_repository(&self) -> Result<Repository, RegistryError> {
        let root = find_git_root(&self.workdir)?;
        Ok(Repository {
            identifier: root.to_string_lossy().to_string(),
            local_path: root,
            mode: Mode::Local,
            slug: None,
        })
    }

    /// Configured repositories narrowed to the one matching `filter`
    pub fn select(&self, filter: Option<&str>) -> Result<Vec<Repository>, RegistryError> {
        let repos = self.list_repositories()?;
        let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) else {
            return Ok(repos);
        };
        let selected: Vec<Repository> = repos.into_iter().filter(|r| r.matches(filter)).collect();
        if selected.is_empty() {
            return Err(RegistryError::UnknownRepository(filter.to_string()));
        }
        Ok(selected)
    }

    /// Every configured repository, in configuration order
    pub fn list_repositories(&self) -> Result<Vec<Repository>, RegistryError> {
        match self.mode() {
            Mode::Local => Ok(vec![self.local_repository()?]),
            Mode::Fleet => Ok(self
                .fleet
                .valid
                .iter()
                .map(|slug| Repository {
                    identifier: slug.to_string(),
                    local_path: self.clone_path(slug),
                    mode: Mode::Fleet,
                    slug: Some(slug.clone()),
                })
                .collect()),
        }
    }
}
