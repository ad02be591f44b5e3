use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repos: ReposConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub collab: CollabConfig,
    #[serde(default)]
    pub rest_api: RestApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which repositories are served and where fleet clones live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReposConfig {
    /// Comma-separated `owner/repo` list. Empty means local mode.
    #[serde(default)]
    pub fleet: String,
    /// Access token used for authenticated clones and pushes
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// Directory to start the local-mode repository search from (default: cwd)
    #[serde(default)]
    pub workdir: Option<String>,
    /// Root directory for fleet clones (`<clone_dir>/<owner>/<repo>`)
    #[serde(default = "default_clone_dir")]
    pub clone_dir: String,
    /// Base URL (or directory) that `<owner>/<repo>.git` is appended to
    #[serde(default = "default_remote_base")]
    pub remote_base: String,
}

fn default_clone_dir() -> String {
    "/tmp/quire/repos".to_string()
}

fn default_remote_base() -> String {
    "https://github.com".to_string()
}

impl Default for ReposConfig {
    fn default() -> Self {
        Self {
            fleet: String::new(),
            token: None,
            workdir: None,
            clone_dir: default_clone_dir(),
            remote_base: default_remote_base(),
        }
    }
}

/// Layout of the content directory inside each repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Content directory relative to the repository root
    #[serde(default = "default_content_dir")]
    pub dir: String,
    /// Task directory relative to the content directory
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: String,
}

fn default_content_dir() -> String {
    ".quire".to_string()
}

fn default_tasks_dir() -> String {
    "tasks".to_string()
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            dir: default_content_dir(),
            tasks_dir: default_tasks_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Timeout for local git commands (status, add, commit, reset)
    #[serde(default = "default_local_timeout")]
    pub local_timeout_secs: u64,
    /// Timeout for fetch, pull and push
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,
    /// Timeout for shallow clones
    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,
    /// Message used for every pipeline commit
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    /// Committer identity; falls back to the repository's git config when unset
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
}

fn default_local_timeout() -> u64 {
    10
}

fn default_network_timeout() -> u64 {
    30
}

fn default_clone_timeout() -> u64 {
    60
}

fn default_commit_message() -> String {
    "Update quire content".to_string()
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            local_timeout_secs: default_local_timeout(),
            network_timeout_secs: default_network_timeout(),
            clone_timeout_secs: default_clone_timeout(),
            commit_message: default_commit_message(),
            author_name: None,
            author_email: None,
        }
    }
}

/// Collaboration session manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollabConfig {
    /// Port for the collaboration WebSocket listener
    #[serde(default = "default_collab_port")]
    pub port: u16,
    /// Seconds a session stays warm after its last connection leaves
    #[serde(default = "default_unload_after")]
    pub unload_after_secs: u64,
    /// Only serve documents that live inside a known repository
    #[serde(default = "default_restrict")]
    pub restrict_to_repositories: bool,
    /// Messages queued per connection before a slow client is dropped
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

fn default_collab_port() -> u16 {
    1236
}

fn default_unload_after() -> u64 {
    30
}

fn default_restrict() -> bool {
    true
}

fn default_outbound_buffer() -> usize {
    256
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            port: default_collab_port(),
            unload_after_secs: default_unload_after(),
            restrict_to_repositories: default_restrict(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestApiConfig {
    #[serde(default = "default_rest_port")]
    pub port: u16,
}

fn default_rest_port() -> u16 {
    7008
}

impl Default for RestApiConfig {
    fn default() -> Self {
        Self {
            port: default_rest_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether the server writes logs to a file instead of stderr
    #[serde(default)]
    pub to_file: bool,

    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    "/tmp/quire/logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
            dir: default_log_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repos: ReposConfig::default(),
            content: ContentConfig::default(),
            git: GitConfig::default(),
            collab: CollabConfig::default(),
            rest_api: RestApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Project-level config file, relative to the working directory
    pub fn project_config_path() -> PathBuf {
        PathBuf::from("quire.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so quire works without config files
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let project_config = Self::project_config_path();
        if project_config.exists() {
            builder = builder.add_source(config::File::from(project_config));
        }

        // User config in ~/.config/quire/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("quire").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables with QUIRE__ prefix, e.g. QUIRE__COLLAB__PORT
        builder = builder.add_source(
            config::Environment::with_prefix("QUIRE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to load configuration")?;
        let mut config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Honor the conventional `GITHUB_REPOS` / `GITHUB_TOKEN` variables.
    ///
    /// They only fill in values the layered config left empty.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.repos.fleet.trim().is_empty() {
            if let Some(fleet) = lookup("GITHUB_REPOS") {
                self.repos.fleet = fleet;
            }
        }
        if self.repos.token.is_none() {
            self.repos.token = lookup("GITHUB_TOKEN").filter(|t| !t.trim().is_empty());
        }
    }

    /// Absolute root directory for fleet clones
    pub fn clone_dir(&self) -> PathBuf {
        absolutize(&self.repos.clone_dir)
    }

    /// Directory the local-mode repository search starts from
    pub fn workdir(&self) -> PathBuf {
        match &self.repos.workdir {
            Some(dir) if !dir.trim().is_empty() => absolutize(dir),
            _ => std::env::current_dir().unwrap_or_default(),
        }
    }

    /// Absolute path to the log directory
    pub fn logs_path(&self) -> PathBuf {
        absolutize(&self.logging.dir)
    }

    pub fn unload_after(&self) -> Duration {
        Duration::from_secs(self.collab.unload_after_secs)
    }
}

fn absolutize(path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.repos.fleet.is_empty());
        assert_eq!(config.collab.port, 1236);
        assert_eq!(config.rest_api.port, 7008);
        assert_eq!(config.content.dir, ".quire");
        assert_eq!(config.git.commit_message, "Update quire content");
        assert!(config.git.local_timeout_secs < config.git.network_timeout_secs);
    }

    #[test]
    fn test_defaults_round_trip_through_json() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.repos.clone_dir, "/tmp/quire/repos");
        assert_eq!(parsed.collab.unload_after_secs, 30);
        assert_eq!(parsed.collab.outbound_buffer, 256);
    }

    #[test]
    fn test_token_is_never_serialized() {
        let mut config = Config::default();
        config.repos.token = Some("secret-token".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret-token"));
    }

    #[test]
    fn test_env_overrides_fill_empty_values() {
        let env: HashMap<&str, &str> =
            HashMap::from([("GITHUB_REPOS", "acme/docs"), ("GITHUB_TOKEN", "tok")]);
        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.repos.fleet, "acme/docs");
        assert_eq!(config.repos.token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_env_overrides_do_not_replace_configured_fleet() {
        let mut config = Config::default();
        config.repos.fleet = "acme/site".to_string();
        config.apply_env_overrides(|key| match key {
            "GITHUB_REPOS" => Some("other/repo".to_string()),
            _ => None,
        });
        assert_eq!(config.repos.fleet, "acme/site");
        assert!(config.repos.token.is_none());
    }

    #[test]
    fn test_blank_token_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            "GITHUB_TOKEN" => Some("  ".to_string()),
            _ => None,
        });
        assert!(config.repos.token.is_none());
    }

    #[test]
    fn test_workdir_override() {
        let mut config = Config::default();
        config.repos.workdir = Some("/srv/notes".to_string());
        assert_eq!(config.workdir(), PathBuf::from("/srv/notes"));
    }
}
