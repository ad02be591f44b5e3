//! API state management for the REST server.

use std::sync::Arc;

use crate::collab::{DocumentAccess, SessionManager};
use crate::config::Config;
use crate::content::ContentLayout;
use crate::git::{CommandRunner, CommitPipeline, GitCli, SyncEngine, SyncRecord, SystemCommandRunner};
use crate::repos::RepoRegistry;

/// Shared state for the REST API and the collaboration socket
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
    pub registry: Arc<RepoRegistry>,
    pub sync: Arc<SyncEngine>,
    pub pipeline: Arc<CommitPipeline>,
    pub sessions: Arc<SessionManager>,
}

impl ApiState {
    /// Create new API state from config, running git as a child process
    pub fn new(config: Config) -> Self {
        Self::with_runner(config, Arc::new(SystemCommandRunner))
    }

    /// Create API state with a custom command runner.
    ///
    /// The sync engine and the commit pipeline share one [`SyncRecord`], so
    /// their per-repository locks are the same.
    pub fn with_runner(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        let registry = Arc::new(RepoRegistry::from_config(&config));
        let record = Arc::new(SyncRecord::new());
        let git = GitCli::from_config(runner, &config.git);

        let sync = SyncEngine::new(git.clone(), record.clone(), registry.clone());
        let pipeline = CommitPipeline::new(
            git,
            record,
            registry.clone(),
            ContentLayout::from_config(&config.content),
            config.git.commit_message.clone(),
        );
        let sessions = SessionManager::new(DocumentAccess::unrestricted(), config.unload_after())
            .with_outbound_buffer(config.collab.outbound_buffer);

        Self {
            config: Arc::new(config),
            registry,
            sync: Arc::new(sync),
            pipeline: Arc::new(pipeline),
            sessions: Arc::new(sessions),
        }
    }

    /// Replace the session manager with one limited to `access`
    pub fn with_access(mut self, access: DocumentAccess) -> Self {
        self.sessions = Arc::new(
            SessionManager::new(access, self.config.unload_after())
                .with_outbound_buffer(self.config.collab.outbound_buffer),
        );
        self
    }
}
