//! Data Transfer Objects for the REST API.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::collab::SessionSummary;
use crate::git::{ChangedFile, CommitOutcome, CommitReport};
use crate::repos::{Mode, Repository};

fn mode_name(mode: Mode) -> String {
    match mode {
        Mode::Local => "local".to_string(),
        Mode::Fleet => "fleet".to_string(),
    }
}

// =============================================================================
// Health DTOs
// =============================================================================

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status response with repository and session counts
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    /// "local" or "fleet"
    pub mode: String,
    pub repository_count: usize,
    pub session_count: usize,
}

// =============================================================================
// Repository DTOs
// =============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RepositoryResponse {
    /// Slug in fleet mode, root path in local mode
    pub identifier: String,
    pub name: String,
    pub path: String,
    pub mode: String,
}

impl From<&Repository> for RepositoryResponse {
    fn from(repo: &Repository) -> Self {
        Self {
            identifier: repo.identifier.clone(),
            name: repo.display_name(),
            path: repo.local_path.display().to_string(),
            mode: mode_name(repo.mode),
        }
    }
}

/// Optional repository filter
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RepoFilterQuery {
    /// Repository slug or name; all repositories when omitted
    pub repo: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChangedFileResponse {
    pub repository: String,
    pub path: String,
    pub title: String,
    /// "task" or "doc"
    pub kind: String,
    /// "new" or "modified"
    pub status: String,
}

impl From<ChangedFile> for ChangedFileResponse {
    fn from(file: ChangedFile) -> Self {
        Self {
            repository: file.repository,
            path: file.path,
            title: file.title,
            kind: file.kind.as_str().to_string(),
            status: file.status.as_str().to_string(),
        }
    }
}

// =============================================================================
// Commit DTOs
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CommitRequest {
    /// Limit the commit to one repository
    #[serde(default)]
    pub repo: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommitOutcomeResponse {
    pub repository: String,
    pub committed: bool,
    pub rebased: bool,
    pub pushed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&CommitOutcome> for CommitOutcomeResponse {
    fn from(outcome: &CommitOutcome) -> Self {
        Self {
            repository: outcome.repository.clone(),
            committed: outcome.committed,
            rebased: outcome.rebased,
            pushed: outcome.pushed,
            error: outcome.error.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommitResponse {
    /// Human-readable summary
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
    pub outcomes: Vec<CommitOutcomeResponse>,
}

impl From<&CommitReport> for CommitResponse {
    fn from(report: &CommitReport) -> Self {
        Self {
            message: report.message(),
            advisory: report.advisory().map(str::to_string),
            outcomes: report.outcomes.iter().map(CommitOutcomeResponse::from).collect(),
        }
    }
}

// =============================================================================
// Session DTOs
// =============================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub document: String,
    pub connections: usize,
}

impl From<SessionSummary> for SessionResponse {
    fn from(summary: SessionSummary) -> Self {
        Self {
            document: summary.document,
            connections: summary.connections,
        }
    }
}
