//! Repository, pending-change and commit endpoints.

use axum::{
    extract::{Query, State},
    Json,
};

use crate::rest::dto::{
    ChangedFileResponse, CommitRequest, CommitResponse, RepoFilterQuery, RepositoryResponse,
};
use crate::rest::error::{ApiError, ErrorResponse};
use crate::rest::state::ApiState;

/// List repositories that can be served, syncing fleet clones first
#[utoipa::path(
    get,
    path = "/api/v1/repos",
    tag = "Repositories",
    responses(
        (status = 200, description = "Available repositories", body = Vec<RepositoryResponse>),
        (status = 500, description = "Not inside a git repository (local mode)", body = ErrorResponse)
    )
)]
pub async fn list(State(state): State<ApiState>) -> Result<Json<Vec<RepositoryResponse>>, ApiError> {
    let repos = state.sync.list_available().await?;
    Ok(Json(repos.iter().map(RepositoryResponse::from).collect()))
}

/// List uncommitted task and document changes
#[utoipa::path(
    get,
    path = "/api/v1/changes",
    tag = "Repositories",
    params(RepoFilterQuery),
    responses(
        (status = 200, description = "Pending changes", body = Vec<ChangedFileResponse>),
        (status = 404, description = "Unknown repository", body = ErrorResponse)
    )
)]
pub async fn changes(
    State(state): State<ApiState>,
    Query(query): Query<RepoFilterQuery>,
) -> Result<Json<Vec<ChangedFileResponse>>, ApiError> {
    let files = state.pipeline.pending_changes(query.repo.as_deref()).await?;
    Ok(Json(files.into_iter().map(ChangedFileResponse::from).collect()))
}

/// Commit and push pending changes
#[utoipa::path(
    post,
    path = "/api/v1/commit",
    tag = "Repositories",
    request_body = CommitRequest,
    responses(
        (status = 200, description = "Commit summary", body = CommitResponse),
        (status = 404, description = "Unknown repository", body = ErrorResponse)
    )
)]
pub async fn commit(
    State(state): State<ApiState>,
    request: Option<Json<CommitRequest>>,
) -> Result<Json<CommitResponse>, ApiError> {
    let Json(request) = request.unwrap_or_default();
    let report = state.pipeline.commit_and_push(request.repo.as_deref()).await?;
    Ok(Json(CommitResponse::from(&report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn fleet_state() -> ApiState {
        let mut config = Config::default();
        config.repos.fleet = "acme/docs".to_string();
        config.repos.clone_dir = "/nonexistent/quire-clones".to_string();
        ApiState::new(config)
    }

    #[tokio::test]
    async fn test_changes_unknown_repository() {
        let result = changes(
            State(fleet_state()),
            Query(RepoFilterQuery {
                repo: Some("acme/nope".to_string()),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_commit_without_clones_has_nothing_to_commit() {
        let resp = commit(State(fleet_state()), None).await.unwrap();
        assert_eq!(resp.message, "No changes to commit");
        assert!(resp.outcomes.is_empty());
        assert!(resp.advisory.is_none());
    }
}
