//! OpenAPI specification builder using utoipa.

use axum::Json;
use utoipa::OpenApi;

use crate::rest::dto::{
    ChangedFileResponse, CommitOutcomeResponse, CommitRequest, CommitResponse, HealthResponse,
    RepositoryResponse, SessionResponse, StatusResponse,
};
use crate::rest::error::ErrorResponse;

/// OpenAPI documentation for the Quire REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Quire API",
        description = "Repository sync, content commits and collaborative editing sessions.",
        license(name = "MIT")
    ),
    paths(
        // Health endpoints
        crate::rest::routes::health::health,
        crate::rest::routes::health::status,
        // Repository endpoints
        crate::rest::routes::repos::list,
        crate::rest::routes::repos::changes,
        crate::rest::routes::repos::commit,
        // Collaboration endpoints
        crate::rest::routes::sessions::list,
        crate::rest::routes::collab::socket,
    ),
    components(
        schemas(
            // Response types
            HealthResponse,
            StatusResponse,
            RepositoryResponse,
            ChangedFileResponse,
            CommitOutcomeResponse,
            CommitResponse,
            SessionResponse,
            ErrorResponse,
            // Request types
            CommitRequest,
        )
    ),
    tags(
        (name = "Health", description = "Health check and status endpoints"),
        (name = "Repositories", description = "Repository listing, pending changes and commits"),
        (name = "Collaboration", description = "Collaborative editing sessions"),
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI specification as a JSON string
    pub fn json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}

/// Serve the OpenAPI document
pub async fn spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generates() {
        let spec = ApiDoc::json().expect("Failed to generate OpenAPI spec");
        assert!(spec.contains("Quire API"));
        assert!(spec.contains("/api/v1/health"));
        assert!(spec.contains("/api/v1/commit"));
        assert!(spec.contains("/collab"));
    }

    #[test]
    fn test_openapi_has_all_tags() {
        let spec = ApiDoc::json().expect("Failed to generate OpenAPI spec");
        assert!(spec.contains("\"Health\""));
        assert!(spec.contains("\"Repositories\""));
        assert!(spec.contains("\"Collaboration\""));
    }
}
