//! Collaboration session listing.

use axum::{extract::State, Json};

use crate::rest::dto::SessionResponse;
use crate::rest::state::ApiState;

/// List live collaboration sessions
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "Collaboration",
    responses(
        (status = 200, description = "Live sessions", body = Vec<SessionResponse>)
    )
)]
pub async fn list(State(state): State<ApiState>) -> Json<Vec<SessionResponse>> {
    Json(
        state
            .sessions
            .sessions()
            .into_iter()
            .map(SessionResponse::from)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_list_tracks_connections() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.md");
        std::fs::write(&file, "# A").unwrap();
        let state = ApiState::new(Config::default());

        let conn = state
            .sessions
            .connect(&file.display().to_string(), None)
            .unwrap();
        let resp = list(State(state.clone())).await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].connections, 1);
        assert_eq!(resp[0].document, file.display().to_string());

        conn.disconnect();
        let resp = list(State(state)).await;
        assert_eq!(resp[0].connections, 0);
    }
}
