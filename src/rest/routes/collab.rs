//! Collaboration socket.
//!
//! One websocket per client and document. Binary frames carry yrs updates,
//! text frames carry [`ClientMessage`] / [`ServerMessage`] JSON.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, info};
use utoipa::IntoParams;

use crate::collab::{ClientMessage, Connection, Outbound, PresenceState, ServerMessage};
use crate::rest::error::{ApiError, ErrorResponse};
use crate::rest::state::ApiState;

/// Connection parameters for the collaboration socket
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CollabQuery {
    /// Absolute path of the document, `task:` prefixed for tasks
    pub document: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_color: Option<String>,
}

impl CollabQuery {
    /// Initial presence, if the client announced any
    fn presence(&self) -> Option<PresenceState> {
        if self.user_id.is_none() && self.user_name.is_none() && self.user_color.is_none() {
            return None;
        }
        Some(PresenceState {
            id: self.user_id.clone(),
            name: self.user_name.clone(),
            color: self.user_color.clone(),
        })
    }
}

/// Attach to a document session before the upgrade so rejections are plain HTTP errors
fn open(state: &ApiState, query: &CollabQuery) -> Result<Connection, ApiError> {
    Ok(state.sessions.connect(&query.document, query.presence())?)
}

/// Open a collaboration socket on a document
#[utoipa::path(
    get,
    path = "/collab",
    tag = "Collaboration",
    params(CollabQuery),
    responses(
        (status = 101, description = "Switching to the collaboration socket"),
        (status = 400, description = "Invalid document name", body = ErrorResponse),
        (status = 403, description = "Document outside the served repositories", body = ErrorResponse)
    )
)]
pub async fn socket(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(query): Query<CollabQuery>,
) -> Result<Response, ApiError> {
    let conn = open(&state, &query)?;
    info!(document = %conn.document(), connection = conn.id(), "Collaboration client connected");
    Ok(ws.on_upgrade(move |socket| pump(socket, conn)))
}

async fn pump(mut socket: WebSocket, mut conn: Connection) {
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Binary(update))) => conn.send_update(update),
                Some(Ok(Message::Text(text))) => {
                    if let Err(reason) = handle_text(&conn, &text) {
                        let reply = Outbound::Error(reason);
                        if send(&mut socket, reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Socket read failed");
                    break;
                }
            },
            outbound = conn.recv() => {
                let Some(outbound) = outbound else { break };
                if send(&mut socket, outbound).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(document = %conn.document(), connection = conn.id(), "Collaboration client disconnected");
    conn.disconnect();
}

fn handle_text(conn: &Connection, text: &str) -> Result<(), String> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Presence { user }) => conn.set_presence(user),
        Ok(ClientMessage::Stateless { payload }) => conn.send_stateless(payload),
        Err(e) => return Err(format!("malformed message: {e}")),
    }
    Ok(())
}

fn to_frame(outbound: Outbound) -> Option<Message> {
    match outbound {
        Outbound::Sync(bytes) | Outbound::Update(bytes) => Some(Message::Binary(bytes)),
        other => {
            let message: ServerMessage = other.to_server_message()?;
            serde_json::to_string(&message).ok().map(Message::Text)
        }
    }
}

async fn send(socket: &mut WebSocket, outbound: Outbound) -> Result<(), axum::Error> {
    match to_frame(outbound) {
        Some(frame) => socket.send(frame).await,
        None => Ok(()),
    }
}
