//! Axum Handlers for the REST API
//!
//! `POST /join-room` asks the bot to join a room; `GET /sessions` lists the
//! sessions currently running. Handlers carry `utoipa` annotations for the
//! OpenAPI document.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{ErrorResponse, JoinRoomRequest, JoinRoomResponse, SessionSummary},
    session::JoinError,
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new(err.to_string())),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Ask the bot to join a room.
///
/// The response is sent as soon as the session is registered; connecting to
/// the room happens in the background.
#[utoipa::path(
    post,
    path = "/join-room",
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Bot is joining the room", body = JoinRoomResponse),
        (status = 400, description = "roomName missing", body = ErrorResponse),
        (status = 500, description = "Malformed body or credential failure", body = ErrorResponse)
    )
)]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<JoinRoomResponse>, ApiError> {
    let payload: Value = serde_json::from_slice(&body)?;

    let room_name = payload
        .get("roomName")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let session_id = state
        .sessions
        .request_join(room_name)
        .await
        .map_err(|e| match e {
            JoinError::MissingRoomName => {
                warn!("Join request without roomName");
                ApiError::BadRequest(e.to_string())
            }
            JoinError::Credential(e) => ApiError::InternalServerError(e.into()),
        })?;

    info!(%session_id, room = %room_name, "Bot joining room");
    Ok(Json(JoinRoomResponse {
        success: true,
        message: format!("Bot joining room {}", room_name),
    }))
}

/// List the sessions currently running.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "Live sessions", body = [SessionSummary])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.sessions().await)
}
