//! API Models
//!
//! Request and response bodies for the HTTP surface, annotated for OpenAPI
//! generation with `utoipa`.

use crate::session::SessionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Body of `POST /join-room`. Documentation only: the handler inspects the
/// raw JSON so it can tell a malformed body from a missing room name.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_name: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct JoinRoomResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    pub room_name: String,
    #[schema(value_type = String, example = "active")]
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}
