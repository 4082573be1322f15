//! Axum Router Configuration
//!
//! HTTP routing for the service plus the OpenAPI document and Swagger UI.

use crate::{
    handlers,
    models::{ErrorResponse, JoinRoomRequest, JoinRoomResponse, SessionSummary},
    session::SessionState,
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::join_room, handlers::list_sessions),
    components(
        schemas(JoinRoomRequest, JoinRoomResponse, ErrorResponse, SessionSummary, SessionState)
    ),
    tags(
        (name = "Maakima API", description = "Dispatches the Maakima voice assistant into rooms")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/join-room", post(handlers::join_room))
        .route("/sessions", get(handlers::list_sessions))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
