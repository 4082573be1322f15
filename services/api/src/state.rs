//! Shared Application State

use crate::session::SessionManager;

/// Created once at startup and handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
}
