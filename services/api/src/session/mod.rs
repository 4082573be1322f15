//! Room sessions: the per-room state machine and the table that tracks them.

pub mod manager;
pub mod room;

pub use manager::{JoinError, SessionManager};
pub use room::{DEFAULT_GREETING, RoomSession, SessionReport, SessionSettings, SessionState};
