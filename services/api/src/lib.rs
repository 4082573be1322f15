//! Maakima API Library Crate
//!
//! Everything the `api` binary wires together: configuration, room
//! credentials, per-session providers, the session manager, and the HTTP
//! handlers and router. The binary itself is a thin wrapper around this
//! library.

pub mod config;
pub mod credentials;
pub mod handlers;
pub mod models;
pub mod providers;
pub mod router;
pub mod session;
pub mod state;

#[cfg(test)]
mod testing;
