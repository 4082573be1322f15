//! Session Manager
//!
//! Owns the table of live sessions. Each accepted join spawns one
//! independent session task; the entry is removed once that task ends,
//! whether it closed, failed or panicked.

use super::room::{RoomSession, SessionSettings, SessionState};
use crate::{
    credentials::{CredentialError, TokenSigner},
    models::SessionSummary,
    providers::ProviderFactory,
};
use chrono::{DateTime, Utc};
use maakima_core::room::RoomConnector;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{RwLock, watch};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("Missing roomName")]
    MissingRoomName,
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

struct SessionEntry {
    room_name: String,
    started_at: DateTime<Utc>,
    state: watch::Receiver<SessionState>,
}

struct Inner {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    signer: Arc<dyn TokenSigner>,
    connector: Arc<dyn RoomConnector>,
    providers: Arc<dyn ProviderFactory>,
    settings: SessionSettings,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        signer: Arc<dyn TokenSigner>,
        connector: Arc<dyn RoomConnector>,
        providers: Arc<dyn ProviderFactory>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                signer,
                connector,
                providers,
                settings,
            }),
        }
    }

    /// Issues a credential and starts a session for `room_name` in the
    /// background. Returns as soon as the session is registered; the
    /// connection itself happens inside the session task.
    pub async fn request_join(&self, room_name: &str) -> Result<Uuid, JoinError> {
        if room_name.is_empty() {
            return Err(JoinError::MissingRoomName);
        }

        let token = self.inner.signer.room_token(room_name)?;
        info!(room = %room_name, "Issued bot credential");

        let id = Uuid::new_v4();
        let (session, state) = RoomSession::new(
            id,
            room_name,
            token,
            self.inner.settings.clone(),
            self.inner.connector.clone(),
            self.inner.providers.clone(),
        );

        self.inner.sessions.write().await.insert(
            id,
            SessionEntry {
                room_name: room_name.to_string(),
                started_at: Utc::now(),
                state,
            },
        );

        let span = info_span!("room_session", session_id = %id, room = %room_name);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            match tokio::spawn(session.run().instrument(span)).await {
                Ok(report) => info!(
                    session_id = %report.session_id,
                    room = %report.room_name,
                    transitions = ?report.transitions,
                    "Session ended"
                ),
                Err(e) => error!(session_id = %id, error = %e, "Session task aborted"),
            }
            inner.sessions.write().await.remove(&id);
        });

        Ok(id)
    }

    /// Snapshot of the live sessions, oldest first.
    pub async fn sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.inner.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, entry)| SessionSummary {
                session_id: *id,
                room_name: entry.room_name.clone(),
                state: *entry.state.borrow(),
                started_at: entry.started_at,
            })
            .collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
