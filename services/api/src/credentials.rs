//! Room Credentials
//!
//! Short-lived access tokens that let the bot join exactly one room.

use livekit_api::access_token::{AccessToken, AccessTokenError, VideoGrants};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Failed to sign room token: {0}")]
    Signing(#[from] AccessTokenError),
    #[error("Credential signer misconfigured: {0}")]
    Config(String),
}

/// Issues a fresh credential for the bot to join one room.
pub trait TokenSigner: Send + Sync {
    fn room_token(&self, room_name: &str) -> Result<String, CredentialError>;
}

/// Signs LiveKit-compatible JWTs with the configured API key and secret.
pub struct LiveKitTokenSigner {
    api_key: String,
    api_secret: String,
    identity: String,
    name: String,
    ttl: Duration,
}

impl LiveKitTokenSigner {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        identity: impl Into<String>,
        name: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            identity: identity.into(),
            name: name.into(),
            ttl,
        }
    }
}

impl TokenSigner for LiveKitTokenSigner {
    fn room_token(&self, room_name: &str) -> Result<String, CredentialError> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(CredentialError::Config(
                "API key and secret must be set".to_string(),
            ));
        }

        let token = AccessToken::with_api_key(&self.api_key, &self.api_secret)
            .with_identity(&self.identity)
            .with_name(&self.name)
            .with_grants(VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(self.ttl);

        Ok(token.to_jwt()?)
    }
}
