// libs/signaling-cell/src/services/auth.rs
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_utils::jwt::validate_token;

use crate::models::SignalingError;

/// Verifies the credential presented on a signaling handshake.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<User, SignalingError>;
}

/// HS256 bearer tokens signed with the project JWT secret.
pub struct JwtCredentialVerifier {
    config: Arc<AppConfig>,
}

impl JwtCredentialVerifier {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CredentialVerifier for JwtCredentialVerifier {
    async fn verify(&self, token: &str) -> Result<User, SignalingError> {
        validate_token(token, &self.config.supabase_jwt_secret).map_err(|e| {
            debug!("Signaling credential rejected: {}", e);
            SignalingError::InvalidCredential(e.to_string())
        })
    }
}
