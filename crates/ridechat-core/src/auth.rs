//! Authentication capability.
//!
//! Token verification lives outside the core; connection handlers only see
//! an [`Authenticator`] that turns a token into an [`Identity`].

use crate::connection::Identity;
use async_trait::async_trait;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("Missing token")]
    MissingToken,

    /// The token is malformed, expired or has a bad signature.
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Verifies a bearer token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a token into the identity it vouches for.
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Authenticator used when no credential verification is configured.
///
/// Every token is rejected, so connections stay anonymous unless the
/// server is configured to require authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnonymous;

#[async_trait]
impl Authenticator for AllowAnonymous {
    async fn authenticate(&self, _token: &str) -> Result<Identity, AuthError> {
        Err(AuthError::InvalidToken(
            "token verification is not configured".into(),
        ))
    }
}
