//! JWT verification for connecting clients.
//!
//! Tokens are issued by the auth service and signed with a shared HS256
//! secret. Only verification happens here.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use ridechat_core::{AuthError, Authenticator, Identity};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Role assumed when a token carries none.
const DEFAULT_ROLE: &str = "passenger";

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject user id.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Account email.
    #[serde(default)]
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Account role.
    #[serde(default)]
    pub role: Option<String>,
    /// Expiry as seconds since the epoch.
    pub exp: usize,
}

/// HS256 token verifier.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Create a verifier for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decode and validate a token.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature, expiry or claims are invalid.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let claims = self.verify(token)?;
        if claims.user_id.is_empty() {
            return Err(AuthError::InvalidToken("token has no userId".into()));
        }

        debug!(user = %claims.user_id, "Token verified");
        Ok(Identity::new(
            claims.user_id,
            claims.name,
            claims.role.unwrap_or_else(|| DEFAULT_ROLE.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &[u8], user_id: &str, exp_offset: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset) as usize;
        let claims = Claims {
            user_id: user_id.into(),
            email: "a@example.com".into(),
            name: "Ana".into(),
            role: None,
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[tokio::test]
    async fn test_valid_token() {
        let auth = JwtAuthenticator::new(b"secret");
        let identity = auth.authenticate(&token(b"secret", "u1", 3600)).await.unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.name, "Ana");
        assert_eq!(identity.role, "passenger");
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let auth = JwtAuthenticator::new(b"secret");
        let result = auth.authenticate(&token(b"other", "u1", 3600)).await;
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let auth = JwtAuthenticator::new(b"secret");
        let result = auth.authenticate(&token(b"secret", "u1", -3600)).await;
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_empty_token() {
        let auth = JwtAuthenticator::new(b"secret");
        assert!(matches!(
            auth.authenticate("  ").await,
            Err(AuthError::MissingToken)
        ));
        assert!(matches!(
            auth.authenticate("not.a.jwt").await,
            Err(AuthError::InvalidToken(_))
        ));
    }
}
