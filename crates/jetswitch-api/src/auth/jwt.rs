//! Session token issuance and validation
//!
//! Session tokens are HS256 JWTs carrying the user id and username. The server
//! keeps no session state: every request re-derives validity from the
//! signature and the `exp` claim.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use jetswitch_core::{AuthConfig, MAX_TOKEN_TTL_DAYS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
}

/// Token validation and signing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Unexpected token algorithm")]
    UnexpectedAlgorithm,

    #[error("Token has expired")]
    Expired,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    /// Short classification written to the audit log
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::InvalidSignature => "invalid-signature",
            TokenError::UnexpectedAlgorithm => "unexpected-algorithm",
            TokenError::Expired => "expired",
            TokenError::Signing(_) => "signing-failed",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                TokenError::UnexpectedAlgorithm
            }
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        }
    }
}

/// Signs and verifies session tokens with a server-held secret
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Out-of-range lifetimes are clamped; `AppConfig::validate` rejects them at startup
    pub fn new(config: &AuthConfig) -> Self {
        let days = config.token_ttl_days.clamp(1, MAX_TOKEN_TTL_DAYS);
        Self::with_secret(config.jwt_secret.as_bytes(), Duration::days(days))
    }

    pub fn with_secret(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Session lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token valid from now until now + ttl
    pub fn issue(&self, user_id: i64, username: &str) -> Result<String, TokenError> {
        self.issue_at(user_id, username, Utc::now())
    }

    /// Issue a token as if the current time were `at`
    pub fn issue_at(
        &self,
        user_id: i64,
        username: &str,
        at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            user_id,
            username: username.to_string(),
            iat: at.timestamp(),
            exp: (at + self.ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Validate a token against the current time
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Validate a token as if the current time were `now`
    ///
    /// Valid iff the signature checks out under HS256 and `now < exp`.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp is checked below against the injected clock, with no leeway
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)?.claims;

        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}
