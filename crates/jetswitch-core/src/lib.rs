//! Jetswitch Core - Domain models, configuration and user storage
//!
//! This crate defines the core abstractions shared by the Jetswitch services:
//! - User account model (listener/artist, local/provider accounts)
//! - Configuration management
//! - The user repository trait and its PostgreSQL implementation
//! - An in-memory repository for tests (feature `test-utils`)

pub mod config;
pub mod users;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, LoggingConfig, OAuthConfig, ServerConfig,
    MAX_STATE_TTL_SECS, MAX_TOKEN_TTL_DAYS,
};
pub use users::{PgUserStore, RepositoryError, UniqueField, UserRepository};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryUserStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

// ============================================================================
// Enumerations
// ============================================================================

/// Error returned when parsing an enumerated account attribute
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Application-level capability class of a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    #[default]
    Listener,
    Artist,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Listener => "listener",
            UserType::Artist => "artist",
        }
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listener" => Ok(UserType::Listener),
            "artist" => Ok(UserType::Artist),
            _ => Err(ParseEnumError {
                kind: "user type",
                value: s.to_string(),
            }),
        }
    }
}

/// Credential path an account was created with
///
/// Local accounts log in with a password; provider accounts only through
/// their identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Local,
    Google,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Local => "local",
            AuthProvider::Google => "google",
        }
    }

    /// Human-readable provider name used in user-facing messages
    pub fn display_name(&self) -> &'static str {
        match self {
            AuthProvider::Local => "password",
            AuthProvider::Google => "Google",
        }
    }
}

impl std::fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthProvider {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(AuthProvider::Local),
            "google" => Ok(AuthProvider::Google),
            _ => Err(ParseEnumError {
                kind: "auth provider",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// User Accounts
// ============================================================================

/// Stored user account
///
/// `credential_secret` is never serialized; use [`User::to_public`] for
/// anything that leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Identifier assigned by the store
    pub id: i64,

    /// Unique local-login key
    pub username: String,

    /// Unique email address
    pub email: String,

    /// Argon2id PHC string, present only for local accounts
    #[serde(skip_serializing, default)]
    pub credential_secret: Option<String>,

    pub user_type: UserType,

    /// Identifier of the linked third-party account
    pub provider_id: Option<String>,

    pub avatar_url: Option<String>,

    pub auth_provider: AuthProvider,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether password login is allowed for this account
    pub fn is_local(&self) -> bool {
        self.auth_provider == AuthProvider::Local
    }

    /// Convert user to public representation (without the credential secret)
    pub fn to_public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            user_type: self.user_type,
            provider_id: self.provider_id.clone(),
            avatar_url: self.avatar_url.clone(),
            auth_provider: self.auth_provider,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl From<User> for UserPublic {
    fn from(user: User) -> Self {
        UserPublic {
            id: user.id,
            username: user.username,
            email: user.email,
            user_type: user.user_type,
            provider_id: user.provider_id,
            avatar_url: user.avatar_url,
            auth_provider: user.auth_provider,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Public user representation (safe for API responses)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserPublic {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub user_type: UserType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub auth_provider: AuthProvider,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a password account
#[derive(Debug, Clone)]
pub struct NewLocalUser {
    pub username: String,
    pub email: String,
    pub credential_secret: String,
    pub user_type: UserType,
}

/// Insert payload for an account linked to an identity provider
#[derive(Debug, Clone)]
pub struct NewProviderUser {
    pub username: String,
    pub email: String,
    pub provider: AuthProvider,
    pub provider_id: String,
    pub avatar_url: Option<String>,
    pub user_type: UserType,
}
