//! User storage
//!
//! Provides the [`UserRepository`] trait consumed by the account service and a
//! PostgreSQL implementation using SQLx. Uniqueness of usernames, emails and
//! provider identifiers is enforced by the schema; violations surface as
//! [`RepositoryError::Duplicate`] naming the offending column.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::{AuthProvider, NewLocalUser, NewProviderUser, User, UserType};

/// Column protected by a uniqueness constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
    ProviderId,
}

impl UniqueField {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueField::Username => "username",
            UniqueField::Email => "email",
            UniqueField::ProviderId => "provider_id",
        }
    }
}

impl std::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("User not found")]
    NotFound,

    #[error("Duplicate value for {0}")]
    Duplicate(UniqueField),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Database operation timed out: {0}")]
    Timeout(String),

    #[error("Corrupt user record: {0}")]
    Corrupt(String),
}

/// Durable store of user accounts
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<User, RepositoryError>;

    async fn find_by_id(&self, id: i64) -> Result<User, RepositoryError>;

    async fn find_by_provider_id(&self, provider_id: &str) -> Result<User, RepositoryError>;

    /// Insert a password account; the store assigns `id` and timestamps
    async fn insert_local_user(&self, user: NewLocalUser) -> Result<User, RepositoryError>;

    /// Insert an account linked to an identity provider
    async fn insert_provider_user(&self, user: NewProviderUser) -> Result<User, RepositoryError>;

    /// Change the user type and refresh `updated_at`
    async fn update_user_type(&self, id: i64, user_type: UserType)
        -> Result<User, RepositoryError>;
}

const USER_COLUMNS: &str = "id, username, email, password_hash, user_type, google_id, \
     avatar_url, auth_provider, created_at, updated_at";

/// User row from database
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_hash: Option<String>,
    user_type: String,
    google_id: Option<String>,
    avatar_url: Option<String>,
    auth_provider: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let user_type = row
            .user_type
            .parse()
            .map_err(|e| RepositoryError::Corrupt(format!("user {}: {e}", row.id)))?;
        let auth_provider = row
            .auth_provider
            .parse()
            .map_err(|e| RepositoryError::Corrupt(format!("user {}: {e}", row.id)))?;

        Ok(User {
            id: row.id,
            username: row.username,
            email: row.email,
            credential_secret: row.password_hash,
            user_type,
            provider_id: row.google_id,
            avatar_url: row.avatar_url,
            auth_provider,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Map a unique-constraint name to the column it protects
fn unique_field_for(constraint: Option<&str>) -> Option<UniqueField> {
    match constraint? {
        "users_username_key" => Some(UniqueField::Username),
        "users_email_key" => Some(UniqueField::Email),
        "users_google_id_key" => Some(UniqueField::ProviderId),
        _ => None,
    }
}

fn map_sqlx_error(context: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::PoolTimedOut => RepositoryError::Timeout(context.to_string()),
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            match unique_field_for(db.constraint()) {
                Some(field) => RepositoryError::Duplicate(field),
                None => RepositoryError::Database(format!("{context}: {err}")),
            }
        }
        other => RepositoryError::Database(format!("{context}: {other}")),
    }
}

/// PostgreSQL user store
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Create a new store with its own connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres_pool_size)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| RepositoryError::Database(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Migration failed: {e}")))
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> Result<User, RepositoryError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let row: Option<UserRow> = sqlx::query_as(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to find user", e))?;

        row.ok_or(RepositoryError::NotFound)?.try_into()
    }
}

#[async_trait]
impl UserRepository for PgUserStore {
    async fn find_by_username(&self, username: &str) -> Result<User, RepositoryError> {
        self.fetch_one_by("username", username).await
    }

    async fn find_by_id(&self, id: i64) -> Result<User, RepositoryError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row: Option<UserRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to find user", e))?;

        row.ok_or(RepositoryError::NotFound)?.try_into()
    }

    async fn find_by_provider_id(&self, provider_id: &str) -> Result<User, RepositoryError> {
        self.fetch_one_by("google_id", provider_id).await
    }

    async fn insert_local_user(&self, user: NewLocalUser) -> Result<User, RepositoryError> {
        let query = format!(
            "INSERT INTO users (username, email, password_hash, user_type, auth_provider) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {USER_COLUMNS}"
        );
        let row: UserRow = sqlx::query_as(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.credential_secret)
            .bind(user.user_type.as_str())
            .bind(AuthProvider::Local.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to create user", e))?;

        row.try_into()
    }

    async fn insert_provider_user(&self, user: NewProviderUser) -> Result<User, RepositoryError> {
        let query = format!(
            "INSERT INTO users (username, email, user_type, google_id, avatar_url, auth_provider) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {USER_COLUMNS}"
        );
        let row: UserRow = sqlx::query_as(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(user.user_type.as_str())
            .bind(&user.provider_id)
            .bind(&user.avatar_url)
            .bind(user.provider.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to create user", e))?;

        row.try_into()
    }

    async fn update_user_type(
        &self,
        id: i64,
        user_type: UserType,
    ) -> Result<User, RepositoryError> {
        let query = format!(
            "UPDATE users SET user_type = $2, updated_at = NOW() WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        let row: Option<UserRow> = sqlx::query_as(&query)
            .bind(id)
            .bind(user_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to update user type", e))?;

        row.ok_or(RepositoryError::NotFound)?.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> UserRow {
        let now = Utc::now();
        UserRow {
            id: 3,
            username: "bob".to_string(),
            email: "bob@x.com".to_string(),
            password_hash: None,
            user_type: "artist".to_string(),
            google_id: Some("g-123".to_string()),
            avatar_url: Some("https://cdn.example/bob.png".to_string()),
            auth_provider: "google".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_conversion() {
        let user = User::try_from(row()).unwrap();
        assert_eq!(user.user_type, UserType::Artist);
        assert_eq!(user.auth_provider, AuthProvider::Google);
        assert_eq!(user.provider_id.as_deref(), Some("g-123"));
        assert!(user.credential_secret.is_none());
    }

    #[test]
    fn test_row_conversion_rejects_unknown_user_type() {
        let mut bad = row();
        bad.user_type = "dj".to_string();
        assert!(matches!(
            User::try_from(bad),
            Err(RepositoryError::Corrupt(_))
        ));
    }

    #[test]
    fn test_unique_field_for_constraint() {
        assert_eq!(
            unique_field_for(Some("users_username_key")),
            Some(UniqueField::Username)
        );
        assert_eq!(
            unique_field_for(Some("users_email_key")),
            Some(UniqueField::Email)
        );
        assert_eq!(
            unique_field_for(Some("users_google_id_key")),
            Some(UniqueField::ProviderId)
        );
        assert_eq!(unique_field_for(Some("users_pkey")), None);
        assert_eq!(unique_field_for(None), None);
    }

    #[test]
    fn test_map_row_not_found() {
        assert!(matches!(
            map_sqlx_error("lookup", sqlx::Error::RowNotFound),
            RepositoryError::NotFound
        ));
        assert!(matches!(
            map_sqlx_error("lookup", sqlx::Error::PoolTimedOut),
            RepositoryError::Timeout(_)
        ));
    }

    async fn test_store() -> PgUserStore {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| DatabaseConfig::default().postgres_url);
        let config = DatabaseConfig {
            postgres_url: url,
            ..Default::default()
        };
        let store = PgUserStore::connect(&config).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn unique_suffix() -> String {
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_pg_insert_and_duplicate_username() {
        let store = test_store().await;
        let suffix = unique_suffix();
        let username = format!("pg_alice_{suffix}");

        let created = store
            .insert_local_user(NewLocalUser {
                username: username.clone(),
                email: format!("{username}@x.com"),
                credential_secret: "$argon2id$v=19$m=8,t=1,p=1$c2FsdA$aGFzaA".to_string(),
                user_type: UserType::Listener,
            })
            .await
            .unwrap();
        assert!(created.is_local());

        let found = store.find_by_username(&username).await.unwrap();
        assert_eq!(found.id, created.id);

        let duplicate = store
            .insert_local_user(NewLocalUser {
                username: username.clone(),
                email: format!("other_{suffix}@x.com"),
                credential_secret: "$argon2id$v=19$m=8,t=1,p=1$c2FsdA$aGFzaA".to_string(),
                user_type: UserType::Listener,
            })
            .await;
        assert!(matches!(
            duplicate,
            Err(RepositoryError::Duplicate(UniqueField::Username))
        ));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_pg_provider_user_and_update_type() {
        let store = test_store().await;
        let suffix = unique_suffix();

        let created = store
            .insert_provider_user(NewProviderUser {
                username: format!("pg_bob_{suffix}"),
                email: format!("pg_bob_{suffix}@x.com"),
                provider: AuthProvider::Google,
                provider_id: format!("g-{suffix}"),
                avatar_url: None,
                user_type: UserType::Listener,
            })
            .await
            .unwrap();

        let found = store
            .find_by_provider_id(&format!("g-{suffix}"))
            .await
            .unwrap();
        assert_eq!(found.id, created.id);

        let updated = store
            .update_user_type(created.id, UserType::Artist)
            .await
            .unwrap();
        assert_eq!(updated.user_type, UserType::Artist);
        assert!(updated.updated_at >= created.updated_at);

        assert!(matches!(
            store.update_user_type(-1, UserType::Artist).await,
            Err(RepositoryError::NotFound)
        ));
    }
}
