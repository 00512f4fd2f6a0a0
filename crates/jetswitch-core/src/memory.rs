//! In-memory user store
//!
//! Mirrors the uniqueness rules of the PostgreSQL schema so services can be
//! exercised without a database. An optional artificial latency lets tests
//! drive the timeout paths.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::users::{RepositoryError, UniqueField, UserRepository};
use crate::{AuthProvider, NewLocalUser, NewProviderUser, User, UserType};

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: Vec<User>,
}

impl Inner {
    /// Constraints are checked in schema order: username, email, provider id
    fn check_unique(
        &self,
        username: &str,
        email: &str,
        provider_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        if self.users.iter().any(|u| u.username == username) {
            return Err(RepositoryError::Duplicate(UniqueField::Username));
        }
        if self.users.iter().any(|u| u.email == email) {
            return Err(RepositoryError::Duplicate(UniqueField::Email));
        }
        if let Some(candidate) = provider_id {
            if self
                .users
                .iter()
                .any(|u| u.provider_id.as_deref() == Some(candidate))
            {
                return Err(RepositoryError::Duplicate(UniqueField::ProviderId));
            }
        }
        Ok(())
    }

    fn push(&mut self, mut user: User) -> User {
        self.next_id += 1;
        user.id = self.next_id;
        self.users.push(user.clone());
        user
    }
}

/// User store backed by a vector behind an async mutex
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    inner: Arc<Mutex<Inner>>,
    latency: Option<Duration>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of stored users
    pub async fn len(&self) -> usize {
        self.inner.lock().await.users.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn find(&self, pred: impl Fn(&User) -> bool) -> Result<User, RepositoryError> {
        self.delay().await;
        let inner = self.inner.lock().await;
        inner
            .users
            .iter()
            .find(|u| pred(u))
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }
}

#[async_trait]
impl UserRepository for InMemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Result<User, RepositoryError> {
        self.find(|u| u.username == username).await
    }

    async fn find_by_id(&self, id: i64) -> Result<User, RepositoryError> {
        self.find(|u| u.id == id).await
    }

    async fn find_by_provider_id(&self, provider_id: &str) -> Result<User, RepositoryError> {
        self.find(|u| u.provider_id.as_deref() == Some(provider_id))
            .await
    }

    async fn insert_local_user(&self, user: NewLocalUser) -> Result<User, RepositoryError> {
        self.delay().await;
        let mut inner = self.inner.lock().await;
        inner.check_unique(&user.username, &user.email, None)?;

        let now = Utc::now();
        Ok(inner.push(User {
            id: 0,
            username: user.username,
            email: user.email,
            credential_secret: Some(user.credential_secret),
            user_type: user.user_type,
            provider_id: None,
            avatar_url: None,
            auth_provider: AuthProvider::Local,
            created_at: now,
            updated_at: now,
        }))
    }

    async fn insert_provider_user(&self, user: NewProviderUser) -> Result<User, RepositoryError> {
        self.delay().await;
        let mut inner = self.inner.lock().await;
        inner.check_unique(&user.username, &user.email, Some(&user.provider_id))?;

        let now = Utc::now();
        Ok(inner.push(User {
            id: 0,
            username: user.username,
            email: user.email,
            credential_secret: None,
            user_type: user.user_type,
            provider_id: Some(user.provider_id),
            avatar_url: user.avatar_url,
            auth_provider: user.provider,
            created_at: now,
            updated_at: now,
        }))
    }

    async fn update_user_type(
        &self,
        id: i64,
        user_type: UserType,
    ) -> Result<User, RepositoryError> {
        self.delay().await;
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(RepositoryError::NotFound)?;

        user.user_type = user_type;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}
