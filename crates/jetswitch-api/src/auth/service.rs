//! Account service layer
//!
//! Registration, password login, identity-provider find-or-create and user
//! type changes. Works against any [`UserRepository`]; every store call is
//! bounded by the configured store timeout.

use super::jwt::TokenIssuer;
use super::password::CredentialHasher;
use super::provider::ProviderProfile;
use crate::error::AppError;
use jetswitch_core::{
    AuthProvider, NewLocalUser, NewProviderUser, RepositoryError, UniqueField, User, UserPublic,
    UserRepository, UserType,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

/// Generic failure for unknown users and wrong passwords
pub const INVALID_CREDENTIALS: &str = "invalid username or password";

/// Username candidates tried for a new provider account
const MAX_USERNAME_CANDIDATES: usize = 5;

/// Local registration request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    /// `listener` or `artist`
    pub user_type: String,
}

/// Password login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// User type change request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateUserTypeRequest {
    /// `listener` or `artist`
    pub user_type: String,
}

/// Session token with the user it was issued for
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserPublic,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_new_user: Option<bool>,
}

/// Result of a provider find-or-create
#[derive(Debug, Clone)]
pub struct ProviderAccount {
    pub user: UserPublic,
    /// Whether this call created the account
    pub is_new: bool,
}

/// Account service
#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserRepository>,
    hasher: Arc<CredentialHasher>,
    tokens: Arc<TokenIssuer>,
    store_timeout: Duration,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        hasher: Arc<CredentialHasher>,
        tokens: Arc<TokenIssuer>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            users,
            hasher,
            tokens,
            store_timeout,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Run a store call under the store timeout
    async fn store<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, RepositoryError>>,
    ) -> Result<T, RepositoryError> {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| RepositoryError::Timeout(operation.to_string()))?
    }

    /// Register a local account
    ///
    /// Uniqueness is left to the store: a concurrent registration of the same
    /// username fails on insert rather than on a pre-check.
    pub async fn register(&self, request: RegisterRequest) -> Result<UserPublic, AppError> {
        if request.username.trim().is_empty()
            || request.email.trim().is_empty()
            || request.password.is_empty()
            || request.user_type.is_empty()
        {
            return Err(AppError::validation("all fields are required"));
        }

        if !request.email.contains('@') {
            return Err(AppError::validation("invalid email format"));
        }

        if request.password != request.confirm_password {
            return Err(AppError::validation("passwords do not match"));
        }

        let user_type: UserType = request
            .user_type
            .parse()
            .map_err(|_| AppError::validation("invalid user type"))?;

        let credential_secret = self.hasher.hash(&request.password).await?;

        let user = self
            .store(
                "insert_local_user",
                self.users.insert_local_user(NewLocalUser {
                    username: request.username,
                    email: request.email,
                    credential_secret,
                    user_type,
                }),
            )
            .await?;

        tracing::debug!(user_id = user.id, "Local account created");
        Ok(user.into())
    }

    /// Verify a username and password
    ///
    /// Unknown users, wrong passwords and local accounts without a secret all
    /// fail with the same message after the same amount of hashing work.
    pub async fn login(&self, request: LoginRequest) -> Result<UserPublic, AppError> {
        let user = match self
            .store("find_by_username", self.users.find_by_username(&request.username))
            .await
        {
            Ok(user) => user,
            Err(RepositoryError::NotFound) => {
                self.hasher.burn(&request.password).await;
                return Err(AppError::authentication(INVALID_CREDENTIALS));
            }
            Err(e) => return Err(e.into()),
        };

        if !user.is_local() {
            return Err(AppError::authentication(format!(
                "this account uses {name} sign-in. Please use 'Login with {name}'",
                name = user.auth_provider.display_name()
            )));
        }

        let verified = match user.credential_secret.as_deref() {
            Some(secret) => self.hasher.verify(&request.password, secret).await,
            None => {
                self.hasher.burn(&request.password).await;
                false
            }
        };

        if !verified {
            return Err(AppError::authentication(INVALID_CREDENTIALS));
        }

        Ok(user.into())
    }

    /// Resolve a provider profile to an account, creating one on first login
    ///
    /// Accounts are matched on the provider id only; an existing account with
    /// the same email is never linked implicitly.
    pub async fn find_or_create_by_provider(
        &self,
        provider: AuthProvider,
        profile: &ProviderProfile,
        requested_user_type: Option<UserType>,
    ) -> Result<ProviderAccount, AppError> {
        if let Some(user) = self.existing_provider_user(&profile.provider_id).await? {
            return Ok(ProviderAccount {
                user: user.into(),
                is_new: false,
            });
        }

        let base = username_from_email(&profile.email);
        let user_type = requested_user_type.unwrap_or_default();

        for attempt in 0..MAX_USERNAME_CANDIDATES {
            let username = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}{}", attempt + 1)
            };

            let inserted = self
                .store(
                    "insert_provider_user",
                    self.users.insert_provider_user(NewProviderUser {
                        username,
                        email: profile.email.clone(),
                        provider,
                        provider_id: profile.provider_id.clone(),
                        avatar_url: profile.picture.clone(),
                        user_type,
                    }),
                )
                .await;

            match inserted {
                Ok(user) => {
                    tracing::debug!(user_id = user.id, %provider, "Provider account created");
                    return Ok(ProviderAccount {
                        user: user.into(),
                        is_new: true,
                    });
                }
                Err(RepositoryError::Duplicate(field)) => {
                    // A concurrent first login may win on any key, since
                    // username and email are checked before the provider id
                    if let Some(user) = self.existing_provider_user(&profile.provider_id).await? {
                        tracing::debug!(
                            user_id = user.id,
                            ?field,
                            "Provider account created concurrently"
                        );
                        return Ok(ProviderAccount {
                            user: user.into(),
                            is_new: false,
                        });
                    }
                    if field != UniqueField::Username {
                        return Err(RepositoryError::Duplicate(field).into());
                    }
                    tracing::debug!(attempt, "Username taken, trying next candidate");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Duplicate("username already taken".to_string()))
    }

    async fn existing_provider_user(
        &self,
        provider_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        match self
            .store("find_by_provider_id", self.users.find_by_provider_id(provider_id))
            .await
        {
            Ok(user) => Ok(Some(user)),
            Err(RepositoryError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Change the user type of an existing account
    pub async fn update_user_type(
        &self,
        user_id: i64,
        user_type: &str,
    ) -> Result<UserPublic, AppError> {
        let user_type: UserType = user_type
            .parse()
            .map_err(|_| AppError::validation("invalid user type"))?;

        let user = self
            .store(
                "update_user_type",
                self.users.update_user_type(user_id, user_type),
            )
            .await?;

        Ok(user.into())
    }

    /// Get a user by id
    pub async fn get_user(&self, user_id: i64) -> Result<UserPublic, AppError> {
        let user = self
            .store("find_by_id", self.users.find_by_id(user_id))
            .await?;
        Ok(user.into())
    }

    /// Issue a session token for `user`
    pub fn issue_session(
        &self,
        user: UserPublic,
        message: impl Into<String>,
        is_new_user: Option<bool>,
    ) -> Result<AuthResponse, AppError> {
        let token = self.tokens.issue(user.id, &user.username)?;

        Ok(AuthResponse {
            token,
            user,
            message: message.into(),
            is_new_user,
        })
    }
}

/// Derive a username from the local part of an email address
pub fn username_from_email(email: &str) -> String {
    let local = match email.split_once('@') {
        Some((local, _)) => local,
        None => email,
    };

    if local.is_empty() {
        "user".to_string()
    } else {
        local.to_string()
    }
}
