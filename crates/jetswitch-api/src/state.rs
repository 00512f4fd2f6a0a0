//! Application state management

use crate::auth::{
    AccountService, CredentialHasher, IdentityProvider, PasswordConfig, PasswordError,
    ProviderLogin, StateTokens, TokenIssuer,
};
use chrono::Duration;
use jetswitch_core::{AppConfig, UserRepository, MAX_STATE_TTL_SECS};
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Registration, login and account lookups
    pub accounts: AccountService,
    /// Session token issuer, shared with the middleware
    pub tokens: Arc<TokenIssuer>,
    /// Identity provider login flow
    pub provider_login: ProviderLogin,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services from configuration and the external collaborators
    pub fn new(
        config: AppConfig,
        users: Arc<dyn UserRepository>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self, PasswordError> {
        let hasher = CredentialHasher::new(&PasswordConfig::from(&config.auth))?;
        Ok(Self::with_hasher(config, users, provider, hasher))
    }

    /// Same as [`AppState::new`] with a prebuilt hasher
    pub fn with_hasher(
        config: AppConfig,
        users: Arc<dyn UserRepository>,
        provider: Arc<dyn IdentityProvider>,
        hasher: CredentialHasher,
    ) -> Self {
        let tokens = Arc::new(TokenIssuer::new(&config.auth));
        let accounts = AccountService::new(
            users,
            Arc::new(hasher),
            tokens.clone(),
            std::time::Duration::from_secs(config.auth.store_timeout_secs),
        );
        let states = StateTokens::new(
            config.auth.jwt_secret.as_bytes(),
            Duration::seconds(config.oauth.state_ttl_secs.clamp(1, MAX_STATE_TTL_SECS)),
        );
        let provider_login = ProviderLogin::new(provider, accounts.clone(), states, &config.oauth);

        Self {
            config,
            accounts,
            tokens,
            provider_login,
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
