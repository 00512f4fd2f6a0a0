//! Identity provider clients
//!
//! Exchanges an OAuth 2.0 authorization code for an access token and fetches
//! the remote profile. Google is the only production provider; a static
//! provider backs tests.

use async_trait::async_trait;
use jetswitch_core::{AuthProvider, OAuthConfig};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Scopes requested from Google
pub const GOOGLE_SCOPES: &str = "openid email profile";

/// Identity provider errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider client misconfigured: {0}")]
    Config(String),

    #[error("Provider request failed: {0}")]
    Transport(String),

    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider denied the login: {0}")]
    Denied(String),
}

impl ProviderError {
    fn from_reqwest(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Transport(format!("{context}: {err}"))
        }
    }
}

/// Remote account profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Stable account identifier at the provider
    pub provider_id: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Third-party identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn provider(&self) -> AuthProvider;

    /// Consent screen URL carrying the anti-forgery `state`
    fn authorization_url(&self, state: &str) -> Result<String, ProviderError>;

    /// Exchange an authorization code for an access token
    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError>;
}

// ============================================================================
// Google
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Google v2 userinfo payload
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct GoogleUserInfo {
    id: Option<String>,
    email: Option<String>,
    verified_email: Option<bool>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

impl TryFrom<GoogleUserInfo> for ProviderProfile {
    type Error = ProviderError;

    fn try_from(info: GoogleUserInfo) -> Result<Self, Self::Error> {
        let provider_id = info
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("profile has no id".to_string()))?;
        let email = info
            .email
            .filter(|email| !email.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("profile has no email".to_string()))?;

        Ok(ProviderProfile {
            provider_id,
            email,
            name: info.name.filter(|n| !n.is_empty()),
            picture: info.picture.filter(|p| !p.is_empty()),
        })
    }
}

/// Google OAuth 2.0 client
pub struct GoogleIdentityProvider {
    client: Client,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
}

impl GoogleIdentityProvider {
    /// Create from config
    pub fn new(config: &OAuthConfig) -> Result<Self, ProviderError> {
        Self::with_timeout(config, Duration::from_secs(config.timeout_secs))
    }

    /// Create from config with an explicit per-request timeout
    pub fn with_timeout(config: &OAuthConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        Ok(Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
            auth_url: config.auth_url.clone(),
            token_url: config.token_url.clone(),
            userinfo_url: config.userinfo_url.clone(),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    fn provider(&self) -> AuthProvider {
        AuthProvider::Google
    }

    fn authorization_url(&self, state: &str) -> Result<String, ProviderError> {
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", GOOGLE_SCOPES),
                ("access_type", "offline"),
                ("state", state),
            ],
        )
        .map_err(|e| ProviderError::Config(format!("invalid auth url: {e}")))?;

        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest("token exchange", e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("token response: {e}")))?;

        if token.access_token.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "empty access token".to_string(),
            ));
        }

        Ok(token.access_token)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest("userinfo", e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let info: GoogleUserInfo = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("userinfo: {e}")))?;

        info.try_into()
    }
}

// ============================================================================
// Static provider (tests)
// ============================================================================

/// Provider answering from a fixed code-to-profile table
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    profiles: std::collections::HashMap<String, ProviderProfile>,
}

#[cfg(any(test, feature = "test-utils"))]
impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `code` and resolve it to `profile`
    pub fn with_profile(mut self, code: impl Into<String>, profile: ProviderProfile) -> Self {
        self.profiles.insert(code.into(), profile);
        self
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn provider(&self) -> AuthProvider {
        AuthProvider::Google
    }

    fn authorization_url(&self, state: &str) -> Result<String, ProviderError> {
        Url::parse_with_params("https://provider.test/auth", &[("state", state)])
            .map(Into::into)
            .map_err(|e| ProviderError::Config(e.to_string()))
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        if self.profiles.contains_key(code) {
            Ok(format!("access-{code}"))
        } else {
            Err(ProviderError::Status {
                status: 400,
                body: "invalid_grant".to_string(),
            })
        }
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        access_token
            .strip_prefix("access-")
            .and_then(|code| self.profiles.get(code))
            .cloned()
            .ok_or(ProviderError::Status {
                status: 401,
                body: "invalid_token".to_string(),
            })
    }
}
