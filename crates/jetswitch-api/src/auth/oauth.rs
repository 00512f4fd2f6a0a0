//! Identity provider login flow
//!
//! The anti-forgery `state` is a short-lived HS256 token with audience
//! `oauth-state` and a random nonce. It is also set as an `HttpOnly` cookie on
//! the browser that starts the login; the callback only accepts a state that
//! matches that cookie, and each nonce is redeemed at most once.

use super::jwt::TokenError;
use super::provider::{IdentityProvider, ProviderError};
use super::service::AccountService;
use crate::error::AppError;
use axum::http::{header, HeaderMap};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jetswitch_core::{OAuthConfig, UserPublic};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Audience of state tokens; session tokens never carry one
pub const STATE_AUDIENCE: &str = "oauth-state";

/// Cookie binding a login state to the browser that started it
pub const STATE_COOKIE: &str = "jetswitch_oauth_state";

/// Covers both `/api/auth/google` and its callback
const STATE_COOKIE_PATH: &str = "/api/auth/google";

const INVALID_STATE: &str = "invalid or expired login state";

#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    aud: String,
    nonce: String,
    iat: i64,
    exp: i64,
}

/// Why a callback `state` was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateRejection {
    #[error("no login state cookie")]
    Unbound,

    #[error("login state does not match cookie")]
    Mismatch,

    #[error("invalid login state: {0}")]
    Invalid(TokenError),

    #[error("login state already used")]
    Replayed,
}

impl StateRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            StateRejection::Unbound => "unbound",
            StateRejection::Mismatch => "mismatch",
            StateRejection::Invalid(e) => e.reason(),
            StateRejection::Replayed => "replayed",
        }
    }
}

/// Signs, verifies and redeems login `state` values
#[derive(Clone)]
pub struct StateTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    /// Redeemed nonces with their expiry
    redeemed: Arc<Mutex<HashMap<String, i64>>>,
}

impl StateTokens {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
            redeemed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self) -> Result<String, TokenError> {
        self.issue_at(Utc::now())
    }

    pub fn issue_at(&self, at: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = StateClaims {
            aud: STATE_AUDIENCE.to_string(),
            nonce: generate_nonce(),
            iat: at.timestamp(),
            exp: (at + self.ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn verify(&self, state: &str) -> Result<(), TokenError> {
        self.verify_at(state, Utc::now())
    }

    pub fn verify_at(&self, state: &str, now: DateTime<Utc>) -> Result<(), TokenError> {
        self.decode_at(state, now).map(|_| ())
    }

    /// Verify `state` and mark its nonce as used
    pub fn redeem(&self, state: &str) -> Result<(), StateRejection> {
        self.redeem_at(state, Utc::now())
    }

    pub fn redeem_at(&self, state: &str, now: DateTime<Utc>) -> Result<(), StateRejection> {
        let claims = self.decode_at(state, now).map_err(StateRejection::Invalid)?;

        let mut redeemed = self
            .redeemed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Expired nonces can no longer verify, so they need no tracking
        redeemed.retain(|_, exp| *exp > now.timestamp());

        if redeemed.contains_key(&claims.nonce) {
            return Err(StateRejection::Replayed);
        }
        redeemed.insert(claims.nonce, claims.exp);

        Ok(())
    }

    fn decode_at(&self, state: &str, now: DateTime<Utc>) -> Result<StateClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_audience(&[STATE_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "aud"]);

        let claims = decode::<StateClaims>(state, &self.decoding, &validation)?.claims;

        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

/// Random 256-bit nonce, URL-safe
fn generate_nonce() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Login state carried by the `Cookie` header, if any
pub fn state_from_cookies(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == STATE_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Consent screen redirect and the state it carries
#[derive(Debug, Clone)]
pub struct LoginChallenge {
    pub authorization_url: String,
    pub state: String,
}

/// Completed provider login
#[derive(Debug, Clone)]
pub struct ProviderLoginOutcome {
    pub user: UserPublic,
    pub token: String,
    pub is_new: bool,
}

/// Drives the authorization-code flow against one identity provider
#[derive(Clone)]
pub struct ProviderLogin {
    provider: Arc<dyn IdentityProvider>,
    accounts: AccountService,
    states: StateTokens,
    timeout: std::time::Duration,
    frontend_url: String,
    token_in_fragment: bool,
}

impl ProviderLogin {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        accounts: AccountService,
        states: StateTokens,
        config: &OAuthConfig,
    ) -> Self {
        Self {
            provider,
            accounts,
            states,
            timeout: std::time::Duration::from_secs(config.timeout_secs),
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
            token_in_fragment: config.token_in_fragment,
        }
    }

    /// Short provider name for logs
    pub fn provider_name(&self) -> &'static str {
        self.provider.provider().as_str()
    }

    /// Consent screen URL with a fresh state
    pub async fn begin(&self) -> Result<LoginChallenge, AppError> {
        let state = self.states.issue()?;
        let authorization_url = self.provider.authorization_url(&state)?;

        Ok(LoginChallenge {
            authorization_url,
            state,
        })
    }

    /// `Set-Cookie` value binding `state` to the browser
    pub fn state_cookie(&self, state: &str) -> String {
        format!(
            "{STATE_COOKIE}={state}; Path={STATE_COOKIE_PATH}; Max-Age={}; HttpOnly; Secure; SameSite=Lax",
            self.states.ttl().num_seconds()
        )
    }

    /// `Set-Cookie` value removing the state cookie
    pub fn clear_state_cookie() -> String {
        format!("{STATE_COOKIE}=; Path={STATE_COOKIE_PATH}; Max-Age=0; HttpOnly; Secure; SameSite=Lax")
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ProviderError::Timeout)?
    }

    fn check_state(&self, state: &str, bound_state: Option<&str>) -> Result<(), StateRejection> {
        match bound_state {
            None => return Err(StateRejection::Unbound),
            Some(bound) if bound != state => return Err(StateRejection::Mismatch),
            Some(_) => {}
        }
        self.states.redeem(state)
    }

    /// Verify the state against the browser's cookie, exchange the code and
    /// sign the user in
    pub async fn complete(
        &self,
        code: &str,
        state: &str,
        bound_state: Option<&str>,
    ) -> Result<ProviderLoginOutcome, AppError> {
        self.check_state(state, bound_state).map_err(|e| {
            tracing::debug!(reason = e.reason(), "Rejected login state");
            AppError::validation(INVALID_STATE)
        })?;

        if code.is_empty() {
            return Err(AppError::validation("missing authorization code"));
        }

        let access_token = self.bounded(self.provider.exchange_code(code)).await?;
        let profile = self.bounded(self.provider.fetch_profile(&access_token)).await?;

        let account = self
            .accounts
            .find_or_create_by_provider(self.provider.provider(), &profile, None)
            .await?;

        let session =
            self.accounts
                .issue_session(account.user, "Login successful", Some(account.is_new))?;

        Ok(ProviderLoginOutcome {
            user: session.user,
            token: session.token,
            is_new: account.is_new,
        })
    }

    /// Frontend location that receives the session token
    ///
    /// New users pick a user type first; returning users go straight to the
    /// callback page.
    pub fn frontend_redirect(&self, outcome: &ProviderLoginOutcome) -> String {
        let page = if outcome.is_new {
            "select-user-type"
        } else {
            "auth/callback"
        };
        let separator = if self.token_in_fragment { '#' } else { '?' };

        format!(
            "{}/{page}{separator}token={}",
            self.frontend_url, outcome.token
        )
    }
}
