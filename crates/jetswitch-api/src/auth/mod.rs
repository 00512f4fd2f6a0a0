//! Authentication and session module
//!
//! This module provides the identity core:
//! - Password hashing with Argon2id
//! - Session token issuance and validation
//! - Account service for registration, login and provider accounts
//! - Identity provider clients and the provider login flow
//! - Middleware for request authentication

pub mod jwt;
pub mod middleware;
pub mod oauth;
pub mod password;
pub mod provider;
pub mod service;

pub use jwt::{Claims, TokenError, TokenIssuer};
pub use middleware::{authorize, parse_bearer, require_session, AuthenticatedUser};
pub use oauth::{
    state_from_cookies, LoginChallenge, ProviderLogin, ProviderLoginOutcome, StateRejection,
    StateTokens, STATE_COOKIE,
};
pub use password::{CredentialHasher, PasswordConfig, PasswordError};
pub use provider::{
    GoogleIdentityProvider, IdentityProvider, ProviderError, ProviderProfile,
};
pub use service::{
    AccountService, AuthResponse, LoginRequest, ProviderAccount, RegisterRequest,
    UpdateUserTypeRequest,
};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::StaticIdentityProvider;
