/// Session middleware for protecting routes
///
/// Extracts and validates the session token from the Authorization header.
/// On success, adds the authenticated identity to request extensions.
use super::jwt::{Claims, TokenError, TokenIssuer};
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Authenticated identity extracted from a session token
///
/// Added to request extensions by [`require_session`]; handlers take it as
/// `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub username: String,
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username,
        }
    }
}

/// Extract the token from a `Bearer <token>` header value
///
/// Exactly one space after the scheme; the token must be non-empty and free
/// of whitespace.
pub fn parse_bearer(value: &str) -> Result<&str, TokenError> {
    let token = value.strip_prefix("Bearer ").ok_or(TokenError::Malformed)?;

    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return Err(TokenError::Malformed);
    }

    Ok(token)
}

/// Validate the Authorization header of a request
pub fn authorize(tokens: &TokenIssuer, headers: &HeaderMap) -> Result<AuthenticatedUser, TokenError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(TokenError::Malformed)?
        .to_str()
        .map_err(|_| TokenError::Malformed)?;

    let token = parse_bearer(value)?;
    let claims = tokens.validate(token)?;

    Ok(claims.into())
}

/// Middleware that requires a valid session token
///
/// # Usage
///
/// ```ignore
/// use axum::{middleware, routing::get, Router};
/// use jetswitch_api::auth::middleware::require_session;
///
/// let app = Router::new()
///     .route("/api/auth/me", get(me_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), require_session));
/// ```
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = match authorize(&state.tokens, request.headers()) {
        Ok(user) => user,
        Err(e) => {
            audit_log(&AuditEvent::InvalidToken {
                ip_address: extract_ip_address(request.headers()),
                user_agent: extract_user_agent(request.headers()),
                reason: e.reason().to_string(),
            });
            return Err(AppError::Token(e));
        }
    };

    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
