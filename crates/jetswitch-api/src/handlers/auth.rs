//! Authentication API handlers
//!
//! Provides HTTP endpoints for registration, password and Google login, and
//! profile management.

use crate::audit::{audit_log, AuditEvent, ClientInfo};
use crate::auth::{
    state_from_cookies, AuthenticatedUser, LoginRequest, ProviderLogin, RegisterRequest,
    UpdateUserTypeRequest,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use jetswitch_core::UserPublic;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

/// Current user response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub user: UserPublic,
}

/// User type change response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateUserTypeResponse {
    pub message: String,
    pub user: UserPublic,
}

/// Query parameters Google sends to the callback
#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set when the user denied consent
    pub error: Option<String>,
}

/// Register a new local account
///
/// # Request Body
///
/// * `username` - Unique login name
/// * `email` - Unique email address
/// * `password` / `confirm_password` - Must match
/// * `user_type` - `listener` or `artist`
#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered successfully", body = crate::auth::AuthResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Username or email taken", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = ClientInfo::from_headers(&headers);
    let username = request.username.clone();

    let user = match state.accounts.register(request).await {
        Ok(user) => user,
        Err(e) => {
            audit_log(&AuditEvent::RegistrationFailure {
                username,
                reason: e.to_string(),
                ip_address: client.ip_address,
                user_agent: client.user_agent,
            });
            return Err(e);
        }
    };

    audit_log(&AuditEvent::RegistrationSuccess {
        user_id: user.id,
        username: user.username.clone(),
        user_type: user.user_type.to_string(),
        ip_address: client.ip_address,
        user_agent: client.user_agent,
    });

    let response = state
        .accounts
        .issue_session(user, "User registered successfully", None)?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Login with username and password
///
/// Accounts created through Google sign-in cannot log in here.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = crate::auth::AuthResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = ClientInfo::from_headers(&headers);
    let username = request.username.clone();

    let user = match state.accounts.login(request).await {
        Ok(user) => user,
        Err(e) => {
            audit_log(&AuditEvent::LoginFailure {
                username,
                reason: e.to_string(),
                ip_address: client.ip_address,
                user_agent: client.user_agent,
            });
            return Err(e);
        }
    };

    audit_log(&AuditEvent::LoginSuccess {
        user_id: user.id,
        username: user.username.clone(),
        ip_address: client.ip_address,
        user_agent: client.user_agent,
    });

    let response = state.accounts.issue_session(user, "Login successful", None)?;

    Ok(Json(response))
}

/// Start Google sign-in
///
/// Redirects to the Google consent screen with a signed, short-lived state and
/// sets the same state as an `HttpOnly` cookie for the callback to match.
#[utoipa::path(
    get,
    path = "/api/auth/google",
    tag = "auth",
    responses(
        (status = 303, description = "Redirect to Google consent screen"),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn google_login_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let challenge = state.provider_login.begin().await?;
    let cookie = state.provider_login.state_cookie(&challenge.state);

    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::to(&challenge.authorization_url),
    ))
}

/// Google sign-in callback
///
/// Verifies the state against the login cookie, exchanges the code and
/// redirects to the frontend with the session token. New accounts land on the
/// user type selection page. The login cookie is cleared on every outcome.
#[utoipa::path(
    get,
    path = "/api/auth/google/callback",
    tag = "auth",
    params(CallbackParams),
    responses(
        (status = 303, description = "Redirect to the frontend with a session token"),
        (status = 400, description = "Invalid or expired state", body = crate::error::ApiError),
        (status = 502, description = "Google request failed", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn google_callback_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let client = ClientInfo::from_headers(&headers);
    let provider = state.provider_login.provider_name();
    let clear_cookie = [(header::SET_COOKIE, ProviderLogin::clear_state_cookie())];

    let result = match params.error {
        Some(error) => Err(AppError::Upstream(format!("provider returned error: {error}"))),
        None => {
            state
                .provider_login
                .complete(
                    params.code.as_deref().unwrap_or_default(),
                    params.state.as_deref().unwrap_or_default(),
                    state_from_cookies(&headers),
                )
                .await
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            audit_log(&AuditEvent::ProviderLoginFailure {
                provider: provider.to_string(),
                reason: e.to_string(),
                ip_address: client.ip_address,
                user_agent: client.user_agent,
            });
            return (clear_cookie, e).into_response();
        }
    };

    audit_log(&AuditEvent::ProviderLogin {
        user_id: outcome.user.id,
        provider: provider.to_string(),
        is_new_user: outcome.is_new,
        ip_address: client.ip_address,
        user_agent: client.user_agent,
    });

    (
        clear_cookie,
        Redirect::to(&state.provider_login.frontend_redirect(&outcome)),
    )
        .into_response()
}

/// Change the user type of the signed-in user
#[utoipa::path(
    post,
    path = "/api/auth/update-user-type",
    tag = "auth",
    request_body = UpdateUserTypeRequest,
    responses(
        (status = 200, description = "User type updated", body = UpdateUserTypeResponse),
        (status = 400, description = "Invalid user type", body = crate::error::ApiError),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn update_user_type_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<UpdateUserTypeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let updated = state
        .accounts
        .update_user_type(user.user_id, &request.user_type)
        .await?;

    audit_log(&AuditEvent::UserTypeChanged {
        user_id: updated.id,
        user_type: updated.user_type.to_string(),
        ip_address: ClientInfo::from_headers(&headers).ip_address,
    });

    Ok(Json(UpdateUserTypeResponse {
        message: "User type updated successfully".to_string(),
        user: updated,
    }))
}

/// Get current user profile
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.accounts.get_user(user.user_id).await?;
    Ok(Json(UserResponse { user }))
}
