//! API route definitions

use crate::auth::middleware::require_session;
use crate::handlers::auth;
use crate::state::AppState;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Create the `/api/auth` routes
pub fn auth_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Public routes (no session required)
    let public_routes = Router::new()
        .route("/register", post(auth::register_handler))
        .route("/login", post(auth::login_handler))
        .route("/google", get(auth::google_login_handler))
        .route("/google/callback", get(auth::google_callback_handler));

    // Protected routes (session required)
    let protected_routes = Router::new()
        .route("/me", get(auth::me_handler))
        .route("/update-user-type", post(auth::update_user_type_handler))
        .route_layer(middleware::from_fn_with_state(state, require_session));

    Router::new().merge(public_routes).merge(protected_routes)
}
