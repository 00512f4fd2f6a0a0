//! Jetswitch API - identity and session server
//!
//! Provides HTTP endpoints for registration, password and Google sign-in,
//! and the session middleware guarding protected routes.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use state::AppState;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI document for the public routes
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::register_handler,
        handlers::auth::login_handler,
        handlers::auth::google_login_handler,
        handlers::auth::google_callback_handler,
        handlers::auth::update_user_type_handler,
        handlers::auth::me_handler,
    ),
    components(schemas(
        auth::RegisterRequest,
        auth::LoginRequest,
        auth::UpdateUserTypeRequest,
        auth::AuthResponse,
        handlers::auth::UserResponse,
        handlers::auth::UpdateUserTypeResponse,
        handlers::health::HealthResponse,
        error::ApiError,
        jetswitch_core::UserPublic,
        jetswitch_core::UserType,
        jetswitch_core::AuthProvider,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Registration, sign-in and profile"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/auth", routes::auth_routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Google code accepted by the test provider
#[cfg(feature = "test-utils")]
pub const TEST_PROVIDER_CODE: &str = "test-code";

/// State backed by an in-memory store and a static identity provider
#[cfg(feature = "test-utils")]
pub fn create_test_state() -> Arc<AppState> {
    use auth::{CredentialHasher, PasswordConfig, ProviderProfile, StaticIdentityProvider};
    use jetswitch_core::{AppConfig, InMemoryUserStore};

    let provider = StaticIdentityProvider::new().with_profile(
        TEST_PROVIDER_CODE,
        ProviderProfile {
            provider_id: "google-test-1".to_string(),
            email: "carol@gmail.com".to_string(),
            name: Some("Carol".to_string()),
            picture: Some("https://lh3.googleusercontent.com/carol".to_string()),
        },
    );

    // Minimal Argon2 cost keeps the suite fast
    let hasher = match CredentialHasher::new(&PasswordConfig {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
        output_len: Some(32),
    }) {
        Ok(hasher) => hasher,
        Err(e) => panic!("test hasher parameters rejected: {e}"),
    };

    Arc::new(AppState::with_hasher(
        AppConfig::default(),
        Arc::new(InMemoryUserStore::new()),
        Arc::new(provider),
        hasher,
    ))
}

/// Router over [`create_test_state`]
#[cfg(feature = "test-utils")]
pub fn create_router_for_testing() -> Router {
    create_router(create_test_state())
}
