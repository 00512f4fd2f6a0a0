//! Jetswitch API Server
//!
//! Identity and session server for the Jetswitch web application.

use anyhow::Context;
use jetswitch_api::auth::GoogleIdentityProvider;
use jetswitch_api::{create_router, state::AppState};
use jetswitch_core::{AppConfig, PgUserStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Load configuration
    let config = match std::env::var("JETSWITCH_CONFIG") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "jetswitch_api={level},jetswitch_core={level},audit=info,tower_http=info",
            level = config.logging.level
        )
        .into()
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.logging.include_location)
        .with_line_number(config.logging.include_location);
    if config.logging.json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    config.validate()?;

    // User store
    let store = PgUserStore::connect(&config.database)
        .await
        .context("connecting to PostgreSQL")?;
    store.migrate().await.context("running migrations")?;

    // Identity provider
    let google = GoogleIdentityProvider::new(&config.oauth)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::new(config, Arc::new(store), Arc::new(google))?);

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Jetswitch API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
