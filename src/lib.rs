//! Blazing - chat server core
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP Layer (Axum)                       │
//! │  - GitHub OAuth routes                                      │
//! │  - Session middleware and extractors                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Auth Core                             │
//! │  - Signed cookie sessions (stateless)                       │
//! │  - Login flow: CSRF state, code exchange, user upsert       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! │  - Migration runner, applied before anything else           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: page and JSON handlers
//! - `auth`: GitHub OAuth, sessions and middleware
//! - `data`: database, user records and migrations
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Cloned for each request; everything inside is immutable or
/// internally synchronized.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool (migrated)
    pub db: Arc<data::Database>,

    /// Session cookie signer/verifier
    pub sessions: Arc<auth::SessionManager>,

    /// GitHub login flow
    pub login: Arc<auth::LoginFlow>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Build the session manager (rejects weak secrets)
    /// 2. Build the GitHub provider client
    /// 3. Connect to SQLite and apply migrations
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let sessions = Arc::new(auth::SessionManager::from_config(&config)?);

        let provider = auth::GitHubProvider::new(
            config.auth.github.clone(),
            config.auth.oauth_request_timeout(),
        )?;

        let db = data::Database::connect(&config.database.path, &config.database.migrations_dir)
            .await?;

        let login = auth::LoginFlow::new(
            Arc::new(provider),
            sessions.clone(),
            config.auth.login_persistence_timeout(),
        );

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            sessions,
            login: Arc::new(login),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::{Router, middleware};
    use tower_http::trace::TraceLayer;

    Router::new()
        .merge(auth::auth_router())
        .merge(api::app_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics::track_requests))
        .with_state(state)
        .merge(metrics::metrics_router())
}
