//! Blazing binary entry point

use blazing::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from the `logging` section
/// 3. Initialize AppState (database migrations run here)
/// 4. Build Axum router
/// 5. Start HTTP server
///
/// Any failure before step 5 aborts startup.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let loaded = config::AppConfig::load();

    // 2. Initialize tracing/logging; a broken config is still logged
    let logging = loaded
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);

    tracing::info!("Starting Blazing...");

    blazing::metrics::init_metrics();

    let config = loaded.inspect_err(|error| {
        tracing::error!(%error, "Refusing to start with invalid configuration");
    })?;
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        secure_cookies = config.should_use_secure_cookies(),
        "Configuration loaded"
    );

    // 3. Initialize application state
    let state = AppState::new(config.clone()).await.inspect_err(|error| {
        tracing::error!(%error, kind = error.kind(), "Startup failed");
    })?;

    // 4. Build Axum router
    let app = blazing::build_router(state);

    // 5. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server exited");
    Ok(())
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| logging.filter_directive().into())
    };

    if logging.is_json() {
        tracing_subscriber::registry()
            .with(filter())
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter())
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => tracing::error!(%error, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down server...");
}
