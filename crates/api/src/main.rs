use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_api::auth::credentials::PgCredentialVerifier;
use tether_api::background::session_sweeper::SessionSweeper;
use tether_api::config::ServerConfig;
use tether_api::router::build_app_router;
use tether_api::state::AppState;
use tether_api::ws::notifier::TerminationNotifier;
use tether_api::ws::{self, WsManager};
use tether_db::store::PgSessionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = tether_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    tether_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tether_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Realtime registry and termination worker ---
    let ws_manager = Arc::new(WsManager::new());
    let (notifier, notifier_handle) = TerminationNotifier::spawn(Arc::clone(&ws_manager));

    // --- App state ---
    let sessions = Arc::new(PgSessionStore::new(pool.clone()));
    let credentials = Arc::new(PgCredentialVerifier::new(
        pool,
        config.session.default_tenant.clone(),
    ));
    let state = AppState::new(
        config.clone(),
        sessions,
        credentials,
        Arc::clone(&ws_manager),
        notifier,
    );

    // --- Background tasks ---
    let cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&ws_manager),
        config.session.heartbeat_interval(),
        cancel.clone(),
    );
    let sweeper = SessionSweeper::new(
        Arc::clone(&ws_manager),
        Arc::clone(&state.sessions),
        Arc::clone(&state.revocations),
        config.session.sweep_log_cooldown(),
    );
    let sweeper_handle = tokio::spawn(sweeper.run(config.session.sweep_interval(), cancel.clone()));

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    cancel.cancel();
    let _ = tokio::time::timeout(grace, sweeper_handle).await;
    let _ = tokio::time::timeout(grace, heartbeat_handle).await;
    tracing::info!("Background tasks stopped");

    // Closing the channels ends their socket tasks, which releases the last
    // notifier handles; the worker then exits once its queue is empty.
    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    if tokio::time::timeout(grace, notifier_handle).await.is_err() {
        tracing::warn!("Termination worker did not drain in time");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Console output by default; one JSON object per line with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tether_api=debug,tether_db=info,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
