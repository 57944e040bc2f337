//! Changeset Engine - declarative schema changesets
//!
//! Compiles a desired-state model into idempotent forward SQL plus a rollback
//! script, validates it against the target database and tracks every
//! changeset through draft -> validated -> applied -> reverted.

mod changeset;
mod config;
mod db;
mod error;
mod execution;
mod models;
mod routes;
mod state;

use crate::config::{Settings, StoreBackend};
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Changeset Engine...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let pool = match &settings.database {
        Some(database) => {
            let pool = db::create_pool(database).await?;
            info!("✅ Database pool created successfully");

            if settings.changesets.bootstrap {
                db::bootstrap_tables(&pool, true).await?;
            } else if settings.changesets.store == StoreBackend::Postgres {
                db::bootstrap_tables(&pool, false).await?;
            }
            Some(pool)
        }
        None => {
            warn!("⚠️  DATABASE_URL not set: remote validation is skipped and apply/revert will fail");
            None
        }
    };

    let state = match (settings.changesets.store, pool) {
        (StoreBackend::Postgres, Some(pool)) => AppState::with_postgres(pool),
        (StoreBackend::Postgres, None) => {
            anyhow::bail!("CHANGESET_STORE=postgres requires DATABASE_URL");
        }
        (StoreBackend::Memory, pool) => {
            warn!("⚠️  Changesets are kept in memory and will be lost on restart");
            AppState::with_memory(pool)
        }
    };
    info!("🗄️  Changeset store: {}", state.store_backend);

    // Build the router
    let app = create_router(Arc::new(state), &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   GET  /health                        - Health check");
    info!("   POST /api/changesets/preview        - Compile without saving");
    info!("   POST /api/changesets                - Compile, validate and save");
    info!("   POST /api/changesets/drafts         - Save as draft");
    info!("   GET  /api/changesets                - List changesets");
    info!("   GET  /api/changesets/:id            - Get changeset");
    info!("   POST /api/changesets/:id/validate   - Validate a draft");
    info!("   POST /api/changesets/:id/apply      - Apply");
    info!("   POST /api/changesets/:id/revert     - Revert");
    info!("   POST /api/changesets/:id/abandon    - Abandon");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,changeset_engine=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
