//! Database connection management
//!
//! Builds the connection pool and creates the support tables.

pub mod queries;
mod service;

pub use service::PgChangesetStore;

use crate::config::DatabaseConfig;
use crate::error::AppError;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{info, warn};

/// Create a connection pool and verify it with a test query
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = if config.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        for e in &certs.errors {
            warn!("⚠️  Could not load native certificate: {}", e);
        }
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| AppError::Config(format!("Failed to create TLS pool: {}", e)))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))?
    };

    // Test connection
    let client = pool.get().await?;
    client.query_one("SELECT 1", &[]).await?;
    drop(client);

    info!(
        "✅ Database connection successful ({}:{}/{}, TLS: {})",
        config.host, config.port, config.database, config.require_tls
    );
    Ok(pool)
}

/// Create the changeset history table and the tables targeted by upserts
pub async fn bootstrap_tables(pool: &Pool, include_targets: bool) -> Result<(), AppError> {
    let client = pool.get().await?;

    client.batch_execute(queries::CREATE_CHANGESETS_TABLE).await?;
    for index in queries::CREATE_CHANGESET_INDEXES {
        if let Err(e) = client.batch_execute(index).await {
            warn!("⚠️  Could not create index: {}", e);
        }
    }

    if include_targets {
        client.batch_execute(queries::CREATE_APP_SETTINGS_TABLE).await?;
        client.batch_execute(queries::CREATE_STORAGE_BUCKETS_TABLE).await?;
        client.batch_execute(queries::CREATE_REMOTE_FUNCTIONS_TABLE).await?;
    }

    info!("✅ Database tables initialized");
    Ok(())
}
