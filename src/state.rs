//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::changeset::{ChangesetManager, ChangesetStore, InMemoryChangesetStore};
use crate::db::PgChangesetStore;
use crate::execution::{DetachedExecutor, DetachedValidator, PgDryRunValidator, PgExecutor};
use deadpool_postgres::Pool;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Lifecycle manager for every changeset operation
    pub changesets: ChangesetManager,

    /// Backend name reported by the health check
    pub store_backend: &'static str,
}

impl AppState {
    /// Records live in Postgres; validation and execution target the same database,
    /// so status changes commit together with the executed statements
    pub fn with_postgres(pool: Pool) -> Self {
        let store: Arc<dyn ChangesetStore> = Arc::new(PgChangesetStore::new(pool.clone()));
        let executor = Arc::new(PgExecutor::recording_status(pool.clone(), store.clone()));
        Self::build(pool, store, executor, "postgres")
    }

    /// Records live in memory; a target database is optional
    pub fn with_memory(pool: Option<Pool>) -> Self {
        let store: Arc<dyn ChangesetStore> = Arc::new(InMemoryChangesetStore::new());
        match pool {
            Some(pool) => {
                let executor = Arc::new(PgExecutor::new(pool.clone(), store.clone()));
                Self::build(pool, store, executor, "memory")
            }
            None => Self {
                changesets: ChangesetManager::new(
                    store,
                    Arc::new(DetachedValidator),
                    Arc::new(DetachedExecutor),
                ),
                store_backend: "memory",
            },
        }
    }

    fn build(
        pool: Pool,
        store: Arc<dyn ChangesetStore>,
        executor: Arc<PgExecutor>,
        store_backend: &'static str,
    ) -> Self {
        let validator = Arc::new(PgDryRunValidator::new(pool));
        Self {
            changesets: ChangesetManager::new(store, validator, executor),
            store_backend,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
