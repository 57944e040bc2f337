//! Orchestrator - atomic apply/revert of persisted changesets

use crate::changeset::{ChangesetStatus, ChangesetStore};
use crate::db::queries;
use crate::error::AppError;
use crate::execution::{ChangesetExecutor, ExecutionOutcome};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Pool, Transaction};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Runs a changeset's statements against the target database, all or nothing
pub struct PgExecutor {
    pool: Pool,
    store: Arc<dyn ChangesetStore>,
    /// The `changesets` table lives in the target database
    records_status: bool,
}

impl PgExecutor {
    pub fn new(pool: Pool, store: Arc<dyn ChangesetStore>) -> Self {
        Self {
            pool,
            store,
            records_status: false,
        }
    }

    /// Executor for a target that also holds the `changesets` table. The row is
    /// locked and its status moved in the same transaction as the statements.
    pub fn recording_status(pool: Pool, store: Arc<dyn ChangesetStore>) -> Self {
        Self {
            pool,
            store,
            records_status: true,
        }
    }

    async fn run_in_transaction(
        &self,
        changeset_id: Uuid,
        statements: &[String],
        from: ChangesetStatus,
        to: ChangesetStatus,
    ) -> Result<ExecutionOutcome, AppError> {
        let started = Instant::now();
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        if self.records_status {
            claim_row(&transaction, changeset_id, from, to).await?;
        }

        for (i, statement) in statements.iter().enumerate() {
            let stmt = statement.trim();
            if stmt.is_empty() || stmt.starts_with("--") {
                continue;
            }
            if let Err(e) = transaction.batch_execute(stmt).await {
                // dropping the transaction rolls everything back
                warn!("Changeset {} statement {} failed: {}", changeset_id, i + 1, e);
                let message = e
                    .as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| e.to_string());
                return Ok(ExecutionOutcome::failure(format!(
                    "Statement {} failed: {}",
                    i + 1,
                    message
                )));
            }
        }

        if self.records_status {
            let moved = transaction
                .execute(
                    queries::CLAIM_CHANGESET_STATUS,
                    &[&changeset_id, &to.as_str(), &from.as_str(), &Utc::now()],
                )
                .await?;
            if moved != 1 {
                return Ok(ExecutionOutcome::failure(format!(
                    "Changeset {} left status {} during execution",
                    changeset_id, from
                )));
            }
        }

        if let Err(e) = transaction.commit().await {
            return Ok(ExecutionOutcome::failure(format!("Commit failed: {}", e)));
        }

        info!(
            "Changeset {} ran {} statement(s) in {}ms",
            changeset_id,
            statements.len(),
            started.elapsed().as_millis()
        );
        if self.records_status {
            Ok(ExecutionOutcome::recorded())
        } else {
            Ok(ExecutionOutcome::success())
        }
    }
}

/// Lock the changeset row and check it is still in `from`. A second instance
/// blocks here until the first commits, then sees the new status.
async fn claim_row(
    transaction: &Transaction<'_>,
    changeset_id: Uuid,
    from: ChangesetStatus,
    to: ChangesetStatus,
) -> Result<(), AppError> {
    let row = transaction
        .query_opt(queries::LOCK_CHANGESET_STATUS, &[&changeset_id])
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Changeset {} not found", changeset_id)))?;

    let current: String = row.try_get("status")?;
    let current: ChangesetStatus = current.parse()?;
    if current != from {
        return Err(AppError::InvalidTransition {
            id: changeset_id,
            from: current,
            to,
        });
    }
    Ok(())
}

#[async_trait]
impl ChangesetExecutor for PgExecutor {
    async fn apply(&self, changeset_id: Uuid) -> Result<ExecutionOutcome, AppError> {
        let record = self.store.get(changeset_id).await?;
        self.run_in_transaction(
            changeset_id,
            &record.sql,
            ChangesetStatus::Validated,
            ChangesetStatus::Applied,
        )
        .await
    }

    async fn revert(&self, changeset_id: Uuid) -> Result<ExecutionOutcome, AppError> {
        let record = self.store.get(changeset_id).await?;
        self.run_in_transaction(
            changeset_id,
            &record.rollback_sql,
            ChangesetStatus::Applied,
            ChangesetStatus::Reverted,
        )
        .await
    }
}
