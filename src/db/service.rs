// Postgres-backed changeset store
//
// Records are stored one row per changeset with the model and compiled
// statements kept as jsonb.

use crate::changeset::{
    ChangesetFilter, ChangesetRecord, ChangesetStatus, ChangesetStore, Scope, StatusUpdate,
};
use crate::db::queries;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use postgres_types::Json;
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use tracing::{debug, info};
use uuid::Uuid;

// Changeset store backed by the application database
pub struct PgChangesetStore {
    pool: Pool,
}

impl PgChangesetStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangesetStore for PgChangesetStore {
    async fn insert(&self, record: ChangesetRecord) -> Result<ChangesetRecord, AppError> {
        let client = self.pool.get().await?;

        client
            .execute(
                queries::INSERT_CHANGESET,
                &[
                    &record.id,
                    &record.scope.as_str(),
                    &record.tenant_id,
                    &record.title,
                    &record.summary,
                    &record.module,
                    &Json(&record.desired_state),
                    &Json(&record.sql),
                    &Json(&record.rollback_sql),
                    &Json(&record.impact_preview),
                    &record.checksum,
                    &record.validation_report.as_ref().map(Json),
                    &record.status.as_str(),
                    &record.error_text,
                    &record.created_by,
                    &record.created_at,
                    &record.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    AppError::Conflict(format!("Changeset {} already exists", record.id))
                } else {
                    AppError::Database(e)
                }
            })?;

        info!("Persisted changeset {} ({})", record.id, record.status);
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<ChangesetRecord, AppError> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(queries::select_changeset().as_str(), &[&id])
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Changeset {} not found", id)))?;

        row_to_record(&row)
    }

    async fn list(&self, filter: &ChangesetFilter) -> Result<Vec<ChangesetRecord>, AppError> {
        let client = self.pool.get().await?;

        let status = filter.status.map(|s| s.as_str());
        let limit = filter.limit.map(|l| l as i64);
        let rows = client
            .query(
                queries::list_changesets().as_str(),
                &[&filter.module, &status, &filter.tenant_id, &limit],
            )
            .await?;

        debug!("Listed {} changeset(s)", rows.len());
        rows.iter().map(row_to_record).collect()
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<ChangesetRecord, AppError> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        let row = transaction
            .query_opt(queries::select_changeset_for_update().as_str(), &[&id])
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Changeset {} not found", id)))?;
        let mut record = row_to_record(&row)?;

        if !record.status.can_transition_to(update.status) {
            return Err(AppError::InvalidTransition {
                id,
                from: record.status,
                to: update.status,
            });
        }

        let now = Utc::now();
        transaction
            .execute(
                queries::UPDATE_CHANGESET_STATUS,
                &[
                    &id,
                    &update.status.as_str(),
                    &update.error_text,
                    &update.validation_report.as_ref().map(Json),
                    &now,
                ],
            )
            .await?;
        transaction.commit().await?;

        debug!("Changeset {} moved {} -> {}", id, record.status, update.status);
        record.status = update.status;
        record.error_text = update.error_text;
        if update.validation_report.is_some() {
            record.validation_report = update.validation_report;
        }
        record.updated_at = now;
        Ok(record)
    }
}

fn row_to_record(row: &Row) -> Result<ChangesetRecord, AppError> {
    let scope: String = row.try_get("scope")?;
    let status: String = row.try_get("status")?;
    let status: ChangesetStatus = status
        .parse()
        .map_err(|_| AppError::Internal(format!("Unknown status '{}' in changesets table", status)))?;

    Ok(ChangesetRecord {
        id: row.try_get("id")?,
        scope: parse_scope(&scope)?,
        tenant_id: row.try_get("tenant_id")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        module: row.try_get("module")?,
        desired_state: row.try_get::<_, Json<_>>("desired_state")?.0,
        sql: row.try_get::<_, Json<_>>("sql")?.0,
        rollback_sql: row.try_get::<_, Json<_>>("rollback_sql")?.0,
        impact_preview: row.try_get::<_, Json<_>>("impact_preview")?.0,
        checksum: row.try_get("checksum")?,
        validation_report: row
            .try_get::<_, Option<Json<_>>>("validation_report")?
            .map(|report| report.0),
        status,
        error_text: row.try_get("error_text")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn parse_scope(value: &str) -> Result<Scope, AppError> {
    match value {
        "global" => Ok(Scope::Global),
        "tenant" => Ok(Scope::Tenant),
        other => Err(AppError::Internal(format!(
            "Unknown scope '{}' in changesets table",
            other
        ))),
    }
}
