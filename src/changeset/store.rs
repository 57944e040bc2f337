//! Changeset storage
//!
//! Records are append-only from the engine's point of view: they are inserted
//! once and afterwards only their status moves.

use crate::changeset::record::{ChangesetFilter, ChangesetRecord, StatusUpdate};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Persistence boundary for changeset records
#[async_trait]
pub trait ChangesetStore: Send + Sync {
    async fn insert(&self, record: ChangesetRecord) -> Result<ChangesetRecord, AppError>;

    async fn get(&self, id: Uuid) -> Result<ChangesetRecord, AppError>;

    /// Newest first
    async fn list(&self, filter: &ChangesetFilter) -> Result<Vec<ChangesetRecord>, AppError>;

    /// Move a record to a new status. Implementations reject illegal edges.
    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<ChangesetRecord, AppError>;
}

/// Thread-safe in-memory store
pub struct InMemoryChangesetStore {
    records: Arc<RwLock<HashMap<Uuid, ChangesetRecord>>>,
}

impl InMemoryChangesetStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryChangesetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangesetStore for InMemoryChangesetStore {
    async fn insert(&self, record: ChangesetRecord) -> Result<ChangesetRecord, AppError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(AppError::Conflict(format!("Changeset {} already exists", record.id)));
        }
        records.insert(record.id, record.clone());
        debug!("Stored changeset {} ({})", record.id, record.status);
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<ChangesetRecord, AppError> {
        let records = self.records.read().await;
        records
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Changeset {} not found", id)))
    }

    async fn list(&self, filter: &ChangesetFilter) -> Result<Vec<ChangesetRecord>, AppError> {
        let records = self.records.read().await;
        let mut matching: Vec<ChangesetRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<ChangesetRecord, AppError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Changeset {} not found", id)))?;

        if !record.status.can_transition_to(update.status) {
            return Err(AppError::InvalidTransition {
                id,
                from: record.status,
                to: update.status,
            });
        }

        record.status = update.status;
        record.error_text = update.error_text;
        if update.validation_report.is_some() {
            record.validation_report = update.validation_report;
        }
        record.updated_at = Utc::now();
        debug!("Changeset {} is now {}", id, record.status);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::compiler::{ChangesetCompiler, CompileRequest};
    use crate::changeset::record::ChangesetStatus;

    fn record(module: &str, status: ChangesetStatus) -> ChangesetRecord {
        let changeset = ChangesetCompiler::compile(&CompileRequest {
            module: module.to_string(),
            title: "t".to_string(),
            ..Default::default()
        });
        ChangesetRecord::new(changeset, status, None, None)
    }

    #[test]
    fn test_insert_get_and_filter() {
        tokio_test::block_on(async {
            let store = InMemoryChangesetStore::new();
            let a = store.insert(record("schema", ChangesetStatus::Draft)).await.unwrap();
            store.insert(record("storage", ChangesetStatus::Validated)).await.unwrap();

            assert_eq!(store.get(a.id).await.unwrap().module, "schema");
            assert!(store.insert(a.clone()).await.is_err());

            let all = store.list(&ChangesetFilter::default()).await.unwrap();
            assert_eq!(all.len(), 2);

            let filter = ChangesetFilter {
                status: Some(ChangesetStatus::Validated),
                ..Default::default()
            };
            let validated = store.list(&filter).await.unwrap();
            assert_eq!(validated.len(), 1);
            assert_eq!(validated[0].module, "storage");

            let limited = ChangesetFilter {
                limit: Some(1),
                ..Default::default()
            };
            assert_eq!(store.list(&limited).await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_update_status_guards_edges() {
        tokio_test::block_on(async {
            let store = InMemoryChangesetStore::new();
            let r = store.insert(record("schema", ChangesetStatus::Draft)).await.unwrap();

            let err = store
                .update_status(r.id, StatusUpdate::to(ChangesetStatus::Applied))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition { .. }));

            let updated = store
                .update_status(r.id, StatusUpdate::to(ChangesetStatus::Validated))
                .await
                .unwrap();
            assert_eq!(updated.status, ChangesetStatus::Validated);

            let missing = store
                .update_status(Uuid::new_v4(), StatusUpdate::to(ChangesetStatus::Validated))
                .await;
            assert!(matches!(missing, Err(AppError::NotFound(_))));
        });
    }
}
