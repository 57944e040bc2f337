//! Changeset lifecycle
//!
//! Owns the status machine:
//!
//! ```text
//! draft -> validated -> applied -> reverted
//!     \         \
//!      `-> failed `-> failed
//! ```
//!
//! Apply and revert are the only operations that touch the target database.
//! They are serialized per changeset id and never retried here. Once the
//! executor has committed, its statements are never run again for the same
//! transition, even if recording the new status fails.

use crate::changeset::compiler::{ChangesetCompiler, CompileRequest, GeneratedChangeset};
use crate::changeset::record::{ChangesetFilter, ChangesetRecord, ChangesetStatus, StatusUpdate};
use crate::changeset::store::ChangesetStore;
use crate::changeset::validate::LocalValidator;
use crate::error::AppError;
use crate::execution::{ChangesetExecutor, RemoteValidator};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Compile output plus local validation, nothing persisted
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetPreview {
    pub changeset: GeneratedChangeset,
    pub errors: Vec<String>,
}

pub struct ChangesetManager {
    store: Arc<dyn ChangesetStore>,
    validator: Arc<dyn RemoteValidator>,
    executor: Arc<dyn ChangesetExecutor>,
    /// One lock per changeset id while an operation on it is in flight
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    /// Executed changesets whose new status has not been stored yet
    unrecorded: Mutex<HashMap<Uuid, ChangesetStatus>>,
}

impl ChangesetManager {
    pub fn new(
        store: Arc<dyn ChangesetStore>,
        validator: Arc<dyn RemoteValidator>,
        executor: Arc<dyn ChangesetExecutor>,
    ) -> Self {
        Self {
            store,
            validator,
            executor,
            locks: Mutex::new(HashMap::new()),
            unrecorded: Mutex::new(HashMap::new()),
        }
    }

    /// Compile and locally validate without persisting anything
    pub fn preview(&self, request: &CompileRequest) -> ChangesetPreview {
        ChangesetPreview {
            changeset: ChangesetCompiler::compile(request),
            errors: LocalValidator::validate(&request.desired_state),
        }
    }

    /// Compile, validate locally then remotely, and persist the result.
    ///
    /// Local errors abort before anything is stored. A remote rejection is
    /// stored as `failed` so it stays auditable.
    pub async fn create_draft(
        &self,
        request: &CompileRequest,
        created_by: Option<String>,
    ) -> Result<ChangesetRecord, AppError> {
        let changeset = Self::compile_checked(request)?;
        let report = self.validator.validate(&changeset.sql).await?;
        let status = if report.ok {
            ChangesetStatus::Validated
        } else {
            ChangesetStatus::Failed
        };

        let record = ChangesetRecord::new(changeset, status, Some(report), created_by);
        let record = self.store.insert(record).await?;
        info!("Changeset {} created as {}", record.id, record.status);
        Ok(record)
    }

    /// Persist a locally valid changeset as `draft`, skipping remote validation
    pub async fn save_draft(
        &self,
        request: &CompileRequest,
        created_by: Option<String>,
    ) -> Result<ChangesetRecord, AppError> {
        let changeset = Self::compile_checked(request)?;
        let record = ChangesetRecord::new(changeset, ChangesetStatus::Draft, None, created_by);
        let record = self.store.insert(record).await?;
        info!("Changeset {} saved as draft", record.id);
        Ok(record)
    }

    /// Run remote validation for a stored draft
    pub async fn validate(&self, id: Uuid) -> Result<ChangesetRecord, AppError> {
        self.serialized(id, self.validate_locked(id)).await
    }

    /// Apply a validated changeset. On executor failure the status stays
    /// `validated` and the error is returned as-is.
    pub async fn apply(&self, id: Uuid) -> Result<ChangesetRecord, AppError> {
        self.serialized(id, self.execute_locked(id, ChangesetStatus::Applied))
            .await
    }

    /// Revert an applied changeset. On executor failure the status stays `applied`.
    pub async fn revert(&self, id: Uuid) -> Result<ChangesetRecord, AppError> {
        self.serialized(id, self.execute_locked(id, ChangesetStatus::Reverted))
            .await
    }

    /// Give up on a validated changeset, e.g. after a failed apply
    pub async fn abandon(&self, id: Uuid, reason: String) -> Result<ChangesetRecord, AppError> {
        self.serialized(id, self.abandon_locked(id, reason)).await
    }

    pub async fn get(&self, id: Uuid) -> Result<ChangesetRecord, AppError> {
        self.store.get(id).await
    }

    pub async fn list(&self, filter: &ChangesetFilter) -> Result<Vec<ChangesetRecord>, AppError> {
        self.store.list(filter).await
    }

    async fn validate_locked(&self, id: Uuid) -> Result<ChangesetRecord, AppError> {
        self.settle_unrecorded(id).await?;

        let record = self.store.get(id).await?;
        if record.status != ChangesetStatus::Draft {
            return Err(AppError::InvalidTransition {
                id,
                from: record.status,
                to: ChangesetStatus::Validated,
            });
        }

        let report = self.validator.validate(&record.sql).await?;
        let update = if report.ok {
            StatusUpdate::to(ChangesetStatus::Validated)
        } else {
            StatusUpdate::to(ChangesetStatus::Failed).with_error(report.error_text())
        };
        let record = self.store.update_status(id, update.with_report(report)).await?;
        info!("Changeset {} validated: {}", id, record.status);
        Ok(record)
    }

    /// Run forward (`Applied`) or rollback (`Reverted`) statements
    async fn execute_locked(
        &self,
        id: Uuid,
        target: ChangesetStatus,
    ) -> Result<ChangesetRecord, AppError> {
        self.settle_unrecorded(id).await?;

        let record = self.store.get(id).await?;
        let allowed = match target {
            ChangesetStatus::Applied => record.status.can_apply(),
            _ => record.status.can_revert(),
        };
        if !allowed {
            warn!(
                "Refusing to move changeset {} from {} to {}",
                id, record.status, target
            );
            return Err(AppError::InvalidTransition {
                id,
                from: record.status,
                to: target,
            });
        }

        let outcome = match target {
            ChangesetStatus::Applied => self.executor.apply(id).await?,
            _ => self.executor.revert(id).await?,
        };
        if !outcome.ok {
            let error = outcome
                .error
                .unwrap_or_else(|| "Executor reported failure without details".to_string());
            warn!("Moving changeset {} to {} failed: {}", id, target, error);
            return Err(AppError::Execution(error));
        }

        if outcome.status_recorded {
            info!("Changeset {} {} (status committed by executor)", id, target);
            return self.store.get(id).await;
        }

        match self.store.update_status(id, StatusUpdate::to(target)).await {
            Ok(record) => {
                info!("Changeset {} {}", id, target);
                Ok(record)
            }
            Err(e) => {
                error!(
                    "Changeset {} was executed but its status could not be set to {}: {}",
                    id, target, e
                );
                self.unrecorded.lock().await.insert(id, target);
                Err(AppError::StatusNotRecorded { id, status: target })
            }
        }
    }

    async fn abandon_locked(&self, id: Uuid, reason: String) -> Result<ChangesetRecord, AppError> {
        self.settle_unrecorded(id).await?;

        let record = self.store.get(id).await?;
        if record.status != ChangesetStatus::Validated {
            return Err(AppError::InvalidTransition {
                id,
                from: record.status,
                to: ChangesetStatus::Failed,
            });
        }

        let record = self
            .store
            .update_status(id, StatusUpdate::to(ChangesetStatus::Failed).with_error(Some(reason)))
            .await?;
        info!("Changeset {} abandoned", id);
        Ok(record)
    }

    /// Store a status left behind by an executed changeset before anything
    /// else may touch it. The executor is never called from here.
    async fn settle_unrecorded(&self, id: Uuid) -> Result<(), AppError> {
        let pending = self.unrecorded.lock().await.get(&id).copied();
        let status = match pending {
            Some(status) => status,
            None => return Ok(()),
        };

        match self.store.update_status(id, StatusUpdate::to(status)).await {
            Ok(_) => {
                info!("Recorded pending status {} for changeset {}", status, id);
            }
            Err(AppError::InvalidTransition { from, .. }) if from == status => {}
            Err(e) => {
                error!("Changeset {} still cannot be recorded as {}: {}", id, status, e);
                return Err(AppError::StatusNotRecorded { id, status });
            }
        }
        self.unrecorded.lock().await.remove(&id);
        Ok(())
    }

    fn compile_checked(request: &CompileRequest) -> Result<GeneratedChangeset, AppError> {
        if request.desired_state.is_empty() {
            return Err(AppError::Validation("Desired state is empty".to_string()));
        }
        let errors = LocalValidator::validate(&request.desired_state);
        if !errors.is_empty() {
            return Err(AppError::InvalidModel(errors));
        }
        let changeset = ChangesetCompiler::compile(request);
        if changeset.sql.is_empty() {
            return Err(AppError::Validation(
                "Desired state compiles to no statements".to_string(),
            ));
        }
        Ok(changeset)
    }

    /// Run `op` while holding the lock for `id`, then drop the lock entry if
    /// nobody else is waiting on it
    async fn serialized<T, F>(&self, id: Uuid, op: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let lock = self.lock_for(id).await;
        let result = {
            let _guard = lock.lock().await;
            op.await
        };
        self.release(id, lock).await;
        result
    }

    async fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    async fn release(&self, id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // the map and this caller are the only holders
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::model::*;
    use crate::changeset::store::InMemoryChangesetStore;
    use crate::changeset::validate::ValidationReport;
    use crate::execution::ExecutionOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeValidator {
        report: ValidationReport,
        calls: AtomicUsize,
    }

    impl FakeValidator {
        fn new(report: ValidationReport) -> Arc<Self> {
            Arc::new(Self {
                report,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl RemoteValidator for FakeValidator {
        async fn validate(&self, _statements: &[String]) -> Result<ValidationReport, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.report.clone())
        }
    }

    struct FakeExecutor {
        apply: ExecutionOutcome,
        revert: ExecutionOutcome,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeExecutor {
        fn new(apply: ExecutionOutcome, revert: ExecutionOutcome) -> Arc<Self> {
            Arc::new(Self {
                apply,
                revert,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                apply: ExecutionOutcome::success(),
                revert: ExecutionOutcome::success(),
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChangesetExecutor for FakeExecutor {
        async fn apply(&self, _changeset_id: Uuid) -> Result<ExecutionOutcome, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.apply.clone())
        }

        async fn revert(&self, _changeset_id: Uuid) -> Result<ExecutionOutcome, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.revert.clone())
        }
    }

    /// In-memory store whose next `failures` status writes return an error
    struct FlakyStore {
        inner: InMemoryChangesetStore,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryChangesetStore::new(),
                failures: AtomicUsize::new(0),
            })
        }

        fn fail_next(&self, count: usize) {
            self.failures.store(count, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl ChangesetStore for FlakyStore {
        async fn insert(&self, record: ChangesetRecord) -> Result<ChangesetRecord, AppError> {
            self.inner.insert(record).await
        }

        async fn get(&self, id: Uuid) -> Result<ChangesetRecord, AppError> {
            self.inner.get(id).await
        }

        async fn list(&self, filter: &ChangesetFilter) -> Result<Vec<ChangesetRecord>, AppError> {
            self.inner.list(filter).await
        }

        async fn update_status(&self, id: Uuid, update: StatusUpdate) -> Result<ChangesetRecord, AppError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(AppError::Internal("status write failed".to_string()));
            }
            self.inner.update_status(id, update).await
        }
    }

    /// Executor that commits the status itself, like a target hosting the changesets table
    struct RecordingExecutor {
        store: Arc<InMemoryChangesetStore>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ChangesetExecutor for RecordingExecutor {
        async fn apply(&self, changeset_id: Uuid) -> Result<ExecutionOutcome, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.store
                .update_status(changeset_id, StatusUpdate::to(ChangesetStatus::Applied))
                .await?;
            Ok(ExecutionOutcome::recorded())
        }

        async fn revert(&self, changeset_id: Uuid) -> Result<ExecutionOutcome, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.store
                .update_status(changeset_id, StatusUpdate::to(ChangesetStatus::Reverted))
                .await?;
            Ok(ExecutionOutcome::recorded())
        }
    }

    fn notes_request() -> CompileRequest {
        CompileRequest {
            module: "schema".to_string(),
            title: "Student notes".to_string(),
            desired_state: DesiredState {
                tables: vec![TableSpec {
                    name: "student_notes".to_string(),
                    create_if_missing: true,
                    enable_row_level_security: true,
                    columns: vec![
                        ColumnSpec {
                            name: "id".to_string(),
                            data_type: "uuid".to_string(),
                            ..Default::default()
                        },
                        ColumnSpec {
                            name: "student_id".to_string(),
                            data_type: "uuid".to_string(),
                            ..Default::default()
                        },
                    ],
                    indexes: vec![],
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn manager(
        validator: Arc<FakeValidator>,
        executor: Arc<FakeExecutor>,
    ) -> (ChangesetManager, Arc<InMemoryChangesetStore>) {
        let store = Arc::new(InMemoryChangesetStore::new());
        (ChangesetManager::new(store.clone(), validator, executor), store)
    }

    fn ok_executor() -> Arc<FakeExecutor> {
        FakeExecutor::new(ExecutionOutcome::success(), ExecutionOutcome::success())
    }

    #[tokio::test]
    async fn test_create_draft_validated() {
        let validator = FakeValidator::new(ValidationReport::passed(vec!["note".to_string()]));
        let (manager, _) = manager(validator.clone(), ok_executor());

        let record = manager.create_draft(&notes_request(), Some("ana".to_string())).await.unwrap();
        assert_eq!(record.status, ChangesetStatus::Validated);
        assert_eq!(record.error_text, None);
        assert_eq!(record.created_by.as_deref(), Some("ana"));
        assert_eq!(record.validation_report.unwrap().warnings, vec!["note"]);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_draft_remote_failure_is_persisted() {
        let validator = FakeValidator::new(ValidationReport::failed(vec![
            "relation \"students\" does not exist".to_string(),
            "second".to_string(),
        ]));
        let (manager, store) = manager(validator, ok_executor());

        let record = manager.create_draft(&notes_request(), None).await.unwrap();
        assert_eq!(record.status, ChangesetStatus::Failed);
        assert_eq!(
            record.error_text.as_deref(),
            Some("relation \"students\" does not exist\nsecond")
        );
        assert_eq!(store.get(record.id).await.unwrap().status, ChangesetStatus::Failed);
    }

    #[tokio::test]
    async fn test_local_errors_short_circuit() {
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let (manager, store) = manager(validator.clone(), ok_executor());

        let mut request = notes_request();
        request.desired_state.functions.push(FunctionSpec {
            body: "select 1".to_string(),
            ..Default::default()
        });

        let err = manager.create_draft(&request, None).await.unwrap_err();
        match err {
            AppError::InvalidModel(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("Function #1"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
        assert!(store.list(&ChangesetFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_draft_rejected_before_executor() {
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let executor = ok_executor();
        let (manager, _) = manager(validator, executor.clone());

        let draft = manager.save_draft(&notes_request(), None).await.unwrap();
        assert_eq!(draft.status, ChangesetStatus::Draft);

        let err = manager.apply(draft.id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: ChangesetStatus::Draft,
                to: ChangesetStatus::Applied,
                ..
            }
        ));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.get(draft.id).await.unwrap().status, ChangesetStatus::Draft);
    }

    #[tokio::test]
    async fn test_apply_then_revert() {
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let executor = ok_executor();
        let (manager, _) = manager(validator, executor.clone());

        let record = manager.create_draft(&notes_request(), None).await.unwrap();
        assert_eq!(record.status, ChangesetStatus::Validated);

        let applied = manager.apply(record.id).await.unwrap();
        assert_eq!(applied.status, ChangesetStatus::Applied);

        // never applied twice
        assert!(manager.apply(record.id).await.is_err());

        let reverted = manager.revert(record.id).await.unwrap();
        assert_eq!(reverted.status, ChangesetStatus::Reverted);
        assert!(manager.revert(record.id).await.is_err());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_apply_leaves_status() {
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let executor = FakeExecutor::new(
            ExecutionOutcome::failure("deadlock detected"),
            ExecutionOutcome::success(),
        );
        let (manager, _) = manager(validator, executor);

        let record = manager.create_draft(&notes_request(), None).await.unwrap();
        let err = manager.apply(record.id).await.unwrap_err();
        assert!(matches!(err, AppError::Execution(ref msg) if msg == "deadlock detected"));
        assert_eq!(manager.get(record.id).await.unwrap().status, ChangesetStatus::Validated);

        let abandoned = manager.abandon(record.id, "giving up".to_string()).await.unwrap();
        assert_eq!(abandoned.status, ChangesetStatus::Failed);
        assert_eq!(abandoned.error_text.as_deref(), Some("giving up"));
    }

    #[tokio::test]
    async fn test_failed_revert_leaves_applied() {
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let executor = FakeExecutor::new(
            ExecutionOutcome::success(),
            ExecutionOutcome::failure("cannot drop table"),
        );
        let (manager, _) = manager(validator, executor);

        let record = manager.create_draft(&notes_request(), None).await.unwrap();
        manager.apply(record.id).await.unwrap();
        assert!(matches!(manager.revert(record.id).await, Err(AppError::Execution(_))));
        assert_eq!(manager.get(record.id).await.unwrap().status, ChangesetStatus::Applied);
    }

    #[tokio::test]
    async fn test_validate_stored_draft() {
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let (manager, _) = manager(validator, ok_executor());

        let draft = manager.save_draft(&notes_request(), None).await.unwrap();
        let validated = manager.validate(draft.id).await.unwrap();
        assert_eq!(validated.status, ChangesetStatus::Validated);
        assert!(validated.validation_report.is_some());
        assert!(manager.validate(draft.id).await.is_err());
    }

    #[tokio::test]
    async fn test_tenant_scope_without_tenant_still_compiles() {
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let (manager, _) = manager(validator, ok_executor());

        let request = CompileRequest {
            module: "settings".to_string(),
            title: "Locale".to_string(),
            scope: Scope::Tenant,
            tenant_id: None,
            desired_state: DesiredState {
                preferences: vec![PreferenceSpec {
                    key: "locale".to_string(),
                    value: serde_json::json!("fr"),
                }],
                ..Default::default()
            },
            ..Default::default()
        };

        let preview = manager.preview(&request);
        assert!(preview.errors.is_empty());
        assert_eq!(preview.changeset.sql.len(), 1);
        assert_eq!(preview.changeset.impact_preview.warnings.len(), 1);

        let record = manager.create_draft(&request, None).await.unwrap();
        assert_eq!(record.scope, Scope::Tenant);
        assert_eq!(record.tenant_id, None);
        assert!(record.rollback_sql.is_empty());
    }

    #[tokio::test]
    async fn test_empty_model_rejected() {
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let (manager, _) = manager(validator, ok_executor());
        let err = manager.create_draft(&CompileRequest::default(), None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_lost_status_write_never_reexecutes() {
        let store = FlakyStore::new();
        let executor = ok_executor();
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let manager = ChangesetManager::new(store.clone(), validator, executor.clone());

        let record = manager.create_draft(&notes_request(), None).await.unwrap();

        store.fail_next(2);
        let err = manager.apply(record.id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::StatusNotRecorded {
                status: ChangesetStatus::Applied,
                ..
            }
        ));
        assert_eq!(store.get(record.id).await.unwrap().status, ChangesetStatus::Validated);

        // store still failing: the status write is retried, the executor is not
        let err = manager.apply(record.id).await.unwrap_err();
        assert!(matches!(err, AppError::StatusNotRecorded { .. }));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

        // store recovered: pending status is recorded and the apply is refused
        let err = manager.apply(record.id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: ChangesetStatus::Applied,
                to: ChangesetStatus::Applied,
                ..
            }
        ));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get(record.id).await.unwrap().status, ChangesetStatus::Applied);

        let reverted = manager.revert(record.id).await.unwrap();
        assert_eq!(reverted.status, ChangesetStatus::Reverted);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lost_revert_status_is_recorded_not_rerun() {
        let store = FlakyStore::new();
        let executor = ok_executor();
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let manager = ChangesetManager::new(store.clone(), validator, executor.clone());

        let record = manager.create_draft(&notes_request(), None).await.unwrap();
        manager.apply(record.id).await.unwrap();

        store.fail_next(1);
        assert!(matches!(
            manager.revert(record.id).await,
            Err(AppError::StatusNotRecorded {
                status: ChangesetStatus::Reverted,
                ..
            })
        ));

        assert!(manager.revert(record.id).await.is_err());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.get(record.id).await.unwrap().status, ChangesetStatus::Reverted);
    }

    #[tokio::test]
    async fn test_status_recorded_by_executor() {
        let store = Arc::new(InMemoryChangesetStore::new());
        let executor = Arc::new(RecordingExecutor {
            store: store.clone(),
            calls: AtomicUsize::new(0),
        });
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let manager = ChangesetManager::new(store.clone(), validator, executor.clone());

        let record = manager.create_draft(&notes_request(), None).await.unwrap();
        let applied = manager.apply(record.id).await.unwrap();
        assert_eq!(applied.status, ChangesetStatus::Applied);

        let reverted = manager.revert(record.id).await.unwrap();
        assert_eq!(reverted.status, ChangesetStatus::Reverted);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_apply_runs_executor_once() {
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let executor = FakeExecutor::slow(Duration::from_millis(50));
        let (manager, _) = manager(validator, executor.clone());

        let record = manager.create_draft(&notes_request(), None).await.unwrap();
        let (first, second) = tokio::join!(manager.apply(record.id), manager.apply(record.id));

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(
                    r,
                    Err(AppError::InvalidTransition {
                        from: ChangesetStatus::Applied,
                        ..
                    })
                ))
                .count(),
            1
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_locks_released_after_use() {
        let validator = FakeValidator::new(ValidationReport::passed(vec![]));
        let (manager, _) = manager(validator, ok_executor());

        for _ in 0..20 {
            let record = manager.create_draft(&notes_request(), None).await.unwrap();
            manager.apply(record.id).await.unwrap();
            manager.revert(record.id).await.unwrap();
            assert!(manager.apply(record.id).await.is_err());
        }
        assert!(manager.locks.lock().await.is_empty());

        let record = manager.save_draft(&notes_request(), None).await.unwrap();
        let (a, b) = tokio::join!(manager.validate(record.id), manager.validate(record.id));
        assert!(a.is_ok() != b.is_ok());
        assert!(manager.locks.lock().await.is_empty());
    }
}
