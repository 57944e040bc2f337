//! Remote validation and execution boundary
//!
//! The engine only talks to the target database through these two traits.
//! Postgres-backed implementations live alongside them.

mod dry_run;
mod orchestrator;

pub use dry_run::PgDryRunValidator;
pub use orchestrator::PgExecutor;

use crate::changeset::ValidationReport;
use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Semantic/syntactic check of a compiled statement batch
#[async_trait]
pub trait RemoteValidator: Send + Sync {
    /// `Err` means the check could not run at all; a failed check is `Ok` with `ok = false`
    async fn validate(&self, statements: &[String]) -> Result<ValidationReport, AppError>;
}

/// Applies or reverts a persisted changeset atomically
#[async_trait]
pub trait ChangesetExecutor: Send + Sync {
    async fn apply(&self, changeset_id: Uuid) -> Result<ExecutionOutcome, AppError>;

    async fn revert(&self, changeset_id: Uuid) -> Result<ExecutionOutcome, AppError>;
}

/// Result of one apply or revert call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The executor stored the new status in the same transaction as the statements
    #[serde(default)]
    pub status_recorded: bool,
}

impl ExecutionOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
            status_recorded: false,
        }
    }

    /// Success where the status change already committed with the statements
    pub fn recorded() -> Self {
        Self {
            status_recorded: true,
            ..Self::success()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            status_recorded: false,
        }
    }
}

/// Stand-in validator when no target database is configured
pub struct DetachedValidator;

#[async_trait]
impl RemoteValidator for DetachedValidator {
    async fn validate(&self, _statements: &[String]) -> Result<ValidationReport, AppError> {
        Ok(ValidationReport::passed(vec![
            "Remote validation skipped: no target database configured".to_string(),
        ]))
    }
}

/// Stand-in executor when no target database is configured; every call fails
pub struct DetachedExecutor;

#[async_trait]
impl ChangesetExecutor for DetachedExecutor {
    async fn apply(&self, _changeset_id: Uuid) -> Result<ExecutionOutcome, AppError> {
        Ok(ExecutionOutcome::failure("No target database configured"))
    }

    async fn revert(&self, _changeset_id: Uuid) -> Result<ExecutionOutcome, AppError> {
        Ok(ExecutionOutcome::failure("No target database configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detached_adapters() {
        let report = DetachedValidator.validate(&["select 1;".to_string()]).await.unwrap();
        assert!(report.ok);
        assert_eq!(report.warnings.len(), 1);

        let outcome = DetachedExecutor.apply(Uuid::new_v4()).await.unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("No target database configured"));
    }
}
