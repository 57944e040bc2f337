//! Persisted changeset records and their status machine

use crate::changeset::compiler::{GeneratedChangeset, ImpactPreview};
use crate::changeset::model::{DesiredState, Scope};
use crate::changeset::validate::ValidationReport;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a changeset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangesetStatus {
    /// Saved but not yet validated remotely
    Draft,
    /// Passed remote validation, eligible for apply
    Validated,
    /// Applied to the target database
    Applied,
    /// Failed remote validation (or abandoned)
    Failed,
    /// Rolled back after being applied
    Reverted,
}

impl ChangesetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangesetStatus::Draft => "draft",
            ChangesetStatus::Validated => "validated",
            ChangesetStatus::Applied => "applied",
            ChangesetStatus::Failed => "failed",
            ChangesetStatus::Reverted => "reverted",
        }
    }

    /// The only legal edges of the lifecycle
    pub fn can_transition_to(&self, next: ChangesetStatus) -> bool {
        use ChangesetStatus::*;
        matches!(
            (self, next),
            (Draft, Validated)
                | (Draft, Failed)
                | (Validated, Applied)
                | (Validated, Failed)
                | (Applied, Reverted)
        )
    }

    pub fn can_apply(&self) -> bool {
        self.can_transition_to(ChangesetStatus::Applied)
    }

    pub fn can_revert(&self) -> bool {
        self.can_transition_to(ChangesetStatus::Reverted)
    }
}

impl fmt::Display for ChangesetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangesetStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(ChangesetStatus::Draft),
            "validated" => Ok(ChangesetStatus::Validated),
            "applied" => Ok(ChangesetStatus::Applied),
            "failed" => Ok(ChangesetStatus::Failed),
            "reverted" => Ok(ChangesetStatus::Reverted),
            other => Err(AppError::BadRequest(format!("Unknown changeset status '{}'", other))),
        }
    }
}

/// A changeset as stored: identity, compiled content and status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetRecord {
    pub id: Uuid,
    pub scope: Scope,
    pub tenant_id: Option<Uuid>,
    pub title: String,
    pub summary: String,
    pub module: String,
    pub desired_state: DesiredState,
    pub sql: Vec<String>,
    pub rollback_sql: Vec<String>,
    pub impact_preview: ImpactPreview,
    pub checksum: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_report: Option<ValidationReport>,
    pub status: ChangesetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChangesetRecord {
    /// Wrap a compiled changeset in a new record
    pub fn new(
        changeset: GeneratedChangeset,
        status: ChangesetStatus,
        validation_report: Option<ValidationReport>,
        created_by: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let checksum = changeset.checksum();
        let error_text = validation_report.as_ref().and_then(ValidationReport::error_text);
        Self {
            id: Uuid::new_v4(),
            scope: changeset.scope,
            tenant_id: changeset.tenant_id,
            title: changeset.title,
            summary: changeset.summary,
            module: changeset.module,
            desired_state: changeset.desired_state,
            sql: changeset.sql,
            rollback_sql: changeset.rollback_sql,
            impact_preview: changeset.impact_preview,
            checksum,
            validation_report,
            status,
            error_text,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A status change as handed to a store
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: ChangesetStatus,
    pub error_text: Option<String>,
    pub validation_report: Option<ValidationReport>,
}

impl StatusUpdate {
    pub fn to(status: ChangesetStatus) -> Self {
        Self {
            status,
            error_text: None,
            validation_report: None,
        }
    }

    pub fn with_error(mut self, error_text: Option<String>) -> Self {
        self.error_text = error_text;
        self
    }

    pub fn with_report(mut self, report: ValidationReport) -> Self {
        self.validation_report = Some(report);
        self
    }
}

/// Listing filter for history views
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetFilter {
    pub module: Option<String>,
    pub status: Option<ChangesetStatus>,
    pub tenant_id: Option<Uuid>,
    pub limit: Option<usize>,
}

impl ChangesetFilter {
    pub fn matches(&self, record: &ChangesetRecord) -> bool {
        self.module.as_deref().map_or(true, |m| record.module == m)
            && self.status.map_or(true, |s| record.status == s)
            && self.tenant_id.map_or(true, |t| record.tenant_id == Some(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChangesetStatus::*;

    #[test]
    fn test_legal_transitions() {
        assert!(Draft.can_transition_to(Validated));
        assert!(Draft.can_transition_to(Failed));
        assert!(Validated.can_transition_to(Applied));
        assert!(Validated.can_transition_to(Failed));
        assert!(Applied.can_transition_to(Reverted));
    }

    #[test]
    fn test_illegal_transitions() {
        let all = [Draft, Validated, Applied, Failed, Reverted];
        let legal = [
            (Draft, Validated),
            (Draft, Failed),
            (Validated, Applied),
            (Validated, Failed),
            (Applied, Reverted),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
        assert!(!Applied.can_apply());
        assert!(!Draft.can_apply());
        assert!(!Validated.can_revert());
        assert!(!Reverted.can_revert());
    }

    #[test]
    fn test_status_parse_round_trip_text() {
        assert_eq!("Applied".parse::<ChangesetStatus>().unwrap(), Applied);
        assert!("merged".parse::<ChangesetStatus>().is_err());
    }
}
