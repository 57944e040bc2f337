//! Changeset request DTOs

use crate::changeset::{CompileRequest, DesiredState, Scope};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

static MODULE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_\-]*$").expect("module name pattern is valid"));

/// Request to compile a changeset from a desired-state model
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CompileChangesetRequest {
    #[validate(length(min = 1, max = 64, message = "Module must be between 1 and 64 characters"))]
    #[validate(custom(function = "validate_module"))]
    pub module: String,

    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,

    #[validate(length(max = 2000, message = "Summary must be at most 2000 characters"))]
    pub summary: Option<String>,

    #[serde(default)]
    pub scope: Scope,

    pub tenant_id: Option<Uuid>,

    #[serde(default)]
    pub desired_state: DesiredState,

    /// Free-form author reference, stored as-is
    pub created_by: Option<String>,
}

impl CompileChangesetRequest {
    /// Split into the compiler input and the author reference
    pub fn into_parts(self) -> (CompileRequest, Option<String>) {
        let request = CompileRequest {
            module: self.module,
            title: self.title,
            summary: self.summary.filter(|s| !s.trim().is_empty()),
            scope: self.scope,
            tenant_id: self.tenant_id,
            desired_state: self.desired_state,
        };
        (request, self.created_by)
    }
}

/// Request to abandon a validated changeset
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AbandonChangesetRequest {
    #[validate(length(min = 1, max = 2000, message = "Reason is required"))]
    pub reason: String,
}

fn validate_module(module: &str) -> Result<(), validator::ValidationError> {
    if !MODULE_NAME.is_match(module) {
        let mut err = validator::ValidationError::new("invalid_module");
        err.message = Some(
            "Module must start with a lowercase letter and contain only lowercase letters, digits, '_' or '-'"
                .into(),
        );
        return Err(err);
    }
    Ok(())
}
