//! Local validation
//!
//! Offline structural checks on a desired-state model. These never touch the
//! database; the remote check only runs once this list comes back empty.

use crate::changeset::model::DesiredState;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Result of a remote validation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub ok: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Build a report; `ok` is forced to false whenever errors are present
    pub fn new(ok: bool, errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            ok: ok && errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn passed(warnings: Vec<String>) -> Self {
        Self::new(true, Vec::new(), warnings)
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self::new(false, errors, Vec::new())
    }

    /// Error text stored on a failed changeset
    pub fn error_text(&self) -> Option<String> {
        if self.ok {
            None
        } else if self.errors.is_empty() {
            Some("Remote validation failed without details".to_string())
        } else {
            Some(self.errors.join("\n"))
        }
    }
}

pub struct LocalValidator;

impl LocalValidator {
    /// Required-field and duplicate checks. An empty list means locally valid.
    pub fn validate(state: &DesiredState) -> Vec<String> {
        let mut errors = Vec::new();

        for (i, table) in state.tables.iter().enumerate() {
            let n = i + 1;
            let table_name = table.name.trim();
            if table_name.is_empty() {
                errors.push(format!("Table #{}: name is required", n));
            }
            let label = if table_name.is_empty() {
                format!("Table #{}", n)
            } else {
                format!("Table #{} ({})", n, table_name)
            };

            let mut seen = HashSet::new();
            let mut reported = HashSet::new();
            for (j, column) in table.columns.iter().enumerate() {
                let column_name = column.name.trim();
                if column_name.is_empty() {
                    errors.push(format!("{}: column #{} name is required", label, j + 1));
                    continue;
                }
                let key = column_name.to_lowercase();
                if !seen.insert(key.clone()) && reported.insert(key) {
                    errors.push(format!("{}: duplicate column name '{}'", label, column_name));
                }
            }
        }

        for (i, policy) in state.policies.iter().enumerate() {
            if policy.table.trim().is_empty() || policy.name.trim().is_empty() {
                errors.push(format!("Policy #{}: table and policy name are required", i + 1));
            }
        }

        for (i, trigger) in state.triggers.iter().enumerate() {
            if trigger.events.is_empty() {
                continue;
            }
            if trigger.table.trim().is_empty()
                || trigger.name.trim().is_empty()
                || trigger.function().is_empty()
            {
                errors.push(format!(
                    "Trigger #{}: table, trigger name and function are required",
                    i + 1
                ));
            }
        }

        for (i, function) in state.functions.iter().enumerate() {
            if !function.body.trim().is_empty() && function.signature.trim().is_empty() {
                errors.push(format!(
                    "Function #{}: signature is required when a body is provided",
                    i + 1
                ));
            }
        }

        errors
    }
}
