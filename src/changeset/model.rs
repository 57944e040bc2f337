//! Desired-state model
//!
//! The declarative shape a caller wants the target database to have. Values are
//! built once by the editor and handed to the compiler wholesale; nothing in
//! this crate mutates them afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// SCOPE
// =============================================================================

/// Whether a setting or registration applies to everyone or one tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Global,
    Tenant,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Tenant => "tenant",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// DESIRED STATE
// =============================================================================

/// Aggregate desired state for one changeset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DesiredState {
    pub tables: Vec<TableSpec>,
    pub policies: Vec<PolicySpec>,
    pub triggers: Vec<TriggerSpec>,
    pub functions: Vec<FunctionSpec>,
    pub auth_settings: AuthSettings,
    pub storage_buckets: Vec<StorageBucketSpec>,
    pub remote_functions: Vec<RemoteFunctionSpec>,
    pub api_settings: ApiSettings,
    pub preferences: Vec<PreferenceSpec>,
}

impl DesiredState {
    /// True when the model carries nothing that could compile to a statement
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.policies.is_empty()
            && self.triggers.is_empty()
            && self.functions.is_empty()
            && self.auth_settings.is_empty()
            && self.storage_buckets.is_empty()
            && self.remote_functions.is_empty()
            && self.api_settings.is_empty()
            && self.preferences.is_empty()
    }
}

// =============================================================================
// TABLES
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableSpec {
    /// Table name, optionally schema-qualified (`audit.events`)
    pub name: String,
    pub create_if_missing: bool,
    pub enable_row_level_security: bool,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl TableSpec {
    /// Columns that have a name; unnamed rows from the editor are ignored
    pub fn real_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| !c.name.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub unique: bool,
    pub default_value: Option<String>,
    pub references_table: Option<String>,
    pub references_column: Option<String>,
}

impl Default for ColumnSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            data_type: "text".to_string(),
            nullable: true,
            unique: false,
            default_value: None,
            references_table: None,
            references_column: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexSpec {
    pub name: String,
    /// Column list or expression, rendered verbatim inside the parentheses
    pub expression: String,
    pub unique: bool,
}

// =============================================================================
// POLICIES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyCommand {
    Select,
    Insert,
    Update,
    Delete,
    #[default]
    All,
}

impl PolicyCommand {
    pub fn as_sql(&self) -> &'static str {
        match self {
            PolicyCommand::Select => "select",
            PolicyCommand::Insert => "insert",
            PolicyCommand::Update => "update",
            PolicyCommand::Delete => "delete",
            PolicyCommand::All => "all",
        }
    }
}

/// Row-level access policy on a table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySpec {
    pub table: String,
    pub name: String,
    pub command: PolicyCommand,
    pub roles: Vec<String>,
    pub using: String,
    pub with_check: String,
}

// =============================================================================
// TRIGGERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerTiming {
    #[default]
    Before,
    After,
}

impl TriggerTiming {
    pub fn as_sql(&self) -> &'static str {
        match self {
            TriggerTiming::Before => "BEFORE",
            TriggerTiming::After => "AFTER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

impl TriggerEvent {
    pub fn as_sql(&self) -> &'static str {
        match self {
            TriggerEvent::Insert => "INSERT",
            TriggerEvent::Update => "UPDATE",
            TriggerEvent::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerSpec {
    pub table: String,
    pub name: String,
    pub timing: TriggerTiming,
    pub events: Vec<TriggerEvent>,
    /// Backing function, optionally schema-qualified
    pub function_name: String,
}

impl TriggerSpec {
    /// Backing function name with any trailing empty argument list removed
    pub fn function(&self) -> &str {
        let name = self.function_name.trim();
        name.strip_suffix("()").map(str::trim_end).unwrap_or(name)
    }
}

// =============================================================================
// FUNCTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FunctionSpec {
    /// Name plus argument list, e.g. `public.touch_updated_at()`
    pub signature: String,
    pub returns: String,
    pub language: String,
    pub security_definer: bool,
    pub body: String,
}

impl Default for FunctionSpec {
    fn default() -> Self {
        Self {
            signature: String::new(),
            returns: "void".to_string(),
            language: "plpgsql".to_string(),
            security_definer: false,
            body: String::new(),
        }
    }
}

impl FunctionSpec {
    /// Function name without the argument list
    pub fn name(&self) -> &str {
        let signature = self.signature.trim();
        signature
            .split_once('(')
            .map(|(name, _)| name.trim())
            .unwrap_or(signature)
    }
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Auth settings; every populated field becomes one `auth.*` settings key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    pub site_url: Option<String>,
    pub additional_redirect_urls: Option<Vec<String>>,
    pub jwt_expiry_seconds: Option<u32>,
    pub enable_signup: Option<bool>,
    pub email_confirmation_required: Option<bool>,
    pub mfa_enabled: Option<bool>,
}

impl AuthSettings {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Data API settings; every populated field becomes one `api.*` settings key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    pub exposed_schemas: Option<Vec<String>>,
    pub extra_search_path: Option<Vec<String>>,
    pub max_rows: Option<u32>,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl ApiSettings {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Free-form key/value preference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferenceSpec {
    pub key: String,
    pub value: serde_json::Value,
}

// =============================================================================
// STORAGE & REMOTE FUNCTIONS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageBucketSpec {
    pub scope: Scope,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub allowed_mime_types: Vec<String>,
    pub file_size_limit_bytes: Option<i64>,
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteFunctionSpec {
    pub scope: Scope,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub route: String,
    pub enabled: bool,
    pub version: String,
}

impl Default for RemoteFunctionSpec {
    fn default() -> Self {
        Self {
            scope: Scope::Global,
            tenant_id: None,
            name: String::new(),
            route: String::new(),
            enabled: true,
            version: "1".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_name_strips_arguments() {
        let f = FunctionSpec {
            signature: " public.touch(p_id uuid) ".to_string(),
            ..Default::default()
        };
        assert_eq!(f.name(), "public.touch");

        let bare = FunctionSpec {
            signature: "no_parens".to_string(),
            ..Default::default()
        };
        assert_eq!(bare.name(), "no_parens");
    }

    #[test]
    fn test_trigger_function_drops_empty_parens() {
        let mut trigger = TriggerSpec {
            function_name: " touch() ".to_string(),
            ..Default::default()
        };
        assert_eq!(trigger.function(), "touch");

        trigger.function_name = "public.touch_updated_at".to_string();
        assert_eq!(trigger.function(), "public.touch_updated_at");

        trigger.function_name = "()".to_string();
        assert_eq!(trigger.function(), "");
    }

    #[test]
    fn test_desired_state_deserializes_editor_payload() {
        let json = serde_json::json!({
            "tables": [{
                "name": "student_notes",
                "createIfMissing": true,
                "columns": [{ "name": "id", "type": "uuid", "nullable": false }]
            }],
            "policies": [{ "table": "student_notes", "name": "p", "command": "select" }],
            "storageBuckets": [{ "scope": "tenant", "name": "avatars" }]
        });

        let state: DesiredState = serde_json::from_value(json).unwrap();
        assert_eq!(state.tables[0].columns[0].data_type, "uuid");
        assert!(!state.tables[0].columns[0].nullable);
        assert_eq!(state.policies[0].command, PolicyCommand::Select);
        assert_eq!(state.storage_buckets[0].scope, Scope::Tenant);
        assert!(state.auth_settings.is_empty());
        assert!(!state.is_empty());
        assert!(DesiredState::default().is_empty());
    }
}
