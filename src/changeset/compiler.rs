//! Changeset compiler
//!
//! Turns a [`DesiredState`] into ordered, idempotent forward statements and the
//! matching rollback. Entity kinds are emitted in a fixed order because later
//! statements depend on earlier ones (a policy needs its table).

use crate::changeset::model::*;
use crate::changeset::rollback::RollbackBuilder;
use crate::changeset::sanitize::{quote_identifier, quote_literal, quote_qualified};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Settings rows written by auth/API/preference upserts
pub const SETTINGS_TABLE: &str = "public.app_settings";
pub const BUCKETS_TABLE: &str = "public.storage_buckets";
pub const REMOTE_FUNCTIONS_TABLE: &str = "public.remote_function_registry";

pub const MISSING_TENANT_WARNING: &str =
    "Tenant scope selected without a tenant id; global defaults may apply";

const BODY_QUOTE_TAG: &str = "$fn$";

/// `DROP FUNCTION` rejects argument defaults, so such signatures cannot be
/// rolled back by signature alone.
static DEFAULT_ARGUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bdefault\b|=").expect("default-argument pattern is valid")
});

// =============================================================================
// INPUT / OUTPUT
// =============================================================================

/// Everything needed to compile one changeset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub module: String,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub desired_state: DesiredState,
}

/// Named entities a changeset touches, plus non-fatal warnings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactPreview {
    pub tables: BTreeSet<String>,
    pub policies: BTreeSet<String>,
    pub triggers: BTreeSet<String>,
    pub functions: BTreeSet<String>,
    pub storage_buckets: BTreeSet<String>,
    pub remote_functions: BTreeSet<String>,
    pub settings_keys: BTreeSet<String>,
    pub warnings: Vec<String>,
}

impl ImpactPreview {
    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }
}

/// Compiled unit: forward statements, rollback statements and impact summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedChangeset {
    pub module: String,
    pub title: String,
    pub summary: String,
    pub scope: Scope,
    pub tenant_id: Option<Uuid>,
    pub desired_state: DesiredState,
    pub sql: Vec<String>,
    pub rollback_sql: Vec<String>,
    pub impact_preview: ImpactPreview,
}

impl GeneratedChangeset {
    /// SHA-256 over forward and rollback statements, hex encoded
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for statement in &self.sql {
            hasher.update(statement.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(b"--rollback--\n");
        for statement in &self.rollback_sql {
            hasher.update(statement.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

// =============================================================================
// COMPILER
// =============================================================================

pub struct ChangesetCompiler;

impl ChangesetCompiler {
    /// Compile a request into a fresh changeset. Pure: the same request always
    /// yields byte-identical statements.
    pub fn compile(request: &CompileRequest) -> GeneratedChangeset {
        let state = &request.desired_state;
        let mut out = Compilation::default();

        for table in &state.tables {
            out.table(table);
        }
        for policy in &state.policies {
            out.policy(policy);
        }
        for trigger in &state.triggers {
            out.trigger(trigger);
        }
        for function in &state.functions {
            out.function(function);
        }

        let settings_scope = SettingsScope::new(request.scope, request.tenant_id);
        if settings_scope.missing_tenant() {
            out.impact.warn(MISSING_TENANT_WARNING);
        }
        for (key, value) in auth_entries(&state.auth_settings)
            .into_iter()
            .chain(api_entries(&state.api_settings))
        {
            out.setting(&settings_scope, &key, &value);
        }
        for preference in &state.preferences {
            let key = preference.key.trim();
            if !key.is_empty() {
                out.setting(&settings_scope, &format!("pref.{}", key), &preference.value);
            }
        }

        for bucket in &state.storage_buckets {
            out.bucket(bucket);
        }
        for function in &state.remote_functions {
            out.remote_function(function);
        }

        let summary = request
            .summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| out.default_summary());

        let (rollback_sql, rollback_warnings) = out.rollback.finish();
        let mut impact_preview = out.impact;
        for warning in rollback_warnings {
            impact_preview.warn(warning);
        }

        GeneratedChangeset {
            module: request.module.trim().to_string(),
            title: request.title.trim().to_string(),
            summary,
            scope: request.scope,
            tenant_id: request.tenant_id,
            desired_state: state.clone(),
            sql: out.sql,
            rollback_sql,
            impact_preview,
        }
    }
}

/// Mutable scratch space for a single compile call
#[derive(Default)]
struct Compilation {
    sql: Vec<String>,
    rollback: RollbackBuilder,
    impact: ImpactPreview,
}

impl Compilation {
    fn emit(&mut self, statement: String) {
        self.sql.push(statement);
    }

    fn emit_with_rollback(&mut self, statement: String, rollback: String) {
        self.sql.push(statement);
        self.rollback.record(rollback);
    }

    fn table(&mut self, table: &TableSpec) {
        let name = table.name.trim();
        if name.is_empty() {
            return;
        }
        let quoted = quote_qualified(name);
        self.impact.tables.insert(name.to_string());

        let columns: Vec<&ColumnSpec> = table.real_columns().collect();
        let created = table.create_if_missing && !columns.is_empty();

        if created {
            let defs: Vec<String> = columns
                .iter()
                .map(|col| format!("  {}", column_definition(col)))
                .collect();
            self.emit_with_rollback(
                format!("create table if not exists {} (\n{}\n);", quoted, defs.join(",\n")),
                format!("drop table if exists {};", quoted),
            );
        } else {
            for col in &columns {
                self.emit_with_rollback(
                    format!(
                        "alter table {} add column if not exists {};",
                        quoted,
                        column_definition(col)
                    ),
                    format!(
                        "alter table {} drop column if exists {};",
                        quoted,
                        quote_identifier(col.name.trim())
                    ),
                );
            }
        }

        if table.enable_row_level_security {
            let statement = format!("alter table {} enable row level security;", quoted);
            if created {
                // dropping the table takes RLS with it
                self.emit(statement);
            } else {
                self.impact.warn(format!(
                    "Reverting disables row level security on {} even if it was enabled before",
                    name
                ));
                self.emit_with_rollback(
                    statement,
                    format!("alter table {} disable row level security;", quoted),
                );
            }
        }

        for index in &table.indexes {
            let index_name = index.name.trim();
            let expression = index.expression.trim();
            if index_name.is_empty() || expression.is_empty() {
                continue;
            }
            let quoted_index = format!("{}{}", schema_prefix(name), quote_identifier(index_name));
            self.emit_with_rollback(
                format!(
                    "create {}index if not exists {} on {} ({});",
                    if index.unique { "unique " } else { "" },
                    quote_identifier(index_name),
                    quoted,
                    expression
                ),
                format!("drop index if exists {};", quoted_index),
            );
        }
    }

    fn policy(&mut self, policy: &PolicySpec) {
        let table = policy.table.trim();
        let name = policy.name.trim();
        if table.is_empty() || name.is_empty() {
            return;
        }
        self.impact.tables.insert(table.to_string());
        self.impact.policies.insert(name.to_string());

        let quoted_table = quote_qualified(table);
        let quoted_name = quote_identifier(name);
        let drop = format!("drop policy if exists {} on {};", quoted_name, quoted_table);

        let mut create = format!(
            "create policy {} on {} for {}",
            quoted_name,
            quoted_table,
            policy.command.as_sql()
        );
        let roles: Vec<String> = policy
            .roles
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(role_name)
            .collect();
        if !roles.is_empty() {
            create.push_str(&format!(" to {}", roles.join(", ")));
        }
        if !policy.using.trim().is_empty() {
            create.push_str(&format!(" using ({})", policy.using.trim()));
        }
        if !policy.with_check.trim().is_empty() {
            create.push_str(&format!(" with check ({})", policy.with_check.trim()));
        }
        create.push(';');

        self.emit(drop.clone());
        self.emit_with_rollback(create, drop);
    }

    fn trigger(&mut self, trigger: &TriggerSpec) {
        let table = trigger.table.trim();
        let name = trigger.name.trim();
        if trigger.events.is_empty() || table.is_empty() || name.is_empty() {
            return;
        }
        self.impact.tables.insert(table.to_string());
        self.impact.triggers.insert(name.to_string());

        let mut events: Vec<&'static str> = Vec::new();
        for event in &trigger.events {
            if !events.contains(&event.as_sql()) {
                events.push(event.as_sql());
            }
        }

        let quoted_table = quote_qualified(table);
        let quoted_name = quote_identifier(name);
        let drop = format!("drop trigger if exists {} on {};", quoted_name, quoted_table);
        let create = format!(
            "create trigger {} {} {} on {} for each row execute function {}();",
            quoted_name,
            trigger.timing.as_sql(),
            events.join(" OR "),
            quoted_table,
            quote_qualified(trigger.function())
        );

        self.emit(drop.clone());
        self.emit_with_rollback(create, drop);
    }

    fn function(&mut self, function: &FunctionSpec) {
        let signature = function.signature.trim();
        let body = function.body.trim();
        if signature.is_empty() || body.is_empty() {
            return;
        }
        self.impact.functions.insert(function.name().to_string());

        let returns = match function.returns.trim() {
            "" => "void",
            r => r,
        };
        let language: String = function
            .language
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let language = if language.is_empty() { "plpgsql".to_string() } else { language };

        let quoted_body = if body.contains(BODY_QUOTE_TAG) {
            quote_literal(body)
        } else {
            format!("{tag}\n{}\n{tag}", body, tag = BODY_QUOTE_TAG)
        };

        self.emit(format!(
            "create or replace function {}\nreturns {}\nlanguage {}{}\nas {};",
            signature,
            returns,
            language,
            if function.security_definer { "\nsecurity definer" } else { "" },
            quoted_body
        ));

        if !signature.contains('(') {
            self.rollback.record_manual(signature, "signature has no argument list");
        } else if DEFAULT_ARGUMENT.is_match(signature) {
            self.rollback.record_manual(signature, "signature has default arguments");
        } else {
            self.rollback.record(format!("drop function if exists {};", signature));
        }
    }

    fn setting(&mut self, scope: &SettingsScope, key: &str, value: &serde_json::Value) {
        self.impact.settings_keys.insert(key.to_string());
        self.emit(format!(
            "insert into {} (scope, tenant_key, tenant_id, key, value)\n\
             values ({}, {}, {}, {}, {}::jsonb)\n\
             on conflict (scope, tenant_key, key) do update set value = excluded.value, updated_at = now();",
            SETTINGS_TABLE,
            quote_literal(scope.scope.as_str()),
            quote_literal(&scope.tenant_key()),
            scope.tenant_sql(),
            quote_literal(key),
            quote_literal(&value.to_string())
        ));
    }

    fn bucket(&mut self, bucket: &StorageBucketSpec) {
        let name = bucket.name.trim();
        if name.is_empty() {
            return;
        }
        let scope = SettingsScope::new(bucket.scope, bucket.tenant_id);
        if scope.missing_tenant() {
            self.impact.warn(MISSING_TENANT_WARNING);
        }
        self.impact.storage_buckets.insert(name.to_string());

        let mime_types: Vec<String> = bucket
            .allowed_mime_types
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(quote_literal)
            .collect();

        self.emit(format!(
            "insert into {} (scope, tenant_key, tenant_id, name, public, allowed_mime_types, file_size_limit)\n\
             values ({}, {}, {}, {}, {}, array[{}]::text[], {})\n\
             on conflict (scope, tenant_key, name) do update set public = excluded.public, \
             allowed_mime_types = excluded.allowed_mime_types, file_size_limit = excluded.file_size_limit, \
             updated_at = now();",
            BUCKETS_TABLE,
            quote_literal(scope.scope.as_str()),
            quote_literal(&scope.tenant_key()),
            scope.tenant_sql(),
            quote_literal(name),
            bucket.public,
            mime_types.join(", "),
            bucket
                .file_size_limit_bytes
                .map(|limit| limit.to_string())
                .unwrap_or_else(|| "null".to_string())
        ));
    }

    fn remote_function(&mut self, function: &RemoteFunctionSpec) {
        let name = function.name.trim();
        if name.is_empty() {
            return;
        }
        let scope = SettingsScope::new(function.scope, function.tenant_id);
        if scope.missing_tenant() {
            self.impact.warn(MISSING_TENANT_WARNING);
        }
        self.impact.remote_functions.insert(name.to_string());

        let route = match function.route.trim() {
            "" => format!("/{}", name),
            r => r.to_string(),
        };

        self.emit(format!(
            "insert into {} (scope, tenant_key, tenant_id, name, route, enabled, version)\n\
             values ({}, {}, {}, {}, {}, {}, {})\n\
             on conflict (scope, tenant_key, name) do update set route = excluded.route, \
             enabled = excluded.enabled, version = excluded.version, updated_at = now();",
            REMOTE_FUNCTIONS_TABLE,
            quote_literal(scope.scope.as_str()),
            quote_literal(&scope.tenant_key()),
            scope.tenant_sql(),
            quote_literal(name),
            quote_literal(&route),
            function.enabled,
            quote_literal(function.version.trim())
        ));
    }

    fn default_summary(&self) -> String {
        let i = &self.impact;
        format!(
            "{} table(s), {} policy(ies), {} trigger(s), {} function(s), {} setting(s), \
             {} bucket(s), {} remote function(s)",
            i.tables.len(),
            i.policies.len(),
            i.triggers.len(),
            i.functions.len(),
            i.settings_keys.len(),
            i.storage_buckets.len(),
            i.remote_functions.len()
        )
    }
}

// =============================================================================
// HELPERS
// =============================================================================

struct SettingsScope {
    scope: Scope,
    tenant_id: Option<Uuid>,
}

impl SettingsScope {
    fn new(scope: Scope, tenant_id: Option<Uuid>) -> Self {
        // a tenant id on a global entry is meaningless, drop it
        let tenant_id = match scope {
            Scope::Global => None,
            Scope::Tenant => tenant_id,
        };
        Self { scope, tenant_id }
    }

    fn missing_tenant(&self) -> bool {
        self.scope == Scope::Tenant && self.tenant_id.is_none()
    }

    /// Non-null conflict key; `''` stands for "no tenant"
    fn tenant_key(&self) -> String {
        self.tenant_id.map(|id| id.to_string()).unwrap_or_default()
    }

    fn tenant_sql(&self) -> String {
        self.tenant_id
            .map(|id| format!("{}::uuid", quote_literal(&id.to_string())))
            .unwrap_or_else(|| "null".to_string())
    }
}

fn column_definition(col: &ColumnSpec) -> String {
    let data_type = match col.data_type.trim() {
        "" => "text",
        t => t,
    };
    let mut def = format!("{} {}", quote_identifier(col.name.trim()), data_type);
    if !col.nullable {
        def.push_str(" not null");
    }
    if col.unique {
        def.push_str(" unique");
    }
    if let Some(default) = col.default_value.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        def.push_str(&format!(" default {}", default));
    }
    if let Some(target) = col.references_table.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        def.push_str(&format!(" references {}", quote_qualified(target)));
        if let Some(column) = col
            .references_column
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            def.push_str(&format!(" ({})", quote_identifier(column)));
        }
    }
    def
}

/// `"schema".` when the table name is schema-qualified, else empty
fn schema_prefix(table: &str) -> String {
    match table.split_once('.') {
        Some((schema, object)) if !schema.is_empty() && !object.is_empty() => {
            format!("{}.", quote_identifier(schema))
        }
        _ => String::new(),
    }
}

/// `public` is a pseudo-role and must stay unquoted
fn role_name(role: &str) -> String {
    if role.eq_ignore_ascii_case("public") {
        "public".to_string()
    } else {
        quote_identifier(role)
    }
}

fn auth_entries(auth: &AuthSettings) -> Vec<(String, serde_json::Value)> {
    let mut entries = Vec::new();
    if let Some(ref url) = auth.site_url {
        entries.push(("auth.site_url".to_string(), serde_json::json!(url)));
    }
    if let Some(ref urls) = auth.additional_redirect_urls {
        entries.push(("auth.additional_redirect_urls".to_string(), serde_json::json!(urls)));
    }
    if let Some(seconds) = auth.jwt_expiry_seconds {
        entries.push(("auth.jwt_expiry_seconds".to_string(), serde_json::json!(seconds)));
    }
    if let Some(enabled) = auth.enable_signup {
        entries.push(("auth.enable_signup".to_string(), serde_json::json!(enabled)));
    }
    if let Some(required) = auth.email_confirmation_required {
        entries.push(("auth.email_confirmation_required".to_string(), serde_json::json!(required)));
    }
    if let Some(enabled) = auth.mfa_enabled {
        entries.push(("auth.mfa_enabled".to_string(), serde_json::json!(enabled)));
    }
    entries
}

fn api_entries(api: &ApiSettings) -> Vec<(String, serde_json::Value)> {
    let mut entries = Vec::new();
    if let Some(ref schemas) = api.exposed_schemas {
        entries.push(("api.exposed_schemas".to_string(), serde_json::json!(schemas)));
    }
    if let Some(ref path) = api.extra_search_path {
        entries.push(("api.extra_search_path".to_string(), serde_json::json!(path)));
    }
    if let Some(rows) = api.max_rows {
        entries.push(("api.max_rows".to_string(), serde_json::json!(rows)));
    }
    if let Some(ref origins) = api.cors_allowed_origins {
        entries.push(("api.cors_allowed_origins".to_string(), serde_json::json!(origins)));
    }
    entries
}
