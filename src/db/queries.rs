//! SQL query constants
//!
//! Contains all SQL used by the changeset store and the startup bootstrap.

/// Columns returned for every changeset read
pub const CHANGESET_COLUMNS: &str = "id, scope, tenant_id, title, summary, module, desired_state, \
     sql, rollback_sql, impact_preview, checksum, validation_report, status, error_text, \
     created_by, created_at, updated_at";

/// Insert a new changeset record
pub const INSERT_CHANGESET: &str = r#"
    INSERT INTO changesets (
        id, scope, tenant_id, title, summary, module, desired_state,
        sql, rollback_sql, impact_preview, checksum, validation_report, status, error_text,
        created_by, created_at, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
"#;

/// Fetch one changeset by id
pub fn select_changeset() -> String {
    format!("SELECT {} FROM changesets WHERE id = $1", CHANGESET_COLUMNS)
}

/// Fetch one changeset by id and lock it for a status update
pub fn select_changeset_for_update() -> String {
    format!("SELECT {} FROM changesets WHERE id = $1 FOR UPDATE", CHANGESET_COLUMNS)
}

/// List changesets, newest first. Null parameters disable their filter.
pub fn list_changesets() -> String {
    format!(
        "SELECT {} FROM changesets
         WHERE ($1::text IS NULL OR module = $1)
           AND ($2::text IS NULL OR status = $2)
           AND ($3::uuid IS NULL OR tenant_id = $3)
         ORDER BY created_at DESC
         LIMIT $4",
        CHANGESET_COLUMNS
    )
}

/// Move a changeset to a new status
pub const UPDATE_CHANGESET_STATUS: &str = r#"
    UPDATE changesets
    SET status = $2,
        error_text = $3,
        validation_report = COALESCE($4, validation_report),
        updated_at = $5
    WHERE id = $1
"#;

// =============================================================================
// BOOTSTRAP
// =============================================================================

/// Changeset history
pub const CREATE_CHANGESETS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS changesets (
        id UUID PRIMARY KEY,
        scope TEXT NOT NULL DEFAULT 'global',
        tenant_id UUID,
        title TEXT NOT NULL,
        summary TEXT NOT NULL DEFAULT '',
        module TEXT NOT NULL,
        desired_state JSONB NOT NULL,
        sql JSONB NOT NULL,
        rollback_sql JSONB NOT NULL,
        impact_preview JSONB NOT NULL,
        checksum TEXT NOT NULL,
        validation_report JSONB,
        status TEXT NOT NULL,
        error_text TEXT,
        created_by TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

/// Scoped key/value settings targeted by settings and preference upserts
pub const CREATE_APP_SETTINGS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS public.app_settings (
        id BIGSERIAL PRIMARY KEY,
        scope TEXT NOT NULL,
        tenant_key TEXT NOT NULL DEFAULT '',
        tenant_id UUID,
        key TEXT NOT NULL,
        value JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (scope, tenant_key, key)
    )
"#;

/// Storage bucket registry
pub const CREATE_STORAGE_BUCKETS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS public.storage_buckets (
        id BIGSERIAL PRIMARY KEY,
        scope TEXT NOT NULL,
        tenant_key TEXT NOT NULL DEFAULT '',
        tenant_id UUID,
        name TEXT NOT NULL,
        public BOOLEAN NOT NULL DEFAULT false,
        allowed_mime_types TEXT[] NOT NULL DEFAULT '{}',
        file_size_limit BIGINT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (scope, tenant_key, name)
    )
"#;

/// Remote function registry
pub const CREATE_REMOTE_FUNCTIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS public.remote_function_registry (
        id BIGSERIAL PRIMARY KEY,
        scope TEXT NOT NULL,
        tenant_key TEXT NOT NULL DEFAULT '',
        tenant_id UUID,
        name TEXT NOT NULL,
        route TEXT NOT NULL,
        enabled BOOLEAN NOT NULL DEFAULT true,
        version TEXT NOT NULL DEFAULT '1',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (scope, tenant_key, name)
    )
"#;

pub const CREATE_CHANGESET_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_changesets_module ON changesets(module)",
    "CREATE INDEX IF NOT EXISTS idx_changesets_status ON changesets(status)",
    "CREATE INDEX IF NOT EXISTS idx_changesets_created_at ON changesets(created_at DESC)",
];

// =============================================================================
// EXECUTION
// =============================================================================

/// Lock a changeset row for the duration of an apply/revert transaction
pub const LOCK_CHANGESET_STATUS: &str = "SELECT status FROM changesets WHERE id = $1 FOR UPDATE";

/// Move the status only if it is still the expected one
pub const CLAIM_CHANGESET_STATUS: &str = r#"
    UPDATE changesets
    SET status = $2, error_text = NULL, updated_at = $4
    WHERE id = $1 AND status = $3
"#;
