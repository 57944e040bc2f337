//! Dry run validator
//!
//! Validates a statement batch in a transaction that always gets rolled back.

use crate::changeset::ValidationReport;
use crate::error::AppError;
use crate::execution::RemoteValidator;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::debug;

pub struct PgDryRunValidator {
    pool: Pool,
}

impl PgDryRunValidator {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RemoteValidator for PgDryRunValidator {
    async fn validate(&self, statements: &[String]) -> Result<ValidationReport, AppError> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        let mut warnings = Vec::new();

        for (i, statement) in statements.iter().enumerate() {
            let stmt = statement.trim();
            if stmt.is_empty() || stmt.starts_with("--") {
                continue;
            }

            if let Err(e) = transaction.batch_execute(stmt).await {
                debug!("Dry run stopped at statement {}: {}", i + 1, e);
                // Rollback is automatic when transaction is dropped
                let message = e
                    .as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| e.to_string());
                return Ok(ValidationReport::failed(vec![format!(
                    "Statement {} failed: {}",
                    i + 1,
                    message
                )]));
            }

            if stmt.contains(" add column ") && stmt.contains(" not null") && !stmt.contains(" default ") {
                warnings.push(format!(
                    "Statement {} adds a NOT NULL column without a default; it will fail on non-empty tables",
                    i + 1
                ));
            }
        }

        // Always rollback - this is a dry run
        transaction.rollback().await?;

        Ok(ValidationReport::passed(warnings))
    }
}
