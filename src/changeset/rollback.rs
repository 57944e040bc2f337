//! Rollback accumulation
//!
//! Every inverse statement goes to the front of the list, so the finished
//! rollback runs in exact reverse of the forward application order.

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct RollbackBuilder {
    statements: VecDeque<String>,
    warnings: Vec<String>,
}

impl RollbackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the inverse of the forward statement that was just emitted
    pub fn record(&mut self, statement: String) {
        self.statements.push_front(statement);
    }

    /// Record a placeholder for a change that has no automatic inverse
    pub fn record_manual(&mut self, object: &str, reason: &str) {
        self.statements.push_front(format!(
            "-- manual rollback required for function {}: {}",
            object.replace('\n', " "),
            reason
        ));
        self.warnings.push(format!(
            "Function {} has no automatic rollback ({}); revert it manually",
            object, reason
        ));
    }

    /// Consume the builder, yielding rollback statements and any warnings
    pub fn finish(self) -> (Vec<String>, Vec<String>) {
        (self.statements.into_iter().collect(), self.warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_reverse_order() {
        let mut builder = RollbackBuilder::new();
        builder.record("drop table a;".to_string());
        builder.record("drop policy p on a;".to_string());
        builder.record("drop trigger t on a;".to_string());

        let (statements, warnings) = builder.finish();
        assert_eq!(
            statements,
            vec!["drop trigger t on a;", "drop policy p on a;", "drop table a;"]
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_manual_rollback_emits_placeholder_and_warning() {
        let mut builder = RollbackBuilder::new();
        builder.record_manual("public.calc", "signature has default arguments");

        let (statements, warnings) = builder.finish();
        assert!(statements[0].starts_with("-- manual rollback required for function public.calc"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("public.calc"));
    }
}
