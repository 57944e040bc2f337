//! Changeset engine
//!
//! Turns a declarative desired-state model into forward and rollback SQL,
//! validates it, and tracks each changeset through its lifecycle.

pub mod compiler;
pub mod lifecycle;
pub mod model;
pub mod record;
pub mod rollback;
pub mod sanitize;
pub mod store;
pub mod validate;

pub use compiler::CompileRequest;
pub use lifecycle::{ChangesetManager, ChangesetPreview};
pub use model::{DesiredState, Scope};
pub use record::{ChangesetFilter, ChangesetRecord, ChangesetStatus, StatusUpdate};
pub use store::{ChangesetStore, InMemoryChangesetStore};
pub use validate::ValidationReport;
