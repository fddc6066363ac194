// Migrations - versioned schema and data changes with per-step rollback

/// Persisted migration history
pub mod history;
/// Migration planning and execution
pub mod manager;
/// Definitions, records and versions
pub mod types;

pub use history::MigrationHistory;
pub use manager::MigrationManager;
pub use types::{
    MigrationDefinition, MigrationKind, MigrationRecord, MigrationStatus, MigrationStatusReport,
    MigrationStep, SchemaVersion, StepValidation, ValidationExpectation,
};

use crate::config::load_definition_dir;
use crate::Result;
use std::path::Path;

/// Read migration definitions (JSON or YAML, one per file) from `dir`
pub fn load_definitions(dir: &Path) -> Result<Vec<MigrationDefinition>> {
    load_definition_dir(dir, "migration")
}
