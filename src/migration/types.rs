//! Migration definitions, records and versions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::store::{GraphCommand, GraphQuery};
use crate::SafeguardError;

/// Dotted numeric version (`1.2.0`). Trailing zero components do not affect
/// ordering or equality, so `1.2 == 1.2.0`.
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    parts: Vec<u64>,
}

impl SchemaVersion {
    /// Version from raw components
    pub fn new(parts: &[u64]) -> Self {
        Self {
            parts: parts.to_vec(),
        }
    }

    fn significant(&self) -> &[u64] {
        let len = self
            .parts
            .iter()
            .rposition(|p| *p != 0)
            .map_or(0, |i| i + 1);
        &self.parts[..len]
    }
}

impl PartialEq for SchemaVersion {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for SchemaVersion {}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.significant().cmp(other.significant())
    }
}

impl FromStr for SchemaVersion {
    type Err = SafeguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim()
            .trim_start_matches('v')
            .split('.')
            .map(|p| p.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SafeguardError::Configuration(format!("Invalid version '{}': {}", s, e)))?;
        Ok(Self { parts })
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.parts.iter().map(|p| p.to_string()).collect();
        f.write_str(&rendered.join("."))
    }
}

impl Serialize for SchemaVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SchemaVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// What a migration changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationKind {
    /// Labels or properties
    Schema,
    /// Values only
    Data,
    /// Indexes
    Index,
    /// Constraints
    Constraint,
}

/// How a validation query's rows are judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationExpectation {
    /// No rows
    Empty,
    /// At least one row
    NonEmpty,
    /// First row carries `valid: true`
    ValidFlag,
}

/// Post-step check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepValidation {
    /// Query to run after the forward command
    pub query: GraphQuery,
    /// How its rows are judged
    pub expect: ValidationExpectation,
}

/// One reversible unit of a migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStep {
    /// Step id, unique within the migration
    pub id: String,
    /// Optional summary
    #[serde(default)]
    pub description: Option<String>,
    /// Command applied on upgrade
    pub forward: GraphCommand,
    /// Command that undoes `forward`
    #[serde(default)]
    pub rollback: Option<GraphCommand>,
    /// Check run after `forward`
    #[serde(default)]
    pub validation: Option<StepValidation>,
    /// Falls back to the configured default
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// A versioned migration loaded from disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationDefinition {
    /// Migration id, also its sort key
    pub id: String,
    /// Summary
    #[serde(default)]
    pub description: String,
    /// Version the migration applies to
    pub version_from: SchemaVersion,
    /// Version after it completes
    pub version_to: SchemaVersion,
    /// Category
    pub kind: MigrationKind,
    /// Ordered steps
    pub steps: Vec<MigrationStep>,
    /// Migrations that must complete first
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Undo executed steps on failure
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
    /// Take a full backup before running
    #[serde(default)]
    pub backup_required: bool,
}

impl MigrationDefinition {
    /// Structural checks run when definitions are loaded
    pub fn validate(&self) -> crate::Result<()> {
        if self.id.trim().is_empty() {
            return Err(SafeguardError::Configuration("Migration id is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(SafeguardError::Configuration(format!(
                "Migration {} has no steps",
                self.id
            )));
        }
        if self.version_to < self.version_from {
            return Err(SafeguardError::Configuration(format!(
                "Migration {} goes backwards ({} -> {})",
                self.id, self.version_from, self.version_to
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(SafeguardError::Configuration(format!(
                    "Migration {} repeats step id {}",
                    self.id, step.id
                )));
            }
            step.forward.validate()?;
            if let Some(rollback) = &step.rollback {
                rollback.validate()?;
            }
            if let Some(validation) = &step.validation {
                validation.query.validate()?;
            }
        }
        Ok(())
    }

    /// Step by id
    pub fn step(&self, step_id: &str) -> Option<&MigrationStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// Lifecycle of a migration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Not yet run
    Pending,
    /// In progress
    Running,
    /// All steps applied
    Completed,
    /// A step failed
    Failed,
    /// Executed steps were undone
    RolledBack,
}

impl MigrationStatus {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Running => "running",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution attempt of a migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration this attempt ran
    pub migration_id: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Outcome so far
    pub status: MigrationStatus,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time, once terminal
    pub completed_at: Option<DateTime<Utc>>,
    /// Steps applied, in order
    pub executed_steps: Vec<String>,
    /// Step that failed, if any
    pub failed_step: Option<String>,
    /// Failure message
    pub error: Option<String>,
    /// Every executed step was undone
    pub rollback_completed: bool,
    /// First rollback failure
    #[serde(default)]
    pub rollback_error: Option<String>,
    /// Pre-migration backup, when one was required
    #[serde(default)]
    pub backup_id: Option<String>,
}

impl MigrationRecord {
    /// Fresh running record
    pub fn start(migration_id: &str, attempt: u32) -> Self {
        Self {
            migration_id: migration_id.to_string(),
            attempt,
            status: MigrationStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            executed_steps: Vec::new(),
            failed_step: None,
            error: None,
            rollback_completed: false,
            rollback_error: None,
            backup_id: None,
        }
    }
}

/// Migration state overview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatusReport {
    /// Current schema version
    pub current_version: SchemaVersion,
    /// Not yet completed
    pub pending: Vec<String>,
    /// Latest attempt completed
    pub completed: Vec<String>,
    /// Latest attempt failed
    pub failed: Vec<String>,
    /// Latest attempt rolled back
    pub rolled_back: Vec<String>,
    /// Left `running` by a crashed process; needs manual intervention
    pub stuck: Vec<String>,
}
