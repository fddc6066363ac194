//! Persisted migration state (`migration_history.json`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::types::{MigrationRecord, SchemaVersion};
use crate::{Result, SafeguardError};

const HISTORY_FILE: &str = "migration_history.json";

/// Current version plus every execution attempt, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationHistory {
    /// Version after the last completed migration
    pub current_version: SchemaVersion,
    /// Every attempt, oldest first
    pub records: Vec<MigrationRecord>,
}

impl MigrationHistory {
    /// History file under `state_dir`
    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(HISTORY_FILE)
    }

    /// Load the history, or start fresh at `initial_version`
    pub async fn load(state_dir: &Path, initial_version: SchemaVersion) -> Result<Self> {
        let path = Self::path(state_dir);
        if !path.exists() {
            return Ok(Self {
                current_version: initial_version,
                records: Vec::new(),
            });
        }

        let raw = fs::read(&path).await?;
        serde_json::from_slice(&raw).map_err(|e| {
            SafeguardError::Configuration(format!(
                "Corrupt migration history {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Write-then-rename
    pub async fn save(&self, state_dir: &Path) -> Result<()> {
        let path = Self::path(state_dir);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Latest attempt of a migration
    pub fn latest(&self, migration_id: &str) -> Option<&MigrationRecord> {
        self.records
            .iter()
            .rev()
            .find(|r| r.migration_id == migration_id)
    }

    /// Attempt number for the next run
    pub fn next_attempt(&self, migration_id: &str) -> u32 {
        self.latest(migration_id).map_or(1, |r| r.attempt + 1)
    }

    /// Insert or replace the record for (migration id, attempt)
    pub fn upsert(&mut self, record: &MigrationRecord) {
        match self
            .records
            .iter_mut()
            .find(|r| r.migration_id == record.migration_id && r.attempt == record.attempt)
        {
            Some(existing) => *existing = record.clone(),
            None => self.records.push(record.clone()),
        }
    }
}
