// Backup System Types - records, results and errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a backup captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// Entire graph in one `graph.json`
    Full,
    /// Entities changed since the last completed backup of any kind
    Incremental,
    /// Entities changed since the last completed full or export backup
    Differential,
    /// One `nodes_<label>.json` per entity type plus `relationships.json`
    Export,
}

impl BackupKind {
    /// Stable lowercase name used in records and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Differential => "differential",
            BackupKind::Export => "export",
        }
    }

    /// Full and export backups capture the whole graph
    pub fn is_complete_snapshot(&self) -> bool {
        matches!(self, BackupKind::Full | BackupKind::Export)
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a backup record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// Scheduled, waiting for a pipeline
    Pending,
    /// Pipeline in progress
    Running,
    /// Artifact written and verified
    Completed,
    /// Pipeline stopped with an error
    Failed,
    /// Artifact failed verification; kept for forensic review
    Corrupted,
}

impl BackupStatus {
    /// Completed, failed or corrupted
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackupStatus::Completed | BackupStatus::Failed | BackupStatus::Corrupted
        )
    }

    /// Stable lowercase name used in records and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Running => "running",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
            BackupStatus::Corrupted => "corrupted",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted as `{id}.metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Backup id, also the artifact file stem
    pub id: String,
    /// Snapshot kind
    pub kind: BackupKind,
    /// Current lifecycle status
    pub status: BackupStatus,
    /// When the record was created
    pub started_at: DateTime<Utc>,
    /// When the pipeline reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Artifact size on disk
    pub size_bytes: u64,
    /// Live node count when the snapshot finished
    pub node_count: u64,
    /// Live relationship count when the snapshot finished
    pub relationship_count: u64,
    /// SHA-256 of the final artifact, hex encoded
    pub checksum: Option<String>,
    /// Artifact is an encrypted container
    pub encrypted: bool,
    /// Archive is gzip compressed
    pub compressed: bool,
    /// Days to keep before retention may delete it
    pub retention_days: u32,
    /// Free-form labels such as `pre-migration`
    #[serde(default)]
    pub tags: Vec<String>,
    /// Cut-off used for incremental and differential exports
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Key used when `encrypted`
    #[serde(default)]
    pub encryption_key_id: Option<String>,
    /// Failure reason for failed or corrupted backups
    pub error: Option<String>,
}

impl BackupRecord {
    /// Fresh pending record with a new id
    pub fn new(kind: BackupKind, tags: Vec<String>, retention_days: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: BackupStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            size_bytes: 0,
            node_count: 0,
            relationship_count: 0,
            checksum: None,
            encrypted: false,
            compressed: false,
            retention_days,
            tags,
            since: None,
            encryption_key_id: None,
            error: None,
        }
    }
}

/// Outcome of replaying a backup into a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Backup that was replayed
    pub backup_id: String,
    /// Replay finished without error
    pub success: bool,
    /// Nodes removed from the target before replay
    pub nodes_cleared: u64,
    /// Nodes created in the target
    pub nodes_restored: u64,
    /// Relationships created in the target
    pub relationships_restored: u64,
    /// Relationships whose endpoints resolved to neither a restored node nor
    /// an existing one
    pub relationships_skipped: u64,
    /// Wall-clock replay time
    pub duration_seconds: f64,
    /// Failure reason when `success` is false
    pub error: Option<String>,
}

/// Outcome of re-reading a stored artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Backup that was checked
    pub backup_id: String,
    /// Every check passed
    pub is_valid: bool,
    /// Artifact bytes match the recorded SHA-256
    pub checksum_match: bool,
    /// Artifact could be read and unpacked
    pub archive_readable: bool,
    /// Manifest and file checksums agree
    pub manifest_consistent: bool,
    /// Every failure message collected
    pub errors: Vec<String>,
}

impl VerificationResult {
    /// True when the stored artifact itself is bad, as opposed to being
    /// unreadable for operational reasons such as a missing key
    pub fn artifact_damaged(&self) -> bool {
        !(self.checksum_match && self.archive_readable && self.manifest_consistent)
    }
}

/// Outcome of a retention sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    /// Backups removed
    pub deleted_backups: usize,
    /// Backups kept
    pub retained_backups: usize,
    /// Corrupted records past retention that were kept anyway
    pub retained_corrupted: usize,
}

/// Errors raised by the backup pipeline and archive format
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Artifact bytes differ from the recorded checksum
    #[error("Checksum mismatch: {0}")]
    ChecksumMismatch(String),
    /// Artifact or record file unavailable
    #[error("Storage error: {0}")]
    StorageError(String),
    /// Tar or gzip stream could not be built or read
    #[error("Archive error: {0}")]
    ArchiveError(String),
    /// Encryption layer failed
    #[error("Encryption error: {0}")]
    EncryptionError(String),
    /// Manifest or per-file checksum mismatch
    #[error("Verification error: {0}")]
    VerificationError(String),
    /// Replay into the target failed
    #[error("Restore error: {0}")]
    RestoreError(String),
    /// Filesystem failure
    #[error("IO error: {0}")]
    IoError(String),
    /// JSON snapshot or record could not be (de)serialized
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_snake_case() {
        let record = BackupRecord::new(BackupKind::Differential, vec!["nightly".into()], 30);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "differential");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["retention_days"], 30);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(BackupStatus::Corrupted.is_terminal());
        assert!(BackupStatus::Failed.is_terminal());
        assert!(!BackupStatus::Running.is_terminal());
    }
}
