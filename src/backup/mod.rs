// Backup and Restore - snapshot, archive, verify, retain and replay the graph store

/// Snapshot files, manifest and tar/gzip packing
pub mod archive;
/// Backup orchestration, verification, retention and restore
pub mod manager;
/// Artifact and record files
pub mod storage;
/// Records, results and errors
pub mod types;

pub use archive::{GraphDump, Manifest};
pub use manager::{BackupManager, SOURCE_ID_PROPERTY};
pub use storage::{BackupStorage, FileBackupStorage};
pub use types::{
    BackupError, BackupKind, BackupRecord, BackupStatus, CleanupResult, RestoreResult,
    VerificationResult,
};
