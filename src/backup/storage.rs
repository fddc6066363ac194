// Backup Storage - artifact and metadata files on the local filesystem

use super::types::{BackupError, BackupRecord};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::error;

/// Where backup artifacts and records live
#[async_trait]
pub trait BackupStorage: Send + Sync {
    /// Persist a record; called after every status transition
    async fn save_record(&self, record: &BackupRecord) -> Result<(), BackupError>;
    /// Every record found in storage
    async fn load_records(&self) -> Result<Vec<BackupRecord>, BackupError>;
    /// Move a finished artifact into place
    async fn store_artifact(&self, backup_id: &str, source: &Path) -> Result<u64, BackupError>;
    /// Location of a backup's artifact
    fn artifact_path(&self, backup_id: &str) -> PathBuf;
    /// Remove a backup's artifact and record
    async fn delete_backup(&self, backup_id: &str) -> Result<(), BackupError>;
}

/// Layout: `{id}.backup` and `{id}.metadata.json` in one directory
pub struct FileBackupStorage {
    backup_directory: PathBuf,
}

impl FileBackupStorage {
    /// Storage rooted at `directory`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            backup_directory: directory.into(),
        }
    }

    /// Root directory
    pub fn directory(&self) -> &Path {
        &self.backup_directory
    }

    /// Create the root directory if missing
    pub async fn ensure_directory_exists(&self) -> Result<(), BackupError> {
        if !self.backup_directory.exists() {
            fs::create_dir_all(&self.backup_directory)
                .await
                .map_err(|e| BackupError::IoError(format!("Failed to create backup directory: {}", e)))?;
        }
        Ok(())
    }

    fn metadata_path(&self, backup_id: &str) -> PathBuf {
        self.backup_directory.join(format!("{}.metadata.json", backup_id))
    }
}

#[async_trait]
impl BackupStorage for FileBackupStorage {
    async fn save_record(&self, record: &BackupRecord) -> Result<(), BackupError> {
        self.ensure_directory_exists().await?;

        let metadata_json = serde_json::to_string_pretty(record)
            .map_err(|e| BackupError::SerializationError(format!("Failed to serialize metadata: {}", e)))?;

        // Write-then-rename so readers never see a half-written record
        let final_path = self.metadata_path(&record.id);
        let tmp_path = final_path.with_extension("json.tmp");
        fs::write(&tmp_path, metadata_json)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to write metadata: {}", e)))?;
        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to commit metadata: {}", e)))?;

        Ok(())
    }

    async fn load_records(&self) -> Result<Vec<BackupRecord>, BackupError> {
        if !self.backup_directory.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.backup_directory)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to read backup directory: {}", e)))?;

        let mut records = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to read directory entry: {}", e)))?
        {
            let path = entry.path();
            let is_metadata = path
                .file_name()
                .and_then(|s| s.to_str())
                .map_or(false, |name| name.ends_with(".metadata.json"));
            if !is_metadata {
                continue;
            }

            let metadata_json = match fs::read_to_string(&path).await {
                Ok(json) => json,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to read backup metadata");
                    continue;
                }
            };

            match serde_json::from_str::<BackupRecord>(&metadata_json) {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Skipping malformed backup metadata");
                }
            }
        }

        // Newest first
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(records)
    }

    async fn store_artifact(&self, backup_id: &str, source: &Path) -> Result<u64, BackupError> {
        self.ensure_directory_exists().await?;
        let target = self.artifact_path(backup_id);

        if fs::rename(source, &target).await.is_err() {
            // Staging may live on another filesystem
            fs::copy(source, &target)
                .await
                .map_err(|e| BackupError::IoError(format!("Failed to store artifact: {}", e)))?;
        }

        let size = fs::metadata(&target)
            .await
            .map_err(|e| BackupError::IoError(format!("Failed to stat artifact: {}", e)))?
            .len();
        Ok(size)
    }

    fn artifact_path(&self, backup_id: &str) -> PathBuf {
        self.backup_directory.join(format!("{}.backup", backup_id))
    }

    async fn delete_backup(&self, backup_id: &str) -> Result<(), BackupError> {
        let backup_path = self.artifact_path(backup_id);
        let metadata_path = self.metadata_path(backup_id);

        if backup_path.exists() {
            fs::remove_file(&backup_path)
                .await
                .map_err(|e| BackupError::IoError(format!("Failed to delete backup file: {}", e)))?;
        }

        if metadata_path.exists() {
            fs::remove_file(&metadata_path)
                .await
                .map_err(|e| BackupError::IoError(format!("Failed to delete metadata file: {}", e)))?;
        }

        Ok(())
    }
}
