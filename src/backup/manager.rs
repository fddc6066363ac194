// Backup Manager - backup orchestration, verification, retention and restore

use super::archive::{self, GraphDump, Manifest};
use super::storage::{BackupStorage, FileBackupStorage};
use super::types::{
    BackupError, BackupKind, BackupRecord, BackupStatus, CleanupResult, RestoreResult,
    VerificationResult,
};
use crate::audit::AuditLogger;
use crate::config::BackupConfig;
use crate::context::OperationContext;
use crate::encryption::{EncryptedContainer, EncryptionManager};
use crate::metrics::ProtectionMetrics;
use crate::encryption::KeyLifecycleError;
use crate::store::{
    ClearScope, GraphCommand, GraphStore, NodeRecord, RelationshipRecord, StoreError,
};
use crate::{Result, SafeguardError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Property recording the id an entity had in the store a backup was taken
/// from. Delta restores use it to find the entities they replace.
pub const SOURCE_ID_PROPERTY: &str = "_source_id";

/// Snapshots the graph store into verified, optionally encrypted archives.
///
/// Cloning is cheap; clones share records, the in-flight table and the
/// parallelism cap.
#[derive(Clone)]
pub struct BackupManager {
    config: Arc<BackupConfig>,
    store: Arc<dyn GraphStore>,
    storage: Arc<FileBackupStorage>,
    encryption: Option<Arc<EncryptionManager>>,
    records: Arc<RwLock<HashMap<String, BackupRecord>>>,
    in_flight: Arc<DashMap<String, watch::Receiver<BackupStatus>>>,
    permits: Arc<Semaphore>,
    audit: AuditLogger,
}

impl BackupManager {
    /// Create the backup directory and load existing records. Records left
    /// `pending` or `running` by a previous process are marked failed.
    pub async fn initialize(
        config: BackupConfig,
        store: Arc<dyn GraphStore>,
        encryption: Option<Arc<EncryptionManager>>,
    ) -> Result<Self> {
        let storage = FileBackupStorage::new(config.backup_dir.clone());
        storage.ensure_directory_exists().await.map_err(|e| {
            SafeguardError::Configuration(format!(
                "Backup directory {} unusable: {}",
                config.backup_dir.display(),
                e
            ))
        })?;

        if config.encrypt && encryption.is_none() {
            warn!(
                backup_dir = %config.backup_dir.display(),
                "Backup encryption requested but no encryption manager supplied; archives will be stored in clear"
            );
        }

        let mut records = HashMap::new();
        for mut record in storage.load_records().await? {
            if !record.status.is_terminal() {
                warn!(backup_id = %record.id, status = %record.status, "Backup interrupted by restart");
                record.status = BackupStatus::Failed;
                record.completed_at = Some(Utc::now());
                record.error = Some("Interrupted before completion".to_string());
                storage.save_record(&record).await?;
            }
            records.insert(record.id.clone(), record);
        }

        info!(
            backup_dir = %config.backup_dir.display(),
            records = records.len(),
            max_parallel = config.max_parallel_backups,
            "Backup manager initialized"
        );

        let permits = Arc::new(Semaphore::new(config.max_parallel_backups.max(1)));
        Ok(Self {
            config: Arc::new(config),
            store,
            storage: Arc::new(storage),
            encryption,
            records: Arc::new(RwLock::new(records)),
            in_flight: Arc::new(DashMap::new()),
            permits,
            audit: AuditLogger::new(),
        })
    }

    /// Record restores in a shared audit trail
    pub fn with_audit_logger(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Effective configuration
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    fn staging_dir(&self, name: &str) -> PathBuf {
        self.config.backup_dir.join(".staging").join(name)
    }

    async fn persist(&self, record: &BackupRecord) -> Result<()> {
        self.storage.save_record(record).await?;
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    /// Start a backup in the background and return its id. Fails with
    /// `ResourceExhausted` when `max_parallel_backups` are already running.
    #[instrument(skip(self, ctx))]
    pub async fn create_backup(
        &self,
        kind: BackupKind,
        tags: Vec<String>,
        ctx: OperationContext,
    ) -> Result<String> {
        let permit = self.permits.clone().try_acquire_owned().map_err(|_| {
            SafeguardError::ResourceExhausted(format!(
                "{} backups already running",
                self.config.max_parallel_backups
            ))
        })?;

        let record = BackupRecord::new(kind, tags, self.config.retention_days);
        let backup_id = record.id.clone();
        self.persist(&record).await?;

        let (tx, rx) = watch::channel(BackupStatus::Pending);
        if self.in_flight.insert(backup_id.clone(), rx).is_some() {
            return Err(SafeguardError::InvalidState(format!(
                "Backup {} is already in flight",
                backup_id
            )));
        }

        info!(backup_id = %backup_id, %kind, "Backup scheduled");

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_pipeline(record, ctx, permit, tx).await;
        });

        Ok(backup_id)
    }

    /// Wait until a backup reaches a terminal status
    pub async fn wait_for_backup(&self, backup_id: &str) -> Result<BackupRecord> {
        let receiver = self.in_flight.get(backup_id).map(|r| r.value().clone());
        if let Some(mut rx) = receiver {
            // A closed channel means the task ended; the record is final either way
            let _ = rx.wait_for(|status| status.is_terminal()).await;
        }
        self.get_status(backup_id).await
    }

    /// `create_backup` followed by `wait_for_backup`
    pub async fn run_backup(
        &self,
        kind: BackupKind,
        tags: Vec<String>,
        ctx: OperationContext,
    ) -> Result<BackupRecord> {
        let backup_id = self.create_backup(kind, tags, ctx).await?;
        self.wait_for_backup(&backup_id).await
    }

    async fn run_pipeline(
        &self,
        mut record: BackupRecord,
        ctx: OperationContext,
        permit: OwnedSemaphorePermit,
        status_tx: watch::Sender<BackupStatus>,
    ) {
        let started = Instant::now();
        let backup_id = record.id.clone();
        let staging = self.staging_dir(&backup_id);
        ProtectionMetrics::backup_started();

        record.status = BackupStatus::Running;
        let _ = status_tx.send(BackupStatus::Running);
        let outcome = match self.persist(&record).await {
            Ok(()) => {
                ctx.run(
                    Some(self.config.timeout()),
                    self.execute(&mut record, &staging, &ctx),
                )
                .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                record.status = BackupStatus::Completed;
                info!(
                    backup_id = %backup_id,
                    kind = %record.kind,
                    size_bytes = record.size_bytes,
                    nodes = record.node_count,
                    relationships = record.relationship_count,
                    "Backup completed"
                );
            }
            Err(SafeguardError::IntegrityViolation(message)) => {
                record.status = BackupStatus::Corrupted;
                error!(backup_id = %backup_id, error = %message, "Backup artifact failed verification");
                record.error = Some(message);
            }
            Err(e) => {
                record.status = BackupStatus::Failed;
                error!(backup_id = %backup_id, error = %e, "Backup failed");
                record.error = Some(e.to_string());
            }
        }
        record.completed_at = Some(Utc::now());

        if let Err(e) = self.persist(&record).await {
            error!(backup_id = %backup_id, error = %e, "Failed to persist final backup record");
            self.records
                .write()
                .await
                .insert(record.id.clone(), record.clone());
        }

        if staging.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                warn!(backup_id = %backup_id, error = %e, "Failed to remove staging directory");
            }
        }

        ProtectionMetrics::backup_finished();
        ProtectionMetrics::record_backup(
            record.kind.as_str(),
            record.status.as_str(),
            started.elapsed().as_secs_f64(),
            record.size_bytes,
        );

        self.in_flight.remove(&backup_id);
        drop(permit);
        let _ = status_tx.send(record.status);

        if self.config.auto_cleanup {
            if let Err(e) = self.apply_retention().await {
                error!(error = %e, "Retention sweep failed");
            }
        }
    }

    /// Cut-off for delta backups, or `None` to take a complete snapshot
    async fn delta_since(&self, kind: BackupKind) -> Option<DateTime<Utc>> {
        let base = match kind {
            BackupKind::Full | BackupKind::Export => return None,
            BackupKind::Incremental => self.last_backup(None).await,
            BackupKind::Differential => self.latest_restorable().await,
        };
        match base {
            Some(base) => Some(base.started_at),
            None => {
                info!(%kind, "No base backup found, taking a complete snapshot");
                None
            }
        }
    }

    /// Export the graph, or for a delta the changed nodes plus every
    /// relationship that changed or touches a changed node
    async fn export(&self, since: Option<DateTime<Utc>>) -> Result<GraphDump> {
        let nodes = self.store.export_nodes(None, since).await?;
        let relationships = match since {
            None => self.store.export_relationships(None).await?,
            Some(since) => {
                let changed: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
                self.store
                    .export_relationships(None)
                    .await?
                    .into_iter()
                    .filter(|r| {
                        r.modified_at.map_or(false, |m| m >= since)
                            || changed.contains(r.start_id.as_str())
                            || changed.contains(r.end_id.as_str())
                    })
                    .collect()
            }
        };
        Ok(GraphDump { nodes, relationships })
    }

    async fn execute(
        &self,
        record: &mut BackupRecord,
        staging: &Path,
        ctx: &OperationContext,
    ) -> Result<()> {
        record.since = self.delta_since(record.kind).await;

        ctx.checkpoint()?;
        let dump = self.export(record.since).await?;
        debug!(
            backup_id = %record.id,
            nodes = dump.nodes.len(),
            relationships = dump.relationships.len(),
            "Exported graph"
        );

        ctx.checkpoint()?;
        let level = self.config.compression_level;
        let (staging_dir, id, kind, since) =
            (staging.to_path_buf(), record.id.clone(), record.kind, record.since);
        let archive_bytes = tokio::task::spawn_blocking(move || -> std::result::Result<Vec<u8>, BackupError> {
            let snapshot_dir = staging_dir.join("snapshot");
            archive::write_snapshot(&snapshot_dir, &id, kind, since, &dump)?;
            archive::pack(&snapshot_dir, level)
        })
        .await??;
        record.compressed = level > 0;

        ctx.checkpoint()?;
        let artifact = match (&self.encryption, self.config.encrypt) {
            (Some(encryption), true) => {
                let mut meta = HashMap::new();
                meta.insert("backup_id".to_string(), record.id.clone());
                let container = match &self.config.encryption_key_id {
                    Some(key_id) => {
                        encryption
                            .encrypt_with_key(key_id, &archive_bytes, Some(meta))
                            .await?
                    }
                    None => {
                        encryption
                            .encrypt(&archive_bytes, self.config.classification, Some(meta))
                            .await?
                    }
                };
                record.encrypted = true;
                record.encryption_key_id = Some(container.key_id.clone());
                serde_json::to_vec(&container)?
            }
            _ => archive_bytes,
        };

        let checksum = archive::sha256_hex(&artifact);
        let artifact_file = staging.join("artifact");
        tokio::fs::write(&artifact_file, &artifact).await?;
        record.size_bytes = self.storage.store_artifact(&record.id, &artifact_file).await?;
        record.checksum = Some(checksum);

        ctx.checkpoint()?;
        let stats = self.store.stats().await?;
        record.node_count = stats.node_count;
        record.relationship_count = stats.relationship_count;
        self.persist(record).await?;

        if self.config.verify_on_write {
            let verification = self.verify_record(record).await;
            if verification.artifact_damaged() {
                return Err(SafeguardError::IntegrityViolation(verification.errors.join("; ")));
            }
            if !verification.is_valid {
                return Err(BackupError::VerificationError(verification.errors.join("; ")).into());
            }
        }

        Ok(())
    }

    /// Read the artifact, check its checksum and decrypt it.
    ///
    /// Archives sealed under a key that has since been rotated, expired or
    /// used up are opened through the audited forced path with `purpose` as
    /// the reason.
    async fn open_artifact(&self, record: &BackupRecord, purpose: &str) -> Result<Vec<u8>> {
        let bytes = tokio::fs::read(self.storage.artifact_path(&record.id))
            .await
            .map_err(|e| BackupError::StorageError(format!("Artifact for {} unreadable: {}", record.id, e)))?;

        let checksum = archive::sha256_hex(&bytes);
        if record.checksum.as_deref() != Some(checksum.as_str()) {
            return Err(BackupError::ChecksumMismatch(format!("backup {}", record.id)).into());
        }

        if !record.encrypted {
            return Ok(bytes);
        }
        let encryption = self.encryption.as_ref().ok_or_else(|| {
            SafeguardError::Configuration(format!(
                "Backup {} is encrypted but no encryption manager is configured",
                record.id
            ))
        })?;
        let container: EncryptedContainer = serde_json::from_slice(&bytes).map_err(|e| {
            BackupError::ArchiveError(format!("Encrypted container unreadable: {}", e))
        })?;
        match encryption.decrypt(&container).await {
            Err(SafeguardError::KeyLifecycle(
                KeyLifecycleError::Inactive(_)
                | KeyLifecycleError::Expired(_)
                | KeyLifecycleError::UsageExhausted(_),
            )) => {
                info!(backup_id = %record.id, key_id = %container.key_id, "Backup key retired, opening archive through forced decrypt");
                encryption
                    .decrypt_forced(&container, &format!("backup {} {}", purpose, record.id))
                    .await
            }
            other => other,
        }
    }

    /// Extract and verify an artifact into a fresh scratch directory
    async fn extract(
        &self,
        record: &BackupRecord,
        scratch: &Path,
        purpose: &str,
    ) -> Result<(Manifest, GraphDump)> {
        let archive_bytes = self.open_artifact(record, purpose).await?;
        let compressed = record.compressed;
        let dir = scratch.to_path_buf();
        let (manifest, dump) = tokio::task::spawn_blocking(
            move || -> std::result::Result<(Manifest, GraphDump), BackupError> {
                archive::unpack(&archive_bytes, compressed, &dir)?;
                let manifest = archive::verify_dir(&dir)?;
                let dump = archive::load_snapshot(&dir, &manifest)?;
                Ok((manifest, dump))
            },
        )
        .await??;

        if manifest.backup_id != record.id {
            return Err(BackupError::VerificationError(format!(
                "Archive belongs to backup {}, expected {}",
                manifest.backup_id, record.id
            ))
            .into());
        }
        Ok((manifest, dump))
    }

    async fn verify_record(&self, record: &BackupRecord) -> VerificationResult {
        let scratch = self.staging_dir(&format!("verify-{}-{}", record.id, Uuid::new_v4()));
        let outcome = self.extract(record, &scratch, "verify").await;
        let _ = tokio::fs::remove_dir_all(&scratch).await;

        let mut result = VerificationResult {
            backup_id: record.id.clone(),
            is_valid: false,
            checksum_match: true,
            archive_readable: true,
            manifest_consistent: true,
            errors: Vec::new(),
        };
        match outcome {
            Ok(_) => result.is_valid = true,
            Err(e) => {
                match &e {
                    SafeguardError::Backup(BackupError::ChecksumMismatch(_)) => {
                        result.checksum_match = false
                    }
                    SafeguardError::Backup(
                        BackupError::ArchiveError(_) | BackupError::StorageError(_),
                    ) => result.archive_readable = false,
                    SafeguardError::Backup(
                        BackupError::VerificationError(_) | BackupError::SerializationError(_),
                    ) => result.manifest_consistent = false,
                    // Keys, configuration and I/O leave the artifact itself unjudged
                    _ => {}
                }
                result.errors.push(e.to_string());
            }
        }
        result
    }

    /// Re-verify a stored backup. A completed backup whose checksum, archive
    /// or manifest fails is marked corrupted; other failures are reported
    /// without touching the record.
    pub async fn verify_backup(&self, backup_id: &str) -> Result<VerificationResult> {
        let mut record = self.get_status(backup_id).await?;
        let result = self.verify_record(&record).await;

        if !result.is_valid && !result.artifact_damaged() {
            warn!(backup_id = %backup_id, errors = ?result.errors, "Backup could not be verified");
        }
        if result.artifact_damaged() && record.status == BackupStatus::Completed {
            warn!(backup_id = %backup_id, errors = ?result.errors, "Backup marked corrupted");
            record.status = BackupStatus::Corrupted;
            record.error = Some(result.errors.join("; "));
            self.persist(&record).await?;
        }
        Ok(result)
    }

    /// Replay a completed backup into `target`.
    ///
    /// Complete snapshots clear the whole target first. Delta snapshots
    /// replace only the nodes and relationships they contain, found in the
    /// target by id or by [`SOURCE_ID_PROPERTY`]. Nodes are created before
    /// relationships and every restored entity records its source id.
    #[instrument(skip(self, target, ctx))]
    pub async fn restore_backup(
        &self,
        backup_id: &str,
        target: Arc<dyn GraphStore>,
        ctx: OperationContext,
    ) -> Result<RestoreResult> {
        let record = self.get_status(backup_id).await?;
        if record.status != BackupStatus::Completed {
            return Err(SafeguardError::InvalidState(format!(
                "Backup {} is {}, only completed backups can be restored",
                backup_id, record.status
            )));
        }

        info!(backup_id = %backup_id, target = target.name(), "Starting backup restoration");
        let started = Instant::now();
        let scratch = self.staging_dir(&format!("restore-{}-{}", backup_id, Uuid::new_v4()));
        let extracted = self.extract(&record, &scratch, "restore").await;
        let _ = tokio::fs::remove_dir_all(&scratch).await;
        let (manifest, dump) = extracted.map_err(|e| match e {
            SafeguardError::Backup(
                BackupError::ChecksumMismatch(_)
                | BackupError::ArchiveError(_)
                | BackupError::VerificationError(_)
                | BackupError::SerializationError(_),
            ) => SafeguardError::IntegrityViolation(e.to_string()),
            other => other,
        })?;

        let mut result = RestoreResult {
            backup_id: backup_id.to_string(),
            success: false,
            nodes_cleared: 0,
            nodes_restored: 0,
            relationships_restored: 0,
            relationships_skipped: 0,
            duration_seconds: 0.0,
            error: None,
        };

        let replay = ctx
            .run(Some(self.config.timeout()), replay(&*target, &manifest, dump, &ctx, &mut result))
            .await;

        result.duration_seconds = started.elapsed().as_secs_f64();
        match replay {
            Ok(()) => {
                result.success = true;
                info!(
                    backup_id = %backup_id,
                    nodes = result.nodes_restored,
                    relationships = result.relationships_restored,
                    skipped = result.relationships_skipped,
                    "Backup restored"
                );
            }
            Err(e) => {
                error!(backup_id = %backup_id, error = %e, "Backup restore failed");
                result.error = Some(e.to_string());
            }
        }

        let mut meta = HashMap::new();
        meta.insert("target".to_string(), target.name().to_string());
        meta.insert("success".to_string(), result.success.to_string());
        self.audit
            .log_event("backup_restored", "backup", backup_id, meta)
            .await;

        Ok(result)
    }

    /// Delete completed and failed backups older than their retention.
    /// Corrupted backups are always kept.
    pub async fn apply_retention(&self) -> Result<CleanupResult> {
        let now = Utc::now();
        let records: Vec<BackupRecord> = self.records.read().await.values().cloned().collect();
        let mut result = CleanupResult::default();

        for record in records {
            let expired =
                now - record.started_at > chrono::Duration::days(i64::from(record.retention_days));
            let in_flight = self.in_flight.contains_key(&record.id);
            match record.status {
                BackupStatus::Completed | BackupStatus::Failed if expired && !in_flight => {
                    self.storage.delete_backup(&record.id).await?;
                    self.records.write().await.remove(&record.id);
                    debug!(backup_id = %record.id, "Retention removed backup");
                    result.deleted_backups += 1;
                }
                BackupStatus::Corrupted if expired => {
                    result.retained_corrupted += 1;
                    result.retained_backups += 1;
                }
                _ => result.retained_backups += 1,
            }
        }

        if result.deleted_backups > 0 {
            info!(
                deleted = result.deleted_backups,
                retained = result.retained_backups,
                "Retention sweep finished"
            );
        }
        Ok(result)
    }

    /// Remove a finished backup and its files
    pub async fn delete_backup(&self, backup_id: &str) -> Result<()> {
        if self.in_flight.contains_key(backup_id) {
            return Err(SafeguardError::InvalidState(format!(
                "Backup {} is still running",
                backup_id
            )));
        }
        if self.records.write().await.remove(backup_id).is_none() {
            return Err(SafeguardError::NotFound(format!("backup {}", backup_id)));
        }
        self.storage.delete_backup(backup_id).await?;
        Ok(())
    }

    /// All records, newest first
    pub async fn list_backups(&self) -> Vec<BackupRecord> {
        let mut records: Vec<BackupRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
    }

    /// Current record of one backup
    pub async fn get_status(&self, backup_id: &str) -> Result<BackupRecord> {
        self.records
            .read()
            .await
            .get(backup_id)
            .cloned()
            .ok_or_else(|| SafeguardError::NotFound(format!("backup {}", backup_id)))
    }

    /// Most recent completed backup, optionally of one kind
    pub async fn last_backup(&self, kind: Option<BackupKind>) -> Option<BackupRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status == BackupStatus::Completed)
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .max_by_key(|r| r.started_at)
            .cloned()
    }

    /// Most recent completed full or export backup
    pub async fn latest_restorable(&self) -> Option<BackupRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status == BackupStatus::Completed && r.kind.is_complete_snapshot())
            .max_by_key(|r| r.started_at)
            .cloned()
    }
}

/// Map both raw ids and recorded source ids onto current target ids.
/// Raw ids win so in-place restores resolve to the live entity.
fn identity_index<'a>(
    entries: impl Iterator<Item = (&'a str, &'a Map<String, Value>)>,
) -> HashMap<String, String> {
    let mut index = HashMap::new();
    let mut raw = Vec::new();
    for (id, properties) in entries {
        if let Some(source) = properties.get(SOURCE_ID_PROPERTY).and_then(Value::as_str) {
            index.insert(source.to_string(), id.to_string());
        }
        raw.push(id);
    }
    for id in raw {
        index.insert(id.to_string(), id.to_string());
    }
    index
}

async fn replay(
    target: &dyn GraphStore,
    manifest: &Manifest,
    dump: GraphDump,
    ctx: &OperationContext,
    result: &mut RestoreResult,
) -> Result<()> {
    let (nodes_in_target, rels_in_target) = match manifest.since {
        None => {
            result.nodes_cleared = target.clear(&ClearScope::All).await?;
            (HashMap::new(), HashMap::new())
        }
        Some(_) => {
            let nodes: Vec<NodeRecord> = target.export_nodes(None, None).await?;
            let rels: Vec<RelationshipRecord> = target.export_relationships(None).await?;
            (
                identity_index(nodes.iter().map(|n| (n.id.as_str(), &n.properties))),
                identity_index(rels.iter().map(|r| (r.id.as_str(), &r.properties))),
            )
        }
    };

    // Changed nodes replace their earlier copy. Their relationships go with
    // them and come back from the delta.
    let replaced: Vec<String> = dump
        .nodes
        .iter()
        .filter_map(|n| nodes_in_target.get(&n.id).cloned())
        .collect();
    if !replaced.is_empty() {
        result.nodes_cleared = target.clear(&ClearScope::Nodes(replaced)).await?;
    }

    let mut remap: HashMap<String, String> = HashMap::with_capacity(dump.nodes.len());
    for node in dump.nodes {
        ctx.checkpoint()?;
        let mut properties = node.properties;
        properties.insert(SOURCE_ID_PROPERTY.to_string(), Value::String(node.id.clone()));
        let new_id = target.create_node(&node.labels, properties).await?;
        remap.insert(node.id, new_id);
        result.nodes_restored += 1;
    }

    for rel in dump.relationships {
        ctx.checkpoint()?;
        if let Some(existing) = rels_in_target.get(&rel.id) {
            let command = GraphCommand::DeleteRelationship {
                relationship_id: existing.clone(),
            };
            match target.execute(&command).await {
                Ok(_) | Err(StoreError::RelationshipNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let resolve = |id: &String| -> String {
            remap
                .get(id)
                .or_else(|| nodes_in_target.get(id))
                .unwrap_or(id)
                .clone()
        };
        let (start, end) = (resolve(&rel.start_id), resolve(&rel.end_id));
        let mut properties = rel.properties;
        properties.insert(SOURCE_ID_PROPERTY.to_string(), Value::String(rel.id.clone()));
        match target
            .create_relationship(&start, &end, &rel.rel_type, properties)
            .await
        {
            Ok(_) => result.relationships_restored += 1,
            Err(StoreError::NodeNotFound(missing)) => {
                debug!(relationship_id = %rel.id, missing = %missing, "Relationship endpoint unresolved");
                result.relationships_skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGraphStore;
    use serde_json::Map;

    async fn manager(dir: &Path, store: Arc<MemoryGraphStore>) -> BackupManager {
        let config = BackupConfig::new(dir)
            .with_encryption(false)
            .with_auto_cleanup(false);
        BackupManager::initialize(config, store, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_full_backup_of_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryGraphStore::new("primary"));
        let mgr = manager(dir.path(), store).await;

        let record = mgr
            .run_backup(BackupKind::Full, vec![], OperationContext::default())
            .await
            .unwrap();
        assert_eq!(record.status, BackupStatus::Completed);
        assert_eq!(record.node_count, 0);
        assert_eq!(record.relationship_count, 0);
        assert!(!record.checksum.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_record_marked_failed_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileBackupStorage::new(dir.path());
        let mut record = BackupRecord::new(BackupKind::Full, vec![], 30);
        record.status = BackupStatus::Running;
        storage.save_record(&record).await.unwrap();

        let mgr = manager(dir.path(), Arc::new(MemoryGraphStore::new("primary"))).await;
        let reloaded = mgr.get_status(&record.id).await.unwrap();
        assert_eq!(reloaded.status, BackupStatus::Failed);
        assert!(reloaded.error.is_some());
    }

    #[tokio::test]
    async fn test_restore_requires_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryGraphStore::new("primary"));
        store.set_available(false);
        let mgr = manager(dir.path(), store.clone()).await;

        let record = mgr
            .run_backup(BackupKind::Full, vec![], OperationContext::default())
            .await
            .unwrap();
        assert_eq!(record.status, BackupStatus::Failed);
        assert!(record.error.is_some());

        let err = mgr
            .restore_backup(&record.id, store, OperationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SafeguardError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_incremental_captures_only_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryGraphStore::new("primary"));
        store.create_node(&["Case".into()], Map::new()).await.unwrap();
        let mgr = manager(dir.path(), store.clone()).await;

        let full = mgr
            .run_backup(BackupKind::Full, vec![], OperationContext::default())
            .await
            .unwrap();
        assert_eq!(full.status, BackupStatus::Completed);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        store.create_node(&["Task".into()], Map::new()).await.unwrap();

        let incremental = mgr
            .run_backup(BackupKind::Incremental, vec![], OperationContext::default())
            .await
            .unwrap();
        assert_eq!(incremental.status, BackupStatus::Completed);
        assert_eq!(incremental.since, Some(full.started_at));

        let target = Arc::new(MemoryGraphStore::new("scratch"));
        let restored = mgr
            .restore_backup(&incremental.id, target.clone(), OperationContext::default())
            .await
            .unwrap();
        assert!(restored.success);
        assert_eq!(restored.nodes_restored, 1);
    }
}
