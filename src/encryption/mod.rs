//! Encryption key lifecycle and payload encryption
//!
//! [`EncryptionManager`] owns every key. Classification picks the algorithm,
//! `encrypt` reuses a usable key for that (algorithm, classification) pair or
//! creates one, and `rotate_keys` retires keys that are expired, exhausted or
//! older than the rotation period. Retired keys stay decryptable through
//! [`EncryptionManager::decrypt_forced`] until `cleanup_keys` purges them.

mod cipher;
mod keystore;
/// Keys, containers and classification policy
pub mod types;

pub use types::{
    DataClassification, EncryptedContainer, EncryptionAlgorithm, EncryptionKey, KeyLifecycleError,
    KeyMetadata,
};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::config::EncryptionConfig;
use crate::metrics::ProtectionMetrics;
use crate::{Result, SafeguardError};
use keystore::KeyStore;

/// Key registry plus encrypt/decrypt operations
pub struct EncryptionManager {
    config: EncryptionConfig,
    store: KeyStore,
    keys: RwLock<HashMap<String, EncryptionKey>>,
    audit: AuditLogger,
}

impl EncryptionManager {
    /// Open the key directory, derive the master key and load the key index.
    /// The manager is usable once this returns.
    pub async fn initialize(config: EncryptionConfig) -> Result<Self> {
        let store = KeyStore::open(&config).await?;
        let keys = store
            .load_all()
            .await?
            .into_iter()
            .map(|k| (k.metadata.id.clone(), k))
            .collect::<HashMap<_, _>>();

        info!(
            keys_dir = %config.keys_dir.display(),
            keys = keys.len(),
            persistent_master_key = store.is_persistent(),
            "Encryption manager initialized"
        );

        Ok(Self {
            config,
            store,
            keys: RwLock::new(keys),
            audit: AuditLogger::new(),
        })
    }

    /// Record key events in a shared audit trail
    pub fn with_audit_logger(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    fn default_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.config.rotation_period_days))
    }

    async fn persist_index(&self, keys: &HashMap<String, EncryptionKey>) -> Result<()> {
        let mut index: Vec<KeyMetadata> = keys.values().map(|k| k.metadata.clone()).collect();
        index.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        self.store.write_index(&index).await
    }

    async fn build_key(
        &self,
        algorithm: EncryptionAlgorithm,
        classification: DataClassification,
        ttl: chrono::Duration,
        max_usage: Option<u64>,
    ) -> Result<EncryptionKey> {
        let material = if algorithm.is_asymmetric() {
            tokio::task::spawn_blocking(move || cipher::generate_material(algorithm)).await??
        } else {
            cipher::generate_material(algorithm)?
        };

        let now = Utc::now();
        Ok(EncryptionKey {
            metadata: KeyMetadata {
                id: Uuid::new_v4().to_string(),
                algorithm,
                classification,
                created_at: now,
                expires_at: Some(now + ttl),
                usage_count: 0,
                max_usage: max_usage.or(self.config.default_max_usage),
                active: true,
                deactivated_at: None,
            },
            material,
        })
    }

    /// Register a new key; returns its id
    #[instrument(skip(self))]
    pub async fn generate_key(
        &self,
        algorithm: EncryptionAlgorithm,
        classification: DataClassification,
        ttl: Option<Duration>,
        max_usage: Option<u64>,
    ) -> Result<String> {
        let ttl = match ttl {
            Some(ttl) => chrono::Duration::from_std(ttl)
                .map_err(|e| SafeguardError::Configuration(format!("Invalid key ttl: {}", e)))?,
            None => self.default_ttl(),
        };
        let key = self.build_key(algorithm, classification, ttl, max_usage).await?;
        let key_id = key.metadata.id.clone();

        self.store.write_key(&key).await?;
        {
            let mut keys = self.keys.write().await;
            keys.insert(key_id.clone(), key);
            self.persist_index(&keys).await?;
        }

        ProtectionMetrics::record_key_event("generated");
        let mut meta = HashMap::new();
        meta.insert("algorithm".to_string(), algorithm.to_string());
        meta.insert("classification".to_string(), classification.to_string());
        self.audit.log_event("key_generated", "encryption", &key_id, meta).await;

        info!(key_id = %key_id, %algorithm, %classification, "Generated encryption key");
        Ok(key_id)
    }

    /// Encrypt with a usable key for `classification`, creating one if needed
    pub async fn encrypt(
        &self,
        plaintext: &[u8],
        classification: DataClassification,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<EncryptedContainer> {
        let algorithm = classification.algorithm();
        let now = Utc::now();

        let existing = {
            let keys = self.keys.read().await;
            keys.values()
                .filter(|k| {
                    k.metadata.algorithm == algorithm
                        && k.metadata.classification == classification
                        && k.metadata.is_usable(now)
                })
                .max_by_key(|k| k.metadata.created_at)
                .map(|k| k.metadata.id.clone())
        };

        let key_id = match existing {
            Some(id) => id,
            None => {
                debug!(%classification, "No usable key, generating one");
                self.generate_key(algorithm, classification, None, None).await?
            }
        };

        self.encrypt_with_key(&key_id, plaintext, metadata).await
    }

    /// Encrypt with a specific key. The key must be usable.
    pub async fn encrypt_with_key(
        &self,
        key_id: &str,
        plaintext: &[u8],
        metadata: Option<HashMap<String, String>>,
    ) -> Result<EncryptedContainer> {
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(key_id)
            .ok_or_else(|| KeyLifecycleError::NotFound(key_id.to_string()))?;

        check_lifecycle(&key.metadata, Utc::now())?;
        if key.metadata.is_exhausted() {
            return Err(KeyLifecycleError::UsageExhausted(key_id.to_string()).into());
        }

        let algorithm = key.metadata.algorithm;
        let sealed = match cipher::seal(algorithm, &key.material, plaintext) {
            Ok(sealed) => sealed,
            Err(e) => {
                ProtectionMetrics::record_encryption("encrypt", algorithm.as_str(), false);
                return Err(e);
            }
        };
        key.metadata.usage_count += 1;
        let classification = key.metadata.classification;

        self.persist_index(&keys).await?;
        ProtectionMetrics::record_encryption("encrypt", algorithm.as_str(), true);

        Ok(EncryptedContainer {
            id: Uuid::new_v4().to_string(),
            ciphertext: sealed.ciphertext,
            key_id: key_id.to_string(),
            algorithm,
            iv: Some(sealed.iv),
            wrapped_key: sealed.wrapped_key,
            metadata: metadata.unwrap_or_default(),
            classification,
            created_at: Utc::now(),
        })
    }

    /// Decrypt a container. Fails if its key is unknown, inactive or expired.
    pub async fn decrypt(&self, container: &EncryptedContainer) -> Result<Vec<u8>> {
        let keys = self.keys.read().await;
        let key = keys
            .get(&container.key_id)
            .ok_or_else(|| KeyLifecycleError::NotFound(container.key_id.clone()))?;
        check_lifecycle(&key.metadata, Utc::now())?;
        open_container(key, container)
    }

    /// Decrypt regardless of key state, for audit or forensic replay
    pub async fn decrypt_forced(
        &self,
        container: &EncryptedContainer,
        reason: &str,
    ) -> Result<Vec<u8>> {
        let plaintext = {
            let keys = self.keys.read().await;
            let key = keys
                .get(&container.key_id)
                .ok_or_else(|| KeyLifecycleError::NotFound(container.key_id.clone()))?;
            if let Err(e) = check_lifecycle(&key.metadata, Utc::now()) {
                warn!(key_id = %container.key_id, error = %e, reason, "Forced decrypt bypassing key lifecycle");
            }
            open_container(key, container)?
        };

        let mut meta = HashMap::new();
        meta.insert("container_id".to_string(), container.id.clone());
        meta.insert("reason".to_string(), reason.to_string());
        self.audit
            .log_event("forced_decrypt", "encryption", &container.key_id, meta)
            .await;
        Ok(plaintext)
    }

    /// Retire keys that are expired, exhausted or older than the rotation
    /// period and create one replacement per retired key. Returns the ids of
    /// the replacements.
    #[instrument(skip(self))]
    pub async fn rotate_keys(
        &self,
        classification: Option<DataClassification>,
    ) -> Result<Vec<String>> {
        let now = Utc::now();
        let max_age = self.default_ttl();

        let retiring: Vec<KeyMetadata> = {
            let keys = self.keys.read().await;
            keys.values()
                .map(|k| &k.metadata)
                .filter(|m| m.active)
                .filter(|m| classification.map_or(true, |c| m.classification == c))
                .filter(|m| m.is_expired(now) || m.is_exhausted() || now - m.created_at >= max_age)
                .cloned()
                .collect()
        };

        let mut replacements = Vec::with_capacity(retiring.len());
        for old in &retiring {
            let fresh = self
                .build_key(old.algorithm, old.classification, max_age, old.max_usage)
                .await?;
            self.store.write_key(&fresh).await?;
            let fresh_id = fresh.metadata.id.clone();

            {
                let mut keys = self.keys.write().await;
                if let Some(key) = keys.get_mut(&old.id) {
                    key.metadata.active = false;
                    key.metadata.deactivated_at = Some(now);
                }
                keys.insert(fresh_id.clone(), fresh);
                self.persist_index(&keys).await?;
            }

            ProtectionMetrics::record_key_event("rotated");
            let mut meta = HashMap::new();
            meta.insert("replacement".to_string(), fresh_id.clone());
            self.audit.log_event("key_rotated", "encryption", &old.id, meta).await;
            info!(old_key = %old.id, new_key = %fresh_id, "Rotated encryption key");

            replacements.push(fresh_id);
        }

        Ok(replacements)
    }

    /// Purge material of keys deactivated longer than the retention window
    pub async fn cleanup_keys(&self) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.config.key_retention_days));
        let mut keys = self.keys.write().await;

        let purge: Vec<String> = keys
            .values()
            .filter(|k| !k.metadata.active)
            .filter(|k| k.metadata.deactivated_at.map_or(false, |at| at < cutoff))
            .map(|k| k.metadata.id.clone())
            .collect();

        for key_id in &purge {
            self.store.remove_key(key_id).await?;
            keys.remove(key_id);
            ProtectionMetrics::record_key_event("purged");
            self.audit
                .log_event("key_purged", "encryption", key_id, HashMap::new())
                .await;
        }
        if !purge.is_empty() {
            self.persist_index(&keys).await?;
            info!(purged = purge.len(), "Purged retired encryption keys");
        }
        Ok(purge.len())
    }

    /// Metadata of every key, oldest first
    pub async fn list_keys(&self) -> Vec<KeyMetadata> {
        let keys = self.keys.read().await;
        let mut list: Vec<KeyMetadata> = keys.values().map(|k| k.metadata.clone()).collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Metadata for one key
    pub async fn key_metadata(&self, key_id: &str) -> Result<KeyMetadata> {
        self.keys
            .read()
            .await
            .get(key_id)
            .map(|k| k.metadata.clone())
            .ok_or_else(|| KeyLifecycleError::NotFound(key_id.to_string()).into())
    }

    /// Encrypt a file and write the container as JSON to `output`
    pub async fn encrypt_file(
        &self,
        input: &Path,
        output: &Path,
        classification: DataClassification,
    ) -> Result<EncryptedContainer> {
        let plaintext = fs::read(input).await?;
        let mut meta = HashMap::new();
        if let Some(name) = input.file_name().and_then(|n| n.to_str()) {
            meta.insert("file_name".to_string(), name.to_string());
        }
        let container = self.encrypt(&plaintext, classification, Some(meta)).await?;
        fs::write(output, serde_json::to_vec(&container)?).await?;
        Ok(container)
    }

    /// Decrypt a container file written by [`Self::encrypt_file`]
    pub async fn decrypt_file(&self, input: &Path, output: &Path) -> Result<()> {
        let container: EncryptedContainer = serde_json::from_slice(&fs::read(input).await?)?;
        let plaintext = self.decrypt(&container).await?;
        fs::write(output, plaintext).await?;
        Ok(())
    }
}

/// Inactive is reported before expired
fn check_lifecycle(metadata: &KeyMetadata, now: DateTime<Utc>) -> Result<()> {
    if !metadata.active {
        return Err(KeyLifecycleError::Inactive(metadata.id.clone()).into());
    }
    if metadata.is_expired(now) {
        return Err(KeyLifecycleError::Expired(metadata.id.clone()).into());
    }
    Ok(())
}

fn open_container(key: &EncryptionKey, container: &EncryptedContainer) -> Result<Vec<u8>> {
    if key.metadata.algorithm != container.algorithm {
        return Err(SafeguardError::Crypto(format!(
            "Container algorithm {} does not match key {} ({})",
            container.algorithm, key.metadata.id, key.metadata.algorithm
        )));
    }
    let iv = container.iv.as_deref().unwrap_or_default();
    let result = cipher::open(
        container.algorithm,
        &key.material,
        &container.ciphertext,
        iv,
        container.wrapped_key.as_deref(),
    );
    ProtectionMetrics::record_encryption("decrypt", container.algorithm.as_str(), result.is_ok());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager(dir: &Path) -> EncryptionManager {
        EncryptionManager::initialize(EncryptionConfig::new(dir).with_master_secret("test-secret"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_encrypt_reuses_key_and_counts_usage() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;

        let a = mgr.encrypt(b"one", DataClassification::Confidential, None).await.unwrap();
        let b = mgr.encrypt(b"two", DataClassification::Confidential, None).await.unwrap();
        assert_eq!(a.key_id, b.key_id);
        assert_eq!(a.algorithm, EncryptionAlgorithm::Aes256Gcm);

        let meta = mgr.key_metadata(&a.key_id).await.unwrap();
        assert_eq!(meta.usage_count, 2);
    }

    #[tokio::test]
    async fn test_exhausted_key_replaced_on_encrypt() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let key_id = mgr
            .generate_key(
                EncryptionAlgorithm::XChaCha20Poly1305,
                DataClassification::Internal,
                None,
                Some(1),
            )
            .await
            .unwrap();

        let first = mgr.encrypt(b"a", DataClassification::Internal, None).await.unwrap();
        let second = mgr.encrypt(b"b", DataClassification::Internal, None).await.unwrap();
        assert_eq!(first.key_id, key_id);
        assert_ne!(second.key_id, key_id);
    }

    #[tokio::test]
    async fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let mut container = mgr.encrypt(b"x", DataClassification::Public, None).await.unwrap();
        container.key_id = "missing".into();

        let err = mgr.decrypt(&container).await.unwrap_err();
        assert!(matches!(
            err,
            SafeguardError::KeyLifecycle(KeyLifecycleError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_keys_survive_restart_with_same_secret() {
        let dir = tempfile::tempdir().unwrap();
        let container = {
            let mgr = manager(dir.path()).await;
            mgr.encrypt(b"persisted", DataClassification::Restricted, None)
                .await
                .unwrap()
        };

        let reopened = manager(dir.path()).await;
        assert_eq!(reopened.decrypt(&container).await.unwrap(), b"persisted");
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = EncryptionManager::initialize(
            EncryptionConfig::new(dir.path())
                .with_master_secret("s")
                .with_key_retention_days(0),
        )
        .await
        .unwrap();

        let old = mgr
            .generate_key(
                EncryptionAlgorithm::Aes256Gcm,
                DataClassification::Restricted,
                Some(Duration::from_millis(1)),
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.rotate_keys(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(mgr.cleanup_keys().await.unwrap(), 1);
        assert!(mgr.key_metadata(&old).await.is_err());
        assert!(!dir.path().join(format!("{}.key", old)).exists());
    }
}
