// Key Store - sealed key files, key index and master key on disk

use argon2::Argon2;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use super::cipher::{aes_open, aes_seal, random_bytes, SYMMETRIC_KEY_LEN};
use super::types::{EncryptionKey, KeyMetadata};
use crate::config::EncryptionConfig;
use crate::{Result, SafeguardError};

const INDEX_FILE: &str = "key_index.json";
const SALT_FILE: &str = "master.salt";
const SALT_LEN: usize = 16;

/// File layout under `keys_dir`:
/// - `{key_id}.key`: key material sealed with the master key (key id as AAD)
/// - `key_index.json`: metadata of every known key
/// - `master.salt`: KDF salt for the master key
pub(crate) struct KeyStore {
    dir: PathBuf,
    master_key: Zeroizing<Vec<u8>>,
    /// False when the master key was generated for this process only
    persistent: bool,
}

impl KeyStore {
    /// Open the key directory; without a master secret keys last for this process only
    pub async fn open(config: &EncryptionConfig) -> Result<Self> {
        let dir = config.keys_dir.clone();
        fs::create_dir_all(&dir).await.map_err(|e| {
            SafeguardError::Configuration(format!(
                "Cannot create keys directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        restrict_permissions(&dir, 0o700).await;

        let (master_key, persistent) = match config.master_secret.as_deref() {
            Some(secret) if !secret.is_empty() => {
                let salt = load_or_create_salt(&dir).await?;
                (derive_master_key(secret, &salt)?, true)
            }
            _ => {
                warn!(
                    keys_dir = %dir.display(),
                    "No master secret configured; using a random master key. \
                     Keys written by this process cannot be read after restart"
                );
                (random_bytes(SYMMETRIC_KEY_LEN), false)
            }
        };

        Ok(Self {
            dir,
            master_key,
            persistent,
        })
    }

    /// Keys survive restarts
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn key_path(&self, key_id: &str) -> PathBuf {
        self.dir.join(format!("{}.key", key_id))
    }

    /// Load every indexed key whose material can be unsealed
    pub async fn load_all(&self) -> Result<Vec<EncryptionKey>> {
        let index_path = self.dir.join(INDEX_FILE);
        if !index_path.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&index_path).await?;
        let index: Vec<KeyMetadata> = serde_json::from_str(&raw).map_err(|e| {
            SafeguardError::Configuration(format!("Corrupt key index {}: {}", index_path.display(), e))
        })?;

        let mut keys = Vec::with_capacity(index.len());
        for metadata in index {
            let sealed = match fs::read(self.key_path(&metadata.id)).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(key_id = %metadata.id, error = %e, "Key file missing, skipping");
                    continue;
                }
            };
            match aes_open(&self.master_key, &sealed, metadata.id.as_bytes()) {
                Ok(material) => keys.push(EncryptionKey {
                    metadata,
                    material: Zeroizing::new(material),
                }),
                Err(e) => {
                    error!(key_id = %metadata.id, error = %e, "Cannot unseal key, skipping");
                }
            }
        }

        debug!(count = keys.len(), "Loaded encryption keys");
        Ok(keys)
    }

    /// Persist one sealed key file
    pub async fn write_key(&self, key: &EncryptionKey) -> Result<()> {
        let sealed = aes_seal(&self.master_key, &key.material, key.metadata.id.as_bytes())?;
        let path = self.key_path(&key.metadata.id);
        fs::write(&path, sealed).await?;
        restrict_permissions(&path, 0o600).await;
        Ok(())
    }

    /// Delete one key file
    pub async fn remove_key(&self, key_id: &str) -> Result<()> {
        let path = self.key_path(key_id);
        if path.exists() {
            fs::remove_file(path).await?;
        }
        Ok(())
    }

    /// Replace the index atomically
    pub async fn write_index(&self, index: &[KeyMetadata]) -> Result<()> {
        let json = serde_json::to_vec_pretty(index)?;
        let tmp = self.dir.join(format!("{}.tmp", INDEX_FILE));
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, self.dir.join(INDEX_FILE)).await?;
        Ok(())
    }
}

async fn load_or_create_salt(dir: &Path) -> Result<Vec<u8>> {
    let path = dir.join(SALT_FILE);
    if path.exists() {
        let salt = fs::read(&path).await?;
        if salt.len() < SALT_LEN {
            return Err(SafeguardError::Configuration(format!(
                "Master salt {} is truncated",
                path.display()
            )));
        }
        return Ok(salt);
    }

    let salt = random_bytes(SALT_LEN).to_vec();
    fs::write(&path, &salt).await?;
    restrict_permissions(&path, 0o600).await;
    Ok(salt)
}

fn derive_master_key(secret: &str, salt: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let mut key = Zeroizing::new(vec![0u8; SYMMETRIC_KEY_LEN]);
    Argon2::default()
        .hash_password_into(secret.as_bytes(), salt, &mut key)
        .map_err(|e| SafeguardError::Crypto(format!("Master key derivation failed: {}", e)))?;
    Ok(key)
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await {
        warn!(path = %path.display(), error = %e, "Failed to restrict permissions");
    }
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path, _mode: u32) {}
