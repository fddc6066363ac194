// Encryption Types - keys, containers and classification policy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroizing;

/// Sensitivity tier of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClassification {
    /// Publishable without harm
    Public,
    /// Internal business data
    Internal,
    /// Client-confidential material
    Confidential,
    /// Privileged or regulated records
    Restricted,
    /// Highest tier
    TopSecret,
}

impl DataClassification {
    /// Every tier, lowest first
    pub const ALL: [DataClassification; 5] = [
        DataClassification::Public,
        DataClassification::Internal,
        DataClassification::Confidential,
        DataClassification::Restricted,
        DataClassification::TopSecret,
    ];

    /// Algorithm mandated for this tier
    pub fn algorithm(&self) -> EncryptionAlgorithm {
        match self {
            DataClassification::Public | DataClassification::Internal => {
                EncryptionAlgorithm::XChaCha20Poly1305
            }
            DataClassification::Confidential
            | DataClassification::Restricted
            | DataClassification::TopSecret => EncryptionAlgorithm::Aes256Gcm,
        }
    }

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClassification::Public => "public",
            DataClassification::Internal => "internal",
            DataClassification::Confidential => "confidential",
            DataClassification::Restricted => "restricted",
            DataClassification::TopSecret => "top_secret",
        }
    }
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported ciphers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionAlgorithm {
    /// Fast symmetric stream cipher with a 192-bit nonce
    XChaCha20Poly1305,
    /// AES-256-GCM, 96-bit nonce, 128-bit tag appended to the ciphertext
    Aes256Gcm,
    /// RSA-OAEP(SHA-256) wrapping an AES-256-GCM data key
    Rsa2048,
    /// RSA-4096 variant of the hybrid scheme
    Rsa4096,
}

impl EncryptionAlgorithm {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionAlgorithm::XChaCha20Poly1305 => "xchacha20poly1305",
            EncryptionAlgorithm::Aes256Gcm => "aes256gcm",
            EncryptionAlgorithm::Rsa2048 => "rsa2048",
            EncryptionAlgorithm::Rsa4096 => "rsa4096",
        }
    }

    /// RSA hybrid algorithms
    pub fn is_asymmetric(&self) -> bool {
        matches!(self, EncryptionAlgorithm::Rsa2048 | EncryptionAlgorithm::Rsa4096)
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything about a key except its material. This is what `key_index.json`
/// stores and what callers may inspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Key id, also the key file stem
    pub id: String,
    /// Cipher this key is for
    pub algorithm: EncryptionAlgorithm,
    /// Tier the key serves
    pub classification: DataClassification,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Expiry, if any
    pub expires_at: Option<DateTime<Utc>>,
    /// Encryptions performed with the key
    pub usage_count: u64,
    /// Encryption limit, if any
    pub max_usage: Option<u64>,
    /// Still selectable for new data
    pub active: bool,
    /// When rotation retired the key
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl KeyMetadata {
    /// Past `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }

    /// At or over `max_usage`
    pub fn is_exhausted(&self) -> bool {
        self.max_usage.map_or(false, |max| self.usage_count >= max)
    }

    /// Active, unexpired and under its usage cap
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now) && !self.is_exhausted()
    }
}

/// A key with its material. Material is zeroed on drop and never printed.
#[derive(Clone)]
pub struct EncryptionKey {
    /// Non-secret key attributes
    pub metadata: KeyMetadata,
    pub(crate) material: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("metadata", &self.metadata)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

/// Ciphertext together with everything needed to decrypt it except the key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedContainer {
    /// Container id
    pub id: String,
    /// Encrypted payload
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Key that sealed the payload
    pub key_id: String,
    /// Cipher used
    pub algorithm: EncryptionAlgorithm,
    /// Nonce for symmetric ciphers
    #[serde(default, with = "b64_opt")]
    pub iv: Option<Vec<u8>>,
    /// RSA-wrapped data key for hybrid encryption
    #[serde(default, with = "b64_opt")]
    pub wrapped_key: Option<Vec<u8>>,
    /// Caller-supplied labels, stored in clear
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Tier of the payload
    pub classification: DataClassification,
    /// Encryption time
    pub created_at: DateTime<Utc>,
}

/// Missing, inactive or expired key
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyLifecycleError {
    /// No key with this id
    #[error("Key not found: {0}")]
    NotFound(String),
    /// Key retired by rotation
    #[error("Key inactive: {0}")]
    Inactive(String),
    /// Key past its expiry
    #[error("Key expired: {0}")]
    Expired(String),
    /// Key reached its usage limit
    #[error("Key usage limit reached: {0}")]
    UsageExhausted(String),
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
