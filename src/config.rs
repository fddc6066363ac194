//! Configuration for the data-protection components
//!
//! Every section has production defaults, builder-style setters, and can be
//! loaded from a JSON or YAML file and overridden from the environment.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error};

use crate::encryption::DataClassification;
use crate::{Result, SafeguardError};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeguardConfig {
    /// Backup manager settings
    pub backup: BackupConfig,
    /// Key lifecycle settings
    pub encryption: EncryptionConfig,
    /// Migration manager settings
    pub migration: MigrationConfig,
    /// Integrity validator settings
    pub integrity: IntegrityConfig,
    /// Disaster recovery settings
    pub recovery: RecoveryConfig,
}

/// Backup settings, loaded once at manager construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory holding `{id}.backup` and `{id}.metadata.json`
    pub backup_dir: PathBuf,
    /// Encrypt archives through the encryption manager
    pub encrypt: bool,
    /// Pin archives to this key instead of classification-based selection
    pub encryption_key_id: Option<String>,
    /// Classification used when no key is pinned
    pub classification: DataClassification,
    /// Gzip level, 0 stores the tar uncompressed
    pub compression_level: u32,
    /// Days a backup is kept before retention may delete it
    pub retention_days: u32,
    /// Backups allowed to run at once
    pub max_parallel_backups: usize,
    /// Re-read every artifact right after writing it
    pub verify_on_write: bool,
    /// Run retention after each backup
    pub auto_cleanup: bool,
    /// Upper bound on one backup pipeline
    pub backup_timeout_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./data/backups"),
            encrypt: true,
            encryption_key_id: None,
            classification: DataClassification::Confidential,
            compression_level: 6,
            retention_days: 30,
            max_parallel_backups: 2,
            verify_on_write: true,
            auto_cleanup: true,
            backup_timeout_secs: 3600,
        }
    }
}

impl BackupConfig {
    /// Defaults with archives under `backup_dir`
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            ..Self::default()
        }
    }

    /// Turn archive encryption on or off
    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encrypt = enabled;
        self
    }

    /// Encrypt every archive with one pinned key
    pub fn with_encryption_key(mut self, key_id: impl Into<String>) -> Self {
        self.encrypt = true;
        self.encryption_key_id = Some(key_id.into());
        self
    }

    /// Classification used to pick the archive key
    pub fn with_classification(mut self, classification: DataClassification) -> Self {
        self.classification = classification;
        self
    }

    /// Gzip level, clamped to 9
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Retention in days
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Parallel backup cap
    pub fn with_max_parallel_backups(mut self, count: usize) -> Self {
        self.max_parallel_backups = count;
        self
    }

    /// Verify artifacts after writing
    pub fn with_verify_on_write(mut self, verify: bool) -> Self {
        self.verify_on_write = verify;
        self
    }

    /// Run retention after each backup
    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }

    /// Pipeline timeout, at least one second
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.backup_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Pipeline timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backup_timeout_secs)
    }
}

/// Encryption key lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Directory holding `{key_id}.key`, `key_index.json` and `master.salt`
    pub keys_dir: PathBuf,
    /// Deployment secret the master key is derived from
    #[serde(skip_serializing)]
    pub master_secret: Option<String>,
    /// Age after which `rotate_keys` replaces a key
    pub rotation_period_days: u32,
    /// Days a deactivated key is kept before `cleanup_keys` purges it
    pub key_retention_days: u32,
    /// Usage limit given to new keys
    pub default_max_usage: Option<u64>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            keys_dir: PathBuf::from("./data/keys"),
            master_secret: None,
            rotation_period_days: 90,
            key_retention_days: 365,
            default_max_usage: None,
        }
    }
}

impl EncryptionConfig {
    /// Defaults with key files under `keys_dir`
    pub fn new(keys_dir: impl Into<PathBuf>) -> Self {
        Self {
            keys_dir: keys_dir.into(),
            ..Self::default()
        }
    }

    /// Secret the master key is derived from
    pub fn with_master_secret(mut self, secret: impl Into<String>) -> Self {
        self.master_secret = Some(secret.into());
        self
    }

    /// Rotation period in days
    pub fn with_rotation_period_days(mut self, days: u32) -> Self {
        self.rotation_period_days = days;
        self
    }

    /// Days retired keys are kept
    pub fn with_key_retention_days(mut self, days: u32) -> Self {
        self.key_retention_days = days;
        self
    }

    /// Usage limit for new keys
    pub fn with_default_max_usage(mut self, max_usage: u64) -> Self {
        self.default_max_usage = Some(max_usage);
        self
    }
}

/// Migration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Directory holding `migration_history.json`
    pub state_dir: PathBuf,
    /// Directory scanned for migration definition files
    pub definitions_dir: Option<PathBuf>,
    /// Timeout for steps that set none
    pub default_step_timeout_secs: u64,
    /// Version assumed when no history exists yet
    pub initial_version: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./data/migrations"),
            definitions_dir: None,
            default_step_timeout_secs: 300,
            initial_version: "0.0.0".to_string(),
        }
    }
}

impl MigrationConfig {
    /// Defaults with history under `state_dir`
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Self::default()
        }
    }

    /// Load migration definitions from `dir`
    pub fn with_definitions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.definitions_dir = Some(dir.into());
        self
    }

    /// Version assumed before any history exists
    pub fn with_initial_version(mut self, version: impl Into<String>) -> Self {
        self.initial_version = version.into();
        self
    }
}

/// Integrity validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// Directory with user-supplied rule files merged over the built-ins
    pub rules_dir: Option<PathBuf>,
    /// Include the built-in case-management rules
    pub include_builtin_rules: bool,
    /// Upper bound on one rule query
    pub rule_timeout_secs: u64,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            rules_dir: None,
            include_builtin_rules: true,
            rule_timeout_secs: 60,
        }
    }
}

impl IntegrityConfig {
    /// Merge rule files from `dir`
    pub fn with_rules_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.rules_dir = Some(dir.into());
        self
    }

    /// Include or drop the built-in rules
    pub fn with_builtin_rules(mut self, include: bool) -> Self {
        self.include_builtin_rules = include;
        self
    }

    /// Per-rule timeout
    pub fn rule_timeout(&self) -> Duration {
        Duration::from_secs(self.rule_timeout_secs)
    }
}

/// Disaster recovery settings and health thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Directory holding persisted disaster events
    pub events_dir: PathBuf,
    /// Directory scanned for recovery plan files
    pub plans_dir: Option<PathBuf>,
    /// Free-space ratio below which storage is critical
    pub storage_critical_free_ratio: f64,
    /// Free-space ratio below which storage is degraded
    pub storage_degraded_free_ratio: f64,
    /// Reachable-secondary ratio below which the network is degraded
    pub network_degraded_reachable_ratio: f64,
    /// Age after which the last backup counts as stale
    pub backup_max_age_hours: i64,
    /// Timeout for one site check
    pub site_check_timeout_secs: u64,
    /// Timeout for one recovery step
    pub step_timeout_secs: u64,
    /// Interval of the health monitor loop
    pub health_poll_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            events_dir: PathBuf::from("./data/recovery/events"),
            plans_dir: None,
            storage_critical_free_ratio: 0.05,
            storage_degraded_free_ratio: 0.15,
            network_degraded_reachable_ratio: 0.5,
            backup_max_age_hours: 24,
            site_check_timeout_secs: 5,
            step_timeout_secs: 600,
            health_poll_interval_secs: 60,
        }
    }
}

impl RecoveryConfig {
    /// Defaults with events under `events_dir`
    pub fn new(events_dir: impl Into<PathBuf>) -> Self {
        Self {
            events_dir: events_dir.into(),
            ..Self::default()
        }
    }

    /// Load recovery plans from `dir`
    pub fn with_plans_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plans_dir = Some(dir.into());
        self
    }

    /// Site check timeout
    pub fn site_check_timeout(&self) -> Duration {
        Duration::from_secs(self.site_check_timeout_secs)
    }

    /// Recovery step timeout
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl SafeguardConfig {
    /// Place every component's directories under one root
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            backup: BackupConfig::new(root.join("backups")),
            encryption: EncryptionConfig::new(root.join("keys")),
            migration: MigrationConfig::new(root.join("migrations")),
            integrity: IntegrityConfig::default(),
            recovery: RecoveryConfig::new(root.join("recovery").join("events")),
        }
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = parse_definition_file(path)?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Overlay `SAFEGUARD_*` environment variables
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("SAFEGUARD_STATE_DIR") {
            let mut rooted = Self::with_root(&dir);
            rooted.encryption.master_secret = self.encryption.master_secret.take();
            self.backup.backup_dir = rooted.backup.backup_dir;
            self.encryption.keys_dir = rooted.encryption.keys_dir;
            self.migration.state_dir = rooted.migration.state_dir;
            self.recovery.events_dir = rooted.recovery.events_dir;
        }
        if let Ok(dir) = std::env::var("SAFEGUARD_BACKUP_DIR") {
            self.backup.backup_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SAFEGUARD_KEYS_DIR") {
            self.encryption.keys_dir = PathBuf::from(dir);
        }
        if let Ok(secret) = std::env::var("SAFEGUARD_MASTER_SECRET") {
            if !secret.is_empty() {
                self.encryption.master_secret = Some(secret);
            }
        }
        if let Ok(days) = std::env::var("SAFEGUARD_RETENTION_DAYS") {
            self.backup.retention_days = days.parse().map_err(|e| {
                SafeguardError::Configuration(format!("SAFEGUARD_RETENTION_DAYS: {}", e))
            })?;
        }
        if let Ok(count) = std::env::var("SAFEGUARD_MAX_PARALLEL_BACKUPS") {
            self.backup.max_parallel_backups = count.parse().map_err(|e| {
                SafeguardError::Configuration(format!("SAFEGUARD_MAX_PARALLEL_BACKUPS: {}", e))
            })?;
        }
        Ok(self)
    }

    /// Reject settings the managers cannot run with
    pub fn validate(&self) -> Result<()> {
        let b = &self.backup;
        if b.backup_dir.as_os_str().is_empty() {
            return Err(SafeguardError::Configuration("backup_dir is empty".into()));
        }
        if b.max_parallel_backups == 0 {
            return Err(SafeguardError::Configuration(
                "max_parallel_backups must be at least 1".into(),
            ));
        }
        if b.compression_level > 9 {
            return Err(SafeguardError::Configuration(format!(
                "compression_level {} out of range 0-9",
                b.compression_level
            )));
        }
        if b.retention_days == 0 {
            return Err(SafeguardError::Configuration("retention_days must be positive".into()));
        }

        let e = &self.encryption;
        if e.keys_dir.as_os_str().is_empty() {
            return Err(SafeguardError::Configuration("keys_dir is empty".into()));
        }
        if e.rotation_period_days == 0 {
            return Err(SafeguardError::Configuration(
                "rotation_period_days must be positive".into(),
            ));
        }

        if self.migration.state_dir.as_os_str().is_empty() {
            return Err(SafeguardError::Configuration("migration state_dir is empty".into()));
        }
        self.migration
            .initial_version
            .parse::<crate::migration::SchemaVersion>()?;

        let r = &self.recovery;
        if !(0.0..=1.0).contains(&r.storage_critical_free_ratio)
            || !(0.0..=1.0).contains(&r.storage_degraded_free_ratio)
            || r.storage_critical_free_ratio > r.storage_degraded_free_ratio
        {
            return Err(SafeguardError::Configuration(
                "storage thresholds must satisfy 0 <= critical <= degraded <= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&r.network_degraded_reachable_ratio) {
            return Err(SafeguardError::Configuration(
                "network_degraded_reachable_ratio must be within 0-1".into(),
            ));
        }

        Ok(())
    }
}

fn is_definition_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("json") | Some("yaml") | Some("yml")
    )
}

/// Parse one declarative file, JSON or YAML by extension
pub fn parse_definition_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        SafeguardError::Configuration(format!("Failed to read {}: {}", path.display(), e))
    })?;

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|e| {
            SafeguardError::Configuration(format!("Invalid YAML in {}: {}", path.display(), e))
        }),
        Some("json") => serde_json::from_str(&content).map_err(|e| {
            SafeguardError::Configuration(format!("Invalid JSON in {}: {}", path.display(), e))
        }),
        other => Err(SafeguardError::Configuration(format!(
            "Unsupported format {:?} for {}",
            other,
            path.display()
        ))),
    }
}

/// Load one definition per file from `dir`, in file-name order.
///
/// Malformed files are logged and skipped; a missing directory is a
/// configuration error.
pub fn load_definition_dir<T: DeserializeOwned>(dir: &Path, kind: &str) -> Result<Vec<T>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        SafeguardError::Configuration(format!(
            "Cannot read {} directory {}: {}",
            kind,
            dir.display(),
            e
        ))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_definition_file(path))
        .collect();
    paths.sort();

    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        match parse_definition_file(&path) {
            Ok(definition) => definitions.push(definition),
            Err(e) => error!(kind, path = %path.display(), error = %e, "Skipping malformed definition"),
        }
    }

    debug!(kind, dir = %dir.display(), count = definitions.len(), "Loaded definitions");
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SafeguardConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut config = SafeguardConfig::default();
        config.backup.max_parallel_backups = 0;
        assert!(matches!(
            config.validate(),
            Err(SafeguardError::Configuration(_))
        ));
    }

    #[test]
    fn test_inverted_storage_thresholds_rejected() {
        let mut config = SafeguardConfig::default();
        config.recovery.storage_critical_free_ratio = 0.3;
        config.recovery.storage_degraded_free_ratio = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_master_secret_not_serialized() {
        let config = EncryptionConfig::default().with_master_secret("hunter2");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_yaml_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safeguard.yaml");
        std::fs::write(
            &path,
            "backup:\n  backup_dir: /srv/backups\n  max_parallel_backups: 4\n  retention_days: 7\n",
        )
        .unwrap();

        let config = SafeguardConfig::from_file(&path).unwrap();
        assert_eq!(config.backup.backup_dir, PathBuf::from("/srv/backups"));
        assert_eq!(config.backup.max_parallel_backups, 4);
        assert_eq!(config.backup.retention_days, 7);
        // Unspecified sections keep their defaults
        assert_eq!(config.encryption.rotation_period_days, 90);
    }

    #[test]
    fn test_definition_dir_skips_malformed_files() {
        #[derive(Deserialize)]
        struct Named {
            name: String,
        }

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"name": "first"}"#).unwrap();
        std::fs::write(dir.path().join("b.yaml"), "name: second\n").unwrap();
        std::fs::write(dir.path().join("c.json"), "{ broken").unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let loaded: Vec<Named> = load_definition_dir(dir.path(), "test").unwrap();
        let names: Vec<&str> = loaded.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_compression_level_clamped() {
        let config = BackupConfig::default().with_compression_level(42);
        assert_eq!(config.compression_level, 9);
    }
}
