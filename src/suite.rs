//! Component wiring
//!
//! [`ProtectionSuite::initialize`] builds every manager in dependency order
//! and awaits each initialisation, so nothing is usable before its
//! collaborators have loaded their state.

use std::sync::Arc;
use tracing::info;

use crate::audit::AuditLogger;
use crate::backup::BackupManager;
use crate::config::SafeguardConfig;
use crate::encryption::EncryptionManager;
use crate::integrity::{IntegrityValidator, ValidationRule};
use crate::migration::{MigrationDefinition, MigrationManager};
use crate::recovery::{DisasterRecoveryManager, RecoveryPlan};
use crate::store::GraphStore;
use crate::Result;

/// Definitions supplied in code, merged with any loaded from configured
/// directories
#[derive(Debug, Clone, Default)]
pub struct SuiteDefinitions {
    /// Migration definitions
    pub migrations: Vec<MigrationDefinition>,
    /// Extra integrity rules
    pub rules: Vec<ValidationRule>,
    /// Recovery plans
    pub plans: Vec<RecoveryPlan>,
}

/// Every data-protection component, sharing one store and one audit trail
pub struct ProtectionSuite {
    /// Key lifecycle and encryption
    pub encryption: Arc<EncryptionManager>,
    /// Backup and restore
    pub backups: BackupManager,
    /// Schema migrations
    pub migrations: MigrationManager,
    /// Integrity validation
    pub integrity: Arc<IntegrityValidator>,
    /// Disaster recovery
    pub recovery: Arc<DisasterRecoveryManager>,
    /// Shared audit trail
    pub audit: AuditLogger,
}

impl ProtectionSuite {
    /// Validate `config` and build every manager in dependency order
    pub async fn initialize(
        config: SafeguardConfig,
        store: Arc<dyn GraphStore>,
        secondary_sites: Vec<Arc<dyn GraphStore>>,
        definitions: SuiteDefinitions,
    ) -> Result<Self> {
        config.validate()?;
        let audit = AuditLogger::new();

        let encryption = Arc::new(
            EncryptionManager::initialize(config.encryption.clone())
                .await?
                .with_audit_logger(audit.clone()),
        );

        let backups = BackupManager::initialize(
            config.backup.clone(),
            store.clone(),
            Some(encryption.clone()),
        )
        .await?
        .with_audit_logger(audit.clone());

        let migrations = MigrationManager::initialize(
            config.migration.clone(),
            store.clone(),
            Some(backups.clone()),
            definitions.migrations,
        )
        .await?
        .with_audit_logger(audit.clone());

        let integrity = Arc::new(
            IntegrityValidator::initialize(config.integrity.clone(), store.clone(), definitions.rules)
                .await?,
        );

        let recovery = Arc::new(
            DisasterRecoveryManager::initialize(
                config.recovery.clone(),
                store,
                secondary_sites,
                Some(backups.clone()),
                Some(integrity.clone()),
                definitions.plans,
            )
            .await?
            .with_audit_logger(audit.clone()),
        );

        info!("Protection suite initialized");
        Ok(Self {
            encryption,
            backups,
            migrations,
            integrity,
            recovery,
            audit,
        })
    }
}
