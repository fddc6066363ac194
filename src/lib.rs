//! # Graph Safeguard
//!
//! Data-protection subsystem for a property-graph database backing a
//! case-management system.
//!
//! ## Overview
//!
//! The crate orchestrates protection *of* an external graph store; it does not
//! implement a storage engine. Every store access goes through the
//! [`store::GraphStore`] trait, so the same managers run against a production
//! driver or the in-memory [`store::MemoryGraphStore`] used in tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use safeguard::backup::{BackupKind, BackupManager};
//! use safeguard::config::SafeguardConfig;
//! use safeguard::context::OperationContext;
//! use safeguard::encryption::EncryptionManager;
//! use safeguard::store::MemoryGraphStore;
//!
//! # async fn example() -> safeguard::Result<()> {
//! let config = SafeguardConfig::default();
//! let store = Arc::new(MemoryGraphStore::new("primary"));
//!
//! let encryption = Arc::new(EncryptionManager::initialize(config.encryption.clone()).await?);
//! let backups = BackupManager::initialize(config.backup.clone(), store, Some(encryption)).await?;
//!
//! let record = backups
//!     .run_backup(BackupKind::Full, vec!["nightly".into()], OperationContext::default())
//!     .await?;
//! println!("backup {} finished as {}", record.id, record.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`encryption`]: key lifecycle and classification-driven encryption
//! - [`backup`]: snapshot, archive, verify, retain and restore
//! - [`migration`]: versioned schema/data migrations with rollback
//! - [`integrity`]: declarative rule validation and auto-fix
//! - [`recovery`]: health monitoring, disaster declaration and recovery plans
//! - [`suite`]: wires all of the above in dependency order

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use std::time::Duration;
use thiserror::Error;

/// Result type for data-protection operations
pub type Result<T> = std::result::Result<T, SafeguardError>;

/// Main error type for data-protection operations
#[derive(Error, Debug)]
pub enum SafeguardError {
    /// Bad paths, keys or settings detected at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A bounded resource (e.g. the parallel-backup cap) is exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Unknown backup, key, migration or plan id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Checksum or archive mismatch
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Missing, inactive or expired encryption key
    #[error("Key lifecycle error: {0}")]
    KeyLifecycle(#[from] encryption::KeyLifecycleError),

    /// A migration dependency has not completed
    #[error("Dependency unsatisfied: {0}")]
    DependencyUnsatisfied(String),

    /// A migration or recovery step failed
    #[error("Step '{step_id}' failed: {message}")]
    StepFailure {
        /// Id of the failing step
        step_id: String,
        /// Human-readable cause
        message: String,
    },

    /// Failover exhausted every configured secondary site
    #[error("All secondary sites unavailable")]
    AllSitesUnavailable,

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation is not valid for the object's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Cipher or key-derivation failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Graph store failure
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    /// Backup artifact storage failure
    #[error("Backup error: {0}")]
    Backup(#[from] backup::BackupError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Join error from async tasks
    #[error("Async join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Configuration for every component
pub mod config;

/// Tracing subscriber setup
pub mod telemetry;

/// Prometheus metrics
pub mod metrics;

/// Deadlines and cooperative cancellation
pub mod context;

/// Audit trail for security-relevant events
pub mod audit;

/// Graph store boundary and in-memory implementation
pub mod store;

/// Encryption key lifecycle and payload encryption
pub mod encryption;

/// Backup and restore
pub mod backup;

/// Schema and data migrations
pub mod migration;

/// Rule-based integrity validation
pub mod integrity;

/// Disaster recovery orchestration
pub mod recovery;

/// Component wiring
pub mod suite;
