// Migration Manager - ordered step execution with validation and rollback

use super::history::MigrationHistory;
use super::types::{
    MigrationDefinition, MigrationRecord, MigrationStatus, MigrationStatusReport, MigrationStep,
    SchemaVersion, StepValidation, ValidationExpectation,
};
use crate::audit::AuditLogger;
use crate::backup::{BackupKind, BackupManager, BackupStatus};
use crate::config::MigrationConfig;
use crate::context::OperationContext;
use crate::metrics::ProtectionMetrics;
use crate::store::GraphStore;
use crate::{Result, SafeguardError};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

/// Why a step did not complete, and whether its forward command already ran
struct StepError {
    forward_applied: bool,
    error: SafeguardError,
}

/// Plans, applies and rolls back schema migrations
pub struct MigrationManager {
    config: MigrationConfig,
    store: Arc<dyn GraphStore>,
    backups: Option<BackupManager>,
    definitions: Vec<MigrationDefinition>,
    history: Mutex<MigrationHistory>,
    audit: AuditLogger,
}

impl MigrationManager {
    /// Load history and definitions. `definitions` are merged with any found
    /// in the configured definitions directory; invalid or duplicate
    /// definitions are skipped with an error log.
    pub async fn initialize(
        config: MigrationConfig,
        store: Arc<dyn GraphStore>,
        backups: Option<BackupManager>,
        definitions: Vec<MigrationDefinition>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.state_dir).await.map_err(|e| {
            SafeguardError::Configuration(format!(
                "Cannot create migration state directory {}: {}",
                config.state_dir.display(),
                e
            ))
        })?;

        let initial: SchemaVersion = config.initial_version.parse()?;
        let history = MigrationHistory::load(&config.state_dir, initial).await?;

        let mut candidates = definitions;
        if let Some(dir) = &config.definitions_dir {
            candidates.extend(super::load_definitions(dir)?);
        }

        let mut accepted: Vec<MigrationDefinition> = Vec::with_capacity(candidates.len());
        for definition in candidates {
            if let Err(e) = definition.validate() {
                error!(migration_id = %definition.id, error = %e, "Skipping invalid migration");
                continue;
            }
            if accepted.iter().any(|d| d.id == definition.id) {
                error!(migration_id = %definition.id, "Skipping duplicate migration id");
                continue;
            }
            accepted.push(definition);
        }
        accepted.sort_by(|a, b| {
            a.version_from
                .cmp(&b.version_from)
                .then_with(|| a.version_to.cmp(&b.version_to))
                .then_with(|| a.id.cmp(&b.id))
        });

        info!(
            definitions = accepted.len(),
            current_version = %history.current_version,
            "Migration manager initialized"
        );

        Ok(Self {
            config,
            store,
            backups,
            definitions: accepted,
            history: Mutex::new(history),
            audit: AuditLogger::new(),
        })
    }

    /// Record migration events in a shared audit trail
    pub fn with_audit_logger(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Every loaded definition in ascending version order
    pub fn discover_migrations(&self) -> Vec<MigrationDefinition> {
        self.definitions.clone()
    }

    /// Loaded definition by id
    pub fn definition(&self, migration_id: &str) -> Option<&MigrationDefinition> {
        self.definitions.iter().find(|d| d.id == migration_id)
    }

    /// Version recorded in the history
    pub async fn current_version(&self) -> SchemaVersion {
        self.history.lock().await.current_version.clone()
    }

    /// Every attempt, oldest first
    pub async fn history(&self) -> Vec<MigrationRecord> {
        self.history.lock().await.records.clone()
    }

    /// Migrations that would run now, in execution order
    pub async fn pending_migrations(&self, target: Option<&SchemaVersion>) -> Vec<MigrationDefinition> {
        let history = self.history.lock().await;
        self.applicable(&history, target)
            .into_iter()
            .cloned()
            .collect()
    }

    fn applicable<'a>(
        &'a self,
        history: &MigrationHistory,
        target: Option<&SchemaVersion>,
    ) -> Vec<&'a MigrationDefinition> {
        self.definitions
            .iter()
            .filter(|d| d.version_from <= history.current_version)
            .filter(|d| target.map_or(true, |t| d.version_to <= *t))
            .filter(|d| match history.latest(&d.id).map(|r| r.status) {
                None | Some(MigrationStatus::Pending) => true,
                // Retried
                Some(MigrationStatus::Failed) | Some(MigrationStatus::RolledBack) => true,
                Some(MigrationStatus::Completed) => false,
                // Left over from a crash; needs manual intervention
                Some(MigrationStatus::Running) => false,
            })
            .collect()
    }

    async fn save(&self, record: &MigrationRecord) -> Result<()> {
        let mut history = self.history.lock().await;
        history.upsert(record);
        history.save(&self.config.state_dir).await
    }

    fn step_timeout(&self, step: &MigrationStep) -> Duration {
        Duration::from_secs(step.timeout_secs.unwrap_or(self.config.default_step_timeout_secs))
    }

    /// Run one migration. Dependency failures are returned as errors before
    /// any record is created; every other failure ends up in the record.
    #[instrument(skip(self, definition, ctx), fields(migration_id = %definition.id))]
    pub async fn execute_migration(
        &self,
        definition: &MigrationDefinition,
        ctx: &OperationContext,
    ) -> Result<MigrationRecord> {
        let attempt = {
            let history = self.history.lock().await;
            for dependency in &definition.dependencies {
                let satisfied = history
                    .latest(dependency)
                    .map_or(false, |r| r.status == MigrationStatus::Completed);
                if !satisfied {
                    return Err(SafeguardError::DependencyUnsatisfied(format!(
                        "{} requires {}",
                        definition.id, dependency
                    )));
                }
            }
            history.next_attempt(&definition.id)
        };

        let mut record = MigrationRecord::start(&definition.id, attempt);
        self.save(&record).await?;
        info!(
            migration_id = %definition.id,
            attempt,
            from = %definition.version_from,
            to = %definition.version_to,
            "Starting migration"
        );

        if definition.backup_required {
            if let Err(message) = self.pre_migration_backup(definition, &mut record, ctx).await {
                error!(migration_id = %definition.id, error = %message, "Pre-migration backup failed");
                record.status = MigrationStatus::Failed;
                record.error = Some(format!("Pre-migration backup failed: {}", message));
                return self.finish(record).await;
            }
        }

        let mut failure: Option<(String, StepError)> = None;
        for step in &definition.steps {
            if let Err(e) = ctx.checkpoint() {
                failure = Some((
                    step.id.clone(),
                    StepError {
                        forward_applied: false,
                        error: e,
                    },
                ));
                break;
            }

            let started = Instant::now();
            let outcome = self.run_step(step, ctx).await;
            ProtectionMetrics::record_migration_step("forward", started.elapsed().as_secs_f64());

            match outcome {
                Ok(()) => {
                    record.executed_steps.push(step.id.clone());
                    self.save(&record).await?;
                }
                Err(step_error) => {
                    failure = Some((step.id.clone(), step_error));
                    break;
                }
            }
        }

        match failure {
            None => {
                record.status = MigrationStatus::Completed;
                {
                    let mut history = self.history.lock().await;
                    if definition.version_to > history.current_version {
                        history.current_version = definition.version_to.clone();
                    }
                }
                info!(migration_id = %definition.id, version = %definition.version_to, "Migration completed");
            }
            Some((step_id, step_error)) => {
                let failure = SafeguardError::StepFailure {
                    step_id: step_id.clone(),
                    message: step_error.error.to_string(),
                };
                error!(migration_id = %definition.id, step_id = %step_id, error = %failure, "Migration step failed");
                record.status = MigrationStatus::Failed;
                record.failed_step = Some(step_id.clone());
                record.error = Some(failure.to_string());

                if definition.auto_rollback {
                    let mut undo = record.executed_steps.clone();
                    if step_error.forward_applied {
                        undo.push(step_id);
                    }
                    match self.rollback_steps(definition, &undo).await {
                        Ok(()) => {
                            record.status = MigrationStatus::RolledBack;
                            record.rollback_completed = true;
                            info!(migration_id = %definition.id, "Migration rolled back");
                        }
                        Err(e) => {
                            error!(migration_id = %definition.id, error = %e, "Rollback failed");
                            record.rollback_error = Some(e.to_string());
                        }
                    }
                }
            }
        }

        self.finish(record).await
    }

    async fn finish(&self, mut record: MigrationRecord) -> Result<MigrationRecord> {
        record.completed_at = Some(Utc::now());
        self.save(&record).await?;
        ProtectionMetrics::record_migration(record.status.as_str());
        Ok(record)
    }

    async fn pre_migration_backup(
        &self,
        definition: &MigrationDefinition,
        record: &mut MigrationRecord,
        ctx: &OperationContext,
    ) -> std::result::Result<(), String> {
        let backups = self
            .backups
            .as_ref()
            .ok_or_else(|| "no backup manager configured".to_string())?;
        let tags = vec!["pre-migration".to_string(), definition.id.clone()];
        let backup = backups
            .run_backup(BackupKind::Full, tags, ctx.clone())
            .await
            .map_err(|e| e.to_string())?;
        record.backup_id = Some(backup.id.clone());

        if backup.status != BackupStatus::Completed {
            return Err(format!(
                "backup {} ended {}: {}",
                backup.id,
                backup.status,
                backup.error.unwrap_or_default()
            ));
        }
        Ok(())
    }

    async fn run_step(&self, step: &MigrationStep, ctx: &OperationContext) -> std::result::Result<(), StepError> {
        let timeout = self.step_timeout(step);

        ctx.run(Some(timeout), async {
            self.store.execute(&step.forward).await?;
            Ok(())
        })
        .await
        .map_err(|error| StepError {
            forward_applied: false,
            error,
        })?;

        if let Some(validation) = &step.validation {
            let verdict = ctx
                .run(Some(timeout), self.check_validation(validation))
                .await;
            match verdict {
                Ok(true) => {}
                Ok(false) => {
                    return Err(StepError {
                        forward_applied: true,
                        error: SafeguardError::InvalidState(format!(
                            "validation expecting {:?} did not hold",
                            validation.expect
                        )),
                    })
                }
                Err(error) => {
                    return Err(StepError {
                        forward_applied: true,
                        error,
                    })
                }
            }
        }
        Ok(())
    }

    async fn check_validation(&self, validation: &StepValidation) -> Result<bool> {
        let rows = self.store.query(&validation.query).await?;
        Ok(match validation.expect {
            ValidationExpectation::Empty => rows.is_empty(),
            ValidationExpectation::NonEmpty => !rows.is_empty(),
            ValidationExpectation::ValidFlag => rows
                .first()
                .and_then(|row| row.get("valid"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// Undo `step_ids` in reverse order. Rollbacks run with only the step
    /// timeout so that a cancelled caller still gets a consistent store.
    async fn rollback_steps(&self, definition: &MigrationDefinition, step_ids: &[String]) -> Result<()> {
        let rollback_ctx = OperationContext::new();
        for step_id in step_ids.iter().rev() {
            let step = definition
                .step(step_id)
                .ok_or_else(|| SafeguardError::NotFound(format!("step {}", step_id)))?;
            let command = match &step.rollback {
                Some(command) => command,
                None => {
                    warn!(migration_id = %definition.id, step_id = %step_id, "Step has no rollback, skipping");
                    continue;
                }
            };

            let started = Instant::now();
            let result = rollback_ctx
                .run(Some(self.step_timeout(step)), async {
                    self.store.execute(command).await?;
                    Ok(())
                })
                .await;
            ProtectionMetrics::record_migration_step("rollback", started.elapsed().as_secs_f64());

            result.map_err(|e| SafeguardError::StepFailure {
                step_id: step_id.clone(),
                message: format!("rollback failed: {}", e),
            })?;
        }
        Ok(())
    }

    /// Apply pending migrations in ascending version order up to `target`,
    /// stopping at the first one that does not complete.
    #[instrument(skip(self, ctx))]
    pub async fn migrate_to_version(
        &self,
        target: Option<SchemaVersion>,
        ctx: &OperationContext,
    ) -> Result<Vec<MigrationRecord>> {
        let mut results = Vec::new();
        let mut attempted: Vec<String> = Vec::new();

        loop {
            let next = {
                let history = self.history.lock().await;
                self.applicable(&history, target.as_ref())
                    .into_iter()
                    .find(|d| !attempted.contains(&d.id))
                    .cloned()
            };
            let definition = match next {
                Some(definition) => definition,
                None => break,
            };
            attempted.push(definition.id.clone());

            let record = self.execute_migration(&definition, ctx).await?;
            let completed = record.status == MigrationStatus::Completed;
            results.push(record);
            if !completed {
                warn!(migration_id = %definition.id, "Halting migration run");
                break;
            }
        }

        info!(
            applied = results.len(),
            current_version = %self.current_version().await,
            "Migration run finished"
        );
        Ok(results)
    }

    /// Undo a completed migration and return the version to its `version_from`.
    /// A cancelled or expired context is refused before any step is undone;
    /// once started the rollback runs to the end.
    #[instrument(skip(self, ctx))]
    pub async fn rollback_migration(
        &self,
        migration_id: &str,
        ctx: &OperationContext,
    ) -> Result<MigrationRecord> {
        let definition = self
            .definition(migration_id)
            .ok_or_else(|| SafeguardError::NotFound(format!("migration {}", migration_id)))?;

        let mut record = {
            let history = self.history.lock().await;
            match history.latest(migration_id) {
                Some(r) if r.status == MigrationStatus::Completed => r.clone(),
                Some(r) => {
                    return Err(SafeguardError::InvalidState(format!(
                        "Migration {} is {}, only completed migrations can be rolled back",
                        migration_id, r.status
                    )))
                }
                None => {
                    return Err(SafeguardError::NotFound(format!(
                        "no execution of migration {}",
                        migration_id
                    )))
                }
            }
        };

        ctx.checkpoint()?;
        match self.rollback_steps(definition, &record.executed_steps).await {
            Ok(()) => {
                record.status = MigrationStatus::RolledBack;
                record.rollback_completed = true;
                let mut history = self.history.lock().await;
                if history.current_version == definition.version_to {
                    history.current_version = definition.version_from.clone();
                }
            }
            Err(e) => {
                error!(migration_id = %migration_id, error = %e, "Manual rollback failed");
                record.status = MigrationStatus::Failed;
                record.rollback_error = Some(e.to_string());
            }
        }
        record.completed_at = Some(Utc::now());
        self.save(&record).await?;

        let mut meta = HashMap::new();
        meta.insert("status".to_string(), record.status.to_string());
        self.audit
            .log_event("migration_rolled_back", "migration", migration_id, meta)
            .await;
        ProtectionMetrics::record_migration(record.status.as_str());

        Ok(record)
    }

    /// Current version with pending, completed, failed and stuck migrations
    pub async fn status(&self) -> MigrationStatusReport {
        let history = self.history.lock().await;
        let pending = self
            .applicable(&history, None)
            .into_iter()
            .map(|d| d.id.clone())
            .collect();

        let mut report = MigrationStatusReport {
            current_version: history.current_version.clone(),
            pending,
            completed: Vec::new(),
            failed: Vec::new(),
            rolled_back: Vec::new(),
            stuck: Vec::new(),
        };
        for definition in &self.definitions {
            match history.latest(&definition.id).map(|r| r.status) {
                Some(MigrationStatus::Completed) => report.completed.push(definition.id.clone()),
                Some(MigrationStatus::Failed) => report.failed.push(definition.id.clone()),
                Some(MigrationStatus::RolledBack) => report.rolled_back.push(definition.id.clone()),
                Some(MigrationStatus::Running) => report.stuck.push(definition.id.clone()),
                Some(MigrationStatus::Pending) | None => {}
            }
        }
        report
    }
}
