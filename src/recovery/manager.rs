// Disaster Recovery Manager - health monitoring, disaster declaration, plan execution, failover

use super::health::{classify_network, classify_storage, DiskSpaceSource, SystemDiskSpace};
use super::notification::{NotificationSink, TracingNotificationSink};
use super::plans::{accept_plans, coverage_gaps, load_plans, select_plans};
use super::types::{
    Component, ComponentHealth, DisasterEvent, DisasterType, HealthReport, HealthStatus,
    Notification, PlanExecution, Readiness, ReadinessReport, RecoveryPlan, RecoveryStep,
    StepAction, ValidationTest,
};
use crate::audit::AuditLogger;
use crate::backup::{BackupManager, BackupStatus};
use crate::config::RecoveryConfig;
use crate::context::OperationContext;
use crate::integrity::{IntegrityValidator, Severity, ValidationLevel};
use crate::metrics::ProtectionMetrics;
use crate::store::{GraphQuery, GraphStore};
use crate::{Result, SafeguardError};
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Health monitoring, disaster declaration and plan execution
pub struct DisasterRecoveryManager {
    config: RecoveryConfig,
    primary: Arc<dyn GraphStore>,
    secondaries: Vec<Arc<dyn GraphStore>>,
    backups: Option<BackupManager>,
    integrity: Option<Arc<IntegrityValidator>>,
    plans: Vec<RecoveryPlan>,
    events: RwLock<HashMap<String, DisasterEvent>>,
    health: RwLock<HashMap<Component, HealthStatus>>,
    /// Index into `secondaries` after a failover
    active_site: RwLock<Option<usize>>,
    disk_space: Arc<dyn DiskSpaceSource>,
    notifier: Arc<dyn NotificationSink>,
    audit: AuditLogger,
}

impl DisasterRecoveryManager {
    /// Load plans and previously declared events. `plans` are merged with
    /// any plan files in the configured directory.
    pub async fn initialize(
        config: RecoveryConfig,
        primary: Arc<dyn GraphStore>,
        secondaries: Vec<Arc<dyn GraphStore>>,
        backups: Option<BackupManager>,
        integrity: Option<Arc<IntegrityValidator>>,
        plans: Vec<RecoveryPlan>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.events_dir).await.map_err(|e| {
            SafeguardError::Configuration(format!(
                "Cannot create events directory {}: {}",
                config.events_dir.display(),
                e
            ))
        })?;

        let mut candidates = plans;
        if let Some(dir) = &config.plans_dir {
            candidates.extend(load_plans(dir)?);
        }
        let plans = accept_plans(candidates);

        let events = load_events(&config.events_dir).await?;
        let gaps = coverage_gaps(&plans);
        if !gaps.is_empty() {
            warn!(gaps = ?gaps, "Disaster types without a recovery plan");
        }

        info!(
            plans = plans.len(),
            events = events.len(),
            secondaries = secondaries.len(),
            "Disaster recovery manager initialized"
        );

        Ok(Self {
            config,
            primary,
            secondaries,
            backups,
            integrity,
            plans,
            events: RwLock::new(events.into_iter().map(|e| (e.id.clone(), e)).collect()),
            health: RwLock::new(HashMap::new()),
            active_site: RwLock::new(None),
            disk_space: Arc::new(SystemDiskSpace),
            notifier: Arc::new(TracingNotificationSink),
            audit: AuditLogger::new(),
        })
    }

    /// Replace the disk-space source
    pub fn with_disk_space(mut self, source: Arc<dyn DiskSpaceSource>) -> Self {
        self.disk_space = source;
        self
    }

    /// Replace where notifications go
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier = sink;
        self
    }

    /// Record recovery events in a shared audit trail
    pub fn with_audit_logger(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Accepted plans
    pub fn plans(&self) -> &[RecoveryPlan] {
        &self.plans
    }

    /// Store currently serving traffic
    pub async fn active_store(&self) -> Arc<dyn GraphStore> {
        match *self.active_site.read().await {
            Some(index) => self.secondaries[index].clone(),
            None => self.primary.clone(),
        }
    }

    /// Poll every component once
    #[instrument(skip(self, ctx))]
    pub async fn check_health(&self, ctx: &OperationContext) -> HealthReport {
        let components = vec![
            self.check_database(ctx).await,
            self.check_backups().await,
            self.check_network(ctx).await,
            self.check_storage(),
        ];

        let mut previous = self.health.write().await;
        for health in &components {
            let before = previous.insert(health.component, health.status);
            if before != Some(health.status) {
                let from = before.map_or("unknown", |s| s.as_str());
                if health.status > HealthStatus::Healthy {
                    warn!(component = %health.component, from, to = %health.status, message = %health.message, "Component health changed");
                } else {
                    info!(component = %health.component, from, to = %health.status, "Component health changed");
                }
            }
            ProtectionMetrics::set_component_health(health.component.as_str(), health.status.level());
        }

        HealthReport::from_components(components)
    }

    async fn check_database(&self, ctx: &OperationContext) -> ComponentHealth {
        let store = self.active_store().await;
        let timeout = self.config.site_check_timeout();
        let started = Instant::now();

        if let Err(e) = ctx.run(Some(timeout), async { Ok(store.ping().await?) }).await {
            return ComponentHealth::new(Component::Database, HealthStatus::Failed, e.to_string())
                .with_detail("store", store.name());
        }
        let latency = started.elapsed();

        let mut status = if latency > timeout / 2 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        let mut message = format!("{} answered in {} ms", store.name(), latency.as_millis());

        if let Some(validator) = &self.integrity {
            match validator.validate(ValidationLevel::Basic, None, ctx).await {
                Ok(result) if result.status == Severity::Critical => {
                    status = status.max(HealthStatus::Critical);
                    message = format!("{} critical integrity issues", result.issues.len());
                }
                Ok(_) => {}
                Err(e) => {
                    status = status.max(HealthStatus::Degraded);
                    message = format!("integrity check unavailable: {}", e);
                }
            }
        }

        ComponentHealth::new(Component::Database, status, message)
            .with_detail("store", store.name())
            .with_detail("latency_ms", latency.as_millis())
    }

    async fn check_backups(&self) -> ComponentHealth {
        let backups = match &self.backups {
            Some(b) => b,
            None => {
                return ComponentHealth::new(
                    Component::Backup,
                    HealthStatus::Critical,
                    "no backup manager configured",
                )
            }
        };

        let restorable = match backups.latest_restorable().await {
            Some(r) => r,
            None => {
                return ComponentHealth::new(
                    Component::Backup,
                    HealthStatus::Critical,
                    "no restorable backup",
                )
            }
        };

        let age = Utc::now() - restorable.started_at;
        let newest_failed = backups
            .list_backups()
            .await
            .into_iter()
            .max_by_key(|r| r.started_at)
            .filter(|r| matches!(r.status, BackupStatus::Failed | BackupStatus::Corrupted));

        let (status, message) = if age > ChronoDuration::hours(self.config.backup_max_age_hours) {
            (
                HealthStatus::Degraded,
                format!("latest restorable backup is {} hours old", age.num_hours()),
            )
        } else if let Some(failed) = &newest_failed {
            (
                HealthStatus::Degraded,
                format!("most recent backup {} is {}", failed.id, failed.status),
            )
        } else {
            (HealthStatus::Healthy, "recent restorable backup present".to_string())
        };

        ComponentHealth::new(Component::Backup, status, message)
            .with_detail("latest_restorable", &restorable.id)
    }

    async fn check_network(&self, ctx: &OperationContext) -> ComponentHealth {
        let checks = self.secondaries.iter().map(|site| self.check_site(site, ctx));
        let reachable = join_all(checks).await.iter().filter(|r| r.is_ok()).count();
        let total = self.secondaries.len();
        let status = classify_network(reachable, total, &self.config);

        ComponentHealth::new(
            Component::Network,
            status,
            format!("{}/{} secondary sites reachable", reachable, total),
        )
        .with_detail("reachable", reachable)
        .with_detail("total", total)
    }

    fn check_storage(&self) -> ComponentHealth {
        let path = self
            .backups
            .as_ref()
            .map(|b| b.config().backup_dir.clone())
            .unwrap_or_else(|| self.config.events_dir.clone());

        match self.disk_space.free_ratio(&path) {
            Ok(ratio) => {
                let status = classify_storage(ratio, &self.config);
                ComponentHealth::new(
                    Component::Storage,
                    status,
                    format!("{:.1}% free", ratio * 100.0),
                )
                .with_detail("path", path.display())
            }
            Err(e) => ComponentHealth::new(Component::Storage, HealthStatus::Failed, e.to_string())
                .with_detail("path", path.display()),
        }
    }

    async fn check_site(&self, site: &Arc<dyn GraphStore>, ctx: &OperationContext) -> Result<()> {
        ctx.run(Some(self.config.site_check_timeout()), async {
            Ok(site.ping().await?)
        })
        .await
    }

    /// Poll health every `health_poll_interval_secs` until `token` is cancelled
    pub fn spawn_health_monitor(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.health_poll_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Health monitor stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let ctx = OperationContext::new().with_cancellation(token.child_token());
                        let report = self.check_health(&ctx).await;
                        debug!(overall = %report.overall, "Health poll");
                    }
                }
            }
        })
    }

    /// Switch to the first secondary site that answers a liveness check
    #[instrument(skip(self, ctx))]
    pub async fn failover(&self, ctx: &OperationContext) -> Result<String> {
        for (index, site) in self.secondaries.iter().enumerate() {
            ctx.checkpoint()?;
            match self.check_site(site, ctx).await {
                Ok(()) => {
                    *self.active_site.write().await = Some(index);
                    info!(site = site.name(), "Failed over to secondary site");
                    return Ok(site.name().to_string());
                }
                Err(SafeguardError::Cancelled) => return Err(SafeguardError::Cancelled),
                Err(e) => {
                    warn!(site = site.name(), error = %e, "Secondary site unavailable");
                }
            }
        }
        error!(sites = self.secondaries.len(), "Failover exhausted every secondary site");
        Err(SafeguardError::AllSitesUnavailable)
    }

    /// Record a disaster and run every matching plan in priority order.
    ///
    /// The event is persisted before any plan runs. A failing plan does not
    /// stop later plans, except those that depend on it.
    #[instrument(skip(self, description, affected_systems, ctx))]
    pub async fn declare_disaster(
        &self,
        disaster_type: DisasterType,
        description: impl Into<String>,
        affected_systems: Vec<String>,
        ctx: &OperationContext,
    ) -> Result<DisasterEvent> {
        let mut event = DisasterEvent::new(disaster_type, description, affected_systems);
        error!(
            event_id = %event.id,
            disaster_type = %disaster_type,
            severity = ?event.impact.severity,
            affected = ?event.affected_systems,
            "Disaster declared"
        );
        self.persist_event(&event).await?;
        ProtectionMetrics::record_disaster(disaster_type.as_str());

        let mut meta = HashMap::new();
        meta.insert("disaster_type".to_string(), disaster_type.to_string());
        meta.insert("severity".to_string(), format!("{:?}", event.impact.severity));
        self.audit
            .log_event("disaster_declared", "recovery", &event.id, meta)
            .await;

        self.send(&event, format!("Disaster declared: {}", event.description))
            .await;

        let matching = select_plans(&self.plans, disaster_type);
        if matching.is_empty() {
            error!(event_id = %event.id, disaster_type = %disaster_type, "No recovery plan matches disaster type");
            return Ok(event);
        }

        event.recovery_initiated = true;
        self.persist_event(&event).await?;

        let mut failed_plans: HashSet<String> = HashSet::new();
        for plan in matching {
            let blocked = plan
                .dependencies
                .iter()
                .find(|dep| failed_plans.contains(dep.as_str()));

            let execution = match blocked {
                Some(dep) => {
                    error!(plan_id = %plan.id, dependency = %dep, "Skipping plan, dependency failed");
                    PlanExecution::skipped(&plan.id, format!("dependency {} failed", dep))
                }
                None => self.execute_plan(plan, &event, ctx).await,
            };

            ProtectionMetrics::record_plan_execution(&plan.id, execution.success);
            if !execution.success {
                failed_plans.insert(plan.id.clone());
            }
            event.plan_results.push(execution);
            self.persist_event(&event).await?;
        }

        event.recovery_completed = event.plan_results.iter().all(|r| r.success);
        self.persist_event(&event).await?;

        let summary = if event.recovery_completed {
            format!("Recovery completed for {}", event.disaster_type)
        } else {
            format!(
                "Recovery incomplete for {}: {} of {} plans failed",
                event.disaster_type,
                failed_plans.len(),
                event.plan_results.len()
            )
        };
        self.send(&event, summary).await;

        Ok(event)
    }

    async fn send(&self, event: &DisasterEvent, message: String) {
        let notification = Notification {
            event_id: event.id.clone(),
            disaster_type: event.disaster_type,
            message,
            timestamp: Utc::now(),
            severity: event.impact.severity,
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(event_id = %event.id, error = %e, "Notification delivery failed");
        }
    }

    async fn execute_plan(
        &self,
        plan: &RecoveryPlan,
        event: &DisasterEvent,
        ctx: &OperationContext,
    ) -> PlanExecution {
        info!(plan_id = %plan.id, event_id = %event.id, priority = plan.priority, "Executing recovery plan");
        let started_at = Utc::now();
        let mut execution = PlanExecution {
            plan_id: plan.id.clone(),
            success: false,
            executed_steps: Vec::new(),
            failed_step: None,
            error: None,
            validation_failures: Vec::new(),
            started_at,
            completed_at: started_at,
        };

        for step in &plan.steps {
            let timeout = step
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| self.config.step_timeout());

            let outcome = ctx.run(Some(timeout), self.run_step(step, event, ctx)).await;
            match outcome {
                Ok(()) => execution.executed_steps.push(step.id.clone()),
                Err(e) => {
                    let failure = SafeguardError::StepFailure {
                        step_id: step.id.clone(),
                        message: e.to_string(),
                    };
                    error!(plan_id = %plan.id, step_id = %step.id, error = %failure, "Recovery step failed");
                    execution.failed_step = Some(step.id.clone());
                    execution.error = Some(failure.to_string());
                    execution.completed_at = Utc::now();
                    return execution;
                }
            }
        }

        for test in &plan.validation_tests {
            if let Err(e) = self.run_validation(test, ctx).await {
                warn!(plan_id = %plan.id, test = ?test, error = %e, "Recovery validation failed");
                execution.validation_failures.push(e.to_string());
            }
        }

        execution.success = execution.validation_failures.is_empty();
        if !execution.success {
            execution.error = Some(format!(
                "{} validation test(s) failed",
                execution.validation_failures.len()
            ));
        }
        execution.completed_at = Utc::now();
        info!(plan_id = %plan.id, success = execution.success, "Recovery plan finished");
        execution
    }

    async fn run_step(
        &self,
        step: &RecoveryStep,
        event: &DisasterEvent,
        ctx: &OperationContext,
    ) -> Result<()> {
        match &step.action {
            StepAction::FailoverToSecondary => {
                self.failover(ctx).await?;
            }
            StepAction::RestoreFromBackup { backup_id } => {
                let backups = self.backups.as_ref().ok_or_else(|| {
                    SafeguardError::InvalidState("no backup manager configured".into())
                })?;
                let backup_id = match backup_id {
                    Some(id) => id.clone(),
                    None => backups
                        .latest_restorable()
                        .await
                        .map(|r| r.id)
                        .ok_or_else(|| SafeguardError::NotFound("restorable backup".into()))?,
                };
                let target = self.active_store().await;
                let restored = backups.restore_backup(&backup_id, target, ctx.clone()).await?;
                if !restored.success {
                    return Err(SafeguardError::InvalidState(format!(
                        "restore of {} failed: {}",
                        backup_id,
                        restored.error.unwrap_or_default()
                    )));
                }
            }
            StepAction::NotifyStakeholders { message } => {
                self.send(event, message.clone()).await;
            }
            StepAction::Manual { instructions } => {
                info!(event_id = %event.id, step_id = %step.id, "Manual recovery step: {}", instructions);
            }
        }
        Ok(())
    }

    async fn run_validation(&self, test: &ValidationTest, ctx: &OperationContext) -> Result<()> {
        let store = self.active_store().await;
        match test {
            ValidationTest::Connectivity => self.check_site(&store, ctx).await,
            ValidationTest::DataPresence { label, min_count } => {
                let query = GraphQuery::CountNodes { label: *label };
                let rows = ctx
                    .run(Some(self.config.site_check_timeout()), async {
                        Ok(store.query(&query).await?)
                    })
                    .await?;
                let count = rows
                    .first()
                    .and_then(|r| r.get("count"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                if count < *min_count {
                    return Err(SafeguardError::InvalidState(format!(
                        "{} holds {} nodes, expected at least {}",
                        store.name(),
                        count,
                        min_count
                    )));
                }
                Ok(())
            }
        }
    }

    /// Current health plus plan coverage
    pub async fn generate_readiness_report(&self, ctx: &OperationContext) -> ReadinessReport {
        let health = self.check_health(ctx).await;
        let gaps = coverage_gaps(&self.plans);
        let last_backup_at = match &self.backups {
            Some(b) => b.last_backup(None).await.map(|r| r.started_at),
            None => None,
        };

        let mut findings = Vec::new();
        for component in &health.components {
            if component.status >= HealthStatus::Critical {
                findings.push(format!(
                    "{} is {}: {}",
                    component.component, component.status, component.message
                ));
            }
        }
        for gap in &gaps {
            findings.push(format!("no recovery plan covers {}", gap));
        }

        let verdict = if findings.is_empty() {
            Readiness::Ready
        } else {
            Readiness::NotReady
        };
        info!(verdict = ?verdict, findings = findings.len(), "Readiness report generated");

        ReadinessReport {
            verdict,
            health,
            plan_count: self.plans.len(),
            coverage_gaps: gaps,
            last_backup_at,
            findings,
            generated_at: Utc::now(),
        }
    }

    /// Every declared event, oldest first
    pub async fn list_events(&self) -> Vec<DisasterEvent> {
        let mut events: Vec<DisasterEvent> = self.events.read().await.values().cloned().collect();
        events.sort_by_key(|e| e.detected_at);
        events
    }

    /// Declared event by id
    pub async fn get_event(&self, event_id: &str) -> Result<DisasterEvent> {
        self.events
            .read()
            .await
            .get(event_id)
            .cloned()
            .ok_or_else(|| SafeguardError::NotFound(format!("disaster event {}", event_id)))
    }

    async fn persist_event(&self, event: &DisasterEvent) -> Result<()> {
        let path = self.event_path(&event.id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(event)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        self.events
            .write()
            .await
            .insert(event.id.clone(), event.clone());
        Ok(())
    }

    fn event_path(&self, event_id: &str) -> PathBuf {
        self.config.events_dir.join(format!("{}.json", event_id))
    }
}

async fn load_events(dir: &std::path::Path) -> Result<Vec<DisasterEvent>> {
    let mut events = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let parsed = tokio::fs::read(&path)
            .await
            .map_err(SafeguardError::from)
            .and_then(|raw| serde_json::from_slice::<DisasterEvent>(&raw).map_err(Into::into));
        match parsed {
            Ok(event) => events.push(event),
            Err(e) => error!(path = %path.display(), error = %e, "Skipping unreadable disaster event"),
        }
    }
    Ok(events)
}
