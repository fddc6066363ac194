// Integration tests for disaster declaration, plan execution, health and readiness

mod common;

use common::{label_count, seeded_store};
use safeguard::backup::{BackupKind, BackupManager, BackupStatus};
use safeguard::config::{BackupConfig, IntegrityConfig, RecoveryConfig, SafeguardConfig};
use safeguard::context::OperationContext;
use safeguard::integrity::{IntegrityValidator, ValidationLevel};
use safeguard::migration::SchemaVersion;
use safeguard::recovery::{
    Component, DisasterRecoveryManager, DisasterType, FixedDiskSpace, HealthStatus,
    ImpactSeverity, Readiness, RecordingNotificationSink, RecoveryPlan, RecoveryStep, StepAction,
    ValidationTest,
};
use safeguard::store::{ClearScope, EntityType, GraphStore, MemoryGraphStore, RelationshipRecord};
use safeguard::suite::{ProtectionSuite, SuiteDefinitions};
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn step(id: &str, action: StepAction) -> RecoveryStep {
    RecoveryStep {
        id: id.into(),
        description: String::new(),
        action,
        timeout_secs: Some(30),
    }
}

fn plan(id: &str, types: &[DisasterType], steps: Vec<RecoveryStep>) -> RecoveryPlan {
    RecoveryPlan {
        id: id.into(),
        name: id.replace('_', " "),
        disaster_types: types.to_vec(),
        priority: 1,
        rto_minutes: 60,
        rpo_minutes: 15,
        steps,
        dependencies: vec![],
        validation_tests: vec![ValidationTest::Connectivity],
    }
}

async fn plain_backups(dir: &std::path::Path, store: Arc<MemoryGraphStore>) -> BackupManager {
    BackupManager::initialize(
        BackupConfig::new(dir.join("backups")).with_encryption(false),
        store,
        None,
    )
    .await
    .expect("backups")
}

#[tokio::test]
async fn test_disaster_without_plan_is_recorded_but_not_recovered() {
    let dir = tempfile::tempdir().expect("tempdir");
    let events_dir = dir.path().join("events");
    let sink = Arc::new(RecordingNotificationSink::new());
    let manager = DisasterRecoveryManager::initialize(
        RecoveryConfig::new(&events_dir),
        seeded_store("primary").await,
        vec![],
        None,
        None,
        vec![],
    )
    .await
    .expect("manager")
    .with_notification_sink(sink.clone());

    let event = manager
        .declare_disaster(
            DisasterType::DataCorruption,
            "Checksum mismatch on case table",
            vec!["database".into()],
            &OperationContext::default(),
        )
        .await
        .expect("declare");

    assert!(!event.recovery_initiated);
    assert!(!event.recovery_completed);
    assert!(event.plan_results.is_empty());
    assert_eq!(event.impact.severity, ImpactSeverity::Critical);
    assert_eq!(event.impact.estimated_downtime_minutes, 480);

    assert!(events_dir.join(format!("{}.json", event.id)).exists());
    assert_eq!(manager.get_event(&event.id).await.expect("event"), event);

    let sent = sink.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event_id, event.id);
    assert_eq!(sent[0].severity, ImpactSeverity::Critical);
}

#[tokio::test]
async fn test_restore_plan_recovers_corrupted_primary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let primary = seeded_store("primary").await;
    let backups = plain_backups(dir.path(), primary.clone()).await;
    let backup = backups
        .run_backup(BackupKind::Full, vec![], OperationContext::default())
        .await
        .expect("backup");
    assert_eq!(backup.status, BackupStatus::Completed);

    let mut restore = plan(
        "restore_primary",
        &[DisasterType::DataCorruption, DisasterType::HumanError],
        vec![
            step("restore", StepAction::RestoreFromBackup { backup_id: None }),
            step(
                "tell_partners",
                StepAction::NotifyStakeholders {
                    message: "Case data restored from last backup".into(),
                },
            ),
        ],
    );
    restore.validation_tests.push(ValidationTest::DataPresence {
        label: Some(EntityType::Case),
        min_count: 3,
    });

    let sink = Arc::new(RecordingNotificationSink::new());
    let manager = DisasterRecoveryManager::initialize(
        RecoveryConfig::new(dir.path().join("events")),
        primary.clone(),
        vec![],
        Some(backups),
        None,
        vec![restore],
    )
    .await
    .expect("manager")
    .with_notification_sink(sink.clone());

    // Someone ran a bulk delete against production
    primary.clear(&ClearScope::All).await.expect("wipe");
    assert_eq!(label_count(&primary, EntityType::Case), 0);

    let event = manager
        .declare_disaster(
            DisasterType::HumanError,
            "Bulk delete ran against production",
            vec!["database".into()],
            &OperationContext::default(),
        )
        .await
        .expect("declare");

    assert!(event.recovery_initiated);
    assert!(event.recovery_completed, "{:?}", event.plan_results);
    assert_eq!(event.plan_results.len(), 1);
    assert_eq!(
        event.plan_results[0].executed_steps,
        vec!["restore".to_string(), "tell_partners".to_string()]
    );
    assert_eq!(label_count(&primary, EntityType::Case), 3);
    assert_eq!(label_count(&primary, EntityType::Document), 3);

    // Declaration, the plan's own notice and the summary
    let messages: Vec<String> = sink.sent().await.into_iter().map(|n| n.message).collect();
    assert_eq!(messages.len(), 3);
    assert!(messages[1].contains("restored"));
    assert!(messages[2].starts_with("Recovery completed"));
}

#[tokio::test]
async fn test_failed_validation_marks_recovery_incomplete() {
    let dir = tempfile::tempdir().expect("tempdir");
    let primary = Arc::new(MemoryGraphStore::new("primary"));
    let mut check = plan(
        "check_evidence",
        &[DisasterType::CyberAttack],
        vec![step(
            "isolate",
            StepAction::Manual {
                instructions: "Pull the evidence server off the network".into(),
            },
        )],
    );
    check.validation_tests = vec![ValidationTest::DataPresence {
        label: Some(EntityType::Evidence),
        min_count: 1,
    }];

    let manager = DisasterRecoveryManager::initialize(
        RecoveryConfig::new(dir.path().join("events")),
        primary,
        vec![],
        None,
        None,
        vec![check],
    )
    .await
    .expect("manager");

    let event = manager
        .declare_disaster(
            DisasterType::CyberAttack,
            "Ransomware note found",
            vec![],
            &OperationContext::default(),
        )
        .await
        .expect("declare");

    assert!(event.recovery_initiated);
    assert!(!event.recovery_completed);
    let result = &event.plan_results[0];
    assert_eq!(result.executed_steps, vec!["isolate".to_string()]);
    assert!(result.failed_step.is_none());
    assert_eq!(result.validation_failures.len(), 1);
}

#[tokio::test]
async fn test_failover_plan_switches_active_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let primary = seeded_store("primary").await;
    let standby = seeded_store("dr-site").await;
    let mut failover = plan(
        "failover_to_dr",
        &[DisasterType::HardwareFailure, DisasterType::PowerOutage],
        vec![step("failover", StepAction::FailoverToSecondary)],
    );
    failover.validation_tests.push(ValidationTest::DataPresence {
        label: Some(EntityType::Client),
        min_count: 2,
    });

    let manager = DisasterRecoveryManager::initialize(
        RecoveryConfig::new(dir.path().join("events")),
        primary.clone(),
        vec![standby as Arc<dyn GraphStore>],
        None,
        None,
        vec![failover],
    )
    .await
    .expect("manager");

    primary.set_available(false);
    let event = manager
        .declare_disaster(
            DisasterType::PowerOutage,
            "Primary data centre lost power",
            vec!["database".into(), "network".into()],
            &OperationContext::default(),
        )
        .await
        .expect("declare");

    assert!(event.recovery_completed, "{:?}", event.plan_results);
    assert_eq!(manager.active_store().await.name(), "dr-site");

    // The database check now follows the active site
    let health = manager.check_health(&OperationContext::default()).await;
    assert_eq!(
        health.component(Component::Database).map(|c| c.status),
        Some(HealthStatus::Healthy)
    );
}

#[tokio::test]
async fn test_health_check_classifies_components() {
    let dir = tempfile::tempdir().expect("tempdir");
    let primary = seeded_store("primary").await;
    primary.insert_relationship_unchecked(RelationshipRecord {
        id: "rel-orphaned".into(),
        rel_type: "HAS_TASK".into(),
        start_id: "missing-case".into(),
        end_id: "missing-task".into(),
        properties: Map::new(),
        modified_at: None,
    });
    let integrity = Arc::new(
        IntegrityValidator::initialize(IntegrityConfig::default(), primary.clone(), vec![])
            .await
            .expect("validator"),
    );
    let down = Arc::new(MemoryGraphStore::new("site-a"));
    down.set_available(false);
    let up = Arc::new(MemoryGraphStore::new("site-b"));

    let manager = DisasterRecoveryManager::initialize(
        RecoveryConfig::new(dir.path().join("events")),
        primary,
        vec![down as Arc<dyn GraphStore>, up],
        None,
        Some(integrity),
        vec![],
    )
    .await
    .expect("manager")
    .with_disk_space(Arc::new(FixedDiskSpace(0.10)));

    let report = manager.check_health(&OperationContext::default()).await;
    let status = |component| report.component(component).map(|c| c.status);

    assert_eq!(status(Component::Database), Some(HealthStatus::Critical));
    assert_eq!(status(Component::Backup), Some(HealthStatus::Critical));
    // Half the sites reachable sits exactly on the degraded threshold
    assert_eq!(status(Component::Network), Some(HealthStatus::Healthy));
    assert_eq!(status(Component::Storage), Some(HealthStatus::Degraded));
    assert_eq!(report.overall, HealthStatus::Critical);
}

#[tokio::test]
async fn test_readiness_report_flags_gaps_and_missing_backups() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = DisasterRecoveryManager::initialize(
        RecoveryConfig::new(dir.path().join("events")),
        seeded_store("primary").await,
        vec![Arc::new(MemoryGraphStore::new("dr-site")) as Arc<dyn GraphStore>],
        None,
        None,
        vec![plan(
            "page_dba",
            &[DisasterType::HardwareFailure],
            vec![step(
                "page",
                StepAction::Manual {
                    instructions: "Page the on-call DBA".into(),
                },
            )],
        )],
    )
    .await
    .expect("manager")
    .with_disk_space(Arc::new(FixedDiskSpace(0.5)));

    let report = manager
        .generate_readiness_report(&OperationContext::default())
        .await;

    assert_eq!(report.verdict, Readiness::NotReady);
    assert_eq!(report.plan_count, 1);
    assert_eq!(report.coverage_gaps.len(), DisasterType::ALL.len() - 1);
    assert!(!report.coverage_gaps.contains(&DisasterType::HardwareFailure));
    assert!(report.last_backup_at.is_none());
    assert!(report.findings.iter().any(|f| f.starts_with("backup is critical")));
    assert_eq!(
        serde_json::to_value(report.verdict).unwrap(),
        serde_json::json!("NOT_READY")
    );
}

#[tokio::test]
async fn test_readiness_report_ready_with_full_coverage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let primary = seeded_store("primary").await;
    let backups = plain_backups(dir.path(), primary.clone()).await;
    backups
        .run_backup(BackupKind::Full, vec![], OperationContext::default())
        .await
        .expect("backup");

    let manager = DisasterRecoveryManager::initialize(
        RecoveryConfig::new(dir.path().join("events")),
        primary,
        vec![seeded_store("dr-site").await as Arc<dyn GraphStore>],
        Some(backups),
        None,
        vec![plan(
            "catch_all",
            &DisasterType::ALL,
            vec![step("failover", StepAction::FailoverToSecondary)],
        )],
    )
    .await
    .expect("manager")
    .with_disk_space(Arc::new(FixedDiskSpace(0.8)));

    let report = manager
        .generate_readiness_report(&OperationContext::default())
        .await;
    assert_eq!(report.verdict, Readiness::Ready, "{:?}", report.findings);
    assert!(report.coverage_gaps.is_empty());
    assert!(report.last_backup_at.is_some());
    assert_eq!(report.health.overall, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_health_monitor_stops_on_cancel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = Arc::new(
        DisasterRecoveryManager::initialize(
            RecoveryConfig::new(dir.path().join("events")),
            Arc::new(MemoryGraphStore::new("primary")),
            vec![],
            None,
            None,
            vec![],
        )
        .await
        .expect("manager")
        .with_disk_space(Arc::new(FixedDiskSpace(0.5))),
    );

    let token = CancellationToken::new();
    let handle = manager.clone().spawn_health_monitor(token.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor stopped")
        .expect("monitor task");
}

#[tokio::test]
async fn test_protection_suite_wires_components() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = SafeguardConfig::with_root(dir.path());
    config.encryption.master_secret = Some("suite-secret".into());

    let store = seeded_store("primary").await;
    let definitions = SuiteDefinitions {
        plans: vec![plan(
            "failover_to_dr",
            &[DisasterType::NetworkOutage],
            vec![step("failover", StepAction::FailoverToSecondary)],
        )],
        ..SuiteDefinitions::default()
    };
    let suite = ProtectionSuite::initialize(
        config,
        store.clone(),
        vec![seeded_store("dr-site").await as Arc<dyn GraphStore>],
        definitions,
    )
    .await
    .expect("suite");

    let backup = suite
        .backups
        .run_backup(BackupKind::Full, vec![], OperationContext::default())
        .await
        .expect("backup");
    assert_eq!(backup.status, BackupStatus::Completed);
    assert!(backup.encrypted);
    assert_eq!(suite.encryption.list_keys().await.len(), 1);

    let validation = suite
        .integrity
        .validate(ValidationLevel::Compliance, None, &OperationContext::default())
        .await
        .expect("validate");
    assert!(validation.issues.is_empty());

    let event = suite
        .recovery
        .declare_disaster(
            DisasterType::NetworkOutage,
            "Core switch failure",
            vec![],
            &OperationContext::default(),
        )
        .await
        .expect("declare");
    assert!(event.recovery_completed);

    // Every component writes to the one shared audit trail
    let audit = suite.audit.get_events().await;
    assert!(audit.iter().any(|e| e.event_type == "key_generated"));
    assert!(audit.iter().any(|e| e.event_type == "disaster_declared"));
    assert_eq!(
        suite.migrations.current_version().await,
        SchemaVersion::new(&[0, 0, 0])
    );
}
