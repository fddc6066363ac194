// Integration tests for integrity rules, validation levels and auto-fix

mod common;

use common::{props, seeded_store};
use safeguard::config::IntegrityConfig;
use safeguard::context::OperationContext;
use safeguard::integrity::{IntegrityValidator, IssueType, Severity, ValidationLevel};
use safeguard::store::{
    EntityType, GraphCommand, GraphStore, MemoryGraphStore, RelationshipRecord,
};
use serde_json::{json, Map};
use std::sync::Arc;

/// Seeded store plus a dangling relationship, a duplicated case number, a
/// case without status, an unattached unclassified document and a case
/// closed before it opened
async fn damaged_store() -> Arc<MemoryGraphStore> {
    let store = seeded_store("primary").await;
    let (nodes, _) = store.snapshot();
    let case_id = nodes
        .iter()
        .find(|n| n.is_a(EntityType::Case))
        .map(|n| n.id.clone())
        .expect("case");

    store.insert_relationship_unchecked(RelationshipRecord {
        id: "rel-dangling".into(),
        rel_type: "HAS_DOCUMENT".into(),
        start_id: case_id,
        end_id: "deleted-document".into(),
        properties: Map::new(),
        modified_at: None,
    });
    store
        .create_node(
            &["Case".into()],
            props(json!({"case_number": "C-1001", "status": "open"})),
        )
        .await
        .unwrap();
    store
        .create_node(&["Case".into()], props(json!({"case_number": "C-2000"})))
        .await
        .unwrap();
    store
        .create_node(&["Document".into()], props(json!({"title": "Loose scan"})))
        .await
        .unwrap();
    store
        .create_node(
            &["Case".into()],
            props(json!({
                "case_number": "C-2001",
                "status": "closed",
                "opened_at": "2025-03-01T00:00:00Z",
                "closed_at": "2025-02-01T00:00:00Z"
            })),
        )
        .await
        .unwrap();
    store
}

async fn validator(store: Arc<MemoryGraphStore>) -> IntegrityValidator {
    IntegrityValidator::initialize(IntegrityConfig::default(), store, vec![])
        .await
        .expect("validator")
}

#[tokio::test]
async fn test_seeded_store_passes_every_level() {
    let validator = validator(seeded_store("primary").await).await;
    let ctx = OperationContext::default();

    for level in [
        ValidationLevel::Basic,
        ValidationLevel::Standard,
        ValidationLevel::Comprehensive,
        ValidationLevel::Compliance,
    ] {
        let result = validator.validate(level, None, &ctx).await.expect("validate");
        assert_eq!(result.status, Severity::Passed, "level {}", level);
        assert!(result.issues.is_empty());
        assert!(result.recommendations.is_empty());
        assert!(!result.incomplete);
    }

    let all = validator
        .validate(ValidationLevel::Compliance, None, &ctx)
        .await
        .unwrap();
    assert_eq!(all.rule_outcomes.len(), validator.rules().len());
}

#[tokio::test]
async fn test_levels_select_progressively_more_rules() {
    let validator = validator(damaged_store().await).await;
    let ctx = OperationContext::default();

    let basic = validator
        .validate(ValidationLevel::Basic, None, &ctx)
        .await
        .unwrap();
    assert_eq!(basic.status, Severity::Critical);
    assert_eq!(basic.issues_of(IssueType::DanglingRelationship).count(), 1);
    assert_eq!(basic.issues_of(IssueType::DuplicateEntity).count(), 2);
    assert_eq!(basic.issues_of(IssueType::OrphanedNode).count(), 0);
    assert!(basic.outcome("orphan_documents").is_none());

    let standard = validator
        .validate(ValidationLevel::Standard, None, &ctx)
        .await
        .unwrap();
    assert_eq!(
        standard.outcome("case_missing_status").map(|o| o.status),
        Some(Severity::Failed)
    );
    assert!(standard.outcome("orphan_documents").is_none());

    let comprehensive = validator
        .validate(ValidationLevel::Comprehensive, None, &ctx)
        .await
        .unwrap();
    assert_eq!(comprehensive.issues_of(IssueType::OrphanedNode).count(), 1);
    assert_eq!(comprehensive.issues_of(IssueType::TemporalInconsistency).count(), 1);
    assert_eq!(comprehensive.issues_of(IssueType::ComplianceViolation).count(), 0);

    let compliance = validator
        .validate(ValidationLevel::Compliance, None, &ctx)
        .await
        .unwrap();
    let violation = compliance
        .issues_of(IssueType::ComplianceViolation)
        .next()
        .expect("classification finding");
    assert_eq!(violation.rule_id, "document_missing_classification");
    assert!(violation.node_id.is_some());
    assert!(compliance
        .recommendations
        .iter()
        .any(|r| r == IssueType::ComplianceViolation.recommendation()));
}

#[tokio::test]
async fn test_rule_subset_narrows_run() {
    let validator = validator(damaged_store().await).await;
    let subset = vec!["orphan_documents".to_string(), "not_a_rule".to_string()];

    let result = validator
        .validate(ValidationLevel::Compliance, Some(&subset), &OperationContext::default())
        .await
        .unwrap();
    assert_eq!(result.rule_outcomes.len(), 1);
    assert_eq!(result.status, Severity::Warning);
    assert_eq!(result.issues.len(), 1);
}

#[tokio::test]
async fn test_auto_fix_applies_rule_fixes_and_skips_the_rest() {
    let store = damaged_store().await;
    let validator = validator(store.clone()).await;
    let ctx = OperationContext::default();

    let before = validator
        .validate(ValidationLevel::Standard, None, &ctx)
        .await
        .unwrap();
    let report = validator.auto_fix(&before, &ctx).await.expect("auto fix");

    // Dangling relationship deleted and missing status backfilled
    assert_eq!(report.attempted, 2);
    assert_eq!(report.fixed, 2);
    assert!(report.failures.is_empty());
    assert_eq!(report.skipped, before.issues.len() - 2);

    let after = validator
        .validate(ValidationLevel::Standard, None, &ctx)
        .await
        .unwrap();
    assert_eq!(after.issues_of(IssueType::DanglingRelationship).count(), 0);
    assert_eq!(after.outcome("case_missing_status").map(|o| o.status), Some(Severity::Passed));
    assert_eq!(after.issues_of(IssueType::DuplicateEntity).count(), 2);
    assert_eq!(after.status, Severity::Critical);

    let fixed = store
        .snapshot()
        .0
        .into_iter()
        .find(|n| n.properties.get("case_number") == Some(&json!("C-2000")))
        .expect("fixed case");
    assert_eq!(fixed.properties.get("status"), Some(&json!("open")));
}

#[tokio::test]
async fn test_auto_fix_records_per_issue_failures() {
    let store = damaged_store().await;
    let validator = validator(store.clone()).await;
    let ctx = OperationContext::default();

    let result = validator
        .validate(ValidationLevel::Basic, None, &ctx)
        .await
        .unwrap();

    // Someone else removed the relationship between validation and fix
    store
        .execute(&GraphCommand::DeleteRelationship {
            relationship_id: "rel-dangling".into(),
        })
        .await
        .unwrap();

    let report = validator.auto_fix(&result, &ctx).await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.fixed, 0);
    assert_eq!(report.failures.len(), 1);
}

#[tokio::test]
async fn test_unavailable_store_reports_rule_errors() {
    let store = seeded_store("primary").await;
    store.set_available(false);
    let validator = validator(store).await;

    let result = validator
        .validate(ValidationLevel::Standard, None, &OperationContext::default())
        .await
        .unwrap();
    assert_eq!(result.status, Severity::Critical);
    assert!(result
        .rule_outcomes
        .iter()
        .all(|o| o.error.is_some() && o.status == Severity::Critical));
    assert!(!result.incomplete);
}

#[tokio::test]
async fn test_cancelled_run_is_marked_incomplete() {
    let validator = validator(seeded_store("primary").await).await;
    let ctx = OperationContext::default();
    ctx.cancel();

    let result = validator
        .validate(ValidationLevel::Compliance, None, &ctx)
        .await
        .unwrap();
    assert!(result.incomplete);
    assert!(result.rule_outcomes.is_empty());
}

#[tokio::test]
async fn test_rules_loaded_from_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("case_number_index.yaml"),
        r#"
id: case_number_index
description: Case numbers must be indexed
severity: warning
issue_type: invalid_property_value
query:
  kind: index_exists
  label: Case
  property: case_number
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("secrets.json"),
        r#"{"id": "bad", "description": "x", "severity": "warning", "issue_type": "orphaned_node",
            "query": {"kind": "orphan_nodes", "label": "Secrets"}}"#,
    )
    .unwrap();

    let store = seeded_store("primary").await;
    let config = IntegrityConfig::default()
        .with_builtin_rules(false)
        .with_rules_dir(dir.path());
    let validator = IntegrityValidator::initialize(config, store.clone(), vec![])
        .await
        .expect("validator");
    assert_eq!(validator.rules().len(), 1);

    let ctx = OperationContext::default();
    let missing = validator
        .validate(ValidationLevel::Comprehensive, None, &ctx)
        .await
        .unwrap();
    assert_eq!(missing.status, Severity::Warning);

    store
        .execute(&GraphCommand::CreateIndex {
            label: EntityType::Case,
            property: "case_number".into(),
        })
        .await
        .unwrap();
    let present = validator
        .validate(ValidationLevel::Comprehensive, None, &ctx)
        .await
        .unwrap();
    assert_eq!(present.status, Severity::Passed);
}
