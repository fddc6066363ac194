// Integrity Validator - runs rule sets against the graph store and applies fixes

use super::rules::RuleSet;
use super::types::{
    FixReport, IntegrityIssue, RuleOutcome, Severity, ValidationLevel, ValidationResult,
    ValidationRule,
};
use crate::config::IntegrityConfig;
use crate::context::OperationContext;
use crate::metrics::ProtectionMetrics;
use crate::store::{GraphStore, Row};
use crate::{Result, SafeguardError};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Runs validation rules against a graph store
pub struct IntegrityValidator {
    config: IntegrityConfig,
    store: Arc<dyn GraphStore>,
    rules: RuleSet,
}

impl IntegrityValidator {
    /// Build the rule set: built-ins (unless disabled), then `extra_rules`,
    /// then rule files from the configured directory. Earlier ids win.
    pub async fn initialize(
        config: IntegrityConfig,
        store: Arc<dyn GraphStore>,
        extra_rules: Vec<ValidationRule>,
    ) -> Result<Self> {
        let mut rules = if config.include_builtin_rules {
            RuleSet::builtin()
        } else {
            RuleSet::new()
        };
        rules.extend(extra_rules);

        if let Some(dir) = &config.rules_dir {
            let loaded = RuleSet::load_dir(dir)?;
            rules.extend(loaded.iter().cloned());
        }

        info!(rules = rules.len(), "Integrity validator initialized");
        Ok(Self {
            config,
            store,
            rules,
        })
    }

    /// Loaded rule set
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Run every rule selected by `level` (narrowed to `subset` when given).
    ///
    /// A rule that errors becomes a critical `rule_execution_error` issue and
    /// the run moves on to the next rule.
    #[instrument(skip(self, subset, ctx), fields(level = %level))]
    pub async fn validate(
        &self,
        level: ValidationLevel,
        subset: Option<&[String]>,
        ctx: &OperationContext,
    ) -> Result<ValidationResult> {
        let wanted: Option<HashSet<&str>> =
            subset.map(|ids| ids.iter().map(String::as_str).collect());
        if let Some(wanted) = &wanted {
            for id in wanted {
                if self.rules.get(id).is_none() {
                    warn!(rule_id = %id, "Requested integrity rule is not loaded");
                }
            }
        }

        let selected: Vec<&ValidationRule> = self
            .rules
            .iter()
            .filter(|r| level.includes(r))
            .filter(|r| wanted.as_ref().map_or(true, |w| w.contains(r.id.as_str())))
            .collect();

        let started_at = Utc::now();
        let mut outcomes = Vec::with_capacity(selected.len());
        let mut issues = Vec::new();
        let mut incomplete = false;

        for rule in selected {
            if let Err(e) = ctx.checkpoint() {
                warn!(rule_id = %rule.id, error = %e, "Validation stopped early");
                incomplete = true;
                break;
            }

            let started = Instant::now();
            let outcome = ctx
                .run(Some(self.config.rule_timeout()), self.run_rule(rule))
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(found) => {
                    let status = if found.is_empty() {
                        Severity::Passed
                    } else {
                        rule.severity
                    };
                    debug!(rule_id = %rule.id, issues = found.len(), "Rule evaluated");
                    outcomes.push(RuleOutcome {
                        rule_id: rule.id.clone(),
                        status,
                        issue_count: found.len(),
                        error: None,
                        duration_ms,
                    });
                    issues.extend(found);
                }
                Err(e) => {
                    error!(rule_id = %rule.id, error = %e, "Integrity rule failed to execute");
                    if matches!(e, SafeguardError::Cancelled) {
                        incomplete = true;
                    }
                    outcomes.push(RuleOutcome {
                        rule_id: rule.id.clone(),
                        status: Severity::Critical,
                        issue_count: 1,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                    issues.push(IntegrityIssue::rule_error(rule, &e));
                    if incomplete {
                        break;
                    }
                }
            }
        }

        let status = issues
            .iter()
            .map(|i| i.severity)
            .max()
            .unwrap_or(Severity::Passed);

        let mut recommendations: Vec<String> = Vec::new();
        for issue in &issues {
            let advice = issue.issue_type.recommendation().to_string();
            if !recommendations.contains(&advice) {
                recommendations.push(advice);
            }
        }

        for issue in &issues {
            ProtectionMetrics::record_issue(issue.issue_type.as_str(), issue.severity.as_str());
        }
        ProtectionMetrics::record_validation(level.as_str(), status.as_str());

        info!(
            level = %level,
            status = %status,
            rules = outcomes.len(),
            issues = issues.len(),
            "Integrity validation finished"
        );

        Ok(ValidationResult {
            id: Uuid::new_v4().to_string(),
            level,
            status,
            started_at,
            completed_at: Utc::now(),
            rule_outcomes: outcomes,
            issues,
            recommendations,
            incomplete,
        })
    }

    async fn run_rule(&self, rule: &ValidationRule) -> Result<Vec<IntegrityIssue>> {
        let rows = self.store.query(&rule.query).await?;
        Ok(rows
            .into_iter()
            .filter(|row| !affirms_validity(row))
            .map(|row| IntegrityIssue::from_row(rule, row))
            .collect())
    }

    /// Apply the fix of each issue's originating rule. Failures are recorded
    /// per issue and do not stop the batch.
    #[instrument(skip(self, result, ctx), fields(validation_id = %result.id))]
    pub async fn auto_fix(
        &self,
        result: &ValidationResult,
        ctx: &OperationContext,
    ) -> Result<FixReport> {
        let mut report = FixReport::default();

        for issue in &result.issues {
            let fix = match self.rules.get(&issue.rule_id).and_then(|r| r.fix.as_ref()) {
                Some(fix) => fix,
                None => {
                    report.skipped += 1;
                    continue;
                }
            };
            ctx.checkpoint()?;
            report.attempted += 1;

            let applied = match fix.command_for(issue) {
                Ok(command) => {
                    ctx.run(Some(self.config.rule_timeout()), async {
                        Ok(self.store.execute(&command).await?)
                    })
                    .await
                }
                Err(e) => Err(e),
            };

            match applied {
                Ok(_) => {
                    debug!(issue_id = %issue.id, rule_id = %issue.rule_id, "Issue fixed");
                    report.fixed += 1;
                }
                Err(e) => {
                    warn!(issue_id = %issue.id, rule_id = %issue.rule_id, error = %e, "Auto-fix failed");
                    report.failures.push((issue.id.clone(), e.to_string()));
                }
            }
        }

        info!(
            attempted = report.attempted,
            fixed = report.fixed,
            failed = report.failures.len(),
            "Auto-fix finished"
        );
        Ok(report)
    }
}

fn affirms_validity(row: &Row) -> bool {
    row.get("valid").and_then(Value::as_bool) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::types::IssueType;
    use crate::store::{EntityType, GraphQuery, MemoryGraphStore};
    use serde_json::{json, Map};

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_clean_store_passes() {
        let store = Arc::new(MemoryGraphStore::new("primary"));
        let validator = IntegrityValidator::initialize(IntegrityConfig::default(), store, vec![])
            .await
            .unwrap();

        let result = validator
            .validate(ValidationLevel::Compliance, None, &OperationContext::default())
            .await
            .unwrap();
        assert_eq!(result.status, Severity::Passed);
        assert!(result.issues.is_empty());
        assert!(result
            .rule_outcomes
            .iter()
            .all(|o| o.status == Severity::Passed));
    }

    #[tokio::test]
    async fn test_store_failure_becomes_critical_issue() {
        let store = Arc::new(MemoryGraphStore::new("primary"));
        store.set_available(false);
        let validator =
            IntegrityValidator::initialize(IntegrityConfig::default(), store.clone(), vec![])
                .await
                .unwrap();

        let result = validator
            .validate(ValidationLevel::Basic, None, &OperationContext::default())
            .await
            .unwrap();
        assert_eq!(result.status, Severity::Critical);
        assert_eq!(
            result.issues_of(IssueType::RuleExecutionError).count(),
            result.rule_outcomes.len()
        );
    }

    #[tokio::test]
    async fn test_index_rule_uses_valid_flag() {
        let store = Arc::new(MemoryGraphStore::new("primary"));
        let rule = ValidationRule {
            id: "case_number_indexed".into(),
            description: "Case numbers are indexed".into(),
            query: GraphQuery::IndexExists {
                label: EntityType::Case,
                property: "case_number".into(),
            },
            severity: Severity::Failed,
            issue_type: IssueType::MissingRequiredProperty,
            tags: vec![],
            fix: None,
            suggested_fix: None,
        };
        let validator = IntegrityValidator::initialize(
            IntegrityConfig::default().with_builtin_rules(false),
            store.clone(),
            vec![rule],
        )
        .await
        .unwrap();

        let before = validator
            .validate(ValidationLevel::Standard, None, &OperationContext::default())
            .await
            .unwrap();
        assert_eq!(before.status, Severity::Failed);

        store
            .execute(&crate::store::GraphCommand::CreateIndex {
                label: EntityType::Case,
                property: "case_number".into(),
            })
            .await
            .unwrap();
        let after = validator
            .validate(ValidationLevel::Standard, None, &OperationContext::default())
            .await
            .unwrap();
        assert_eq!(after.status, Severity::Passed);
    }

    #[tokio::test]
    async fn test_auto_fix_sets_missing_status() {
        let store = Arc::new(MemoryGraphStore::new("primary"));
        store
            .create_node(&["Case".into()], props(json!({"case_number": "C-1"})))
            .await
            .unwrap();
        let validator =
            IntegrityValidator::initialize(IntegrityConfig::default(), store.clone(), vec![])
                .await
                .unwrap();

        let subset = vec!["case_missing_status".to_string()];
        let ctx = OperationContext::default();
        let found = validator
            .validate(ValidationLevel::Standard, Some(&subset), &ctx)
            .await
            .unwrap();
        assert_eq!(found.issues.len(), 1);

        let report = validator.auto_fix(&found, &ctx).await.unwrap();
        assert_eq!(report.fixed, 1);

        let again = validator
            .validate(ValidationLevel::Standard, Some(&subset), &ctx)
            .await
            .unwrap();
        assert_eq!(again.status, Severity::Passed);
    }
}
