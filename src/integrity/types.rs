//! Integrity rules, issues and validation results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::store::{validate_identifier, EntityType, GraphCommand, GraphQuery, Row};
use crate::{Result, SafeguardError};

/// Rule severity, also used as the overall validation status.
///
/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// No violations
    Passed,
    /// Worth reviewing, not blocking
    Warning,
    /// Data is wrong and should be fixed
    Failed,
    /// Structural damage
    Critical,
}

impl Severity {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Passed => "passed",
            Severity::Warning => "warning",
            Severity::Failed => "failed",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the rule set a validation run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// Critical rules only
    Basic,
    /// Critical and failed rules
    Standard,
    /// Everything except compliance rules
    Comprehensive,
    /// Every rule
    Compliance,
}

impl ValidationLevel {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Basic => "basic",
            ValidationLevel::Standard => "standard",
            ValidationLevel::Comprehensive => "comprehensive",
            ValidationLevel::Compliance => "compliance",
        }
    }

    /// Whether `rule` runs at this level
    pub fn includes(&self, rule: &ValidationRule) -> bool {
        match self {
            ValidationLevel::Basic => rule.severity == Severity::Critical,
            ValidationLevel::Standard => rule.severity >= Severity::Failed,
            ValidationLevel::Comprehensive => !rule.is_compliance(),
            ValidationLevel::Compliance => true,
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of an integrity finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Node missing its required links
    OrphanedNode,
    /// Relationship with a missing endpoint
    DanglingRelationship,
    /// Required property absent or null
    MissingRequiredProperty,
    /// Property outside its allowed domain
    InvalidPropertyValue,
    /// Two records sharing a unique key
    DuplicateEntity,
    /// Dates out of order
    TemporalInconsistency,
    /// Retention or privilege finding
    ComplianceViolation,
    /// The rule itself failed to run
    RuleExecutionError,
}

impl IssueType {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::OrphanedNode => "orphaned_node",
            IssueType::DanglingRelationship => "dangling_relationship",
            IssueType::MissingRequiredProperty => "missing_required_property",
            IssueType::InvalidPropertyValue => "invalid_property_value",
            IssueType::DuplicateEntity => "duplicate_entity",
            IssueType::TemporalInconsistency => "temporal_inconsistency",
            IssueType::ComplianceViolation => "compliance_violation",
            IssueType::RuleExecutionError => "rule_execution_error",
        }
    }

    /// Operator-facing advice attached to results containing this issue type
    pub fn recommendation(&self) -> &'static str {
        match self {
            IssueType::OrphanedNode => {
                "Link orphaned records to their owning case or archive them"
            }
            IssueType::DanglingRelationship => {
                "Remove relationships whose endpoints no longer exist"
            }
            IssueType::MissingRequiredProperty => {
                "Backfill required properties before the next release"
            }
            IssueType::InvalidPropertyValue => "Correct values outside the allowed domain",
            IssueType::DuplicateEntity => "Merge or renumber duplicated records",
            IssueType::TemporalInconsistency => "Review records whose dates are out of order",
            IssueType::ComplianceViolation => {
                "Escalate compliance findings to the records officer"
            }
            IssueType::RuleExecutionError => {
                "Investigate failing integrity rules; results for them are incomplete"
            }
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Corrective write bound to the subject of a single issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FixAction {
    /// Write `value` into `property`
    SetProperty { property: String, value: Value },
    /// Drop `property`
    RemoveProperty { property: String },
    /// Delete the offending node
    DeleteNode,
    /// Delete the offending relationship
    DeleteRelationship,
}

impl FixAction {
    /// Reject unsafe property names
    pub fn validate(&self) -> Result<()> {
        match self {
            FixAction::SetProperty { property, .. } | FixAction::RemoveProperty { property } => {
                validate_identifier(property)?;
                Ok(())
            }
            FixAction::DeleteNode | FixAction::DeleteRelationship => Ok(()),
        }
    }

    /// Build the store command for `issue`. Only the issue's captured
    /// `node_id` or `relationship_id` is used as input.
    pub fn command_for(&self, issue: &IntegrityIssue) -> Result<GraphCommand> {
        let node_id = || {
            issue.node_id.clone().ok_or_else(|| {
                SafeguardError::InvalidState(format!("issue {} has no node id", issue.id))
            })
        };

        Ok(match self {
            FixAction::SetProperty { property, value } => GraphCommand::SetNodeProperty {
                node_id: node_id()?,
                property: property.clone(),
                value: value.clone(),
            },
            FixAction::RemoveProperty { property } => GraphCommand::RemoveNodeProperty {
                node_id: node_id()?,
                property: property.clone(),
            },
            FixAction::DeleteNode => GraphCommand::DeleteNode {
                node_id: node_id()?,
            },
            FixAction::DeleteRelationship => GraphCommand::DeleteRelationship {
                relationship_id: issue.relationship_id.clone().ok_or_else(|| {
                    SafeguardError::InvalidState(format!(
                        "issue {} has no relationship id",
                        issue.id
                    ))
                })?,
            },
        })
    }
}

/// Tag marking a rule as compliance-only
pub const COMPLIANCE_TAG: &str = "compliance";

/// A declarative check. The query returns one row per violation and no rows
/// when the invariant holds. Rows carrying `valid: true` are not violations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Unique rule id
    pub id: String,
    /// Human-readable summary
    pub description: String,
    /// Violation query
    pub query: GraphQuery,
    /// Severity of each violation
    pub severity: Severity,
    /// Category of each violation
    pub issue_type: IssueType,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Automatic fix, if the rule has one
    #[serde(default)]
    pub fix: Option<FixAction>,
    /// Advice copied onto each issue
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

impl ValidationRule {
    /// Issue type or tag marks it compliance-only
    pub fn is_compliance(&self) -> bool {
        self.issue_type == IssueType::ComplianceViolation
            || self.tags.iter().any(|t| t == COMPLIANCE_TAG)
    }

    /// Entity type the rule is scoped to, if any
    pub fn scope(&self) -> Option<EntityType> {
        self.query.scope()
    }

    /// Reject rules that cannot run meaningfully
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SafeguardError::Configuration("Rule id is empty".into()));
        }
        if self.severity == Severity::Passed {
            return Err(SafeguardError::Configuration(format!(
                "Rule {} cannot have severity passed",
                self.id
            )));
        }
        if matches!(self.query, GraphQuery::CountNodes { .. }) {
            return Err(SafeguardError::Configuration(format!(
                "Rule {} uses a query that never returns an empty result",
                self.id
            )));
        }
        self.query.validate()?;
        if let Some(fix) = &self.fix {
            fix.validate()?;
        }
        Ok(())
    }
}

/// One violation found by a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    /// Issue id
    pub id: String,
    /// Rule that produced it
    pub rule_id: String,
    /// Category
    pub issue_type: IssueType,
    /// Severity, copied from the rule
    pub severity: Severity,
    /// Offending node, if any
    pub node_id: Option<String>,
    /// Offending relationship, if any
    pub relationship_id: Option<String>,
    /// Summary naming the subject
    pub description: String,
    /// Raw violation row
    pub details: Row,
    /// Detection time
    pub detected_at: DateTime<Utc>,
    /// Advice from the rule
    pub suggested_fix: Option<String>,
}

impl IntegrityIssue {
    /// One issue per offending row
    pub fn from_row(rule: &ValidationRule, row: Row) -> Self {
        let node_id = row.get("node_id").and_then(Value::as_str).map(String::from);
        let relationship_id = row
            .get("relationship_id")
            .and_then(Value::as_str)
            .map(String::from);
        let subject = node_id
            .as_deref()
            .or(relationship_id.as_deref())
            .unwrap_or("-");

        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            issue_type: rule.issue_type,
            severity: rule.severity,
            description: format!("{} ({})", rule.description, subject),
            node_id,
            relationship_id,
            details: row,
            detected_at: Utc::now(),
            suggested_fix: rule.suggested_fix.clone(),
        }
    }

    /// Synthetic critical issue for a rule that could not be executed
    pub fn rule_error(rule: &ValidationRule, error: &SafeguardError) -> Self {
        let mut details = Row::new();
        details.insert("error".to_string(), Value::String(error.to_string()));

        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            issue_type: IssueType::RuleExecutionError,
            severity: Severity::Critical,
            node_id: None,
            relationship_id: None,
            description: format!("Rule {} failed to execute: {}", rule.id, error),
            details,
            detected_at: Utc::now(),
            suggested_fix: None,
        }
    }
}

/// Result of one rule within a validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    /// Rule id
    pub rule_id: String,
    /// Worst severity seen, `Passed` when clean
    pub status: Severity,
    /// Violations found
    pub issue_count: usize,
    /// Execution error, if the rule failed
    pub error: Option<String>,
    /// Rule runtime
    pub duration_ms: u64,
}

/// Outcome of one validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Run id
    pub id: String,
    /// Level the run used
    pub level: ValidationLevel,
    /// Worst severity across all issues
    pub status: Severity,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub completed_at: DateTime<Utc>,
    /// Per-rule results
    pub rule_outcomes: Vec<RuleOutcome>,
    /// Every issue found
    pub issues: Vec<IntegrityIssue>,
    /// Advice per issue type present
    pub recommendations: Vec<String>,
    /// Set when the run was cancelled or hit its deadline before every
    /// selected rule ran
    pub incomplete: bool,
}

impl ValidationResult {
    /// Issues of one type
    pub fn issues_of(&self, issue_type: IssueType) -> impl Iterator<Item = &IntegrityIssue> {
        self.issues.iter().filter(move |i| i.issue_type == issue_type)
    }

    /// Outcome for one rule
    pub fn outcome(&self, rule_id: &str) -> Option<&RuleOutcome> {
        self.rule_outcomes.iter().find(|o| o.rule_id == rule_id)
    }
}

/// Summary of an auto-fix pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixReport {
    /// Issues considered
    pub attempted: usize,
    /// Fixes applied
    pub fixed: usize,
    /// Issues whose rule declares no fix
    pub skipped: usize,
    /// (issue id, error)
    pub failures: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(severity: Severity, issue_type: IssueType, tags: &[&str]) -> ValidationRule {
        ValidationRule {
            id: "r".into(),
            description: "rule".into(),
            query: GraphQuery::OrphanNodes {
                label: EntityType::Document,
            },
            severity,
            issue_type,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            fix: None,
            suggested_fix: None,
        }
    }

    #[test]
    fn test_levels_select_by_severity() {
        let critical = rule(Severity::Critical, IssueType::DanglingRelationship, &[]);
        let failed = rule(Severity::Failed, IssueType::MissingRequiredProperty, &[]);
        let warning = rule(Severity::Warning, IssueType::OrphanedNode, &[]);
        let compliance = rule(Severity::Critical, IssueType::ComplianceViolation, &[]);
        let tagged = rule(Severity::Warning, IssueType::MissingRequiredProperty, &["compliance"]);

        assert!(ValidationLevel::Basic.includes(&critical));
        assert!(!ValidationLevel::Basic.includes(&failed));
        assert!(ValidationLevel::Standard.includes(&failed));
        assert!(!ValidationLevel::Standard.includes(&warning));
        assert!(ValidationLevel::Comprehensive.includes(&warning));
        assert!(!ValidationLevel::Comprehensive.includes(&compliance));
        assert!(!ValidationLevel::Comprehensive.includes(&tagged));
        assert!(ValidationLevel::Compliance.includes(&tagged));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Failed);
        assert!(Severity::Failed > Severity::Warning);
        assert!(Severity::Warning > Severity::Passed);
    }

    #[test]
    fn test_fix_bound_to_issue_subject() {
        let mut r = rule(Severity::Warning, IssueType::OrphanedNode, &[]);
        r.fix = Some(FixAction::DeleteNode);
        let row = json!({"node_id": "n-7"}).as_object().cloned().unwrap();
        let issue = IntegrityIssue::from_row(&r, row);

        assert_eq!(
            r.fix.as_ref().unwrap().command_for(&issue).unwrap(),
            GraphCommand::DeleteNode {
                node_id: "n-7".into()
            }
        );
        assert!(FixAction::DeleteRelationship.command_for(&issue).is_err());
    }

    #[test]
    fn test_rule_from_yaml() {
        let yaml = r#"
id: client_missing_email
description: Client without email
severity: warning
issue_type: missing_required_property
query:
  kind: nodes_missing_property
  label: Client
  property: email
fix:
  action: set_property
  property: email
  value: unknown@example.invalid
"#;
        let parsed: ValidationRule = serde_yaml::from_str(yaml).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.scope(), Some(EntityType::Client));
    }
}
