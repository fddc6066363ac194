// Rule Sets - built-in case-management rules plus user rule files

use super::types::{FixAction, IssueType, Severity, ValidationRule, COMPLIANCE_TAG};
use crate::config::load_definition_dir;
use crate::store::{EntityType, GraphQuery};
use crate::Result;
use serde_json::json;
use std::path::Path;
use tracing::{error, warn};

/// Immutable collection of validation rules, built once at startup
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ValidationRule>,
}

impl RuleSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept valid rules; invalid ones and duplicate ids are logged and dropped
    pub fn from_rules(rules: impl IntoIterator<Item = ValidationRule>) -> Self {
        let mut set = Self::new();
        set.extend(rules);
        set
    }

    /// Rules from JSON/YAML files in `dir`, one rule per file
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let rules: Vec<ValidationRule> = load_definition_dir(dir, "integrity rule")?;
        Ok(Self::from_rules(rules))
    }

    /// Append rules, validating each
    pub fn extend(&mut self, rules: impl IntoIterator<Item = ValidationRule>) {
        for rule in rules {
            if let Err(e) = rule.validate() {
                error!(rule_id = %rule.id, error = %e, "Skipping invalid integrity rule");
                continue;
            }
            if self.get(&rule.id).is_some() {
                warn!(rule_id = %rule.id, "Duplicate integrity rule id, keeping the first");
                continue;
            }
            self.rules.push(rule);
        }
    }

    /// Rule by id
    pub fn get(&self, rule_id: &str) -> Option<&ValidationRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    /// Rules in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ValidationRule> {
        self.rules.iter()
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// No rules loaded
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Case-management invariants every deployment checks
    pub fn builtin() -> Self {
        let rule = |id: &str,
                    description: &str,
                    query: GraphQuery,
                    severity: Severity,
                    issue_type: IssueType| ValidationRule {
            id: id.to_string(),
            description: description.to_string(),
            query,
            severity,
            issue_type,
            tags: Vec::new(),
            fix: None,
            suggested_fix: None,
        };

        let mut dangling = rule(
            "dangling_relationships",
            "Relationship points at a missing node",
            GraphQuery::DanglingRelationships,
            Severity::Critical,
            IssueType::DanglingRelationship,
        );
        dangling.fix = Some(FixAction::DeleteRelationship);
        dangling.suggested_fix = Some("Delete the relationship".into());

        let mut duplicate_case_numbers = rule(
            "duplicate_case_numbers",
            "Case number shared by several cases",
            GraphQuery::DuplicatePropertyValues {
                label: EntityType::Case,
                property: "case_number".into(),
            },
            Severity::Critical,
            IssueType::DuplicateEntity,
        );
        duplicate_case_numbers.suggested_fix = Some("Renumber or merge the duplicated cases".into());

        let case_number = rule(
            "case_missing_number",
            "Case without a case number",
            GraphQuery::NodesMissingProperty {
                label: EntityType::Case,
                property: "case_number".into(),
            },
            Severity::Failed,
            IssueType::MissingRequiredProperty,
        );

        let mut case_status = rule(
            "case_missing_status",
            "Case without a status",
            GraphQuery::NodesMissingProperty {
                label: EntityType::Case,
                property: "status".into(),
            },
            Severity::Failed,
            IssueType::MissingRequiredProperty,
        );
        case_status.fix = Some(FixAction::SetProperty {
            property: "status".into(),
            value: json!("open"),
        });
        case_status.suggested_fix = Some("Set status to 'open'".into());

        let invalid_status = rule(
            "case_invalid_status",
            "Case status outside the allowed values",
            GraphQuery::NodesWithInvalidValue {
                label: EntityType::Case,
                property: "status".into(),
                allowed: vec![json!("open"), json!("pending"), json!("closed"), json!("archived")],
            },
            Severity::Failed,
            IssueType::InvalidPropertyValue,
        );

        let task_assignee = rule(
            "task_assignment_endpoints",
            "ASSIGNED_TO must link a task to a user",
            GraphQuery::RelationshipEndpointMismatch {
                rel_type: "ASSIGNED_TO".into(),
                start_label: EntityType::Task,
                end_label: EntityType::User,
            },
            Severity::Failed,
            IssueType::InvalidPropertyValue,
        );

        let orphan_documents = rule(
            "orphan_documents",
            "Document not attached to anything",
            GraphQuery::OrphanNodes {
                label: EntityType::Document,
            },
            Severity::Warning,
            IssueType::OrphanedNode,
        );

        let case_dates = rule(
            "case_closed_before_opened",
            "Case closed before it was opened",
            GraphQuery::PropertyOrderViolation {
                label: EntityType::Case,
                earlier: "opened_at".into(),
                later: "closed_at".into(),
            },
            Severity::Warning,
            IssueType::TemporalInconsistency,
        );

        let mut classification = rule(
            "document_missing_classification",
            "Document without a data classification",
            GraphQuery::NodesMissingProperty {
                label: EntityType::Document,
                property: "classification".into(),
            },
            Severity::Failed,
            IssueType::ComplianceViolation,
        );
        classification.tags = vec![COMPLIANCE_TAG.to_string()];
        classification.suggested_fix = Some("Classify the document".into());

        let mut retention = rule(
            "client_missing_retention",
            "Client record without a retention date",
            GraphQuery::NodesMissingProperty {
                label: EntityType::Client,
                property: "retention_until".into(),
            },
            Severity::Warning,
            IssueType::ComplianceViolation,
        );
        retention.tags = vec![COMPLIANCE_TAG.to_string()];

        Self::from_rules([
            dangling,
            duplicate_case_numbers,
            case_number,
            case_status,
            invalid_status,
            task_assignee,
            orphan_documents,
            case_dates,
            classification,
            retention,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_are_valid() {
        let set = RuleSet::builtin();
        assert_eq!(set.len(), 10);
        assert!(set.iter().all(|r| r.validate().is_ok()));
        assert!(set.get("dangling_relationships").unwrap().fix.is_some());
    }

    #[test]
    fn test_duplicates_and_invalid_rules_dropped() {
        let mut set = RuleSet::builtin();
        let mut copy = set.get("orphan_documents").unwrap().clone();
        copy.description = "shadow".into();
        let mut broken = copy.clone();
        broken.id = "broken".into();
        broken.query = GraphQuery::CountNodes { label: None };

        set.extend([copy, broken]);
        assert_eq!(set.len(), 10);
        assert_ne!(set.get("orphan_documents").unwrap().description, "shadow");
    }

    #[test]
    fn test_load_dir_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a_person.yaml"),
            "id: person_missing_name\ndescription: Person without name\nseverity: warning\nissue_type: missing_required_property\nquery:\n  kind: nodes_missing_property\n  label: Person\n  property: name\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("b_broken.json"), "{ not json").unwrap();

        let set = RuleSet::load_dir(dir.path()).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get("person_missing_name").is_some());
    }
}
