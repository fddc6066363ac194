//! Recovery plan loading and selection

use super::types::{DisasterType, RecoveryPlan};
use crate::config::load_definition_dir;
use crate::Result;
use std::path::Path;
use tracing::error;

/// Plans from JSON/YAML files in `dir`, one plan per file
pub fn load_plans(dir: &Path) -> Result<Vec<RecoveryPlan>> {
    load_definition_dir(dir, "recovery plan")
}

/// Keep valid plans with unique ids, in input order
pub fn accept_plans(candidates: impl IntoIterator<Item = RecoveryPlan>) -> Vec<RecoveryPlan> {
    let mut accepted: Vec<RecoveryPlan> = Vec::new();
    for plan in candidates {
        if let Err(e) = plan.validate() {
            error!(plan_id = %plan.id, error = %e, "Skipping invalid recovery plan");
            continue;
        }
        if accepted.iter().any(|p| p.id == plan.id) {
            error!(plan_id = %plan.id, "Skipping duplicate recovery plan id");
            continue;
        }
        accepted.push(plan);
    }
    accepted
}

/// Plans covering `disaster_type`, lowest priority value first
pub fn select_plans(plans: &[RecoveryPlan], disaster_type: DisasterType) -> Vec<&RecoveryPlan> {
    let mut matching: Vec<&RecoveryPlan> = plans.iter().filter(|p| p.covers(disaster_type)).collect();
    matching.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    matching
}

/// Disaster types no plan covers
pub fn coverage_gaps(plans: &[RecoveryPlan]) -> Vec<DisasterType> {
    DisasterType::ALL
        .iter()
        .copied()
        .filter(|t| !plans.iter().any(|p| p.covers(*t)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::types::{RecoveryStep, StepAction};

    fn plan(id: &str, priority: u32, types: &[DisasterType]) -> RecoveryPlan {
        RecoveryPlan {
            id: id.into(),
            name: String::new(),
            disaster_types: types.to_vec(),
            priority,
            rto_minutes: 60,
            rpo_minutes: 15,
            steps: vec![RecoveryStep {
                id: "page".into(),
                description: String::new(),
                action: StepAction::Manual {
                    instructions: "page on-call".into(),
                },
                timeout_secs: None,
            }],
            dependencies: vec![],
            validation_tests: vec![],
        }
    }

    #[test]
    fn test_selection_orders_by_priority() {
        let plans = vec![
            plan("late", 5, &[DisasterType::PowerOutage]),
            plan("early", 1, &[DisasterType::PowerOutage]),
            plan("other", 0, &[DisasterType::CyberAttack]),
        ];
        let ids: Vec<&str> = select_plans(&plans, DisasterType::PowerOutage)
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_coverage_gaps() {
        let plans = vec![plan("p", 1, &[DisasterType::PowerOutage, DisasterType::CyberAttack])];
        let gaps = coverage_gaps(&plans);
        assert_eq!(gaps.len(), 5);
        assert!(!gaps.contains(&DisasterType::CyberAttack));
    }

    #[test]
    fn test_invalid_and_duplicate_plans_rejected() {
        let mut empty = plan("empty", 1, &[DisasterType::HumanError]);
        empty.steps.clear();
        let accepted = accept_plans(vec![
            plan("a", 1, &[DisasterType::HumanError]),
            plan("a", 2, &[DisasterType::HumanError]),
            empty,
        ]);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].priority, 1);
    }
}
