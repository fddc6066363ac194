// Integrity Validation - declarative rules, issue classification and auto-fix

/// Rule sets and the built-in rules
pub mod rules;
/// Rules, issues and results
pub mod types;
/// Rule execution and auto-fix
pub mod validator;

pub use rules::RuleSet;
pub use types::{
    FixAction, FixReport, IntegrityIssue, IssueType, RuleOutcome, Severity, ValidationLevel,
    ValidationResult, ValidationRule,
};
pub use validator::IntegrityValidator;
