//! Disaster events, recovery plans and health reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::store::EntityType;
use crate::{Result, SafeguardError};

/// Kind of disaster a plan can cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisasterType {
    /// Host or disk failure
    HardwareFailure,
    /// Damaged or inconsistent data
    DataCorruption,
    /// Intrusion or ransomware
    CyberAttack,
    /// Site loss
    NaturalDisaster,
    /// Operator mistake
    HumanError,
    /// Connectivity loss
    NetworkOutage,
    /// Power loss
    PowerOutage,
}

impl DisasterType {
    /// Every disaster type
    pub const ALL: [DisasterType; 7] = [
        DisasterType::HardwareFailure,
        DisasterType::DataCorruption,
        DisasterType::CyberAttack,
        DisasterType::NaturalDisaster,
        DisasterType::HumanError,
        DisasterType::NetworkOutage,
        DisasterType::PowerOutage,
    ];

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            DisasterType::HardwareFailure => "hardware_failure",
            DisasterType::DataCorruption => "data_corruption",
            DisasterType::CyberAttack => "cyber_attack",
            DisasterType::NaturalDisaster => "natural_disaster",
            DisasterType::HumanError => "human_error",
            DisasterType::NetworkOutage => "network_outage",
            DisasterType::PowerOutage => "power_outage",
        }
    }
}

impl fmt::Display for DisasterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component health, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,
    /// Working with reduced margin
    Degraded,
    /// Close to failing
    Critical,
    /// Not operational
    Failed,
}

impl HealthStatus {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
            HealthStatus::Failed => "failed",
        }
    }

    /// Gauge value: 0 healthy .. 3 failed
    pub fn level(&self) -> i64 {
        *self as i64
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitored part of the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Primary graph store
    Database,
    /// Backup storage and recency
    Backup,
    /// Secondary sites
    Network,
    /// Local disk space
    Storage,
}

impl Component {
    /// Every component
    pub const ALL: [Component; 4] = [
        Component::Database,
        Component::Backup,
        Component::Network,
        Component::Storage,
    ];

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Database => "database",
            Component::Backup => "backup",
            Component::Network => "network",
            Component::Storage => "storage",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component checked
    pub component: Component,
    /// Result
    pub status: HealthStatus,
    /// Summary
    pub message: String,
    /// Measurements behind the status
    pub details: HashMap<String, String>,
    /// Check time
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    /// Health without details
    pub fn new(component: Component, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            component,
            status,
            message: message.into(),
            details: HashMap::new(),
            checked_at: Utc::now(),
        }
    }

    /// Attach a measurement
    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Health of every component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst component status
    pub overall: HealthStatus,
    /// Per-component health
    pub components: Vec<ComponentHealth>,
    /// Check time
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Aggregate component results
    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        let overall = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            overall,
            components,
            checked_at: Utc::now(),
        }
    }

    /// Health of one component
    pub fn component(&self, component: Component) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.component == component)
    }
}

/// Business impact of a disaster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactSeverity {
    /// Minor disruption
    Low,
    /// Partial outage
    Medium,
    /// Major outage
    High,
    /// Database affected by a high-impact disaster
    Critical,
}

impl ImpactSeverity {
    fn escalate(self) -> Self {
        match self {
            ImpactSeverity::Low => ImpactSeverity::Medium,
            ImpactSeverity::Medium => ImpactSeverity::High,
            ImpactSeverity::High | ImpactSeverity::Critical => ImpactSeverity::Critical,
        }
    }
}

/// Coarse risk rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Unlikely
    Low,
    /// Possible
    Medium,
    /// Likely
    High,
}

/// Impact estimate attached to an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAssessment {
    /// Overall severity
    pub severity: ImpactSeverity,
    /// Expected outage length
    pub estimated_downtime_minutes: u32,
    /// Chance of losing data
    pub data_loss_risk: RiskLevel,
    /// Effect on client-facing case work
    pub patient_care_impact: RiskLevel,
    /// Chance of a regulatory finding
    pub compliance_risk: RiskLevel,
}

impl ImpactAssessment {
    /// Severity escalates one level when the database is affected
    pub fn assess(disaster_type: DisasterType, affected_systems: &[String]) -> Self {
        let database_hit = affected_systems
            .iter()
            .any(|s| s.eq_ignore_ascii_case("database"));

        let base = match disaster_type {
            DisasterType::DataCorruption
            | DisasterType::CyberAttack
            | DisasterType::HardwareFailure
            | DisasterType::NaturalDisaster => ImpactSeverity::High,
            DisasterType::HumanError
            | DisasterType::NetworkOutage
            | DisasterType::PowerOutage => ImpactSeverity::Medium,
        };
        let severity = if database_hit { base.escalate() } else { base };

        let estimated_downtime_minutes = match severity {
            ImpactSeverity::Low => 30,
            ImpactSeverity::Medium => 120,
            ImpactSeverity::High => 240,
            ImpactSeverity::Critical => 480,
        };

        let data_loss_risk = match disaster_type {
            DisasterType::DataCorruption | DisasterType::CyberAttack => RiskLevel::High,
            _ if database_hit => RiskLevel::Medium,
            _ => RiskLevel::Low,
        };

        let patient_care_impact = match severity {
            ImpactSeverity::Critical | ImpactSeverity::High => RiskLevel::High,
            ImpactSeverity::Medium => RiskLevel::Medium,
            ImpactSeverity::Low => RiskLevel::Low,
        };

        let compliance_risk = match disaster_type {
            DisasterType::CyberAttack | DisasterType::DataCorruption => RiskLevel::High,
            _ if database_hit => RiskLevel::Medium,
            _ => RiskLevel::Low,
        };

        Self {
            severity,
            estimated_downtime_minutes,
            data_loss_risk,
            patient_care_impact,
            compliance_risk,
        }
    }
}

/// What a recovery step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Switch to the first reachable secondary site
    FailoverToSecondary,
    /// Restore the given backup, or the latest restorable one
    RestoreFromBackup {
        /// Backup to restore; latest restorable when absent
        #[serde(default)]
        backup_id: Option<String>,
    },
    /// Send `message` through the notification sink
    NotifyStakeholders { message: String },
    /// Operator action; logged only
    Manual { instructions: String },
}

/// One action in a recovery plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStep {
    /// Step id
    pub id: String,
    /// Summary
    #[serde(default)]
    pub description: String,
    /// What the step does
    pub action: StepAction,
    /// Falls back to the configured step timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Post-recovery check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationTest {
    /// The active store answers a liveness check
    Connectivity,
    /// The active store holds at least `min_count` nodes
    DataPresence {
        /// Restrict the count to one entity type
        #[serde(default)]
        label: Option<EntityType>,
        /// Minimum node count
        #[serde(default = "default_min_count")]
        min_count: u64,
    },
}

fn default_min_count() -> u64 {
    1
}

/// Ordered steps that recover from disasters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    /// Plan id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Disasters the plan covers
    pub disaster_types: Vec<DisasterType>,
    /// Lower runs first
    pub priority: u32,
    /// Recovery time objective
    pub rto_minutes: u32,
    /// Recovery point objective
    pub rpo_minutes: u32,
    /// Ordered steps
    pub steps: Vec<RecoveryStep>,
    /// Plans that must succeed first
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Checks run after the steps
    #[serde(default)]
    pub validation_tests: Vec<ValidationTest>,
}

impl RecoveryPlan {
    /// Structural checks run when plans are loaded
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SafeguardError::Configuration("Recovery plan id is empty".into()));
        }
        if self.disaster_types.is_empty() {
            return Err(SafeguardError::Configuration(format!(
                "Recovery plan {} covers no disaster types",
                self.id
            )));
        }
        if self.steps.is_empty() {
            return Err(SafeguardError::Configuration(format!(
                "Recovery plan {} has no steps",
                self.id
            )));
        }
        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err(SafeguardError::Configuration(format!(
                "Recovery plan {} depends on itself",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether the plan handles `disaster_type`
    pub fn covers(&self, disaster_type: DisasterType) -> bool {
        self.disaster_types.contains(&disaster_type)
    }
}

/// Outcome of running one plan for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
    /// Plan that ran
    pub plan_id: String,
    /// Every step and check passed
    pub success: bool,
    /// Steps completed, in order
    pub executed_steps: Vec<String>,
    /// Step that failed, if any
    pub failed_step: Option<String>,
    /// Failure message
    pub error: Option<String>,
    /// Failed post-recovery checks
    pub validation_failures: Vec<String>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub completed_at: DateTime<Utc>,
}

impl PlanExecution {
    /// Execution that never started
    pub fn skipped(plan_id: &str, reason: String) -> Self {
        let now = Utc::now();
        Self {
            plan_id: plan_id.to_string(),
            success: false,
            executed_steps: Vec::new(),
            failed_step: None,
            error: Some(reason),
            validation_failures: Vec::new(),
            started_at: now,
            completed_at: now,
        }
    }
}

/// A declared disaster and its recovery progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisasterEvent {
    /// Event id
    pub id: String,
    /// Kind of disaster
    pub disaster_type: DisasterType,
    /// When it happened
    pub occurred_at: DateTime<Utc>,
    /// When it was declared
    pub detected_at: DateTime<Utc>,
    /// Operator summary
    pub description: String,
    /// Systems named by the operator
    pub affected_systems: Vec<String>,
    /// Impact estimate
    pub impact: ImpactAssessment,
    /// Plans have started
    pub recovery_initiated: bool,
    /// Every plan succeeded
    pub recovery_completed: bool,
    /// Per-plan outcomes
    #[serde(default)]
    pub plan_results: Vec<PlanExecution>,
}

impl DisasterEvent {
    /// Event declared now, with its impact assessed
    pub fn new(
        disaster_type: DisasterType,
        description: impl Into<String>,
        affected_systems: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            disaster_type,
            occurred_at: now,
            detected_at: now,
            description: description.into(),
            impact: ImpactAssessment::assess(disaster_type, &affected_systems),
            affected_systems,
            recovery_initiated: false,
            recovery_completed: false,
            plan_results: Vec::new(),
        }
    }
}

/// Payload handed to the notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Event the notification is about
    pub event_id: String,
    /// Kind of disaster
    pub disaster_type: DisasterType,
    /// Body
    pub message: String,
    /// Send time
    pub timestamp: DateTime<Utc>,
    /// Impact severity of the event
    pub severity: ImpactSeverity,
}

/// Readiness verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Readiness {
    /// Recovery could start now
    Ready,
    /// Something blocks recovery
    NotReady,
}

/// Whether disaster recovery could run now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    /// Overall verdict
    pub verdict: Readiness,
    /// Current health
    pub health: HealthReport,
    /// Accepted plans
    pub plan_count: usize,
    /// Disaster types without any matching plan
    pub coverage_gaps: Vec<DisasterType>,
    /// Latest completed backup
    pub last_backup_at: Option<DateTime<Utc>>,
    /// Reasons behind a not-ready verdict
    pub findings: Vec<String>,
    /// Report time
    pub generated_at: DateTime<Utc>,
}
