// Disaster Recovery - health monitoring, disaster events, recovery plans and failover

/// Component health checks
pub mod health;
/// Disaster declaration and plan execution
pub mod manager;
/// Notification sinks
pub mod notification;
/// Plan loading and the built-in plans
pub mod plans;
/// Disasters, plans, events and health
pub mod types;

pub use health::{FixedDiskSpace, DiskSpaceSource, SystemDiskSpace};
pub use manager::DisasterRecoveryManager;
pub use notification::{NotificationSink, RecordingNotificationSink, TracingNotificationSink};
pub use types::{
    Component, ComponentHealth, DisasterEvent, DisasterType, HealthReport, HealthStatus,
    ImpactAssessment, ImpactSeverity, Notification, PlanExecution, Readiness, ReadinessReport,
    RecoveryPlan, RecoveryStep, RiskLevel, StepAction, ValidationTest,
};
