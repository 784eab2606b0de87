// crates/opscore-core/src/incident.rs
// ============================================================================
// Module: Incident & Experiment Model
// Description: Hypothesis-tracking and incident-response entities.
// Purpose: Typed projection-row shapes for experiments and incidents.
// Dependencies: crate::ids, crate::time, serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::EventId;
use crate::ids::ExperimentId;
use crate::ids::IncidentId;
use crate::ids::RoomId;
use crate::ids::RunId;
use crate::ids::WorkspaceId;
use crate::time::Timestamp;

/// Risk tier attached to an experiment.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Low risk.
    Low,
    /// Medium risk.
    Medium,
    /// High risk.
    High,
}

/// Experiment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Actively tracked; updates and new runs are permitted.
    Open,
    /// Closed normally; no further updates.
    Closed,
    /// Force-stopped while runs were still active.
    Stopped,
}

/// A hypothesis-tracking record bound to a room.
///
/// # Invariants
/// - `budget_cap_units >= 0`.
/// - `update`/`close` are only permitted while `status == Open` (close always
///   permitted; update gated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    /// Experiment identifier.
    pub experiment_id: ExperimentId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Room binding.
    pub room_id: RoomId,
    /// Human-readable title.
    pub title: String,
    /// Hypothesis under test.
    pub hypothesis: String,
    /// Criteria that define success.
    pub success_criteria: Vec<String>,
    /// Conditions that trigger an early stop.
    pub stop_conditions: Vec<String>,
    /// Budget cap, in workspace-defined units.
    pub budget_cap_units: u64,
    /// Risk tier.
    pub risk_tier: RiskTier,
    /// Lifecycle status.
    pub status: ExperimentStatus,
    /// Reason recorded at close/stop time.
    pub close_reason: Option<String>,
    /// Snapshot of active (queued|running) run count as of the last update.
    pub active_run_count: u32,
    /// Row creation time.
    pub created_at: Timestamp,
    /// Row last-update time.
    pub updated_at: Timestamp,
}

/// Incident severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSeverity {
    /// Informational; no material impact.
    Info,
    /// Minor impact.
    Low,
    /// Moderate impact.
    Medium,
    /// Significant impact.
    High,
    /// Severe, workspace-wide impact.
    Critical,
}

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Open; RCA/learning/close are in play.
    Open,
    /// Closed; rejects further RCA/learning/close.
    Closed,
}

/// A single recorded learning entry attached to an incident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningEntry {
    /// Free-text learning note.
    pub note: String,
    /// Actor id that logged the learning.
    pub logged_by: String,
    /// Time the learning was logged.
    pub logged_at: Timestamp,
}

/// A workspace-scoped incident record.
///
/// # Invariants
/// - Closing requires `rca.is_some()` and `!learnings.is_empty()`.
/// - Once `status == Closed`, RCA/learning/close are all rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    /// Incident identifier.
    pub incident_id: IncidentId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Severity.
    pub severity: IncidentSeverity,
    /// Optional run linkage.
    pub run_id: Option<RunId>,
    /// Optional room inherited from the bound run.
    pub room_id: Option<RoomId>,
    /// Optional thread inherited from the bound run.
    pub thread_id: Option<String>,
    /// Optional correlation id inherited from the bound run.
    pub correlation_id: Option<String>,
    /// Root-cause-analysis payload, once recorded.
    pub rca: Option<Value>,
    /// Time the RCA was last updated.
    pub rca_updated_at: Option<Timestamp>,
    /// Recorded learnings.
    pub learnings: Vec<LearningEntry>,
    /// Lifecycle status.
    pub status: IncidentStatus,
    /// Event id of the last applied `incident.*`/`rca.*`/`learning.*` event.
    pub last_event_id: Option<EventId>,
    /// Row creation time.
    pub created_at: Timestamp,
    /// Row last-update time.
    pub updated_at: Timestamp,
}

impl Incident {
    /// Returns the number of recorded learnings.
    #[must_use]
    pub fn learning_count(&self) -> usize {
        self.learnings.len()
    }
}
