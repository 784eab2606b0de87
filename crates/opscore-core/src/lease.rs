// crates/opscore-core/src/lease.rs
// ============================================================================
// Module: Work-Item Lease Model
// Description: Exclusive-hold entity over a non-run work item.
// Purpose: Typed projection-row shape for `opscore-leases`'s work-item table.
// Dependencies: crate::ids, crate::time, serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::ids::AgentId;
use crate::ids::CorrelationId;
use crate::ids::LeaseId;
use crate::ids::WorkspaceId;
use crate::time::Timestamp;

/// Kind of entity a work-item lease may be held over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemType {
    /// An experiment.
    Experiment,
    /// An approval.
    Approval,
    /// A message.
    Message,
    /// An incident.
    Incident,
    /// An artifact.
    Artifact,
}

/// Exclusive hold on `(workspace_id, work_item_type, work_item_id)`.
///
/// # Invariants
/// - At most one row exists per `(workspace_id, work_item_type, work_item_id)`.
/// - `version` increments by exactly 1 on each successful heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemLease {
    /// Lease identifier.
    pub lease_id: LeaseId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Work-item kind.
    pub work_item_type: WorkItemType,
    /// Work-item identifier.
    pub work_item_id: String,
    /// Agent currently holding the lease.
    pub agent_id: AgentId,
    /// Correlation id supplied at claim time.
    pub correlation_id: CorrelationId,
    /// Monotone version counter, incremented on each heartbeat.
    pub version: u32,
    /// Time the lease was first claimed.
    pub claimed_at: Timestamp,
    /// Time of the most recent heartbeat.
    pub heartbeat_at: Timestamp,
    /// Time after which the lease becomes reclaimable.
    pub expires_at: Timestamp,
}

impl WorkItemLease {
    /// Returns whether the lease has expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at < now
    }
}
