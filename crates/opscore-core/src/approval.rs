// crates/opscore-core/src/approval.rs
// ============================================================================
// Module: Approval Model
// Description: Pending-decision entity gating a policy-required action.
// Purpose: Typed projection-row shape for approvals.
// Dependencies: crate::ids, crate::time, serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::ApprovalId;
use crate::ids::WorkspaceId;
use crate::ids::EventId;
use crate::time::Timestamp;

/// Scope over which an approval decision applies.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalScope {
    /// Covers a single action instance only.
    Once,
    /// Covers the remaining lifetime of a run.
    Run,
    /// Covers the remaining lifetime of a room.
    Room,
    /// Covers the remaining lifetime of the workspace.
    Workspace,
    /// Covers future actions matching a stored template.
    Template,
}

/// Approval lifecycle status.
///
/// # Invariants
/// - `Approved` and `Denied` are terminal: further decisions are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Held for further review without a terminal decision yet.
    Held,
    /// Approved; terminal.
    Approved,
    /// Denied; terminal.
    Denied,
}

impl ApprovalStatus {
    /// Returns whether this status is a sink state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Denied)
    }
}

/// A pending (or decided) gate on an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    /// Approval identifier.
    pub approval_id: ApprovalId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Action code the approval gates, e.g. `"external.write"`.
    pub action_code: String,
    /// Scope over which a decision applies.
    pub scope: ApprovalScope,
    /// Snapshot of the scope target (run id, room id, template id, ...).
    pub scope_snapshot: Value,
    /// Optional expiry after which the approval can no longer be acted on.
    pub expires_at: Option<Timestamp>,
    /// Lifecycle status.
    pub status: ApprovalStatus,
    /// Actor id that made the decision, once decided.
    pub decided_by: Option<String>,
    /// Event id of the last applied `approval.*` event.
    pub last_event_id: Option<EventId>,
    /// Row creation time.
    pub created_at: Timestamp,
    /// Row last-update time.
    pub updated_at: Timestamp,
}
