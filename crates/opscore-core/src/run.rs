// crates/opscore-core/src/run.rs
// ============================================================================
// Module: Run & Step Model
// Description: Executable-work entities, their lifecycle, and execution-lease
//              fields.
// Purpose: Typed projection-row shapes for runs, steps, and run attempts.
// Dependencies: crate::ids, crate::time, serde
// ============================================================================

//! ## Overview
//! A [`Run`] is a unit of executable work claimed and executed by an external
//! engine. Its lease fields (`claim_token`, `claimed_by`, `lease_expires_at`,
//! `lease_heartbeat_at`) live on the row itself rather than in a separate
//! table, mirroring the work-item lease table's shape but bound 1:1 to the
//! run.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::EngineId;
use crate::ids::ExperimentId;
use crate::ids::PrincipalId;
use crate::ids::RoomId;
use crate::ids::RunAttemptId;
use crate::ids::RunId;
use crate::ids::StepId;
use crate::ids::ThreadId;
use crate::ids::WorkspaceId;
use crate::time::Timestamp;

/// Run lifecycle status.
///
/// # Invariants
/// - Transitions only move forward: `queued -> running -> (succeeded|failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting to be claimed by an engine.
    Queued,
    /// Claimed and actively executing.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Completed with failure.
    Failed,
}

impl RunStatus {
    /// Returns whether the run is still "in flight" for active-run counting.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

/// A unit of executable work.
///
/// # Invariants
/// - At most one of `claim_token`/`claimed_by_actor_id`/`lease_expires_at` is
///   set at a time: either all are set (leased) or none are (unleased).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier.
    pub run_id: RunId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Room scope.
    pub room_id: RoomId,
    /// Thread scope.
    pub thread_id: ThreadId,
    /// Optional experiment binding.
    pub experiment_id: Option<ExperimentId>,
    /// Human-readable title.
    pub title: String,
    /// The goal text the run is working toward.
    pub goal: String,
    /// Input payload.
    pub input: Value,
    /// Output payload, populated on success.
    pub output: Option<Value>,
    /// Error payload, populated on failure.
    pub error: Option<Value>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Correlation id for the run's logical activity.
    pub correlation_id: String,
    /// Lifecycle status.
    pub status: RunStatus,
    /// Current claim token, when leased.
    pub claim_token: Option<String>,
    /// Actor id of the current claimant, when leased.
    pub claimed_by_actor_id: Option<String>,
    /// Lease expiry, when leased.
    pub lease_expires_at: Option<Timestamp>,
    /// Last heartbeat time, when leased.
    pub lease_heartbeat_at: Option<Timestamp>,
    /// Row creation time.
    pub created_at: Timestamp,
    /// Row last-update time.
    pub updated_at: Timestamp,
}

impl Run {
    /// Returns whether the run currently holds an active (unexpired) lease.
    #[must_use]
    pub fn is_leased(&self, now: Timestamp) -> bool {
        self.lease_expires_at.is_some_and(|expires| expires > now)
    }
}

/// A unit of work within a running [`Run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Step identifier.
    pub step_id: StepId,
    /// Parent run identifier.
    pub run_id: RunId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Step title.
    pub title: String,
    /// Step payload (tool call, observation, etc).
    pub payload: Value,
    /// Creation time.
    pub created_at: Timestamp,
}

/// Historical record of a single claim over a run's execution slot.
///
/// # Invariants
/// - `attempt_no` is dense starting at 1 within a given `run_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAttempt {
    /// Attempt identifier.
    pub attempt_id: RunAttemptId,
    /// Parent run identifier.
    pub run_id: RunId,
    /// 1-based, dense attempt counter for this run.
    pub attempt_no: u32,
    /// Claim token assigned for this attempt.
    pub claim_token: String,
    /// Principal that claimed the run.
    pub claimer_principal_id: PrincipalId,
    /// Engine that performed the claim.
    pub engine_id: EngineId,
    /// Time the claim was made.
    pub claimed_at: Timestamp,
    /// Time the attempt was released, if it was.
    pub released_at: Option<Timestamp>,
    /// Reason the attempt was released (preempted, completed, failed, ...).
    pub released_reason: Option<String>,
}
