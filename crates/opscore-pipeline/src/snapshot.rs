// crates/opscore-pipeline/src/snapshot.rs
// ============================================================================
// Module: Pipeline Snapshot Types
// Description: The normalized per-entity snapshot stage resolution is a pure
//              function of, plus the enums it is built from.
// Purpose: Decouple the 13-rule resolver in `stage` from how the snapshot's
//          fields were assembled, so the resolver stays a pure function.
// Dependencies: none (plain enums and a struct)
// ============================================================================

//! ## Overview
//! [`EntitySnapshot`] combines entity identity and own status, the latest
//! run status, the latest evidence status, the latest scorecard decision,
//! an active-incident flag, and a pending-approval flag. [`crate::store`]
//! assembles one from raw events; [`crate::stage::resolve`] only ever sees
//! the assembled snapshot.

/// The kind of workspace entity a pipeline row tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A hypothesis-tracking experiment.
    Experiment,
    /// A unit of executable work.
    Run,
}

impl EntityKind {
    /// Renders the canonical lowercase column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Experiment => "experiment",
            Self::Run => "run",
        }
    }

    /// Parses the canonical lowercase column value.
    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "experiment" => Some(Self::Experiment),
            "run" => Some(Self::Run),
            _ => None,
        }
    }
}

/// Latest run status as normalized for stage resolution
/// (`queued→created`, `running→started`, `succeeded→completed`, else as-is).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedRunStatus {
    /// Normalized from `run.created` / queued.
    Created,
    /// Normalized from `run.started` / running.
    Started,
    /// Normalized from `run.completed` / succeeded.
    Completed,
    /// The run failed.
    Failed,
    /// The run's claim window expired without completion.
    TimedOut,
    /// The run was cancelled by its owner.
    Cancelled,
}

impl NormalizedRunStatus {
    /// Renders the canonical lowercase column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses the canonical lowercase column value.
    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "started" => Some(Self::Started),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status belongs to the demotion-triggering set
    /// `{failed, timed_out, cancelled}`.
    #[must_use]
    pub const fn is_demoting(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::Cancelled)
    }
}

/// Latest evidence status. Absence is represented as `None` at the call
/// site rather than as a variant here, matching the spec's four-value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceStatus {
    /// Evidence has been submitted but not yet reviewed.
    Created,
    /// Evidence is under active review.
    UnderReview,
    /// Evidence was rejected.
    Rejected,
}

impl EvidenceStatus {
    /// Renders the canonical lowercase column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::UnderReview => "under_review",
            Self::Rejected => "rejected",
        }
    }

    /// Parses the canonical lowercase column value.
    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "under_review" => Some(Self::UnderReview),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Latest scorecard decision, with `warn` already normalized to `pending`
/// by the time it reaches the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorecardDecision {
    /// The scorecard passed.
    Pass,
    /// The scorecard failed.
    Fail,
    /// The scorecard is pending (includes normalized `warn`).
    Pending,
}

impl ScorecardDecision {
    /// Renders the canonical lowercase column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Pending => "pending",
        }
    }

    /// Parses the canonical lowercase column value, normalizing `warn` to
    /// [`Self::Pending`].
    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            "pending" | "warn" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// Experiment status as tracked by the pipeline snapshot (mirrors
/// `opscore_core::ExperimentStatus` without depending on it, since the
/// snapshot only needs the `open` discriminant for rule 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentStageStatus {
    /// The experiment is open.
    Open,
    /// The experiment is closed or stopped.
    Closed,
}

impl ExperimentStageStatus {
    /// Renders the canonical lowercase column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    /// Parses the canonical lowercase column value. Both `closed` and
    /// `stopped` normalize to [`Self::Closed`]; only `open` is interesting
    /// to rule 12.
    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "open" => Some(Self::Open),
            "closed" | "stopped" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// The six kanban-like pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Newly seen or unresolved.
    Inbox,
    /// Waiting on a human approval decision.
    PendingApproval,
    /// Actively executing in the workspace.
    ExecuteWorkspace,
    /// Awaiting evidence/scorecard review.
    ReviewEvidence,
    /// Promoted: evidence and scorecard agree the work is done.
    Promoted,
    /// Demoted: a failure, rejection, or active incident blocks progress.
    Demoted,
}

impl Stage {
    /// Renders the canonical stage identifier used in the wire format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "1_inbox",
            Self::PendingApproval => "2_pending_approval",
            Self::ExecuteWorkspace => "3_execute_workspace",
            Self::ReviewEvidence => "4_review_evidence",
            Self::Promoted => "5_promoted",
            Self::Demoted => "6_demoted",
        }
    }

    /// Parses the canonical stage identifier.
    #[must_use]
    pub fn from_str(raw: &str) -> Option<Self> {
        match raw {
            "1_inbox" => Some(Self::Inbox),
            "2_pending_approval" => Some(Self::PendingApproval),
            "3_execute_workspace" => Some(Self::ExecuteWorkspace),
            "4_review_evidence" => Some(Self::ReviewEvidence),
            "5_promoted" => Some(Self::Promoted),
            "6_demoted" => Some(Self::Demoted),
            _ => None,
        }
    }

    /// Every stage, in display order.
    #[must_use]
    pub const fn all() -> [Self; 6] {
        [Self::Inbox, Self::PendingApproval, Self::ExecuteWorkspace, Self::ReviewEvidence, Self::Promoted, Self::Demoted]
    }
}

/// A normalized per-entity snapshot: the sole input to [`crate::stage::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySnapshot {
    /// Entity kind.
    pub kind: EntityKind,
    /// Workspace-unique id of the entity (experiment id or run id).
    pub entity_id: String,
    /// Whether the entity has been archived.
    pub is_archived: bool,
    /// Whether the entity has been deleted.
    pub is_deleted: bool,
    /// Whether every field this entity needs for stage resolution is
    /// present (false only for malformed/partial projections).
    pub required_fields_present: bool,
    /// Latest run status, present only for [`EntityKind::Run`] rows.
    pub run_status: Option<NormalizedRunStatus>,
    /// Latest evidence status; `None` means absent.
    pub evidence_status: Option<EvidenceStatus>,
    /// Whether the latest accepted evidence is bound to this run.
    pub evidence_matches_run: bool,
    /// Latest scorecard decision.
    pub scorecard_decision: Option<ScorecardDecision>,
    /// Whether the scorecard's run/evidence bindings match this entity.
    pub scorecard_bindings_match: bool,
    /// Whether an incident is currently open against this entity.
    pub incident_active: bool,
    /// Whether an approval is currently pending against this entity.
    pub approval_requested: bool,
    /// Latest experiment status, present only for [`EntityKind::Experiment`] rows.
    pub experiment_status: Option<ExperimentStageStatus>,
}
