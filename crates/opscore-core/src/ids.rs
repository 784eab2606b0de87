// crates/opscore-core/src/ids.rs
// ============================================================================
// Module: Ops Core Identifiers
// Description: Canonical opaque identifiers for every scoped entity.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Identifiers are opaque newtypes over `String`. None of them normalize or
//! validate their contents; callers are responsible for generating
//! collision-resistant values (the engine layer uses UUIDs). Keeping them as
//! distinct types prevents a `RunId` from being passed where a `RoomId` is
//! expected.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Declares an opaque, string-backed identifier type with the shared
/// constructor/accessor/`Display`/`From` surface used across the crate.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier from any string-like value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(
    /// Tenant boundary; every query and mutation is scoped to one of these.
    WorkspaceId
);
opaque_id!(
    /// Stable identifier of a single persisted event envelope.
    EventId
);
opaque_id!(
    /// Unit of executable work tracked through queued/running/succeeded/failed.
    RunId
);
opaque_id!(
    /// Unit of work within a running `Run`.
    StepId
);
opaque_id!(
    /// Conversational container that belongs to a workspace.
    RoomId
);
opaque_id!(
    /// Conversational container that belongs to a room.
    ThreadId
);
opaque_id!(
    /// A single message posted to a thread.
    MessageId
);
opaque_id!(
    /// Identity of any actor capable of holding capability tokens.
    PrincipalId
);
opaque_id!(
    /// An autonomous agent; a `Principal` with display name and status.
    AgentId
);
opaque_id!(
    /// Hypothesis-tracking record bound to a room.
    ExperimentId
);
opaque_id!(
    /// Pending-or-decided gate on an action.
    ApprovalId
);
opaque_id!(
    /// Workspace-scoped incident record.
    IncidentId
);
opaque_id!(
    /// Grant of scoped permissions issued to a principal.
    CapabilityTokenId
);
opaque_id!(
    /// Service registered per workspace, holding its own principal.
    EngineId
);
opaque_id!(
    /// Workspace-scoped install of a versioned skill package.
    SkillPackageId
);
opaque_id!(
    /// Per-agent usage-and-assessment record for a skill.
    AgentSkillId
);
opaque_id!(
    /// Per-attempt skill assessment record.
    SkillAssessmentId
);
opaque_id!(
    /// Pending trust-driven scope-delta recommendation.
    AutonomyRecommendationId
);
opaque_id!(
    /// Exclusive hold on a work item, keyed with type and id.
    LeaseId
);
opaque_id!(
    /// Historical record of one claim over a run's execution slot.
    RunAttemptId
);
opaque_id!(
    /// Stable identifier threading all events belonging to one logical activity.
    CorrelationId
);
opaque_id!(
    /// Event id of the event that directly caused another event.
    CausationId
);
opaque_id!(
    /// Caller-supplied deduplication key, unique per `(workspace_id, key)`.
    IdempotencyKey
);

#[cfg(test)]
mod tests {
    use super::RunId;
    use super::WorkspaceId;

    #[test]
    fn distinct_id_types_do_not_coerce() {
        let run = RunId::new("run_1");
        let ws = WorkspaceId::new("run_1");
        assert_eq!(run.as_str(), ws.as_str());
        assert_ne!(run.clone().into_inner(), WorkspaceId::new("other").into_inner());
    }

    #[test]
    fn round_trips_through_json() {
        let id = RunId::new("run_42");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"run_42\"");
        let back: RunId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }
}
