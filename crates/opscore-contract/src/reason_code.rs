// crates/opscore-contract/src/reason_code.rs
// ============================================================================
// Module: Reason Codes
// Description: The fixed reason-code to HTTP-status table from spec §4.11
//              and §7.
// Purpose: Give every crate in the workspace one stable vocabulary for
//          client-visible failure reasons, decoupled from any one crate's
//          internal error enum.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

/// A stable, client-visible reason for a command's outcome.
///
/// # Invariants
/// - Each variant's wire form (`as_str`) and HTTP status (`status_code`) are
///   fixed; neither may change once shipped, since callers key retry/backoff
///   behavior off them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// The request's `schema_version` is not one this build understands.
    UnsupportedVersion,
    /// The `x-workspace-id` header was absent.
    MissingWorkspaceHeader,
    /// A field the command requires was absent or empty.
    MissingRequiredField,
    /// A work-item's `item_type` is not one the claim protocol recognizes.
    InvalidWorkItemType,
    /// The authenticated principal does not own the claimed workspace scope.
    UnauthorizedWorkspace,
    /// The named agent does not exist in this workspace.
    UnknownAgent,
    /// The lease, approval, or work item was already claimed by another actor.
    AlreadyClaimed,
    /// The request's `correlation_id` did not match the one the lease was issued under.
    CorrelationIdMismatch,
    /// The caller does not hold the lease it is operating on.
    LeaseNotOwned,
    /// The caller's lease version is stale.
    LeaseVersionMismatch,
    /// A heartbeat arrived before `HEARTBEAT_MIN_INTERVAL_SEC` elapsed.
    HeartbeatRateLimited,
    /// The read path could not complete within its statement timeout.
    ProjectionUnavailable,
    /// An experiment close was requested without `force` while active runs remain.
    ExperimentHasActiveRuns,
    /// An incident close was requested before `rca.updated` was ever logged.
    IncidentCloseBlockedMissingRca,
    /// An incident close was requested before any `learning.logged` entry existed.
    IncidentCloseBlockedMissingLearning,
    /// An unclassified failure; the caller should not assume it is retryable.
    InternalError,
    /// The command was already executed under this idempotency key; the
    /// original outcome is being replayed verbatim.
    DuplicateIdempotentReplay,
}

impl ReasonCode {
    /// Renders the canonical snake_case wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedVersion => "unsupported_version",
            Self::MissingWorkspaceHeader => "missing_workspace_header",
            Self::MissingRequiredField => "missing_required_field",
            Self::InvalidWorkItemType => "invalid_work_item_type",
            Self::UnauthorizedWorkspace => "unauthorized_workspace",
            Self::UnknownAgent => "unknown_agent",
            Self::AlreadyClaimed => "already_claimed",
            Self::CorrelationIdMismatch => "correlation_id_mismatch",
            Self::LeaseNotOwned => "lease_not_owned",
            Self::LeaseVersionMismatch => "lease_version_mismatch",
            Self::HeartbeatRateLimited => "heartbeat_rate_limited",
            Self::ProjectionUnavailable => "projection_unavailable",
            Self::ExperimentHasActiveRuns => "experiment_has_active_runs",
            Self::IncidentCloseBlockedMissingRca => "incident_close_blocked_missing_rca",
            Self::IncidentCloseBlockedMissingLearning => "incident_close_blocked_missing_learning",
            Self::InternalError => "internal_error",
            Self::DuplicateIdempotentReplay => "duplicate_idempotent_replay",
        }
    }

    /// The fixed HTTP status for this reason code, per spec §4.11 and §7.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::UnsupportedVersion
            | Self::MissingWorkspaceHeader
            | Self::MissingRequiredField
            | Self::InvalidWorkItemType => 400,
            Self::UnauthorizedWorkspace => 403,
            Self::UnknownAgent => 404,
            Self::AlreadyClaimed
            | Self::CorrelationIdMismatch
            | Self::LeaseNotOwned
            | Self::LeaseVersionMismatch
            | Self::ExperimentHasActiveRuns
            | Self::IncidentCloseBlockedMissingRca
            | Self::IncidentCloseBlockedMissingLearning => 409,
            Self::HeartbeatRateLimited => 429,
            Self::ProjectionUnavailable => 503,
            Self::InternalError => 500,
            Self::DuplicateIdempotentReplay => 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReasonCode;

    #[test]
    fn status_table_matches_fixed_spec_values() {
        assert_eq!(ReasonCode::UnsupportedVersion.status_code(), 400);
        assert_eq!(ReasonCode::UnauthorizedWorkspace.status_code(), 403);
        assert_eq!(ReasonCode::UnknownAgent.status_code(), 404);
        assert_eq!(ReasonCode::LeaseVersionMismatch.status_code(), 409);
        assert_eq!(ReasonCode::HeartbeatRateLimited.status_code(), 429);
        assert_eq!(ReasonCode::ProjectionUnavailable.status_code(), 503);
        assert_eq!(ReasonCode::InternalError.status_code(), 500);
        assert_eq!(ReasonCode::DuplicateIdempotentReplay.status_code(), 200);
    }

    #[test]
    fn wire_form_is_snake_case() {
        assert_eq!(ReasonCode::IncidentCloseBlockedMissingRca.as_str(), "incident_close_blocked_missing_rca");
    }
}
