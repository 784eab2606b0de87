// crates/opscore-contract/src/error.rs
// ============================================================================
// Module: Contract Error
// Description: The structured `{reason_code, message, details}` error shape
//              every command returns, plus its conversions from every
//              domain crate's own error enum.
// Purpose: Let `opscore-engine` translate any domain failure into the one
//          client-visible shape without each domain crate knowing about
//          HTTP or reason codes itself.
// Dependencies: thiserror, serde_json, opscore_{store,leases,policy,trust,incidents,pipeline}
// ============================================================================

//! ## Overview
//! Domain crates raise their own `thiserror` enums scoped to what they know
//! (`approval.not_found`, `lease.already_claimed`, ...); this module is the
//! one place that knows how those map onto the fixed reason-code table.
//! Conversions favor the most specific reason code a domain error carries
//! and fall back to [`ReasonCode::InternalError`] for storage/transport
//! failures that carry no client-actionable meaning.

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::reason_code::ReasonCode;

/// The structured error every command surface returns.
#[derive(Debug, Clone, Error)]
#[error("{reason_code}: {message}")]
pub struct ContractError {
    /// The stable, client-visible reason.
    pub reason_code: ReasonCode,
    /// A human-readable explanation; never the sole thing a caller should match on.
    pub message: String,
    /// Structured, reason-code-specific context (e.g. the lease's current version).
    pub details: Value,
}

impl ContractError {
    /// Builds a contract error with no extra details.
    #[must_use]
    pub fn new(reason_code: ReasonCode, message: impl Into<String>) -> Self {
        Self { reason_code, message: message.into(), details: Value::Null }
    }

    /// Builds a contract error carrying structured `details`.
    #[must_use]
    pub fn with_details(reason_code: ReasonCode, message: impl Into<String>, details: Value) -> Self {
        Self { reason_code, message: message.into(), details }
    }

    /// The HTTP status this error's reason code maps to.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.reason_code.status_code()
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<opscore_store::StoreError> for ContractError {
    fn from(err: opscore_store::StoreError) -> Self {
        Self::new(ReasonCode::InternalError, err.to_string())
    }
}

impl From<opscore_store::EventStoreError> for ContractError {
    fn from(err: opscore_store::EventStoreError) -> Self {
        let reason = match err {
            opscore_store::EventStoreError::ValidationFailed(_) => ReasonCode::MissingRequiredField,
            opscore_store::EventStoreError::AppendFailed(_) => ReasonCode::InternalError,
        };
        Self::new(reason, err.to_string())
    }
}

impl From<opscore_store::ProjectorError> for ContractError {
    fn from(err: opscore_store::ProjectorError) -> Self {
        Self::new(ReasonCode::InternalError, err.to_string())
    }
}

impl From<opscore_leases::RunLeaseError> for ContractError {
    fn from(err: opscore_leases::RunLeaseError) -> Self {
        let reason = match err {
            opscore_leases::RunLeaseError::AlreadyClaimed => ReasonCode::AlreadyClaimed,
            opscore_leases::RunLeaseError::UnknownRun => ReasonCode::UnknownAgent,
            opscore_leases::RunLeaseError::LeaseNotOwned => ReasonCode::LeaseNotOwned,
            opscore_leases::RunLeaseError::Store(_) | opscore_leases::RunLeaseError::Event(_) => {
                ReasonCode::InternalError
            }
        };
        Self::new(reason, err.to_string())
    }
}

impl From<opscore_leases::WorkItemLeaseError> for ContractError {
    fn from(err: opscore_leases::WorkItemLeaseError) -> Self {
        let reason = match err {
            opscore_leases::WorkItemLeaseError::AlreadyClaimed => ReasonCode::AlreadyClaimed,
            opscore_leases::WorkItemLeaseError::CorrelationIdMismatch => ReasonCode::CorrelationIdMismatch,
            opscore_leases::WorkItemLeaseError::LeaseNotOwned => ReasonCode::LeaseNotOwned,
            opscore_leases::WorkItemLeaseError::LeaseVersionMismatch => ReasonCode::LeaseVersionMismatch,
            opscore_leases::WorkItemLeaseError::HeartbeatRateLimited => ReasonCode::HeartbeatRateLimited,
            opscore_leases::WorkItemLeaseError::Store(_) | opscore_leases::WorkItemLeaseError::Event(_) => {
                ReasonCode::InternalError
            }
        };
        Self::new(reason, err.to_string())
    }
}

impl From<opscore_policy::ApprovalError> for ContractError {
    fn from(err: opscore_policy::ApprovalError) -> Self {
        let reason = match err {
            opscore_policy::ApprovalError::NotFound => ReasonCode::UnknownAgent,
            opscore_policy::ApprovalError::InvalidDecision(_) => ReasonCode::MissingRequiredField,
            opscore_policy::ApprovalError::Store(_) | opscore_policy::ApprovalError::Event(_) => {
                ReasonCode::InternalError
            }
        };
        Self::new(reason, err.to_string())
    }
}

impl From<opscore_policy::DataAccessError> for ContractError {
    fn from(err: opscore_policy::DataAccessError) -> Self {
        Self::new(ReasonCode::InternalError, err.to_string())
    }
}

impl From<opscore_trust::AutonomyError> for ContractError {
    fn from(err: opscore_trust::AutonomyError) -> Self {
        let reason = match err {
            opscore_trust::AutonomyError::NotFound => ReasonCode::UnknownAgent,
            opscore_trust::AutonomyError::RecommendationNotPending => ReasonCode::MissingRequiredField,
            opscore_trust::AutonomyError::Store(_) | opscore_trust::AutonomyError::Event(_) => {
                ReasonCode::InternalError
            }
        };
        Self::new(reason, err.to_string())
    }
}

impl From<opscore_trust::SkillsError> for ContractError {
    fn from(err: opscore_trust::SkillsError) -> Self {
        let reason = match err {
            opscore_trust::SkillsError::PackageNotFound | opscore_trust::SkillsError::AgentSkillNotFound => {
                ReasonCode::UnknownAgent
            }
            opscore_trust::SkillsError::NoSkillsToSelect => ReasonCode::MissingRequiredField,
            opscore_trust::SkillsError::Store(_) | opscore_trust::SkillsError::Event(_) => ReasonCode::InternalError,
        };
        Self::new(reason, err.to_string())
    }
}

impl From<opscore_trust::TrustError> for ContractError {
    fn from(err: opscore_trust::TrustError) -> Self {
        Self::new(ReasonCode::InternalError, err.to_string())
    }
}

impl From<opscore_incidents::ExperimentError> for ContractError {
    fn from(err: opscore_incidents::ExperimentError) -> Self {
        let reason = match err {
            opscore_incidents::ExperimentError::NotFound => ReasonCode::UnknownAgent,
            opscore_incidents::ExperimentError::NotOpen => ReasonCode::MissingRequiredField,
            opscore_incidents::ExperimentError::ActiveRunsBlockClose => ReasonCode::ExperimentHasActiveRuns,
            opscore_incidents::ExperimentError::Store(_) | opscore_incidents::ExperimentError::Event(_) => {
                ReasonCode::InternalError
            }
        };
        Self::new(reason, err.to_string())
    }
}

impl From<opscore_incidents::IncidentError> for ContractError {
    fn from(err: opscore_incidents::IncidentError) -> Self {
        let reason = match err {
            opscore_incidents::IncidentError::NotFound => ReasonCode::UnknownAgent,
            opscore_incidents::IncidentError::NotOpen
            | opscore_incidents::IncidentError::RcaPayloadEmpty
            | opscore_incidents::IncidentError::LearningNoteEmpty => ReasonCode::MissingRequiredField,
            opscore_incidents::IncidentError::CloseBlockedMissingRca => {
                ReasonCode::IncidentCloseBlockedMissingRca
            }
            opscore_incidents::IncidentError::CloseBlockedMissingLearning => {
                ReasonCode::IncidentCloseBlockedMissingLearning
            }
            opscore_incidents::IncidentError::Store(_) | opscore_incidents::IncidentError::Event(_) => {
                ReasonCode::InternalError
            }
        };
        Self::new(reason, err.to_string())
    }
}

impl From<opscore_pipeline::PipelineError> for ContractError {
    fn from(err: opscore_pipeline::PipelineError) -> Self {
        Self::new(ReasonCode::InternalError, err.to_string())
    }
}

/// Builds the `{reason_code, message, details}` JSON body a client receives,
/// per spec §4.11.
#[must_use]
pub fn to_response_body(err: &ContractError) -> Value {
    json!({
        "reason_code": err.reason_code.as_str(),
        "message": err.message,
        "details": err.details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_version_mismatch_maps_to_409() {
        let err = ContractError::from(opscore_leases::WorkItemLeaseError::LeaseVersionMismatch);
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.reason_code.as_str(), "lease_version_mismatch");
    }

    #[test]
    fn incident_close_missing_rca_maps_to_its_own_reason_code() {
        let err = ContractError::from(opscore_incidents::IncidentError::CloseBlockedMissingRca);
        assert_eq!(err.reason_code.as_str(), "incident_close_blocked_missing_rca");
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn response_body_carries_all_three_fields() {
        let err = ContractError::new(ReasonCode::MissingWorkspaceHeader, "x-workspace-id is required");
        let body = to_response_body(&err);
        assert_eq!(body["reason_code"], "missing_workspace_header");
        assert_eq!(body["message"], "x-workspace-id is required");
        assert!(body["details"].is_null());
    }
}
