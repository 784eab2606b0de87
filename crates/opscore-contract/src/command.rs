// crates/opscore-contract/src/command.rs
// ============================================================================
// Module: Command Surface
// Description: The typed request/response DTOs for every route in spec §6's
//              command-surface table, and the `Command` enum that names them.
// Purpose: Give `opscore-engine` and `opscore-cli` one shared, serializable
//          vocabulary for "what a caller asked for" independent of whether
//          the caller arrived over a wire protocol or a local subcommand.
// Dependencies: serde, serde_json
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Every command this platform accepts, paired with its request payload.
///
/// # Invariants
/// - Every variant corresponds to exactly one row of the command-surface
///   table; a caller names one variant per request, never a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// `POST /v1/agents`
    RegisterAgent(RegisterAgentRequest),
    /// `POST /v1/agents/:id/quarantine`
    QuarantineAgent(QuarantineAgentRequest),
    /// `POST /v1/agents/:id/skills/import`
    ImportSkill(ImportSkillRequest),
    /// `POST /v1/egress/requests`
    RequestEgress(RequestEgressRequest),
    /// `POST /v1/data/access/requests`
    RequestDataAccess(RequestDataAccessRequest),
    /// `POST /v1/incidents` (open)
    OpenIncident(OpenIncidentRequest),
    /// `POST /v1/incidents/:id/rca`
    UpdateIncidentRca(UpdateIncidentRcaRequest),
    /// `POST /v1/incidents/:id/learning`
    LogIncidentLearning(LogIncidentLearningRequest),
    /// `POST /v1/incidents/:id/close`
    CloseIncident(CloseIncidentRequest),
    /// `POST /v1/experiments`
    CreateExperiment(CreateExperimentRequest),
    /// `POST /v1/experiments/update`
    UpdateExperiment(UpdateExperimentRequest),
    /// `POST /v1/experiments/close`
    CloseExperiment(CloseExperimentRequest),
    /// `POST /v1/runs`
    CreateRun(CreateRunRequest),
    /// `POST /v1/runs/claim`
    ClaimRun(ClaimRunRequest),
    /// `POST /v1/runs/:id/start`
    StartRun(RunIdRequest),
    /// `POST /v1/runs/:id/complete`
    CompleteRun(CompleteRunRequest),
    /// `POST /v1/runs/:id/fail`
    FailRun(FailRunRequest),
    /// `POST /v1/runs/:id/lease/heartbeat`
    HeartbeatRunLease(HeartbeatRunLeaseRequest),
    /// `POST /v1/runs/:id/lease/release`
    ReleaseRunLease(ReleaseRunLeaseRequest),
    /// `POST /v1/work-items/claim`
    ClaimWorkItem(ClaimWorkItemRequest),
    /// `POST /v1/work-items/heartbeat`
    HeartbeatWorkItem(HeartbeatWorkItemRequest),
    /// `POST /v1/work-items/release`
    ReleaseWorkItem(ReleaseWorkItemRequest),
    /// `POST /v1/approvals`
    RequestApproval(RequestApprovalRequest),
    /// `POST /v1/approvals/:id/decide`
    DecideApproval(DecideApprovalRequest),
    /// `GET /v1/pipeline/projection`
    ReadPipelineProjection(ReadPipelineProjectionRequest),
    /// `POST /v1/system/health`
    CheckHealth(CheckHealthRequest),
}

/// Fields present on every command body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// The schema version the caller built this body against.
    pub schema_version: u32,
    /// The workspace this command is scoped to; mirrored against the
    /// `x-workspace-id` header during gating.
    pub workspace_id: Option<String>,
    /// The idempotency key the caller supplied, if any; absent when the
    /// engine should synthesize one via [`crate::idempotency`].
    pub idempotency_key: Option<String>,
}

/// `POST /v1/agents`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterAgentRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The agent's chosen identifier.
    pub agent_id: String,
    /// The principal this agent is registered under.
    pub principal_id: String,
    /// A human-readable display name.
    pub display_name: Option<String>,
}

/// `POST /v1/agents/:id/quarantine`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineAgentRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The agent to quarantine.
    pub agent_id: String,
    /// Why the agent is being quarantined.
    pub reason: String,
}

/// `POST /v1/agents/:id/skills/import`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSkillRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The skill package's identifier.
    pub skill_package_id: String,
    /// The package's declared name.
    pub name: String,
    /// The package's declared version.
    pub version: String,
    /// The package artifact's content hash.
    pub hash: String,
    /// The package manifest.
    pub manifest: Value,
    /// An optional publisher signature over `hash`.
    pub signature: Option<String>,
    /// The correlation id this import participates in.
    pub correlation_id: String,
}

/// `POST /v1/egress/requests`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEgressRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The agent requesting egress.
    pub agent_id: String,
    /// The destination being requested.
    pub destination: String,
    /// The room this request is scoped to.
    pub room_id: String,
    /// The correlation id this request participates in.
    pub correlation_id: String,
}

/// `POST /v1/data/access/requests`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDataAccessRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The room this request is scoped to.
    pub room_id: String,
    /// Purpose tags the accessed resource carries.
    pub resource_purpose_tags: Vec<String>,
    /// Purpose tags the requester declares.
    pub request_purpose_tags: Vec<String>,
    /// An optional justification for a declared mismatch.
    pub justification: Option<String>,
    /// The correlation id this request participates in.
    pub correlation_id: String,
}

/// `POST /v1/incidents`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIncidentRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The incident's identifier.
    pub incident_id: String,
    /// The incident's severity.
    pub severity: String,
    /// The run this incident originates from, if any.
    pub run_id: Option<String>,
    /// The room this incident is scoped to, if not inherited from `run_id`.
    pub room_id: Option<String>,
    /// The thread this incident is scoped to, if not inherited from `run_id`.
    pub thread_id: Option<String>,
    /// The correlation id this incident participates in.
    pub correlation_id: String,
}

/// `POST /v1/incidents/:id/rca`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateIncidentRcaRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The incident being updated.
    pub incident_id: String,
    /// The root-cause-analysis payload.
    pub payload: Value,
    /// The correlation id this update participates in.
    pub correlation_id: String,
}

/// `POST /v1/incidents/:id/learning`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogIncidentLearningRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The incident this learning note is attached to.
    pub incident_id: String,
    /// The learning note's text.
    pub note: String,
    /// The correlation id this log entry participates in.
    pub correlation_id: String,
}

/// `POST /v1/incidents/:id/close`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseIncidentRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The incident being closed.
    pub incident_id: String,
    /// The correlation id this close participates in.
    pub correlation_id: String,
}

/// `POST /v1/experiments`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExperimentRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The experiment's identifier.
    pub experiment_id: String,
    /// The room this experiment is scoped to.
    pub room_id: String,
    /// The experiment's title.
    pub title: String,
    /// The experiment's hypothesis.
    pub hypothesis: String,
    /// Criteria that would count the experiment a success.
    pub success_criteria: Vec<String>,
    /// Conditions under which the experiment should be stopped early.
    pub stop_conditions: Vec<String>,
    /// The experiment's budget cap, in whatever unit this workspace tracks.
    pub budget_cap_units: u64,
    /// The experiment's declared risk tier.
    pub risk_tier: String,
    /// The correlation id this creation participates in.
    pub correlation_id: String,
}

/// `POST /v1/experiments/update`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateExperimentRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The experiment being updated.
    pub experiment_id: String,
    /// A new title, if changing.
    pub title: Option<String>,
    /// A corrected active-run count, if the caller is reconciling drift.
    pub active_run_count: Option<u32>,
    /// The correlation id this update participates in.
    pub correlation_id: String,
}

/// `POST /v1/experiments/close`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseExperimentRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The experiment being closed.
    pub experiment_id: String,
    /// When `true`, closes even if active runs remain outstanding.
    pub force: bool,
    /// The correlation id this close participates in.
    pub correlation_id: String,
}

/// `POST /v1/runs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRunRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The run's identifier.
    pub run_id: String,
    /// The experiment this run belongs to, if any.
    pub experiment_id: Option<String>,
    /// The room this run is scoped to.
    pub room_id: String,
    /// The thread this run is scoped to.
    pub thread_id: String,
    /// The run's title.
    pub title: String,
    /// The run's goal.
    pub goal: String,
    /// Arbitrary run input.
    pub input: Option<Value>,
    /// Free-form tags carried on the run.
    pub tags: Option<Vec<String>>,
    /// The correlation id this run participates in.
    pub correlation_id: String,
}

/// `POST /v1/runs/claim`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRunRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The run being claimed.
    pub run_id: String,
    /// The engine claiming the run.
    pub engine_id: String,
    /// The principal on whose behalf the claim is made.
    pub claimer_principal_id: String,
}

/// A request naming only the run it targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIdRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The run being targeted.
    pub run_id: String,
    /// The correlation id this action participates in.
    pub correlation_id: String,
}

/// `POST /v1/runs/:id/complete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRunRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The run completing.
    pub run_id: String,
    /// The run's result payload.
    pub result: Value,
    /// The correlation id this completion participates in.
    pub correlation_id: String,
}

/// `POST /v1/runs/:id/fail`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailRunRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The run failing.
    pub run_id: String,
    /// Why the run failed.
    pub reason: String,
    /// The correlation id this failure participates in.
    pub correlation_id: String,
}

/// `POST /v1/runs/:id/lease/heartbeat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRunLeaseRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The run whose lease is being extended.
    pub run_id: String,
    /// The claim token the lease was issued under.
    pub claim_token: String,
}

/// `POST /v1/runs/:id/lease/release`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRunLeaseRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The run whose lease is being released.
    pub run_id: String,
    /// The claim token the lease was issued under.
    pub claim_token: String,
    /// Why the lease is being released.
    pub released_reason: String,
}

/// `POST /v1/work-items/claim`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimWorkItemRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The work item's type (`experiment`, `approval`, `message`, `incident`, `artifact`).
    pub work_item_type: String,
    /// The work item's identifier.
    pub work_item_id: String,
    /// The agent claiming the item.
    pub agent_id: String,
    /// The correlation id this claim participates in.
    pub correlation_id: String,
}

/// `POST /v1/work-items/heartbeat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatWorkItemRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The work item's type.
    pub work_item_type: String,
    /// The work item's identifier.
    pub work_item_id: String,
    /// The agent holding the lease.
    pub agent_id: String,
    /// The lease version the caller last observed.
    pub expected_version: u32,
}

/// `POST /v1/work-items/release`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseWorkItemRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The work item's type.
    pub work_item_type: String,
    /// The work item's identifier.
    pub work_item_id: String,
    /// The agent releasing the lease.
    pub agent_id: String,
    /// The lease version the caller last observed.
    pub expected_version: u32,
}

/// `POST /v1/approvals`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestApprovalRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The room this approval is scoped to.
    pub room_id: String,
    /// The approval's identifier.
    pub approval_id: String,
    /// The action code being gated.
    pub action_code: String,
    /// The approval's scope.
    pub scope: String,
    /// A snapshot of the scope at request time.
    pub scope_snapshot: Value,
    /// When this approval request expires, if it does.
    pub expires_at: Option<String>,
    /// The correlation id this request participates in.
    pub correlation_id: String,
}

/// `POST /v1/approvals/:id/decide`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideApprovalRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// The approval being decided.
    pub approval_id: String,
    /// `approve`, `deny`, or `hold`.
    pub decision: String,
    /// The correlation id this decision participates in.
    pub correlation_id: String,
}

/// `GET /v1/pipeline/projection`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadPipelineProjectionRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// Restricts the page to a single stage, if set.
    pub stage: Option<String>,
    /// An opaque pagination cursor from a previous page.
    pub cursor: Option<String>,
    /// The requested page size, clamped to `[1, 200]`.
    pub limit: Option<u32>,
    /// `"flat"` or `"envelope"`; defaults to `"flat"`.
    pub format: Option<String>,
}

/// `POST /v1/system/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckHealthRequest {
    /// Shared command fields.
    #[serde(flatten)]
    pub envelope: Envelope,
    /// When `true`, runs the deeper per-subsystem checks rather than the summary alone.
    pub include_checks: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_json_with_its_tag() {
        let command = Command::QuarantineAgent(QuarantineAgentRequest {
            envelope: Envelope { schema_version: 1, workspace_id: Some("ws-1".to_string()), idempotency_key: None },
            agent_id: "agent-1".to_string(),
            reason: "repeated policy violations".to_string(),
        });
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["command"], "quarantine_agent");
        assert_eq!(json["agent_id"], "agent-1");
        let round_tripped: Command = serde_json::from_value(json).unwrap();
        assert!(matches!(round_tripped, Command::QuarantineAgent(_)));
    }

    #[test]
    fn pipeline_projection_request_defaults_its_optional_fields_to_none() {
        let json = serde_json::json!({
            "command": "read_pipeline_projection",
            "schema_version": 1,
            "workspace_id": "ws-1",
            "idempotency_key": null,
            "stage": null,
            "cursor": null,
            "limit": null,
            "format": null,
        });
        let command: Command = serde_json::from_value(json).unwrap();
        let Command::ReadPipelineProjection(request) = command else {
            panic!("expected ReadPipelineProjection");
        };
        assert!(request.stage.is_none());
        assert!(request.cursor.is_none());
    }
}
