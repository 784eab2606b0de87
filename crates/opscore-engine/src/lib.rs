// crates/opscore-engine/src/lib.rs
// ============================================================================
// Module: Ops Core Engine Façade
// Description: The in-process command dispatcher binding every domain crate
//              to the typed `Command` surface from `opscore-contract`.
// Purpose: Stand in for the HTTP router spec.md explicitly places out of
//          scope: one `Engine::handle(Command)` entry point a thin adapter
//          crate (or `opscore-cli`) can call directly, matching the
//          teacher's explicit-handler-struct-over-closure design note.
// Dependencies: opscore_{contract,core,store,leases,policy,trust,incidents,pipeline}
// ============================================================================

//! ## Overview
//! [`Engine`] owns the one [`opscore_store::Database`] handle and the
//! process [`opscore_contract::EngineConfig`]; [`Engine::bootstrap`] creates
//! every domain crate's schema once, and [`Engine::handle`] is the single
//! dispatch point translating a [`opscore_contract::Command`] into a call
//! against the owning domain crate, then into the `serde_json::Value` a
//! caller receives. No domain crate here holds its own `Database` — this is
//! the one place above all of them, following `agents.rs`'s precedent of
//! owning the tables no domain crate claims (the `agents` table here, and
//! now the raw `run.*` event emission no domain crate owns either).

pub mod agents;
pub mod health;

use opscore_contract::CommandEnvelope;
use opscore_contract::ContractError;
use opscore_contract::ReasonCode;
use opscore_contract::command::Command;
use opscore_core::Actor;
use opscore_core::CorrelationId;
use opscore_core::EngineId;
use opscore_core::ExperimentId;
use opscore_core::IncidentId;
use opscore_core::PrincipalId;
use opscore_core::RiskTier;
use opscore_core::Run;
use opscore_core::RunId;
use opscore_core::Timestamp;
use opscore_core::WorkspaceId;
use opscore_core::AgentId;
use opscore_core::IncidentSeverity;
use opscore_core::NewEvent;
use opscore_core::StreamRef;
use opscore_core::WorkItemType;
use opscore_core::capability::Agent;
use opscore_store::Database;
use opscore_store::StoreError;
use opscore_store::append_to_stream;
use opscore_store::ProjectorRegistry;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde_json::Value;
use serde_json::json;

use crate::agents::AgentError;

/// The only `schema_version` this build accepts.
const SUPPORTED_SCHEMA_VERSION: u32 = 1;

/// The in-process command dispatcher over every domain crate.
pub struct Engine {
    db: Database,
    config: opscore_contract::EngineConfig,
}

impl Engine {
    /// Builds an engine over an already-open database.
    #[must_use]
    pub fn new(db: Database, config: opscore_contract::EngineConfig) -> Self {
        Self { db, config }
    }

    /// Creates every domain crate's schema, idempotently.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError`] if any underlying schema creation fails.
    pub fn bootstrap(&self) -> Result<(), ContractError> {
        self.db.with_tx::<_, ContractError>(|tx| {
            opscore_store::ensure_event_schema(tx)?;
            ProjectorRegistry::ensure_schema(tx)?;
            opscore_store::catchup::ensure_schema(tx)
                .map_err(|err| ContractError::new(ReasonCode::InternalError, err.to_string()))?;
            opscore_store::watermark::ensure_schema(tx)?;
            opscore_leases::work_item::ensure_schema(tx)?;
            opscore_trust::ensure_schema(tx)?;
            opscore_pipeline::ensure_schema(tx)?;
            agents::ensure_schema(tx)?;
            Ok(())
        })
    }

    /// Dispatches one command, returning its JSON response body.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError`] on any gating, domain, or storage failure.
    pub fn handle(&self, command: Command) -> Result<Value, ContractError> {
        let now = Timestamp::now();
        match command {
            Command::RegisterAgent(req) => self.register_agent(req, now),
            Command::QuarantineAgent(req) => self.quarantine_agent(req, now),
            Command::ImportSkill(req) => self.import_skill(req, now),
            Command::RequestEgress(req) => self.request_egress(req, now),
            Command::RequestDataAccess(req) => self.request_data_access(req, now),
            Command::OpenIncident(req) => self.open_incident(req, now),
            Command::UpdateIncidentRca(req) => self.update_incident_rca(req, now),
            Command::LogIncidentLearning(req) => self.log_incident_learning(req, now),
            Command::CloseIncident(req) => self.close_incident(req, now),
            Command::CreateExperiment(req) => self.create_experiment(req, now),
            Command::UpdateExperiment(req) => self.update_experiment(req, now),
            Command::CloseExperiment(req) => self.close_experiment(req, now),
            Command::CreateRun(req) => self.create_run(req, now),
            Command::ClaimRun(req) => self.claim_run(req, now),
            Command::StartRun(req) => self.start_run(req, now),
            Command::CompleteRun(req) => self.complete_run(req, now),
            Command::FailRun(req) => self.fail_run(req, now),
            Command::HeartbeatRunLease(req) => self.heartbeat_run_lease(req, now),
            Command::ReleaseRunLease(req) => self.release_run_lease(req, now),
            Command::ClaimWorkItem(req) => self.claim_work_item(req, now),
            Command::HeartbeatWorkItem(req) => self.heartbeat_work_item(req, now),
            Command::ReleaseWorkItem(req) => self.release_work_item(req, now),
            Command::RequestApproval(req) => self.request_approval(req, now),
            Command::DecideApproval(req) => self.decide_approval(req, now),
            Command::ReadPipelineProjection(req) => self.read_pipeline_projection(&req),
            Command::CheckHealth(req) => self.check_health(&req),
        }
    }

    fn gated_workspace(&self, envelope: &CommandEnvelope) -> Result<WorkspaceId, ContractError> {
        opscore_contract::assert_supported_schema_version(envelope.schema_version, SUPPORTED_SCHEMA_VERSION)?;
        let raw = opscore_contract::require_field(envelope.workspace_id.as_deref(), "workspace_id")?;
        Ok(WorkspaceId::new(raw))
    }

    fn engine_actor(&self) -> Actor {
        Actor::service("opscore-engine")
    }

    // -- Agents ------------------------------------------------------------

    fn register_agent(
        &self,
        req: opscore_contract::command::RegisterAgentRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let agent_id = AgentId::new(req.agent_id);
        let principal_id = PrincipalId::new(req.principal_id);
        let display_name = req.display_name.unwrap_or_else(|| agent_id.as_str().to_string());
        let correlation_id = CorrelationId::new(format!("agent.register:{}", agent_id.as_str()));
        let agent = agents::register(
            &self.db,
            &workspace_id,
            &agent_id,
            &principal_id,
            &display_name,
            &correlation_id,
            &self.engine_actor(),
            now,
        )
        .map_err(engine_agent_error)?;
        Ok(agent_json(&agent))
    }

    fn quarantine_agent(
        &self,
        req: opscore_contract::command::QuarantineAgentRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let agent_id = AgentId::new(req.agent_id);
        let correlation_id = CorrelationId::new(format!("agent.quarantine:{}", agent_id.as_str()));
        let agent = agents::quarantine(
            &self.db,
            &workspace_id,
            &agent_id,
            &req.reason,
            &correlation_id,
            &self.engine_actor(),
            now,
        )
        .map_err(engine_agent_error)?;
        Ok(agent_json(&agent))
    }

    // -- Skills --------------------------------------------------------------

    fn import_skill(
        &self,
        req: opscore_contract::command::ImportSkillRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let skill_package_id = opscore_core::SkillPackageId::new(req.skill_package_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let package = opscore_trust::import(
            &self.db,
            &workspace_id,
            &skill_package_id,
            &req.name,
            &req.version,
            &req.hash,
            req.manifest,
            req.signature.as_deref(),
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(serde_json::to_value(&package).unwrap_or(Value::Null))
    }

    // -- Policy: egress and data access --------------------------------------

    fn request_egress(
        &self,
        req: opscore_contract::command::RequestEgressRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let agent_id = AgentId::new(req.agent_id.clone());
        let correlation_id = CorrelationId::new(req.correlation_id);

        let agent = agents::load(&self.db, &workspace_id, &agent_id)
            .map_err(ContractError::from)?
            .ok_or_else(|| ContractError::new(ReasonCode::UnknownAgent, "no such agent in this workspace"))?;

        // No capability-token issuance/storage exists anywhere in this
        // workspace; the engine grants an implicit scope covering exactly
        // the room and destination requested, so the zone/kill-switch/quota
        // gates below do the actual gating rather than scope coverage.
        let scope = opscore_core::CapabilityScope {
            rooms: vec![req.room_id.clone()],
            egress_domains: vec![req.destination.clone()],
            ..opscore_core::CapabilityScope::default()
        };
        let action = egress_action_registry_entry();
        let request_shape = opscore_policy::RequestShape {
            room: Some(req.room_id.clone()),
            egress_domain: Some(req.destination.clone()),
            ..opscore_policy::RequestShape::default()
        };
        let ctx = opscore_policy::AuthorizeContext {
            kill_switch_active: false,
            agent_quarantined: agent.quarantined_at.is_some(),
            caller_zone: opscore_policy::Zone::Supervised,
            egress_quota_exceeded: false,
            enforce_mode: true,
        };
        let outcome = opscore_policy::authorize(&action, &scope, true, &request_shape, &ctx);

        let stream = StreamRef::room(req.room_id.clone());
        let event = NewEvent::new(
            egress_event_type(&outcome),
            1,
            workspace_id.clone(),
            Actor::agent(agent_id.as_str(), agent.principal_id.clone()),
            stream,
            correlation_id.clone(),
            json!({
                "agent_id": agent_id.as_str(),
                "destination": req.destination,
                "room_id": req.room_id,
                "decision": outcome.decision,
                "reason_code": outcome.reason_code,
            }),
            now,
        );
        self.db.with_tx::<_, ContractError>(|tx| {
            append_to_stream(tx, event)?;
            Ok(())
        })?;

        if outcome.decision == opscore_policy::Decision::RequireApproval {
            let approval_id = format!("egress:{}:{}", req.agent_id, req.destination);
            opscore_policy::request(
                &self.db,
                &workspace_id,
                &req.room_id,
                &approval_id,
                "egress.request",
                opscore_policy::ApprovalScope::Once,
                json!({ "agent_id": req.agent_id, "destination": req.destination }),
                None,
                &correlation_id,
                &self.engine_actor(),
                now,
            )?;
        }

        Ok(serde_json::to_value(&outcome).unwrap_or(Value::Null))
    }

    fn request_data_access(
        &self,
        req: opscore_contract::command::RequestDataAccessRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let correlation_id = CorrelationId::new(req.correlation_id);
        let outcome = opscore_policy::evaluate_and_record(
            &self.db,
            &workspace_id,
            &req.room_id,
            &req.resource_purpose_tags,
            &req.request_purpose_tags,
            req.justification.as_deref(),
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(json!({ "mismatch": outcome.mismatch, "justified": outcome.justified }))
    }

    // -- Incidents -----------------------------------------------------------

    fn open_incident(
        &self,
        req: opscore_contract::command::OpenIncidentRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let severity: IncidentSeverity = serde_json::from_value(Value::String(req.severity))
            .map_err(|_| ContractError::new(ReasonCode::MissingRequiredField, "invalid incident severity"))?;
        let incident_id = IncidentId::new(req.incident_id);
        let run_id = req.run_id.map(RunId::new);
        let room_id = req.room_id.map(opscore_core::RoomId::new);
        let thread_id = req.thread_id.map(opscore_core::ThreadId::new);
        let correlation_id = CorrelationId::new(req.correlation_id.clone());
        let incident = opscore_incidents::open_incident(
            &self.db,
            &workspace_id,
            &incident_id,
            severity,
            run_id.as_ref(),
            room_id.as_ref(),
            thread_id.as_ref(),
            Some(req.correlation_id.as_str()),
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(serde_json::to_value(&incident).unwrap_or(Value::Null))
    }

    fn update_incident_rca(
        &self,
        req: opscore_contract::command::UpdateIncidentRcaRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let incident_id = IncidentId::new(req.incident_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let incident = opscore_incidents::update_rca(
            &self.db,
            &workspace_id,
            &incident_id,
            req.payload,
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(serde_json::to_value(&incident).unwrap_or(Value::Null))
    }

    fn log_incident_learning(
        &self,
        req: opscore_contract::command::LogIncidentLearningRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let incident_id = IncidentId::new(req.incident_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let incident = opscore_incidents::log_learning(
            &self.db,
            &workspace_id,
            &incident_id,
            &req.note,
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(serde_json::to_value(&incident).unwrap_or(Value::Null))
    }

    fn close_incident(
        &self,
        req: opscore_contract::command::CloseIncidentRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let incident_id = IncidentId::new(req.incident_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let incident = opscore_incidents::close_incident(
            &self.db,
            &workspace_id,
            &incident_id,
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(serde_json::to_value(&incident).unwrap_or(Value::Null))
    }

    // -- Experiments -----------------------------------------------------------

    fn create_experiment(
        &self,
        req: opscore_contract::command::CreateExperimentRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let risk_tier: RiskTier = serde_json::from_value(Value::String(req.risk_tier))
            .map_err(|_| ContractError::new(ReasonCode::MissingRequiredField, "invalid risk tier"))?;
        let experiment_id = ExperimentId::new(req.experiment_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let experiment = opscore_incidents::create_experiment(
            &self.db,
            &workspace_id,
            &experiment_id,
            &req.room_id,
            &req.title,
            &req.hypothesis,
            &req.success_criteria,
            &req.stop_conditions,
            req.budget_cap_units,
            risk_tier,
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(serde_json::to_value(&experiment).unwrap_or(Value::Null))
    }

    fn update_experiment(
        &self,
        req: opscore_contract::command::UpdateExperimentRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let experiment_id = ExperimentId::new(req.experiment_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let experiment = opscore_incidents::update_experiment(
            &self.db,
            &workspace_id,
            &experiment_id,
            req.title.as_deref(),
            req.active_run_count,
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(serde_json::to_value(&experiment).unwrap_or(Value::Null))
    }

    fn close_experiment(
        &self,
        req: opscore_contract::command::CloseExperimentRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let experiment_id = ExperimentId::new(req.experiment_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let experiment = opscore_incidents::close_experiment(
            &self.db,
            &workspace_id,
            &experiment_id,
            req.force,
            None,
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(serde_json::to_value(&experiment).unwrap_or(Value::Null))
    }

    // -- Runs ------------------------------------------------------------------

    fn create_run(
        &self,
        req: opscore_contract::command::CreateRunRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let run_id = RunId::new(req.run_id.clone());
        let correlation_id = CorrelationId::new(req.correlation_id);
        let event = NewEvent::new(
            "run.created",
            1,
            workspace_id.clone(),
            self.engine_actor(),
            StreamRef::room(req.room_id.clone()),
            correlation_id,
            json!({
                "run_id": req.run_id,
                "room_id": req.room_id,
                "thread_id": req.thread_id,
                "title": req.title,
                "goal": req.goal,
                "experiment_id": req.experiment_id,
                "input": req.input,
                "tags": req.tags,
            }),
            now,
        );
        self.db.with_tx::<_, ContractError>(|tx| {
            let persisted = append_to_stream(tx, event)?;
            ProjectorRegistry::apply(tx, &persisted)?;
            opscore_pipeline::apply(tx, &persisted)?;
            Ok(())
        })?;
        let run = self.load_run(&run_id)?;
        Ok(serde_json::to_value(&run).unwrap_or(Value::Null))
    }

    fn claim_run(
        &self,
        req: opscore_contract::command::ClaimRunRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        self.gated_workspace(&req.envelope)?;
        let run_id = RunId::new(req.run_id);
        let engine_id = EngineId::new(req.engine_id);
        let claimer_principal_id = PrincipalId::new(req.claimer_principal_id);
        let claim = opscore_leases::claim_run(
            &self.db,
            &run_id,
            &engine_id,
            &claimer_principal_id,
            self.config.lease_duration.as_secs().try_into().unwrap_or(i64::MAX),
            now,
        )?;
        Ok(json!({
            "claim_token": claim.claim_token,
            "attempt_no": claim.attempt_no,
            "lease_expires_at": render_ts(&claim.lease_expires_at)?,
            "preempted_previous": claim.preempted_previous,
        }))
    }

    fn start_run(
        &self,
        req: opscore_contract::command::RunIdRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        self.gated_workspace(&req.envelope)?;
        let run_id = RunId::new(req.run_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let room_id = self.load_run_room(&run_id)?;
        let event = NewEvent::new(
            "run.started",
            1,
            self.load_run_workspace(&run_id)?,
            self.engine_actor(),
            StreamRef::room(room_id),
            correlation_id,
            json!({ "run_id": run_id.as_str() }),
            now,
        );
        self.db.with_tx::<_, ContractError>(|tx| {
            let persisted = append_to_stream(tx, event)?;
            ProjectorRegistry::apply(tx, &persisted)?;
            opscore_pipeline::apply(tx, &persisted)?;
            Ok(())
        })?;
        let run = self.load_run(&run_id)?;
        Ok(serde_json::to_value(&run).unwrap_or(Value::Null))
    }

    fn complete_run(
        &self,
        req: opscore_contract::command::CompleteRunRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        self.gated_workspace(&req.envelope)?;
        let run_id = RunId::new(req.run_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let room_id = self.load_run_room(&run_id)?;
        let event = NewEvent::new(
            "run.completed",
            1,
            self.load_run_workspace(&run_id)?,
            self.engine_actor(),
            StreamRef::room(room_id),
            correlation_id,
            json!({ "run_id": run_id.as_str(), "output": req.result }),
            now,
        );
        self.db.with_tx::<_, ContractError>(|tx| {
            let persisted = append_to_stream(tx, event)?;
            ProjectorRegistry::apply(tx, &persisted)?;
            opscore_pipeline::apply(tx, &persisted)?;
            Ok(())
        })?;
        let run = self.load_run(&run_id)?;
        Ok(serde_json::to_value(&run).unwrap_or(Value::Null))
    }

    fn fail_run(
        &self,
        req: opscore_contract::command::FailRunRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        self.gated_workspace(&req.envelope)?;
        let run_id = RunId::new(req.run_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let room_id = self.load_run_room(&run_id)?;
        let event = NewEvent::new(
            "run.failed",
            1,
            self.load_run_workspace(&run_id)?,
            self.engine_actor(),
            StreamRef::room(room_id),
            correlation_id,
            json!({ "run_id": run_id.as_str(), "error": req.reason }),
            now,
        );
        self.db.with_tx::<_, ContractError>(|tx| {
            let persisted = append_to_stream(tx, event)?;
            ProjectorRegistry::apply(tx, &persisted)?;
            opscore_pipeline::apply(tx, &persisted)?;
            Ok(())
        })?;
        let run = self.load_run(&run_id)?;
        Ok(serde_json::to_value(&run).unwrap_or(Value::Null))
    }

    fn heartbeat_run_lease(
        &self,
        req: opscore_contract::command::HeartbeatRunLeaseRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        self.gated_workspace(&req.envelope)?;
        let run_id = RunId::new(req.run_id);
        let lease_expires_at = opscore_leases::run_lease::heartbeat_run(
            &self.db,
            &run_id,
            &req.claim_token,
            self.config.lease_duration.as_secs().try_into().unwrap_or(i64::MAX),
            now,
        )?;
        Ok(json!({ "lease_expires_at": render_ts(&lease_expires_at)? }))
    }

    fn release_run_lease(
        &self,
        req: opscore_contract::command::ReleaseRunLeaseRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        self.gated_workspace(&req.envelope)?;
        let run_id = RunId::new(req.run_id);
        opscore_leases::release_run(&self.db, &run_id, &req.claim_token, &req.released_reason, now)?;
        Ok(json!({ "released": true }))
    }

    // -- Work items --------------------------------------------------------------

    fn claim_work_item(
        &self,
        req: opscore_contract::command::ClaimWorkItemRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let work_item_type = parse_work_item_type(&req.work_item_type)?;
        let agent_id = AgentId::new(req.agent_id);
        let correlation_id = CorrelationId::new(req.correlation_id);
        let outcome = opscore_leases::work_item::claim(
            &self.db,
            &workspace_id,
            work_item_type,
            &req.work_item_id,
            &agent_id,
            &self.engine_actor(),
            &correlation_id,
            self.config.lease_duration.as_secs().try_into().unwrap_or(i64::MAX),
            now,
        )?;
        Ok(claim_outcome_json(&outcome))
    }

    fn heartbeat_work_item(
        &self,
        req: opscore_contract::command::HeartbeatWorkItemRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let work_item_type = parse_work_item_type(&req.work_item_type)?;
        let agent_id = AgentId::new(req.agent_id);
        let lease = opscore_leases::work_item::heartbeat(
            &self.db,
            &workspace_id,
            work_item_type,
            &req.work_item_id,
            &agent_id,
            req.expected_version,
            self.config.lease_duration.as_secs().try_into().unwrap_or(i64::MAX),
            self.config.heartbeat_min_interval.as_secs().try_into().unwrap_or(0),
            now,
        )?;
        Ok(serde_json::to_value(&lease).unwrap_or(Value::Null))
    }

    fn release_work_item(
        &self,
        req: opscore_contract::command::ReleaseWorkItemRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let work_item_type = parse_work_item_type(&req.work_item_type)?;
        let agent_id = AgentId::new(req.agent_id);
        opscore_leases::work_item::release(
            &self.db,
            &workspace_id,
            work_item_type,
            &req.work_item_id,
            &agent_id,
            req.expected_version,
            &self.engine_actor(),
            now,
        )?;
        Ok(json!({ "released": true }))
    }

    // -- Approvals -----------------------------------------------------------------

    fn request_approval(
        &self,
        req: opscore_contract::command::RequestApprovalRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let scope = parse_approval_scope(&req.scope)?;
        let expires_at = req
            .expires_at
            .map(|raw| Timestamp::parse_rfc3339(&raw))
            .transpose()
            .map_err(|err| ContractError::new(ReasonCode::MissingRequiredField, err.to_string()))?;
        let correlation_id = CorrelationId::new(req.correlation_id);
        let row = opscore_policy::request(
            &self.db,
            &workspace_id,
            &req.room_id,
            &req.approval_id,
            &req.action_code,
            scope,
            req.scope_snapshot,
            expires_at,
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(approval_row_json(&row))
    }

    fn decide_approval(
        &self,
        req: opscore_contract::command::DecideApprovalRequest,
        now: Timestamp,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let decision = parse_approval_decision(&req.decision)?;
        let room_id = self.load_approval_room(&workspace_id, &req.approval_id)?;
        let correlation_id = CorrelationId::new(req.correlation_id);
        let row = opscore_policy::decide(
            &self.db,
            &workspace_id,
            &room_id,
            &req.approval_id,
            decision,
            &opscore_policy::DecisionSource::Api,
            &correlation_id,
            &self.engine_actor(),
            now,
        )?;
        Ok(approval_row_json(&row))
    }

    // -- Pipeline ------------------------------------------------------------------

    fn read_pipeline_projection(
        &self,
        req: &opscore_contract::command::ReadPipelineProjectionRequest,
    ) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let stage = req.stage.as_deref().map(|raw| {
            opscore_pipeline::Stage::from_str(raw)
                .ok_or_else(|| ContractError::new(ReasonCode::MissingRequiredField, format!("unknown pipeline stage: {raw}")))
        }).transpose()?;
        let cursor = req.cursor.as_deref().map(decode_pipeline_cursor).transpose()?;
        let limit = req.limit.unwrap_or(200);
        let format_envelope = req.format.as_deref() == Some("envelope");

        let request = opscore_pipeline::query::PageRequest {
            workspace_id: workspace_id.into_inner(),
            stage,
            cursor,
            limit,
        };
        let envelope = self
            .db
            .with_conn::<_, ContractError>(|conn| Ok(opscore_pipeline::query::envelope(conn, &request, format_envelope)?))?;
        Ok(pipeline_envelope_json(&envelope))
    }

    fn check_health(&self, req: &opscore_contract::command::CheckHealthRequest) -> Result<Value, ContractError> {
        let workspace_id = self.gated_workspace(&req.envelope)?;
        let summary = health::health_summary(&self.db, &self.config, &workspace_id, req.include_checks);
        Ok(serde_json::to_value(&summary).unwrap_or(Value::Null))
    }

    // -- Shared reads ----------------------------------------------------------------

    fn load_run(&self, run_id: &RunId) -> Result<Run, ContractError> {
        self.db
            .with_tx::<_, ContractError>(|tx| read_run_row(tx, run_id).map_err(ContractError::from))?
            .ok_or_else(|| ContractError::new(ReasonCode::UnknownAgent, "no such run"))
    }

    fn load_run_room(&self, run_id: &RunId) -> Result<String, ContractError> {
        self.db
            .with_tx::<_, ContractError>(|tx| {
                tx.query_row("SELECT room_id FROM runs WHERE run_id = ?1", params![run_id.as_str()], |row| row.get(0))
                    .optional()
                    .map_err(|e| ContractError::from(StoreError::Db(e)))
            })?
            .ok_or_else(|| ContractError::new(ReasonCode::UnknownAgent, "no such run"))
    }

    fn load_run_workspace(&self, run_id: &RunId) -> Result<WorkspaceId, ContractError> {
        self.db
            .with_tx::<_, ContractError>(|tx| {
                tx.query_row("SELECT workspace_id FROM runs WHERE run_id = ?1", params![run_id.as_str()], |row| {
                    row.get::<_, String>(0)
                })
                .optional()
                .map_err(|e| ContractError::from(StoreError::Db(e)))
            })?
            .map(WorkspaceId::new)
            .ok_or_else(|| ContractError::new(ReasonCode::UnknownAgent, "no such run"))
    }

    /// Finds the room an approval was requested against by reading back the
    /// `approval.requested` event's own `room_id` column. `ApprovalRow`
    /// does not carry a room, and the `approvals` projection table has no
    /// such column either, so the event stream itself is the only place
    /// this binding survives.
    fn load_approval_room(&self, workspace_id: &WorkspaceId, approval_id: &str) -> Result<String, ContractError> {
        self.db
            .with_tx::<_, ContractError>(|tx| {
                tx.query_row(
                    "SELECT room_id FROM events
                     WHERE workspace_id = ?1 AND event_type = 'approval.requested'
                       AND json_extract(payload, '$.approval_id') = ?2
                     ORDER BY stream_position ASC LIMIT 1",
                    params![workspace_id.as_str(), approval_id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
                .map_err(|e| ContractError::from(StoreError::Db(e)))
            })?
            .flatten()
            .ok_or_else(|| ContractError::new(ReasonCode::UnknownAgent, "no such approval"))
    }
}

fn render_ts(ts: &Timestamp) -> Result<String, ContractError> {
    ts.to_rfc3339().map_err(|err| ContractError::new(ReasonCode::InternalError, err.to_string()))
}

fn engine_agent_error(err: AgentError) -> ContractError {
    let reason = match err {
        AgentError::NotFound => ReasonCode::UnknownAgent,
        // No reason code is dedicated to "identifier already taken"; the
        // nearest existing meaning is the generic claim conflict.
        AgentError::AlreadyRegistered => ReasonCode::AlreadyClaimed,
        AgentError::Store(_) | AgentError::Event(_) => ReasonCode::InternalError,
    };
    ContractError::new(reason, err.to_string())
}

fn agent_json(agent: &Agent) -> Value {
    json!({
        "agent_id": agent.agent_id.as_str(),
        "workspace_id": agent.workspace_id.as_str(),
        "principal_id": agent.principal_id.as_str(),
        "display_name": agent.display_name,
        "created_at": agent.created_at.to_rfc3339().unwrap_or_default(),
        "quarantined_at": agent.quarantined_at.and_then(|ts| ts.to_rfc3339().ok()),
        "quarantine_reason": agent.quarantine_reason,
        "revoked_at": agent.revoked_at.and_then(|ts| ts.to_rfc3339().ok()),
    })
}

/// The one egress-gated action this workspace's façade knows about. A real
/// deployment would look this up from a persisted action registry; none
/// exists in this workspace, so the entry is fixed here.
fn egress_action_registry_entry() -> opscore_policy::ActionRegistryEntry {
    opscore_policy::ActionRegistryEntry {
        action_type: "egress.request".to_string(),
        reversible: true,
        zone_required: opscore_policy::Zone::Supervised,
        requires_pre_approval: false,
        post_review_required: false,
        cost_impact: opscore_policy::CostImpact::Medium,
        recovery_difficulty: opscore_policy::RecoveryDifficulty::Moderate,
    }
}

fn egress_event_type(outcome: &opscore_policy::AuthorizeOutcome) -> &'static str {
    match outcome.decision {
        opscore_policy::Decision::Allow => "egress.allowed",
        opscore_policy::Decision::Deny => "egress.blocked",
        opscore_policy::Decision::RequireApproval => "egress.pending_approval",
    }
}

fn parse_work_item_type(raw: &str) -> Result<WorkItemType, ContractError> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| ContractError::new(ReasonCode::InvalidWorkItemType, format!("unknown work item type: {raw}")))
}

fn claim_outcome_json(outcome: &opscore_leases::work_item::ClaimOutcome) -> Value {
    match outcome {
        opscore_leases::work_item::ClaimOutcome::Claimed { lease, preempted_previous } => json!({
            "outcome": "claimed",
            "lease": lease,
            "preempted_previous": preempted_previous,
        }),
        opscore_leases::work_item::ClaimOutcome::Replayed { lease } => json!({
            "outcome": "replayed",
            "lease": lease,
        }),
    }
}

fn parse_approval_scope(raw: &str) -> Result<opscore_policy::ApprovalScope, ContractError> {
    match raw {
        "once" => Ok(opscore_policy::ApprovalScope::Once),
        "run" => Ok(opscore_policy::ApprovalScope::Run),
        "room" => Ok(opscore_policy::ApprovalScope::Room),
        "workspace" => Ok(opscore_policy::ApprovalScope::Workspace),
        "template" => Ok(opscore_policy::ApprovalScope::Template),
        other => Err(ContractError::new(ReasonCode::MissingRequiredField, format!("unknown approval scope: {other}"))),
    }
}

fn parse_approval_decision(raw: &str) -> Result<opscore_policy::ApprovalDecision, ContractError> {
    match raw {
        "approve" => Ok(opscore_policy::ApprovalDecision::Approve),
        "deny" => Ok(opscore_policy::ApprovalDecision::Deny),
        "hold" => Ok(opscore_policy::ApprovalDecision::Hold),
        other => Err(ContractError::new(ReasonCode::MissingRequiredField, format!("unknown approval decision: {other}"))),
    }
}

fn approval_row_json(row: &opscore_policy::ApprovalRow) -> Value {
    json!({
        "approval_id": row.approval_id,
        "workspace_id": row.workspace_id,
        "action_code": row.action_code,
        "scope": row.scope,
        "status": row.status,
        "decided_by": row.decided_by,
    })
}

/// The pagination cursor this façade hands back to callers is the three
/// ordering columns joined by a separator that cannot appear in a
/// timestamp or identifier in practice; it is opaque to the caller but not
/// cryptographically so, matching spec.md's "opaque to the client" wording
/// rather than a stronger guarantee it never asked for.
const CURSOR_SEPARATOR: char = '\u{1}';

fn encode_pipeline_cursor(cursor: &opscore_pipeline::query::Cursor) -> String {
    format!("{}{CURSOR_SEPARATOR}{}{CURSOR_SEPARATOR}{}", cursor.updated_at, cursor.entity_type, cursor.entity_id)
}

fn decode_pipeline_cursor(raw: &str) -> Result<opscore_pipeline::query::Cursor, ContractError> {
    let mut parts = raw.splitn(3, CURSOR_SEPARATOR);
    let (Some(updated_at), Some(entity_type), Some(entity_id)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ContractError::new(ReasonCode::MissingRequiredField, "malformed pipeline cursor"));
    };
    Ok(opscore_pipeline::query::Cursor {
        updated_at: updated_at.to_string(),
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
    })
}

fn pipeline_page_json(page: &opscore_pipeline::query::PageResult) -> Value {
    json!({
        "items": page.items.iter().map(|row| json!({
            "entity_type": row.entity_type,
            "entity_id": row.entity_id,
            "stage": row.stage,
            "diagnostic": row.diagnostic,
            "updated_at": row.updated_at,
        })).collect::<Vec<_>>(),
        "next_cursor": page.next_cursor.as_ref().map(encode_pipeline_cursor),
    })
}

fn pipeline_envelope_json(envelope: &opscore_pipeline::Envelope) -> Value {
    match envelope {
        opscore_pipeline::Envelope::Flat(page) => pipeline_page_json(page),
        opscore_pipeline::Envelope::Meta { page, stages, watermark_event_id } => json!({
            "page": pipeline_page_json(page),
            "stages": {
                "1_inbox": stages.inbox,
                "2_pending_approval": stages.pending_approval,
                "3_execute_workspace": stages.execute_workspace,
                "4_review_evidence": stages.review_evidence,
                "5_promoted": stages.promoted,
                "6_demoted": stages.demoted,
            },
            "watermark_event_id": watermark_event_id,
        }),
    }
}

fn read_run_row(tx: &Transaction<'_>, run_id: &RunId) -> Result<Option<Run>, StoreError> {
    tx.query_row(
        "SELECT run_id, workspace_id, room_id, thread_id, experiment_id, title, goal, input, output,
                error, tags, correlation_id, status, claim_token, claimed_by_actor_id, lease_expires_at,
                lease_heartbeat_at, created_at, updated_at
         FROM runs WHERE run_id = ?1",
        params![run_id.as_str()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
                row.get::<_, String>(12)?,
                row.get::<_, Option<String>>(13)?,
                row.get::<_, Option<String>>(14)?,
                row.get::<_, Option<String>>(15)?,
                row.get::<_, Option<String>>(16)?,
                row.get::<_, String>(17)?,
                row.get::<_, String>(18)?,
            ))
        },
    )
    .optional()?
    .map(
        |(
            run_id,
            workspace_id,
            room_id,
            thread_id,
            experiment_id,
            title,
            goal,
            input,
            output,
            error,
            tags,
            correlation_id,
            status,
            claim_token,
            claimed_by_actor_id,
            lease_expires_at,
            lease_heartbeat_at,
            created_at,
            updated_at,
        )| {
            Ok(Run {
                run_id: RunId::new(run_id),
                workspace_id: WorkspaceId::new(workspace_id),
                room_id: opscore_core::RoomId::new(room_id),
                thread_id: opscore_core::ThreadId::new(thread_id),
                experiment_id: experiment_id.map(ExperimentId::new),
                title,
                goal,
                input: serde_json::from_str(&input).unwrap_or(Value::Null),
                output: output.map(|raw| serde_json::from_str(&raw).unwrap_or(Value::Null)),
                error: error.map(|raw| serde_json::from_str(&raw).unwrap_or(Value::Null)),
                tags: serde_json::from_str(&tags).unwrap_or_default(),
                correlation_id,
                status: run_status_from_str(&status),
                claim_token,
                claimed_by_actor_id,
                lease_expires_at: lease_expires_at
                    .map(|raw| Timestamp::parse_rfc3339(&raw).map_err(|e| StoreError::Io(e.to_string())))
                    .transpose()?,
                lease_heartbeat_at: lease_heartbeat_at
                    .map(|raw| Timestamp::parse_rfc3339(&raw).map_err(|e| StoreError::Io(e.to_string())))
                    .transpose()?,
                created_at: Timestamp::parse_rfc3339(&created_at).map_err(|e| StoreError::Io(e.to_string()))?,
                updated_at: Timestamp::parse_rfc3339(&updated_at).map_err(|e| StoreError::Io(e.to_string()))?,
            })
        },
    )
    .transpose()
}

fn run_status_from_str(value: &str) -> opscore_core::RunStatus {
    match value {
        "running" => opscore_core::RunStatus::Running,
        "succeeded" => opscore_core::RunStatus::Succeeded,
        "failed" => opscore_core::RunStatus::Failed,
        _ => opscore_core::RunStatus::Queued,
    }
}

#[cfg(test)]
mod tests {
    use opscore_contract::CommandEnvelope;
    use opscore_contract::command::CreateRunRequest;
    use opscore_contract::command::RegisterAgentRequest;

    use super::*;

    fn test_engine() -> Engine {
        let db = Database::open_in_memory().unwrap();
        let config = opscore_contract::EngineConfig::for_tests();
        let engine = Engine::new(db, config);
        engine.bootstrap().unwrap();
        engine
    }

    fn envelope(workspace_id: &str) -> CommandEnvelope {
        CommandEnvelope {
            schema_version: SUPPORTED_SCHEMA_VERSION,
            workspace_id: Some(workspace_id.to_string()),
            idempotency_key: None,
        }
    }

    #[test]
    fn register_agent_then_create_run_round_trips_through_json() {
        let engine = test_engine();
        let registered = engine
            .handle(Command::RegisterAgent(RegisterAgentRequest {
                envelope: envelope("ws-1"),
                agent_id: "agent-1".to_string(),
                principal_id: "principal-1".to_string(),
                display_name: Some("Agent One".to_string()),
            }))
            .unwrap();
        assert_eq!(registered["agent_id"], "agent-1");

        let run = engine
            .handle(Command::CreateRun(CreateRunRequest {
                envelope: envelope("ws-1"),
                run_id: "run-1".to_string(),
                experiment_id: None,
                room_id: "room-1".to_string(),
                thread_id: "thread-1".to_string(),
                title: "t".to_string(),
                goal: "g".to_string(),
                input: None,
                tags: None,
                correlation_id: "corr-1".to_string(),
            }))
            .unwrap();
        assert_eq!(run["status"], "queued");
        assert_eq!(run["run_id"], "run-1");
    }

    #[test]
    fn unsupported_schema_version_is_rejected_before_any_domain_call() {
        let engine = test_engine();
        let mut env = envelope("ws-1");
        env.schema_version = 99;
        let err = engine
            .handle(Command::RegisterAgent(RegisterAgentRequest {
                envelope: env,
                agent_id: "agent-1".to_string(),
                principal_id: "principal-1".to_string(),
                display_name: None,
            }))
            .unwrap_err();
        assert_eq!(err.reason_code, ReasonCode::UnsupportedVersion);
    }

    #[test]
    fn pipeline_cursor_round_trips() {
        let cursor = opscore_pipeline::query::Cursor {
            updated_at: "2024-01-01T00:00:00Z".to_string(),
            entity_type: "run".to_string(),
            entity_id: "run-1".to_string(),
        };
        let encoded = encode_pipeline_cursor(&cursor);
        let decoded = decode_pipeline_cursor(&encoded).unwrap();
        assert_eq!(decoded, cursor);
    }
}
