// crates/opscore-cli/src/main.rs
// ============================================================================
// Module: Ops Core CLI Entry Point
// Description: Command dispatcher exposing the opscore-engine command
//              surface as local subcommands over a SQLite-backed store.
// Purpose: Give operators and local tooling one binary that exercises every
//          engine command without standing up a wire binding.
// Dependencies: clap, opscore-contract, opscore-engine, opscore-store,
//               serde_json, thiserror.
// ============================================================================

//! ## Overview
//! Each subcommand builds one [`opscore_contract::Command`] variant from its
//! flags and hands it to [`opscore_engine::Engine::handle`]. Output is the
//! command's JSON result on stdout, or the contract error's JSON body on
//! stderr with a non-zero exit code; this binary never interprets the
//! result beyond pretty-printing it.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use opscore_contract::Command;
use opscore_contract::CommandEnvelope;
use opscore_contract::ConfigError;
use opscore_contract::ContractError;
use opscore_contract::EngineConfig;
use opscore_contract::command::CheckHealthRequest;
use opscore_contract::command::ClaimRunRequest;
use opscore_contract::command::ClaimWorkItemRequest;
use opscore_contract::command::CloseExperimentRequest;
use opscore_contract::command::CloseIncidentRequest;
use opscore_contract::command::CompleteRunRequest;
use opscore_contract::command::CreateExperimentRequest;
use opscore_contract::command::CreateRunRequest;
use opscore_contract::command::DecideApprovalRequest;
use opscore_contract::command::FailRunRequest;
use opscore_contract::command::HeartbeatRunLeaseRequest;
use opscore_contract::command::HeartbeatWorkItemRequest;
use opscore_contract::command::ImportSkillRequest;
use opscore_contract::command::LogIncidentLearningRequest;
use opscore_contract::command::OpenIncidentRequest;
use opscore_contract::command::QuarantineAgentRequest;
use opscore_contract::command::ReadPipelineProjectionRequest;
use opscore_contract::command::RegisterAgentRequest;
use opscore_contract::command::ReleaseRunLeaseRequest;
use opscore_contract::command::ReleaseWorkItemRequest;
use opscore_contract::command::RequestApprovalRequest;
use opscore_contract::command::RequestDataAccessRequest;
use opscore_contract::command::RequestEgressRequest;
use opscore_contract::command::RunIdRequest;
use opscore_contract::command::UpdateExperimentRequest;
use opscore_contract::command::UpdateIncidentRcaRequest;
use opscore_engine::Engine;
use opscore_store::Database;
use opscore_store::DatabaseConfig;
use serde_json::Value;
use thiserror::Error;

const SCHEMA_VERSION: u32 = 1;
const DEFAULT_STORE_PATH: &str = "opscore.sqlite3";

// ============================================================================
// SECTION: Top-level CLI
// ============================================================================

/// Local command-line adapter over the Ops Core engine command surface.
#[derive(Parser, Debug)]
#[command(name = "opscore", disable_help_subcommand = true)]
struct Cli {
    /// Path to the SQLite store file; created if missing.
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_STORE_PATH)]
    store_path: PathBuf,
    /// The workspace every command is scoped to.
    #[arg(long, global = true, value_name = "WORKSPACE_ID")]
    workspace_id: String,
    /// An idempotency key to attach to this command, if any.
    #[arg(long, global = true, value_name = "KEY")]
    idempotency_key: Option<String>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands, grouped by the domain they act on.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Agent registry operations.
    Agent {
        /// Selected agent subcommand.
        #[command(subcommand)]
        command: AgentCommand,
    },
    /// Egress request operations.
    Egress(EgressArgs),
    /// Data-access purpose-hint evaluation.
    DataAccess(DataAccessArgs),
    /// Incident lifecycle operations.
    Incident {
        /// Selected incident subcommand.
        #[command(subcommand)]
        command: IncidentCommand,
    },
    /// Experiment lifecycle operations.
    Experiment {
        /// Selected experiment subcommand.
        #[command(subcommand)]
        command: ExperimentCommand,
    },
    /// Run lifecycle operations.
    Run {
        /// Selected run subcommand.
        #[command(subcommand)]
        command: RunCommand,
    },
    /// Run-lease and work-item lease operations.
    Lease {
        /// Selected lease subcommand.
        #[command(subcommand)]
        command: LeaseCommand,
    },
    /// Approval request and decision operations.
    Approval {
        /// Selected approval subcommand.
        #[command(subcommand)]
        command: ApprovalCommand,
    },
    /// Pipeline projection reads.
    Pipeline {
        /// Selected pipeline subcommand.
        #[command(subcommand)]
        command: PipelineCommand,
    },
    /// System health checks.
    Health(HealthArgs),
}

// ============================================================================
// SECTION: Agent
// ============================================================================

/// Agent registry subcommands.
#[derive(Subcommand, Debug)]
enum AgentCommand {
    /// Register a new agent.
    Register(RegisterAgentArgs),
    /// Quarantine an existing agent.
    Quarantine(QuarantineAgentArgs),
    /// Import a skill package on behalf of an agent.
    ImportSkill(ImportSkillArgs),
}

/// Arguments for `agent register`.
#[derive(Args, Debug)]
struct RegisterAgentArgs {
    /// The agent's chosen identifier.
    #[arg(long)]
    agent_id: String,
    /// The principal this agent is registered under.
    #[arg(long)]
    principal_id: String,
    /// A human-readable display name.
    #[arg(long)]
    display_name: Option<String>,
}

/// Arguments for `agent quarantine`.
#[derive(Args, Debug)]
struct QuarantineAgentArgs {
    /// The agent to quarantine.
    #[arg(long)]
    agent_id: String,
    /// Why the agent is being quarantined.
    #[arg(long)]
    reason: String,
}

/// Arguments for `agent import-skill`.
#[derive(Args, Debug)]
struct ImportSkillArgs {
    /// The skill package's identifier.
    #[arg(long)]
    skill_package_id: String,
    /// The package's declared name.
    #[arg(long)]
    name: String,
    /// The package's declared version.
    #[arg(long)]
    version: String,
    /// The package artifact's content hash.
    #[arg(long)]
    hash: String,
    /// The package manifest, as a JSON string.
    #[arg(long, value_parser = parse_json)]
    manifest: Value,
    /// An optional publisher signature over `hash`.
    #[arg(long)]
    signature: Option<String>,
    /// The correlation id this import participates in.
    #[arg(long)]
    correlation_id: String,
}

// ============================================================================
// SECTION: Egress and data access
// ============================================================================

/// Arguments for `egress`.
#[derive(Args, Debug)]
struct EgressArgs {
    /// The agent requesting egress.
    #[arg(long)]
    agent_id: String,
    /// The destination being requested.
    #[arg(long)]
    destination: String,
    /// The room this request is scoped to.
    #[arg(long)]
    room_id: String,
    /// The correlation id this request participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `data-access`.
#[derive(Args, Debug)]
struct DataAccessArgs {
    /// The room this request is scoped to.
    #[arg(long)]
    room_id: String,
    /// Purpose tags the accessed resource carries, comma-separated.
    #[arg(long, value_delimiter = ',')]
    resource_purpose_tags: Vec<String>,
    /// Purpose tags the requester declares, comma-separated.
    #[arg(long, value_delimiter = ',')]
    request_purpose_tags: Vec<String>,
    /// An optional justification for a declared mismatch.
    #[arg(long)]
    justification: Option<String>,
    /// The correlation id this request participates in.
    #[arg(long)]
    correlation_id: String,
}

// ============================================================================
// SECTION: Incidents
// ============================================================================

/// Incident subcommands.
#[derive(Subcommand, Debug)]
enum IncidentCommand {
    /// Open a new incident.
    Open(OpenIncidentArgs),
    /// Attach or update an incident's root-cause-analysis payload.
    Rca(UpdateIncidentRcaArgs),
    /// Log a learning note against an incident.
    Learn(LogIncidentLearningArgs),
    /// Close an incident.
    Close(CloseIncidentArgs),
}

/// Arguments for `incident open`.
#[derive(Args, Debug)]
struct OpenIncidentArgs {
    /// The incident's identifier.
    #[arg(long)]
    incident_id: String,
    /// The incident's severity (`sev1`..`sev4`).
    #[arg(long)]
    severity: String,
    /// The run this incident originates from, if any.
    #[arg(long)]
    run_id: Option<String>,
    /// The room this incident is scoped to, if not inherited from `run_id`.
    #[arg(long)]
    room_id: Option<String>,
    /// The thread this incident is scoped to, if not inherited from `run_id`.
    #[arg(long)]
    thread_id: Option<String>,
    /// The correlation id this incident participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `incident rca`.
#[derive(Args, Debug)]
struct UpdateIncidentRcaArgs {
    /// The incident being updated.
    #[arg(long)]
    incident_id: String,
    /// The root-cause-analysis payload, as a JSON string.
    #[arg(long, value_parser = parse_json)]
    payload: Value,
    /// The correlation id this update participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `incident learn`.
#[derive(Args, Debug)]
struct LogIncidentLearningArgs {
    /// The incident this learning note is attached to.
    #[arg(long)]
    incident_id: String,
    /// The learning note's text.
    #[arg(long)]
    note: String,
    /// The correlation id this log entry participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `incident close`.
#[derive(Args, Debug)]
struct CloseIncidentArgs {
    /// The incident being closed.
    #[arg(long)]
    incident_id: String,
    /// The correlation id this close participates in.
    #[arg(long)]
    correlation_id: String,
}

// ============================================================================
// SECTION: Experiments
// ============================================================================

/// Experiment subcommands.
#[derive(Subcommand, Debug)]
enum ExperimentCommand {
    /// Create a new experiment.
    Create(CreateExperimentArgs),
    /// Update an experiment's mutable fields.
    Update(UpdateExperimentArgs),
    /// Close an experiment.
    Close(CloseExperimentArgs),
}

/// Arguments for `experiment create`.
#[derive(Args, Debug)]
struct CreateExperimentArgs {
    /// The experiment's identifier.
    #[arg(long)]
    experiment_id: String,
    /// The room this experiment is scoped to.
    #[arg(long)]
    room_id: String,
    /// The experiment's title.
    #[arg(long)]
    title: String,
    /// The experiment's hypothesis.
    #[arg(long)]
    hypothesis: String,
    /// Criteria that would count the experiment a success, comma-separated.
    #[arg(long, value_delimiter = ',')]
    success_criteria: Vec<String>,
    /// Conditions under which the experiment should be stopped early, comma-separated.
    #[arg(long, value_delimiter = ',')]
    stop_conditions: Vec<String>,
    /// The experiment's budget cap, in whatever unit this workspace tracks.
    #[arg(long)]
    budget_cap_units: u64,
    /// The experiment's declared risk tier.
    #[arg(long)]
    risk_tier: String,
    /// The correlation id this creation participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `experiment update`.
#[derive(Args, Debug)]
struct UpdateExperimentArgs {
    /// The experiment being updated.
    #[arg(long)]
    experiment_id: String,
    /// A new title, if changing.
    #[arg(long)]
    title: Option<String>,
    /// A corrected active-run count, if the caller is reconciling drift.
    #[arg(long)]
    active_run_count: Option<u32>,
    /// The correlation id this update participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `experiment close`.
#[derive(Args, Debug)]
struct CloseExperimentArgs {
    /// The experiment being closed.
    #[arg(long)]
    experiment_id: String,
    /// Close even if active runs remain outstanding.
    #[arg(long)]
    force: bool,
    /// The correlation id this close participates in.
    #[arg(long)]
    correlation_id: String,
}

// ============================================================================
// SECTION: Runs
// ============================================================================

/// Run subcommands.
#[derive(Subcommand, Debug)]
enum RunCommand {
    /// Create a new run.
    Create(CreateRunArgs),
    /// Claim a run for execution via the run-lease manager.
    Claim(ClaimRunArgs),
    /// Mark a run started, independent of lease claim.
    Start(RunIdArgs),
    /// Mark a run completed.
    Complete(CompleteRunArgs),
    /// Mark a run failed.
    Fail(FailRunArgs),
}

/// Arguments for `run create`.
#[derive(Args, Debug)]
struct CreateRunArgs {
    /// The run's identifier.
    #[arg(long)]
    run_id: String,
    /// The experiment this run belongs to, if any.
    #[arg(long)]
    experiment_id: Option<String>,
    /// The room this run is scoped to.
    #[arg(long)]
    room_id: String,
    /// The thread this run is scoped to.
    #[arg(long)]
    thread_id: String,
    /// The run's title.
    #[arg(long)]
    title: String,
    /// The run's goal.
    #[arg(long)]
    goal: String,
    /// Arbitrary run input, as a JSON string.
    #[arg(long, value_parser = parse_json)]
    input: Option<Value>,
    /// Free-form tags carried on the run, comma-separated.
    #[arg(long, value_delimiter = ',')]
    tags: Option<Vec<String>>,
    /// The correlation id this run participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `run claim`.
#[derive(Args, Debug)]
struct ClaimRunArgs {
    /// The run being claimed.
    #[arg(long)]
    run_id: String,
    /// The engine claiming the run.
    #[arg(long)]
    engine_id: String,
    /// The principal on whose behalf the claim is made.
    #[arg(long)]
    claimer_principal_id: String,
}

/// Arguments naming only the run a subcommand targets.
#[derive(Args, Debug)]
struct RunIdArgs {
    /// The run being targeted.
    #[arg(long)]
    run_id: String,
    /// The correlation id this action participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `run complete`.
#[derive(Args, Debug)]
struct CompleteRunArgs {
    /// The run completing.
    #[arg(long)]
    run_id: String,
    /// The run's result payload, as a JSON string.
    #[arg(long, value_parser = parse_json)]
    result: Value,
    /// The correlation id this completion participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `run fail`.
#[derive(Args, Debug)]
struct FailRunArgs {
    /// The run failing.
    #[arg(long)]
    run_id: String,
    /// Why the run failed.
    #[arg(long)]
    reason: String,
    /// The correlation id this failure participates in.
    #[arg(long)]
    correlation_id: String,
}

// ============================================================================
// SECTION: Leases
// ============================================================================

/// Lease subcommands, covering both run leases and work-item leases.
#[derive(Subcommand, Debug)]
enum LeaseCommand {
    /// Heartbeat a run's claim.
    RunHeartbeat(HeartbeatRunLeaseArgs),
    /// Release a run's claim.
    RunRelease(ReleaseRunLeaseArgs),
    /// Claim a work item.
    WorkClaim(ClaimWorkItemArgs),
    /// Heartbeat a work-item lease.
    WorkHeartbeat(HeartbeatWorkItemArgs),
    /// Release a work-item lease.
    WorkRelease(ReleaseWorkItemArgs),
}

/// Arguments for `lease run-heartbeat`.
#[derive(Args, Debug)]
struct HeartbeatRunLeaseArgs {
    /// The run whose lease is being extended.
    #[arg(long)]
    run_id: String,
    /// The claim token the lease was issued under.
    #[arg(long)]
    claim_token: String,
}

/// Arguments for `lease run-release`.
#[derive(Args, Debug)]
struct ReleaseRunLeaseArgs {
    /// The run whose lease is being released.
    #[arg(long)]
    run_id: String,
    /// The claim token the lease was issued under.
    #[arg(long)]
    claim_token: String,
    /// Why the lease is being released.
    #[arg(long)]
    released_reason: String,
}

/// Arguments for `lease work-claim`.
#[derive(Args, Debug)]
struct ClaimWorkItemArgs {
    /// The work item's type (`experiment`, `approval`, `message`, `incident`, `artifact`).
    #[arg(long)]
    work_item_type: String,
    /// The work item's identifier.
    #[arg(long)]
    work_item_id: String,
    /// The agent claiming the item.
    #[arg(long)]
    agent_id: String,
    /// The correlation id this claim participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `lease work-heartbeat`.
#[derive(Args, Debug)]
struct HeartbeatWorkItemArgs {
    /// The work item's type.
    #[arg(long)]
    work_item_type: String,
    /// The work item's identifier.
    #[arg(long)]
    work_item_id: String,
    /// The agent holding the lease.
    #[arg(long)]
    agent_id: String,
    /// The lease version the caller last observed.
    #[arg(long)]
    expected_version: u32,
}

/// Arguments for `lease work-release`.
#[derive(Args, Debug)]
struct ReleaseWorkItemArgs {
    /// The work item's type.
    #[arg(long)]
    work_item_type: String,
    /// The work item's identifier.
    #[arg(long)]
    work_item_id: String,
    /// The agent releasing the lease.
    #[arg(long)]
    agent_id: String,
    /// The lease version the caller last observed.
    #[arg(long)]
    expected_version: u32,
}

// ============================================================================
// SECTION: Approvals
// ============================================================================

/// Approval subcommands.
#[derive(Subcommand, Debug)]
enum ApprovalCommand {
    /// Request an approval.
    Request(RequestApprovalArgs),
    /// Decide a pending approval.
    Decide(DecideApprovalArgs),
}

/// Arguments for `approval request`.
#[derive(Args, Debug)]
struct RequestApprovalArgs {
    /// The room this approval is scoped to.
    #[arg(long)]
    room_id: String,
    /// The approval's identifier.
    #[arg(long)]
    approval_id: String,
    /// The action code being gated.
    #[arg(long)]
    action_code: String,
    /// The approval's scope (`single`, `session`, or `standing`).
    #[arg(long)]
    scope: String,
    /// A snapshot of the scope at request time, as a JSON string.
    #[arg(long, value_parser = parse_json)]
    scope_snapshot: Value,
    /// When this approval request expires, if it does (RFC 3339).
    #[arg(long)]
    expires_at: Option<String>,
    /// The correlation id this request participates in.
    #[arg(long)]
    correlation_id: String,
}

/// Arguments for `approval decide`.
#[derive(Args, Debug)]
struct DecideApprovalArgs {
    /// The approval being decided.
    #[arg(long)]
    approval_id: String,
    /// `approve`, `deny`, or `hold`.
    #[arg(long)]
    decision: String,
    /// The correlation id this decision participates in.
    #[arg(long)]
    correlation_id: String,
}

// ============================================================================
// SECTION: Pipeline and health
// ============================================================================

/// Pipeline subcommands.
#[derive(Subcommand, Debug)]
enum PipelineCommand {
    /// Read a page of the pipeline projection.
    Read(ReadPipelineProjectionArgs),
}

/// Arguments for `pipeline read`.
#[derive(Args, Debug)]
struct ReadPipelineProjectionArgs {
    /// Restricts the page to a single stage, if set.
    #[arg(long)]
    stage: Option<String>,
    /// An opaque pagination cursor from a previous page.
    #[arg(long)]
    cursor: Option<String>,
    /// The requested page size, clamped to `[1, 200]`.
    #[arg(long)]
    limit: Option<u32>,
    /// `"flat"` or `"envelope"`; defaults to `"flat"`.
    #[arg(long)]
    format: Option<String>,
}

/// Arguments for `health`.
#[derive(Args, Debug)]
struct HealthArgs {
    /// Run the deeper per-subsystem checks rather than the summary alone.
    #[arg(long)]
    include_checks: bool,
}

// ============================================================================
// SECTION: Entry point
// ============================================================================

/// CLI-level error wrapper for startup failures that precede engine dispatch.
#[derive(Debug, Error)]
enum CliError {
    /// The engine configuration could not be loaded from the environment.
    #[error("failed to load engine configuration: {0}")]
    Config(#[from] ConfigError),
    /// The SQLite store could not be opened or bootstrapped.
    #[error("failed to open the store: {0}")]
    Store(#[from] ContractError),
    /// Writing output failed.
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            let _ = write_stderr_line(&err.to_string());
            ExitCode::FAILURE
        }
    }
}

/// Executes the CLI command dispatcher.
fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    let db = Database::open(&DatabaseConfig::new(&cli.store_path)).map_err(|err| {
        ContractError::new(opscore_contract::ReasonCode::InternalError, err.to_string())
    })?;
    let engine = Engine::new(db, config);
    engine.bootstrap()?;

    let envelope = CommandEnvelope {
        schema_version: SCHEMA_VERSION,
        workspace_id: Some(cli.workspace_id),
        idempotency_key: cli.idempotency_key,
    };
    let command = build_command(cli.command, envelope);

    match engine.handle(command) {
        Ok(value) => {
            write_stdout_line(&pretty(&value))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            write_stderr_line(&pretty(&opscore_contract::to_response_body(&err)))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Builds the [`Command`] variant a subcommand names, attaching the shared envelope.
fn build_command(commands: Commands, envelope: CommandEnvelope) -> Command {
    match commands {
        Commands::Agent { command } => build_agent_command(command, envelope),
        Commands::Egress(args) => Command::RequestEgress(RequestEgressRequest {
            envelope,
            agent_id: args.agent_id,
            destination: args.destination,
            room_id: args.room_id,
            correlation_id: args.correlation_id,
        }),
        Commands::DataAccess(args) => Command::RequestDataAccess(RequestDataAccessRequest {
            envelope,
            room_id: args.room_id,
            resource_purpose_tags: args.resource_purpose_tags,
            request_purpose_tags: args.request_purpose_tags,
            justification: args.justification,
            correlation_id: args.correlation_id,
        }),
        Commands::Incident { command } => build_incident_command(command, envelope),
        Commands::Experiment { command } => build_experiment_command(command, envelope),
        Commands::Run { command } => build_run_command(command, envelope),
        Commands::Lease { command } => build_lease_command(command, envelope),
        Commands::Approval { command } => build_approval_command(command, envelope),
        Commands::Pipeline { command } => build_pipeline_command(command, envelope),
        Commands::Health(args) => {
            Command::CheckHealth(CheckHealthRequest { envelope, include_checks: args.include_checks })
        }
    }
}

/// Builds an agent-family [`Command`].
fn build_agent_command(command: AgentCommand, envelope: CommandEnvelope) -> Command {
    match command {
        AgentCommand::Register(args) => Command::RegisterAgent(RegisterAgentRequest {
            envelope,
            agent_id: args.agent_id,
            principal_id: args.principal_id,
            display_name: args.display_name,
        }),
        AgentCommand::Quarantine(args) => Command::QuarantineAgent(QuarantineAgentRequest {
            envelope,
            agent_id: args.agent_id,
            reason: args.reason,
        }),
        AgentCommand::ImportSkill(args) => Command::ImportSkill(ImportSkillRequest {
            envelope,
            skill_package_id: args.skill_package_id,
            name: args.name,
            version: args.version,
            hash: args.hash,
            manifest: args.manifest,
            signature: args.signature,
            correlation_id: args.correlation_id,
        }),
    }
}

/// Builds an incident-family [`Command`].
fn build_incident_command(command: IncidentCommand, envelope: CommandEnvelope) -> Command {
    match command {
        IncidentCommand::Open(args) => Command::OpenIncident(OpenIncidentRequest {
            envelope,
            incident_id: args.incident_id,
            severity: args.severity,
            run_id: args.run_id,
            room_id: args.room_id,
            thread_id: args.thread_id,
            correlation_id: args.correlation_id,
        }),
        IncidentCommand::Rca(args) => Command::UpdateIncidentRca(UpdateIncidentRcaRequest {
            envelope,
            incident_id: args.incident_id,
            payload: args.payload,
            correlation_id: args.correlation_id,
        }),
        IncidentCommand::Learn(args) => Command::LogIncidentLearning(LogIncidentLearningRequest {
            envelope,
            incident_id: args.incident_id,
            note: args.note,
            correlation_id: args.correlation_id,
        }),
        IncidentCommand::Close(args) => Command::CloseIncident(CloseIncidentRequest {
            envelope,
            incident_id: args.incident_id,
            correlation_id: args.correlation_id,
        }),
    }
}

/// Builds an experiment-family [`Command`].
fn build_experiment_command(command: ExperimentCommand, envelope: CommandEnvelope) -> Command {
    match command {
        ExperimentCommand::Create(args) => Command::CreateExperiment(CreateExperimentRequest {
            envelope,
            experiment_id: args.experiment_id,
            room_id: args.room_id,
            title: args.title,
            hypothesis: args.hypothesis,
            success_criteria: args.success_criteria,
            stop_conditions: args.stop_conditions,
            budget_cap_units: args.budget_cap_units,
            risk_tier: args.risk_tier,
            correlation_id: args.correlation_id,
        }),
        ExperimentCommand::Update(args) => Command::UpdateExperiment(UpdateExperimentRequest {
            envelope,
            experiment_id: args.experiment_id,
            title: args.title,
            active_run_count: args.active_run_count,
            correlation_id: args.correlation_id,
        }),
        ExperimentCommand::Close(args) => Command::CloseExperiment(CloseExperimentRequest {
            envelope,
            experiment_id: args.experiment_id,
            force: args.force,
            correlation_id: args.correlation_id,
        }),
    }
}

/// Builds a run-family [`Command`].
fn build_run_command(command: RunCommand, envelope: CommandEnvelope) -> Command {
    match command {
        RunCommand::Create(args) => Command::CreateRun(CreateRunRequest {
            envelope,
            run_id: args.run_id,
            experiment_id: args.experiment_id,
            room_id: args.room_id,
            thread_id: args.thread_id,
            title: args.title,
            goal: args.goal,
            input: args.input,
            tags: args.tags,
            correlation_id: args.correlation_id,
        }),
        RunCommand::Claim(args) => Command::ClaimRun(ClaimRunRequest {
            envelope,
            run_id: args.run_id,
            engine_id: args.engine_id,
            claimer_principal_id: args.claimer_principal_id,
        }),
        RunCommand::Start(args) => Command::StartRun(RunIdRequest {
            envelope,
            run_id: args.run_id,
            correlation_id: args.correlation_id,
        }),
        RunCommand::Complete(args) => Command::CompleteRun(CompleteRunRequest {
            envelope,
            run_id: args.run_id,
            result: args.result,
            correlation_id: args.correlation_id,
        }),
        RunCommand::Fail(args) => Command::FailRun(FailRunRequest {
            envelope,
            run_id: args.run_id,
            reason: args.reason,
            correlation_id: args.correlation_id,
        }),
    }
}

/// Builds a lease-family [`Command`].
fn build_lease_command(command: LeaseCommand, envelope: CommandEnvelope) -> Command {
    match command {
        LeaseCommand::RunHeartbeat(args) => Command::HeartbeatRunLease(HeartbeatRunLeaseRequest {
            envelope,
            run_id: args.run_id,
            claim_token: args.claim_token,
        }),
        LeaseCommand::RunRelease(args) => Command::ReleaseRunLease(ReleaseRunLeaseRequest {
            envelope,
            run_id: args.run_id,
            claim_token: args.claim_token,
            released_reason: args.released_reason,
        }),
        LeaseCommand::WorkClaim(args) => Command::ClaimWorkItem(ClaimWorkItemRequest {
            envelope,
            work_item_type: args.work_item_type,
            work_item_id: args.work_item_id,
            agent_id: args.agent_id,
            correlation_id: args.correlation_id,
        }),
        LeaseCommand::WorkHeartbeat(args) => Command::HeartbeatWorkItem(HeartbeatWorkItemRequest {
            envelope,
            work_item_type: args.work_item_type,
            work_item_id: args.work_item_id,
            agent_id: args.agent_id,
            expected_version: args.expected_version,
        }),
        LeaseCommand::WorkRelease(args) => Command::ReleaseWorkItem(ReleaseWorkItemRequest {
            envelope,
            work_item_type: args.work_item_type,
            work_item_id: args.work_item_id,
            agent_id: args.agent_id,
            expected_version: args.expected_version,
        }),
    }
}

/// Builds an approval-family [`Command`].
fn build_approval_command(command: ApprovalCommand, envelope: CommandEnvelope) -> Command {
    match command {
        ApprovalCommand::Request(args) => Command::RequestApproval(RequestApprovalRequest {
            envelope,
            room_id: args.room_id,
            approval_id: args.approval_id,
            action_code: args.action_code,
            scope: args.scope,
            scope_snapshot: args.scope_snapshot,
            expires_at: args.expires_at,
            correlation_id: args.correlation_id,
        }),
        ApprovalCommand::Decide(args) => Command::DecideApproval(DecideApprovalRequest {
            envelope,
            approval_id: args.approval_id,
            decision: args.decision,
            correlation_id: args.correlation_id,
        }),
    }
}

/// Builds a pipeline-family [`Command`].
fn build_pipeline_command(command: PipelineCommand, envelope: CommandEnvelope) -> Command {
    match command {
        PipelineCommand::Read(args) => Command::ReadPipelineProjection(ReadPipelineProjectionRequest {
            envelope,
            stage: args.stage,
            cursor: args.cursor,
            limit: args.limit,
            format: args.format,
        }),
    }
}

/// Parses a CLI argument as JSON, defaulting an empty string to `null`.
fn parse_json(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(raw)
}

/// Pretty-prints a JSON value for terminal output.
fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> CommandEnvelope {
        CommandEnvelope { schema_version: SCHEMA_VERSION, workspace_id: Some("ws-1".to_string()), idempotency_key: None }
    }

    #[test]
    fn parse_json_defaults_empty_string_to_null() {
        assert_eq!(parse_json("").unwrap(), Value::Null);
        assert_eq!(parse_json("{\"a\":1}").unwrap(), serde_json::json!({"a": 1}));
        assert!(parse_json("not json").is_err());
    }

    #[test]
    fn build_agent_register_command_carries_every_flag() {
        let command = build_agent_command(
            AgentCommand::Register(RegisterAgentArgs {
                agent_id: "agent-1".to_string(),
                principal_id: "principal-1".to_string(),
                display_name: Some("Agent One".to_string()),
            }),
            envelope(),
        );
        let Command::RegisterAgent(request) = command else {
            panic!("expected RegisterAgent");
        };
        assert_eq!(request.agent_id, "agent-1");
        assert_eq!(request.principal_id, "principal-1");
        assert_eq!(request.display_name.as_deref(), Some("Agent One"));
    }

    #[test]
    fn build_run_claim_command_round_trips() {
        let command = build_run_command(
            RunCommand::Claim(ClaimRunArgs {
                run_id: "run-1".to_string(),
                engine_id: "engine-1".to_string(),
                claimer_principal_id: "principal-1".to_string(),
            }),
            envelope(),
        );
        let Command::ClaimRun(request) = command else {
            panic!("expected ClaimRun");
        };
        assert_eq!(request.run_id, "run-1");
        assert_eq!(request.engine_id, "engine-1");
    }

    #[test]
    fn build_health_command_carries_include_checks() {
        let command = build_command(Commands::Health(HealthArgs { include_checks: true }), envelope());
        let Command::CheckHealth(request) = command else {
            panic!("expected CheckHealth");
        };
        assert!(request.include_checks);
    }

    #[test]
    fn register_agent_command_round_trips_through_the_engine() {
        let db = Database::open_in_memory().unwrap();
        let engine = Engine::new(db, EngineConfig::for_tests());
        engine.bootstrap().unwrap();

        let command = build_agent_command(
            AgentCommand::Register(RegisterAgentArgs {
                agent_id: "agent-1".to_string(),
                principal_id: "principal-1".to_string(),
                display_name: None,
            }),
            envelope(),
        );
        let result = engine.handle(command).unwrap();
        assert_eq!(result["agent_id"], "agent-1");
    }

    #[test]
    fn cli_parses_nested_subcommands() {
        let cli = Cli::parse_from([
            "opscore",
            "--workspace-id",
            "ws-1",
            "run",
            "fail",
            "--run-id",
            "run-1",
            "--reason",
            "boom",
            "--correlation-id",
            "corr-1",
        ]);
        assert_eq!(cli.workspace_id, "ws-1");
        assert!(matches!(cli.command, Commands::Run { command: RunCommand::Fail(_) }));
    }
}
