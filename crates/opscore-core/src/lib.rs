// crates/opscore-core/src/lib.rs
// ============================================================================
// Module: Ops Core Domain Types
// Description: Shared identifiers, event envelope, and entity models for the
//              agent-operations control-plane core.
// Purpose: Give every other crate in the workspace one typed source of truth
//          to build events, projections, and contracts against.
// Dependencies: crate::{ids, time, event, run, approval, incident, capability,
//              skills, trust, lease, conversation, hashing}
// ============================================================================

//! ## Overview
//! `opscore-core` has no I/O and no dependency on any other crate in this
//! workspace: it defines the vocabulary (identifiers, the event envelope,
//! and every projection row shape) that the store, lease manager, policy
//! engine, trust engine, and contract layer all build on.

pub mod approval;
pub mod capability;
pub mod conversation;
pub mod event;
pub mod hashing;
pub mod ids;
pub mod incident;
pub mod lease;
pub mod run;
pub mod skills;
pub mod time;
pub mod trust;

pub use approval::Approval;
pub use approval::ApprovalScope;
pub use approval::ApprovalStatus;
pub use capability::Agent;
pub use capability::CapabilityScope;
pub use capability::CapabilityToken;
pub use capability::Engine;
pub use capability::Principal;
pub use capability::PrincipalKind;
pub use conversation::Message;
pub use conversation::Room;
pub use conversation::Thread;
pub use event::Actor;
pub use event::ActorKind;
pub use event::EventContext;
pub use event::EventScope;
pub use event::NewEvent;
pub use event::PersistedEvent;
pub use event::StreamKind;
pub use event::StreamRef;
pub use ids::AgentId;
pub use ids::AgentSkillId;
pub use ids::ApprovalId;
pub use ids::AutonomyRecommendationId;
pub use ids::CapabilityTokenId;
pub use ids::CausationId;
pub use ids::CorrelationId;
pub use ids::EngineId;
pub use ids::EventId;
pub use ids::ExperimentId;
pub use ids::IdempotencyKey;
pub use ids::IncidentId;
pub use ids::LeaseId;
pub use ids::MessageId;
pub use ids::PrincipalId;
pub use ids::RoomId;
pub use ids::RunAttemptId;
pub use ids::RunId;
pub use ids::SkillAssessmentId;
pub use ids::SkillPackageId;
pub use ids::StepId;
pub use ids::ThreadId;
pub use ids::WorkspaceId;
pub use incident::Experiment;
pub use incident::ExperimentStatus;
pub use incident::Incident;
pub use incident::IncidentSeverity;
pub use incident::IncidentStatus;
pub use incident::LearningEntry;
pub use incident::RiskTier;
pub use lease::WorkItemLease;
pub use lease::WorkItemType;
pub use run::Run;
pub use run::RunAttempt;
pub use run::RunStatus;
pub use run::Step;
pub use skills::AgentSkill;
pub use skills::AssessmentStatus;
pub use skills::SkillAssessment;
pub use skills::SkillLevel;
pub use skills::SkillPackage;
pub use skills::SkillStatus;
pub use time::Timestamp;
pub use trust::AgentTrust;
pub use trust::ApprovalMode;
pub use trust::AutonomyRecommendation;
pub use trust::RecommendationStatus;
pub use trust::TrustComponents;
