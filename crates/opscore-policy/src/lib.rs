// crates/opscore-policy/src/lib.rs
// ============================================================================
// Module: Ops Core Policy & Approval Engine
// Description: Egress/data-access authorization (C5) and approval lifecycle
//              (C6).
// Purpose: Give the engine façade one crate to call for every
//          policy-gated decision in spec.md §4.5/§4.6.
// Dependencies: crate::{authorize, approvals, data_access}
// ============================================================================

//! ## Overview
//! `opscore-policy` has no knowledge of HTTP or the command dispatcher; it
//! exposes pure decision functions ([`authorize::authorize`]) and
//! event-sourced state transitions ([`approvals::request`],
//! [`approvals::decide`], [`data_access::evaluate_and_record`]) that
//! `opscore-engine` composes into command handlers.

pub mod approvals;
pub mod authorize;
pub mod data_access;

pub use approvals::ApprovalError;
pub use approvals::ApprovalRow;
pub use approvals::ApprovalScope;
pub use approvals::Decision as ApprovalDecision;
pub use approvals::DecisionSource;
pub use approvals::decide;
pub use approvals::decision_from_emoji;
pub use approvals::request;
pub use authorize::ActionRegistryEntry;
pub use authorize::AuthorizeContext;
pub use authorize::AuthorizeOutcome;
pub use authorize::CostImpact;
pub use authorize::Decision;
pub use authorize::RecoveryDifficulty;
pub use authorize::RequestShape;
pub use authorize::Zone;
pub use authorize::authorize;
pub use data_access::DataAccessError;
pub use data_access::PurposeHintOutcome;
pub use data_access::evaluate_and_record;
pub use data_access::tags_disjoint;
