// crates/opscore-trust/src/lib.rs
// ============================================================================
// Module: Ops Core Trust, Autonomy & Skills Engine
// Description: Trust-score computation (C7), autonomy-recommendation
//              lifecycle, and the skills ledger (C8).
// Purpose: Give the engine façade one crate to call for every trust- and
//          skills-gated decision in spec.md §4.7/§4.8.
// Dependencies: crate::{trust, autonomy, skills, schema}
// ============================================================================

//! ## Overview
//! `opscore-trust` owns three closely related concerns that all read and
//! write the same `agent_trust`/`autonomy_recommendations`/`skill_*` tables:
//! deterministic trust scoring ([`trust`]), the recommend/approve/reject
//! autonomy-upgrade workflow ([`autonomy`]), and the skills import/verify/
//! assess/primary-selection lifecycle ([`skills`]). [`schema::ensure_schema`]
//! must run once per database before any of the three are used, mirroring
//! `opscore-store::projectors::schema`'s convention.

pub mod autonomy;
pub mod schema;
pub mod skills;
pub mod trust;

pub use autonomy::AutonomyError;
pub use autonomy::approve;
pub use autonomy::recommend;
pub use autonomy::reject;
pub use schema::ensure_schema;
pub use skills::SkillsError;
pub use skills::assess_imported;
pub use skills::certify_imported;
pub use skills::import;
pub use skills::select_primary;
pub use skills::verify;
pub use trust::ApprovalModeInputs;
pub use trust::ApprovalModeSet;
pub use trust::TrustError;
pub use trust::TrustOverrides;
pub use trust::apply_overrides;
pub use trust::compute_score;
pub use trust::derive_default_signals;
pub use trust::recommend_approval_modes;
pub use trust::recompute_and_store;
