// crates/opscore-incidents/src/lib.rs
// ============================================================================
// Module: Ops Core Incident & Experiment State
// Description: Experiment lifecycle (create/update/close) and incident
//              RCA/learning/close gating (C9).
// Purpose: Owns the precondition checks the core projectors do not perform
//          (force-close active-run counting, open-only gating, the
//          close-requires-rca-and-learning rule) on top of
//          opscore_store's experiment/incident projections.
// Dependencies: opscore_core, opscore_store
// ============================================================================

//! ## Overview
//! [`experiments`] and [`incidents`] each follow the same shape as
//! `opscore-policy::approvals`: build the event, append it, run it through
//! [`opscore_store::ProjectorRegistry`] in the same transaction, then read
//! the materialized row back. The gating rules live here, not in the
//! projector, because a projector only ever applies an event that has
//! already been accepted — rejecting a disallowed transition has to happen
//! before the event is appended.

pub mod experiments;
pub mod incidents;

pub use experiments::ExperimentError;
pub use experiments::close as close_experiment;
pub use experiments::create as create_experiment;
pub use experiments::update as update_experiment;
pub use incidents::IncidentError;
pub use incidents::close as close_incident;
pub use incidents::log_learning;
pub use incidents::open as open_incident;
pub use incidents::update_rca;
