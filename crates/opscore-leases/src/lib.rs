// crates/opscore-leases/src/lib.rs
// ============================================================================
// Module: Ops Core Lease Manager
// Description: Work-item leases and run-execution leases (C4).
// Purpose: Distributed mutual exclusion over work items and run execution
//          slots, with claim/heartbeat/release/preempt semantics.
// Dependencies: crate::{work_item, run_lease}
// ============================================================================

//! ## Overview
//! Two lease families live in this crate, per spec §4.4:
//! - [`work_item`]: a row-per-`(workspace, work_item_type, work_item_id)`
//!   table with claim/heartbeat/release and expired-lease reclaim.
//! - [`run_lease`]: the run's own row plus the append-only `run_attempts`
//!   ledger, serialized per `run_id` with an advisory lock to eliminate
//!   claim-window TOCTOU.
//!
//! Neither module performs engine-token authorization; callers (the engine
//! façade) verify the caller's engine token via `opscore-contract` before
//! invoking these operations.

pub mod run_lease;
pub mod work_item;

pub use run_lease::RUN_LOCK_NAMESPACE;
pub use run_lease::RunLeaseError;
pub use run_lease::claim_run;
pub use run_lease::heartbeat_run;
pub use run_lease::release_run;
pub use work_item::HEARTBEAT_MIN_INTERVAL_SEC_DEFAULT;
pub use work_item::LeaseState;
pub use work_item::WorkItemLeaseError;
pub use work_item::claim;
pub use work_item::heartbeat;
pub use work_item::release;
