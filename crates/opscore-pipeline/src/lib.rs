// crates/opscore-pipeline/src/lib.rs
// ============================================================================
// Module: Ops Core Pipeline Projector
// Description: Stage resolution across entities into the kanban-like
//              pipeline view (C10).
// Purpose: Maintain its own per-entity snapshot table fed by raw events from
//          every other component, and answer paginated stage queries over it.
// Dependencies: opscore_core, opscore_store, ret_logic
// ============================================================================

//! ## Overview
//! Unlike `opscore-incidents`, this crate is not a command layer over an
//! existing projection: `opscore-store`'s core projectors do not track
//! evidence, scorecards, or a per-entity stage at all (its own doc comment
//! calls this out as owned by "a higher-layer crate"). So this crate owns a
//! second, independent raw-event dispatch ([`store::apply`]) over the same
//! committed [`opscore_core::PersistedEvent`] stream, keyed by its own
//! string match on `event_type` (never on [`opscore_store::EventKind`],
//! which does not know about these event types). [`stage::resolve`] is the
//! pure function the assembled snapshot feeds into; [`query::page`] answers
//! the cursor-paginated read side.

pub mod query;
pub mod schema;
pub mod snapshot;
pub mod stage;
pub mod store;

pub use query::Envelope;
pub use query::PageRequest;
pub use query::PageResult;
pub use query::StageCounts;
pub use query::page;
pub use schema::ensure_schema;
pub use snapshot::EntityKind;
pub use snapshot::EntitySnapshot;
pub use snapshot::EvidenceStatus;
pub use snapshot::ExperimentStageStatus;
pub use snapshot::NormalizedRunStatus;
pub use snapshot::ScorecardDecision;
pub use snapshot::Stage;
pub use store::apply;

use thiserror::Error;

/// Errors raised while maintaining or querying the pipeline snapshot.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The event's payload did not contain a field this projector required.
    #[error("pipeline.missing_field: {0}")]
    MissingField(String),
    /// The event's payload could not be decoded into the shape expected.
    #[error("pipeline.invalid_payload: {0}")]
    InvalidPayload(String),
    /// Underlying storage failure.
    #[error("pipeline.store_error: {0}")]
    Store(#[from] opscore_store::StoreError),
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(opscore_store::StoreError::Db(err))
    }
}

/// Reads a required string field out of an event payload object.
pub(crate) fn require_str<'a>(
    data: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, PipelineError> {
    data.get(field).and_then(serde_json::Value::as_str).ok_or_else(|| PipelineError::MissingField(field.to_owned()))
}

/// Reads an optional string field out of an event payload object.
pub(crate) fn optional_str<'a>(data: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    data.get(field).and_then(serde_json::Value::as_str)
}
