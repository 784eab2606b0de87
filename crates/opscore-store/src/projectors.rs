// crates/opscore-store/src/projectors.rs
// ============================================================================
// Module: Projector Registry
// Description: Event-driven materialization of derived entity tables.
// Purpose: Apply each committed event to the projections it affects, inside
//          the same transaction as the append, via a compile-time dispatch
//          table over a tagged event-kind sum (not a string match scattered
//          across call sites).
// Dependencies: rusqlite, opscore_core::event, crate::projectors::{core_projector,
//              run_projector, approval_projector, experiment_projector,
//              incident_projector}
// ============================================================================

//! ## Overview
//! [`EventKind::from_event_type`] is the single boundary that turns a raw
//! `event_type` string into a typed tag; every projector downstream matches
//! on [`EventKind`], never on the string again. [`ProjectorRegistry::apply`]
//! is the compile-time dispatch table: one `match` arm per kind, routing to
//! the owning projector's `apply` function. A projector is idempotent by
//! construction: every table carries a `last_event_id` column, and mutating
//! apply functions no-op when the row already reflects the incoming event.

mod approval_projector;
mod core_projector;
mod experiment_projector;
mod incident_projector;
mod run_projector;
mod schema;

use opscore_core::PersistedEvent;
use rusqlite::Transaction;
use thiserror::Error;

use crate::db::StoreError;

/// Errors raised while applying an event to a projection.
#[derive(Debug, Error)]
pub enum ProjectorError {
    /// The event's payload did not contain a field a projector required.
    #[error("projector.missing_field: {0}")]
    MissingField(String),
    /// The event's payload could not be decoded into the shape a projector expected.
    #[error("projector.invalid_payload: {0}")]
    InvalidPayload(String),
    /// Underlying storage failure while reading or writing a projection row.
    #[error("projector.store_error: {0}")]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for ProjectorError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

/// Tagged sum over every event type the core projectors understand. Event
/// types outside this set are [`EventKind::Other`] and are ignored by the
/// write-path dispatch (they are either informational-only events or owned
/// by a projector registered by a higher-layer crate, e.g. the pipeline
/// snapshot or trust/skills projectors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `room.created`
    RoomCreated,
    /// `thread.created`
    ThreadCreated,
    /// `message.created`
    MessageCreated,
    /// `run.created`
    RunCreated,
    /// `run.started`
    RunStarted,
    /// `run.completed`
    RunCompleted,
    /// `run.failed`
    RunFailed,
    /// `step.created`
    StepCreated,
    /// `approval.requested`
    ApprovalRequested,
    /// `approval.decided`
    ApprovalDecided,
    /// `experiment.created`
    ExperimentCreated,
    /// `experiment.updated`
    ExperimentUpdated,
    /// `experiment.closed`
    ExperimentClosed,
    /// `incident.opened`
    IncidentOpened,
    /// `rca.updated`
    RcaUpdated,
    /// `learning.logged`
    LearningLogged,
    /// `incident.closed`
    IncidentClosed,
    /// Any event type not handled by this registry's write-path projectors.
    Other,
}

impl EventKind {
    /// Classifies a raw `event_type` string into a tagged [`EventKind`].
    /// This is the only place in the write path that matches on the string.
    #[must_use]
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "room.created" => Self::RoomCreated,
            "thread.created" => Self::ThreadCreated,
            "message.created" => Self::MessageCreated,
            "run.created" => Self::RunCreated,
            "run.started" => Self::RunStarted,
            "run.completed" => Self::RunCompleted,
            "run.failed" => Self::RunFailed,
            "step.created" => Self::StepCreated,
            "approval.requested" => Self::ApprovalRequested,
            "approval.decided" => Self::ApprovalDecided,
            "experiment.created" => Self::ExperimentCreated,
            "experiment.updated" => Self::ExperimentUpdated,
            "experiment.closed" => Self::ExperimentClosed,
            "incident.opened" => Self::IncidentOpened,
            "rca.updated" => Self::RcaUpdated,
            "learning.logged" => Self::LearningLogged,
            "incident.closed" => Self::IncidentClosed,
            _ => Self::Other,
        }
    }
}

/// Dispatches committed events to the six core write-path projectors.
///
/// # Invariants
/// - `apply` is called inside the same transaction as the triggering
///   append; a returned error rolls back that transaction along with the
///   event insert.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjectorRegistry;

impl ProjectorRegistry {
    /// Creates the union of every projector's table schema.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectorError`] on any underlying SQLite failure.
    pub fn ensure_schema(tx: &Transaction<'_>) -> Result<(), ProjectorError> {
        schema::ensure_schema(tx)?;
        Ok(())
    }

    /// Applies `event` to whichever projection(s) its [`EventKind`] maps to.
    /// A no-op for [`EventKind::Other`].
    ///
    /// # Errors
    ///
    /// Returns [`ProjectorError`] when the payload is malformed or the
    /// underlying write fails.
    pub fn apply(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
        match EventKind::from_event_type(event.event_type()) {
            EventKind::RoomCreated => core_projector::apply_room_created(tx, event),
            EventKind::ThreadCreated => core_projector::apply_thread_created(tx, event),
            EventKind::MessageCreated => core_projector::apply_message_created(tx, event),
            EventKind::RunCreated => run_projector::apply_run_created(tx, event),
            EventKind::RunStarted => run_projector::apply_run_started(tx, event),
            EventKind::RunCompleted => run_projector::apply_run_completed(tx, event),
            EventKind::RunFailed => run_projector::apply_run_failed(tx, event),
            EventKind::StepCreated => run_projector::apply_step_created(tx, event),
            EventKind::ApprovalRequested => approval_projector::apply_requested(tx, event),
            EventKind::ApprovalDecided => approval_projector::apply_decided(tx, event),
            EventKind::ExperimentCreated => experiment_projector::apply_created(tx, event),
            EventKind::ExperimentUpdated => experiment_projector::apply_updated(tx, event),
            EventKind::ExperimentClosed => experiment_projector::apply_closed(tx, event),
            EventKind::IncidentOpened => incident_projector::apply_opened(tx, event),
            EventKind::RcaUpdated => incident_projector::apply_rca_updated(tx, event),
            EventKind::LearningLogged => incident_projector::apply_learning_logged(tx, event),
            EventKind::IncidentClosed => incident_projector::apply_closed(tx, event),
            EventKind::Other => Ok(()),
        }
    }
}

/// Reads a required string field out of an event payload object.
pub(crate) fn require_str<'a>(
    data: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, ProjectorError> {
    data.get(field)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ProjectorError::MissingField(field.to_owned()))
}

/// Reads an optional string field out of an event payload object.
pub(crate) fn optional_str<'a>(data: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    data.get(field).and_then(serde_json::Value::as_str)
}
