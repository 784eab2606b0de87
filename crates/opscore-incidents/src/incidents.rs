// crates/opscore-incidents/src/incidents.rs
// ============================================================================
// Module: Incident Lifecycle
// Description: open/rca/learning/close state machine over incident records.
// Purpose: Owns run-binding inheritance on open and the close-requires-rca-
//          and-learning gate from spec §4.9; the projector only applies
//          whichever event this module already validated.
// Dependencies: rusqlite, opscore_core::{event, ids, incident, time}, opscore_store
// ============================================================================

//! ## Overview
//! [`open`] inherits room/thread/correlation from a bound run whenever the
//! caller does not override them explicitly — a `None` override and a bound
//! run together mean "use the run's own scope". [`update_rca`] and
//! [`log_learning`] both reject once the incident is `closed`, matching the
//! projector's own `status = 'open'` guard but surfacing it as an error
//! rather than a silent no-op. [`close`] checks `rca_updated_at` before
//! `learning_count`, per spec §4.9's stated order.

use opscore_core::Actor;
use opscore_core::CorrelationId;
use opscore_core::Incident;
use opscore_core::IncidentId;
use opscore_core::IncidentSeverity;
use opscore_core::IncidentStatus;
use opscore_core::LearningEntry;
use opscore_core::NewEvent;
use opscore_core::RoomId;
use opscore_core::RunId;
use opscore_core::StreamRef;
use opscore_core::ThreadId;
use opscore_core::Timestamp;
use opscore_core::WorkspaceId;
use opscore_store::Database;
use opscore_store::EventStoreError;
use opscore_store::ProjectorError;
use opscore_store::ProjectorRegistry;
use opscore_store::StoreError;
use opscore_store::append_to_stream;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while opening, annotating, or closing an incident.
#[derive(Debug, Error)]
pub enum IncidentError {
    /// No incident exists with the given id.
    #[error("incident.not_found")]
    NotFound,
    /// The incident is `closed`, so the requested mutation is refused.
    #[error("incident.not_open")]
    NotOpen,
    /// An RCA payload was empty or missing.
    #[error("incident.rca_payload_empty")]
    RcaPayloadEmpty,
    /// A learning note was empty or missing.
    #[error("incident.learning_note_empty")]
    LearningNoteEmpty,
    /// `close` was called without an RCA recorded.
    #[error("incident_close_blocked_missing_rca")]
    CloseBlockedMissingRca,
    /// `close` was called without at least one logged learning.
    #[error("incident_close_blocked_missing_learning")]
    CloseBlockedMissingLearning,
    /// Underlying storage failure.
    #[error("incident.store_error: {0}")]
    Store(#[from] StoreError),
    /// The lifecycle event could not be appended or projected.
    #[error("incident.event_error: {0}")]
    Event(String),
}

impl From<rusqlite::Error> for IncidentError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

impl From<EventStoreError> for IncidentError {
    fn from(err: EventStoreError) -> Self {
        Self::Event(err.to_string())
    }
}

impl From<ProjectorError> for IncidentError {
    fn from(err: ProjectorError) -> Self {
        Self::Event(err.to_string())
    }
}

const fn severity_str(severity: IncidentSeverity) -> &'static str {
    match severity {
        IncidentSeverity::Info => "info",
        IncidentSeverity::Low => "low",
        IncidentSeverity::Medium => "medium",
        IncidentSeverity::High => "high",
        IncidentSeverity::Critical => "critical",
    }
}

/// A run's inheritable scope, read once when an incident binds to it.
struct RunScope {
    room_id: String,
    thread_id: String,
    correlation_id: String,
}

fn load_run_scope(tx: &Transaction<'_>, run_id: &RunId) -> Result<Option<RunScope>, IncidentError> {
    tx.query_row(
        "SELECT room_id, thread_id, correlation_id FROM runs WHERE run_id = ?1",
        params![run_id.as_str()],
        |row| {
            Ok(RunScope {
                room_id: row.get(0)?,
                thread_id: row.get(1)?,
                correlation_id: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// Appends `incident.opened`. When `run_id` is given, any of
/// `room_id`/`thread_id`/`correlation_id` left as `None` is filled in from
/// the run's own scope rather than left empty.
///
/// # Errors
///
/// Returns [`IncidentError`] on storage or projection failure.
#[allow(clippy::too_many_arguments)]
pub fn open(
    db: &Database,
    workspace_id: &WorkspaceId,
    incident_id: &IncidentId,
    severity: IncidentSeverity,
    run_id: Option<&RunId>,
    room_id: Option<&RoomId>,
    thread_id: Option<&ThreadId>,
    correlation_override: Option<&str>,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<Incident, IncidentError> {
    db.with_tx(|tx| {
        let run_scope = match run_id {
            Some(run_id) => load_run_scope(tx, run_id)?,
            None => None,
        };

        let resolved_room = room_id.map(|id| id.as_str().to_owned()).or_else(|| run_scope.as_ref().map(|s| s.room_id.clone()));
        let resolved_thread =
            thread_id.map(|id| id.as_str().to_owned()).or_else(|| run_scope.as_ref().map(|s| s.thread_id.clone()));
        let resolved_correlation = correlation_override
            .map(str::to_owned)
            .or_else(|| run_scope.as_ref().map(|s| s.correlation_id.clone()));

        let stream = resolved_room.clone().map_or_else(|| StreamRef::workspace(workspace_id), StreamRef::room);

        let event = NewEvent::new(
            "incident.opened",
            1,
            workspace_id.clone(),
            actor.clone(),
            stream,
            correlation_id.clone(),
            serde_json::json!({
                "incident_id": incident_id.as_str(),
                "severity": severity_str(severity),
                "run_id": run_id.map(opscore_core::RunId::as_str),
                "room_id": resolved_room,
                "thread_id": resolved_thread,
                "correlation_id": resolved_correlation,
            }),
            now,
        );
        let persisted = append_to_stream(tx, event)?;
        ProjectorRegistry::apply(tx, &persisted)?;
        load(tx, incident_id)?.ok_or(IncidentError::NotFound)
    })
}

/// Appends `rca.updated`. Requires the incident to be `open` and `payload`
/// to be neither `null` nor an empty object.
///
/// # Errors
///
/// Returns [`IncidentError::NotFound`], [`IncidentError::NotOpen`],
/// [`IncidentError::RcaPayloadEmpty`], or [`IncidentError`] on
/// storage/projection failure.
pub fn update_rca(
    db: &Database,
    workspace_id: &WorkspaceId,
    incident_id: &IncidentId,
    payload: Value,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<Incident, IncidentError> {
    if payload.is_null() || payload.as_object().is_some_and(serde_json::Map::is_empty) {
        return Err(IncidentError::RcaPayloadEmpty);
    }
    db.with_tx(|tx| {
        let row = load(tx, incident_id)?.ok_or(IncidentError::NotFound)?;
        if row.status != IncidentStatus::Open {
            return Err(IncidentError::NotOpen);
        }

        let event = NewEvent::new(
            "rca.updated",
            1,
            workspace_id.clone(),
            actor.clone(),
            incident_stream(&row),
            correlation_id.clone(),
            serde_json::json!({
                "incident_id": incident_id.as_str(),
                "payload": payload,
            }),
            now,
        );
        let persisted = append_to_stream(tx, event)?;
        ProjectorRegistry::apply(tx, &persisted)?;
        load(tx, incident_id)?.ok_or(IncidentError::NotFound)
    })
}

/// Appends `learning.logged`. Requires the incident to be `open` and `note`
/// to be non-empty once trimmed.
///
/// # Errors
///
/// Returns [`IncidentError::NotFound`], [`IncidentError::NotOpen`],
/// [`IncidentError::LearningNoteEmpty`], or [`IncidentError`] on
/// storage/projection failure.
pub fn log_learning(
    db: &Database,
    workspace_id: &WorkspaceId,
    incident_id: &IncidentId,
    note: &str,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<Incident, IncidentError> {
    if note.trim().is_empty() {
        return Err(IncidentError::LearningNoteEmpty);
    }
    db.with_tx(|tx| {
        let row = load(tx, incident_id)?.ok_or(IncidentError::NotFound)?;
        if row.status != IncidentStatus::Open {
            return Err(IncidentError::NotOpen);
        }

        let event = NewEvent::new(
            "learning.logged",
            1,
            workspace_id.clone(),
            actor.clone(),
            incident_stream(&row),
            correlation_id.clone(),
            serde_json::json!({
                "incident_id": incident_id.as_str(),
                "note": note,
            }),
            now,
        );
        let persisted = append_to_stream(tx, event)?;
        ProjectorRegistry::apply(tx, &persisted)?;
        load(tx, incident_id)?.ok_or(IncidentError::NotFound)
    })
}

/// Appends `incident.closed`. Requires `rca_updated_at` to be set and at
/// least one learning logged, checked in that order per spec §4.9.
///
/// # Errors
///
/// Returns [`IncidentError::NotFound`],
/// [`IncidentError::CloseBlockedMissingRca`],
/// [`IncidentError::CloseBlockedMissingLearning`], or [`IncidentError`] on
/// storage/projection failure.
pub fn close(
    db: &Database,
    workspace_id: &WorkspaceId,
    incident_id: &IncidentId,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<Incident, IncidentError> {
    db.with_tx(|tx| {
        let row = load(tx, incident_id)?.ok_or(IncidentError::NotFound)?;
        if row.rca_updated_at.is_none() {
            return Err(IncidentError::CloseBlockedMissingRca);
        }
        if row.learning_count() < 1 {
            return Err(IncidentError::CloseBlockedMissingLearning);
        }

        let event = NewEvent::new(
            "incident.closed",
            1,
            workspace_id.clone(),
            actor.clone(),
            incident_stream(&row),
            correlation_id.clone(),
            serde_json::json!({ "incident_id": incident_id.as_str() }),
            now,
        );
        let persisted = append_to_stream(tx, event)?;
        ProjectorRegistry::apply(tx, &persisted)?;
        load(tx, incident_id)?.ok_or(IncidentError::NotFound)
    })
}

fn incident_stream(row: &Incident) -> StreamRef {
    row.room_id.as_ref().map_or_else(|| StreamRef::workspace(&row.workspace_id), |room_id| StreamRef::room(room_id.as_str()))
}

fn load(tx: &Transaction<'_>, incident_id: &IncidentId) -> Result<Option<Incident>, IncidentError> {
    tx.query_row(
        "SELECT incident_id, workspace_id, severity, run_id, room_id, thread_id, correlation_id,
                rca, rca_updated_at, learnings, status, last_event_id, created_at, updated_at
         FROM incidents WHERE incident_id = ?1",
        params![incident_id.as_str()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, String>(12)?,
                row.get::<_, String>(13)?,
            ))
        },
    )
    .optional()?
    .map(
        |(
            incident_id,
            workspace_id,
            severity,
            run_id,
            room_id,
            thread_id,
            correlation_id,
            rca,
            rca_updated_at,
            learnings,
            status,
            last_event_id,
            created_at,
            updated_at,
        )| {
            let learnings: Vec<LearningEntry> = serde_json::from_str(&learnings).unwrap_or_default();
            Ok(Incident {
                incident_id: IncidentId::new(incident_id),
                workspace_id: WorkspaceId::new(workspace_id),
                severity: severity_from_str(&severity),
                run_id: run_id.map(RunId::new),
                room_id: room_id.map(RoomId::new),
                thread_id,
                correlation_id,
                rca: rca.map(|raw| serde_json::from_str(&raw).unwrap_or(Value::Null)),
                rca_updated_at: rca_updated_at
                    .map(|raw| Timestamp::parse_rfc3339(&raw).map_err(|e| StoreError::Io(e.to_string())))
                    .transpose()?,
                learnings,
                status: status_from_str(&status),
                last_event_id: last_event_id.map(opscore_core::EventId::new),
                created_at: Timestamp::parse_rfc3339(&created_at).map_err(|e| StoreError::Io(e.to_string()))?,
                updated_at: Timestamp::parse_rfc3339(&updated_at).map_err(|e| StoreError::Io(e.to_string()))?,
            })
        },
    )
    .transpose()
    .map_err(IncidentError::Store)
}

fn severity_from_str(value: &str) -> IncidentSeverity {
    match value {
        "low" => IncidentSeverity::Low,
        "medium" => IncidentSeverity::Medium,
        "high" => IncidentSeverity::High,
        "critical" => IncidentSeverity::Critical,
        _ => IncidentSeverity::Info,
    }
}

fn status_from_str(value: &str) -> IncidentStatus {
    if value == "closed" {
        IncidentStatus::Closed
    } else {
        IncidentStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use opscore_core::Actor;
    use opscore_core::CorrelationId;
    use opscore_core::IncidentId;
    use opscore_core::IncidentSeverity;
    use opscore_core::IncidentStatus;
    use opscore_core::RunId;
    use opscore_core::Timestamp;
    use opscore_core::WorkspaceId;

    use super::close;
    use super::log_learning;
    use super::open;
    use super::update_rca;
    use super::IncidentError;

    fn test_db() -> opscore_store::Database {
        let db = opscore_store::Database::open_in_memory().expect("open db");
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            opscore_store::ProjectorRegistry::ensure_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))
        })
        .expect("schema");
        db
    }

    fn seed_run(db: &opscore_store::Database) {
        db.with_conn::<_, opscore_store::StoreError>(|conn| {
            conn.execute(
                "INSERT INTO runs (run_id, workspace_id, room_id, thread_id, title, goal, input, tags, correlation_id, status, created_at, updated_at)
                 VALUES ('run-1','ws-1','room-from-run','thread-from-run','t','g','null','[]','corr-from-run','queued','2024-01-01T00:00:00Z','2024-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .expect("seed run");
    }

    #[test]
    fn open_inherits_scope_from_bound_run() {
        let db = test_db();
        seed_run(&db);
        let incident = open(
            &db,
            &WorkspaceId::new("ws-1"),
            &IncidentId::new("inc-1"),
            IncidentSeverity::High,
            Some(&RunId::new("run-1")),
            None,
            None,
            None,
            &CorrelationId::new("corr-1"),
            &Actor::user("u1"),
            Timestamp::now(),
        )
        .expect("open");
        assert_eq!(incident.room_id.as_ref().map(opscore_core::RoomId::as_str), Some("room-from-run"));
        assert_eq!(incident.correlation_id.as_deref(), Some("corr-from-run"));
    }

    #[test]
    fn close_requires_rca_then_learning() {
        let db = test_db();
        let incident = open(
            &db,
            &WorkspaceId::new("ws-1"),
            &IncidentId::new("inc-2"),
            IncidentSeverity::Medium,
            None,
            None,
            None,
            None,
            &CorrelationId::new("corr-1"),
            &Actor::user("u1"),
            Timestamp::now(),
        )
        .expect("open");
        assert_eq!(incident.status, IncidentStatus::Open);

        let blocked_on_rca = close(&db, &WorkspaceId::new("ws-1"), &IncidentId::new("inc-2"), &CorrelationId::new("corr-1"), &Actor::user("u1"), Timestamp::now());
        assert!(matches!(blocked_on_rca, Err(IncidentError::CloseBlockedMissingRca)));

        update_rca(
            &db,
            &WorkspaceId::new("ws-1"),
            &IncidentId::new("inc-2"),
            serde_json::json!({"root_cause": "timeout"}),
            &CorrelationId::new("corr-1"),
            &Actor::user("u1"),
            Timestamp::now(),
        )
        .expect("rca");

        let blocked_on_learning = close(&db, &WorkspaceId::new("ws-1"), &IncidentId::new("inc-2"), &CorrelationId::new("corr-1"), &Actor::user("u1"), Timestamp::now());
        assert!(matches!(blocked_on_learning, Err(IncidentError::CloseBlockedMissingLearning)));

        log_learning(
            &db,
            &WorkspaceId::new("ws-1"),
            &IncidentId::new("inc-2"),
            "add a timeout budget",
            &CorrelationId::new("corr-1"),
            &Actor::user("u1"),
            Timestamp::now(),
        )
        .expect("learning");

        let closed =
            close(&db, &WorkspaceId::new("ws-1"), &IncidentId::new("inc-2"), &CorrelationId::new("corr-1"), &Actor::user("u1"), Timestamp::now())
                .expect("close");
        assert_eq!(closed.status, IncidentStatus::Closed);
    }
}
