// crates/opscore-store/src/events.rs
// ============================================================================
// Module: Event Store
// Description: Append-only event log with per-stream ordering and strict
//              idempotency.
// Purpose: Give every write path a single, race-free way to persist an
//          event and hand back the canonical envelope.
// Dependencies: rusqlite, opscore_core::event, crate::db
// ============================================================================

//! ## Overview
//! `append_to_stream` is the only write path onto the event table. It
//! assigns a per-stream monotonic `stream_position` inside the caller's
//! transaction, enforces the `(workspace_id, idempotency_key)` uniqueness
//! invariant via a verbatim re-read on conflict, and never mutates a
//! previously persisted row: the log is append-only end to end.

use opscore_core::Actor;
use opscore_core::ActorKind;
use opscore_core::EventContext;
use opscore_core::EventId;
use opscore_core::EventScope;
use opscore_core::NewEvent;
use opscore_core::PersistedEvent;
use opscore_core::StreamKind;
use opscore_core::StreamRef;
use opscore_core::Timestamp;
use opscore_core::WorkspaceId;
use rand::RngCore;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::params;
use thiserror::Error;

use crate::db::StoreError;

/// Errors raised while appending to the event log.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A required envelope field was missing or empty.
    #[error("event_store.validation_failed: {0}")]
    ValidationFailed(String),
    /// The append could not be completed due to a storage failure.
    #[error("event_store.append_failed: {0}")]
    AppendFailed(#[from] StoreError),
}

impl From<rusqlite::Error> for EventStoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::AppendFailed(StoreError::Db(err))
    }
}

/// Creates the event-store schema if it does not already exist.
///
/// # Errors
///
/// Returns [`EventStoreError`] on any underlying SQLite failure.
pub fn ensure_schema(tx: &Transaction<'_>) -> Result<(), EventStoreError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            event_id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            event_version INTEGER NOT NULL,
            workspace_id TEXT NOT NULL,
            room_id TEXT,
            thread_id TEXT,
            run_id TEXT,
            step_id TEXT,
            mission_id TEXT,
            actor_kind TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            actor_principal_id TEXT,
            stream_type TEXT NOT NULL,
            stream_id TEXT NOT NULL,
            stream_position INTEGER NOT NULL,
            correlation_id TEXT NOT NULL,
            causation_id TEXT,
            occurred_at TEXT NOT NULL,
            idempotency_key TEXT,
            payload TEXT NOT NULL,
            policy_context TEXT,
            model_context TEXT,
            display_context TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_idempotency
            ON events (workspace_id, idempotency_key)
            WHERE idempotency_key IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_stream_position
            ON events (stream_type, stream_id, stream_position);
        CREATE INDEX IF NOT EXISTS idx_events_stream
            ON events (stream_type, stream_id, occurred_at);",
    )?;
    Ok(())
}

/// Appends `new_event` to its stream within `tx`.
///
/// If `new_event.idempotency_key` is `Some` and a row already exists for
/// `(workspace_id, idempotency_key)`, the original persisted event is
/// returned verbatim and no new row is written — this is the at-most-once
/// guarantee, not a failure.
///
/// # Errors
///
/// Returns [`EventStoreError::ValidationFailed`] when a required field is
/// missing, or [`EventStoreError::AppendFailed`] on a storage failure.
pub fn append_to_stream(
    tx: &Transaction<'_>,
    new_event: NewEvent,
) -> Result<PersistedEvent, EventStoreError> {
    validate(&new_event)?;

    if let Some(key) = new_event.idempotency_key.as_ref() {
        if let Some(existing) = find_by_idempotency_key(tx, &new_event.workspace_id, key.as_str())? {
            return Ok(existing);
        }
    }

    let next_position = next_stream_position(tx, &new_event.stream)?;
    let persisted = PersistedEvent::new(new_event_id(), next_position, new_event);
    insert_row(tx, &persisted)?;
    Ok(persisted)
}

fn new_event_id() -> EventId {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(36);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    EventId::new(format!("evt_{hex}"))
}

fn validate(event: &NewEvent) -> Result<(), EventStoreError> {
    if event.event_type.trim().is_empty() {
        return Err(EventStoreError::ValidationFailed("event_type is required".into()));
    }
    if event.workspace_id.as_str().is_empty() {
        return Err(EventStoreError::ValidationFailed("workspace_id is required".into()));
    }
    if event.stream.id.trim().is_empty() {
        return Err(EventStoreError::ValidationFailed("stream.id is required".into()));
    }
    if event.correlation_id.as_str().is_empty() {
        return Err(EventStoreError::ValidationFailed("correlation_id is required".into()));
    }
    if event.actor.id.trim().is_empty() {
        return Err(EventStoreError::ValidationFailed("actor.id is required".into()));
    }
    Ok(())
}

fn find_by_idempotency_key(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    key: &str,
) -> Result<Option<PersistedEvent>, EventStoreError> {
    let mut stmt = tx.prepare_cached(
        "SELECT event_id, event_type, event_version, workspace_id, room_id, thread_id, run_id,
                step_id, mission_id, actor_kind, actor_id, actor_principal_id, stream_type,
                stream_id, stream_position, correlation_id, causation_id, occurred_at,
                idempotency_key, payload, policy_context, model_context, display_context
         FROM events WHERE workspace_id = ?1 AND idempotency_key = ?2",
    )?;
    let row = stmt
        .query_row(params![workspace_id.as_str(), key], row_to_event)
        .optional()?
        .transpose()
        .map_err(|err: time::error::Parse| {
            EventStoreError::AppendFailed(StoreError::Io(err.to_string()))
        })?;
    Ok(row)
}

fn next_stream_position(tx: &Transaction<'_>, stream: &StreamRef) -> Result<u64, EventStoreError> {
    let current: Option<i64> = tx
        .query_row(
            "SELECT MAX(stream_position) FROM events WHERE stream_type = ?1 AND stream_id = ?2",
            params![stream_kind_str(stream.kind), stream.id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    Ok(current.unwrap_or(0) as u64 + 1)
}

fn insert_row(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), EventStoreError> {
    let envelope = &event.envelope;
    let payload = serde_json::to_string(&envelope.data)
        .map_err(|err| EventStoreError::ValidationFailed(format!("payload not serializable: {err}")))?;
    let policy_context = optional_json(&envelope.context.policy)?;
    let model_context = optional_json(&envelope.context.model)?;
    let display_context = optional_json(&envelope.context.display)?;
    let occurred_at = envelope
        .occurred_at
        .to_rfc3339()
        .map_err(|err| EventStoreError::ValidationFailed(format!("occurred_at not formattable: {err}")))?;

    tx.execute(
        "INSERT INTO events (
            event_id, event_type, event_version, workspace_id, room_id, thread_id, run_id,
            step_id, mission_id, actor_kind, actor_id, actor_principal_id, stream_type,
            stream_id, stream_position, correlation_id, causation_id, occurred_at,
            idempotency_key, payload, policy_context, model_context, display_context
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23)",
        params![
            event.event_id.as_str(),
            envelope.event_type,
            envelope.version,
            envelope.workspace_id.as_str(),
            envelope.scope.room_id,
            envelope.scope.thread_id,
            envelope.scope.run_id,
            envelope.scope.step_id,
            envelope.scope.mission_id,
            actor_kind_str(envelope.actor.kind),
            envelope.actor.id,
            envelope.actor.principal_id.as_ref().map(|v| v.as_str()),
            stream_kind_str(envelope.stream.kind),
            envelope.stream.id,
            event.stream_position as i64,
            envelope.correlation_id.as_str(),
            envelope.causation_id.as_ref().map(|v| v.as_str()),
            occurred_at,
            envelope.idempotency_key.as_ref().map(|v| v.as_str()),
            payload,
            policy_context,
            model_context,
            display_context,
        ],
    )?;
    Ok(())
}

fn optional_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, EventStoreError> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|err| EventStoreError::ValidationFailed(format!("context not serializable: {err}")))
}

fn actor_kind_str(kind: ActorKind) -> &'static str {
    match kind {
        ActorKind::User => "user",
        ActorKind::Service => "service",
        ActorKind::Agent => "agent",
    }
}

fn actor_kind_from_str(value: &str) -> ActorKind {
    match value {
        "service" => ActorKind::Service,
        "agent" => ActorKind::Agent,
        _ => ActorKind::User,
    }
}

fn stream_kind_str(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Room => "room",
        StreamKind::Workspace => "workspace",
        StreamKind::Thread => "thread",
    }
}

fn stream_kind_from_str(value: &str) -> StreamKind {
    match value {
        "workspace" => StreamKind::Workspace,
        "thread" => StreamKind::Thread,
        _ => StreamKind::Room,
    }
}

pub(crate) fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Result<PersistedEvent, time::error::Parse>> {
    let payload: String = row.get("payload")?;
    let payload: serde_json::Value = serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null);
    let policy_context: Option<String> = row.get("policy_context")?;
    let model_context: Option<String> = row.get("model_context")?;
    let display_context: Option<String> = row.get("display_context")?;
    let stream_position: i64 = row.get("stream_position")?;

    let occurred_at: String = row.get("occurred_at")?;
    let occurred_at = match Timestamp::parse_rfc3339(&occurred_at) {
        Ok(ts) => ts,
        Err(err) => return Ok(Err(err)),
    };

    let envelope = NewEvent {
        event_type: row.get("event_type")?,
        version: row.get("event_version")?,
        workspace_id: row.get::<_, String>("workspace_id")?.into(),
        scope: EventScope {
            room_id: row.get("room_id")?,
            thread_id: row.get("thread_id")?,
            run_id: row.get("run_id")?,
            step_id: row.get("step_id")?,
            mission_id: row.get("mission_id")?,
        },
        actor: Actor {
            kind: actor_kind_from_str(&row.get::<_, String>("actor_kind")?),
            id: row.get("actor_id")?,
            principal_id: row.get::<_, Option<String>>("actor_principal_id")?.map(Into::into),
        },
        stream: StreamRef {
            kind: stream_kind_from_str(&row.get::<_, String>("stream_type")?),
            id: row.get("stream_id")?,
        },
        correlation_id: row.get::<_, String>("correlation_id")?.into(),
        causation_id: row.get::<_, Option<String>>("causation_id")?.map(Into::into),
        data: payload,
        idempotency_key: row.get::<_, Option<String>>("idempotency_key")?.map(Into::into),
        context: EventContext {
            policy: policy_context.and_then(|v| serde_json::from_str(&v).ok()),
            model: model_context.and_then(|v| serde_json::from_str(&v).ok()),
            display: display_context.and_then(|v| serde_json::from_str(&v).ok()),
        },
        occurred_at,
    };

    Ok(Ok(PersistedEvent::new(
        row.get::<_, String>("event_id")?.into(),
        stream_position as u64,
        envelope,
    )))
}

#[cfg(test)]
mod tests {
    use opscore_core::ActorKind;
    use opscore_core::CorrelationId;
    use opscore_core::IdempotencyKey;
    use opscore_core::StreamKind;
    use rusqlite::Connection;

    use super::*;

    fn event(stream_id: &str, idempotency_key: Option<&str>) -> NewEvent {
        NewEvent::new(
            "run.created",
            1,
            "ws-1".into(),
            Actor::user("user-1"),
            StreamRef::room(stream_id),
            CorrelationId::new("corr-1"),
            serde_json::json!({"k": "v"}),
            Timestamp::now(),
        )
        .with_idempotency_key(idempotency_key.map(IdempotencyKey::new))
    }

    #[test]
    fn stream_position_increases_monotonically() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        let first = append_to_stream(&tx, event("room-1", None)).unwrap();
        let second = append_to_stream(&tx, event("room-1", None)).unwrap();
        assert_eq!(first.stream_position, 1);
        assert_eq!(second.stream_position, 2);
    }

    #[test]
    fn duplicate_idempotency_key_returns_original() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        let first = append_to_stream(&tx, event("room-1", Some("idem-1"))).unwrap();
        let second = append_to_stream(&tx, event("room-1", Some("idem-1"))).unwrap();
        assert_eq!(first.event_id, second.event_id);
        assert_eq!(first.occurred_at(), second.occurred_at());
        assert_eq!(second.stream_position, 1);
    }

    #[test]
    fn validation_failed_on_missing_correlation_id() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        let mut bad = event("room-1", None);
        bad.correlation_id = CorrelationId::new("");
        let result = append_to_stream(&tx, bad);
        assert!(matches!(result, Err(EventStoreError::ValidationFailed(_))));
    }

    #[test]
    fn independent_streams_have_independent_positions() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        append_to_stream(&tx, event("room-1", None)).unwrap();
        let other_stream = append_to_stream(&tx, event("room-2", None)).unwrap();
        assert_eq!(other_stream.stream_position, 1);
    }
}
