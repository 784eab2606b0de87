// crates/opscore-store/src/projectors/core_projector.rs
// ============================================================================
// Module: Core Projector
// Description: Materializes rooms, threads, and messages from their
//              creation events.
// Purpose: Implements the `coreProjector` named in spec §4.3.
// Dependencies: rusqlite, opscore_core::event, crate::projectors
// ============================================================================

use opscore_core::PersistedEvent;
use rusqlite::Transaction;
use rusqlite::params;

use super::ProjectorError;
use super::require_str;

/// Applies a `room.created` event, inserting the room row if absent.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing `room_id`/`name`
/// or the write fails.
pub fn apply_room_created(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let room_id = require_str(data, "room_id")?;
    let name = require_str(data, "name")?;
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    tx.execute(
        "INSERT OR IGNORE INTO rooms (room_id, workspace_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![room_id, event.workspace_id().as_str(), name, occurred_at],
    )?;
    Ok(())
}

/// Applies a `thread.created` event, inserting the thread row if absent.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_thread_created(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let thread_id = require_str(data, "thread_id")?;
    let room_id = require_str(data, "room_id")?;
    let title = require_str(data, "title")?;
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    tx.execute(
        "INSERT OR IGNORE INTO threads (thread_id, room_id, workspace_id, title, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![thread_id, room_id, event.workspace_id().as_str(), title, occurred_at],
    )?;
    Ok(())
}

/// Applies a `message.created` event, inserting the message row if absent.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_message_created(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let message_id = require_str(data, "message_id")?;
    let thread_id = require_str(data, "thread_id")?;
    let body = data
        .get("body")
        .cloned()
        .ok_or_else(|| ProjectorError::MissingField("body".into()))?;
    let body_json = serde_json::to_string(&body).map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    tx.execute(
        "INSERT OR IGNORE INTO messages (message_id, thread_id, workspace_id, author_id, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![message_id, thread_id, event.workspace_id().as_str(), event.envelope.actor.id, body_json, occurred_at],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use opscore_core::Actor;
    use opscore_core::CorrelationId;
    use opscore_core::NewEvent;
    use opscore_core::StreamRef;
    use opscore_core::Timestamp;
    use rusqlite::Connection;

    use super::*;
    use crate::projectors::schema::ensure_schema;

    fn persisted(event_type: &str, data: serde_json::Value) -> PersistedEvent {
        let new = NewEvent::new(
            event_type,
            1,
            "ws-1".into(),
            Actor::user("user-1"),
            StreamRef::room("room-1"),
            CorrelationId::new("corr-1"),
            data,
            Timestamp::now(),
        );
        PersistedEvent::new("evt-1".into(), 1, new)
    }

    #[test]
    fn room_created_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        let event = persisted("room.created", serde_json::json!({"room_id": "room-1", "name": "General"}));
        apply_room_created(&tx, &event).unwrap();
        apply_room_created(&tx, &event).unwrap();
        let count: i64 = tx.query_row("SELECT COUNT(*) FROM rooms", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
