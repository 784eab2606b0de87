// crates/opscore-store/src/projectors/run_projector.rs
// ============================================================================
// Module: Run Projector
// Description: Materializes runs and steps from their lifecycle events.
// Purpose: Implements the `runProjector` named in spec §4.3.
// Dependencies: rusqlite, opscore_core::event, crate::projectors
// ============================================================================

use opscore_core::PersistedEvent;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;

use super::ProjectorError;
use super::optional_str;
use super::require_str;

/// Applies a `run.created` event, inserting the run row if absent.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_run_created(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let run_id = require_str(data, "run_id")?;
    let room_id = require_str(data, "room_id")?;
    let thread_id = require_str(data, "thread_id")?;
    let title = require_str(data, "title")?;
    let goal = require_str(data, "goal")?;
    let experiment_id = optional_str(data, "experiment_id");
    let input = data.get("input").cloned().unwrap_or(serde_json::Value::Null);
    let tags: Vec<String> = data
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    let input_json = serde_json::to_string(&input).map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    let tags_json = serde_json::to_string(&tags).map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    let occurred_at = render_time(event)?;

    tx.execute(
        "INSERT OR IGNORE INTO runs (
            run_id, workspace_id, room_id, thread_id, experiment_id, title, goal, input, output,
            error, tags, correlation_id, status, claim_token, claimed_by_actor_id, lease_expires_at,
            lease_heartbeat_at, last_event_id, created_at, updated_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,NULL,NULL,?9,?10,'queued',NULL,NULL,NULL,NULL,?11,?12,?12)",
        params![
            run_id,
            event.workspace_id().as_str(),
            room_id,
            thread_id,
            experiment_id,
            title,
            goal,
            input_json,
            tags_json,
            event.envelope.correlation_id.as_str(),
            event.event_id.as_str(),
            occurred_at,
        ],
    )?;
    Ok(())
}

/// Applies a `run.started` event: transitions the run to `running`.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing `run_id` or the
/// write fails.
pub fn apply_run_started(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let run_id = require_str(&event.envelope.data, "run_id")?;
    if already_applied(tx, run_id, event)? {
        return Ok(());
    }
    let occurred_at = render_time(event)?;
    tx.execute(
        "UPDATE runs SET status = 'running', last_event_id = ?1, updated_at = ?2 WHERE run_id = ?3",
        params![event.event_id.as_str(), occurred_at, run_id],
    )?;
    Ok(())
}

/// Applies a `run.completed` event: transitions the run to `succeeded` and
/// records its output.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing `run_id` or the
/// write fails.
pub fn apply_run_completed(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let run_id = require_str(data, "run_id")?;
    if already_applied(tx, run_id, event)? {
        return Ok(());
    }
    let output = data.get("output").cloned().unwrap_or(serde_json::Value::Null);
    let output_json = serde_json::to_string(&output).map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    let occurred_at = render_time(event)?;
    tx.execute(
        "UPDATE runs SET status = 'succeeded', output = ?1, last_event_id = ?2, updated_at = ?3 WHERE run_id = ?4",
        params![output_json, event.event_id.as_str(), occurred_at, run_id],
    )?;
    Ok(())
}

/// Applies a `run.failed` event: transitions the run to `failed` and
/// records its error.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing `run_id` or the
/// write fails.
pub fn apply_run_failed(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let run_id = require_str(data, "run_id")?;
    if already_applied(tx, run_id, event)? {
        return Ok(());
    }
    let error = data.get("error").cloned().unwrap_or(serde_json::Value::Null);
    let error_json = serde_json::to_string(&error).map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    let occurred_at = render_time(event)?;
    tx.execute(
        "UPDATE runs SET status = 'failed', error = ?1, last_event_id = ?2, updated_at = ?3 WHERE run_id = ?4",
        params![error_json, event.event_id.as_str(), occurred_at, run_id],
    )?;
    Ok(())
}

/// Applies a `step.created` event, inserting the step row if absent.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_step_created(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let step_id = require_str(data, "step_id")?;
    let run_id = require_str(data, "run_id")?;
    let title = require_str(data, "title")?;
    let payload = data.get("payload").cloned().unwrap_or(serde_json::Value::Null);
    let payload_json = serde_json::to_string(&payload).map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    let occurred_at = render_time(event)?;
    tx.execute(
        "INSERT OR IGNORE INTO steps (step_id, run_id, workspace_id, title, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![step_id, run_id, event.workspace_id().as_str(), title, payload_json, occurred_at],
    )?;
    Ok(())
}

fn render_time(event: &PersistedEvent) -> Result<String, ProjectorError> {
    event
        .envelope
        .occurred_at
        .to_rfc3339()
        .map_err(|err| ProjectorError::InvalidPayload(err.to_string()))
}

/// Returns whether `run_id`'s row already reflects `event` (its
/// `last_event_id` already matches), making the mutating apply a no-op.
fn already_applied(tx: &Transaction<'_>, run_id: &str, event: &PersistedEvent) -> Result<bool, ProjectorError> {
    let last_event_id: Option<String> = tx
        .query_row("SELECT last_event_id FROM runs WHERE run_id = ?1", params![run_id], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(last_event_id.as_deref() == Some(event.event_id.as_str()))
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

    fn persisted(id: &str, event_type: &str, data: serde_json::Value) -> PersistedEvent {
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
        PersistedEvent::new(id.into(), 1, new)
    }

    #[test]
    fn run_lifecycle_projects_forward() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        let created = persisted(
            "evt-1",
            "run.created",
            serde_json::json!({"run_id": "run-1", "room_id": "room-1", "thread_id": "thread-1", "title": "t", "goal": "g"}),
        );
        apply_run_created(&tx, &created).unwrap();
        let started = persisted("evt-2", "run.started", serde_json::json!({"run_id": "run-1"}));
        apply_run_started(&tx, &started).unwrap();
        let status: String = tx.query_row("SELECT status FROM runs WHERE run_id = 'run-1'", [], |r| r.get(0)).unwrap();
        assert_eq!(status, "running");

        // Re-applying the same event is a no-op: status does not regress or re-trigger.
        apply_run_started(&tx, &started).unwrap();
        let status: String = tx.query_row("SELECT status FROM runs WHERE run_id = 'run-1'", [], |r| r.get(0)).unwrap();
        assert_eq!(status, "running");
    }
}
