// crates/opscore-store/src/projectors/incident_projector.rs
// ============================================================================
// Module: Incident Projector
// Description: Materializes incidents from opened/rca/learning/closed
//              events.
// Purpose: Implements the `incidentProjector` named in spec §4.3.
// Dependencies: rusqlite, opscore_core::event, crate::projectors
// ============================================================================

use opscore_core::PersistedEvent;
use rusqlite::Transaction;
use rusqlite::params;

use super::ProjectorError;
use super::optional_str;
use super::require_str;

/// Applies an `incident.opened` event, inserting the incident row if
/// absent.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_opened(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let incident_id = require_str(data, "incident_id")?;
    let severity = require_str(data, "severity")?;
    let run_id = optional_str(data, "run_id");
    let room_id = optional_str(data, "room_id");
    let thread_id = optional_str(data, "thread_id");
    let correlation_id = optional_str(data, "correlation_id");
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;

    tx.execute(
        "INSERT OR IGNORE INTO incidents (
            incident_id, workspace_id, severity, run_id, room_id, thread_id, correlation_id, rca,
            rca_updated_at, learnings, status, last_event_id, created_at, updated_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,NULL,NULL,'[]','open',?8,?9,?9)",
        params![
            incident_id,
            event.workspace_id().as_str(),
            severity,
            run_id,
            room_id,
            thread_id,
            correlation_id,
            event.event_id.as_str(),
            occurred_at,
        ],
    )?;
    Ok(())
}

/// Applies an `rca.updated` event. A no-op unless the incident is still
/// `open`.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_rca_updated(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let incident_id = require_str(data, "incident_id")?;
    let payload = data.get("payload").cloned().ok_or_else(|| ProjectorError::MissingField("payload".into()))?;
    let payload_json = serde_json::to_string(&payload).map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    tx.execute(
        "UPDATE incidents SET rca = ?1, rca_updated_at = ?2, last_event_id = ?3, updated_at = ?2
         WHERE incident_id = ?4 AND status = 'open'",
        params![payload_json, occurred_at, event.event_id.as_str(), incident_id],
    )?;
    Ok(())
}

/// Applies a `learning.logged` event. A no-op unless the incident is still
/// `open`.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_learning_logged(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let incident_id = require_str(data, "incident_id")?;
    let note = require_str(data, "note")?;
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;

    let status: Option<String> = tx
        .query_row("SELECT status FROM incidents WHERE incident_id = ?1", params![incident_id], |row| row.get(0))
        .ok();
    if status.as_deref() != Some("open") {
        return Ok(());
    }

    let existing: String = tx
        .query_row("SELECT learnings FROM incidents WHERE incident_id = ?1", params![incident_id], |row| row.get(0))
        .map_err(|e| ProjectorError::Store(crate::db::StoreError::Db(e)))?;
    let mut learnings: Vec<serde_json::Value> = serde_json::from_str(&existing).unwrap_or_default();
    learnings.push(serde_json::json!({
        "note": note,
        "logged_by": event.envelope.actor.id,
        "logged_at": occurred_at,
    }));
    let learnings_json = serde_json::to_string(&learnings).map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;

    tx.execute(
        "UPDATE incidents SET learnings = ?1, last_event_id = ?2, updated_at = ?3 WHERE incident_id = ?4",
        params![learnings_json, event.event_id.as_str(), occurred_at, incident_id],
    )?;
    Ok(())
}

/// Applies an `incident.closed` event, setting `status = 'closed'`.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing `incident_id` or
/// the write fails.
pub fn apply_closed(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let incident_id = require_str(&event.envelope.data, "incident_id")?;
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    tx.execute(
        "UPDATE incidents SET status = 'closed', last_event_id = ?1, updated_at = ?2 WHERE incident_id = ?3",
        params![event.event_id.as_str(), occurred_at, incident_id],
    )?;
    Ok(())
}
