// crates/opscore-store/src/projectors/experiment_projector.rs
// ============================================================================
// Module: Experiment Projector
// Description: Materializes experiments from create/update/close events.
// Purpose: Implements the `experimentProjector` named in spec §4.3.
// Dependencies: rusqlite, opscore_core::event, crate::projectors
// ============================================================================

use opscore_core::PersistedEvent;
use rusqlite::Transaction;
use rusqlite::params;

use super::ProjectorError;
use super::optional_str;
use super::require_str;

/// Applies an `experiment.created` event, inserting the experiment row if
/// absent.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_created(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let experiment_id = require_str(data, "experiment_id")?;
    let room_id = require_str(data, "room_id")?;
    let title = require_str(data, "title")?;
    let hypothesis = require_str(data, "hypothesis")?;
    let risk_tier = require_str(data, "risk_tier")?;
    let budget_cap_units = data.get("budget_cap_units").and_then(serde_json::Value::as_u64).unwrap_or(0);
    let success_criteria = json_string_array(data, "success_criteria");
    let stop_conditions = json_string_array(data, "stop_conditions");
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;

    tx.execute(
        "INSERT OR IGNORE INTO experiments (
            experiment_id, workspace_id, room_id, title, hypothesis, success_criteria,
            stop_conditions, budget_cap_units, risk_tier, status, close_reason, active_run_count,
            last_event_id, created_at, updated_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,'open',NULL,0,?10,?11,?11)",
        params![
            experiment_id,
            event.workspace_id().as_str(),
            room_id,
            title,
            hypothesis,
            success_criteria,
            stop_conditions,
            budget_cap_units as i64,
            risk_tier,
            event.event_id.as_str(),
            occurred_at,
        ],
    )?;
    Ok(())
}

/// Applies an `experiment.updated` event. A no-op unless the experiment is
/// still `open`.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing `experiment_id`
/// or the write fails.
pub fn apply_updated(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let experiment_id = require_str(data, "experiment_id")?;
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    let active_run_count = data.get("active_run_count").and_then(serde_json::Value::as_u64);

    if let Some(title) = optional_str(data, "title") {
        tx.execute(
            "UPDATE experiments SET title = ?1, last_event_id = ?2, updated_at = ?3 WHERE experiment_id = ?4 AND status = 'open'",
            params![title, event.event_id.as_str(), occurred_at, experiment_id],
        )?;
    }
    if let Some(count) = active_run_count {
        tx.execute(
            "UPDATE experiments SET active_run_count = ?1, last_event_id = ?2, updated_at = ?3 WHERE experiment_id = ?4 AND status = 'open'",
            params![count as i64, event.event_id.as_str(), occurred_at, experiment_id],
        )?;
    }
    Ok(())
}

/// Applies an `experiment.closed` event, setting `status` to `closed` or
/// `stopped` and recording `close_reason`.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_closed(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let experiment_id = require_str(data, "experiment_id")?;
    let status = require_str(data, "status")?;
    let reason = optional_str(data, "reason");
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    tx.execute(
        "UPDATE experiments SET status = ?1, close_reason = ?2, last_event_id = ?3, updated_at = ?4 WHERE experiment_id = ?5",
        params![status, reason, event.event_id.as_str(), occurred_at, experiment_id],
    )?;
    Ok(())
}

fn json_string_array(data: &serde_json::Value, field: &str) -> String {
    let values: Vec<String> = data
        .get(field)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    serde_json::to_string(&values).unwrap_or_else(|_| "[]".to_owned())
}
