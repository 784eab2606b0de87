// crates/opscore-store/src/projectors/approval_projector.rs
// ============================================================================
// Module: Approval Projector
// Description: Materializes approvals from request/decide events.
// Purpose: Implements the `approvalProjector` named in spec §4.3.
// Dependencies: rusqlite, opscore_core::event, crate::projectors
// ============================================================================

use opscore_core::PersistedEvent;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;

use super::ProjectorError;
use super::optional_str;
use super::require_str;

/// Applies an `approval.requested` event, inserting the pending approval
/// row if absent.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_requested(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let approval_id = require_str(data, "approval_id")?;
    let action_code = require_str(data, "action_code")?;
    let scope = require_str(data, "scope")?;
    let scope_snapshot = data.get("scope_snapshot").cloned().unwrap_or(serde_json::Value::Null);
    let scope_snapshot_json = serde_json::to_string(&scope_snapshot).map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    let expires_at = optional_str(data, "expires_at");
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;

    tx.execute(
        "INSERT OR IGNORE INTO approvals (
            approval_id, workspace_id, action_code, scope, scope_snapshot, expires_at, status,
            decided_by, last_event_id, created_at, updated_at
        ) VALUES (?1,?2,?3,?4,?5,?6,'pending',NULL,?7,?8,?8)",
        params![
            approval_id,
            event.workspace_id().as_str(),
            action_code,
            scope,
            scope_snapshot_json,
            expires_at,
            event.event_id.as_str(),
            occurred_at,
        ],
    )?;
    Ok(())
}

/// Applies an `approval.decided` event. A no-op once the approval is
/// already `approved` or `denied`: terminal states are sinks.
///
/// # Errors
///
/// Returns [`ProjectorError`] when the payload is missing required fields
/// or the write fails.
pub fn apply_decided(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), ProjectorError> {
    let data = &event.envelope.data;
    let approval_id = require_str(data, "approval_id")?;
    let decision = require_str(data, "decision")?;
    let decided_by = optional_str(data, "decided_by").unwrap_or(&event.envelope.actor.id);

    let current_status: Option<String> = tx
        .query_row("SELECT status FROM approvals WHERE approval_id = ?1", params![approval_id], |row| row.get(0))
        .optional()?;
    let Some(current_status) = current_status else {
        return Err(ProjectorError::MissingField(format!("approval {approval_id} not found")));
    };
    if current_status == "approved" || current_status == "denied" {
        // Terminal; further decisions are recorded in the event log but do
        // not change the projection (spec §3, §8: terminal states are sinks).
        return Ok(());
    }

    let new_status = match decision {
        "approve" | "approved" => "approved",
        "deny" | "denied" => "denied",
        "hold" | "held" => "held",
        other => return Err(ProjectorError::InvalidPayload(format!("unknown decision {other}"))),
    };
    let occurred_at = event.envelope.occurred_at.to_rfc3339().map_err(|e| ProjectorError::InvalidPayload(e.to_string()))?;
    tx.execute(
        "UPDATE approvals SET status = ?1, decided_by = ?2, last_event_id = ?3, updated_at = ?4 WHERE approval_id = ?5",
        params![new_status, decided_by, event.event_id.as_str(), occurred_at, approval_id],
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

    fn persisted(id: &str, event_type: &str, data: serde_json::Value) -> PersistedEvent {
        let new = NewEvent::new(
            event_type,
            1,
            "ws-1".into(),
            Actor::user("user-1"),
            StreamRef::workspace(&"ws-1".into()),
            CorrelationId::new("corr-1"),
            data,
            Timestamp::now(),
        );
        PersistedEvent::new(id.into(), 1, new)
    }

    #[test]
    fn terminal_decision_is_a_sink() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        apply_requested(
            &tx,
            &persisted(
                "evt-1",
                "approval.requested",
                serde_json::json!({"approval_id": "a1", "action_code": "external.write", "scope": "once"}),
            ),
        )
        .unwrap();
        apply_decided(&tx, &persisted("evt-2", "approval.decided", serde_json::json!({"approval_id": "a1", "decision": "approve"})))
            .unwrap();
        apply_decided(&tx, &persisted("evt-3", "approval.decided", serde_json::json!({"approval_id": "a1", "decision": "deny"})))
            .unwrap();
        let (status, last_event_id): (String, String) =
            tx.query_row("SELECT status, last_event_id FROM approvals WHERE approval_id = 'a1'", [], |r| Ok((r.get(0)?, r.get(1)?))).unwrap();
        assert_eq!(status, "approved");
        assert_eq!(last_event_id, "evt-2");
    }
}
