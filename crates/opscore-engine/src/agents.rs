// crates/opscore-engine/src/agents.rs
// ============================================================================
// Module: Agent Registry
// Description: Register/quarantine lifecycle for the agent identities every
//              other component references by id but none owns a row for.
// Purpose: No domain crate in this workspace maintains an `agents` table
//          (opscore-core only defines the `Agent` projection shape); the
//          engine façade is the natural owner since it is the one crate that
//          already sits above every domain crate. Follows the same
//          event-then-projection-in-one-transaction shape as
//          `opscore_trust::skills::import`.
// Dependencies: opscore_core::{capability, event, ids, time}, opscore_store
// ============================================================================

//! ## Overview
//! [`register`] and [`quarantine`] each append their own `agent.*` event and
//! update the `agents` row in the same transaction, rather than routing
//! through [`opscore_store::ProjectorRegistry`] (which has no knowledge of
//! this event family). A re-quarantine of an already-quarantined agent is
//! accepted and idempotent: the original `quarantine_reason` is preserved
//! rather than overwritten by the replay's reason, matching the
//! terminal-state-is-a-sink shape used by `opscore_policy::approvals`.

use opscore_core::Actor;
use opscore_core::Agent;
use opscore_core::AgentId;
use opscore_core::CorrelationId;
use opscore_core::NewEvent;
use opscore_core::PrincipalId;
use opscore_core::StreamRef;
use opscore_core::Timestamp;
use opscore_core::WorkspaceId;
use opscore_store::Database;
use opscore_store::EventStoreError;
use opscore_store::StoreError;
use opscore_store::append_to_stream;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use thiserror::Error;

/// Errors raised while registering or quarantining an agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No agent exists with the given id.
    #[error("agent.not_found")]
    NotFound,
    /// An agent already exists with the given id.
    #[error("agent.already_registered")]
    AlreadyRegistered,
    /// Underlying storage failure.
    #[error("agent.store_error: {0}")]
    Store(#[from] StoreError),
    /// The lifecycle event could not be appended.
    #[error("agent.event_error: {0}")]
    Event(String),
}

impl From<rusqlite::Error> for AgentError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

impl From<EventStoreError> for AgentError {
    fn from(err: EventStoreError) -> Self {
        Self::Event(err.to_string())
    }
}

/// Creates the `agents` table if it does not already exist.
///
/// # Errors
///
/// Returns [`StoreError`] on any underlying SQLite failure.
pub fn ensure_schema(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS agents (
            agent_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            principal_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            quarantined_at TEXT,
            quarantine_reason TEXT,
            revoked_at TEXT,
            PRIMARY KEY (workspace_id, agent_id)
        );",
    )?;
    Ok(())
}

/// Registers a new agent, appending `agent.registered`.
///
/// # Errors
///
/// Returns [`AgentError::AlreadyRegistered`] if the id is already taken in
/// this workspace, or [`AgentError`] on storage/event failure.
pub fn register(
    db: &Database,
    workspace_id: &WorkspaceId,
    agent_id: &AgentId,
    principal_id: &PrincipalId,
    display_name: &str,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<Agent, AgentError> {
    db.with_tx(|tx| {
        if load_tx(tx, workspace_id, agent_id)?.is_some() {
            return Err(AgentError::AlreadyRegistered);
        }
        let now_str = now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?;
        tx.execute(
            "INSERT INTO agents (
                agent_id, workspace_id, principal_id, display_name, created_at,
                quarantined_at, quarantine_reason, revoked_at
            ) VALUES (?1,?2,?3,?4,?5,NULL,NULL,NULL)",
            params![agent_id.as_str(), workspace_id.as_str(), principal_id.as_str(), display_name, now_str],
        )?;

        let event = NewEvent::new(
            "agent.registered",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::workspace(workspace_id),
            correlation_id.clone(),
            serde_json::json!({
                "agent_id": agent_id.as_str(),
                "principal_id": principal_id.as_str(),
                "display_name": display_name,
            }),
            now,
        );
        append_to_stream(tx, event)?;

        load_tx(tx, workspace_id, agent_id)?.ok_or(AgentError::NotFound)
    })
}

/// Quarantines an agent, appending `agent.quarantined`. Idempotent: a
/// replay against an already-quarantined agent leaves `quarantine_reason`
/// at its original value.
///
/// # Errors
///
/// Returns [`AgentError::NotFound`] if the agent does not exist, or
/// [`AgentError`] on storage/event failure.
pub fn quarantine(
    db: &Database,
    workspace_id: &WorkspaceId,
    agent_id: &AgentId,
    reason: &str,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<Agent, AgentError> {
    db.with_tx(|tx| {
        let row = load_tx(tx, workspace_id, agent_id)?.ok_or(AgentError::NotFound)?;
        if row.quarantined_at.is_none() {
            let now_str = now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?;
            tx.execute(
                "UPDATE agents SET quarantined_at = ?1, quarantine_reason = ?2
                 WHERE workspace_id = ?3 AND agent_id = ?4",
                params![now_str, reason, workspace_id.as_str(), agent_id.as_str()],
            )?;
        }

        let event = NewEvent::new(
            "agent.quarantined",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::workspace(workspace_id),
            correlation_id.clone(),
            serde_json::json!({
                "agent_id": agent_id.as_str(),
                "reason": reason,
            }),
            now,
        );
        append_to_stream(tx, event)?;

        load_tx(tx, workspace_id, agent_id)?.ok_or(AgentError::NotFound)
    })
}

/// Reads back an agent's row, opening its own transaction.
///
/// # Errors
///
/// Returns [`StoreError`] on any underlying SQLite failure.
pub fn load(db: &Database, workspace_id: &WorkspaceId, agent_id: &AgentId) -> Result<Option<Agent>, StoreError> {
    db.with_tx(|tx| load_tx(tx, workspace_id, agent_id))
}

fn load_tx(tx: &Transaction<'_>, workspace_id: &WorkspaceId, agent_id: &AgentId) -> Result<Option<Agent>, StoreError> {
    tx.query_row(
        "SELECT agent_id, workspace_id, principal_id, display_name, created_at,
                quarantined_at, quarantine_reason, revoked_at
         FROM agents WHERE workspace_id = ?1 AND agent_id = ?2",
        params![workspace_id.as_str(), agent_id.as_str()],
        read_agent_row,
    )
    .optional()
    .map_err(StoreError::Db)
}

fn read_agent_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let created_at: String = row.get(4)?;
    let quarantined_at: Option<String> = row.get(5)?;
    let revoked_at: Option<String> = row.get(7)?;
    Ok(Agent {
        agent_id: AgentId::new(row.get::<_, String>(0)?),
        workspace_id: WorkspaceId::new(row.get::<_, String>(1)?),
        principal_id: PrincipalId::new(row.get::<_, String>(2)?),
        display_name: row.get(3)?,
        created_at: Timestamp::parse_rfc3339(&created_at).unwrap_or_else(|_| Timestamp::now()),
        quarantined_at: quarantined_at.and_then(|s| Timestamp::parse_rfc3339(&s).ok()),
        quarantine_reason: row.get(6)?,
        revoked_at: revoked_at.and_then(|s| Timestamp::parse_rfc3339(&s).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> Actor {
        Actor::user("user-1")
    }

    #[test]
    fn register_then_quarantine_preserves_original_reason_on_replay() {
        let db = Database::open_in_memory().unwrap();
        db.with_tx::<_, StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| StoreError::Io(e.to_string()))?;
            ensure_schema(tx)
        })
        .unwrap();

        let workspace_id = WorkspaceId::new("ws-1");
        let agent_id = AgentId::new("agent-1");
        let principal_id = PrincipalId::new("principal-1");
        let correlation_id = CorrelationId::new("corr-1");
        let now = Timestamp::now();

        register(&db, &workspace_id, &agent_id, &principal_id, "Agent One", &correlation_id, &actor(), now).unwrap();

        let first = quarantine(&db, &workspace_id, &agent_id, "policy violation", &correlation_id, &actor(), now).unwrap();
        assert_eq!(first.quarantine_reason.as_deref(), Some("policy violation"));

        let replay = quarantine(&db, &workspace_id, &agent_id, "a different reason", &correlation_id, &actor(), now).unwrap();
        assert_eq!(replay.quarantine_reason.as_deref(), Some("policy violation"));
    }

    #[test]
    fn registering_the_same_agent_twice_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.with_tx::<_, StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| StoreError::Io(e.to_string()))?;
            ensure_schema(tx)
        })
        .unwrap();

        let workspace_id = WorkspaceId::new("ws-1");
        let agent_id = AgentId::new("agent-1");
        let principal_id = PrincipalId::new("principal-1");
        let correlation_id = CorrelationId::new("corr-1");
        let now = Timestamp::now();

        register(&db, &workspace_id, &agent_id, &principal_id, "Agent One", &correlation_id, &actor(), now).unwrap();
        let err = register(&db, &workspace_id, &agent_id, &principal_id, "Agent One", &correlation_id, &actor(), now).unwrap_err();
        assert!(matches!(err, AgentError::AlreadyRegistered));
    }
}
