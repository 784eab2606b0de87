// crates/opscore-store/src/catchup.rs
// ============================================================================
// Module: Catch-Up Worker
// Description: Asynchronous projector catch-up past a stored watermark.
// Purpose: Re-derive projections for events a projector missed (new
//          projector, or recovery after an outage) without rescanning the
//          full log; failures are retried with backoff and eventually
//          dead-lettered.
// Dependencies: rusqlite, opscore_core::event, crate::{db, watermark, projectors}
// ============================================================================

//! ## Overview
//! Unlike the write path (where [`crate::projectors::ProjectorRegistry::apply`]
//! runs inside the same transaction as the triggering append), catch-up runs
//! out of band: it reads events after a projector's watermark, applies them
//! one at a time in their own short transaction, and advances the watermark
//! only after a successful apply. A failure is retried with exponential
//! backoff up to `max_attempts`; a terminal failure is recorded in the
//! `projector_dead_letters` table rather than blocking the rest of the
//! workspace's catch-up (spec §4.3, §7: async catch-up failures are
//! retried, then dead-lettered, and surfaced via the health subsystem).

use std::thread;
use std::time::Duration;

use opscore_core::PersistedEvent;
use opscore_core::WorkspaceId;
use rusqlite::params;
use thiserror::Error;

use crate::db::Database;
use crate::db::StoreError;
use crate::events;
use crate::projectors::ProjectorError;
use crate::projectors::ProjectorRegistry;
use crate::watermark;

/// Errors raised while running catch-up.
#[derive(Debug, Error)]
pub enum CatchUpError {
    /// Underlying storage failure.
    #[error("catchup.store_error: {0}")]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for CatchUpError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

/// A terminally failed catch-up application, recorded for the health
/// subsystem to surface as a DLQ backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterEntry {
    /// Workspace the failing event belongs to.
    pub workspace_id: WorkspaceId,
    /// Projector name that failed to apply the event.
    pub projector_name: String,
    /// Event id that could not be applied.
    pub event_id: String,
    /// Final error message after exhausting retries.
    pub last_error: String,
    /// Number of attempts made before dead-lettering.
    pub attempts: u32,
}

/// Creates the dead-letter schema if it does not already exist.
///
/// # Errors
///
/// Returns [`CatchUpError`] on any underlying SQLite failure.
pub fn ensure_schema(tx: &rusqlite::Transaction<'_>) -> Result<(), CatchUpError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS projector_dead_letters (
            workspace_id TEXT NOT NULL,
            projector_name TEXT NOT NULL,
            event_id TEXT NOT NULL,
            last_error TEXT NOT NULL,
            attempts INTEGER NOT NULL,
            PRIMARY KEY (workspace_id, projector_name, event_id)
        );",
    )?;
    Ok(())
}

/// Runs projector catch-up for `workspace_id`, applying every event past
/// the stored watermark in `occurred_at` order. Retries a failing event up
/// to `max_attempts` times with exponential backoff starting at
/// `initial_backoff`, then dead-letters it and continues with the next
/// event so one poisoned event cannot block the rest of catch-up.
pub struct CatchUpWorker {
    db: Database,
    projector_name: String,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl CatchUpWorker {
    /// Builds a worker for `projector_name` against `db`, with the given
    /// retry policy.
    #[must_use]
    pub fn new(db: Database, projector_name: impl Into<String>, max_attempts: u32, initial_backoff: Duration) -> Self {
        Self { db, projector_name: projector_name.into(), max_attempts, initial_backoff }
    }

    /// Runs one catch-up pass for `workspace_id`. Returns the dead letters
    /// produced by events that never succeeded within `max_attempts`.
    ///
    /// # Errors
    ///
    /// Returns [`CatchUpError`] when the watermark or dead-letter tables
    /// cannot be read or written.
    pub fn run_once(&self, workspace_id: &WorkspaceId) -> Result<Vec<DeadLetterEntry>, CatchUpError> {
        let after = self.db.with_conn::<_, CatchUpError>(|conn| {
            Ok(watermark::read(conn, workspace_id, &self.projector_name)?.and_then(|w| w.last_applied_event_occurred_at))
        })?;

        let pending = self.db.with_conn::<_, CatchUpError>(|conn| Ok(fetch_events_after(conn, workspace_id, after)?))?;

        let mut dead_letters = Vec::new();
        for event in pending {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                let applied = self.db.with_tx::<(), ProjectorError>(|tx| ProjectorRegistry::apply(tx, &event));
                match applied {
                    Ok(()) => {
                        self.db.with_conn::<_, CatchUpError>(|conn| {
                            Ok(watermark::advance(conn, workspace_id, &self.projector_name, event.occurred_at())?)
                        })?;
                        break;
                    }
                    Err(_) if attempt < self.max_attempts => {
                        thread::sleep(self.initial_backoff * 2u32.saturating_pow(attempt - 1));
                    }
                    Err(err) => {
                        let entry = DeadLetterEntry {
                            workspace_id: workspace_id.clone(),
                            projector_name: self.projector_name.clone(),
                            event_id: event.event_id.as_str().to_owned(),
                            last_error: err.to_string(),
                            attempts: attempt,
                        };
                        self.db.with_conn::<_, CatchUpError>(|conn| {
                            conn.execute(
                                "INSERT OR REPLACE INTO projector_dead_letters
                                 (workspace_id, projector_name, event_id, last_error, attempts)
                                 VALUES (?1, ?2, ?3, ?4, ?5)",
                                params![
                                    entry.workspace_id.as_str(),
                                    entry.projector_name,
                                    entry.event_id,
                                    entry.last_error,
                                    entry.attempts,
                                ],
                            )?;
                            Ok(())
                        })?;
                        dead_letters.push(entry);
                        break;
                    }
                }
            }
        }
        Ok(dead_letters)
    }

    /// Returns the count of workspace dead letters currently recorded,
    /// used by the health subsystem's DLQ-backlog-triggers-DEGRADED rule.
    ///
    /// # Errors
    ///
    /// Returns [`CatchUpError`] on any underlying SQLite failure.
    pub fn dead_letter_count(&self, workspace_id: &WorkspaceId) -> Result<u64, CatchUpError> {
        self.db.with_conn::<_, CatchUpError>(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM projector_dead_letters WHERE workspace_id = ?1",
                params![workspace_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

/// Reads every event for `workspace_id` with `occurred_at` strictly after
/// `after` (or every event, when `after` is `None`), ordered for replay.
fn fetch_events_after(
    conn: &rusqlite::Connection,
    workspace_id: &WorkspaceId,
    after: Option<opscore_core::Timestamp>,
) -> Result<Vec<PersistedEvent>, CatchUpError> {
    let after_str = after.map(|t| t.to_rfc3339()).transpose().map_err(|e| StoreError::Io(e.to_string()))?;
    let mut stmt = conn.prepare(
        "SELECT event_id, event_type, event_version, workspace_id, room_id, thread_id, run_id,
                step_id, mission_id, actor_kind, actor_id, actor_principal_id, stream_type,
                stream_id, stream_position, correlation_id, causation_id, occurred_at,
                idempotency_key, payload, policy_context, model_context, display_context
         FROM events WHERE workspace_id = ?1 AND (?2 IS NULL OR occurred_at > ?2)
         ORDER BY occurred_at ASC, stream_position ASC",
    )?;
    let rows = stmt.query_map(params![workspace_id.as_str(), after_str], events::row_to_event)?;
    let mut out = Vec::new();
    for row in rows {
        let parsed = row?.map_err(|e| CatchUpError::Store(StoreError::Io(e.to_string())))?;
        out.push(parsed);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use opscore_core::Actor;
    use opscore_core::CorrelationId;
    use opscore_core::NewEvent;
    use opscore_core::StreamRef;
    use opscore_core::Timestamp;
    use opscore_core::WorkspaceId;

    use super::CatchUpWorker;
    use crate::db::Database;
    use crate::events::append_to_stream;
    use crate::events::ensure_schema as ensure_event_schema;
    use crate::projectors::ProjectorRegistry;
    use crate::watermark::ensure_schema as ensure_watermark_schema;

    #[test]
    fn catch_up_applies_events_past_watermark() {
        let db = Database::open_in_memory().unwrap();
        db.with_tx::<_, crate::db::StoreError>(|tx| {
            ensure_event_schema(tx).map_err(|e| crate::db::StoreError::Io(e.to_string()))?;
            ProjectorRegistry::ensure_schema(tx).map_err(|e| crate::db::StoreError::Io(e.to_string()))?;
            ensure_watermark_schema(tx)?;
            super::ensure_schema(tx).map_err(|e| crate::db::StoreError::Io(e.to_string()))?;
            let event = NewEvent::new(
                "room.created",
                1,
                "ws-1".into(),
                Actor::user("user-1"),
                StreamRef::room("room-1"),
                CorrelationId::new("corr-1"),
                serde_json::json!({"room_id": "room-1", "name": "General"}),
                Timestamp::now(),
            );
            append_to_stream(tx, event).map_err(|e| crate::db::StoreError::Io(e.to_string()))?;
            Ok(())
        })
        .unwrap();

        let worker = CatchUpWorker::new(db.clone(), "core_projector", 3, Duration::from_millis(1));
        let dead_letters = worker.run_once(&WorkspaceId::new("ws-1")).unwrap();
        assert!(dead_letters.is_empty());

        let count: i64 = db
            .with_conn::<_, crate::db::StoreError>(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM rooms", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }
}
