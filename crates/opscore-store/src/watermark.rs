// crates/opscore-store/src/watermark.rs
// ============================================================================
// Module: Projector Watermarks
// Description: Per-(workspace, projector) catch-up cursor.
// Purpose: Let the async catch-up worker resume from the last event it
//          applied instead of rescanning the whole log.
// Dependencies: rusqlite, opscore_core::time
// ============================================================================

//! ## Overview
//! A watermark records `last_applied_event_occurred_at` for one projector
//! in one workspace. Write-path projector application does not advance the
//! watermark (it is already synchronously consistent within the append's
//! transaction); only [`crate::catchup::CatchUpWorker`] advances it.

use opscore_core::Timestamp;
use opscore_core::WorkspaceId;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;

use crate::db::StoreError;

/// A projector's catch-up cursor for one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Projector name, e.g. `"run_projector"`.
    pub projector_name: String,
    /// Last event `occurred_at` this projector has applied, if any.
    pub last_applied_event_occurred_at: Option<Timestamp>,
}

/// Creates the watermark schema if it does not already exist.
///
/// # Errors
///
/// Returns [`StoreError`] on any underlying SQLite failure.
pub fn ensure_schema(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS projector_watermarks (
            workspace_id TEXT NOT NULL,
            projector_name TEXT NOT NULL,
            last_applied_event_occurred_at TEXT,
            PRIMARY KEY (workspace_id, projector_name)
        );",
    )?;
    Ok(())
}

/// Reads the current watermark for `(workspace_id, projector_name)`, if any
/// row exists yet.
///
/// # Errors
///
/// Returns [`StoreError`] on any underlying SQLite failure.
pub fn read(
    conn: &Connection,
    workspace_id: &WorkspaceId,
    projector_name: &str,
) -> Result<Option<Watermark>, StoreError> {
    let row = conn
        .query_row(
            "SELECT last_applied_event_occurred_at FROM projector_watermarks
             WHERE workspace_id = ?1 AND projector_name = ?2",
            params![workspace_id.as_str(), projector_name],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(row.map(|raw| Watermark {
        workspace_id: workspace_id.clone(),
        projector_name: projector_name.to_owned(),
        last_applied_event_occurred_at: raw.and_then(|s| Timestamp::parse_rfc3339(&s).ok()),
    }))
}

/// Advances the watermark for `(workspace_id, projector_name)` to `at`,
/// upserting the row.
///
/// # Errors
///
/// Returns [`StoreError`] on any underlying SQLite failure, including an
/// unformattable timestamp.
pub fn advance(
    conn: &Connection,
    workspace_id: &WorkspaceId,
    projector_name: &str,
    at: Timestamp,
) -> Result<(), StoreError> {
    let rendered = at.to_rfc3339().map_err(|err| StoreError::Io(err.to_string()))?;
    conn.execute(
        "INSERT INTO projector_watermarks (workspace_id, projector_name, last_applied_event_occurred_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (workspace_id, projector_name)
         DO UPDATE SET last_applied_event_occurred_at = excluded.last_applied_event_occurred_at",
        params![workspace_id.as_str(), projector_name, rendered],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use opscore_core::Timestamp;
    use opscore_core::WorkspaceId;
    use rusqlite::Connection;

    use super::advance;
    use super::ensure_schema;
    use super::read;

    #[test]
    fn advance_then_read_round_trips() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        tx.commit().unwrap();

        let ws = WorkspaceId::new("ws-1");
        assert!(read(&conn, &ws, "run_projector").unwrap().is_none());

        let at = Timestamp::now();
        advance(&conn, &ws, "run_projector", at).unwrap();
        let watermark = read(&conn, &ws, "run_projector").unwrap().expect("row");
        assert_eq!(watermark.last_applied_event_occurred_at.unwrap().seconds_since(&at), 0);
    }
}
