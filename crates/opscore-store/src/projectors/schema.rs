// crates/opscore-store/src/projectors/schema.rs
// ============================================================================
// Module: Projection Schema
// Description: DDL for every table the core write-path projectors maintain.
// Purpose: Single place to create (or migrate forward, additively) the
//          projection tables.
// Dependencies: rusqlite
// ============================================================================

use rusqlite::Transaction;

use crate::db::StoreError;

/// Creates every core-projector table if it does not already exist.
///
/// # Errors
///
/// Returns [`StoreError`] on any underlying SQLite failure.
pub fn ensure_schema(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS rooms (
            room_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS threads (
            thread_id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            message_id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            author_id TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            room_id TEXT NOT NULL,
            thread_id TEXT NOT NULL,
            experiment_id TEXT,
            title TEXT NOT NULL,
            goal TEXT NOT NULL,
            input TEXT NOT NULL,
            output TEXT,
            error TEXT,
            tags TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            status TEXT NOT NULL,
            claim_token TEXT,
            claimed_by_actor_id TEXT,
            lease_expires_at TEXT,
            lease_heartbeat_at TEXT,
            last_event_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_runs_workspace_status ON runs (workspace_id, status);
        CREATE INDEX IF NOT EXISTS idx_runs_experiment ON runs (experiment_id);
        CREATE TABLE IF NOT EXISTS steps (
            step_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            title TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS run_attempts (
            attempt_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            attempt_no INTEGER NOT NULL,
            claim_token TEXT NOT NULL,
            claimer_principal_id TEXT NOT NULL,
            engine_id TEXT NOT NULL,
            claimed_at TEXT NOT NULL,
            released_at TEXT,
            released_reason TEXT,
            UNIQUE (run_id, attempt_no)
        );
        CREATE TABLE IF NOT EXISTS approvals (
            approval_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            action_code TEXT NOT NULL,
            scope TEXT NOT NULL,
            scope_snapshot TEXT NOT NULL,
            expires_at TEXT,
            status TEXT NOT NULL,
            decided_by TEXT,
            last_event_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS experiments (
            experiment_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            room_id TEXT NOT NULL,
            title TEXT NOT NULL,
            hypothesis TEXT NOT NULL,
            success_criteria TEXT NOT NULL,
            stop_conditions TEXT NOT NULL,
            budget_cap_units INTEGER NOT NULL,
            risk_tier TEXT NOT NULL,
            status TEXT NOT NULL,
            close_reason TEXT,
            active_run_count INTEGER NOT NULL DEFAULT 0,
            last_event_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS incidents (
            incident_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            severity TEXT NOT NULL,
            run_id TEXT,
            room_id TEXT,
            thread_id TEXT,
            correlation_id TEXT,
            rca TEXT,
            rca_updated_at TEXT,
            learnings TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL,
            last_event_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}
