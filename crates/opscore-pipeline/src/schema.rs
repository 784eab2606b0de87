// crates/opscore-pipeline/src/schema.rs
// ============================================================================
// Module: Pipeline Schema
// Description: DDL for the pipeline snapshot table and its incident/approval
//              link side-tables.
// Purpose: Own storage the core projectors in opscore-store do not maintain.
// Dependencies: rusqlite
// ============================================================================

use rusqlite::Transaction;

use crate::PipelineError;

/// Creates the pipeline snapshot schema if it does not already exist.
///
/// # Errors
///
/// Returns [`PipelineError`] on any underlying SQLite failure.
pub fn ensure_schema(tx: &Transaction<'_>) -> Result<(), PipelineError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS pipeline_entities (
            workspace_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            is_archived INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            required_fields_present INTEGER NOT NULL DEFAULT 1,
            run_status TEXT,
            evidence_status TEXT,
            evidence_matches_run INTEGER NOT NULL DEFAULT 0,
            scorecard_decision TEXT,
            scorecard_bindings_match INTEGER NOT NULL DEFAULT 0,
            incident_active INTEGER NOT NULL DEFAULT 0,
            approval_requested INTEGER NOT NULL DEFAULT 0,
            experiment_status TEXT,
            stage TEXT NOT NULL,
            diagnostic TEXT,
            last_event_id TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (workspace_id, entity_type, entity_id)
        );
        CREATE INDEX IF NOT EXISTS idx_pipeline_entities_cursor
            ON pipeline_entities (workspace_id, updated_at, entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_pipeline_entities_stage
            ON pipeline_entities (workspace_id, stage);

        CREATE TABLE IF NOT EXISTS pipeline_incident_links (
            incident_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            run_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pipeline_approval_links (
            approval_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            run_id TEXT NOT NULL
        );",
    )?;
    Ok(())
}
