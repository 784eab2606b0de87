// crates/opscore-trust/src/schema.rs
// ============================================================================
// Module: Trust & Skills Schema
// Description: DDL for the trust, autonomy-recommendation, and skills-ledger
//              projections.
// Purpose: Give trust.rs/autonomy.rs/skills.rs one shared schema-creation
//          entry point, mirroring opscore-store::projectors::schema.
// Dependencies: rusqlite
// ============================================================================

use rusqlite::Transaction;

use opscore_store::StoreError;

/// Creates every table this crate owns, if not already present.
///
/// # Errors
///
/// Returns [`StoreError`] on any underlying SQLite failure.
pub fn ensure_schema(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS agent_trust (
            agent_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            success_rate_7d REAL NOT NULL,
            eval_quality_trend REAL NOT NULL,
            user_feedback_score REAL NOT NULL,
            policy_violations_7d INTEGER NOT NULL,
            time_in_service_days INTEGER NOT NULL,
            score REAL NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS autonomy_recommendations (
            recommendation_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            scope_delta TEXT NOT NULL,
            trust_before REAL NOT NULL,
            trust_after REAL NOT NULL,
            status TEXT NOT NULL,
            issued_token_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS skill_packages (
            skill_package_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            hash TEXT NOT NULL,
            signature TEXT,
            manifest TEXT NOT NULL,
            status TEXT NOT NULL,
            status_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS agent_skills (
            agent_skill_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            skill_package_id TEXT NOT NULL,
            level TEXT NOT NULL,
            usage_total INTEGER NOT NULL DEFAULT 0,
            usage_7d INTEGER NOT NULL DEFAULT 0,
            usage_30d INTEGER NOT NULL DEFAULT 0,
            assessment_total INTEGER NOT NULL DEFAULT 0,
            assessment_passed INTEGER NOT NULL DEFAULT 0,
            assessment_failed INTEGER NOT NULL DEFAULT 0,
            reliability_score REAL NOT NULL DEFAULT 0.0,
            impact_score REAL NOT NULL DEFAULT 0.0,
            is_primary INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            UNIQUE (workspace_id, agent_id, skill_package_id)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_agent_skills_one_primary
            ON agent_skills (workspace_id, agent_id)
            WHERE is_primary = 1;

        CREATE TABLE IF NOT EXISTS skill_assessments (
            assessment_id TEXT PRIMARY KEY,
            agent_skill_id TEXT NOT NULL,
            status TEXT NOT NULL,
            score REAL,
            synthetic INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            resolved_at TEXT
        );

        CREATE TABLE IF NOT EXISTS capability_tokens (
            token_id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            principal_id TEXT NOT NULL,
            issued_by_principal_id TEXT NOT NULL,
            scope TEXT NOT NULL,
            valid_until TEXT,
            revoked_at TEXT,
            parent_token_id TEXT,
            issued_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}
