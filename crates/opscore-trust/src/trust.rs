// crates/opscore-trust/src/trust.rs
// ============================================================================
// Module: Trust Engine
// Description: Deterministic trust-score computation, default-signal
//              derivation from the event log, and approval-mode
//              recommendation.
// Purpose: Implements spec.md §4.8 verbatim.
// Dependencies: rusqlite, opscore_core::{trust, event, ids, time}, opscore_store
// ============================================================================

//! ## Overview
//! [`compute_score`] is a pure function: given identical [`TrustComponents`]
//! it returns a bit-identical score, satisfying spec.md §8's
//! trust-recomputation-is-idempotent property. [`derive_default_signals`]
//! is the only place that reads the event log to *produce* those
//! components; [`recompute_and_store`] composes the two, persists the
//! result, and emits `agent.trust.increased`/`agent.trust.decreased` only
//! when the score actually moved by more than ε (1e-4) — equal scores stay
//! silent, matching spec.md §4.8's event-emission rule.

use opscore_core::Actor;
use opscore_core::AgentId;
use opscore_core::AgentTrust;
use opscore_core::ApprovalMode;
use opscore_core::CorrelationId;
use opscore_core::NewEvent;
use opscore_core::StreamRef;
use opscore_core::Timestamp;
use opscore_core::TrustComponents;
use opscore_core::WorkspaceId;
use opscore_store::Database;
use opscore_store::EventStoreError;
use opscore_store::StoreError;
use opscore_store::append_to_stream;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde_json::Value;
use thiserror::Error;

/// The minimum score delta that triggers a trust-change event.
const EPSILON: f64 = 1e-4;
const SEVEN_DAYS_SECONDS: i64 = 7 * 24 * 3600;

/// Errors raised while computing or persisting a trust score.
#[derive(Debug, Error)]
pub enum TrustError {
    /// Underlying storage failure.
    #[error("trust.store_error: {0}")]
    Store(#[from] StoreError),
    /// The trust-change event could not be appended.
    #[error("trust.event_error: {0}")]
    Event(String),
}

impl From<rusqlite::Error> for TrustError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

impl From<EventStoreError> for TrustError {
    fn from(err: EventStoreError) -> Self {
        Self::Event(err.to_string())
    }
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Computes the trust score from its five components, per spec.md §4.8's
/// formula verbatim. Pure and deterministic: identical inputs always yield
/// a bit-identical output.
#[must_use]
pub fn compute_score(components: &TrustComponents) -> f64 {
    let success = clamp01(components.success_rate_7d);
    let eval_n = clamp01((components.eval_quality_trend + 1.0) / 2.0);
    let feedback = clamp01(components.user_feedback_score);
    let tenure = clamp01(f64::from(components.time_in_service_days) / 30.0);
    let penalty = clamp01(f64::from(components.policy_violations_7d) / 10.0);
    let raw = 0.4 * success + 0.2 * eval_n + 0.2 * feedback + 0.2 * tenure - 0.3 * penalty;
    clamp01(raw)
}

/// Caller-supplied overrides for one or more trust components; `None`
/// fields fall back to the event-log-derived default. Each present field is
/// clamped to its documented range before substitution.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustOverrides {
    /// Override for `success_rate_7d`.
    pub success_rate_7d: Option<f64>,
    /// Override for `eval_quality_trend`.
    pub eval_quality_trend: Option<f64>,
    /// Override for `user_feedback_score`.
    pub user_feedback_score: Option<f64>,
    /// Override for `policy_violations_7d`.
    pub policy_violations_7d: Option<u32>,
    /// Override for `time_in_service_days`.
    pub time_in_service_days: Option<u32>,
}

/// Applies `overrides` field-wise over `defaults`, clamping each supplied
/// value to its documented range.
#[must_use]
pub fn apply_overrides(defaults: TrustComponents, overrides: TrustOverrides) -> TrustComponents {
    TrustComponents {
        success_rate_7d: overrides.success_rate_7d.map_or(defaults.success_rate_7d, |v| v.clamp(0.0, 1.0)),
        eval_quality_trend: overrides.eval_quality_trend.map_or(defaults.eval_quality_trend, |v| v.clamp(-1.0, 1.0)),
        user_feedback_score: overrides.user_feedback_score.map_or(defaults.user_feedback_score, |v| v.clamp(0.0, 1.0)),
        policy_violations_7d: overrides.policy_violations_7d.unwrap_or(defaults.policy_violations_7d),
        time_in_service_days: overrides.time_in_service_days.unwrap_or(defaults.time_in_service_days),
    }
}

/// Derives default trust-component values for `agent_id` by querying the
/// event log's trailing 7-day window.
///
/// - `success_rate_7d` comes from `run.completed`/`run.failed` events whose
///   actor is this agent; falls back to the workspace-wide ratio when the
///   agent has no runs in the window, and to `0.5` when the workspace has
///   none either.
/// - `policy_violations_7d` counts enforced (non-dry-run) policy denials
///   not caused by kill-switch or quarantine.
/// - `user_feedback_score` is the approved/total ratio over this agent's
///   autonomy-recommendation decisions in the window; `0.5` with no data.
/// - `time_in_service_days` is whole days since `agent_created_at`.
///
/// # Errors
///
/// Returns [`TrustError`] on any underlying SQLite failure.
pub fn derive_default_signals(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    agent_id: &AgentId,
    agent_created_at: Timestamp,
    now: Timestamp,
) -> Result<TrustComponents, TrustError> {
    let cutoff = now.plus_seconds(-SEVEN_DAYS_SECONDS).to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?;

    let success_rate_7d = success_rate(tx, workspace_id, agent_id, &cutoff)?;
    let policy_violations_7d = policy_violations(tx, workspace_id, agent_id, &cutoff)?;
    let user_feedback_score = feedback_score(tx, workspace_id, agent_id, &cutoff)?;
    let time_in_service_days = u32::try_from(now.seconds_since(&agent_created_at).max(0) / 86400).unwrap_or(u32::MAX);

    Ok(TrustComponents {
        success_rate_7d,
        eval_quality_trend: 0.0,
        user_feedback_score,
        policy_violations_7d,
        time_in_service_days,
    })
}

fn run_outcome_counts(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    agent_id: Option<&AgentId>,
    cutoff: &str,
) -> Result<(u64, u64), TrustError> {
    let agent_filter = agent_id.map(AgentId::as_str);
    let mut stmt = tx.prepare(
        "SELECT event_type FROM events
         WHERE workspace_id = ?1 AND event_type IN ('run.completed', 'run.failed')
           AND occurred_at >= ?2 AND actor_kind = 'agent'
           AND (?3 IS NULL OR actor_id = ?3)",
    )?;
    let rows = stmt.query_map(params![workspace_id.as_str(), cutoff, agent_filter], |row| row.get::<_, String>(0))?;
    let mut succeeded = 0u64;
    let mut total = 0u64;
    for row in rows {
        total += 1;
        if row? == "run.completed" {
            succeeded += 1;
        }
    }
    Ok((succeeded, total))
}

fn success_rate(tx: &Transaction<'_>, workspace_id: &WorkspaceId, agent_id: &AgentId, cutoff: &str) -> Result<f64, TrustError> {
    let (agent_success, agent_total) = run_outcome_counts(tx, workspace_id, Some(agent_id), cutoff)?;
    if agent_total > 0 {
        return Ok(agent_success as f64 / agent_total as f64);
    }
    let (ws_success, ws_total) = run_outcome_counts(tx, workspace_id, None, cutoff)?;
    Ok(if ws_total > 0 { ws_success as f64 / ws_total as f64 } else { 0.5 })
}

fn policy_violations(tx: &Transaction<'_>, workspace_id: &WorkspaceId, agent_id: &AgentId, cutoff: &str) -> Result<u32, TrustError> {
    let mut stmt = tx.prepare(
        "SELECT payload FROM events
         WHERE workspace_id = ?1 AND event_type = 'policy.denied' AND occurred_at >= ?2
           AND actor_kind = 'agent' AND actor_id = ?3",
    )?;
    let rows = stmt.query_map(params![workspace_id.as_str(), cutoff, agent_id.as_str()], |row| row.get::<_, String>(0))?;
    let mut count = 0u32;
    for row in rows {
        let payload: Value = serde_json::from_str(&row?).unwrap_or(Value::Null);
        let enforced = payload.get("enforced").and_then(Value::as_bool).unwrap_or(false);
        let reason = payload.get("reason_code").and_then(Value::as_str).unwrap_or("");
        if enforced && reason != "kill_switch_active" && reason != "agent_quarantined" {
            count += 1;
        }
    }
    Ok(count)
}

fn feedback_score(tx: &Transaction<'_>, workspace_id: &WorkspaceId, agent_id: &AgentId, cutoff: &str) -> Result<f64, TrustError> {
    let mut stmt = tx.prepare(
        "SELECT event_type, payload FROM events
         WHERE workspace_id = ?1 AND event_type IN ('autonomy.upgrade.approved', 'autonomy.upgrade.rejected')
           AND occurred_at >= ?2",
    )?;
    let rows = stmt.query_map(params![workspace_id.as_str(), cutoff], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut approved = 0u32;
    let mut total = 0u32;
    for row in rows {
        let (event_type, payload) = row?;
        let payload: Value = serde_json::from_str(&payload).unwrap_or(Value::Null);
        if payload.get("agent_id").and_then(Value::as_str) != Some(agent_id.as_str()) {
            continue;
        }
        total += 1;
        if event_type == "autonomy.upgrade.approved" {
            approved += 1;
        }
    }
    Ok(if total == 0 { 0.5 } else { f64::from(approved) / f64::from(total) })
}

fn load_score(tx: &Transaction<'_>, agent_id: &AgentId) -> Result<Option<f64>, TrustError> {
    tx.query_row("SELECT score FROM agent_trust WHERE agent_id = ?1", params![agent_id.as_str()], |row| row.get(0))
        .optional()
        .map_err(Into::into)
}

fn upsert_row(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    agent_id: &AgentId,
    components: &TrustComponents,
    score: f64,
    now: Timestamp,
) -> Result<(), TrustError> {
    let updated_at = now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?;
    tx.execute(
        "INSERT INTO agent_trust (
            agent_id, workspace_id, success_rate_7d, eval_quality_trend, user_feedback_score,
            policy_violations_7d, time_in_service_days, score, updated_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
        ON CONFLICT (agent_id) DO UPDATE SET
            success_rate_7d = excluded.success_rate_7d,
            eval_quality_trend = excluded.eval_quality_trend,
            user_feedback_score = excluded.user_feedback_score,
            policy_violations_7d = excluded.policy_violations_7d,
            time_in_service_days = excluded.time_in_service_days,
            score = excluded.score,
            updated_at = excluded.updated_at",
        params![
            agent_id.as_str(),
            workspace_id.as_str(),
            components.success_rate_7d,
            components.eval_quality_trend,
            components.user_feedback_score,
            components.policy_violations_7d,
            components.time_in_service_days,
            score,
            updated_at,
        ],
    )?;
    Ok(())
}

/// Recomputes `agent_id`'s trust score, persists it, and emits a
/// `agent.trust.increased`/`agent.trust.decreased` event if the score moved
/// by more than ε since the previously stored value. Returns the new
/// [`AgentTrust`] row.
///
/// # Errors
///
/// Returns [`TrustError`] on storage or event-append failure.
#[allow(clippy::too_many_arguments)]
pub fn recompute_and_store(
    db: &Database,
    workspace_id: &WorkspaceId,
    agent_id: &AgentId,
    agent_created_at: Timestamp,
    overrides: Option<TrustOverrides>,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<AgentTrust, TrustError> {
    db.with_tx(|tx| {
        let defaults = derive_default_signals(tx, workspace_id, agent_id, agent_created_at, now)?;
        let components = overrides.map_or(defaults, |o| apply_overrides(defaults, o));
        let score = compute_score(&components);
        let previous = load_score(tx, agent_id)?;

        upsert_row(tx, workspace_id, agent_id, &components, score, now)?;

        if let Some(previous_score) = previous {
            let delta = score - previous_score;
            if delta.abs() > EPSILON {
                let event_type = if delta > 0.0 { "agent.trust.increased" } else { "agent.trust.decreased" };
                let event = NewEvent::new(
                    event_type,
                    1,
                    workspace_id.clone(),
                    actor.clone(),
                    StreamRef::workspace(workspace_id),
                    correlation_id.clone(),
                    serde_json::json!({
                        "agent_id": agent_id.as_str(),
                        "previous_score": previous_score,
                        "score": score,
                    }),
                    now,
                );
                append_to_stream(tx, event)?;
            }
        }

        Ok(AgentTrust { agent_id: agent_id.clone(), workspace_id: workspace_id.clone(), components, score, updated_at: now })
    })
}

/// Non-score signals that dampen an approval-mode recommendation; each can
/// only downgrade the recommendation, never upgrade it (spec.md §4.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalModeInputs {
    /// Whether the agent is currently quarantined.
    pub quarantined: bool,
    /// Count of repeated mistakes in the trailing 7 days.
    pub repeated_mistakes_7d: u32,
    /// Fraction of autonomous (non-escalated) actions in the trailing 7 days.
    pub autonomy_rate_7d: f64,
    /// Count of failed skill assessments in the trailing 7 days.
    pub assessment_failed_7d: u32,
    /// `(pass_rate, attempts)` over the trailing 30 days, if any attempts exist.
    pub pass_rate_30d: Option<(f64, u32)>,
}

/// The three approval-mode recommendation targets from spec.md §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalModeSet {
    /// Recommended mode for internal write actions.
    pub internal_write: ApprovalMode,
    /// Recommended mode for external write actions.
    pub external_write: ApprovalMode,
    /// Recommended mode for high-stakes actions.
    pub high_stakes: ApprovalMode,
}

/// Builds the three-target approval-mode recommendation from a trust score
/// and the non-score dampening inputs in [`ApprovalModeInputs`]. Base modes
/// come from the trust thresholds in spec.md §4.8; every dampening signal
/// is applied afterward as a monotonic-only downgrade via
/// [`ApprovalMode::downgrade`].
#[must_use]
pub fn recommend_approval_modes(trust_score: f64, inputs: &ApprovalModeInputs) -> ApprovalModeSet {
    let mut internal_write = base_internal_write(trust_score);
    let mut external_write = base_external_write(trust_score);
    let mut high_stakes = ApprovalMode::Pre;

    if inputs.quarantined {
        internal_write = internal_write.downgrade(ApprovalMode::Blocked);
        external_write = external_write.downgrade(ApprovalMode::Blocked);
        high_stakes = high_stakes.downgrade(ApprovalMode::Blocked);
    }
    if inputs.repeated_mistakes_7d >= 2 {
        internal_write = internal_write.downgrade(ApprovalMode::Pre);
        external_write = external_write.downgrade(ApprovalMode::Pre);
    }
    if inputs.autonomy_rate_7d < 0.5 {
        internal_write = internal_write.downgrade(ApprovalMode::Post);
        external_write = external_write.downgrade(ApprovalMode::Post);
    }
    let assessments_failing =
        inputs.assessment_failed_7d >= 2 || inputs.pass_rate_30d.is_some_and(|(rate, attempts)| attempts >= 3 && rate < 0.6);
    if assessments_failing {
        internal_write = internal_write.downgrade(ApprovalMode::Pre);
        external_write = external_write.downgrade(ApprovalMode::Pre);
    }

    ApprovalModeSet { internal_write, external_write, high_stakes }
}

fn base_internal_write(trust_score: f64) -> ApprovalMode {
    if trust_score >= 0.75 {
        ApprovalMode::Auto
    } else if trust_score >= 0.45 {
        ApprovalMode::Post
    } else {
        ApprovalMode::Pre
    }
}

fn base_external_write(trust_score: f64) -> ApprovalMode {
    if trust_score >= 0.85 { ApprovalMode::Auto } else { ApprovalMode::Pre }
}

#[cfg(test)]
mod tests {
    use opscore_core::Actor;
    use opscore_core::CorrelationId;
    use opscore_core::TrustComponents;

    use super::ApprovalMode;
    use super::ApprovalModeInputs;
    use super::compute_score;
    use super::recommend_approval_modes;
    use super::recompute_and_store;

    fn test_db() -> opscore_store::Database {
        let db = opscore_store::Database::open_in_memory().expect("open db");
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            crate::schema::ensure_schema(tx)
        })
        .expect("schema");
        db
    }

    #[test]
    fn formula_matches_spec_worked_example() {
        let components = TrustComponents {
            success_rate_7d: 0.9,
            eval_quality_trend: 0.2,
            user_feedback_score: 0.8,
            policy_violations_7d: 1,
            time_in_service_days: 45,
        };
        let score = compute_score(&components);
        assert!((score - 0.81).abs() < 1e-9, "expected 0.81, got {score}");
    }

    #[test]
    fn recompute_is_silent_when_score_is_unchanged() {
        let db = test_db();
        let ws = opscore_core::WorkspaceId::new("ws-1");
        let agent = opscore_core::AgentId::new("agent-1");
        let corr = CorrelationId::new("corr-1");
        let created_at = opscore_core::Timestamp::now();
        let now = created_at;

        let overrides = super::TrustOverrides {
            success_rate_7d: Some(0.5),
            eval_quality_trend: Some(0.0),
            user_feedback_score: Some(0.5),
            policy_violations_7d: Some(0),
            time_in_service_days: Some(0),
        };

        recompute_and_store(&db, &ws, &agent, created_at, Some(overrides), &corr, &Actor::user("u1"), now).expect("first");
        let second = recompute_and_store(&db, &ws, &agent, created_at, Some(overrides), &corr, &Actor::user("u1"), now)
            .expect("second");
        assert!((second.score - compute_score(&TrustComponents {
            success_rate_7d: 0.5,
            eval_quality_trend: 0.0,
            user_feedback_score: 0.5,
            policy_violations_7d: 0,
            time_in_service_days: 0,
        })).abs() < 1e-9);

        let count: i64 = db
            .with_conn::<_, opscore_store::StoreError>(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM events WHERE event_type IN ('agent.trust.increased', 'agent.trust.decreased')",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn quarantine_blocks_every_target() {
        let modes = recommend_approval_modes(0.95, &ApprovalModeInputs { quarantined: true, ..ApprovalModeInputs::default() });
        assert_eq!(modes.internal_write, ApprovalMode::Blocked);
        assert_eq!(modes.external_write, ApprovalMode::Blocked);
        assert_eq!(modes.high_stakes, ApprovalMode::Blocked);
    }

    #[test]
    fn high_trust_with_no_dampening_allows_auto() {
        let modes = recommend_approval_modes(0.9, &ApprovalModeInputs::default());
        assert_eq!(modes.internal_write, ApprovalMode::Auto);
        assert_eq!(modes.external_write, ApprovalMode::Auto);
        assert_eq!(modes.high_stakes, ApprovalMode::Pre);
    }

    #[test]
    fn repeated_mistakes_downgrade_but_never_upgrade() {
        let modes = recommend_approval_modes(
            0.9,
            &ApprovalModeInputs { repeated_mistakes_7d: 2, ..ApprovalModeInputs::default() },
        );
        assert_eq!(modes.internal_write, ApprovalMode::Pre);
        assert_eq!(modes.external_write, ApprovalMode::Pre);
    }
}
