// crates/opscore-incidents/src/experiments.rs
// ============================================================================
// Module: Experiment Lifecycle
// Description: create/update/close over hypothesis-tracking experiments.
// Purpose: Owns the active-run counting and force-close branching that spec
//          §4.9 attaches to `experiment.closed`; the projector itself only
//          ever applies whatever status this module decided on.
// Dependencies: rusqlite, opscore_core::{event, ids, incident, time}, opscore_store
// ============================================================================

//! ## Overview
//! `create` appends `experiment.created` unconditionally. `update` is a
//! no-op write against a closed experiment (the projector already enforces
//! `status = 'open'`), but this module still reports that as an error so a
//! caller cannot mistake a silently-ignored update for a successful one.
//! `close` counts the experiment's active (`queued`|`running`) runs before
//! deciding between `closed`, `stopped`, or rejecting outright.

use opscore_core::Actor;
use opscore_core::CorrelationId;
use opscore_core::Experiment;
use opscore_core::ExperimentId;
use opscore_core::ExperimentStatus;
use opscore_core::NewEvent;
use opscore_core::RiskTier;
use opscore_core::StreamRef;
use opscore_core::Timestamp;
use opscore_core::WorkspaceId;
use opscore_store::Database;
use opscore_store::EventStoreError;
use opscore_store::ProjectorError;
use opscore_store::ProjectorRegistry;
use opscore_store::StoreError;
use opscore_store::append_to_stream;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use thiserror::Error;

/// Errors raised while creating, updating, or closing an experiment.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// No experiment exists with the given id.
    #[error("experiment.not_found")]
    NotFound,
    /// The experiment is not `open`, so the requested mutation is refused.
    #[error("experiment.not_open")]
    NotOpen,
    /// `close` was called without `force` while active runs remain.
    #[error("experiment_has_active_runs")]
    ActiveRunsBlockClose,
    /// Underlying storage failure.
    #[error("experiment.store_error: {0}")]
    Store(#[from] StoreError),
    /// The lifecycle event could not be appended or projected.
    #[error("experiment.event_error: {0}")]
    Event(String),
}

impl From<rusqlite::Error> for ExperimentError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

impl From<EventStoreError> for ExperimentError {
    fn from(err: EventStoreError) -> Self {
        Self::Event(err.to_string())
    }
}

impl From<ProjectorError> for ExperimentError {
    fn from(err: ProjectorError) -> Self {
        Self::Event(err.to_string())
    }
}

const fn risk_tier_str(tier: RiskTier) -> &'static str {
    match tier {
        RiskTier::Low => "low",
        RiskTier::Medium => "medium",
        RiskTier::High => "high",
    }
}

/// Appends `experiment.created` and returns the materialized row.
///
/// # Errors
///
/// Returns [`ExperimentError`] on storage or projection failure.
#[allow(clippy::too_many_arguments)]
pub fn create(
    db: &Database,
    workspace_id: &WorkspaceId,
    experiment_id: &ExperimentId,
    room_id: &str,
    title: &str,
    hypothesis: &str,
    success_criteria: &[String],
    stop_conditions: &[String],
    budget_cap_units: u64,
    risk_tier: RiskTier,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<Experiment, ExperimentError> {
    db.with_tx(|tx| {
        let event = NewEvent::new(
            "experiment.created",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::room(room_id),
            correlation_id.clone(),
            serde_json::json!({
                "experiment_id": experiment_id.as_str(),
                "room_id": room_id,
                "title": title,
                "hypothesis": hypothesis,
                "success_criteria": success_criteria,
                "stop_conditions": stop_conditions,
                "budget_cap_units": budget_cap_units,
                "risk_tier": risk_tier_str(risk_tier),
            }),
            now,
        );
        let persisted = append_to_stream(tx, event)?;
        ProjectorRegistry::apply(tx, &persisted)?;
        load(tx, experiment_id)?.ok_or(ExperimentError::NotFound)
    })
}

/// Appends `experiment.updated` for a title change and/or an observed
/// active-run-count refresh. Refuses when the experiment is not `open`.
///
/// # Errors
///
/// Returns [`ExperimentError::NotFound`] if the experiment does not exist,
/// [`ExperimentError::NotOpen`] if it is not `open`, or [`ExperimentError`]
/// on storage/projection failure.
pub fn update(
    db: &Database,
    workspace_id: &WorkspaceId,
    experiment_id: &ExperimentId,
    title: Option<&str>,
    active_run_count: Option<u32>,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<Experiment, ExperimentError> {
    db.with_tx(|tx| {
        let row = load(tx, experiment_id)?.ok_or(ExperimentError::NotFound)?;
        if row.status != ExperimentStatus::Open {
            return Err(ExperimentError::NotOpen);
        }

        let mut data = serde_json::json!({ "experiment_id": experiment_id.as_str() });
        if let Some(title) = title {
            data["title"] = serde_json::Value::String(title.to_owned());
        }
        if let Some(count) = active_run_count {
            data["active_run_count"] = serde_json::Value::from(count);
        }

        let event = NewEvent::new(
            "experiment.updated",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::room(row.room_id.as_str()),
            correlation_id.clone(),
            data,
            now,
        );
        let persisted = append_to_stream(tx, event)?;
        ProjectorRegistry::apply(tx, &persisted)?;
        load(tx, experiment_id)?.ok_or(ExperimentError::NotFound)
    })
}

/// Counts the experiment's active (`queued`|`running`) runs, then closes it:
/// without `force` and active runs present, refuses with
/// [`ExperimentError::ActiveRunsBlockClose`]; with `force` and active runs
/// present, transitions to `stopped`; otherwise transitions to `closed`.
///
/// # Errors
///
/// Returns [`ExperimentError::NotFound`] if the experiment does not exist,
/// [`ExperimentError::ActiveRunsBlockClose`] per the rule above, or
/// [`ExperimentError`] on storage/projection failure.
pub fn close(
    db: &Database,
    workspace_id: &WorkspaceId,
    experiment_id: &ExperimentId,
    force: bool,
    reason: Option<&str>,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<Experiment, ExperimentError> {
    db.with_tx(|tx| {
        let row = load(tx, experiment_id)?.ok_or(ExperimentError::NotFound)?;
        let active_runs: i64 = tx.query_row(
            "SELECT COUNT(*) FROM runs WHERE experiment_id = ?1 AND status IN ('queued','running')",
            params![experiment_id.as_str()],
            |r| r.get(0),
        )?;

        let status = if active_runs > 0 {
            if !force {
                return Err(ExperimentError::ActiveRunsBlockClose);
            }
            "stopped"
        } else {
            "closed"
        };

        let event = NewEvent::new(
            "experiment.closed",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::room(row.room_id.as_str()),
            correlation_id.clone(),
            serde_json::json!({
                "experiment_id": experiment_id.as_str(),
                "status": status,
                "reason": reason,
            }),
            now,
        );
        let persisted = append_to_stream(tx, event)?;
        ProjectorRegistry::apply(tx, &persisted)?;
        load(tx, experiment_id)?.ok_or(ExperimentError::NotFound)
    })
}

fn load(tx: &Transaction<'_>, experiment_id: &ExperimentId) -> Result<Option<Experiment>, ExperimentError> {
    tx.query_row(
        "SELECT experiment_id, workspace_id, room_id, title, hypothesis, success_criteria,
                stop_conditions, budget_cap_units, risk_tier, status, close_reason,
                active_run_count, created_at, updated_at
         FROM experiments WHERE experiment_id = ?1",
        params![experiment_id.as_str()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, i64>(11)?,
                row.get::<_, String>(12)?,
                row.get::<_, String>(13)?,
            ))
        },
    )
    .optional()?
    .map(
        |(
            experiment_id,
            workspace_id,
            room_id,
            title,
            hypothesis,
            success_criteria,
            stop_conditions,
            budget_cap_units,
            risk_tier,
            status,
            close_reason,
            active_run_count,
            created_at,
            updated_at,
        )| {
            Ok(Experiment {
                experiment_id: ExperimentId::new(experiment_id),
                workspace_id: WorkspaceId::new(workspace_id),
                room_id: opscore_core::RoomId::new(room_id),
                title,
                hypothesis,
                success_criteria: serde_json::from_str(&success_criteria).unwrap_or_default(),
                stop_conditions: serde_json::from_str(&stop_conditions).unwrap_or_default(),
                budget_cap_units: u64::try_from(budget_cap_units).unwrap_or_default(),
                risk_tier: risk_tier_from_str(&risk_tier),
                status: status_from_str(&status),
                close_reason,
                active_run_count: u32::try_from(active_run_count).unwrap_or_default(),
                created_at: Timestamp::parse_rfc3339(&created_at).map_err(|e| StoreError::Io(e.to_string()))?,
                updated_at: Timestamp::parse_rfc3339(&updated_at).map_err(|e| StoreError::Io(e.to_string()))?,
            })
        },
    )
    .transpose()
    .map_err(ExperimentError::Store)
}

fn risk_tier_from_str(value: &str) -> RiskTier {
    match value {
        "medium" => RiskTier::Medium,
        "high" => RiskTier::High,
        _ => RiskTier::Low,
    }
}

fn status_from_str(value: &str) -> ExperimentStatus {
    match value {
        "closed" => ExperimentStatus::Closed,
        "stopped" => ExperimentStatus::Stopped,
        _ => ExperimentStatus::Open,
    }
}

#[cfg(test)]
mod tests {
    use opscore_core::Actor;
    use opscore_core::CorrelationId;
    use opscore_core::ExperimentId;
    use opscore_core::ExperimentStatus;
    use opscore_core::RiskTier;
    use opscore_core::Timestamp;
    use opscore_core::WorkspaceId;

    use super::close;
    use super::create;
    use super::update;
    use super::ExperimentError;

    fn test_db() -> opscore_store::Database {
        let db = opscore_store::Database::open_in_memory().expect("open db");
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            opscore_store::ProjectorRegistry::ensure_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))
        })
        .expect("schema");
        db
    }

    fn new_experiment(db: &opscore_store::Database, id: &str) -> opscore_core::Experiment {
        create(
            db,
            &WorkspaceId::new("ws-1"),
            &ExperimentId::new(id),
            "room-1",
            "title",
            "hypothesis",
            &["criterion-a".to_owned()],
            &["stop-a".to_owned()],
            100,
            RiskTier::Medium,
            &CorrelationId::new("corr-1"),
            &Actor::user("u1"),
            Timestamp::now(),
        )
        .expect("create")
    }

    #[test]
    fn close_without_active_runs_closes() {
        let db = test_db();
        new_experiment(&db, "exp-1");
        let closed = close(
            &db,
            &WorkspaceId::new("ws-1"),
            &ExperimentId::new("exp-1"),
            false,
            None,
            &CorrelationId::new("corr-1"),
            &Actor::user("u1"),
            Timestamp::now(),
        )
        .expect("close");
        assert_eq!(closed.status, ExperimentStatus::Closed);
    }

    #[test]
    fn close_with_active_runs_requires_force() {
        let db = test_db();
        new_experiment(&db, "exp-2");
        db.with_conn::<_, opscore_store::StoreError>(|conn| {
            conn.execute(
                "INSERT INTO runs (run_id, workspace_id, room_id, thread_id, experiment_id, title, goal, input, tags, correlation_id, status, created_at, updated_at)
                 VALUES ('run-1','ws-1','room-1','thread-1','exp-2','t','g','null','[]','corr-1','queued','2024-01-01T00:00:00Z','2024-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .expect("seed run");

        let blocked = close(
            &db,
            &WorkspaceId::new("ws-1"),
            &ExperimentId::new("exp-2"),
            false,
            None,
            &CorrelationId::new("corr-1"),
            &Actor::user("u1"),
            Timestamp::now(),
        );
        assert!(matches!(blocked, Err(ExperimentError::ActiveRunsBlockClose)));

        let stopped = close(
            &db,
            &WorkspaceId::new("ws-1"),
            &ExperimentId::new("exp-2"),
            true,
            Some("force-stopped for test"),
            &CorrelationId::new("corr-1"),
            &Actor::user("u1"),
            Timestamp::now(),
        )
        .expect("force close");
        assert_eq!(stopped.status, ExperimentStatus::Stopped);
    }

    #[test]
    fn update_after_close_is_rejected() {
        let db = test_db();
        new_experiment(&db, "exp-3");
        close(
            &db,
            &WorkspaceId::new("ws-1"),
            &ExperimentId::new("exp-3"),
            false,
            None,
            &CorrelationId::new("corr-1"),
            &Actor::user("u1"),
            Timestamp::now(),
        )
        .expect("close");

        let result = update(
            &db,
            &WorkspaceId::new("ws-1"),
            &ExperimentId::new("exp-3"),
            Some("new title"),
            None,
            &CorrelationId::new("corr-1"),
            &Actor::user("u1"),
            Timestamp::now(),
        );
        assert!(matches!(result, Err(ExperimentError::NotOpen)));
    }
}
