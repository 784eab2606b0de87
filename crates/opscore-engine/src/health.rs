// crates/opscore-engine/src/health.rs
// ============================================================================
// Module: Health Summary
// Description: The tri-state Healthy/Degraded/Down rollup over the store's
//              dead-letter backlog and projection freshness.
// Purpose: Back `CheckHealth`, the in-process analogue of `/v1/system/health`.
// Dependencies: opscore_store::{catchup, watermark}, opscore_contract::EngineConfig
// ============================================================================

//! ## Overview
//! [`health_summary`] never fails: a subsystem it cannot read (a missing
//! watermark row, an unreachable table) degrades the summary rather than
//! propagating an error, since a health check that itself errors is the one
//! response this endpoint must never give. The DLQ-backlog-triggers-Degraded
//! rule reads [`opscore_store::CatchUpWorker::dead_letter_count`] directly;
//! stale projection freshness against [`opscore_contract::EngineConfig`]'s
//! configured thresholds escalates to Down.

use std::time::Duration;

use opscore_contract::EngineConfig;
use opscore_core::Timestamp;
use opscore_core::WorkspaceId;
use opscore_store::CatchUpWorker;
use opscore_store::Database;
use serde::Serialize;

/// Name used for the one `CatchUpWorker` instance health polls; the
/// dead-letter count it reports is not actually scoped to a single
/// projector (see `CatchUpWorker::dead_letter_count`), so any name serves.
const HEALTH_PROBE_PROJECTOR_NAME: &str = "health_probe";

/// Overall health state, per spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Fully operational.
    Healthy,
    /// Operating with a known, bounded degradation.
    Degraded,
    /// Not serving traffic reliably.
    Down,
}

/// One subsystem's contribution to the overall [`HealthState`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Subsystem name, e.g. `"dead_letter_queue"`.
    pub name: String,
    /// This subsystem's own state.
    pub state: HealthState,
    /// Human-readable detail.
    pub detail: String,
}

/// The full health summary returned by `CheckHealth`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    /// The worst state across every check.
    pub state: HealthState,
    /// Per-subsystem detail, populated when the caller requests it.
    pub checks: Vec<HealthCheck>,
}

/// Computes the health summary for `workspace_id`.
///
/// Never returns an error: a subsystem this function cannot read reports
/// its own check as [`HealthState::Down`] rather than aborting the whole
/// summary.
#[must_use]
pub fn health_summary(db: &Database, config: &EngineConfig, workspace_id: &WorkspaceId, include_checks: bool) -> HealthSummary {
    let dlq_check = dlq_check(db, config, workspace_id);
    let freshness_check = freshness_check(db, config, workspace_id);

    let checks = [dlq_check, freshness_check];
    let state = checks.iter().map(|c| c.state).max_by_key(state_rank).unwrap_or(HealthState::Healthy);

    HealthSummary { state, checks: if include_checks { checks.to_vec() } else { Vec::new() } }
}

fn state_rank(state: &HealthState) -> u8 {
    match state {
        HealthState::Healthy => 0,
        HealthState::Degraded => 1,
        HealthState::Down => 2,
    }
}

fn dlq_check(db: &Database, config: &EngineConfig, workspace_id: &WorkspaceId) -> HealthCheck {
    let worker = CatchUpWorker::new(db.clone(), HEALTH_PROBE_PROJECTOR_NAME, 1, Duration::from_millis(0));
    match worker.dead_letter_count(workspace_id) {
        Ok(count) if count >= config.health_degraded_dlq_backlog => HealthCheck {
            name: "dead_letter_queue".to_string(),
            state: HealthState::Degraded,
            detail: format!("{count} dead-lettered events pending operator review"),
        },
        Ok(count) => HealthCheck {
            name: "dead_letter_queue".to_string(),
            state: HealthState::Healthy,
            detail: format!("{count} dead-lettered events"),
        },
        Err(err) => HealthCheck {
            name: "dead_letter_queue".to_string(),
            state: HealthState::Down,
            detail: format!("could not read dead-letter backlog: {err}"),
        },
    }
}

fn freshness_check(db: &Database, config: &EngineConfig, workspace_id: &WorkspaceId) -> HealthCheck {
    let watermark = db.with_conn::<_, opscore_store::StoreError>(|conn| {
        opscore_store::watermark::read(conn, workspace_id, HEALTH_PROBE_PROJECTOR_NAME)
    });

    let Ok(watermark) = watermark else {
        return HealthCheck {
            name: "projection_freshness".to_string(),
            state: HealthState::Down,
            detail: "could not read projector watermark".to_string(),
        };
    };

    let Some(last_applied) = watermark.and_then(|w| w.last_applied_event_occurred_at) else {
        return HealthCheck {
            name: "projection_freshness".to_string(),
            state: HealthState::Healthy,
            detail: "no watermark recorded yet".to_string(),
        };
    };

    let lag_secs = Timestamp::now().seconds_since(&last_applied).max(0);
    let lag = Duration::from_secs(u64::try_from(lag_secs).unwrap_or(u64::MAX));

    if lag > config.health_down_projection_lag {
        HealthCheck {
            name: "projection_freshness".to_string(),
            state: HealthState::Down,
            detail: format!("projection lag {}s exceeds threshold {}s", lag.as_secs(), config.health_down_projection_lag.as_secs()),
        }
    } else {
        HealthCheck {
            name: "projection_freshness".to_string(),
            state: HealthState::Healthy,
            detail: format!("projection lag {}s", lag.as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_database_reports_healthy() {
        let db = Database::open_in_memory().unwrap();
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            opscore_store::catchup::ensure_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            opscore_store::watermark::ensure_schema(tx)
        })
        .unwrap();

        let config = EngineConfig::for_tests();
        let workspace_id = WorkspaceId::new("ws-1");
        let summary = health_summary(&db, &config, &workspace_id, true);
        assert_eq!(summary.state, HealthState::Healthy);
        assert_eq!(summary.checks.len(), 2);
    }

    #[test]
    fn dlq_backlog_at_or_above_threshold_degrades() {
        let db = Database::open_in_memory().unwrap();
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            opscore_store::catchup::ensure_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            opscore_store::watermark::ensure_schema(tx)?;
            tx.execute(
                "INSERT INTO projector_dead_letters (workspace_id, projector_name, event_id, last_error, attempts)
                 VALUES ('ws-1', 'run_projector', 'evt-1', 'boom', 3)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let config = EngineConfig::for_tests();
        let workspace_id = WorkspaceId::new("ws-1");
        let summary = health_summary(&db, &config, &workspace_id, false);
        assert_eq!(summary.state, HealthState::Degraded);
        assert!(summary.checks.is_empty());
    }
}
