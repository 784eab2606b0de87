// crates/opscore-leases/src/work_item.rs
// ============================================================================
// Module: Work-Item Lease
// Description: Exclusive hold over `(workspace_id, work_item_type,
//              work_item_id)`, with claim/heartbeat/release and expired-lease
//              reclaim.
// Purpose: Implements the work-item lease half of spec §4.4.
// Dependencies: rusqlite, opscore_core::{event, ids, lease, time}, opscore_store
// ============================================================================

//! ## Overview
//! A claim is modeled as a three-state machine ([`LeaseState`]) evaluated
//! fresh on every call rather than mutated in place: `Unclaimed`, `Held`
//! (someone holds an unexpired lease), or `Expired` (the holder's lease ran
//! past `expires_at` and is reclaimable). `claim` matches on the state to
//! decide between a fresh claim, a same-caller replay, a reclaim-with-preempt,
//! or a rejection; the reason code the caller sees is a direct function of
//! which arm fired, not a separately maintained flag.

use opscore_core::Actor;
use opscore_core::AgentId;
use opscore_core::CorrelationId;
use opscore_core::EventScope;
use opscore_core::LeaseId;
use opscore_core::NewEvent;
use opscore_core::StreamRef;
use opscore_core::Timestamp;
use opscore_core::WorkItemLease;
use opscore_core::WorkItemType;
use opscore_core::WorkspaceId;
use opscore_store::EventStoreError;
use opscore_store::StoreError;
use opscore_store::append_to_stream;
use rand::RngCore;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use thiserror::Error;

/// Default minimum interval, in seconds, between accepted heartbeats for a
/// single lease, per spec §4.4 (`HEARTBEAT_MIN_INTERVAL_SEC`, default `1`).
pub const HEARTBEAT_MIN_INTERVAL_SEC_DEFAULT: i64 = 1;

/// Errors raised by work-item lease operations.
#[derive(Debug, Error)]
pub enum WorkItemLeaseError {
    /// The work item is already held by another caller with a distinct
    /// correlation id, and the existing lease has not expired.
    #[error("lease.already_claimed")]
    AlreadyClaimed,
    /// The caller's correlation id does not match the one recorded on the
    /// currently held lease.
    #[error("lease.correlation_id_mismatch")]
    CorrelationIdMismatch,
    /// The caller does not hold the lease it is trying to heartbeat or
    /// release.
    #[error("lease.lease_not_owned")]
    LeaseNotOwned,
    /// The caller's known version does not match the lease's current
    /// version (a concurrent heartbeat or claim raced it).
    #[error("lease.lease_version_mismatch")]
    LeaseVersionMismatch,
    /// A heartbeat arrived before `HEARTBEAT_MIN_INTERVAL_SEC` elapsed since
    /// the last accepted heartbeat.
    #[error("lease.heartbeat_rate_limited")]
    HeartbeatRateLimited,
    /// Underlying storage failure.
    #[error("lease.store_error: {0}")]
    Store(#[from] StoreError),
    /// The lease state changed but the resulting event could not be
    /// appended.
    #[error("lease.event_error: {0}")]
    Event(#[from] EventStoreError),
}

impl From<rusqlite::Error> for WorkItemLeaseError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

/// Outcome of a successful [`claim`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// A new lease was created, or an expired one was reclaimed.
    Claimed {
        /// The newly held lease.
        lease: WorkItemLease,
        /// Whether an expired lease belonging to a different holder was
        /// reclaimed to produce this one.
        preempted_previous: bool,
    },
    /// The caller already holds this lease under the same correlation id;
    /// the existing lease is returned unchanged.
    Replayed {
        /// The lease as it already stood.
        lease: WorkItemLease,
    },
}

/// A work item's current lease status, evaluated fresh against `now` rather
/// than stored as a separate flag.
pub enum LeaseState {
    /// No lease row exists.
    Unclaimed,
    /// A lease row exists and has not yet expired.
    Held(WorkItemLease),
    /// A lease row exists but `expires_at` has passed.
    Expired(WorkItemLease),
}

impl LeaseState {
    fn classify(existing: Option<WorkItemLease>, now: Timestamp) -> Self {
        match existing {
            None => Self::Unclaimed,
            Some(lease) if lease.is_expired(now) => Self::Expired(lease),
            Some(lease) => Self::Held(lease),
        }
    }
}

/// Creates the work-item lease schema if it does not already exist.
///
/// # Errors
///
/// Returns [`StoreError`] on any underlying SQLite failure.
pub fn ensure_schema(tx: &Transaction<'_>) -> Result<(), StoreError> {
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS work_item_leases (
            workspace_id TEXT NOT NULL,
            work_item_type TEXT NOT NULL,
            work_item_id TEXT NOT NULL,
            lease_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            claimed_at TEXT NOT NULL,
            heartbeat_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            PRIMARY KEY (workspace_id, work_item_type, work_item_id)
        );",
    )?;
    Ok(())
}

/// Claims the lease on `(workspace_id, work_item_type, work_item_id)` for
/// `agent_id`, or returns it as a replay if the same agent already holds it
/// under the same `correlation_id`.
///
/// # Errors
///
/// Returns [`WorkItemLeaseError::CorrelationIdMismatch`] when another holder's
/// correlation id differs from the caller's, or
/// [`WorkItemLeaseError::AlreadyClaimed`] when the correlation ids match but
/// a different agent holds the lease. Returns [`WorkItemLeaseError::Store`]
/// or [`WorkItemLeaseError::Event`] on underlying failures.
#[allow(clippy::too_many_arguments)]
pub fn claim(
    db: &opscore_store::Database,
    workspace_id: &WorkspaceId,
    work_item_type: WorkItemType,
    work_item_id: &str,
    agent_id: &AgentId,
    actor: &Actor,
    correlation_id: &CorrelationId,
    lease_duration_secs: i64,
    now: Timestamp,
) -> Result<ClaimOutcome, WorkItemLeaseError> {
    db.with_tx(|tx| {
        let existing = load(tx, workspace_id, work_item_type, work_item_id)?;
        match LeaseState::classify(existing, now) {
            LeaseState::Unclaimed => {
                let lease = upsert(tx, workspace_id, work_item_type, work_item_id, agent_id, correlation_id, 1, now, lease_duration_secs)?;
                emit_claimed(tx, workspace_id, &lease, actor, now)?;
                Ok(ClaimOutcome::Claimed { lease, preempted_previous: false })
            }
            LeaseState::Expired(previous) => {
                let lease = upsert(tx, workspace_id, work_item_type, work_item_id, agent_id, correlation_id, 1, now, lease_duration_secs)?;
                emit_preempted(tx, workspace_id, &previous, actor, now)?;
                emit_claimed(tx, workspace_id, &lease, actor, now)?;
                Ok(ClaimOutcome::Claimed { lease, preempted_previous: true })
            }
            LeaseState::Held(lease) if &lease.agent_id == agent_id && &lease.correlation_id == correlation_id => {
                Ok(ClaimOutcome::Replayed { lease })
            }
            LeaseState::Held(lease) if &lease.correlation_id != correlation_id => Err(WorkItemLeaseError::CorrelationIdMismatch),
            LeaseState::Held(_) => Err(WorkItemLeaseError::AlreadyClaimed),
        }
    })
}

/// Heartbeats a held lease, extending `expires_at` by `lease_duration_secs`
/// and incrementing `version`.
///
/// # Errors
///
/// Returns [`WorkItemLeaseError::LeaseNotOwned`] when no lease is held by
/// `agent_id`, [`WorkItemLeaseError::LeaseVersionMismatch`] when
/// `expected_version` is stale, or [`WorkItemLeaseError::HeartbeatRateLimited`]
/// when called before `min_interval_secs` has elapsed since the last accepted
/// heartbeat.
#[allow(clippy::too_many_arguments)]
pub fn heartbeat(
    db: &opscore_store::Database,
    workspace_id: &WorkspaceId,
    work_item_type: WorkItemType,
    work_item_id: &str,
    agent_id: &AgentId,
    expected_version: u32,
    lease_duration_secs: i64,
    min_interval_secs: i64,
    now: Timestamp,
) -> Result<WorkItemLease, WorkItemLeaseError> {
    db.with_tx(|tx| {
        let existing = load(tx, workspace_id, work_item_type, work_item_id)?.ok_or(WorkItemLeaseError::LeaseNotOwned)?;
        if &existing.agent_id != agent_id {
            return Err(WorkItemLeaseError::LeaseNotOwned);
        }
        if existing.version != expected_version {
            return Err(WorkItemLeaseError::LeaseVersionMismatch);
        }
        if now.seconds_since(&existing.heartbeat_at) < min_interval_secs {
            return Err(WorkItemLeaseError::HeartbeatRateLimited);
        }
        let lease = upsert(
            tx,
            workspace_id,
            work_item_type,
            work_item_id,
            agent_id,
            &existing.correlation_id,
            existing.version + 1,
            now,
            lease_duration_secs,
        )?;
        Ok(lease)
    })
}

/// Releases a held lease, deleting the row and emitting `lease.released`.
///
/// # Errors
///
/// Returns [`WorkItemLeaseError::LeaseNotOwned`] when no lease is held by
/// `agent_id`, or [`WorkItemLeaseError::LeaseVersionMismatch`] when
/// `expected_version` is stale.
pub fn release(
    db: &opscore_store::Database,
    workspace_id: &WorkspaceId,
    work_item_type: WorkItemType,
    work_item_id: &str,
    agent_id: &AgentId,
    expected_version: u32,
    actor: &Actor,
    now: Timestamp,
) -> Result<(), WorkItemLeaseError> {
    db.with_tx(|tx| {
        let existing = load(tx, workspace_id, work_item_type, work_item_id)?.ok_or(WorkItemLeaseError::LeaseNotOwned)?;
        if &existing.agent_id != agent_id {
            return Err(WorkItemLeaseError::LeaseNotOwned);
        }
        if existing.version != expected_version {
            return Err(WorkItemLeaseError::LeaseVersionMismatch);
        }
        tx.execute(
            "DELETE FROM work_item_leases WHERE workspace_id = ?1 AND work_item_type = ?2 AND work_item_id = ?3",
            params![workspace_id.as_str(), type_str(work_item_type), work_item_id],
        )?;
        emit_released(tx, workspace_id, &existing, actor, now)?;
        Ok(())
    })
}

fn load(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    work_item_type: WorkItemType,
    work_item_id: &str,
) -> Result<Option<WorkItemLease>, WorkItemLeaseError> {
    tx.query_row(
        "SELECT lease_id, agent_id, correlation_id, version, claimed_at, heartbeat_at, expires_at
         FROM work_item_leases WHERE workspace_id = ?1 AND work_item_type = ?2 AND work_item_id = ?3",
        params![workspace_id.as_str(), type_str(work_item_type), work_item_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        },
    )
    .optional()?
    .map(|(lease_id, agent_id, correlation_id, version, claimed_at, heartbeat_at, expires_at)| {
        Ok(WorkItemLease {
            lease_id: LeaseId::new(lease_id),
            workspace_id: workspace_id.clone(),
            work_item_type,
            work_item_id: work_item_id.to_owned(),
            agent_id: AgentId::new(agent_id),
            correlation_id: CorrelationId::new(correlation_id),
            version,
            claimed_at: Timestamp::parse_rfc3339(&claimed_at).map_err(|e| StoreError::Io(e.to_string()))?,
            heartbeat_at: Timestamp::parse_rfc3339(&heartbeat_at).map_err(|e| StoreError::Io(e.to_string()))?,
            expires_at: Timestamp::parse_rfc3339(&expires_at).map_err(|e| StoreError::Io(e.to_string()))?,
        })
    })
    .transpose()
}

#[allow(clippy::too_many_arguments)]
fn upsert(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    work_item_type: WorkItemType,
    work_item_id: &str,
    agent_id: &AgentId,
    correlation_id: &CorrelationId,
    version: u32,
    now: Timestamp,
    lease_duration_secs: i64,
) -> Result<WorkItemLease, WorkItemLeaseError> {
    let expires_at = now.plus_seconds(lease_duration_secs);
    let lease = WorkItemLease {
        lease_id: new_lease_id(),
        workspace_id: workspace_id.clone(),
        work_item_type,
        work_item_id: work_item_id.to_owned(),
        agent_id: agent_id.clone(),
        correlation_id: correlation_id.clone(),
        version,
        claimed_at: now,
        heartbeat_at: now,
        expires_at,
    };
    tx.execute(
        "INSERT INTO work_item_leases (
            workspace_id, work_item_type, work_item_id, lease_id, agent_id, correlation_id,
            version, claimed_at, heartbeat_at, expires_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
        ON CONFLICT (workspace_id, work_item_type, work_item_id) DO UPDATE SET
            lease_id = excluded.lease_id,
            agent_id = excluded.agent_id,
            correlation_id = excluded.correlation_id,
            version = excluded.version,
            heartbeat_at = excluded.heartbeat_at,
            expires_at = excluded.expires_at",
        params![
            workspace_id.as_str(),
            type_str(work_item_type),
            work_item_id,
            lease.lease_id.as_str(),
            lease.agent_id.as_str(),
            lease.correlation_id.as_str(),
            lease.version,
            lease.claimed_at.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?,
            lease.heartbeat_at.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?,
            lease.expires_at.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?,
        ],
    )?;
    Ok(lease)
}

fn emit_claimed(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    lease: &WorkItemLease,
    actor: &Actor,
    now: Timestamp,
) -> Result<(), WorkItemLeaseError> {
    let data = serde_json::json!({
        "work_item_type": type_str(lease.work_item_type),
        "work_item_id": lease.work_item_id,
        "agent_id": lease.agent_id.as_str(),
        "version": lease.version,
        "expires_at": lease.expires_at.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?,
    });
    let event = NewEvent::new(
        "lease.claimed",
        1,
        workspace_id.clone(),
        actor.clone(),
        StreamRef::workspace(workspace_id),
        lease.correlation_id.clone(),
        data,
        now,
    )
    .with_scope(scope_for(lease));
    append_to_stream(tx, event)?;
    Ok(())
}

fn emit_preempted(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    previous: &WorkItemLease,
    actor: &Actor,
    now: Timestamp,
) -> Result<(), WorkItemLeaseError> {
    let data = serde_json::json!({
        "work_item_type": type_str(previous.work_item_type),
        "work_item_id": previous.work_item_id,
        "previous_agent_id": previous.agent_id.as_str(),
        "reason": "expired_lease_reclaimed",
    });
    let event = NewEvent::new(
        "lease.preempted",
        1,
        workspace_id.clone(),
        actor.clone(),
        StreamRef::workspace(workspace_id),
        previous.correlation_id.clone(),
        data,
        now,
    )
    .with_scope(scope_for(previous));
    append_to_stream(tx, event)?;
    Ok(())
}

fn emit_released(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    lease: &WorkItemLease,
    actor: &Actor,
    now: Timestamp,
) -> Result<(), WorkItemLeaseError> {
    let data = serde_json::json!({
        "work_item_type": type_str(lease.work_item_type),
        "work_item_id": lease.work_item_id,
        "agent_id": lease.agent_id.as_str(),
    });
    let event = NewEvent::new(
        "lease.released",
        1,
        workspace_id.clone(),
        actor.clone(),
        StreamRef::workspace(workspace_id),
        lease.correlation_id.clone(),
        data,
        now,
    )
    .with_scope(scope_for(lease));
    append_to_stream(tx, event)?;
    Ok(())
}

fn scope_for(lease: &WorkItemLease) -> EventScope {
    let mut scope = EventScope::default();
    match lease.work_item_type {
        WorkItemType::Experiment => scope.mission_id = Some(lease.work_item_id.clone()),
        WorkItemType::Incident | WorkItemType::Approval | WorkItemType::Message | WorkItemType::Artifact => {}
    }
    scope
}

fn new_lease_id() -> LeaseId {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(32);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    LeaseId::new(format!("lease_{hex}"))
}

fn type_str(work_item_type: WorkItemType) -> &'static str {
    match work_item_type {
        WorkItemType::Experiment => "experiment",
        WorkItemType::Approval => "approval",
        WorkItemType::Message => "message",
        WorkItemType::Incident => "incident",
        WorkItemType::Artifact => "artifact",
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use opscore_core::Actor;
    use opscore_core::AgentId;
    use opscore_core::CorrelationId;
    use opscore_core::Timestamp;
    use opscore_core::WorkItemType;
    use opscore_core::WorkspaceId;
    use opscore_store::Database;

    use super::ClaimOutcome;
    use super::claim;
    use super::heartbeat;
    use super::release;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            super::ensure_schema(tx)?;
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn claim_then_replay_then_rejects_other_agent() {
        let db = setup();
        let ws = WorkspaceId::new("ws-1");
        let corr = CorrelationId::new("corr-1");
        let agent = AgentId::new("agent-1");
        let actor = Actor::agent("agent-1", opscore_core::PrincipalId::new("principal-1"));
        let now = Timestamp::now();

        let first = claim(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, &actor, &corr, 30, now).unwrap();
        assert!(matches!(first, ClaimOutcome::Claimed { preempted_previous: false, .. }));

        let replay = claim(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, &actor, &corr, 30, now).unwrap();
        assert!(matches!(replay, ClaimOutcome::Replayed { .. }));

        let other_agent = AgentId::new("agent-2");
        let other_actor = Actor::agent("agent-2", opscore_core::PrincipalId::new("principal-2"));
        let other_corr = CorrelationId::new("corr-2");
        let rejected = claim(&db, &ws, WorkItemType::Experiment, "exp-1", &other_agent, &other_actor, &other_corr, 30, now);
        assert!(matches!(rejected, Err(super::WorkItemLeaseError::AlreadyClaimed)));
    }

    #[test]
    fn expired_lease_is_reclaimed_with_preempt() {
        let db = setup();
        let ws = WorkspaceId::new("ws-1");
        let corr = CorrelationId::new("corr-1");
        let agent = AgentId::new("agent-1");
        let actor = Actor::agent("agent-1", opscore_core::PrincipalId::new("principal-1"));
        let now = Timestamp::now();
        claim(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, &actor, &corr, 5, now).unwrap();

        let later = now.plus_seconds(10);
        let other_agent = AgentId::new("agent-2");
        let other_actor = Actor::agent("agent-2", opscore_core::PrincipalId::new("principal-2"));
        let other_corr = CorrelationId::new("corr-2");
        let reclaimed = claim(&db, &ws, WorkItemType::Experiment, "exp-1", &other_agent, &other_actor, &other_corr, 5, later).unwrap();
        assert!(matches!(reclaimed, ClaimOutcome::Claimed { preempted_previous: true, .. }));
    }

    #[test]
    fn heartbeat_rejects_stale_version_then_accepts_release() {
        let db = setup();
        let ws = WorkspaceId::new("ws-1");
        let corr = CorrelationId::new("corr-1");
        let agent = AgentId::new("agent-1");
        let actor = Actor::agent("agent-1", opscore_core::PrincipalId::new("principal-1"));
        let now = Timestamp::now();
        claim(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, &actor, &corr, 30, now).unwrap();

        let later = now.plus_seconds(5);
        let bumped = heartbeat(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, 1, 30, 0, later).unwrap();
        assert_eq!(bumped.version, 2);

        let stale = heartbeat(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, 1, 30, 0, later);
        assert!(matches!(stale, Err(super::WorkItemLeaseError::LeaseVersionMismatch)));

        release(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, 2, &actor, later).unwrap();
        let reclaim_after_release = claim(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, &actor, &corr, 30, later).unwrap();
        assert!(matches!(reclaim_after_release, ClaimOutcome::Claimed { preempted_previous: false, .. }));
    }

    proptest! {
        /// A run of accepted heartbeats increments `version` by exactly one
        /// each time, and every stale `expected_version` (anything but the
        /// caller's last-seen value) is always rejected, never silently
        /// accepted or applied out of order.
        #[test]
        fn heartbeat_versions_increase_by_one_and_reject_any_stale_value(heartbeat_count in 1usize..12) {
            let db = setup();
            let ws = WorkspaceId::new("ws-1");
            let corr = CorrelationId::new("corr-1");
            let agent = AgentId::new("agent-1");
            let actor = Actor::agent("agent-1", opscore_core::PrincipalId::new("principal-1"));
            let start = Timestamp::now();

            let claimed = claim(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, &actor, &corr, 3_600, start).unwrap();
            let mut version = match claimed {
                ClaimOutcome::Claimed { lease, .. } => lease.version,
                ClaimOutcome::Replayed { .. } => unreachable!("fresh claim never replays"),
            };

            for step in 1..=heartbeat_count {
                let now = start.plus_seconds(step as i64);

                let stale = heartbeat(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, version.wrapping_sub(1), 3_600, 0, now);
                prop_assert!(matches!(stale, Err(super::WorkItemLeaseError::LeaseVersionMismatch)));

                let next_version_too_high = heartbeat(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, version + 1, 3_600, 0, now);
                prop_assert!(matches!(next_version_too_high, Err(super::WorkItemLeaseError::LeaseVersionMismatch)));

                let accepted = heartbeat(&db, &ws, WorkItemType::Experiment, "exp-1", &agent, version, 3_600, 0, now).unwrap();
                prop_assert_eq!(accepted.version, version + 1);
                version = accepted.version;
            }
        }
    }
}
