// crates/opscore-leases/src/run_lease.rs
// ============================================================================
// Module: Run-Execution Lease
// Description: Exclusive hold on a run's execution slot, backed by the run
//              row's own lease columns plus an append-only attempts ledger.
// Purpose: Implements the run-execution lease half of spec §4.4.
// Dependencies: rusqlite, opscore_core::{event, ids, run, time}, opscore_store
// ============================================================================

//! ## Overview
//! Unlike a work-item lease (its own table, one row per work item), a run's
//! lease fields (`claim_token`, `claimed_by_actor_id`, `lease_expires_at`,
//! `lease_heartbeat_at`) live on the `runs` row itself, and every claim is
//! additionally recorded as a dense, 1-based [`opscore_core::RunAttempt`] in
//! `run_attempts` — an append-only ledger a post-incident review can replay
//! independently of the row's current state. [`RUN_LOCK_NAMESPACE`] serializes
//! the claim critical section per `run_id` via [`opscore_store::Database::try_advisory_lock`],
//! closing the read-check-write race a bare `UPDATE ... WHERE` cannot on its
//! own once the reclaim-on-expiry branch is involved.

use opscore_core::Actor;
use opscore_core::EngineId;
use opscore_core::EventScope;
use opscore_core::NewEvent;
use opscore_core::PrincipalId;
use opscore_core::RunAttemptId;
use opscore_core::RunId;
use opscore_core::StreamRef;
use opscore_core::Timestamp;
use opscore_store::Database;
use opscore_store::EventStoreError;
use opscore_store::ProjectorError;
use opscore_store::ProjectorRegistry;
use opscore_store::StoreError;
use opscore_store::append_to_stream;
use rand::RngCore;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use thiserror::Error;

/// In-process advisory lock namespace serializing run-lease claims, keyed by
/// `run_id`, per spec §4.4 / §9 Design Notes.
pub const RUN_LOCK_NAMESPACE: i64 = 215;

/// Errors raised by run-execution lease operations.
#[derive(Debug, Error)]
pub enum RunLeaseError {
    /// A claim attempt lost the race for the in-process advisory lock.
    #[error("lease.already_claimed")]
    AlreadyClaimed,
    /// No run exists with the given id.
    #[error("lease.unknown_run")]
    UnknownRun,
    /// `claim_token` does not match the run's current claim.
    #[error("lease.lease_not_owned")]
    LeaseNotOwned,
    /// Underlying storage failure.
    #[error("lease.store_error: {0}")]
    Store(#[from] StoreError),
    /// The lease state changed but the resulting event could not be
    /// appended or projected.
    #[error("lease.event_error: {0}")]
    Event(String),
}

impl From<rusqlite::Error> for RunLeaseError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

impl From<EventStoreError> for RunLeaseError {
    fn from(err: EventStoreError) -> Self {
        Self::Event(err.to_string())
    }
}

impl From<ProjectorError> for RunLeaseError {
    fn from(err: ProjectorError) -> Self {
        Self::Event(err.to_string())
    }
}

/// The result of a successful [`claim_run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunClaim {
    /// Token the claimant must present to heartbeat or release.
    pub claim_token: String,
    /// The attempt ledger row created for this claim.
    pub attempt_no: u32,
    /// Lease expiry.
    pub lease_expires_at: Timestamp,
    /// Whether an expired lease belonging to a prior attempt was reclaimed.
    pub preempted_previous: bool,
}

struct RunRow {
    status: String,
    claim_token: Option<String>,
    lease_expires_at: Option<Timestamp>,
    correlation_id: String,
}

/// Claims the execution slot on `run_id` for `engine_id`/`claimer_principal_id`.
///
/// A `queued` run is claimed outright; a `running` run with an expired lease
/// is reclaimed, marking the superseding attempt `preempted`. Any other
/// state is [`RunLeaseError::AlreadyClaimed`].
///
/// # Errors
///
/// Returns [`RunLeaseError::AlreadyClaimed`] when the in-process advisory
/// lock for `run_id` is already held, or when the run is actively leased by
/// another claimant. Returns [`RunLeaseError::UnknownRun`] when `run_id`
/// does not exist.
pub fn claim_run(
    db: &Database,
    run_id: &RunId,
    engine_id: &EngineId,
    claimer_principal_id: &PrincipalId,
    lease_duration_secs: i64,
    now: Timestamp,
) -> Result<RunClaim, RunLeaseError> {
    let _guard = db.try_advisory_lock(RUN_LOCK_NAMESPACE, run_id.as_str()).ok_or(RunLeaseError::AlreadyClaimed)?;

    db.with_tx(|tx| {
        let row = load_run(tx, run_id)?.ok_or(RunLeaseError::UnknownRun)?;
        let expired = row.lease_expires_at.is_none_or(|expires| expires <= now);

        let claimable = match row.status.as_str() {
            "queued" => true,
            "running" => expired,
            _ => false,
        };
        if !claimable {
            return Err(RunLeaseError::AlreadyClaimed);
        }

        let was_running = row.status == "running";
        let claim_token = new_claim_token();
        let lease_expires_at = now.plus_seconds(lease_duration_secs);
        let next_attempt_no = next_attempt_no(tx, run_id)?;

        if was_running {
            preempt_open_attempt(tx, run_id, now)?;
        }

        insert_attempt(tx, run_id, next_attempt_no, &claim_token, claimer_principal_id, engine_id, now)?;

        tx.execute(
            "UPDATE runs SET claim_token = ?1, claimed_by_actor_id = ?2, lease_expires_at = ?3, lease_heartbeat_at = ?3
             WHERE run_id = ?4",
            params![
                claim_token,
                engine_id.as_str(),
                lease_expires_at.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?,
                run_id.as_str(),
            ],
        )?;

        if !was_running {
            let event = NewEvent::new(
                "run.started",
                1,
                infer_workspace_id(tx, run_id)?,
                Actor::service(engine_id.as_str()),
                StreamRef::room(infer_room_id(tx, run_id)?),
                row.correlation_id.as_str().into(),
                serde_json::json!({ "run_id": run_id.as_str() }),
                now,
            )
            .with_scope(EventScope { run_id: Some(run_id.as_str().to_owned()), ..EventScope::default() });
            let persisted = append_to_stream(tx, event)?;
            ProjectorRegistry::apply(tx, &persisted)?;
        }

        Ok(RunClaim { claim_token, attempt_no: next_attempt_no, lease_expires_at, preempted_previous: was_running })
    })
}

/// Heartbeats a held run-execution lease, extending `lease_expires_at`.
///
/// # Errors
///
/// Returns [`RunLeaseError::LeaseNotOwned`] when `claim_token` does not match
/// the run's current claim, or [`RunLeaseError::UnknownRun`] when `run_id`
/// does not exist.
pub fn heartbeat_run(
    db: &Database,
    run_id: &RunId,
    claim_token: &str,
    lease_duration_secs: i64,
    now: Timestamp,
) -> Result<Timestamp, RunLeaseError> {
    db.with_tx(|tx| {
        let row = load_run(tx, run_id)?.ok_or(RunLeaseError::UnknownRun)?;
        if row.claim_token.as_deref() != Some(claim_token) {
            return Err(RunLeaseError::LeaseNotOwned);
        }
        let lease_expires_at = now.plus_seconds(lease_duration_secs);
        tx.execute(
            "UPDATE runs SET lease_expires_at = ?1, lease_heartbeat_at = ?2 WHERE run_id = ?3",
            params![
                lease_expires_at.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?,
                now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?,
                run_id.as_str(),
            ],
        )?;
        Ok(lease_expires_at)
    })
}

/// Releases a held run-execution lease: closes the open attempt ledger row
/// with `released_reason`, clears the run's lease columns, and returns the
/// run to `queued` so it can be claimed again.
///
/// # Errors
///
/// Returns [`RunLeaseError::LeaseNotOwned`] when `claim_token` does not match
/// the run's current claim.
pub fn release_run(
    db: &Database,
    run_id: &RunId,
    claim_token: &str,
    released_reason: &str,
    now: Timestamp,
) -> Result<(), RunLeaseError> {
    db.with_tx(|tx| {
        let row = load_run(tx, run_id)?.ok_or(RunLeaseError::UnknownRun)?;
        if row.claim_token.as_deref() != Some(claim_token) {
            return Err(RunLeaseError::LeaseNotOwned);
        }
        tx.execute(
            "UPDATE run_attempts SET released_at = ?1, released_reason = ?2
             WHERE run_id = ?3 AND claim_token = ?4 AND released_at IS NULL",
            params![now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?, released_reason, run_id.as_str(), claim_token],
        )?;
        tx.execute(
            "UPDATE runs SET status = 'queued', claim_token = NULL, claimed_by_actor_id = NULL,
             lease_expires_at = NULL, lease_heartbeat_at = NULL WHERE run_id = ?1",
            params![run_id.as_str()],
        )?;
        Ok(())
    })
}

fn load_run(tx: &Transaction<'_>, run_id: &RunId) -> Result<Option<RunRow>, RunLeaseError> {
    tx.query_row(
        "SELECT status, claim_token, lease_expires_at, correlation_id FROM runs WHERE run_id = ?1",
        params![run_id.as_str()],
        |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, Option<String>>(2)?, row.get::<_, String>(3)?))
        },
    )
    .optional()?
    .map(|(status, claim_token, lease_expires_at, correlation_id)| {
        let lease_expires_at = lease_expires_at
            .map(|v| Timestamp::parse_rfc3339(&v).map_err(|e| StoreError::Io(e.to_string())))
            .transpose()?;
        Ok(RunRow { status, claim_token, lease_expires_at, correlation_id })
    })
    .transpose()
    .map_err(RunLeaseError::Store)
}

fn infer_workspace_id(tx: &Transaction<'_>, run_id: &RunId) -> Result<opscore_core::WorkspaceId, RunLeaseError> {
    let workspace_id: String =
        tx.query_row("SELECT workspace_id FROM runs WHERE run_id = ?1", params![run_id.as_str()], |row| row.get(0))?;
    Ok(workspace_id.into())
}

fn infer_room_id(tx: &Transaction<'_>, run_id: &RunId) -> Result<String, RunLeaseError> {
    let room_id: String = tx.query_row("SELECT room_id FROM runs WHERE run_id = ?1", params![run_id.as_str()], |row| row.get(0))?;
    Ok(room_id)
}

fn next_attempt_no(tx: &Transaction<'_>, run_id: &RunId) -> Result<u32, RunLeaseError> {
    let current: Option<i64> = tx
        .query_row("SELECT MAX(attempt_no) FROM run_attempts WHERE run_id = ?1", params![run_id.as_str()], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(current.unwrap_or(0) as u32 + 1)
}

fn preempt_open_attempt(tx: &Transaction<'_>, run_id: &RunId, now: Timestamp) -> Result<(), RunLeaseError> {
    tx.execute(
        "UPDATE run_attempts SET released_at = ?1, released_reason = 'preempted'
         WHERE run_id = ?2 AND released_at IS NULL",
        params![now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?, run_id.as_str()],
    )?;
    Ok(())
}

fn insert_attempt(
    tx: &Transaction<'_>,
    run_id: &RunId,
    attempt_no: u32,
    claim_token: &str,
    claimer_principal_id: &PrincipalId,
    engine_id: &EngineId,
    now: Timestamp,
) -> Result<(), RunLeaseError> {
    tx.execute(
        "INSERT INTO run_attempts (
            attempt_id, run_id, attempt_no, claim_token, claimer_principal_id, engine_id,
            claimed_at, released_at, released_reason
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,NULL,NULL)",
        params![
            new_attempt_id().as_str(),
            run_id.as_str(),
            attempt_no,
            claim_token,
            claimer_principal_id.as_str(),
            engine_id.as_str(),
            now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?,
        ],
    )?;
    Ok(())
}

fn new_claim_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(32);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("tok_{hex}")
}

fn new_attempt_id() -> RunAttemptId {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(32);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    RunAttemptId::new(format!("attempt_{hex}"))
}

#[cfg(test)]
mod tests {
    use opscore_core::Actor;
    use opscore_core::CorrelationId;
    use opscore_core::EngineId;
    use opscore_core::NewEvent;
    use opscore_core::PrincipalId;
    use opscore_core::RunId;
    use opscore_core::StreamRef;
    use opscore_core::Timestamp;
    use opscore_store::Database;
    use opscore_store::ProjectorRegistry;
    use opscore_store::append_to_stream;
    use opscore_store::ensure_event_schema;

    use super::claim_run;
    use super::heartbeat_run;
    use super::release_run;

    fn setup_queued_run(db: &Database, run_id: &str) {
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            ProjectorRegistry::ensure_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            let event = NewEvent::new(
                "run.created",
                1,
                "ws-1".into(),
                Actor::user("user-1"),
                StreamRef::room("room-1"),
                CorrelationId::new("corr-1"),
                serde_json::json!({"run_id": run_id, "room_id": "room-1", "thread_id": "thread-1", "title": "t", "goal": "g"}),
                Timestamp::now(),
            );
            let persisted = append_to_stream(tx, event).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            ProjectorRegistry::apply(tx, &persisted).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn claim_heartbeat_release_round_trip() {
        let db = Database::open_in_memory().unwrap();
        setup_queued_run(&db, "run-1");
        let run_id = RunId::new("run-1");
        let engine = EngineId::new("engine-1");
        let principal = PrincipalId::new("principal-1");
        let now = Timestamp::now();

        let claim = claim_run(&db, &run_id, &engine, &principal, 30, now).unwrap();
        assert_eq!(claim.attempt_no, 1);
        assert!(!claim.preempted_previous);

        let extended = heartbeat_run(&db, &run_id, &claim.claim_token, 30, now.plus_seconds(5)).unwrap();
        assert!(extended > claim.lease_expires_at);

        release_run(&db, &run_id, &claim.claim_token, "completed", now.plus_seconds(10)).unwrap();
        let reclaimed = claim_run(&db, &run_id, &engine, &principal, 30, now.plus_seconds(10)).unwrap();
        assert_eq!(reclaimed.attempt_no, 2);
    }

    #[test]
    fn expired_lease_is_preempted_on_reclaim() {
        let db = Database::open_in_memory().unwrap();
        setup_queued_run(&db, "run-1");
        let run_id = RunId::new("run-1");
        let engine_a = EngineId::new("engine-a");
        let engine_b = EngineId::new("engine-b");
        let principal = PrincipalId::new("principal-1");
        let now = Timestamp::now();

        claim_run(&db, &run_id, &engine_a, &principal, 5, now).unwrap();
        let later = now.plus_seconds(10);
        let reclaim = claim_run(&db, &run_id, &engine_b, &principal, 30, later).unwrap();
        assert!(reclaim.preempted_previous);
        assert_eq!(reclaim.attempt_no, 2);
    }
}
