// crates/opscore-trust/src/autonomy.rs
// ============================================================================
// Module: Autonomy Recommendation Lifecycle
// Description: Recommend/approve/reject flow over trust-driven scope-delta
//              recommendations (C7).
// Purpose: Implements spec.md §4.6's autonomy-recommendation approval
//          (distinct from the general approval engine), including capability
//          token issuance on approval and idempotent re-approval.
// Dependencies: rusqlite, opscore_core::{capability, trust, event, ids, time},
//              opscore_store
// ============================================================================

//! ## Overview
//! A recommendation starts `pending` with a proposed [`CapabilityScope`]
//! delta and a before/after trust snapshot. [`approve`] consumes it: issues
//! a capability token scoped to `scope_delta`, appends
//! `agent.capability.granted` then `autonomy.upgrade.approved`, and persists
//! the issued token id on the recommendation row. Approving an
//! already-approved recommendation is a replay — it returns the existing
//! token id with `already_approved: true` rather than issuing a second
//! token. Approving a rejected recommendation fails outright
//! (`recommendation_not_pending`): unlike the general approval engine,
//! rejection here is also terminal in the opposite direction.

use opscore_core::Actor;
use opscore_core::AgentId;
use opscore_core::AutonomyRecommendation;
use opscore_core::AutonomyRecommendationId;
use opscore_core::CapabilityScope;
use opscore_core::CapabilityTokenId;
use opscore_core::CorrelationId;
use opscore_core::NewEvent;
use opscore_core::PrincipalId;
use opscore_core::RecommendationStatus;
use opscore_core::StreamRef;
use opscore_core::Timestamp;
use opscore_core::WorkspaceId;
use opscore_store::Database;
use opscore_store::EventStoreError;
use opscore_store::StoreError;
use opscore_store::append_to_stream;
use rand::RngCore;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use thiserror::Error;

/// Errors raised while recommending, approving, or rejecting an autonomy
/// upgrade.
#[derive(Debug, Error)]
pub enum AutonomyError {
    /// No recommendation exists with the given id.
    #[error("autonomy.not_found")]
    NotFound,
    /// The recommendation is not pending: it was already approved or
    /// rejected, and the requested transition does not apply to a replay.
    #[error("autonomy.recommendation_not_pending")]
    RecommendationNotPending,
    /// Underlying storage failure.
    #[error("autonomy.store_error: {0}")]
    Store(#[from] StoreError),
    /// The lifecycle event could not be appended.
    #[error("autonomy.event_error: {0}")]
    Event(String),
}

impl From<rusqlite::Error> for AutonomyError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

impl From<EventStoreError> for AutonomyError {
    fn from(err: EventStoreError) -> Self {
        Self::Event(err.to_string())
    }
}

/// Result of approving an autonomy recommendation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    /// The capability token covering `scope_delta`, issued on first approval
    /// and reused on replay.
    pub token_id: CapabilityTokenId,
    /// `true` when this call observed an already-approved recommendation
    /// rather than performing the transition itself.
    pub already_approved: bool,
}

/// Creates a pending recommendation and appends `autonomy.upgrade.recommended`.
///
/// # Errors
///
/// Returns [`AutonomyError`] on storage or event-append failure.
#[allow(clippy::too_many_arguments)]
pub fn recommend(
    db: &Database,
    workspace_id: &WorkspaceId,
    recommendation_id: &AutonomyRecommendationId,
    agent_id: &AgentId,
    scope_delta: CapabilityScope,
    trust_before: f64,
    trust_after: f64,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<AutonomyRecommendation, AutonomyError> {
    db.with_tx(|tx| {
        let scope_json = serde_json::to_value(&scope_delta)
            .map_err(|e| StoreError::Io(format!("scope_delta not serializable: {e}")))?;
        let event = NewEvent::new(
            "autonomy.upgrade.recommended",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::workspace(workspace_id),
            correlation_id.clone(),
            serde_json::json!({
                "recommendation_id": recommendation_id.as_str(),
                "agent_id": agent_id.as_str(),
                "scope_delta": scope_json,
                "trust_before": trust_before,
                "trust_after": trust_after,
            }),
            now,
        );
        append_to_stream(tx, event)?;

        let now_str = now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?;
        tx.execute(
            "INSERT INTO autonomy_recommendations (
                recommendation_id, workspace_id, agent_id, scope_delta, trust_before,
                trust_after, status, issued_token_id, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,'pending',NULL,?7,?7)",
            params![
                recommendation_id.as_str(),
                workspace_id.as_str(),
                agent_id.as_str(),
                serde_json::to_string(&scope_json).map_err(|e| StoreError::Io(e.to_string()))?,
                trust_before,
                trust_after,
                now_str,
            ],
        )?;

        load(tx, recommendation_id)?.ok_or(AutonomyError::NotFound)
    })
}

/// Approves `recommendation_id`: on first approval, issues a capability
/// token scoped to the recommendation's `scope_delta` and appends
/// `agent.capability.granted` then `autonomy.upgrade.approved`. Re-approving
/// an already-approved recommendation returns the existing token id with
/// `already_approved: true` and appends no new events.
///
/// # Errors
///
/// Returns [`AutonomyError::NotFound`] if the recommendation does not exist,
/// [`AutonomyError::RecommendationNotPending`] if it was rejected, or
/// [`AutonomyError`] on storage/event failure.
#[allow(clippy::too_many_arguments)]
pub fn approve(
    db: &Database,
    workspace_id: &WorkspaceId,
    recommendation_id: &AutonomyRecommendationId,
    principal_id: &PrincipalId,
    issued_by: &PrincipalId,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<ApprovalOutcome, AutonomyError> {
    db.with_tx(|tx| {
        let row = load(tx, recommendation_id)?.ok_or(AutonomyError::NotFound)?;

        if row.status == RecommendationStatus::Approved {
            let token_id = row.issued_token_id.ok_or(AutonomyError::NotFound)?;
            return Ok(ApprovalOutcome { token_id, already_approved: true });
        }
        if row.status == RecommendationStatus::Rejected {
            return Err(AutonomyError::RecommendationNotPending);
        }

        let token_id = new_token_id();
        let issued_at = now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?;
        let scope_json = serde_json::to_value(&row.scope_delta)
            .map_err(|e| StoreError::Io(format!("scope_delta not serializable: {e}")))?;

        tx.execute(
            "INSERT INTO capability_tokens (
                token_id, workspace_id, principal_id, issued_by_principal_id, scope,
                valid_until, revoked_at, parent_token_id, issued_at
            ) VALUES (?1,?2,?3,?4,?5,NULL,NULL,NULL,?6)",
            params![
                token_id.as_str(),
                workspace_id.as_str(),
                principal_id.as_str(),
                issued_by.as_str(),
                serde_json::to_string(&scope_json).map_err(|e| StoreError::Io(e.to_string()))?,
                issued_at,
            ],
        )?;

        let granted = NewEvent::new(
            "agent.capability.granted",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::workspace(workspace_id),
            correlation_id.clone(),
            serde_json::json!({
                "token_id": token_id.as_str(),
                "principal_id": principal_id.as_str(),
                "issued_by_principal_id": issued_by.as_str(),
                "scope": scope_json,
            }),
            now,
        );
        let granted = append_to_stream(tx, granted)?;

        let approved = NewEvent::new(
            "autonomy.upgrade.approved",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::workspace(workspace_id),
            correlation_id.clone(),
            serde_json::json!({
                "recommendation_id": recommendation_id.as_str(),
                "agent_id": row.agent_id.as_str(),
                "token_id": token_id.as_str(),
            }),
            now,
        )
        .with_causation_id(Some(opscore_core::CausationId::new(granted.event_id.as_str())));
        append_to_stream(tx, approved)?;

        tx.execute(
            "UPDATE autonomy_recommendations SET status = 'approved', issued_token_id = ?2, updated_at = ?3
             WHERE recommendation_id = ?1",
            params![recommendation_id.as_str(), token_id.as_str(), issued_at],
        )?;

        Ok(ApprovalOutcome { token_id, already_approved: false })
    })
}

/// Rejects `recommendation_id` and appends `autonomy.upgrade.rejected`.
/// Rejecting an already-rejected recommendation is a silent no-op; rejecting
/// an already-approved one fails with [`AutonomyError::RecommendationNotPending`]
/// since an issued token cannot be un-issued by this call.
///
/// # Errors
///
/// Returns [`AutonomyError::NotFound`] if the recommendation does not exist,
/// [`AutonomyError::RecommendationNotPending`] if it was already approved, or
/// [`AutonomyError`] on storage/event failure.
pub fn reject(
    db: &Database,
    workspace_id: &WorkspaceId,
    recommendation_id: &AutonomyRecommendationId,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<AutonomyRecommendation, AutonomyError> {
    db.with_tx(|tx| {
        let row = load(tx, recommendation_id)?.ok_or(AutonomyError::NotFound)?;

        if row.status == RecommendationStatus::Rejected {
            return Ok(row);
        }
        if row.status == RecommendationStatus::Approved {
            return Err(AutonomyError::RecommendationNotPending);
        }

        let event = NewEvent::new(
            "autonomy.upgrade.rejected",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::workspace(workspace_id),
            correlation_id.clone(),
            serde_json::json!({
                "recommendation_id": recommendation_id.as_str(),
                "agent_id": row.agent_id.as_str(),
            }),
            now,
        );
        append_to_stream(tx, event)?;

        let updated_at = now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?;
        tx.execute(
            "UPDATE autonomy_recommendations SET status = 'rejected', updated_at = ?2 WHERE recommendation_id = ?1",
            params![recommendation_id.as_str(), updated_at],
        )?;

        load(tx, recommendation_id)?.ok_or(AutonomyError::NotFound)
    })
}

fn new_token_id() -> CapabilityTokenId {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(32);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    CapabilityTokenId::new(format!("tok_{hex}"))
}

fn load(
    tx: &Transaction<'_>,
    recommendation_id: &AutonomyRecommendationId,
) -> Result<Option<AutonomyRecommendation>, AutonomyError> {
    tx.query_row(
        "SELECT recommendation_id, workspace_id, agent_id, scope_delta, trust_before, trust_after,
                status, issued_token_id, created_at, updated_at
         FROM autonomy_recommendations WHERE recommendation_id = ?1",
        params![recommendation_id.as_str()],
        |row| {
            let scope_delta: String = row.get(3)?;
            let created_at: String = row.get(8)?;
            let updated_at: String = row.get(9)?;
            let status: String = row.get(6)?;
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?, scope_delta,
                row.get::<_, f64>(4)?, row.get::<_, f64>(5)?, status, row.get::<_, Option<String>>(7)?,
                created_at, updated_at))
        },
    )
    .optional()?
    .map(|(recommendation_id, workspace_id, agent_id, scope_delta, trust_before, trust_after, status,
           issued_token_id, created_at, updated_at)| {
        let scope_delta: CapabilityScope = serde_json::from_str(&scope_delta).unwrap_or_default();
        Ok(AutonomyRecommendation {
            recommendation_id: AutonomyRecommendationId::new(recommendation_id),
            workspace_id: WorkspaceId::new(workspace_id),
            agent_id: AgentId::new(agent_id),
            scope_delta,
            trust_before,
            trust_after,
            status: status_from_str(&status),
            issued_token_id: issued_token_id.map(CapabilityTokenId::new),
            created_at: Timestamp::parse_rfc3339(&created_at).map_err(|e| StoreError::Io(e.to_string()))?,
            updated_at: Timestamp::parse_rfc3339(&updated_at).map_err(|e| StoreError::Io(e.to_string()))?,
        })
    })
    .transpose()
    .map_err(AutonomyError::Store)
}

fn status_from_str(value: &str) -> RecommendationStatus {
    match value {
        "approved" => RecommendationStatus::Approved,
        "rejected" => RecommendationStatus::Rejected,
        _ => RecommendationStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use opscore_core::Actor;
    use opscore_core::AgentId;
    use opscore_core::AutonomyRecommendationId;
    use opscore_core::CapabilityScope;
    use opscore_core::CorrelationId;
    use opscore_core::PrincipalId;
    use opscore_core::RecommendationStatus;
    use opscore_core::Timestamp;
    use opscore_core::WorkspaceId;

    use super::approve;
    use super::reject;
    use super::recommend;
    use super::AutonomyError;

    fn test_db() -> opscore_store::Database {
        let db = opscore_store::Database::open_in_memory().expect("open db");
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            crate::schema::ensure_schema(tx)
        })
        .expect("schema");
        db
    }

    fn scope_delta() -> CapabilityScope {
        CapabilityScope {
            tools: vec!["web_search".into()],
            action_types: vec!["artifact.create".into()],
            ..CapabilityScope::default()
        }
    }

    #[test]
    fn approve_issues_token_and_replay_returns_same_id() {
        let db = test_db();
        let ws = WorkspaceId::new("ws-1");
        let agent = AgentId::new("agent-1");
        let rec_id = AutonomyRecommendationId::new("rec-1");
        let corr = CorrelationId::new("corr-1");
        let now = Timestamp::now();

        recommend(&db, &ws, &rec_id, &agent, scope_delta(), 0.81, 0.81, &corr, &Actor::user("u1"), now)
            .expect("recommend");

        let principal = PrincipalId::new("principal-agent-1");
        let issuer = PrincipalId::new("principal-admin-1");
        let first =
            approve(&db, &ws, &rec_id, &principal, &issuer, &corr, &Actor::user("admin-1"), now).expect("approve");
        assert!(!first.already_approved);

        let second =
            approve(&db, &ws, &rec_id, &principal, &issuer, &corr, &Actor::user("admin-1"), now).expect("re-approve");
        assert!(second.already_approved);
        assert_eq!(first.token_id, second.token_id);

        let count: i64 = db
            .with_conn::<_, opscore_store::StoreError>(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM capability_tokens", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn approving_rejected_recommendation_fails() {
        let db = test_db();
        let ws = WorkspaceId::new("ws-1");
        let agent = AgentId::new("agent-1");
        let rec_id = AutonomyRecommendationId::new("rec-2");
        let corr = CorrelationId::new("corr-1");
        let now = Timestamp::now();

        recommend(&db, &ws, &rec_id, &agent, scope_delta(), 0.5, 0.5, &corr, &Actor::user("u1"), now)
            .expect("recommend");
        let rejected = reject(&db, &ws, &rec_id, &corr, &Actor::user("admin-1"), now).expect("reject");
        assert_eq!(rejected.status, RecommendationStatus::Rejected);

        let principal = PrincipalId::new("principal-agent-1");
        let issuer = PrincipalId::new("principal-admin-1");
        let result = approve(&db, &ws, &rec_id, &principal, &issuer, &corr, &Actor::user("admin-1"), now);
        assert!(matches!(result, Err(AutonomyError::RecommendationNotPending)));
    }
}
