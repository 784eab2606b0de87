// crates/opscore-policy/src/approvals.rs
// ============================================================================
// Module: Approval Lifecycle
// Description: request/decide state machine over pending approvals (C6).
// Purpose: Appends `approval.requested`/`approval.decided`, projects them
//          via opscore_store::ProjectorRegistry, and reads the resulting
//          row back.
// Dependencies: rusqlite, opscore_core::{event, ids, time}, opscore_store
// ============================================================================

//! ## Overview
//! Request and decide are thin wrappers around the event store: they build
//! the envelope, append it, run it through the registered projector inside
//! the same transaction, then read the row back so callers see the
//! materialized state rather than the event they just wrote. Re-deciding a
//! terminal approval is accepted and idempotent — the projector (not this
//! module) enforces the terminal-state-is-a-sink invariant, so `decide`
//! always reports the approval's *current* projected status rather than
//! erroring when a caller repeats a decision.

use opscore_core::Actor;
use opscore_core::CorrelationId;
use opscore_core::EventScope;
use opscore_core::NewEvent;
use opscore_core::StreamRef;
use opscore_core::Timestamp;
use opscore_core::WorkspaceId;
use opscore_store::Database;
use opscore_store::EventStoreError;
use opscore_store::ProjectorError;
use opscore_store::ProjectorRegistry;
use opscore_store::StoreError;
use opscore_store::append_to_stream;
use rand::RngCore;
use rusqlite::OptionalExtension;
use rusqlite::params;
use thiserror::Error;

/// Errors raised while requesting or deciding an approval.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// No approval exists with the given id.
    #[error("approval.not_found")]
    NotFound,
    /// The decision string was not one `decide` recognizes.
    #[error("approval.invalid_decision: {0}")]
    InvalidDecision(String),
    /// Underlying storage failure.
    #[error("approval.store_error: {0}")]
    Store(#[from] StoreError),
    /// The request/decide event could not be appended or projected.
    #[error("approval.event_error: {0}")]
    Event(String),
}

impl From<rusqlite::Error> for ApprovalError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

impl From<EventStoreError> for ApprovalError {
    fn from(err: EventStoreError) -> Self {
        Self::Event(err.to_string())
    }
}

impl From<ProjectorError> for ApprovalError {
    fn from(err: ProjectorError) -> Self {
        Self::Event(err.to_string())
    }
}

/// Scope an approval grants once decided, per spec §4 Glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalScope {
    /// Covers a single invocation.
    Once,
    /// Covers every invocation for the remainder of the bound run.
    Run,
    /// Covers every invocation within the bound room.
    Room,
    /// Covers every invocation within the workspace.
    Workspace,
    /// Covers every future invocation matching a saved template.
    Template,
}

impl ApprovalScope {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Run => "run",
            Self::Room => "room",
            Self::Workspace => "workspace",
            Self::Template => "template",
        }
    }
}

/// The materialized state of a pending or decided approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRow {
    /// Approval identifier.
    pub approval_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Action type this approval gates.
    pub action_code: String,
    /// Scope string (`once` | `run` | `room` | `workspace` | `template`).
    pub scope: String,
    /// Current status (`pending` | `held` | `approved` | `denied`).
    pub status: String,
    /// Actor id that made the terminal decision, if any.
    pub decided_by: Option<String>,
}

/// Appends `approval.requested` and returns the materialized row.
///
/// # Errors
///
/// Returns [`ApprovalError`] on storage or projection failure.
#[allow(clippy::too_many_arguments)]
pub fn request(
    db: &Database,
    workspace_id: &WorkspaceId,
    room_id: &str,
    approval_id: &str,
    action_code: &str,
    scope: ApprovalScope,
    scope_snapshot: serde_json::Value,
    expires_at: Option<Timestamp>,
    correlation_id: &CorrelationId,
    requested_by: &Actor,
    now: Timestamp,
) -> Result<ApprovalRow, ApprovalError> {
    db.with_tx(|tx| {
        let event = NewEvent::new(
            "approval.requested",
            1,
            workspace_id.clone(),
            requested_by.clone(),
            StreamRef::room(room_id),
            correlation_id.clone(),
            serde_json::json!({
                "approval_id": approval_id,
                "action_code": action_code,
                "scope": scope.as_str(),
                "scope_snapshot": scope_snapshot,
                "expires_at": expires_at.map(|ts| ts.to_rfc3339()).transpose().map_err(|e| StoreError::Io(e.to_string()))?,
            }),
            now,
        )
        .with_scope(EventScope { room_id: Some(room_id.to_owned()), ..EventScope::default() });

        let persisted = append_to_stream(tx, event)?;
        ProjectorRegistry::apply(tx, &persisted)?;
        load(tx, approval_id)?.ok_or(ApprovalError::NotFound)
    })
}

/// Decision an approver applies to a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Approve the action.
    Approve,
    /// Deny the action.
    Deny,
    /// Hold the action pending further information.
    Hold,
}

impl Decision {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Deny => "deny",
            Self::Hold => "hold",
        }
    }
}

/// Origin of a decision, carried in the event payload as source metadata.
#[derive(Debug, Clone)]
pub enum DecisionSource {
    /// A human operator decided directly through the API.
    Api,
    /// A Discord emoji reaction was resolved to a decision.
    DiscordReaction {
        /// The Discord message id the reaction was attached to.
        reply_message_id: String,
        /// The emoji that was reacted with.
        emoji: String,
    },
}

/// Appends `approval.decided` and returns the resulting materialized row.
///
/// Deciding an already-terminal approval is accepted: the event is appended
/// and counted in the log, but the projection's `status` does not change
/// (spec §3, §8 terminal-state-is-a-sink). Callers should inspect the
/// returned row's `status` rather than assume it equals `decision`.
///
/// # Errors
///
/// Returns [`ApprovalError::NotFound`] if `approval_id` does not exist yet
/// (the approval must have been requested first), or [`ApprovalError`] on
/// storage/projection failure.
pub fn decide(
    db: &Database,
    workspace_id: &WorkspaceId,
    room_id: &str,
    approval_id: &str,
    decision: Decision,
    source: &DecisionSource,
    correlation_id: &CorrelationId,
    decided_by: &Actor,
    now: Timestamp,
) -> Result<ApprovalRow, ApprovalError> {
    db.with_tx(|tx| {
        if load(tx, approval_id)?.is_none() {
            return Err(ApprovalError::NotFound);
        }

        let mut data = serde_json::json!({
            "approval_id": approval_id,
            "decision": decision.as_str(),
            "decided_by": decided_by.id,
        });
        if let DecisionSource::DiscordReaction { reply_message_id, emoji } = source {
            data["source"] = serde_json::json!({
                "channel": "discord_reaction",
                "reply_message_id": reply_message_id,
                "emoji": emoji,
            });
        }

        let event = NewEvent::new(
            "approval.decided",
            1,
            workspace_id.clone(),
            decided_by.clone(),
            StreamRef::room(room_id),
            correlation_id.clone(),
            data,
            now,
        )
        .with_scope(EventScope { room_id: Some(room_id.to_owned()), ..EventScope::default() });

        let persisted = append_to_stream(tx, event)?;
        ProjectorRegistry::apply(tx, &persisted)?;
        load(tx, approval_id)?.ok_or(ApprovalError::NotFound)
    })
}

/// Resolves a Discord emoji reaction on a reply message into a [`Decision`],
/// per the external-collaborator contract in spec §4.6: the engine itself
/// never parses Discord gateway payloads, it only maps an already-extracted
/// emoji glyph to a decision. Unrecognized glyphs resolve to `None` so the
/// caller can ignore unrelated reactions rather than erroring.
#[must_use]
pub fn decision_from_emoji(emoji: &str) -> Option<Decision> {
    match emoji {
        "✅" | "👍" => Some(Decision::Approve),
        "❌" | "👎" => Some(Decision::Deny),
        "⏸️" | "✋" => Some(Decision::Hold),
        _ => None,
    }
}

fn load(tx: &rusqlite::Transaction<'_>, approval_id: &str) -> Result<Option<ApprovalRow>, ApprovalError> {
    tx.query_row(
        "SELECT approval_id, workspace_id, action_code, scope, status, decided_by
         FROM approvals WHERE approval_id = ?1",
        params![approval_id],
        |row| {
            Ok(ApprovalRow {
                approval_id: row.get(0)?,
                workspace_id: row.get(1)?,
                action_code: row.get(2)?,
                scope: row.get(3)?,
                status: row.get(4)?,
                decided_by: row.get(5)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use opscore_core::CorrelationId;

    use super::ApprovalScope;
    use super::Decision;
    use super::DecisionSource;
    use super::decide;
    use super::decision_from_emoji;
    use super::request;

    fn test_db() -> opscore_store::Database {
        let db = opscore_store::Database::open_in_memory().expect("open db");
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            opscore_store::ProjectorRegistry::ensure_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            Ok(())
        })
        .expect("schema");
        db
    }

    #[test]
    fn request_then_decide_round_trip() {
        let db = test_db();
        let ws = "ws-1".into();
        let corr = CorrelationId::new("corr-1");
        let now = opscore_core::Timestamp::now();

        let row = request(
            &db,
            &ws,
            "room-1",
            "appr-1",
            "external.write",
            ApprovalScope::Once,
            serde_json::json!({"domain": "example.com"}),
            None,
            &corr,
            &opscore_core::Actor::user("user-1"),
            now,
        )
        .expect("request");
        assert_eq!(row.status, "pending");

        let decided = decide(
            &db,
            &ws,
            "room-1",
            "appr-1",
            Decision::Approve,
            &DecisionSource::Api,
            &corr,
            &opscore_core::Actor::user("approver-1"),
            now,
        )
        .expect("decide");
        assert_eq!(decided.status, "approved");
        assert_eq!(decided.decided_by.as_deref(), Some("approver-1"));
    }

    #[test]
    fn terminal_redecision_is_idempotent() {
        let db = test_db();
        let ws = "ws-1".into();
        let corr = CorrelationId::new("corr-1");
        let now = opscore_core::Timestamp::now();
        request(
            &db,
            &ws,
            "room-1",
            "appr-2",
            "external.write",
            ApprovalScope::Once,
            serde_json::json!({}),
            None,
            &corr,
            &opscore_core::Actor::user("user-1"),
            now,
        )
        .expect("request");
        decide(&db, &ws, "room-1", "appr-2", Decision::Approve, &DecisionSource::Api, &corr, &opscore_core::Actor::user("a1"), now)
            .expect("first decide");
        let second = decide(&db, &ws, "room-1", "appr-2", Decision::Deny, &DecisionSource::Api, &corr, &opscore_core::Actor::user("a2"), now)
            .expect("second decide");
        assert_eq!(second.status, "approved");
    }

    #[test]
    fn emoji_resolution_ignores_unrelated_glyphs() {
        assert_eq!(decision_from_emoji("✅"), Some(Decision::Approve));
        assert_eq!(decision_from_emoji("❌"), Some(Decision::Deny));
        assert_eq!(decision_from_emoji("🎉"), None);
    }
}
