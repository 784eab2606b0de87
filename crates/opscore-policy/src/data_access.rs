// crates/opscore-policy/src/data_access.rs
// ============================================================================
// Module: Data-Access Purpose-Hint Check
// Description: The purpose-tag mismatch flow ahead of the standard
//              `authorize` decision for data-access requests.
// Purpose: Implements spec.md §4.5's additional data-access check: when the
//          resource's purpose tags and the caller's requested-purpose tags
//          are both non-empty and disjoint, emit an informational mismatch
//          event followed by a justified/unjustified event, before the
//          request falls through to the standard authorize() flow.
// Dependencies: opscore_core::{event, ids, time}, opscore_store
// ============================================================================

//! ## Overview
//! This check never changes the final [`crate::authorize::Decision`] by
//! itself — it only emits the two informational events spec.md §7 calls out
//! (`data.access.purpose_hint_mismatch`, `data.access.justified` /
//! `data.access.unjustified`) so downstream review can see that a caller's
//! stated purpose disagreed with the resource's tags. Callers run
//! [`evaluate_and_record`] before [`crate::authorize::authorize`] and use
//! its own decision unchanged.

use opscore_core::Actor;
use opscore_core::CorrelationId;
use opscore_core::EventScope;
use opscore_core::NewEvent;
use opscore_core::StreamRef;
use opscore_core::Timestamp;
use opscore_core::WorkspaceId;
use opscore_store::Database;
use opscore_store::EventStoreError;
use opscore_store::StoreError;
use opscore_store::append_to_stream;
use thiserror::Error;

/// Errors raised while recording the purpose-hint check.
#[derive(Debug, Error)]
pub enum DataAccessError {
    /// Underlying storage failure.
    #[error("data_access.store_error: {0}")]
    Store(#[from] StoreError),
    /// The informational event could not be appended.
    #[error("data_access.event_error: {0}")]
    Event(String),
}

impl From<rusqlite::Error> for DataAccessError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

impl From<EventStoreError> for DataAccessError {
    fn from(err: EventStoreError) -> Self {
        Self::Event(err.to_string())
    }
}

/// Outcome of the purpose-hint check: whether a mismatch was detected, and
/// if so whether the caller's justification was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurposeHintOutcome {
    /// Whether `resource_tags` and `request_tags` were both non-empty and
    /// disjoint.
    pub mismatch: bool,
    /// Whether a non-empty justification was supplied for a mismatch.
    /// Always `false` when there was no mismatch to justify.
    pub justified: bool,
}

/// Returns whether `resource` and `request` are both non-empty and share no
/// element, per spec.md §4.5's purpose-hint mismatch condition.
#[must_use]
pub fn tags_disjoint(resource: &[String], request: &[String]) -> bool {
    !resource.is_empty() && !request.is_empty() && !resource.iter().any(|tag| request.contains(tag))
}

/// Evaluates the purpose-hint mismatch condition and, if it fires, appends
/// `data.access.purpose_hint_mismatch` followed by
/// `data.access.justified`/`data.access.unjustified` in the same
/// transaction. A no-mismatch call is a pure check: no events are appended.
///
/// # Errors
///
/// Returns [`DataAccessError`] on storage or event-append failure.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_and_record(
    db: &Database,
    workspace_id: &WorkspaceId,
    room_id: &str,
    resource_tags: &[String],
    request_tags: &[String],
    justification: Option<&str>,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<PurposeHintOutcome, DataAccessError> {
    if !tags_disjoint(resource_tags, request_tags) {
        return Ok(PurposeHintOutcome { mismatch: false, justified: false });
    }
    let justified = justification.is_some_and(|text| !text.trim().is_empty());

    db.with_tx(|tx| {
        let mismatch_event = NewEvent::new(
            "data.access.purpose_hint_mismatch",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::room(room_id),
            correlation_id.clone(),
            serde_json::json!({
                "resource_purpose_tags": resource_tags,
                "request_purpose_tags": request_tags,
            }),
            now,
        )
        .with_scope(EventScope { room_id: Some(room_id.to_owned()), ..EventScope::default() });
        append_to_stream(tx, mismatch_event)?;

        let event_type = if justified { "data.access.justified" } else { "data.access.unjustified" };
        let decision_event = NewEvent::new(
            event_type,
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::room(room_id),
            correlation_id.clone(),
            serde_json::json!({ "justification": justification }),
            now,
        )
        .with_scope(EventScope { room_id: Some(room_id.to_owned()), ..EventScope::default() });
        append_to_stream(tx, decision_event)?;

        Ok(PurposeHintOutcome { mismatch: true, justified })
    })
}

#[cfg(test)]
mod tests {
    use opscore_core::Actor;
    use opscore_core::CorrelationId;
    use opscore_core::Timestamp;

    use super::evaluate_and_record;
    use super::tags_disjoint;

    fn test_db() -> opscore_store::Database {
        let db = opscore_store::Database::open_in_memory().expect("open db");
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))
        })
        .expect("schema");
        db
    }

    #[test]
    fn disjoint_non_empty_tags_mismatch() {
        assert!(tags_disjoint(&["billing".into()], &["support".into()]));
        assert!(!tags_disjoint(&["billing".into()], &["billing".into()]));
        assert!(!tags_disjoint(&[], &["support".into()]));
        assert!(!tags_disjoint(&["billing".into()], &[]));
    }

    #[test]
    fn mismatch_without_justification_is_unjustified() {
        let db = test_db();
        let outcome = evaluate_and_record(
            &db,
            &"ws-1".into(),
            "room-1",
            &["billing".into()],
            &["support".into()],
            None,
            &CorrelationId::new("corr-1"),
            &Actor::user("user-1"),
            Timestamp::now(),
        )
        .expect("evaluate");
        assert!(outcome.mismatch);
        assert!(!outcome.justified);
    }

    #[test]
    fn mismatch_with_justification_is_justified() {
        let db = test_db();
        let outcome = evaluate_and_record(
            &db,
            &"ws-1".into(),
            "room-1",
            &["billing".into()],
            &["support".into()],
            Some("customer requested refund review"),
            &CorrelationId::new("corr-1"),
            &Actor::user("user-1"),
            Timestamp::now(),
        )
        .expect("evaluate");
        assert!(outcome.mismatch);
        assert!(outcome.justified);
    }

    #[test]
    fn no_mismatch_appends_nothing() {
        let db = test_db();
        let outcome = evaluate_and_record(
            &db,
            &"ws-1".into(),
            "room-1",
            &["billing".into()],
            &["billing".into()],
            None,
            &CorrelationId::new("corr-1"),
            &Actor::user("user-1"),
            Timestamp::now(),
        )
        .expect("evaluate");
        assert!(!outcome.mismatch);
        assert!(!outcome.justified);
    }
}
