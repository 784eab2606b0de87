// crates/opscore-pipeline/src/store.rs
// ============================================================================
// Module: Pipeline Event Application
// Description: Raw-event dispatch that keeps `pipeline_entities` current.
// Purpose: Feed `stage::resolve` a fresh snapshot on every relevant event and
//          persist the recomputed stage alongside it.
// Dependencies: rusqlite, opscore_core::event, crate::{schema, snapshot, stage}
// ============================================================================

use opscore_core::PersistedEvent;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;

use crate::PipelineError;
use crate::optional_str;
use crate::require_str;
use crate::snapshot::EntityKind;
use crate::snapshot::EntitySnapshot;
use crate::snapshot::EvidenceStatus;
use crate::snapshot::ExperimentStageStatus;
use crate::snapshot::NormalizedRunStatus;
use crate::snapshot::ScorecardDecision;
use crate::stage;

/// Applies `event` to the pipeline snapshot, if it is one of the event
/// types this projector understands. A no-op for every other event type,
/// matching `opscore_store::EventKind::Other`'s behavior in the registry
/// this supplements.
///
/// # Errors
///
/// Returns [`PipelineError`] when a recognized event's payload is malformed
/// or the underlying write fails.
pub fn apply(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), PipelineError> {
    match event.event_type() {
        "experiment.created" => apply_experiment_created(tx, event),
        "experiment.closed" => apply_experiment_closed(tx, event),
        "run.created" => apply_run_status(tx, event, NormalizedRunStatus::Created),
        "run.started" => apply_run_status(tx, event, NormalizedRunStatus::Started),
        "run.completed" => apply_run_status(tx, event, NormalizedRunStatus::Completed),
        "run.failed" => apply_run_status(tx, event, NormalizedRunStatus::Failed),
        "run.timed_out" => apply_run_status(tx, event, NormalizedRunStatus::TimedOut),
        "run.cancelled" => apply_run_status(tx, event, NormalizedRunStatus::Cancelled),
        "evidence.created" => apply_evidence(tx, event, Some(EvidenceStatus::Created), false),
        "evidence.under_review" => apply_evidence(tx, event, Some(EvidenceStatus::UnderReview), false),
        "evidence.rejected" => apply_evidence(tx, event, Some(EvidenceStatus::Rejected), false),
        "evidence.accepted" => apply_evidence(tx, event, None, true),
        "scorecard.recorded" => apply_scorecard(tx, event),
        "incident.opened" => apply_incident_opened(tx, event),
        "incident.closed" => apply_incident_closed(tx, event),
        "approval.requested" => apply_approval_requested(tx, event),
        "approval.decided" => apply_approval_decided(tx, event),
        _ => Ok(()),
    }
}

/// In-memory mirror of one `pipeline_entities` row, including the columns
/// [`EntitySnapshot`] does not carry (stage, diagnostic, bookkeeping).
struct Row {
    snapshot: EntitySnapshot,
    last_event_id: Option<String>,
}

fn render_time(event: &PersistedEvent) -> Result<String, PipelineError> {
    event.envelope.occurred_at.to_rfc3339().map_err(|err| PipelineError::InvalidPayload(err.to_string()))
}

fn load_row(
    tx: &Transaction<'_>,
    workspace_id: &str,
    kind: EntityKind,
    entity_id: &str,
) -> Result<Option<Row>, PipelineError> {
    tx.query_row(
        "SELECT is_archived, is_deleted, required_fields_present, run_status, evidence_status,
                evidence_matches_run, scorecard_decision, scorecard_bindings_match, incident_active,
                approval_requested, experiment_status, last_event_id
         FROM pipeline_entities WHERE workspace_id = ?1 AND entity_type = ?2 AND entity_id = ?3",
        params![workspace_id, kind.as_str(), entity_id],
        |r| {
            Ok(Row {
                snapshot: EntitySnapshot {
                    kind,
                    entity_id: entity_id.to_owned(),
                    is_archived: r.get::<_, i64>(0)? != 0,
                    is_deleted: r.get::<_, i64>(1)? != 0,
                    required_fields_present: r.get::<_, i64>(2)? != 0,
                    run_status: r.get::<_, Option<String>>(3)?.and_then(|s| NormalizedRunStatus::from_str(&s)),
                    evidence_status: r.get::<_, Option<String>>(4)?.and_then(|s| EvidenceStatus::from_str(&s)),
                    evidence_matches_run: r.get::<_, i64>(5)? != 0,
                    scorecard_decision: r.get::<_, Option<String>>(6)?.and_then(|s| ScorecardDecision::from_str(&s)),
                    scorecard_bindings_match: r.get::<_, i64>(7)? != 0,
                    incident_active: r.get::<_, i64>(8)? != 0,
                    approval_requested: r.get::<_, i64>(9)? != 0,
                    experiment_status: r
                        .get::<_, Option<String>>(10)?
                        .and_then(|s| ExperimentStageStatus::from_str(&s)),
                },
                last_event_id: r.get(11)?,
            })
        },
    )
    .optional()
    .map_err(PipelineError::from)
}

/// Ensures a baseline row exists for `(kind, entity_id)`, defaulting every
/// field to "nothing known yet".
fn ensure_row(
    tx: &Transaction<'_>,
    workspace_id: &str,
    kind: EntityKind,
    entity_id: &str,
    occurred_at: &str,
) -> Result<(), PipelineError> {
    tx.execute(
        "INSERT OR IGNORE INTO pipeline_entities (
            workspace_id, entity_type, entity_id, is_archived, is_deleted, required_fields_present,
            run_status, evidence_status, evidence_matches_run, scorecard_decision,
            scorecard_bindings_match, incident_active, approval_requested, experiment_status,
            stage, diagnostic, last_event_id, updated_at
        ) VALUES (?1,?2,?3,0,0,1,NULL,NULL,0,NULL,0,0,0,NULL,'1_inbox','unmatched_state','',?4)",
        params![workspace_id, kind.as_str(), entity_id, occurred_at],
    )?;
    Ok(())
}

/// Recomputes and persists the stage for a row already mutated in memory.
fn save_row(
    tx: &Transaction<'_>,
    workspace_id: &str,
    row: &Row,
    event: &PersistedEvent,
    occurred_at: &str,
) -> Result<(), PipelineError> {
    let (stage, diagnostic) = stage::resolve(&row.snapshot)
        .map_or((None, None), |(stage, diagnostic)| (Some(stage), diagnostic));
    tx.execute(
        "UPDATE pipeline_entities SET
            is_archived = ?1, is_deleted = ?2, required_fields_present = ?3, run_status = ?4,
            evidence_status = ?5, evidence_matches_run = ?6, scorecard_decision = ?7,
            scorecard_bindings_match = ?8, incident_active = ?9, approval_requested = ?10,
            experiment_status = ?11, stage = ?12, diagnostic = ?13, last_event_id = ?14, updated_at = ?15
         WHERE workspace_id = ?16 AND entity_type = ?17 AND entity_id = ?18",
        params![
            i64::from(row.snapshot.is_archived),
            i64::from(row.snapshot.is_deleted),
            i64::from(row.snapshot.required_fields_present),
            row.snapshot.run_status.map(NormalizedRunStatus::as_str),
            row.snapshot.evidence_status.map(EvidenceStatus::as_str),
            i64::from(row.snapshot.evidence_matches_run),
            row.snapshot.scorecard_decision.map(ScorecardDecision::as_str),
            i64::from(row.snapshot.scorecard_bindings_match),
            i64::from(row.snapshot.incident_active),
            i64::from(row.snapshot.approval_requested),
            row.snapshot.experiment_status.map(ExperimentStageStatus::as_str),
            stage.map_or("1_inbox", stage::Stage::as_str),
            diagnostic,
            event.event_id.as_str(),
            occurred_at,
            workspace_id,
            row.snapshot.kind.as_str(),
            row.snapshot.entity_id,
        ],
    )?;
    Ok(())
}

fn apply_experiment_created(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), PipelineError> {
    let data = &event.envelope.data;
    let experiment_id = require_str(data, "experiment_id")?;
    let occurred_at = render_time(event)?;
    let workspace_id = event.workspace_id().as_str().to_owned();
    ensure_row(tx, &workspace_id, EntityKind::Experiment, experiment_id, &occurred_at)?;
    let Some(mut row) = load_row(tx, &workspace_id, EntityKind::Experiment, experiment_id)? else {
        return Ok(());
    };
    if row.last_event_id.as_deref() == Some(event.event_id.as_str()) {
        return Ok(());
    }
    row.snapshot.experiment_status = Some(ExperimentStageStatus::Open);
    save_row(tx, &workspace_id, &row, event, &occurred_at)
}

fn apply_experiment_closed(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), PipelineError> {
    let experiment_id = require_str(&event.envelope.data, "experiment_id")?;
    let occurred_at = render_time(event)?;
    let workspace_id = event.workspace_id().as_str().to_owned();
    let Some(mut row) = load_row(tx, &workspace_id, EntityKind::Experiment, experiment_id)? else {
        return Ok(());
    };
    if row.last_event_id.as_deref() == Some(event.event_id.as_str()) {
        return Ok(());
    }
    row.snapshot.experiment_status = Some(ExperimentStageStatus::Closed);
    save_row(tx, &workspace_id, &row, event, &occurred_at)
}

fn apply_run_status(
    tx: &Transaction<'_>,
    event: &PersistedEvent,
    status: NormalizedRunStatus,
) -> Result<(), PipelineError> {
    let run_id = require_str(&event.envelope.data, "run_id")?;
    let occurred_at = render_time(event)?;
    let workspace_id = event.workspace_id().as_str().to_owned();
    ensure_row(tx, &workspace_id, EntityKind::Run, run_id, &occurred_at)?;
    let Some(mut row) = load_row(tx, &workspace_id, EntityKind::Run, run_id)? else {
        return Ok(());
    };
    if row.last_event_id.as_deref() == Some(event.event_id.as_str()) {
        return Ok(());
    }
    row.snapshot.run_status = Some(status);
    save_row(tx, &workspace_id, &row, event, &occurred_at)
}

fn apply_evidence(
    tx: &Transaction<'_>,
    event: &PersistedEvent,
    status: Option<EvidenceStatus>,
    matches_run: bool,
) -> Result<(), PipelineError> {
    let data = &event.envelope.data;
    let run_id = require_str(data, "run_id")?;
    let occurred_at = render_time(event)?;
    let workspace_id = event.workspace_id().as_str().to_owned();
    ensure_row(tx, &workspace_id, EntityKind::Run, run_id, &occurred_at)?;
    let Some(mut row) = load_row(tx, &workspace_id, EntityKind::Run, run_id)? else {
        return Ok(());
    };
    if row.last_event_id.as_deref() == Some(event.event_id.as_str()) {
        return Ok(());
    }
    row.snapshot.evidence_status = status;
    if matches_run {
        row.snapshot.evidence_matches_run = true;
    }
    save_row(tx, &workspace_id, &row, event, &occurred_at)
}

fn apply_scorecard(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), PipelineError> {
    let data = &event.envelope.data;
    let run_id = require_str(data, "run_id")?;
    let decision_raw = require_str(data, "decision")?;
    let decision = ScorecardDecision::from_str(decision_raw)
        .ok_or_else(|| PipelineError::InvalidPayload(format!("unknown scorecard decision: {decision_raw}")))?;
    let evidence_id = optional_str(data, "evidence_id");
    let occurred_at = render_time(event)?;
    let workspace_id = event.workspace_id().as_str().to_owned();
    ensure_row(tx, &workspace_id, EntityKind::Run, run_id, &occurred_at)?;
    let Some(mut row) = load_row(tx, &workspace_id, EntityKind::Run, run_id)? else {
        return Ok(());
    };
    if row.last_event_id.as_deref() == Some(event.event_id.as_str()) {
        return Ok(());
    }
    row.snapshot.scorecard_decision = Some(decision);
    // Bindings match when the scorecard names this run and, if evidence has
    // already been accepted for it, the same evidence id.
    row.snapshot.scorecard_bindings_match = evidence_id.is_some() || row.snapshot.evidence_matches_run;
    save_row(tx, &workspace_id, &row, event, &occurred_at)
}

fn apply_incident_opened(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), PipelineError> {
    let data = &event.envelope.data;
    let incident_id = require_str(data, "incident_id")?;
    let Some(run_id) = optional_str(data, "run_id") else {
        return Ok(());
    };
    let occurred_at = render_time(event)?;
    let workspace_id = event.workspace_id().as_str().to_owned();
    tx.execute(
        "INSERT OR REPLACE INTO pipeline_incident_links (incident_id, workspace_id, run_id) VALUES (?1,?2,?3)",
        params![incident_id, workspace_id, run_id],
    )?;
    ensure_row(tx, &workspace_id, EntityKind::Run, run_id, &occurred_at)?;
    let Some(mut row) = load_row(tx, &workspace_id, EntityKind::Run, run_id)? else {
        return Ok(());
    };
    row.snapshot.incident_active = true;
    save_row(tx, &workspace_id, &row, event, &occurred_at)
}

fn apply_incident_closed(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), PipelineError> {
    let incident_id = require_str(&event.envelope.data, "incident_id")?;
    let workspace_id = event.workspace_id().as_str().to_owned();
    let run_id: Option<String> = tx
        .query_row(
            "SELECT run_id FROM pipeline_incident_links WHERE incident_id = ?1 AND workspace_id = ?2",
            params![incident_id, workspace_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(run_id) = run_id else {
        return Ok(());
    };
    let occurred_at = render_time(event)?;
    let Some(mut row) = load_row(tx, &workspace_id, EntityKind::Run, &run_id)? else {
        return Ok(());
    };
    row.snapshot.incident_active = false;
    save_row(tx, &workspace_id, &row, event, &occurred_at)
}

fn apply_approval_requested(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), PipelineError> {
    let data = &event.envelope.data;
    let approval_id = require_str(data, "approval_id")?;
    let Some(run_id) = data
        .get("scope_snapshot")
        .and_then(|snapshot| snapshot.get("run_id"))
        .and_then(serde_json::Value::as_str)
    else {
        return Ok(());
    };
    let occurred_at = render_time(event)?;
    let workspace_id = event.workspace_id().as_str().to_owned();
    tx.execute(
        "INSERT OR REPLACE INTO pipeline_approval_links (approval_id, workspace_id, run_id) VALUES (?1,?2,?3)",
        params![approval_id, workspace_id, run_id],
    )?;
    ensure_row(tx, &workspace_id, EntityKind::Run, run_id, &occurred_at)?;
    let Some(mut row) = load_row(tx, &workspace_id, EntityKind::Run, run_id)? else {
        return Ok(());
    };
    row.snapshot.approval_requested = true;
    save_row(tx, &workspace_id, &row, event, &occurred_at)
}

fn apply_approval_decided(tx: &Transaction<'_>, event: &PersistedEvent) -> Result<(), PipelineError> {
    let approval_id = require_str(&event.envelope.data, "approval_id")?;
    let workspace_id = event.workspace_id().as_str().to_owned();
    let run_id: Option<String> = tx
        .query_row(
            "SELECT run_id FROM pipeline_approval_links WHERE approval_id = ?1 AND workspace_id = ?2",
            params![approval_id, workspace_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(run_id) = run_id else {
        return Ok(());
    };
    let occurred_at = render_time(event)?;
    let Some(mut row) = load_row(tx, &workspace_id, EntityKind::Run, &run_id)? else {
        return Ok(());
    };
    row.snapshot.approval_requested = false;
    save_row(tx, &workspace_id, &row, event, &occurred_at)
}

#[cfg(test)]
mod tests {
    use opscore_core::Actor;
    use opscore_core::CorrelationId;
    use opscore_core::NewEvent;
    use opscore_core::StreamRef;
    use opscore_core::Timestamp;
    use rusqlite::Connection;
    use serde_json::json;

    use super::*;
    use crate::schema::ensure_schema;

    fn persisted(id: &str, event_type: &str, data: serde_json::Value) -> PersistedEvent {
        let new = NewEvent::new(
            event_type,
            1,
            "ws-1".into(),
            Actor::user("user-1"),
            StreamRef::room("room-1"),
            CorrelationId::new("corr-1"),
            data,
            Timestamp::now(),
        );
        PersistedEvent::new(id.into(), 1, new)
    }

    fn stage_of(tx: &Transaction<'_>, entity_type: &str, entity_id: &str) -> String {
        tx.query_row(
            "SELECT stage FROM pipeline_entities WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type, entity_id],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn experiment_created_lands_in_inbox() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        let created = persisted("evt-1", "experiment.created", json!({"experiment_id": "exp-1"}));
        apply(&tx, &created).unwrap();
        assert_eq!(stage_of(&tx, "experiment", "exp-1"), "1_inbox");
    }

    #[test]
    fn run_completed_with_matching_scorecard_promotes() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        apply(&tx, &persisted("evt-1", "run.created", json!({"run_id": "run-1"}))).unwrap();
        apply(&tx, &persisted("evt-2", "run.completed", json!({"run_id": "run-1"}))).unwrap();
        apply(&tx, &persisted("evt-3", "evidence.accepted", json!({"run_id": "run-1", "evidence_id": "ev-1"})))
            .unwrap();
        apply(
            &tx,
            &persisted(
                "evt-4",
                "scorecard.recorded",
                json!({"run_id": "run-1", "decision": "pass", "evidence_id": "ev-1"}),
            ),
        )
        .unwrap();
        assert_eq!(stage_of(&tx, "run", "run-1"), "5_promoted");
    }

    #[test]
    fn failing_scorecard_demotes_after_promotion() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        apply(&tx, &persisted("evt-1", "run.created", json!({"run_id": "run-1"}))).unwrap();
        apply(&tx, &persisted("evt-2", "run.completed", json!({"run_id": "run-1"}))).unwrap();
        apply(&tx, &persisted("evt-3", "evidence.accepted", json!({"run_id": "run-1", "evidence_id": "ev-1"})))
            .unwrap();
        apply(
            &tx,
            &persisted(
                "evt-4",
                "scorecard.recorded",
                json!({"run_id": "run-1", "decision": "fail", "evidence_id": "ev-1"}),
            ),
        )
        .unwrap();
        assert_eq!(stage_of(&tx, "run", "run-1"), "6_demoted");
    }

    #[test]
    fn incident_demotes_and_clears_on_close() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        ensure_schema(&tx).unwrap();
        apply(&tx, &persisted("evt-1", "run.created", json!({"run_id": "run-1"}))).unwrap();
        apply(
            &tx,
            &persisted("evt-2", "incident.opened", json!({"incident_id": "inc-1", "run_id": "run-1"})),
        )
        .unwrap();
        assert_eq!(stage_of(&tx, "run", "run-1"), "6_demoted");
        apply(&tx, &persisted("evt-3", "incident.closed", json!({"incident_id": "inc-1"}))).unwrap();
        assert_eq!(stage_of(&tx, "run", "run-1"), "3_execute_workspace");
    }
}
