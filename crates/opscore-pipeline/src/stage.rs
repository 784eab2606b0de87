// crates/opscore-pipeline/src/stage.rs
// ============================================================================
// Module: Stage Resolution
// Description: The 13-rule first-match resolver mapping a normalized
//              per-entity snapshot to one of six pipeline stages.
// Purpose: Implements the pipelineSnapshot stage rules named in spec §4.10.
// Dependencies: ret_logic::{TriState, TriLogic, KleeneLogic}, crate::snapshot
// ============================================================================

//! ## Overview
//! [`resolve`] walks the rules in order and returns on the first match, the
//! same ordered `if`/`return` shape as `opscore_policy::authorize`. Rule 8 is
//! the one place with a genuine conjunction over dimensions that can each be
//! independently absent (scorecard decision, evidence binding, scorecard
//! binding, incident state); that conjunction is expressed with
//! [`ret_logic::KleeneLogic`] rather than a chain of `&&`, for the same
//! reason `authorize::scope_covers` does: an unexercised dimension
//! contributes `Unknown` instead of a fabricated `True`.

use ret_logic::KleeneLogic;
use ret_logic::TriLogic;
use ret_logic::TriState;

use crate::snapshot::EntityKind;
use crate::snapshot::EntitySnapshot;
use crate::snapshot::EvidenceStatus;
use crate::snapshot::ExperimentStageStatus;
use crate::snapshot::NormalizedRunStatus;
use crate::snapshot::ScorecardDecision;
use crate::snapshot::Stage;

/// A diagnostic explaining why an entity landed in its resolved stage, when
/// the stage alone does not say (e.g. `1_inbox` can mean "new" or
/// "malformed").
pub type Diagnostic = Option<&'static str>;

/// Resolves the stage (and optional diagnostic) for one snapshot.
///
/// Returns `None` when the entity should be skipped from the pipeline view
/// entirely (rule 1: archived or deleted).
#[must_use]
pub fn resolve(snapshot: &EntitySnapshot) -> Option<(Stage, Diagnostic)> {
    // Rule 1: archived or deleted entities are excluded outright.
    if snapshot.is_archived || snapshot.is_deleted {
        return None;
    }

    // Rule 2: missing required fields routes to inbox with a diagnostic.
    if !snapshot.required_fields_present {
        return Some((Stage::Inbox, Some("missing_data")));
    }

    // Rules 3-10 only apply to runs: they read run/evidence/scorecard
    // fields that have no meaning on an experiment row.
    if snapshot.kind == EntityKind::Run {
        if let Some(result) = resolve_run_rules(snapshot) {
            return Some(result);
        }
    }

    // Rule 11: a pending approval against any entity kind.
    if snapshot.approval_requested {
        return Some((Stage::PendingApproval, None));
    }

    // Rule 12: an open experiment with nothing else going on yet.
    if snapshot.kind == EntityKind::Experiment && snapshot.experiment_status == Some(ExperimentStageStatus::Open) {
        return Some((Stage::Inbox, None));
    }

    // Rule 13: fallthrough.
    Some((Stage::Inbox, Some("unmatched_state")))
}

/// Rules 3 through 10, scoped to run entities.
fn resolve_run_rules(snapshot: &EntitySnapshot) -> Option<(Stage, Diagnostic)> {
    // Rule 3: an active incident demotes outright.
    if snapshot.incident_active {
        return Some((Stage::Demoted, None));
    }

    // Rule 4: a terminal-bad run status demotes.
    if snapshot.run_status.is_some_and(super::snapshot::NormalizedRunStatus::is_demoting) {
        return Some((Stage::Demoted, None));
    }

    // Rule 5: a failed scorecard demotes.
    if snapshot.scorecard_decision == Some(ScorecardDecision::Fail) {
        return Some((Stage::Demoted, None));
    }

    // Rule 6: rejected evidence sends the run back to execution.
    if snapshot.evidence_status == Some(super::snapshot::EvidenceStatus::Rejected) {
        return Some((Stage::ExecuteWorkspace, None));
    }

    let run_completed = snapshot.run_status == Some(super::snapshot::NormalizedRunStatus::Completed);
    let scorecard_missing_or_pending =
        matches!(snapshot.scorecard_decision, None | Some(ScorecardDecision::Pending));

    // Rule 7: a completed run with no decided scorecard awaits review.
    if run_completed && scorecard_missing_or_pending {
        return Some((Stage::ReviewEvidence, None));
    }

    // Rule 8: the one genuine conjunction. Each dimension can be
    // independently absent (no scorecard, no evidence binding yet); an
    // absent dimension must not force a false promotion decision on its
    // own, so this is evaluated with Kleene `and` rather than `&&`.
    let logic = KleeneLogic;
    let mut promotable = TriState::from(snapshot.scorecard_decision == Some(ScorecardDecision::Pass));
    promotable = logic.and(promotable, TriState::from(snapshot.evidence_matches_run));
    promotable = logic.and(promotable, TriState::from(snapshot.scorecard_bindings_match));
    promotable = logic.and(promotable, TriState::from(!snapshot.incident_active));
    if promotable.is_true() {
        return Some((Stage::Promoted, None));
    }
    if snapshot.scorecard_decision == Some(ScorecardDecision::Pass) || snapshot.evidence_matches_run {
        return Some((Stage::ReviewEvidence, Some("ghost_evidence_or_mismatch")));
    }

    // Rule 9: evidence still in flight.
    if matches!(
        snapshot.evidence_status,
        Some(super::snapshot::EvidenceStatus::Created | super::snapshot::EvidenceStatus::UnderReview)
    ) {
        return Some((Stage::ReviewEvidence, None));
    }

    // Rule 10: the run is still executing.
    if matches!(
        snapshot.run_status,
        Some(super::snapshot::NormalizedRunStatus::Created | super::snapshot::NormalizedRunStatus::Started)
    ) {
        return Some((Stage::ExecuteWorkspace, None));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::EvidenceStatus;
    use crate::snapshot::NormalizedRunStatus;

    fn base_run() -> EntitySnapshot {
        EntitySnapshot {
            kind: EntityKind::Run,
            entity_id: "run-1".to_string(),
            is_archived: false,
            is_deleted: false,
            required_fields_present: true,
            run_status: Some(NormalizedRunStatus::Created),
            evidence_status: None,
            evidence_matches_run: false,
            scorecard_decision: None,
            scorecard_bindings_match: false,
            incident_active: false,
            approval_requested: false,
            experiment_status: None,
        }
    }

    #[test]
    fn archived_entity_is_skipped() {
        let mut snap = base_run();
        snap.is_archived = true;
        assert_eq!(resolve(&snap), None);
    }

    #[test]
    fn missing_fields_routes_to_inbox_with_diagnostic() {
        let mut snap = base_run();
        snap.required_fields_present = false;
        assert_eq!(resolve(&snap), Some((Stage::Inbox, Some("missing_data"))));
    }

    #[test]
    fn active_incident_demotes_regardless_of_run_status() {
        let mut snap = base_run();
        snap.run_status = Some(NormalizedRunStatus::Completed);
        snap.incident_active = true;
        assert_eq!(resolve(&snap), Some((Stage::Demoted, None)));
    }

    #[test]
    fn timed_out_run_demotes() {
        let mut snap = base_run();
        snap.run_status = Some(NormalizedRunStatus::TimedOut);
        assert_eq!(resolve(&snap), Some((Stage::Demoted, None)));
    }

    #[test]
    fn completed_run_with_pending_scorecard_awaits_review() {
        let mut snap = base_run();
        snap.run_status = Some(NormalizedRunStatus::Completed);
        snap.scorecard_decision = Some(ScorecardDecision::Pending);
        assert_eq!(resolve(&snap), Some((Stage::ReviewEvidence, None)));
    }

    #[test]
    fn fully_matched_scorecard_and_evidence_promotes() {
        let mut snap = base_run();
        snap.run_status = Some(NormalizedRunStatus::Completed);
        snap.scorecard_decision = Some(ScorecardDecision::Pass);
        snap.evidence_matches_run = true;
        snap.scorecard_bindings_match = true;
        assert_eq!(resolve(&snap), Some((Stage::Promoted, None)));
    }

    #[test]
    fn scorecard_pass_without_matching_evidence_flags_mismatch() {
        let mut snap = base_run();
        snap.run_status = Some(NormalizedRunStatus::Completed);
        snap.scorecard_decision = Some(ScorecardDecision::Pass);
        snap.evidence_matches_run = false;
        assert_eq!(resolve(&snap), Some((Stage::ReviewEvidence, Some("ghost_evidence_or_mismatch"))));
    }

    #[test]
    fn scorecard_fail_demotes_even_with_matching_evidence() {
        let mut snap = base_run();
        snap.run_status = Some(NormalizedRunStatus::Completed);
        snap.scorecard_decision = Some(ScorecardDecision::Fail);
        snap.evidence_matches_run = true;
        snap.scorecard_bindings_match = true;
        assert_eq!(resolve(&snap), Some((Stage::Demoted, None)));
    }

    #[test]
    fn rejected_evidence_sends_back_to_execution() {
        let mut snap = base_run();
        snap.run_status = Some(NormalizedRunStatus::Completed);
        snap.evidence_status = Some(EvidenceStatus::Rejected);
        assert_eq!(resolve(&snap), Some((Stage::ExecuteWorkspace, None)));
    }

    #[test]
    fn evidence_under_review_awaits_review() {
        let mut snap = base_run();
        snap.run_status = Some(NormalizedRunStatus::Started);
        snap.evidence_status = Some(EvidenceStatus::UnderReview);
        assert_eq!(resolve(&snap), Some((Stage::ReviewEvidence, None)));
    }

    #[test]
    fn running_run_executes() {
        let snap = base_run();
        assert_eq!(resolve(&snap), Some((Stage::ExecuteWorkspace, None)));
    }

    #[test]
    fn pending_approval_takes_priority_over_inbox() {
        let mut snap = base_run();
        snap.run_status = None;
        snap.approval_requested = true;
        assert_eq!(resolve(&snap), Some((Stage::PendingApproval, None)));
    }

    #[test]
    fn open_experiment_with_nothing_else_is_inbox() {
        let snap = EntitySnapshot {
            kind: EntityKind::Experiment,
            entity_id: "exp-1".to_string(),
            is_archived: false,
            is_deleted: false,
            required_fields_present: true,
            run_status: None,
            evidence_status: None,
            evidence_matches_run: false,
            scorecard_decision: None,
            scorecard_bindings_match: false,
            incident_active: false,
            approval_requested: false,
            experiment_status: Some(ExperimentStageStatus::Open),
        };
        assert_eq!(resolve(&snap), Some((Stage::Inbox, None)));
    }

    #[test]
    fn closed_experiment_falls_through_unmatched() {
        let snap = EntitySnapshot {
            kind: EntityKind::Experiment,
            entity_id: "exp-1".to_string(),
            is_archived: false,
            is_deleted: false,
            required_fields_present: true,
            run_status: None,
            evidence_status: None,
            evidence_matches_run: false,
            scorecard_decision: None,
            scorecard_bindings_match: false,
            incident_active: false,
            approval_requested: false,
            experiment_status: Some(ExperimentStageStatus::Closed),
        };
        assert_eq!(resolve(&snap), Some((Stage::Inbox, Some("unmatched_state"))));
    }
}
