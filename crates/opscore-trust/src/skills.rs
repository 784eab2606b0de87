// crates/opscore-trust/src/skills.rs
// ============================================================================
// Module: Skills Ledger
// Description: Skill-package import/verify lifecycle, per-agent usage and
//              assessment tracking, and primary-skill selection (C7/C8).
// Purpose: Implements spec.md §4.7 verbatim: the hash/manifest/signature
//          import decision tree, the forward-only status-rank merge,
//          review-pending re-verification, the certify-imported composite,
//          and the two-phase primary-skill transition.
// Dependencies: rusqlite, opscore_core::{skills, event, ids, time}, opscore_store
// ============================================================================

//! ## Overview
//! [`import`] runs the hash/manifest/signature decision tree once on
//! submission. [`verify`] (spec's "review-pending") re-runs an equivalent
//! decision against the *stored* fields and merges the result forward via
//! [`opscore_core::SkillStatus::merge`], so a package can never regress from
//! `Verified`/`Quarantined` back to `Pending`. [`certify_imported`] composes
//! `verify` and [`assess_imported`] as one in-process transaction rather
//! than the teacher's HTTP self-call pattern, per spec.md §9's design note:
//! two idempotent sub-commands sharing one transaction and one correlation
//! id. [`select_primary`] performs the clear-then-set two-phase transition
//! required by the partial unique index on `(workspace_id, agent_id)` WHERE
//! `is_primary = 1`.

use opscore_core::Actor;
use opscore_core::AgentId;
use opscore_core::AgentSkill;
use opscore_core::AgentSkillId;
use opscore_core::AssessmentStatus;
use opscore_core::CorrelationId;
use opscore_core::NewEvent;
use opscore_core::SkillAssessmentId;
use opscore_core::SkillLevel;
use opscore_core::SkillPackage;
use opscore_core::SkillPackageId;
use opscore_core::SkillStatus;
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
use serde_json::Value;
use thiserror::Error;

/// Errors raised while importing, verifying, assessing, or selecting a
/// primary skill.
#[derive(Debug, Error)]
pub enum SkillsError {
    /// No skill package exists with the given id.
    #[error("skills.package_not_found")]
    PackageNotFound,
    /// No agent-skill row exists for the given agent and package.
    #[error("skills.agent_skill_not_found")]
    AgentSkillNotFound,
    /// The agent has no skills recorded, so no primary can be selected.
    #[error("skills.no_skills_to_select")]
    NoSkillsToSelect,
    /// Underlying storage failure.
    #[error("skills.store_error: {0}")]
    Store(#[from] StoreError),
    /// A lifecycle event could not be appended.
    #[error("skills.event_error: {0}")]
    Event(String),
}

impl From<rusqlite::Error> for SkillsError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

impl From<EventStoreError> for SkillsError {
    fn from(err: EventStoreError) -> Self {
        Self::Event(err.to_string())
    }
}

fn status_str(status: SkillStatus) -> &'static str {
    match status {
        SkillStatus::Pending => "pending",
        SkillStatus::Verified => "verified",
        SkillStatus::Quarantined => "quarantined",
    }
}

fn status_from_str(value: &str) -> SkillStatus {
    match value {
        "verified" => SkillStatus::Verified,
        "quarantined" => SkillStatus::Quarantined,
        _ => SkillStatus::Pending,
    }
}

fn level_str(level: SkillLevel) -> &'static str {
    match level {
        SkillLevel::Novice => "novice",
        SkillLevel::Intermediate => "intermediate",
        SkillLevel::Proficient => "proficient",
        SkillLevel::Expert => "expert",
    }
}

fn level_from_str(value: &str) -> SkillLevel {
    match value {
        "intermediate" => SkillLevel::Intermediate,
        "proficient" => SkillLevel::Proficient,
        "expert" => SkillLevel::Expert,
        _ => SkillLevel::Novice,
    }
}

fn assessment_status_str(status: AssessmentStatus) -> &'static str {
    match status {
        AssessmentStatus::Started => "started",
        AssessmentStatus::Passed => "passed",
        AssessmentStatus::Failed => "failed",
    }
}

/// Canonical sha256 hash shape: 64 lowercase hex characters.
fn is_canonical_sha256(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

const REQUIRED_MANIFEST_FIELDS: [&str; 4] =
    ["required_tools", "egress_domains", "sandbox_required", "data_access"];

fn manifest_has_required_fields(manifest: &Value) -> bool {
    let Some(obj) = manifest.as_object() else {
        return false;
    };
    REQUIRED_MANIFEST_FIELDS.iter().all(|field| obj.contains_key(*field))
}

/// Outcome of running the import/verify decision tree once.
struct Decision {
    status: SkillStatus,
    reason: Option<&'static str>,
}

/// Runs spec.md §4.7's import decision tree against a submitted
/// `{hash, manifest, signature}` triple.
fn decide_import(hash: &str, manifest: &Value, signature: Option<&str>) -> Decision {
    if !is_canonical_sha256(hash) {
        return Decision { status: SkillStatus::Quarantined, reason: Some("invalid_hash_sha256") };
    }
    if !manifest_has_required_fields(manifest) {
        return Decision { status: SkillStatus::Quarantined, reason: Some("invalid_manifest") };
    }
    if signature.is_some() {
        return Decision { status: SkillStatus::Verified, reason: None };
    }
    Decision { status: SkillStatus::Pending, reason: None }
}

/// Runs the review-pending decision against already-stored fields: unlike
/// initial import, a missing signature is itself a quarantine reason rather
/// than a reason to remain `Pending` (spec.md §4.7: review-pending always
/// yields `Verified` or `Quarantined`).
fn decide_review(hash: &str, manifest: &Value, signature: Option<&str>) -> Decision {
    if !is_canonical_sha256(hash) {
        return Decision { status: SkillStatus::Quarantined, reason: Some("verify_stored_hash_invalid") };
    }
    if !manifest_has_required_fields(manifest) {
        return Decision { status: SkillStatus::Quarantined, reason: Some("verify_stored_manifest_invalid") };
    }
    if signature.is_some() {
        return Decision { status: SkillStatus::Verified, reason: None };
    }
    Decision { status: SkillStatus::Quarantined, reason: Some("verify_signature_required") }
}

/// Submits a new skill package and runs the import decision tree against
/// it, appending `skill.package.installed` and, when the decision lands on
/// `Verified` or `Quarantined` immediately, the paired
/// `skill.package.verified`/`skill.package.quarantined` event.
///
/// # Errors
///
/// Returns [`SkillsError`] on storage or event-append failure.
#[allow(clippy::too_many_arguments)]
pub fn import(
    db: &Database,
    workspace_id: &WorkspaceId,
    skill_package_id: &SkillPackageId,
    name: &str,
    version: &str,
    hash: &str,
    manifest: Value,
    signature: Option<&str>,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<SkillPackage, SkillsError> {
    db.with_tx(|tx| {
        let decision = decide_import(hash, &manifest, signature);
        let now_str = now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?;
        let manifest_json = serde_json::to_string(&manifest).map_err(|e| StoreError::Io(e.to_string()))?;

        tx.execute(
            "INSERT INTO skill_packages (
                skill_package_id, workspace_id, name, version, hash, signature, manifest,
                status, status_reason, created_at, updated_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?10)",
            params![
                skill_package_id.as_str(),
                workspace_id.as_str(),
                name,
                version,
                hash,
                signature,
                manifest_json,
                status_str(decision.status),
                decision.reason,
                now_str,
            ],
        )?;

        let installed = NewEvent::new(
            "skill.package.installed",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::workspace(workspace_id),
            correlation_id.clone(),
            serde_json::json!({
                "skill_package_id": skill_package_id.as_str(),
                "name": name,
                "version": version,
                "hash": hash,
                "status": status_str(decision.status),
            }),
            now,
        );
        let installed = append_to_stream(tx, installed)?;

        if decision.status != SkillStatus::Pending {
            append_status_event(tx, workspace_id, skill_package_id, decision.status, decision.reason, correlation_id, actor, Some(&installed.event_id), now)?;
        }

        load_package(tx, skill_package_id)?.ok_or(SkillsError::PackageNotFound)
    })
}

/// Re-runs the import decision against `skill_package_id`'s stored fields
/// (spec's "review-pending") and merges the result forward: the package's
/// status can only move toward `Quarantined`, never back toward `Pending`.
///
/// # Errors
///
/// Returns [`SkillsError::PackageNotFound`] if the package does not exist,
/// or [`SkillsError`] on storage/event failure.
pub fn verify(
    db: &Database,
    workspace_id: &WorkspaceId,
    skill_package_id: &SkillPackageId,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<SkillPackage, SkillsError> {
    db.with_tx(|tx| {
        let row = load_package(tx, skill_package_id)?.ok_or(SkillsError::PackageNotFound)?;
        let decision = decide_review(&row.hash, &row.manifest, row.signature.as_deref());
        let merged = row.status.merge(decision.status);

        if merged != row.status {
            let reason = if merged == decision.status { decision.reason } else { None };
            append_status_event(tx, workspace_id, skill_package_id, merged, reason, correlation_id, actor, None, now)?;
        }

        load_package(tx, skill_package_id)?.ok_or(SkillsError::PackageNotFound)
    })
}

/// Composite of `verify` followed by `assess_imported`: certifies
/// `skill_package_id` for `agent_id` in one transaction, sharing
/// `correlation_id`, rather than the teacher's HTTP self-call pattern
/// (spec.md §9).
///
/// # Errors
///
/// Returns [`SkillsError`] on storage or event failure.
pub fn certify_imported(
    db: &Database,
    workspace_id: &WorkspaceId,
    skill_package_id: &SkillPackageId,
    agent_id: &AgentId,
    only_unassessed: bool,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<(SkillPackage, Option<AgentSkill>), SkillsError> {
    let package = verify(db, workspace_id, skill_package_id, correlation_id, actor, now)?;
    if package.status != SkillStatus::Verified {
        return Ok((package, None));
    }
    let agent_skill = assess_imported(db, workspace_id, skill_package_id, agent_id, only_unassessed, correlation_id, actor, now)?;
    Ok((package, Some(agent_skill)))
}

/// Ensures an `agent_skills` row exists for `(agent_id, skill_package_id)`
/// and, when `only_unassessed` is false or the row has no assessments yet,
/// synthesizes a passed assessment so `assessment_total >= 1` — the
/// precondition for primary-skill eligibility (spec.md §4.7).
///
/// # Errors
///
/// Returns [`SkillsError`] on storage or event failure.
pub fn assess_imported(
    db: &Database,
    workspace_id: &WorkspaceId,
    skill_package_id: &SkillPackageId,
    agent_id: &AgentId,
    only_unassessed: bool,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<AgentSkill, SkillsError> {
    db.with_tx(|tx| {
        let now_str = now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?;
        let agent_skill_id = ensure_agent_skill_row(tx, workspace_id, agent_id, skill_package_id, &now_str)?;
        let mut row = load_agent_skill(tx, &agent_skill_id)?.ok_or(SkillsError::AgentSkillNotFound)?;

        if only_unassessed && row.assessment_total > 0 {
            return Ok(row);
        }

        let assessment_id = new_assessment_id();
        tx.execute(
            "INSERT INTO skill_assessments (assessment_id, agent_skill_id, status, score, synthetic, started_at, resolved_at)
             VALUES (?1,?2,'passed',1.0,1,?3,?3)",
            params![assessment_id.as_str(), agent_skill_id.as_str(), now_str],
        )?;

        row.assessment_total += 1;
        row.assessment_passed += 1;
        row.recompute_reliability();
        let assessment_total = i64::try_from(row.assessment_total).unwrap_or(i64::MAX);
        let assessment_passed = i64::try_from(row.assessment_passed).unwrap_or(i64::MAX);
        tx.execute(
            "UPDATE agent_skills SET assessment_total = ?2, assessment_passed = ?3, reliability_score = ?4, updated_at = ?5
             WHERE agent_skill_id = ?1",
            params![agent_skill_id.as_str(), assessment_total, assessment_passed, row.reliability_score, now_str],
        )?;

        let event = NewEvent::new(
            "agent.skill.assessment.synthesized",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::workspace(workspace_id),
            correlation_id.clone(),
            serde_json::json!({
                "agent_id": agent_id.as_str(),
                "skill_package_id": skill_package_id.as_str(),
                "assessment_id": assessment_id.as_str(),
                "status": assessment_status_str(AssessmentStatus::Passed),
            }),
            now,
        );
        append_to_stream(tx, event)?;

        load_agent_skill(tx, &agent_skill_id)?.ok_or(SkillsError::AgentSkillNotFound)
    })
}

/// Selects the agent's primary skill by `(usage_total desc, reliability_score
/// desc, level desc, updated_at desc)` and performs the two-phase
/// clear-then-set transition required by the partial unique index on
/// `(workspace_id, agent_id) WHERE is_primary = 1`. Appends
/// `agent.skill.primary_set`.
///
/// # Errors
///
/// Returns [`SkillsError::NoSkillsToSelect`] if the agent has no
/// `agent_skills` rows, or [`SkillsError`] on storage/event failure.
pub fn select_primary(
    db: &Database,
    workspace_id: &WorkspaceId,
    agent_id: &AgentId,
    correlation_id: &CorrelationId,
    actor: &Actor,
    now: Timestamp,
) -> Result<AgentSkill, SkillsError> {
    db.with_tx(|tx| {
        let mut stmt = tx.prepare(
            "SELECT agent_skill_id, usage_total, reliability_score, level, updated_at
             FROM agent_skills WHERE workspace_id = ?1 AND agent_id = ?2",
        )?;
        let rows = stmt.query_map(params![workspace_id.as_str(), agent_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut best: Option<(String, i64, f64, SkillLevel, String)> = None;
        for row in rows {
            let (id, usage_total, reliability, level, updated_at) = row?;
            let level = level_from_str(&level);
            let candidate = (id, usage_total, reliability, level, updated_at);
            best = Some(match best {
                None => candidate,
                Some(current) => if is_better_candidate(&candidate, &current) { candidate } else { current },
            });
        }
        drop(stmt);
        let (winner_id, ..) = best.ok_or(SkillsError::NoSkillsToSelect)?;

        tx.execute(
            "UPDATE agent_skills SET is_primary = 0 WHERE workspace_id = ?1 AND agent_id = ?2",
            params![workspace_id.as_str(), agent_id.as_str()],
        )?;
        tx.execute(
            "UPDATE agent_skills SET is_primary = 1 WHERE agent_skill_id = ?1",
            params![winner_id],
        )?;

        let event = NewEvent::new(
            "agent.skill.primary_set",
            1,
            workspace_id.clone(),
            actor.clone(),
            StreamRef::workspace(workspace_id),
            correlation_id.clone(),
            serde_json::json!({
                "agent_id": agent_id.as_str(),
                "agent_skill_id": winner_id,
            }),
            now,
        );
        append_to_stream(tx, event)?;

        load_agent_skill(tx, &AgentSkillId::new(winner_id))?.ok_or(SkillsError::AgentSkillNotFound)
    })
}

/// Orders primary-skill candidates by `(usage_total desc, reliability_score
/// desc, level desc, updated_at desc)`; returns whether `candidate` outranks
/// `current`.
fn is_better_candidate(
    candidate: &(String, i64, f64, SkillLevel, String),
    current: &(String, i64, f64, SkillLevel, String),
) -> bool {
    let (_, c_usage, c_reliability, c_level, c_updated) = candidate;
    let (_, u_usage, u_reliability, u_level, u_updated) = current;
    c_usage
        .cmp(u_usage)
        .then_with(|| c_reliability.partial_cmp(u_reliability).unwrap_or(std::cmp::Ordering::Equal))
        .then_with(|| c_level.cmp(u_level))
        .then_with(|| c_updated.cmp(u_updated))
        .is_gt()
}

fn ensure_agent_skill_row(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    agent_id: &AgentId,
    skill_package_id: &SkillPackageId,
    now_str: &str,
) -> Result<AgentSkillId, SkillsError> {
    let existing: Option<String> = tx
        .query_row(
            "SELECT agent_skill_id FROM agent_skills WHERE workspace_id = ?1 AND agent_id = ?2 AND skill_package_id = ?3",
            params![workspace_id.as_str(), agent_id.as_str(), skill_package_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(AgentSkillId::new(id));
    }
    let id = new_agent_skill_id();
    tx.execute(
        "INSERT INTO agent_skills (
            agent_skill_id, workspace_id, agent_id, skill_package_id, level, updated_at
        ) VALUES (?1,?2,?3,?4,?5,?6)",
        params![id.as_str(), workspace_id.as_str(), agent_id.as_str(), skill_package_id.as_str(), level_str(SkillLevel::Novice), now_str],
    )?;
    Ok(id)
}

#[allow(clippy::too_many_arguments)]
fn append_status_event(
    tx: &Transaction<'_>,
    workspace_id: &WorkspaceId,
    skill_package_id: &SkillPackageId,
    status: SkillStatus,
    reason: Option<&'static str>,
    correlation_id: &CorrelationId,
    actor: &Actor,
    causation_event_id: Option<&opscore_core::EventId>,
    now: Timestamp,
) -> Result<(), SkillsError> {
    let event_type = match status {
        SkillStatus::Verified => "skill.package.verified",
        SkillStatus::Quarantined => "skill.package.quarantined",
        SkillStatus::Pending => {
            update_status(tx, skill_package_id, status, reason, now)?;
            return Ok(());
        }
    };
    let event = NewEvent::new(
        event_type,
        1,
        workspace_id.clone(),
        actor.clone(),
        StreamRef::workspace(workspace_id),
        correlation_id.clone(),
        serde_json::json!({
            "skill_package_id": skill_package_id.as_str(),
            "reason": reason,
        }),
        now,
    )
    .with_causation_id(causation_event_id.map(|id| opscore_core::CausationId::new(id.as_str())));
    append_to_stream(tx, event)?;
    update_status(tx, skill_package_id, status, reason, now)?;
    Ok(())
}

fn update_status(
    tx: &Transaction<'_>,
    skill_package_id: &SkillPackageId,
    status: SkillStatus,
    reason: Option<&'static str>,
    now: Timestamp,
) -> Result<(), SkillsError> {
    let now_str = now.to_rfc3339().map_err(|e| StoreError::Io(e.to_string()))?;
    tx.execute(
        "UPDATE skill_packages SET status = ?2, status_reason = ?3, updated_at = ?4 WHERE skill_package_id = ?1",
        params![skill_package_id.as_str(), status_str(status), reason, now_str],
    )?;
    Ok(())
}

fn new_agent_skill_id() -> AgentSkillId {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(32);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    AgentSkillId::new(format!("askill_{hex}"))
}

fn new_assessment_id() -> SkillAssessmentId {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(32);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    SkillAssessmentId::new(format!("assess_{hex}"))
}

fn load_package(tx: &Transaction<'_>, skill_package_id: &SkillPackageId) -> Result<Option<SkillPackage>, SkillsError> {
    tx.query_row(
        "SELECT skill_package_id, workspace_id, name, version, hash, signature, manifest,
                status, status_reason, created_at, updated_at
         FROM skill_packages WHERE skill_package_id = ?1",
        params![skill_package_id.as_str()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
            ))
        },
    )
    .optional()?
    .map(|(skill_package_id, workspace_id, name, version, hash, signature, manifest, status, status_reason, created_at, updated_at)| {
        Ok(SkillPackage {
            skill_package_id: SkillPackageId::new(skill_package_id),
            workspace_id: WorkspaceId::new(workspace_id),
            name,
            version,
            hash,
            signature,
            manifest: serde_json::from_str(&manifest).unwrap_or(Value::Null),
            status: status_from_str(&status),
            status_reason,
            created_at: Timestamp::parse_rfc3339(&created_at).map_err(|e| StoreError::Io(e.to_string()))?,
            updated_at: Timestamp::parse_rfc3339(&updated_at).map_err(|e| StoreError::Io(e.to_string()))?,
        })
    })
    .transpose()
    .map_err(SkillsError::Store)
}

fn load_agent_skill(tx: &Transaction<'_>, agent_skill_id: &AgentSkillId) -> Result<Option<AgentSkill>, SkillsError> {
    tx.query_row(
        "SELECT agent_skill_id, workspace_id, agent_id, skill_package_id, level, usage_total, usage_7d,
                usage_30d, assessment_total, assessment_passed, assessment_failed, reliability_score,
                impact_score, is_primary, updated_at
         FROM agent_skills WHERE agent_skill_id = ?1",
        params![agent_skill_id.as_str()],
        |row| {
            Ok(AgentSkill {
                agent_skill_id: AgentSkillId::new(row.get::<_, String>(0)?),
                workspace_id: WorkspaceId::new(row.get::<_, String>(1)?),
                agent_id: AgentId::new(row.get::<_, String>(2)?),
                skill_package_id: SkillPackageId::new(row.get::<_, String>(3)?),
                level: level_from_str(&row.get::<_, String>(4)?),
                usage_total: u64::try_from(row.get::<_, i64>(5)?).unwrap_or_default(),
                usage_7d: u64::try_from(row.get::<_, i64>(6)?).unwrap_or_default(),
                usage_30d: u64::try_from(row.get::<_, i64>(7)?).unwrap_or_default(),
                assessment_total: u64::try_from(row.get::<_, i64>(8)?).unwrap_or_default(),
                assessment_passed: u64::try_from(row.get::<_, i64>(9)?).unwrap_or_default(),
                assessment_failed: u64::try_from(row.get::<_, i64>(10)?).unwrap_or_default(),
                reliability_score: row.get(11)?,
                impact_score: row.get(12)?,
                is_primary: row.get::<_, i64>(13)? != 0,
                updated_at: {
                    let raw: String = row.get(14)?;
                    Timestamp::parse_rfc3339(&raw).unwrap_or_else(|_| Timestamp::now())
                },
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use opscore_core::Actor;
    use opscore_core::AgentId;
    use opscore_core::CorrelationId;
    use opscore_core::SkillPackageId;
    use opscore_core::SkillStatus;
    use opscore_core::Timestamp;
    use opscore_core::WorkspaceId;

    use super::certify_imported;
    use super::import;
    use super::select_primary;
    use super::verify;

    fn test_db() -> opscore_store::Database {
        let db = opscore_store::Database::open_in_memory().expect("open db");
        db.with_tx::<_, opscore_store::StoreError>(|tx| {
            opscore_store::ensure_event_schema(tx).map_err(|e| opscore_store::StoreError::Io(e.to_string()))?;
            crate::schema::ensure_schema(tx)
        })
        .expect("schema");
        db
    }

    fn manifest() -> serde_json::Value {
        serde_json::json!({
            "required_tools": ["web_search"],
            "egress_domains": ["example.com"],
            "sandbox_required": true,
            "data_access": "read",
        })
    }

    fn valid_hash() -> String {
        "a".repeat(64)
    }

    #[test]
    fn signed_import_is_verified_unsigned_is_pending() {
        let db = test_db();
        let ws = WorkspaceId::new("ws-1");
        let corr = CorrelationId::new("corr-1");
        let now = Timestamp::now();

        let verified = import(
            &db, &ws, &SkillPackageId::new("pkg-x"), "pkg-x", "1.0.0", &valid_hash(), manifest(),
            Some("sig-bytes"), &corr, &Actor::user("u1"), now,
        )
        .expect("import x");
        assert_eq!(verified.status, SkillStatus::Verified);

        let pending = import(
            &db, &ws, &SkillPackageId::new("pkg-y"), "pkg-y", "1.0.0", &valid_hash(), manifest(),
            None, &corr, &Actor::user("u1"), now,
        )
        .expect("import y");
        assert_eq!(pending.status, SkillStatus::Pending);
    }

    #[test]
    fn reviewing_pending_without_signature_quarantines() {
        let db = test_db();
        let ws = WorkspaceId::new("ws-1");
        let corr = CorrelationId::new("corr-1");
        let now = Timestamp::now();
        let pkg_id = SkillPackageId::new("pkg-y");

        import(&db, &ws, &pkg_id, "pkg-y", "1.0.0", &valid_hash(), manifest(), None, &corr, &Actor::user("u1"), now)
            .expect("import");
        let reviewed = verify(&db, &ws, &pkg_id, &corr, &Actor::user("reviewer"), now).expect("verify");
        assert_eq!(reviewed.status, SkillStatus::Quarantined);
        assert_eq!(reviewed.status_reason.as_deref(), Some("verify_signature_required"));
    }

    #[test]
    fn invalid_hash_quarantines_on_import() {
        let db = test_db();
        let ws = WorkspaceId::new("ws-1");
        let corr = CorrelationId::new("corr-1");
        let now = Timestamp::now();
        let result = import(
            &db, &ws, &SkillPackageId::new("pkg-bad"), "pkg-bad", "1.0.0", "not-a-hash", manifest(),
            None, &corr, &Actor::user("u1"), now,
        )
        .expect("import");
        assert_eq!(result.status, SkillStatus::Quarantined);
        assert_eq!(result.status_reason.as_deref(), Some("invalid_hash_sha256"));
    }

    #[test]
    fn certify_imported_creates_synthetic_assessment() {
        let db = test_db();
        let ws = WorkspaceId::new("ws-1");
        let corr = CorrelationId::new("corr-1");
        let now = Timestamp::now();
        let pkg_id = SkillPackageId::new("pkg-x");
        let agent = AgentId::new("agent-1");

        import(&db, &ws, &pkg_id, "pkg-x", "1.0.0", &valid_hash(), manifest(), Some("sig"), &corr, &Actor::user("u1"), now)
            .expect("import");
        let (package, agent_skill) =
            certify_imported(&db, &ws, &pkg_id, &agent, false, &corr, &Actor::user("reviewer"), now).expect("certify");
        assert_eq!(package.status, SkillStatus::Verified);
        let agent_skill = agent_skill.expect("agent skill");
        assert_eq!(agent_skill.assessment_total, 1);
        assert!((agent_skill.reliability_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn primary_selection_clears_prior_primary() {
        let db = test_db();
        let ws = WorkspaceId::new("ws-1");
        let corr = CorrelationId::new("corr-1");
        let now = Timestamp::now();
        let agent = AgentId::new("agent-1");

        for (pkg, hash_suffix) in [("pkg-a", "a"), ("pkg-b", "b")] {
            import(
                &db, &ws, &SkillPackageId::new(pkg), pkg, "1.0.0", &hash_suffix.repeat(64), manifest(),
                Some("sig"), &corr, &Actor::user("u1"), now,
            )
            .expect("import");
            certify_imported(&db, &ws, &SkillPackageId::new(pkg), &agent, false, &corr, &Actor::user("r"), now)
                .expect("certify");
        }

        let first = select_primary(&db, &ws, &agent, &corr, &Actor::user("r"), now).expect("select");
        assert!(first.is_primary);

        let primary_count: i64 = db
            .with_conn::<_, opscore_store::StoreError>(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM agent_skills WHERE workspace_id = 'ws-1' AND agent_id = 'agent-1' AND is_primary = 1",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(primary_count, 1);
    }
}
