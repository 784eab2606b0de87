// crates/opscore-core/src/skills.rs
// ============================================================================
// Module: Skills Ledger Model
// Description: Skill catalog installs, per-agent usage, and assessments.
// Purpose: Typed projection-row shapes for the skills ledger.
// Dependencies: crate::ids, crate::time, serde, serde_json
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::AgentId;
use crate::ids::AgentSkillId;
use crate::ids::SkillAssessmentId;
use crate::ids::SkillPackageId;
use crate::ids::WorkspaceId;
use crate::time::Timestamp;

/// Forward-only status ordering for a skill package.
///
/// # Invariants
/// - Rank order is `Pending < Verified < Quarantined`; imports merge by
///   taking the higher rank and may never move backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillStatus {
    /// Submitted but not yet verified.
    Pending,
    /// Verified as safe to use.
    Verified,
    /// Quarantined; blocked from use pending review.
    Quarantined,
}

impl SkillStatus {
    /// Returns the rank used for the forward-only merge ordering.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 1,
            Self::Verified => 2,
            Self::Quarantined => 3,
        }
    }

    /// Merges `self` with `proposed`, returning whichever has the higher
    /// rank (ties keep `self`).
    #[must_use]
    pub fn merge(self, proposed: Self) -> Self {
        if proposed.rank() > self.rank() { proposed } else { self }
    }
}

/// A workspace-scoped install of a versioned skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillPackage {
    /// Skill package identifier.
    pub skill_package_id: SkillPackageId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Skill name.
    pub name: String,
    /// Skill version string.
    pub version: String,
    /// Canonical sha256 hash of the package payload.
    pub hash: String,
    /// Optional detached signature.
    pub signature: Option<String>,
    /// Package manifest.
    pub manifest: Value,
    /// Current verification status.
    pub status: SkillStatus,
    /// Reason recorded at the last status transition.
    pub status_reason: Option<String>,
    /// Row creation time.
    pub created_at: Timestamp,
    /// Row last-update time.
    pub updated_at: Timestamp,
}

/// Skill proficiency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    /// New; no track record yet.
    Novice,
    /// Some track record; not yet trusted for primary use.
    Intermediate,
    /// Trusted for unsupervised use.
    Proficient,
    /// Top-tier performer eligible for primary-skill selection.
    Expert,
}

/// Per-agent usage-and-assessment record for a skill.
///
/// # Invariants
/// - At most one row per `(workspace_id, agent_id)` may have `is_primary == true`
///   (enforced by a two-phase clear-then-set transition, see
///   `opscore-trust::skills::set_primary`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSkill {
    /// Agent-skill identifier.
    pub agent_skill_id: AgentSkillId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Agent identifier.
    pub agent_id: AgentId,
    /// Skill package identifier.
    pub skill_package_id: SkillPackageId,
    /// Current proficiency level.
    pub level: SkillLevel,
    /// Total usage count.
    pub usage_total: u64,
    /// Usage count in the trailing 7 days.
    pub usage_7d: u64,
    /// Usage count in the trailing 30 days.
    pub usage_30d: u64,
    /// Total number of assessments recorded.
    pub assessment_total: u64,
    /// Number of assessments that passed.
    pub assessment_passed: u64,
    /// Number of assessments that failed.
    pub assessment_failed: u64,
    /// Reliability score: `assessment_passed / assessment_total`, or `0.0`
    /// when `assessment_total == 0`.
    pub reliability_score: f64,
    /// Impact score contributed to trust computation.
    pub impact_score: f64,
    /// Whether this is the agent's primary skill.
    pub is_primary: bool,
    /// Row last-update time.
    pub updated_at: Timestamp,
}

impl AgentSkill {
    /// Recomputes `reliability_score` from `assessment_passed`/`assessment_total`.
    pub fn recompute_reliability(&mut self) {
        self.reliability_score = if self.assessment_total == 0 {
            0.0
        } else {
            self.assessment_passed as f64 / self.assessment_total as f64
        };
    }
}

/// Status of a single skill-assessment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    /// Assessment in progress.
    Started,
    /// Assessment passed.
    Passed,
    /// Assessment failed.
    Failed,
}

/// A per-attempt skill assessment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillAssessment {
    /// Assessment identifier.
    pub assessment_id: SkillAssessmentId,
    /// Parent agent-skill identifier.
    pub agent_skill_id: AgentSkillId,
    /// Attempt status.
    pub status: AssessmentStatus,
    /// Score in `[0, 1]`, populated once the attempt resolves.
    pub score: Option<f64>,
    /// Whether this assessment was synthesized by `assess-imported` rather
    /// than attempted by the agent.
    pub synthetic: bool,
    /// Attempt start time.
    pub started_at: Timestamp,
    /// Attempt resolution time, once resolved.
    pub resolved_at: Option<Timestamp>,
}
