// crates/opscore-core/src/trust.rs
// ============================================================================
// Module: Trust & Autonomy Model
// Description: Trust-score components and autonomy recommendation state.
// Purpose: Typed projection-row shapes for the trust engine.
// Dependencies: crate::ids, crate::capability, crate::time, serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::capability::CapabilityScope;
use crate::ids::AgentId;
use crate::ids::AutonomyRecommendationId;
use crate::ids::CapabilityTokenId;
use crate::ids::WorkspaceId;
use crate::time::Timestamp;

/// Recorded trust-score input components, each already clamped to its
/// documented range.
///
/// # Invariants
/// - `success_rate_7d`, `user_feedback_score` in `[0, 1]`.
/// - `eval_quality_trend` in `[-1, 1]`.
/// - `policy_violations_7d`, `time_in_service_days` are non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustComponents {
    /// Fraction of runs that succeeded in the trailing 7 days.
    pub success_rate_7d: f64,
    /// Evaluation quality trend, `-1` (worsening) to `1` (improving).
    pub eval_quality_trend: f64,
    /// User feedback score.
    pub user_feedback_score: f64,
    /// Count of enforced, non-kill-switch/quarantine policy denials in the
    /// trailing 7 days.
    pub policy_violations_7d: u32,
    /// Days since the agent's `created_at`.
    pub time_in_service_days: u32,
}

/// A trust score derived from its five recorded components.
///
/// # Invariants
/// - `score` is a pure, deterministic function of `components`
///   (see `opscore-trust::trust::compute_score`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTrust {
    /// Agent identifier.
    pub agent_id: AgentId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Recorded input components.
    pub components: TrustComponents,
    /// Computed score in `[0, 1]`.
    pub score: f64,
    /// Row last-update time.
    pub updated_at: Timestamp,
}

/// Approval-mode recommendation for one action category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// No human approval required at all.
    Auto,
    /// Allowed, but subject to post-hoc review.
    Post,
    /// Requires approval before the action proceeds.
    Pre,
    /// Never permitted regardless of approval.
    Blocked,
}

impl ApprovalMode {
    /// Returns the rank used to enforce monotonic-only downgrade: a higher
    /// rank is a stricter mode.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Post => 1,
            Self::Pre => 2,
            Self::Blocked => 3,
        }
    }

    /// Returns the stricter of `self` and `other`; dampening risks can only
    /// downgrade (never upgrade) a recommendation.
    #[must_use]
    pub fn downgrade(self, other: Self) -> Self {
        if other.rank() > self.rank() { other } else { self }
    }
}

/// A pending trust-driven recommendation to expand an agent's capability
/// scope.
///
/// # Invariants
/// - Approving consumes the recommendation and issues a capability token;
///   re-approving an already-approved recommendation is a replay, not a
///   state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomyRecommendation {
    /// Recommendation identifier.
    pub recommendation_id: AutonomyRecommendationId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Agent the recommendation targets.
    pub agent_id: AgentId,
    /// Proposed scope expansion.
    pub scope_delta: CapabilityScope,
    /// Trust score before the recommendation.
    pub trust_before: f64,
    /// Trust score at recommendation time (same call, informational).
    pub trust_after: f64,
    /// Recommendation lifecycle status.
    pub status: RecommendationStatus,
    /// Capability token issued on approval, if approved.
    pub issued_token_id: Option<CapabilityTokenId>,
    /// Row creation time.
    pub created_at: Timestamp,
    /// Row last-update time.
    pub updated_at: Timestamp,
}

/// Lifecycle status of an [`AutonomyRecommendation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved; a capability token has been issued.
    Approved,
    /// Rejected.
    Rejected,
}
