// crates/opscore-policy/src/authorize.rs
// ============================================================================
// Module: Authorization Decision
// Description: Synchronous first-match decision function over an egress or
//              data-access request.
// Purpose: Implements `authorize` from spec §4.5.
// Dependencies: ret_logic::{TriState, TriLogic, KleeneLogic}, opscore_core
// ============================================================================

//! ## Overview
//! [`authorize`] evaluates a fixed, ordered list of gates and returns on the
//! first one that fires — it is not a boolean expression tree. The one gate
//! that *is* naturally a conjunction (capability-scope coverage: does the
//! token's scope cover the room, the tool or domain, and the requested data
//! access mode) is expressed with [`ret_logic::KleeneLogic`]'s tri-state
//! `and`: a dimension the action does not exercise contributes `Unknown`
//! rather than a fabricated `True`, so it never forces the conjunction false
//! on its own, and the absence of a capability token collapses the whole
//! gate to `False` without special-casing each dimension.

use opscore_core::CapabilityScope;
use ret_logic::KleeneLogic;
use ret_logic::TriLogic;
use ret_logic::TriState;
use serde::Deserialize;
use serde::Serialize;

/// Risk tier an action is gated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    /// Fully sandboxed, no externally visible effect.
    Sandbox,
    /// Supervised: effects are visible but routinely reviewed.
    Supervised,
    /// High-stakes: effects are hard to reverse or costly to undo.
    HighStakes,
}

impl Zone {
    fn rank(self) -> u8 {
        match self {
            Self::Sandbox => 0,
            Self::Supervised => 1,
            Self::HighStakes => 2,
        }
    }

    /// Returns whether `self` requires at least as permissive a caller zone
    /// as `caller_zone` to proceed without escalation.
    #[must_use]
    pub fn exceeds(self, caller_zone: Self) -> bool {
        self.rank() > caller_zone.rank()
    }
}

/// Cost/recovery metadata annotated on an action registry row, threaded
/// through to approval-mode recommendations (spec §4.8) and surfaced in
/// `RequireApproval` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostImpact {
    /// Low cost if the action turns out to be wrong.
    Low,
    /// Medium cost.
    Medium,
    /// High cost.
    High,
}

/// See [`CostImpact`]; recovery difficulty if the action must be undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryDifficulty {
    /// Trivial to undo.
    Easy,
    /// Undoable with effort.
    Moderate,
    /// Hard or impossible to undo.
    Hard,
}

/// The action-registry row for one `action_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRegistryEntry {
    /// Action type key.
    pub action_type: String,
    /// Whether the action's effects can be reversed.
    pub reversible: bool,
    /// Zone required to perform this action without escalation.
    pub zone_required: Zone,
    /// Whether the action always requires pre-approval regardless of zone.
    pub requires_pre_approval: bool,
    /// Whether a post-hoc review is required after execution.
    pub post_review_required: bool,
    /// Cost if the action turns out to be wrong.
    pub cost_impact: CostImpact,
    /// Difficulty of reversing the action.
    pub recovery_difficulty: RecoveryDifficulty,
}

/// Narrows which dimension(s) of the request an action exercises, so the
/// capability-scope gate only checks the dimensions that matter for it.
#[derive(Debug, Clone, Default)]
pub struct RequestShape {
    /// Room the action would act within, if any.
    pub room: Option<String>,
    /// Tool the action would invoke, if any.
    pub tool: Option<String>,
    /// Egress domain the action would reach, if this is an egress request.
    pub egress_domain: Option<String>,
    /// Whether this is a data-read request.
    pub data_read: bool,
    /// Whether this is a data-write request.
    pub data_write: bool,
}

/// Per-request signals not carried by the capability token or action
/// registry: kill-switch, quarantine, quota, and enforcement mode.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeContext {
    /// Whether the workspace (or agent) kill-switch is active.
    pub kill_switch_active: bool,
    /// Whether the acting agent is quarantined.
    pub agent_quarantined: bool,
    /// The caller's current zone.
    pub caller_zone: Zone,
    /// Whether this egress request's quota has been exceeded.
    pub egress_quota_exceeded: bool,
    /// Whether the workspace runs policy in enforce mode (`true`) or
    /// dry-run (`false`).
    pub enforce_mode: bool,
}

impl Default for Zone {
    fn default() -> Self {
        Self::Sandbox
    }
}

/// The three possible policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The action may proceed.
    Allow,
    /// The action is rejected outright.
    Deny,
    /// The action must be escalated to a human approval before proceeding.
    RequireApproval,
}

/// The full result of an [`authorize`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeOutcome {
    /// The decision reached.
    pub decision: Decision,
    /// Stable machine-readable reason for the decision.
    pub reason_code: &'static str,
    /// Whether the action is actually prevented from proceeding: always
    /// `false` in dry-run mode regardless of `decision`.
    pub blocked: bool,
    /// Whether a `quota.exceeded` event should additionally be emitted.
    pub emit_quota_exceeded: bool,
}

/// Evaluates the first-match decision ordering from spec §4.5.
///
/// # Errors
///
/// This function cannot fail; callers that need to surface a contract-layer
/// error (e.g. unknown action type) must validate the action registry entry
/// before calling.
#[must_use]
pub fn authorize(
    action: &ActionRegistryEntry,
    scope: &CapabilityScope,
    has_capability_token: bool,
    request: &RequestShape,
    ctx: &AuthorizeContext,
) -> AuthorizeOutcome {
    let raw_decision = evaluate_ordering(action, scope, has_capability_token, request, ctx);
    AuthorizeOutcome {
        decision: raw_decision.0,
        reason_code: raw_decision.1,
        blocked: ctx.enforce_mode && raw_decision.0 != Decision::Allow,
        emit_quota_exceeded: raw_decision.1 == "quota_exceeded",
    }
}

fn evaluate_ordering(
    action: &ActionRegistryEntry,
    scope: &CapabilityScope,
    has_capability_token: bool,
    request: &RequestShape,
    ctx: &AuthorizeContext,
) -> (Decision, &'static str) {
    if ctx.kill_switch_active {
        return (Decision::Deny, "kill_switch_active");
    }
    if ctx.agent_quarantined {
        return (Decision::Deny, "agent_quarantined");
    }
    if !scope_covers(scope, has_capability_token, request) {
        return (Decision::Deny, "no_scope");
    }
    if action.requires_pre_approval {
        return (Decision::RequireApproval, "pre_required");
    }
    if action.zone_required == Zone::HighStakes || action.zone_required.exceeds(ctx.caller_zone) {
        return (Decision::RequireApproval, "high_stakes");
    }
    if request.egress_domain.is_some() && ctx.egress_quota_exceeded {
        return (Decision::Deny, "quota_exceeded");
    }
    (Decision::Allow, "allowed")
}

/// Computes the conjunction of every scope dimension the request exercises,
/// via [`KleeneLogic`]: a dimension the request does not touch contributes
/// `Unknown` and cannot force the conjunction to `False` on its own; the
/// absence of any capability token forces it directly.
fn scope_covers(scope: &CapabilityScope, has_capability_token: bool, request: &RequestShape) -> bool {
    if !has_capability_token {
        return false;
    }
    let logic = KleeneLogic;
    let mut result = TriState::True;

    if let Some(room) = &request.room {
        result = logic.and(result, TriState::from(scope.rooms.iter().any(|r| r == room)));
    }
    if let Some(tool) = &request.tool {
        result = logic.and(result, TriState::from(scope.tools.iter().any(|t| t == tool)));
    }
    if let Some(domain) = &request.egress_domain {
        result = logic.and(result, TriState::from(scope.egress_domains.iter().any(|d| d == domain)));
    }
    if request.data_read {
        result = logic.and(result, TriState::from(scope.data_access_read));
    }
    if request.data_write {
        result = logic.and(result, TriState::from(scope.data_access_write));
    }

    result.is_true()
}

#[cfg(test)]
mod tests {
    use opscore_core::CapabilityScope;

    use super::ActionRegistryEntry;
    use super::AuthorizeContext;
    use super::CostImpact;
    use super::Decision;
    use super::RecoveryDifficulty;
    use super::RequestShape;
    use super::Zone;
    use super::authorize;

    fn action(zone: Zone, requires_pre_approval: bool) -> ActionRegistryEntry {
        ActionRegistryEntry {
            action_type: "external.write".into(),
            reversible: true,
            zone_required: zone,
            requires_pre_approval,
            post_review_required: false,
            cost_impact: CostImpact::Low,
            recovery_difficulty: RecoveryDifficulty::Easy,
        }
    }

    #[test]
    fn kill_switch_beats_everything() {
        let outcome = authorize(
            &action(Zone::Sandbox, false),
            &CapabilityScope::default(),
            false,
            &RequestShape::default(),
            &AuthorizeContext { kill_switch_active: true, enforce_mode: true, ..AuthorizeContext::default() },
        );
        assert_eq!(outcome.decision, Decision::Deny);
        assert_eq!(outcome.reason_code, "kill_switch_active");
        assert!(outcome.blocked);
    }

    #[test]
    fn missing_scope_denies() {
        let outcome = authorize(
            &action(Zone::Sandbox, false),
            &CapabilityScope::default(),
            true,
            &RequestShape { room: Some("room-1".into()), ..RequestShape::default() },
            &AuthorizeContext { enforce_mode: true, ..AuthorizeContext::default() },
        );
        assert_eq!(outcome.decision, Decision::Deny);
        assert_eq!(outcome.reason_code, "no_scope");
    }

    #[test]
    fn high_stakes_requires_approval_even_with_scope() {
        let scope = CapabilityScope { rooms: vec!["room-1".into()], ..CapabilityScope::default() };
        let outcome = authorize(
            &action(Zone::HighStakes, false),
            &scope,
            true,
            &RequestShape { room: Some("room-1".into()), ..RequestShape::default() },
            &AuthorizeContext { enforce_mode: true, ..AuthorizeContext::default() },
        );
        assert_eq!(outcome.decision, Decision::RequireApproval);
        assert_eq!(outcome.reason_code, "high_stakes");
    }

    #[test]
    fn dry_run_never_blocks() {
        let outcome = authorize(
            &action(Zone::Sandbox, false),
            &CapabilityScope::default(),
            false,
            &RequestShape::default(),
            &AuthorizeContext { kill_switch_active: true, enforce_mode: false, ..AuthorizeContext::default() },
        );
        assert_eq!(outcome.decision, Decision::Deny);
        assert!(!outcome.blocked);
    }

    #[test]
    fn quota_exceeded_denies_egress_with_scope() {
        let scope = CapabilityScope { egress_domains: vec!["example.com".into()], ..CapabilityScope::default() };
        let outcome = authorize(
            &action(Zone::Sandbox, false),
            &scope,
            true,
            &RequestShape { egress_domain: Some("example.com".into()), ..RequestShape::default() },
            &AuthorizeContext { egress_quota_exceeded: true, enforce_mode: true, ..AuthorizeContext::default() },
        );
        assert_eq!(outcome.decision, Decision::Deny);
        assert_eq!(outcome.reason_code, "quota_exceeded");
        assert!(outcome.emit_quota_exceeded);
    }
}
