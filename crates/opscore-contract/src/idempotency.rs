// crates/opscore-contract/src/idempotency.rs
// ============================================================================
// Module: Idempotency Key Builder
// Description: The single builder for synthesizing idempotency keys, keyed
//              by command kind, per the REDESIGN FLAGS centralization note.
// Purpose: Replace scattered per-path string concatenation with one
//          canonical-hash-backed construction so identical logical commands
//          always collide on the same key.
// Dependencies: opscore_core::hashing, serde
// ============================================================================

use opscore_core::hashing::HashingError;
use opscore_core::hashing::hash_value;
use serde::Serialize;

/// The kind of command an idempotency key is scoped to.
///
/// # Invariants
/// - The wire form (`as_str`) is part of the key's input and must never
///   change for a shipped kind, or previously issued keys stop colliding
///   with their replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `agent.quarantine` — emits `agent.quarantined` only on state change.
    AgentQuarantine,
    /// `run.claim` — claims a run lease.
    RunClaim,
    /// `work_item.claim` — claims a work-item lease.
    WorkItemClaim,
    /// `lease.preempt` — a reclaim of an expired lease, synthesized once per (old, new) pair.
    LeasePreempt,
    /// `approval.decide` — a decision on a pending approval.
    ApprovalDecide,
    /// `skills.import` — importing a skill package for an agent.
    SkillsImport,
}

impl CommandKind {
    /// Renders the stable wire form folded into the key's hashed input.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AgentQuarantine => "agent.quarantine",
            Self::RunClaim => "run.claim",
            Self::WorkItemClaim => "work_item.claim",
            Self::LeasePreempt => "lease.preempt",
            Self::ApprovalDecide => "approval.decide",
            Self::SkillsImport => "skills.import",
        }
    }
}

/// The inputs folded into an idempotency key before hashing.
#[derive(Debug, Serialize)]
struct KeyInput<'a, T: Serialize> {
    /// The command kind's wire form.
    kind: &'a str,
    /// The workspace the command is scoped to.
    workspace_id: &'a str,
    /// The command-specific identity fields that make two invocations "the same".
    identity: &'a T,
}

/// Builds an idempotency key for `kind` in `workspace_id`, scoped by
/// whatever command-specific `identity` fields make two invocations "the
/// same" (e.g. `(agent_id,)` for a quarantine, `(old_lease_id, new_lease_id)`
/// for a preemption).
///
/// # Errors
///
/// Returns [`HashingError`] if `identity` cannot be canonicalized.
pub fn build_key<T: Serialize>(
    kind: CommandKind,
    workspace_id: &str,
    identity: &T,
) -> Result<String, HashingError> {
    let input = KeyInput { kind: kind.as_str(), workspace_id, identity };
    hash_value(&input).map(|digest| digest.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn same_identity_yields_the_same_key() {
        let a = build_key(CommandKind::AgentQuarantine, "ws-1", &("agent-1",)).unwrap();
        let b = build_key(CommandKind::AgentQuarantine, "ws-1", &("agent-1",)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_workspace_yields_a_different_key() {
        let a = build_key(CommandKind::AgentQuarantine, "ws-1", &("agent-1",)).unwrap();
        let b = build_key(CommandKind::AgentQuarantine, "ws-2", &("agent-1",)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_command_kind_yields_a_different_key_for_the_same_identity() {
        let a = build_key(CommandKind::RunClaim, "ws-1", &("lease-1",)).unwrap();
        let b = build_key(CommandKind::WorkItemClaim, "ws-1", &("lease-1",)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn lease_preempt_key_is_scoped_to_the_old_and_new_lease_pair() {
        let a = build_key(CommandKind::LeasePreempt, "ws-1", &("lease-old", "lease-new")).unwrap();
        let b = build_key(CommandKind::LeasePreempt, "ws-1", &("lease-old", "lease-other")).unwrap();
        assert_ne!(a, b);
    }

    proptest! {
        /// Same workspace and identity always hash to the same key, regardless
        /// of what either string contains.
        #[test]
        fn build_key_is_deterministic(workspace_id in "[a-zA-Z0-9_-]{0,32}", identity in "[a-zA-Z0-9_-]{0,32}") {
            let a = build_key(CommandKind::RunClaim, &workspace_id, &(identity.as_str(),)).unwrap();
            let b = build_key(CommandKind::RunClaim, &workspace_id, &(identity.as_str(),)).unwrap();
            prop_assert_eq!(a, b);
        }

        /// Changing the workspace while holding identity fixed never collides,
        /// so two tenants can never replay each other's commands.
        #[test]
        fn build_key_separates_workspaces(
            workspace_a in "[a-zA-Z0-9_-]{1,32}",
            workspace_b in "[a-zA-Z0-9_-]{1,32}",
            identity in "[a-zA-Z0-9_-]{0,32}",
        ) {
            prop_assume!(workspace_a != workspace_b);
            let a = build_key(CommandKind::RunClaim, &workspace_a, &(identity.as_str(),)).unwrap();
            let b = build_key(CommandKind::RunClaim, &workspace_b, &(identity.as_str(),)).unwrap();
            prop_assert_ne!(a, b);
        }
    }
}
