// crates/opscore-core/src/capability.rs
// ============================================================================
// Module: Capability & Engine Model
// Description: Scoped permission grants and the engines/agents that hold
//              them.
// Purpose: Typed projection-row shapes for principals, agents, engines, and
//          capability tokens.
// Dependencies: crate::ids, crate::time, serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::ids::AgentId;
use crate::ids::CapabilityTokenId;
use crate::ids::EngineId;
use crate::ids::PrincipalId;
use crate::ids::WorkspaceId;
use crate::time::Timestamp;

/// Kind of principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// A human user.
    User,
    /// A backend service (engine).
    Service,
    /// An autonomous agent.
    Agent,
}

/// Unique identity of any actor capable of holding capability tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Principal identifier.
    pub principal_id: PrincipalId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Kind of principal.
    pub kind: PrincipalKind,
    /// Display name.
    pub display_name: String,
}

/// An autonomous agent: a principal with display name, status, and
/// quarantine/revocation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Agent identifier.
    pub agent_id: AgentId,
    /// Backing principal identifier.
    pub principal_id: PrincipalId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Display name.
    pub display_name: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Quarantine time, if quarantined.
    pub quarantined_at: Option<Timestamp>,
    /// Quarantine reason, set at the time of the original quarantine; an
    /// idempotent re-quarantine replay preserves this original reason
    /// rather than substituting the new request's reason (see DESIGN.md).
    pub quarantine_reason: Option<String>,
    /// Revocation time, if revoked.
    pub revoked_at: Option<Timestamp>,
}

impl Agent {
    /// Returns whether the agent is currently quarantined.
    #[must_use]
    pub const fn is_quarantined(&self) -> bool {
        self.quarantined_at.is_some()
    }

    /// Returns whether the agent is currently revoked.
    #[must_use]
    pub const fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// A service registered per workspace, holding its own principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engine {
    /// Engine identifier.
    pub engine_id: EngineId,
    /// Backing principal identifier.
    pub principal_id: PrincipalId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Display name.
    pub display_name: String,
    /// Whether the engine has been deactivated.
    pub deactivated_at: Option<Timestamp>,
}

/// Scoped grant carried by a [`CapabilityToken`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityScope {
    /// Rooms the grant applies to; empty means "no rooms".
    pub rooms: Vec<String>,
    /// Tools the grant permits invoking.
    pub tools: Vec<String>,
    /// Action types the grant permits.
    pub action_types: Vec<String>,
    /// Egress domains the grant permits reaching.
    pub egress_domains: Vec<String>,
    /// Whether the grant permits reading data resources.
    pub data_access_read: bool,
    /// Whether the grant permits writing data resources.
    pub data_access_write: bool,
}

impl CapabilityScope {
    /// Returns the union of `self` and `other`, deduplicating list fields.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let merge = |a: &[String], b: &[String]| -> Vec<String> {
            let mut out = a.to_vec();
            for item in b {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
            out
        };
        Self {
            rooms: merge(&self.rooms, &other.rooms),
            tools: merge(&self.tools, &other.tools),
            action_types: merge(&self.action_types, &other.action_types),
            egress_domains: merge(&self.egress_domains, &other.egress_domains),
            data_access_read: self.data_access_read || other.data_access_read,
            data_access_write: self.data_access_write || other.data_access_write,
        }
    }
}

/// A signed, scoped grant of permissions to a principal.
///
/// # Invariants
/// - Valid iff the owning principal is not revoked, `revoked_at.is_none()`,
///   and (`valid_until.is_none()` or `valid_until > now`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    /// Token identifier.
    pub token_id: CapabilityTokenId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Principal the grant applies to.
    pub principal_id: PrincipalId,
    /// Principal that issued the grant.
    pub issued_by_principal_id: PrincipalId,
    /// Scoped permissions.
    pub scope: CapabilityScope,
    /// Optional expiry.
    pub valid_until: Option<Timestamp>,
    /// Revocation time, if revoked.
    pub revoked_at: Option<Timestamp>,
    /// Parent token id, for tokens derived from another grant.
    pub parent_token_id: Option<CapabilityTokenId>,
    /// Issuance time.
    pub issued_at: Timestamp,
}

impl CapabilityToken {
    /// Returns whether the token is valid at `now`, given the owning
    /// principal's revocation state.
    #[must_use]
    pub fn is_valid(&self, now: Timestamp, principal_revoked: bool) -> bool {
        if principal_revoked || self.revoked_at.is_some() {
            return false;
        }
        self.valid_until.is_none_or(|until| until > now)
    }
}
