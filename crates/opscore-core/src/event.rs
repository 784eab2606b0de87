// crates/opscore-core/src/event.rs
// ============================================================================
// Module: Event Envelope
// Description: The canonical append-only event shape and its scoping/actor
//              metadata.
// Purpose: Give every component in the workspace one shared, immutable
//          envelope type to append, project, and replay.
// Dependencies: crate::ids, crate::time, serde, serde_json
// ============================================================================

//! ## Overview
//! An [`EventEnvelope`] is the unit of truth for the whole control plane:
//! everything else (run rows, approval rows, trust scores) is a projection
//! derived from a sequence of these. Envelopes are immutable once built;
//! [`crate::EventEnvelope`] values returned by the store additionally carry a
//! [`PersistedEvent`] wrapper with the store-assigned `event_id` and
//! `stream_position`.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::CausationId;
use crate::ids::CorrelationId;
use crate::ids::EventId;
use crate::ids::IdempotencyKey;
use crate::ids::PrincipalId;
use crate::ids::WorkspaceId;
use crate::time::Timestamp;

/// Kind of actor that originated an event.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// A human user.
    User,
    /// A backend service (e.g. an execution engine).
    Service,
    /// An autonomous agent.
    Agent,
}

/// Identifies who performed the action that produced an event.
///
/// # Invariants
/// - `principal_id`, when present, names the capability-token-bearing
///   principal responsible for the action; `id` is the actor's own identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Kind of actor.
    pub kind: ActorKind,
    /// Actor's own identity (user id, service name, or agent id).
    pub id: String,
    /// Optional principal id, when the actor acts under a capability token.
    pub principal_id: Option<PrincipalId>,
}

impl Actor {
    /// Builds a user actor.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self { kind: ActorKind::User, id: id.into(), principal_id: None }
    }

    /// Builds a service actor.
    #[must_use]
    pub fn service(id: impl Into<String>) -> Self {
        Self { kind: ActorKind::Service, id: id.into(), principal_id: None }
    }

    /// Builds an agent actor acting under `principal_id`.
    #[must_use]
    pub fn agent(id: impl Into<String>, principal_id: PrincipalId) -> Self {
        Self { kind: ActorKind::Agent, id: id.into(), principal_id: Some(principal_id) }
    }
}

/// Ordering axis an event is appended against.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Ordered per room.
    Room,
    /// Ordered per workspace.
    Workspace,
    /// Ordered per thread.
    Thread,
}

/// The stream an event is appended to; stream position is monotone within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamRef {
    /// Ordering axis.
    pub kind: StreamKind,
    /// Stream identifier (room id, workspace id, or thread id as a string).
    pub id: String,
}

impl StreamRef {
    /// Builds a workspace-scoped stream reference.
    #[must_use]
    pub fn workspace(workspace_id: &WorkspaceId) -> Self {
        Self { kind: StreamKind::Workspace, id: workspace_id.as_str().to_owned() }
    }

    /// Builds a room-scoped stream reference.
    #[must_use]
    pub fn room(room_id: impl Into<String>) -> Self {
        Self { kind: StreamKind::Room, id: room_id.into() }
    }

    /// Builds a thread-scoped stream reference.
    #[must_use]
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self { kind: StreamKind::Thread, id: thread_id.into() }
    }
}

/// Optional scoping attached to an event beyond its stream.
///
/// # Invariants
/// - None of these fields are required; projectors must tolerate any subset
///   being absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventScope {
    /// Room scope, when applicable.
    pub room_id: Option<String>,
    /// Thread scope, when applicable.
    pub thread_id: Option<String>,
    /// Run scope, when applicable.
    pub run_id: Option<String>,
    /// Step scope, when applicable.
    pub step_id: Option<String>,
    /// Mission/experiment scope, when applicable.
    pub mission_id: Option<String>,
}

/// Free-form, non-authoritative context bags carried alongside an event.
///
/// # Invariants
/// - None. Contents are informational only and never drive projector logic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    /// Policy-evaluation context (decision inputs, zone, etc).
    pub policy: Option<Value>,
    /// Model/provider context (which LLM, which tool).
    pub model: Option<Value>,
    /// Display hints for UI rendering.
    pub display: Option<Value>,
}

/// A new event to be appended; not yet assigned an id or stream position.
///
/// # Invariants
/// - `event_type`, `workspace_id`, `stream`, `occurred_at`, `correlation_id`,
///   and `actor` are required by [`crate::errors::EventStoreError::ValidationFailed`]
///   checks performed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Event type, e.g. `"run.started"`.
    pub event_type: String,
    /// Schema version of `data`.
    pub version: u32,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Optional narrower scope.
    pub scope: EventScope,
    /// Actor that produced the event.
    pub actor: Actor,
    /// Stream the event is appended to.
    pub stream: StreamRef,
    /// Correlation id threading the logical activity this event belongs to.
    pub correlation_id: CorrelationId,
    /// Event id of the event that directly caused this one, if any.
    pub causation_id: Option<CausationId>,
    /// Opaque, typed payload.
    pub data: Value,
    /// Caller-chosen idempotency key, unique per `(workspace_id, key)`.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Non-authoritative context bags.
    pub context: EventContext,
    /// Wall-clock time the event occurred, as reported by the caller.
    pub occurred_at: Timestamp,
}

impl NewEvent {
    /// Builds a new event with the required fields; `scope`, `causation_id`,
    /// `idempotency_key`, and `context` default to empty and can be set via
    /// the `with_*` methods.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        version: u32,
        workspace_id: WorkspaceId,
        actor: Actor,
        stream: StreamRef,
        correlation_id: CorrelationId,
        data: Value,
        occurred_at: Timestamp,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            version,
            workspace_id,
            scope: EventScope::default(),
            actor,
            stream,
            correlation_id,
            causation_id: None,
            data,
            idempotency_key: None,
            context: EventContext::default(),
            occurred_at,
        }
    }

    /// Attaches a narrower scope.
    #[must_use]
    pub fn with_scope(mut self, scope: EventScope) -> Self {
        self.scope = scope;
        self
    }

    /// Attaches the id of the event that directly caused this one.
    #[must_use]
    pub fn with_causation_id(mut self, causation_id: Option<CausationId>) -> Self {
        self.causation_id = causation_id;
        self
    }

    /// Attaches a caller-chosen idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, idempotency_key: Option<IdempotencyKey>) -> Self {
        self.idempotency_key = idempotency_key;
        self
    }

    /// Attaches non-authoritative context bags.
    #[must_use]
    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }
}

/// An event as persisted by the store: immutable, with assigned id and
/// monotone per-stream position.
///
/// # Invariants
/// - `event_id` is globally unique.
/// - `stream_position` is monotonically increasing within `(stream.kind, stream.id)`.
/// - `occurred_at` is the first writer's timestamp: on an idempotent replay
///   the caller must use this value, not a freshly generated one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedEvent {
    /// Store-assigned event id.
    pub event_id: EventId,
    /// Monotone position within the event's stream.
    pub stream_position: u64,
    /// The envelope as it was first appended.
    pub envelope: NewEvent,
}

impl PersistedEvent {
    /// Pairs a store-assigned `event_id` and `stream_position` with the
    /// envelope as first appended.
    #[must_use]
    pub fn new(event_id: EventId, stream_position: u64, envelope: NewEvent) -> Self {
        Self { event_id, stream_position, envelope }
    }

    /// Convenience accessor for `envelope.event_type`.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.envelope.event_type
    }

    /// Convenience accessor for `envelope.workspace_id`.
    #[must_use]
    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.envelope.workspace_id
    }

    /// Convenience accessor for `envelope.occurred_at`.
    #[must_use]
    pub const fn occurred_at(&self) -> Timestamp {
        self.envelope.occurred_at
    }
}
