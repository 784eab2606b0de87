// crates/opscore-core/src/conversation.rs
// ============================================================================
// Module: Conversation Model
// Description: Rooms, threads, and messages.
// Purpose: Typed projection-row shapes for conversational containers.
// Dependencies: crate::ids, crate::time, serde, serde_json
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ids::MessageId;
use crate::ids::RoomId;
use crate::ids::ThreadId;
use crate::ids::WorkspaceId;
use crate::time::Timestamp;

/// A conversational container scoped to a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Room identifier.
    pub room_id: RoomId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Display name.
    pub name: String,
    /// Creation time.
    pub created_at: Timestamp,
}

/// A conversational container scoped to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Thread identifier.
    pub thread_id: ThreadId,
    /// Parent room.
    pub room_id: RoomId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Display title.
    pub title: String,
    /// Creation time.
    pub created_at: Timestamp,
}

/// A single message posted to a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    pub message_id: MessageId,
    /// Parent thread.
    pub thread_id: ThreadId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Author actor id.
    pub author_id: String,
    /// Message body.
    pub body: Value,
    /// Creation time.
    pub created_at: Timestamp,
}
