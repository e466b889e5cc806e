// SPDX-License-Identifier: MIT OR Apache-2.0
//! Socket definitions - directional connection points owned by entities.

use crate::geom::Vec2;
use crate::id::{EntityId, SocketId};
use serde::{Deserialize, Serialize};

/// Direction of data flow for a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SocketKind {
    /// Accepts incoming data flow from a link.
    Input,
    /// Emits outgoing data flow into a link.
    Output,
}

/// A connection point on an entity.
///
/// Sockets carry the reactive `value` slot and their offset from the owning
/// entity's center. A socket's lifecycle is tied to its entity: dropping the
/// entity drops the socket, and dropping the socket drops any link touching
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Socket {
    /// Unique socket id.
    pub id: SocketId,
    /// Id of the entity that owns this socket.
    pub entity_id: EntityId,
    /// Whether this socket is an input or an output.
    pub kind: SocketKind,
    /// Name of the socket, unique within the owning entity.
    pub name: String,
    /// Position relative to the owning entity's center.
    pub offset: Vec2,
    /// Current value held by the socket, used for reactive propagation.
    /// `Null` when unset; never included in serialized documents.
    #[serde(skip)]
    pub value: serde_json::Value,
}

impl Socket {
    /// Create a new socket with a zero offset and no value.
    pub fn new(id: SocketId, entity_id: EntityId, kind: SocketKind, name: impl Into<String>) -> Self {
        Self {
            id,
            entity_id,
            kind,
            name: name.into(),
            offset: Vec2::default(),
            value: serde_json::Value::Null,
        }
    }
}
