// SPDX-License-Identifier: MIT OR Apache-2.0
//! Entity definitions - the primary nodes of a diagram.

use crate::geom::Vec2;
use crate::id::{EntityId, GroupId, SocketId};
use indexmap::IndexSet;

/// A node in the diagram.
///
/// Entities hold a caller-supplied payload the engine never inspects, a
/// position local to their parent group (absolute when ungrouped), and the
/// ids of their sockets. The socket structs themselves live in the context's
/// socket arena; the set here is the ownership record.
#[derive(Debug, Clone)]
pub struct Entity<T> {
    /// Unique entity id.
    pub id: EntityId,
    /// Opaque caller-supplied payload.
    pub inner: T,
    /// Local position, relative to the parent group if any.
    pub position: Vec2,
    /// Ids of the sockets owned by this entity, in creation order.
    pub sockets: IndexSet<SocketId>,
    /// Enclosing group, or `None` at the root.
    pub parent_id: Option<GroupId>,
}

impl<T> Entity<T> {
    /// Create a new entity at the origin with no sockets and no parent.
    pub fn new(id: EntityId, inner: T) -> Self {
        Self {
            id,
            inner,
            position: Vec2::default(),
            sockets: IndexSet::new(),
            parent_id: None,
        }
    }
}
