// SPDX-License-Identifier: MIT OR Apache-2.0
//! Group definitions - hierarchical, positionable containers.

use crate::geom::Vec2;
use crate::id::{EntityId, GroupId};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// A hierarchical container for entities and nested groups.
///
/// A group's position is relative to its own parent, so moving a group moves
/// everything transitively inside it. The parent graph over groups stays
/// acyclic because reparenting always detaches from the old parent first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Unique group id.
    pub id: GroupId,
    /// Human-readable label.
    pub name: String,
    /// Local position, relative to the parent group if any.
    pub position: Vec2,
    /// Ids of member entities.
    pub entities: IndexSet<EntityId>,
    /// Ids of nested member groups.
    pub groups: IndexSet<GroupId>,
    /// Enclosing group, or `None` at the root.
    pub parent_id: Option<GroupId>,
}

impl Group {
    /// Create a new empty group at the origin.
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            position: Vec2::default(),
            entities: IndexSet::new(),
            groups: IndexSet::new(),
            parent_id: None,
        }
    }
}
