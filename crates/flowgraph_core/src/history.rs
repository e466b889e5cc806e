// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transactional undo/redo history.
//!
//! A command is an ordered list of atomic actions paired with its inverse.
//! The manager holds two bounded stacks and no graph state of its own; the
//! context applies a command's actions when navigating. Everything here is
//! serializable so a session's history can be persisted.

use crate::document::Document;
use crate::geom::Vec2;
use crate::id::{EntityId, GroupId, LinkId, SocketId};
use crate::link::{LinkKind, LinkStyling};
use crate::socket::SocketKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum undo history depth.
const MAX_HISTORY: usize = 100;

/// An old/new value pair carried by update actions, enough to apply the
/// change in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swap<V> {
    /// Value before the change.
    pub old: V,
    /// Value after the change.
    pub new: V,
}

/// A tagged, reversible description of one state mutation.
///
/// Actions are the vocabulary shared by history navigation and external
/// patch application; each variant carries exactly the fields needed to both
/// apply and reverse it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action<T> {
    /// Create an entity with a known id.
    #[serde(rename_all = "camelCase")]
    CreateEntity {
        /// Entity id.
        id: EntityId,
        /// Opaque payload.
        inner: T,
        /// Local position.
        position: Vec2,
        /// Enclosing group, or null.
        parent_id: Option<GroupId>,
    },
    /// Drop an entity, cascading to its sockets and their links.
    #[serde(rename_all = "camelCase")]
    DropEntity {
        /// Entity id.
        id: EntityId,
        /// Opaque payload, kept so the drop can be reversed.
        inner: T,
        /// Local position at drop time.
        position: Vec2,
        /// Enclosing group at drop time.
        parent_id: Option<GroupId>,
    },
    /// Set an entity's local position.
    MoveEntity {
        /// Entity id.
        id: EntityId,
        /// Position before the move.
        from: Vec2,
        /// Position after the move.
        to: Vec2,
    },
    /// Offset a group (and everything transitively inside it).
    MoveGroup {
        /// Group id.
        id: GroupId,
        /// Group position before the move.
        from: Vec2,
        /// Group position after the move.
        to: Vec2,
    },
    /// Create a link with a known id.
    CreateLink {
        /// Link id.
        id: LinkId,
        /// Source socket id.
        from: SocketId,
        /// Target socket id.
        to: SocketId,
        /// Routing style.
        kind: LinkKind,
        /// Visual styling.
        #[serde(default, skip_serializing_if = "LinkStyling::is_empty")]
        styling: LinkStyling,
        /// Opaque payload.
        #[serde(default)]
        inner: Value,
    },
    /// Drop a link.
    DropLink {
        /// Link id.
        id: LinkId,
        /// Source socket id at drop time.
        from: SocketId,
        /// Target socket id at drop time.
        to: SocketId,
        /// Routing style at drop time.
        kind: LinkKind,
        /// Visual styling at drop time.
        #[serde(default, skip_serializing_if = "LinkStyling::is_empty")]
        styling: LinkStyling,
        /// Opaque payload at drop time.
        #[serde(default)]
        inner: Value,
    },
    /// Retarget a link's endpoints and/or replace its waypoints.
    UpdateLink {
        /// Link id.
        id: LinkId,
        /// Source socket change.
        from: Swap<SocketId>,
        /// Target socket change.
        to: Swap<SocketId>,
        /// Waypoint change, when routing was edited.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        waypoints: Option<Swap<Vec<Vec2>>>,
    },
    /// Replace a link's styling.
    UpdateLinkStyling {
        /// Link id.
        id: LinkId,
        /// Styling before the change.
        from: LinkStyling,
        /// Styling after the change.
        to: LinkStyling,
    },
    /// Create a socket on an entity with a known id.
    #[serde(rename_all = "camelCase")]
    CreateSocket {
        /// Socket id.
        id: SocketId,
        /// Owning entity id.
        entity_id: EntityId,
        /// Input or output.
        kind: SocketKind,
        /// Name, unique within the entity.
        name: String,
        /// Offset from the entity's center.
        offset: Vec2,
    },
    /// Drop a socket, cascading to any link touching it.
    #[serde(rename_all = "camelCase")]
    DropSocket {
        /// Socket id.
        id: SocketId,
        /// Owning entity id.
        entity_id: EntityId,
        /// Input or output.
        kind: SocketKind,
        /// Name at drop time.
        name: String,
        /// Offset at drop time.
        offset: Vec2,
    },
    /// Put an entity into a group, detaching it from any previous group.
    #[serde(rename_all = "camelCase")]
    AddToGroup {
        /// Target group id.
        group_id: GroupId,
        /// Entity id.
        entity_id: EntityId,
        /// Group the entity belonged to before, for reversal.
        old_parent_id: Option<GroupId>,
    },
    /// Take an entity out of a group.
    #[serde(rename_all = "camelCase")]
    RemoveFromGroup {
        /// Group id.
        group_id: GroupId,
        /// Entity id.
        entity_id: EntityId,
        /// Group the entity belonged to before, for reversal.
        old_parent_id: Option<GroupId>,
    },
    /// Replace the whole graph with a snapshot. Emitted by batches.
    FromJson {
        /// The snapshot to restore.
        data: Document<T>,
    },
}

/// A reversible unit in the history: do/undo action lists plus a label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command<T> {
    /// Actions that perform this command.
    #[serde(rename = "do")]
    pub do_actions: Vec<Action<T>>,
    /// Actions that reverse this command.
    #[serde(rename = "undo")]
    pub undo_actions: Vec<Action<T>>,
    /// Human-readable label.
    pub label: String,
    /// Millisecond Unix timestamp at record time.
    pub timestamp: u64,
}

/// Millisecond Unix timestamp for history entries.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Bounded undo/redo stacks. Pure log: holds no graph state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History<T> {
    undo_stack: VecDeque<Command<T>>,
    redo_stack: VecDeque<Command<T>>,
    max_depth: usize,
}

impl<T> History<T> {
    /// Create an empty history with the default depth limit.
    pub fn new() -> Self {
        Self::with_max_depth(MAX_HISTORY)
    }

    /// Create an empty history with a custom depth limit.
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_depth,
        }
    }

    /// Append a command. Clears the redo stack (branch-discarding semantics)
    /// and evicts the oldest entry once over the depth limit.
    pub fn push(&mut self, command: Command<T>) {
        self.redo_stack.clear();
        self.undo_stack.push_back(command);
        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
    }

    /// Pop the most recent command for undoing. The caller applies its undo
    /// actions and hands it back via [`History::push_redo`].
    pub fn pop_undo(&mut self) -> Option<Command<T>> {
        self.undo_stack.pop_back()
    }

    /// Pop the most recently undone command for redoing.
    pub fn pop_redo(&mut self) -> Option<Command<T>> {
        self.redo_stack.pop_back()
    }

    /// Park an undone command on the redo stack.
    pub fn push_redo(&mut self, command: Command<T>) {
        self.redo_stack.push_back(command);
    }

    /// Put a redone command back on the undo stack without clearing redo.
    pub fn push_undone(&mut self, command: Command<T>) {
        self.undo_stack.push_back(command);
    }

    /// Whether undo is available.
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Whether redo is available.
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Number of commands on the undo stack.
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Number of commands on the redo stack.
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Label of the next command undo would revert.
    pub fn undo_label(&self) -> Option<&str> {
        self.undo_stack.back().map(|c| c.label.as_str())
    }

    /// Label of the next command redo would re-apply.
    pub fn redo_label(&self) -> Option<&str> {
        self.redo_stack.back().map(|c| c.label.as_str())
    }

    /// Discard all history.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(label: &str) -> Command<Value> {
        Command {
            do_actions: Vec::new(),
            undo_actions: Vec::new(),
            label: label.into(),
            timestamp: now_millis(),
        }
    }

    #[test]
    fn test_push_clears_redo() {
        let mut history: History<Value> = History::new();
        history.push(command("a"));
        let cmd = history.pop_undo().unwrap();
        history.push_redo(cmd);
        assert!(history.can_redo());

        history.push(command("b"));
        assert!(!history.can_redo());
        assert_eq!(history.undo_label(), Some("b"));
    }

    #[test]
    fn test_depth_limit_evicts_oldest() {
        let mut history: History<Value> = History::with_max_depth(3);
        for label in ["a", "b", "c", "d"] {
            history.push(command(label));
        }
        assert_eq!(history.undo_depth(), 3);

        // "a" was evicted; the bottom of the stack is now "b".
        let labels: Vec<String> = std::iter::from_fn(|| history.pop_undo())
            .map(|c| c.label)
            .collect();
        assert_eq!(labels, ["d", "c", "b"]);
    }

    #[test]
    fn test_action_wire_format() {
        let action: Action<Value> = Action::CreateEntity {
            id: EntityId(4),
            inner: Value::Null,
            position: Vec2::new(1.0, 2.0),
            parent_id: None,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "CREATE_ENTITY");
        assert_eq!(json["parentId"], Value::Null);

        let snapshot: Action<Value> = Action::FromJson {
            data: Document {
                entities: Vec::new(),
                links: Vec::new(),
                groups: Vec::new(),
            },
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["type"], "FROM_JSON");
    }

    #[test]
    fn test_round_trips_through_serde() {
        let mut history: History<Value> = History::new();
        history.push(Command {
            do_actions: vec![Action::MoveEntity {
                id: EntityId(1),
                from: Vec2::new(0.0, 0.0),
                to: Vec2::new(5.0, 5.0),
            }],
            undo_actions: vec![Action::MoveEntity {
                id: EntityId(1),
                from: Vec2::new(5.0, 5.0),
                to: Vec2::new(0.0, 0.0),
            }],
            label: "Move Entity".into(),
            timestamp: 12345,
        });

        let json = serde_json::to_string(&history).unwrap();
        let restored: History<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.undo_depth(), 1);
        assert_eq!(restored.undo_label(), Some("Move Entity"));
    }
}
