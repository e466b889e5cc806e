// SPDX-License-Identifier: MIT OR Apache-2.0
//! The context engine: sole owner and mutator of all live graph state.
//!
//! The context integrates the data model, the quadtree spatial index, and the
//! history manager. Every public operation runs synchronously to completion,
//! including listener invocations; re-entrancy is governed by two mode flags
//! (one suppressing history recording, one suppressing index rebuilds) so a
//! nested mutation never produces a duplicate undo entry or a redundant
//! rebuild.

use crate::document::{Document, EntityDoc, GroupDoc, LinkDoc, SocketDoc};
use crate::entity::Entity;
use crate::geom::{Rect, Vec2};
use crate::group::Group;
use crate::history::{now_millis, Action, Command, History, Swap};
use crate::id::{EntityId, GroupId, IdAlloc, LinkId, ListenerHandle, SocketId};
use crate::link::{Link, LinkKind, LinkStyling};
use crate::listeners::Listeners;
use crate::quadtree::QuadTree;
use crate::socket::{Socket, SocketKind};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Initial root boundary of the spatial index. Grows on demand.
const DEFAULT_BOUNDARY: Rect = Rect::new(-1000.0, -1000.0, 2000.0, 2000.0);

/// Why a link could not be created or retargeted.
///
/// Topology violations are values, never panics: callers probe with
/// [`Context::can_link`] or match on the error from [`Context::new_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// One of the sockets does not exist.
    #[error("socket not found: {0}")]
    SocketNotFound(SocketId),

    /// Both ends are the same socket.
    #[error("link endpoints are the same socket")]
    SelfLoop,

    /// Both sockets belong to the same entity.
    #[error("link endpoints belong to the same entity")]
    SameEntity,

    /// Both sockets have the same direction.
    #[error("link endpoints have the same direction")]
    SameKind,

    /// A link already exists between this socket pair, in either direction.
    #[error("a link already exists between these sockets")]
    Duplicate,

    /// Adding the link would create a cycle in the entity graph.
    #[error("link would create a cycle")]
    Cycle,
}

/// Configuration for a new link.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    /// Source socket (must be an output).
    pub from: SocketId,
    /// Target socket (must be an input).
    pub to: SocketId,
    /// Routing style.
    pub kind: LinkKind,
    /// Forced id, for replaying serialized state.
    pub id: Option<LinkId>,
    /// Initial visual styling.
    pub styling: LinkStyling,
    /// Opaque payload.
    pub inner: Value,
}

impl LinkSpec {
    /// A bezier link between two sockets with no styling or payload.
    pub fn new(from: SocketId, to: SocketId) -> Self {
        Self {
            from,
            to,
            kind: LinkKind::Bezier,
            id: None,
            styling: LinkStyling::new(),
            inner: Value::Null,
        }
    }

    /// Set the routing style.
    pub fn kind(mut self, kind: LinkKind) -> Self {
        self.kind = kind;
        self
    }

    /// Force a specific link id.
    pub fn id(mut self, id: LinkId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the initial styling.
    pub fn styling(mut self, styling: LinkStyling) -> Self {
        self.styling = styling;
        self
    }

    /// Set the payload.
    pub fn inner(mut self, inner: Value) -> Self {
        self.inner = inner;
        self
    }
}

/// The central engine owning all live entities, sockets, links, and groups.
///
/// `T` is the opaque per-entity payload; the engine clones it into history
/// actions and snapshots but never inspects it.
pub struct Context<T> {
    entities: IndexMap<EntityId, Entity<T>>,
    sockets: IndexMap<SocketId, Socket>,
    links: IndexMap<LinkId, Link>,
    groups: IndexMap<GroupId, Group>,

    quad_tree: QuadTree<EntityId>,
    history: History<T>,

    entity_ids: IdAlloc,
    socket_ids: IdAlloc,
    link_ids: IdAlloc,
    group_ids: IdAlloc,
    listener_handles: IdAlloc,

    listeners: Listeners<T>,

    applying_history: bool,
    batching_quad_tree: bool,
    in_batch: bool,
}

/// Walk the parent chain, accumulating ancestor offsets. Terminates at the
/// first missing parent (dangling references resolve as far as they can).
fn resolve_world(groups: &IndexMap<GroupId, Group>, local: Vec2, parent: Option<GroupId>) -> Vec2 {
    let mut pos = local;
    let mut current = parent;
    while let Some(gid) = current {
        let Some(group) = groups.get(&gid) else { break };
        pos = pos + group.position;
        current = group.parent_id;
    }
    pos
}

impl<T: Clone> Context<T> {
    /// Create an empty context with the default spatial boundary.
    pub fn new() -> Self {
        Self::with_boundary(DEFAULT_BOUNDARY)
    }

    /// Create an empty context with a custom initial spatial boundary.
    pub fn with_boundary(boundary: Rect) -> Self {
        Self {
            entities: IndexMap::new(),
            sockets: IndexMap::new(),
            links: IndexMap::new(),
            groups: IndexMap::new(),
            quad_tree: QuadTree::new(boundary),
            history: History::new(),
            entity_ids: IdAlloc::default(),
            socket_ids: IdAlloc::default(),
            link_ids: IdAlloc::default(),
            group_ids: IdAlloc::default(),
            listener_handles: IdAlloc::default(),
            listeners: Listeners::default(),
            applying_history: false,
            batching_quad_tree: false,
            in_batch: false,
        }
    }

    // ---------------------------------------------------------------- access

    /// Look up an entity.
    pub fn entity(&self, id: EntityId) -> Option<&Entity<T>> {
        self.entities.get(&id)
    }

    /// Look up an entity mutably.
    ///
    /// Direct position edits bypass the spatial index and move listeners;
    /// use [`Context::move_entity`] for position changes.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity<T>> {
        self.entities.get_mut(&id)
    }

    /// Look up a socket.
    pub fn socket(&self, id: SocketId) -> Option<&Socket> {
        self.sockets.get(&id)
    }

    /// Look up a link.
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    /// Look up a group.
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// All live entities, in creation order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity<T>> {
        self.entities.values()
    }

    /// All live sockets.
    pub fn sockets(&self) -> impl Iterator<Item = &Socket> {
        self.sockets.values()
    }

    /// All live links.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// All live groups.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of live links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Number of live groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// The spatial index, for viewport culling and hit-testing.
    pub fn quad_tree(&self) -> &QuadTree<EntityId> {
        &self.quad_tree
    }

    /// The undo/redo log.
    pub fn history(&self) -> &History<T> {
        &self.history
    }

    /// Resolve a socket by name on a given entity.
    pub fn socket_by_name(&self, entity_id: EntityId, name: &str) -> Option<SocketId> {
        let entity = self.entities.get(&entity_id)?;
        entity
            .sockets
            .iter()
            .find(|sid| self.sockets.get(*sid).is_some_and(|s| s.name == name))
            .copied()
    }

    /// Entities with any indexed point (center or socket) inside the
    /// rectangle, de-duplicated since each entity is indexed once per socket
    /// plus once for its center.
    pub fn entities_in(&self, rect: Rect) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        self.quad_tree
            .query(rect)
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect()
    }

    // ------------------------------------------------------------- positions

    /// An entity's world position: its local position plus all ancestor group
    /// offsets. Recomputed on demand so batched group moves observe the
    /// post-move value. Zero for unknown ids.
    pub fn world_position(&self, id: EntityId) -> Vec2 {
        let Some(entity) = self.entities.get(&id) else {
            return Vec2::default();
        };
        resolve_world(&self.groups, entity.position, entity.parent_id)
    }

    /// A group's world position, accumulated the same way. Zero for unknown
    /// ids.
    pub fn group_world_position(&self, id: GroupId) -> Vec2 {
        let Some(group) = self.groups.get(&id) else {
            return Vec2::default();
        };
        resolve_world(&self.groups, group.position, group.parent_id)
    }

    // -------------------------------------------------------------- entities

    /// Create a new entity at the origin.
    pub fn new_entity(&mut self, inner: T) -> EntityId {
        self.new_entity_with(inner, None, None)
    }

    /// Create a new entity with an optional forced id (for replay) and an
    /// optional enclosing group.
    pub fn new_entity_with(
        &mut self,
        inner: T,
        id: Option<EntityId>,
        parent_id: Option<GroupId>,
    ) -> EntityId {
        let eid = id.unwrap_or_else(|| EntityId(self.entity_ids.allocate()));
        if id.is_some() {
            self.entity_ids.bump(eid.0);
        }

        self.entities.insert(eid, Entity::new(eid, inner));
        let attached = match parent_id {
            Some(gid) => self.attach_to_group(gid, eid),
            None => false,
        };

        let (position, parent_id, inner) = {
            // attach may have been a no-op for an unknown group
            let entity = &self.entities[&eid];
            (entity.position, entity.parent_id, entity.inner.clone())
        };
        self.record(
            vec![Action::CreateEntity {
                id: eid,
                inner: inner.clone(),
                position,
                parent_id,
            }],
            vec![Action::DropEntity {
                id: eid,
                inner,
                position,
                parent_id,
            }],
            "Create Entity",
        );

        if let Some(entity) = self.entities.get(&eid) {
            self.listeners.entity_create.fire(|cb| cb(entity));
        }

        // A successful attach already rebuilt the index with this entity.
        if !self.batching_quad_tree && !attached {
            let pos = self.world_position(eid);
            self.quad_tree.insert(pos, eid);
        }
        eid
    }

    /// Drop an entity, cascading to its sockets and any links touching them,
    /// as one atomic history unit. No-op for unknown ids.
    pub fn drop_entity(&mut self, id: EntityId) -> bool {
        if !self.entities.contains_key(&id) {
            return false;
        }
        self.batch("Drop Entity", |ctx| {
            if let Some(parent) = ctx.entities.get(&id).and_then(|e| e.parent_id) {
                ctx.detach_from_group(parent, id);
            }
            let Some(entity) = ctx.entities.shift_remove(&id) else {
                return;
            };
            for sid in entity.sockets.iter().copied().collect::<Vec<_>>() {
                ctx.drop_socket_inner(sid);
            }
            ctx.entity_ids.release(id.0);
            ctx.listeners.entity_drop.fire(|cb| cb(&entity));
        });
        true
    }

    /// Move an entity to a new local position. Relocates its indexed points
    /// incrementally and fires move listeners with the resolved world
    /// position. Returns false for unknown ids.
    pub fn move_entity(&mut self, id: EntityId, x: f32, y: f32) -> bool {
        let old_world = self.world_position(id);
        let Some(entity) = self.entities.get_mut(&id) else {
            return false;
        };
        let from = entity.position;
        entity.position.set(x, y);
        let to = entity.position;
        let new_world = self.world_position(id);

        if !self.batching_quad_tree {
            self.quad_tree.move_point(old_world, new_world, id);
            if let Some(entity) = self.entities.get(&id) {
                for sid in &entity.sockets {
                    if let Some(socket) = self.sockets.get(sid) {
                        self.quad_tree.move_point(
                            old_world + socket.offset,
                            new_world + socket.offset,
                            id,
                        );
                    }
                }
            }
        }

        self.record(
            vec![Action::MoveEntity { id, from, to }],
            vec![Action::MoveEntity {
                id,
                from: to,
                to: from,
            }],
            "Move Entity",
        );

        if let Some(entity) = self.entities.get(&id) {
            self.listeners.entity_move.fire(|cb| cb(entity, new_world));
        }
        true
    }

    // --------------------------------------------------------------- sockets

    /// Create a socket on an entity. Returns `None` for unknown entities.
    pub fn new_socket(
        &mut self,
        entity_id: EntityId,
        kind: SocketKind,
        name: impl Into<String>,
    ) -> Option<SocketId> {
        self.new_socket_with(entity_id, kind, name, None)
    }

    /// Create a socket with an optional forced id, for replay.
    pub fn new_socket_with(
        &mut self,
        entity_id: EntityId,
        kind: SocketKind,
        name: impl Into<String>,
        id: Option<SocketId>,
    ) -> Option<SocketId> {
        if !self.entities.contains_key(&entity_id) {
            return None;
        }
        let sid = id.unwrap_or_else(|| SocketId(self.socket_ids.allocate()));
        if id.is_some() {
            self.socket_ids.bump(sid.0);
        }

        let socket = Socket::new(sid, entity_id, kind, name);
        let offset = socket.offset;
        let name = socket.name.clone();
        self.sockets.insert(sid, socket);
        if let Some(entity) = self.entities.get_mut(&entity_id) {
            entity.sockets.insert(sid);
        }

        self.record(
            vec![Action::CreateSocket {
                id: sid,
                entity_id,
                kind,
                name: name.clone(),
                offset,
            }],
            vec![Action::DropSocket {
                id: sid,
                entity_id,
                kind,
                name,
                offset,
            }],
            "Create Socket",
        );

        if let Some(socket) = self.sockets.get(&sid) {
            self.listeners.socket_create.fire(|cb| cb(socket));
        }

        if !self.batching_quad_tree {
            let pos = self.world_position(entity_id) + offset;
            self.quad_tree.insert(pos, entity_id);
        }
        Some(sid)
    }

    /// Drop a socket, cascading to any link touching it, as one atomic
    /// history unit. No-op for unknown ids.
    pub fn drop_socket(&mut self, id: SocketId) -> bool {
        if !self.sockets.contains_key(&id) {
            return false;
        }
        self.batch("Drop Socket", |ctx| ctx.drop_socket_inner(id));
        true
    }

    /// Non-batching half of a socket drop; always runs inside a batch.
    fn drop_socket_inner(&mut self, id: SocketId) {
        let Some(socket) = self.sockets.shift_remove(&id) else {
            return;
        };
        if let Some(entity) = self.entities.get_mut(&socket.entity_id) {
            entity.sockets.shift_remove(&id);
        }

        let touching: Vec<LinkId> = self
            .links
            .values()
            .filter(|l| l.touches(id))
            .map(|l| l.id)
            .collect();
        for lid in touching {
            self.drop_link(lid);
        }

        self.socket_ids.release(id.0);
        self.listeners.socket_drop.fire(|cb| cb(&socket));
    }

    /// Reposition a socket relative to its entity's center. Fires socket
    /// move listeners. Returns false for unknown ids.
    pub fn set_socket_offset(&mut self, id: SocketId, offset: Vec2) -> bool {
        let Some(socket) = self.sockets.get(&id) else {
            return false;
        };
        let entity_id = socket.entity_id;
        let old_offset = socket.offset;
        let world = self.world_position(entity_id);

        if let Some(socket) = self.sockets.get_mut(&id) {
            socket.offset = offset;
        }
        if !self.batching_quad_tree {
            self.quad_tree
                .move_point(world + old_offset, world + offset, entity_id);
        }
        if let Some(socket) = self.sockets.get(&id) {
            self.listeners.socket_move.fire(|cb| cb(socket));
        }
        true
    }

    /// Set a socket's value and propagate it through outgoing links.
    ///
    /// Output values are pushed to every input reachable via a direct link,
    /// recursively. A per-call visited set guarantees termination even if a
    /// cycle were ever introduced past validation.
    pub fn set_socket_value(&mut self, id: SocketId, value: Value) {
        let mut visited = HashSet::new();
        self.propagate_value(id, value, &mut visited);
    }

    fn propagate_value(&mut self, id: SocketId, value: Value, visited: &mut HashSet<SocketId>) {
        if !visited.insert(id) {
            return;
        }
        let Some(socket) = self.sockets.get_mut(&id) else {
            return;
        };
        socket.value = value.clone();
        let kind = socket.kind;

        if let Some(socket) = self.sockets.get(&id) {
            self.listeners.socket_value.fire(|cb| cb(socket, &value));
        }

        if kind == SocketKind::Output {
            let targets: Vec<SocketId> = self
                .links
                .values()
                .filter(|l| l.from == id)
                .map(|l| l.to)
                .collect();
            for target in targets {
                self.propagate_value(target, value.clone(), visited);
            }
        }
    }

    // ----------------------------------------------------------------- links

    /// Whether a link between these sockets would be accepted.
    pub fn can_link(&self, from: SocketId, to: SocketId) -> bool {
        self.check_link(from, to).is_ok()
    }

    /// Validate a prospective link without creating it.
    fn check_link(&self, from: SocketId, to: SocketId) -> Result<(), LinkError> {
        let from_socket = self
            .sockets
            .get(&from)
            .ok_or(LinkError::SocketNotFound(from))?;
        let to_socket = self.sockets.get(&to).ok_or(LinkError::SocketNotFound(to))?;

        if from == to {
            return Err(LinkError::SelfLoop);
        }
        if from_socket.entity_id == to_socket.entity_id {
            return Err(LinkError::SameEntity);
        }
        if from_socket.kind == to_socket.kind {
            return Err(LinkError::SameKind);
        }
        if self
            .links
            .values()
            .any(|l| (l.from == from && l.to == to) || (l.from == to && l.to == from))
        {
            return Err(LinkError::Duplicate);
        }
        if self.creates_cycle(from_socket.entity_id, to_socket.entity_id) {
            return Err(LinkError::Cycle);
        }
        Ok(())
    }

    /// Iterative depth-first search from the target's entity, following only
    /// outgoing links, looking for a path back to the source's entity.
    fn creates_cycle(&self, from_entity: EntityId, to_entity: EntityId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![to_entity];

        while let Some(current) = stack.pop() {
            if current == from_entity {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            let Some(entity) = self.entities.get(&current) else {
                continue;
            };
            for sid in &entity.sockets {
                let is_output = self
                    .sockets
                    .get(sid)
                    .is_some_and(|s| s.kind == SocketKind::Output);
                if !is_output {
                    continue;
                }
                for link in self.links.values() {
                    if link.from == *sid {
                        if let Some(target) = self.sockets.get(&link.to) {
                            stack.push(target.entity_id);
                        }
                    }
                }
            }
        }
        false
    }

    /// Create a bezier link between two sockets.
    pub fn new_link(&mut self, from: SocketId, to: SocketId) -> Result<LinkId, LinkError> {
        self.new_link_with(LinkSpec::new(from, to))
    }

    /// Create a link from a full specification.
    ///
    /// Rejects self-loops, same-entity and same-kind pairs, duplicates, and
    /// cycles. On success, a non-null source value propagates to the target
    /// immediately.
    pub fn new_link_with(&mut self, spec: LinkSpec) -> Result<LinkId, LinkError> {
        self.check_link(spec.from, spec.to)?;

        let lid = spec.id.unwrap_or_else(|| LinkId(self.link_ids.allocate()));
        if spec.id.is_some() {
            self.link_ids.bump(lid.0);
        }

        let mut link = Link::new(lid, spec.from, spec.to, spec.kind, spec.inner);
        link.styling = spec.styling;
        self.links.insert(lid, link);

        let (styling, inner) = match self.links.get(&lid) {
            Some(link) => (link.styling.clone(), link.inner.clone()),
            None => (LinkStyling::new(), Value::Null),
        };
        self.record(
            vec![Action::CreateLink {
                id: lid,
                from: spec.from,
                to: spec.to,
                kind: spec.kind,
                styling: styling.clone(),
                inner: inner.clone(),
            }],
            vec![Action::DropLink {
                id: lid,
                from: spec.from,
                to: spec.to,
                kind: spec.kind,
                styling,
                inner,
            }],
            "Create Link",
        );

        let source_value = self
            .sockets
            .get(&spec.from)
            .map(|s| s.value.clone())
            .unwrap_or(Value::Null);
        if !source_value.is_null() {
            self.set_socket_value(spec.to, source_value);
        }

        if let Some(link) = self.links.get(&lid) {
            self.listeners.link_create.fire(|cb| cb(link));
        }
        Ok(lid)
    }

    /// Drop a link. No-op for unknown ids.
    pub fn drop_link(&mut self, id: LinkId) -> bool {
        let Some(link) = self.links.shift_remove(&id) else {
            return false;
        };
        self.record(
            vec![Action::DropLink {
                id,
                from: link.from,
                to: link.to,
                kind: link.kind,
                styling: link.styling.clone(),
                inner: link.inner.clone(),
            }],
            vec![Action::CreateLink {
                id,
                from: link.from,
                to: link.to,
                kind: link.kind,
                styling: link.styling.clone(),
                inner: link.inner.clone(),
            }],
            "Drop Link",
        );
        self.link_ids.release(id.0);
        self.listeners.link_drop.fire(|cb| cb(&link));
        true
    }

    /// Retarget a link's endpoints. The new endpoints are validated like a
    /// new link; invalid or no-op retargets return false.
    pub fn update_link(
        &mut self,
        id: LinkId,
        from: Option<SocketId>,
        to: Option<SocketId>,
    ) -> bool {
        let Some(link) = self.links.get(&id) else {
            return false;
        };
        let (old_from, old_to) = (link.from, link.to);
        let new_from = from.unwrap_or(old_from);
        let new_to = to.unwrap_or(old_to);
        if new_from == old_from && new_to == old_to {
            return false;
        }
        if self.check_link(new_from, new_to).is_err() {
            return false;
        }

        self.record(
            vec![Action::UpdateLink {
                id,
                from: Swap {
                    old: old_from,
                    new: new_from,
                },
                to: Swap {
                    old: old_to,
                    new: new_to,
                },
                waypoints: None,
            }],
            vec![Action::UpdateLink {
                id,
                from: Swap {
                    old: new_from,
                    new: old_from,
                },
                to: Swap {
                    old: new_to,
                    new: old_to,
                },
                waypoints: None,
            }],
            "Update Link",
        );

        if let Some(link) = self.links.get_mut(&id) {
            link.from = new_from;
            link.to = new_to;
        }
        if let Some(link) = self.links.get(&id) {
            self.listeners.link_update.fire(|cb| cb(link));
        }
        true
    }

    /// Replace a link's routing waypoints. Returns false for unknown ids.
    pub fn set_link_waypoints(&mut self, id: LinkId, waypoints: Vec<Vec2>) -> bool {
        let Some(link) = self.links.get(&id) else {
            return false;
        };
        let endpoints = (link.from, link.to);
        let old_waypoints = link.waypoints.clone();

        self.record(
            vec![Action::UpdateLink {
                id,
                from: Swap {
                    old: endpoints.0,
                    new: endpoints.0,
                },
                to: Swap {
                    old: endpoints.1,
                    new: endpoints.1,
                },
                waypoints: Some(Swap {
                    old: old_waypoints.clone(),
                    new: waypoints.clone(),
                }),
            }],
            vec![Action::UpdateLink {
                id,
                from: Swap {
                    old: endpoints.0,
                    new: endpoints.0,
                },
                to: Swap {
                    old: endpoints.1,
                    new: endpoints.1,
                },
                waypoints: Some(Swap {
                    old: waypoints.clone(),
                    new: old_waypoints,
                }),
            }],
            "Update Link Routing",
        );

        if let Some(link) = self.links.get_mut(&id) {
            link.waypoints = waypoints;
        }
        if let Some(link) = self.links.get(&id) {
            self.listeners.link_update.fire(|cb| cb(link));
        }
        true
    }

    /// Merge styling keys into a link's styling. Unchanged merges
    /// short-circuit without recording history. Returns false for unknown
    /// ids or no-op patches.
    pub fn update_link_styling(&mut self, id: LinkId, patch: LinkStyling) -> bool {
        let Some(link) = self.links.get(&id) else {
            return false;
        };
        let old_styling = link.styling.clone();
        let mut new_styling = old_styling.clone();
        for (key, value) in patch {
            new_styling.insert(key, value);
        }
        if new_styling == old_styling {
            return false;
        }

        self.record(
            vec![Action::UpdateLinkStyling {
                id,
                from: old_styling.clone(),
                to: new_styling.clone(),
            }],
            vec![Action::UpdateLinkStyling {
                id,
                from: new_styling.clone(),
                to: old_styling,
            }],
            "Update Link Styling",
        );

        if let Some(link) = self.links.get_mut(&id) {
            link.styling = new_styling;
        }
        if let Some(link) = self.links.get(&id) {
            self.listeners.link_update.fire(|cb| cb(link));
        }
        true
    }

    // ---------------------------------------------------------------- groups

    /// Create a new group at the origin.
    pub fn new_group(&mut self, name: impl Into<String>) -> GroupId {
        self.new_group_with(name, None)
    }

    /// Create a new group with an optional forced id, for replay.
    ///
    /// Group creation is outside the action vocabulary and therefore not
    /// individually undoable; callers wanting reversible group edits wrap
    /// them in [`Context::batch`].
    pub fn new_group_with(&mut self, name: impl Into<String>, id: Option<GroupId>) -> GroupId {
        let gid = id.unwrap_or_else(|| GroupId(self.group_ids.allocate()));
        if id.is_some() {
            self.group_ids.bump(gid.0);
        }
        self.groups.insert(gid, Group::new(gid, name));

        if let Some(group) = self.groups.get(&gid) {
            self.listeners.group_create.fire(|cb| cb(group));
        }
        gid
    }

    /// Drop a group, detaching (not deleting) its member entities and nested
    /// groups. No-op for unknown ids.
    pub fn drop_group(&mut self, id: GroupId) -> bool {
        let Some(group) = self.groups.shift_remove(&id) else {
            return false;
        };
        if let Some(parent) = group.parent_id {
            if let Some(parent_group) = self.groups.get_mut(&parent) {
                parent_group.groups.shift_remove(&id);
            }
        }
        for eid in &group.entities {
            if let Some(entity) = self.entities.get_mut(eid) {
                entity.parent_id = None;
            }
        }
        for gid in &group.groups {
            if let Some(child) = self.groups.get_mut(gid) {
                child.parent_id = None;
            }
        }

        self.group_ids.release(id.0);
        self.listeners.group_drop.fire(|cb| cb(&group));
        self.rebuild_index();
        true
    }

    /// Put an entity into a group, detaching it from any previous group
    /// first. No-op unless both exist.
    pub fn add_to_group(&mut self, group_id: GroupId, entity_id: EntityId) -> bool {
        let old_parent_id = match self.entities.get(&entity_id) {
            Some(entity) if self.groups.contains_key(&group_id) => entity.parent_id,
            _ => return false,
        };
        if old_parent_id == Some(group_id) {
            return false;
        }

        let undo = match old_parent_id {
            Some(old) => Action::AddToGroup {
                group_id: old,
                entity_id,
                old_parent_id: Some(group_id),
            },
            None => Action::RemoveFromGroup {
                group_id,
                entity_id,
                old_parent_id: None,
            },
        };
        self.record(
            vec![Action::AddToGroup {
                group_id,
                entity_id,
                old_parent_id,
            }],
            vec![undo],
            "Add To Group",
        );

        self.attach_to_group(group_id, entity_id)
    }

    /// Take an entity out of a group. No-op unless both exist and the entity
    /// is a member.
    pub fn remove_from_group(&mut self, group_id: GroupId, entity_id: EntityId) -> bool {
        let is_member = self
            .entities
            .get(&entity_id)
            .is_some_and(|e| e.parent_id == Some(group_id))
            && self.groups.contains_key(&group_id);
        if !is_member {
            return false;
        }

        self.record(
            vec![Action::RemoveFromGroup {
                group_id,
                entity_id,
                old_parent_id: Some(group_id),
            }],
            vec![Action::AddToGroup {
                group_id,
                entity_id,
                old_parent_id: None,
            }],
            "Remove From Group",
        );

        self.detach_from_group(group_id, entity_id)
    }

    /// Membership change without history recording; replay and internal
    /// paths come through here.
    fn attach_to_group(&mut self, group_id: GroupId, entity_id: EntityId) -> bool {
        if !self.groups.contains_key(&group_id) || !self.entities.contains_key(&entity_id) {
            return false;
        }
        if let Some(old) = self.entities.get(&entity_id).and_then(|e| e.parent_id) {
            self.detach_from_group(old, entity_id);
        }
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.entities.insert(entity_id);
        }
        if let Some(entity) = self.entities.get_mut(&entity_id) {
            entity.parent_id = Some(group_id);
        }
        self.rebuild_index();
        true
    }

    fn detach_from_group(&mut self, group_id: GroupId, entity_id: EntityId) -> bool {
        if !self.groups.contains_key(&group_id) || !self.entities.contains_key(&entity_id) {
            return false;
        }
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.entities.shift_remove(&entity_id);
        }
        if let Some(entity) = self.entities.get_mut(&entity_id) {
            entity.parent_id = None;
        }
        self.rebuild_index();
        true
    }

    /// Nest a group inside another, detaching it from any previous parent
    /// first. Self-nesting is rejected; reparent-detach keeps the group
    /// hierarchy acyclic.
    pub fn add_group_to_group(&mut self, parent_id: GroupId, child_id: GroupId) -> bool {
        if parent_id == child_id
            || !self.groups.contains_key(&parent_id)
            || !self.groups.contains_key(&child_id)
        {
            return false;
        }
        if let Some(old) = self.groups.get(&child_id).and_then(|g| g.parent_id) {
            self.remove_group_from_group(old, child_id);
        }
        if let Some(parent) = self.groups.get_mut(&parent_id) {
            parent.groups.insert(child_id);
        }
        if let Some(child) = self.groups.get_mut(&child_id) {
            child.parent_id = Some(parent_id);
        }
        self.rebuild_index();
        true
    }

    /// Un-nest a group from its parent.
    pub fn remove_group_from_group(&mut self, parent_id: GroupId, child_id: GroupId) -> bool {
        if !self.groups.contains_key(&parent_id) || !self.groups.contains_key(&child_id) {
            return false;
        }
        if let Some(parent) = self.groups.get_mut(&parent_id) {
            parent.groups.shift_remove(&child_id);
        }
        if let Some(child) = self.groups.get_mut(&child_id) {
            child.parent_id = None;
        }
        self.rebuild_index();
        true
    }

    /// Offset a group's local position, notifying move listeners for every
    /// entity transitively inside it with its fresh world position. The
    /// spatial index is rebuilt once at the end rather than churned per
    /// entity.
    pub fn move_group(&mut self, id: GroupId, dx: f32, dy: f32) -> bool {
        let Some(group) = self.groups.get_mut(&id) else {
            return false;
        };
        let from = group.position;
        group.position = from.offset_by(dx, dy);
        let to = group.position;

        self.record(
            vec![Action::MoveGroup { id, from, to }],
            vec![Action::MoveGroup {
                id,
                from: to,
                to: from,
            }],
            "Move Group",
        );

        let was_batching = self.batching_quad_tree;
        self.batching_quad_tree = true;

        let mut member_entities = Vec::new();
        let mut stack = vec![id];
        while let Some(gid) = stack.pop() {
            let Some(group) = self.groups.get(&gid) else {
                continue;
            };
            member_entities.extend(group.entities.iter().copied());
            stack.extend(group.groups.iter().copied());
        }
        for eid in member_entities {
            let pos = self.world_position(eid);
            if let Some(entity) = self.entities.get(&eid) {
                self.listeners.entity_move.fire(|cb| cb(entity, pos));
            }
        }

        self.batching_quad_tree = was_batching;
        self.rebuild_index();
        true
    }

    // --------------------------------------------------------------- history

    /// Record a custom reversible command. Suppressed while history is being
    /// applied or a batch is open.
    pub fn record(
        &mut self,
        do_actions: Vec<Action<T>>,
        undo_actions: Vec<Action<T>>,
        label: &str,
    ) {
        if self.applying_history || self.in_batch {
            return;
        }
        self.history.push(Command {
            do_actions,
            undo_actions,
            label: label.to_owned(),
            timestamp: now_millis(),
        });
    }

    /// Run `f` as a single atomic transaction.
    ///
    /// Per-operation history recording and spatial-index updates are
    /// suspended inside the batch; on completion the index is rebuilt once
    /// and a single snapshot-based command (whole-graph before/after) lands
    /// in history. Nested batches collapse into the outermost one.
    pub fn batch(&mut self, label: &str, f: impl FnOnce(&mut Self)) {
        if self.in_batch {
            f(self);
            return;
        }

        let was_applying = self.applying_history;
        let was_batching = self.batching_quad_tree;
        let before = (!was_applying).then(|| self.to_document());

        self.in_batch = true;
        self.applying_history = true;
        self.batching_quad_tree = true;

        f(self);

        self.batching_quad_tree = was_batching;
        self.rebuild_index();
        self.applying_history = was_applying;
        self.in_batch = false;

        if let Some(before) = before {
            let after = self.to_document();
            self.history.push(Command {
                do_actions: vec![Action::FromJson { data: after }],
                undo_actions: vec![Action::FromJson { data: before }],
                label: label.to_owned(),
                timestamp: now_millis(),
            });
        }
    }

    /// Revert the most recent command. Returns false when there is nothing
    /// to undo.
    pub fn undo(&mut self) -> bool {
        let Some(command) = self.history.pop_undo() else {
            return false;
        };
        self.apply(command.undo_actions.clone());
        self.history.push_redo(command);
        true
    }

    /// Re-apply the most recently undone command. Returns false when there
    /// is nothing to redo.
    pub fn redo(&mut self) -> bool {
        let Some(command) = self.history.pop_redo() else {
            return false;
        };
        self.apply(command.do_actions.clone());
        self.history.push_undone(command);
        true
    }

    /// Apply a list of actions as one non-incremental change: history
    /// recording and index updates are suspended throughout, the index is
    /// rebuilt once, and bulk-change listeners fire at the end.
    ///
    /// This is the sole mutation path for undo/redo and external patches.
    pub fn apply(&mut self, actions: Vec<Action<T>>) {
        let was_applying = self.applying_history;
        let was_batching = self.batching_quad_tree;
        self.applying_history = true;
        self.batching_quad_tree = true;

        for action in actions {
            self.apply_action(action);
        }

        self.batching_quad_tree = was_batching;
        self.rebuild_index();
        self.applying_history = was_applying;
        self.notify_bulk_change();
    }

    fn apply_action(&mut self, action: Action<T>) {
        match action {
            Action::FromJson { data } => self.from_document(data),
            Action::MoveEntity { id, to, .. } => {
                if let Some(entity) = self.entities.get_mut(&id) {
                    entity.position = to;
                }
                // Move listeners still fire during replay; only the index
                // update waits for the rebuild.
                let world = self.world_position(id);
                if let Some(entity) = self.entities.get(&id) {
                    self.listeners.entity_move.fire(|cb| cb(entity, world));
                }
            }
            Action::MoveGroup { id, from, to } => {
                if self.groups.contains_key(&id) {
                    self.move_group(id, to.x - from.x, to.y - from.y);
                }
            }
            Action::CreateEntity {
                id,
                inner,
                position,
                parent_id,
            } => {
                let mut entity = Entity::new(id, inner);
                entity.position = position;
                self.entities.insert(id, entity);
                self.entity_ids.bump(id.0);
                if let Some(gid) = parent_id {
                    self.attach_to_group(gid, id);
                }
                if let Some(entity) = self.entities.get(&id) {
                    self.listeners.entity_create.fire(|cb| cb(entity));
                }
            }
            Action::DropEntity { id, .. } => {
                self.drop_entity(id);
            }
            Action::CreateLink {
                id,
                from,
                to,
                kind,
                styling,
                inner,
            } => {
                if self.sockets.contains_key(&from) && self.sockets.contains_key(&to) {
                    let mut link = Link::new(id, from, to, kind, inner);
                    link.styling = styling;
                    self.links.insert(id, link);
                    self.link_ids.bump(id.0);
                    if let Some(link) = self.links.get(&id) {
                        self.listeners.link_create.fire(|cb| cb(link));
                    }
                }
            }
            Action::DropLink { id, .. } => {
                self.drop_link(id);
            }
            Action::UpdateLink {
                id,
                from,
                to,
                waypoints,
            } => {
                if let Some(link) = self.links.get_mut(&id) {
                    link.from = from.new;
                    link.to = to.new;
                    if let Some(swap) = waypoints {
                        link.waypoints = swap.new;
                    }
                }
                if let Some(link) = self.links.get(&id) {
                    self.listeners.link_update.fire(|cb| cb(link));
                }
            }
            Action::UpdateLinkStyling { id, to, .. } => {
                if let Some(link) = self.links.get_mut(&id) {
                    link.styling = to;
                }
                if let Some(link) = self.links.get(&id) {
                    self.listeners.link_update.fire(|cb| cb(link));
                }
            }
            Action::CreateSocket {
                id,
                entity_id,
                kind,
                name,
                offset,
            } => {
                if self.entities.contains_key(&entity_id) {
                    let mut socket = Socket::new(id, entity_id, kind, name);
                    socket.offset = offset;
                    self.sockets.insert(id, socket);
                    if let Some(entity) = self.entities.get_mut(&entity_id) {
                        entity.sockets.insert(id);
                    }
                    self.socket_ids.bump(id.0);
                    if let Some(socket) = self.sockets.get(&id) {
                        self.listeners.socket_create.fire(|cb| cb(socket));
                    }
                }
            }
            Action::DropSocket { id, .. } => {
                self.drop_socket(id);
            }
            Action::AddToGroup {
                group_id,
                entity_id,
                ..
            } => {
                self.attach_to_group(group_id, entity_id);
            }
            Action::RemoveFromGroup {
                group_id,
                entity_id,
                ..
            } => {
                self.detach_from_group(group_id, entity_id);
            }
        }
    }

    // ----------------------------------------------------------------- index

    /// Rebuild the spatial index from scratch: one point per entity center
    /// plus one per socket, all keyed by the entity's id. Suspended while a
    /// batch or apply is in flight.
    pub fn rebuild_index(&mut self) {
        if self.batching_quad_tree {
            return;
        }

        let mut points: Vec<(Vec2, EntityId)> = Vec::new();
        for entity in self.entities.values() {
            let world = resolve_world(&self.groups, entity.position, entity.parent_id);
            points.push((world, entity.id));
            for sid in &entity.sockets {
                if let Some(socket) = self.sockets.get(sid) {
                    points.push((world + socket.offset, entity.id));
                }
            }
        }

        self.quad_tree.clear();
        for (pos, id) in points {
            self.quad_tree.insert(pos, id);
        }
    }

    // ------------------------------------------------------------- listeners

    fn next_handle(&mut self) -> ListenerHandle {
        self.listener_handles.allocate()
    }

    /// Listen for entity creation.
    pub fn register_entity_create_listener(
        &mut self,
        cb: impl FnMut(&Entity<T>) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.entity_create.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for entity deletion.
    pub fn register_entity_drop_listener(
        &mut self,
        cb: impl FnMut(&Entity<T>) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.entity_drop.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for entity moves; the callback receives the new world position.
    pub fn register_entity_move_listener(
        &mut self,
        cb: impl FnMut(&Entity<T>, Vec2) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.entity_move.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for socket creation.
    pub fn register_socket_create_listener(
        &mut self,
        cb: impl FnMut(&Socket) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.socket_create.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for socket deletion.
    pub fn register_socket_drop_listener(
        &mut self,
        cb: impl FnMut(&Socket) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.socket_drop.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for socket offset changes.
    pub fn register_socket_move_listener(
        &mut self,
        cb: impl FnMut(&Socket) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.socket_move.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for socket value changes, including propagated ones.
    pub fn register_socket_value_listener(
        &mut self,
        cb: impl FnMut(&Socket, &Value) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.socket_value.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for link creation.
    pub fn register_link_create_listener(
        &mut self,
        cb: impl FnMut(&Link) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.link_create.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for link deletion.
    pub fn register_link_drop_listener(
        &mut self,
        cb: impl FnMut(&Link) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.link_drop.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for link updates: retargets, waypoint edits, styling changes.
    pub fn register_link_update_listener(
        &mut self,
        cb: impl FnMut(&Link) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.link_update.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for group creation.
    pub fn register_group_create_listener(
        &mut self,
        cb: impl FnMut(&Group) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.group_create.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for group deletion.
    pub fn register_group_drop_listener(
        &mut self,
        cb: impl FnMut(&Group) + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.group_drop.insert(handle, Box::new(cb));
        handle
    }

    /// Listen for bulk changes (undo/redo, patch application), for consumers
    /// that resync derived state wholesale instead of per mutation.
    pub fn register_bulk_change_listener(
        &mut self,
        cb: impl FnMut() + 'static,
    ) -> ListenerHandle {
        let handle = self.next_handle();
        self.listeners.bulk_change.insert(handle, Box::new(cb));
        handle
    }

    /// Remove a listener by handle, whichever event class it belongs to, and
    /// recycle the handle. Returns false for unknown handles.
    pub fn unregister_listener(&mut self, handle: ListenerHandle) -> bool {
        if self.listeners.unregister(handle) {
            self.listener_handles.release(handle);
            return true;
        }
        false
    }

    /// Fire all bulk-change listeners.
    pub fn notify_bulk_change(&mut self) {
        self.listeners.bulk_change.fire(|cb| cb());
    }

    // --------------------------------------------------------- serialization

    /// Snapshot the whole graph into a serializable document.
    pub fn to_document(&self) -> Document<T> {
        Document {
            entities: self
                .entities
                .values()
                .map(|entity| EntityDoc {
                    id: entity.id,
                    position: entity.position,
                    inner: entity.inner.clone(),
                    parent_id: entity.parent_id,
                    sockets: entity
                        .sockets
                        .iter()
                        .filter_map(|sid| self.sockets.get(sid))
                        .map(|socket| SocketDoc {
                            id: socket.id,
                            kind: socket.kind,
                            name: socket.name.clone(),
                            offset: socket.offset,
                        })
                        .collect(),
                })
                .collect(),
            links: self
                .links
                .values()
                .map(|link| LinkDoc {
                    id: link.id,
                    from: link.from,
                    to: link.to,
                    kind: link.kind,
                    styling: link.styling.clone(),
                    waypoints: link.waypoints.clone(),
                    inner: link.inner.clone(),
                })
                .collect(),
            groups: self
                .groups
                .values()
                .map(|group| GroupDoc {
                    id: group.id,
                    name: group.name.clone(),
                    entities: group.entities.iter().copied().collect(),
                    groups: group.groups.iter().copied().collect(),
                    position: group.position,
                    parent_id: group.parent_id,
                })
                .collect(),
        }
    }

    /// Replace the whole graph with a document's contents.
    ///
    /// Clears all maps, resets id counters to one past the highest id seen,
    /// and rebuilds the spatial index. History is kept. Internally
    /// inconsistent entries (links referencing missing sockets, memberships
    /// naming missing elements) are skipped with a warning rather than
    /// raising, and a parent reference missing from its group's member set
    /// is reinstated there.
    pub fn from_document(&mut self, doc: Document<T>) {
        self.entities.clear();
        self.sockets.clear();
        self.links.clear();
        self.groups.clear();
        self.entity_ids.reset();
        self.socket_ids.reset();
        self.link_ids.reset();
        self.group_ids.reset();

        let group_ids: HashSet<GroupId> = doc.groups.iter().map(|g| g.id).collect();

        for entity_doc in doc.entities {
            let mut entity = Entity::new(entity_doc.id, entity_doc.inner);
            entity.position = entity_doc.position;
            entity.parent_id = match entity_doc.parent_id {
                Some(gid) if group_ids.contains(&gid) => Some(gid),
                Some(gid) => {
                    tracing::warn!(entity = %entity_doc.id, group = %gid, "dropping dangling parent reference");
                    None
                }
                None => None,
            };
            self.entity_ids.bump(entity_doc.id.0);

            for socket_doc in entity_doc.sockets {
                let mut socket =
                    Socket::new(socket_doc.id, entity_doc.id, socket_doc.kind, socket_doc.name);
                socket.offset = socket_doc.offset;
                entity.sockets.insert(socket_doc.id);
                self.sockets.insert(socket_doc.id, socket);
                self.socket_ids.bump(socket_doc.id.0);
            }
            self.entities.insert(entity_doc.id, entity);
        }

        for link_doc in doc.links {
            if !self.sockets.contains_key(&link_doc.from)
                || !self.sockets.contains_key(&link_doc.to)
            {
                tracing::warn!(link = %link_doc.id, "skipping link with missing sockets");
                continue;
            }
            let mut link = Link::new(
                link_doc.id,
                link_doc.from,
                link_doc.to,
                link_doc.kind,
                link_doc.inner,
            );
            link.styling = link_doc.styling;
            link.waypoints = link_doc.waypoints;
            self.links.insert(link_doc.id, link);
            self.link_ids.bump(link_doc.id.0);
        }

        for group_doc in doc.groups {
            let mut group = Group::new(group_doc.id, group_doc.name);
            group.position = group_doc.position;
            group.parent_id = group_doc.parent_id.filter(|gid| group_ids.contains(gid));
            for eid in group_doc.entities {
                if self.entities.contains_key(&eid) {
                    group.entities.insert(eid);
                } else {
                    tracing::warn!(group = %group_doc.id, entity = %eid, "skipping unknown group member");
                }
            }
            for gid in group_doc.groups {
                if group_ids.contains(&gid) {
                    group.groups.insert(gid);
                } else {
                    tracing::warn!(group = %group_doc.id, nested = %gid, "skipping unknown nested group");
                }
            }
            self.groups.insert(group_doc.id, group);
            self.group_ids.bump(group_doc.id.0);
        }

        // One-sided documents may name a parent whose member set omits the
        // entity; the parent reference is authoritative.
        let memberships: Vec<(EntityId, GroupId)> = self
            .entities
            .values()
            .filter_map(|e| e.parent_id.map(|gid| (e.id, gid)))
            .collect();
        for (eid, gid) in memberships {
            if let Some(group) = self.groups.get_mut(&gid) {
                if group.entities.insert(eid) {
                    tracing::warn!(entity = %eid, group = %gid, "restoring missing group membership");
                }
            }
        }

        self.rebuild_index();
    }

    /// Serialize the graph to a JSON value.
    pub fn to_json(&self) -> Value
    where
        T: Serialize,
    {
        serde_json::to_value(self.to_document()).unwrap_or(Value::Null)
    }

    /// Replace the graph from a JSON value produced by [`Context::to_json`].
    pub fn from_json(&mut self, value: Value) -> Result<(), serde_json::Error>
    where
        T: DeserializeOwned,
    {
        let doc: Document<T> = serde_json::from_value(value)?;
        self.from_document(doc);
        Ok(())
    }
}

impl<T: Clone> Default for Context<T> {
    fn default() -> Self {
        Self::new()
    }
}
