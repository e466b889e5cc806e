// SPDX-License-Identifier: MIT OR Apache-2.0
//! Listener registries with recyclable integer handles.
//!
//! This is a manual event bus: each event class has its own registry keyed by
//! a monotonically allocated handle, and handles are recycled through the
//! context's free-list once unregistered. Callbacks fire synchronously in
//! registration order; a panicking callback is logged and skipped so one
//! observer can never break the engine or its peers.

use crate::entity::Entity;
use crate::geom::Vec2;
use crate::group::Group;
use crate::id::ListenerHandle;
use crate::link::Link;
use crate::socket::Socket;
use indexmap::IndexMap;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Callback fired when an entity is created or dropped.
pub type EntityListener<T> = Box<dyn FnMut(&Entity<T>)>;
/// Callback fired when an entity moves, with its new world position.
pub type EntityMoveListener<T> = Box<dyn FnMut(&Entity<T>, Vec2)>;
/// Callback fired when a socket is created, dropped, or moved.
pub type SocketListener = Box<dyn FnMut(&Socket)>;
/// Callback fired when a socket's value changes.
pub type SocketValueListener = Box<dyn FnMut(&Socket, &Value)>;
/// Callback fired when a link is created, dropped, or updated.
pub type LinkListener = Box<dyn FnMut(&Link)>;
/// Callback fired when a group is created or dropped.
pub type GroupListener = Box<dyn FnMut(&Group)>;
/// Callback fired after a bulk, non-incremental change (undo/redo, patch
/// application) so derived state can resync wholesale.
pub type BulkChangeListener = Box<dyn FnMut()>;

/// One event class worth of callbacks, in registration order.
pub(crate) struct Registry<F> {
    slots: IndexMap<ListenerHandle, F>,
}

impl<F> Registry<F> {
    pub(crate) fn insert(&mut self, handle: ListenerHandle, callback: F) {
        self.slots.insert(handle, callback);
    }

    /// Remove a callback, preserving the registration order of the rest.
    pub(crate) fn remove(&mut self, handle: ListenerHandle) -> bool {
        self.slots.shift_remove(&handle).is_some()
    }

    /// Invoke every callback, isolating panics per callback.
    pub(crate) fn fire(&mut self, mut invoke: impl FnMut(&mut F)) {
        for (handle, callback) in &mut self.slots {
            if catch_unwind(AssertUnwindSafe(|| invoke(callback))).is_err() {
                tracing::error!(handle = *handle, "listener panicked; skipping");
            }
        }
    }
}

impl<F> Default for Registry<F> {
    fn default() -> Self {
        Self {
            slots: IndexMap::new(),
        }
    }
}

/// All listener registries of a context, one per event class.
pub(crate) struct Listeners<T> {
    pub entity_create: Registry<EntityListener<T>>,
    pub entity_drop: Registry<EntityListener<T>>,
    pub entity_move: Registry<EntityMoveListener<T>>,
    pub socket_create: Registry<SocketListener>,
    pub socket_drop: Registry<SocketListener>,
    pub socket_move: Registry<SocketListener>,
    pub socket_value: Registry<SocketValueListener>,
    pub link_create: Registry<LinkListener>,
    pub link_drop: Registry<LinkListener>,
    pub link_update: Registry<LinkListener>,
    pub group_create: Registry<GroupListener>,
    pub group_drop: Registry<GroupListener>,
    pub bulk_change: Registry<BulkChangeListener>,
}

impl<T> Listeners<T> {
    /// Remove a handle from whichever registry holds it.
    pub(crate) fn unregister(&mut self, handle: ListenerHandle) -> bool {
        self.entity_create.remove(handle)
            || self.entity_drop.remove(handle)
            || self.entity_move.remove(handle)
            || self.socket_create.remove(handle)
            || self.socket_drop.remove(handle)
            || self.socket_move.remove(handle)
            || self.socket_value.remove(handle)
            || self.link_create.remove(handle)
            || self.link_drop.remove(handle)
            || self.link_update.remove(handle)
            || self.group_create.remove(handle)
            || self.group_drop.remove(handle)
            || self.bulk_change.remove(handle)
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            entity_create: Registry::default(),
            entity_drop: Registry::default(),
            entity_move: Registry::default(),
            socket_create: Registry::default(),
            socket_drop: Registry::default(),
            socket_move: Registry::default(),
            socket_value: Registry::default(),
            link_create: Registry::default(),
            link_drop: Registry::default(),
            link_update: Registry::default(),
            group_create: Registry::default(),
            group_drop: Registry::default(),
            bulk_change: Registry::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_fires_in_registration_order() {
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut registry: Registry<BulkChangeListener> = Registry::default();
        for i in 0..3u32 {
            let order = Rc::clone(&order);
            registry.insert(i, Box::new(move || order.borrow_mut().push(i)));
        }
        registry.remove(1);
        registry.fire(|cb| cb());
        assert_eq!(*order.borrow(), vec![0, 2]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let ran = Rc::new(Cell::new(false));
        let mut registry: Registry<BulkChangeListener> = Registry::default();
        registry.insert(0, Box::new(|| panic!("boom")));
        let flag = Rc::clone(&ran);
        registry.insert(1, Box::new(move || flag.set(true)));

        registry.fire(|cb| cb());
        assert!(ran.get());
    }
}
