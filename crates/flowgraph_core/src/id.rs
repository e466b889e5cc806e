// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integer identifiers for graph elements.
//!
//! Ids are allocated from a monotonic counter backed by a free-list, so a
//! deleted element's id becomes available again only after the element is
//! fully gone. Serialized documents carry plain integers.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}

id_type! {
    /// Unique identifier for an entity.
    EntityId
}

id_type! {
    /// Unique identifier for a socket.
    SocketId
}

id_type! {
    /// Unique identifier for a link.
    LinkId
}

id_type! {
    /// Unique identifier for a group.
    GroupId
}

/// Unique handle returned by listener registration, used to unregister.
pub type ListenerHandle = u32;

/// Free-list backed id allocator.
///
/// `release` must only be called once the id is no longer referenced anywhere
/// in the graph; forced ids from deserialized documents bump the counter past
/// the highest id seen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct IdAlloc {
    next: u32,
    free: Vec<u32>,
}

impl IdAlloc {
    pub(crate) fn allocate(&mut self) -> u32 {
        self.free.pop().unwrap_or_else(|| {
            let id = self.next;
            self.next += 1;
            id
        })
    }

    pub(crate) fn release(&mut self, id: u32) {
        self.free.push(id);
    }

    /// Ensure future allocations never collide with a caller-supplied id.
    pub(crate) fn bump(&mut self, id: u32) {
        self.next = self.next.max(id + 1);
    }

    pub(crate) fn reset(&mut self) {
        self.next = 0;
        self.free.clear();
    }
}
