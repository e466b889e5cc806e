// SPDX-License-Identifier: MIT OR Apache-2.0
//! Link definitions - directed edges between sockets.

use crate::geom::Vec2;
use crate::id::{LinkId, SocketId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Visual routing style for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkKind {
    /// Straight segments between the endpoints and any waypoints.
    Line,
    /// Orthogonal steps with sharp corners.
    Step,
    /// Orthogonal steps with rounded corners.
    SmoothStep,
    /// Smooth cubic bezier curve.
    Bezier,
}

/// Free-form visual styling for a link (stroke color, width, animation
/// flags...). The engine never interprets the contents; it only diffs them
/// for history and hands them to renderers.
pub type LinkStyling = serde_json::Map<String, Value>;

/// A directed edge between two sockets.
///
/// `from` must be an output socket and `to` an input socket on a different
/// entity; the context enforces this along with duplicate and cycle
/// rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    /// Unique link id.
    pub id: LinkId,
    /// Source socket id (an output).
    pub from: SocketId,
    /// Target socket id (an input).
    pub to: SocketId,
    /// Visual routing style.
    pub kind: LinkKind,
    /// Intermediate routing points, in order from source to target.
    pub waypoints: Vec<Vec2>,
    /// Visual styling, opaque to the engine.
    pub styling: LinkStyling,
    /// Opaque caller-supplied payload.
    pub inner: Value,
}

impl Link {
    /// Create a new link with no waypoints, styling, or payload.
    pub fn new(id: LinkId, from: SocketId, to: SocketId, kind: LinkKind, inner: Value) -> Self {
        Self {
            id,
            from,
            to,
            kind,
            waypoints: Vec::new(),
            styling: LinkStyling::new(),
            inner,
        }
    }

    /// Whether this link touches the given socket at either end.
    pub fn touches(&self, socket_id: SocketId) -> bool {
        self.from == socket_id || self.to == socket_id
    }
}
