// SPDX-License-Identifier: MIT OR Apache-2.0
//! Headless state engine for interactive node-and-link diagrams.
//!
//! The engine owns four kinds of elements: [`Entity`] (a positioned node
//! carrying an opaque payload), [`Socket`] (a typed connection point on an
//! entity), [`Link`] (a directed output-to-input connection), and [`Group`]
//! (a nestable container contributing a position offset to its members).
//! All mutation flows through a single [`Context`], which keeps a quadtree
//! spatial index, a transactional undo/redo log, and a set of change
//! listeners consistent with every edit.
//!
//! The crate is renderer-agnostic: it computes positions and topology and
//! notifies listeners, but never draws. Path generation for link geometry
//! lives in the companion `flowgraph_paths` crate.
//!
//! ```
//! use flowgraph_core::{Context, SocketKind};
//! use serde_json::json;
//!
//! let mut ctx: Context<serde_json::Value> = Context::new();
//! let source = ctx.new_entity(json!({ "op": "constant" }));
//! let sink = ctx.new_entity(json!({ "op": "print" }));
//! let out = ctx.new_socket(source, SocketKind::Output, "value").unwrap();
//! let input = ctx.new_socket(sink, SocketKind::Input, "value").unwrap();
//!
//! ctx.new_link(out, input).unwrap();
//! ctx.set_socket_value(out, json!(42));
//! assert_eq!(ctx.socket(input).unwrap().value, json!(42));
//! ```

pub mod context;
pub mod document;
pub mod entity;
pub mod geom;
pub mod group;
pub mod history;
pub mod id;
pub mod link;
pub mod listeners;
pub mod quadtree;
pub mod socket;

pub use context::{Context, LinkError, LinkSpec};
pub use document::{Document, EntityDoc, GroupDoc, LinkDoc, SocketDoc};
pub use entity::Entity;
pub use geom::{Rect, Vec2};
pub use group::Group;
pub use history::{Action, Command, History, Swap};
pub use id::{EntityId, GroupId, LinkId, ListenerHandle, SocketId};
pub use link::{Link, LinkKind, LinkStyling};
pub use quadtree::QuadTree;
pub use socket::{Socket, SocketKind};
