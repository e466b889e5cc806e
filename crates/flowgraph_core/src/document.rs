// SPDX-License-Identifier: MIT OR Apache-2.0
//! Serialized document schema for whole-graph snapshots.
//!
//! The document is the wire format for `to_json`/`from_json`, the payload of
//! `FROM_JSON` history actions, and the snapshot unit for batched undo. Field
//! names follow the published JSON schema (`parentId`, `entityId`, ...).

use crate::geom::Vec2;
use crate::id::{EntityId, GroupId, LinkId, SocketId};
use crate::link::{LinkKind, LinkStyling};
use crate::socket::SocketKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A complete serialized graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<T> {
    /// All entities with their sockets inlined.
    pub entities: Vec<EntityDoc<T>>,
    /// All links.
    #[serde(default = "Vec::new")]
    pub links: Vec<LinkDoc>,
    /// All groups.
    #[serde(default = "Vec::new")]
    pub groups: Vec<GroupDoc>,
}

/// A serialized entity, including its sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDoc<T> {
    /// Entity id.
    pub id: EntityId,
    /// Local position.
    pub position: Vec2,
    /// Opaque payload.
    pub inner: T,
    /// Enclosing group, or null.
    #[serde(default)]
    pub parent_id: Option<GroupId>,
    /// Sockets owned by the entity, in creation order.
    #[serde(default = "Vec::new")]
    pub sockets: Vec<SocketDoc>,
}

/// A serialized socket. Values are transient and never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketDoc {
    /// Socket id.
    pub id: SocketId,
    /// Input or output.
    pub kind: SocketKind,
    /// Name, unique within the entity.
    pub name: String,
    /// Offset from the owning entity's center.
    pub offset: Vec2,
}

/// A serialized link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDoc {
    /// Link id.
    pub id: LinkId,
    /// Source socket id.
    pub from: SocketId,
    /// Target socket id.
    pub to: SocketId,
    /// Routing style.
    pub kind: LinkKind,
    /// Visual styling, omitted when empty.
    #[serde(default, skip_serializing_if = "LinkStyling::is_empty")]
    pub styling: LinkStyling,
    /// Routing waypoints.
    #[serde(default = "Vec::new")]
    pub waypoints: Vec<Vec2>,
    /// Opaque payload.
    #[serde(default)]
    pub inner: Value,
}

/// A serialized group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDoc {
    /// Group id.
    pub id: GroupId,
    /// Human-readable label.
    pub name: String,
    /// Member entity ids.
    #[serde(default = "Vec::new")]
    pub entities: Vec<EntityId>,
    /// Nested member group ids.
    #[serde(default = "Vec::new")]
    pub groups: Vec<GroupId>,
    /// Local position.
    pub position: Vec2,
    /// Enclosing group, or null.
    #[serde(default)]
    pub parent_id: Option<GroupId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_field_names() {
        let doc: Document<Value> = Document {
            entities: vec![EntityDoc {
                id: EntityId(3),
                position: Vec2::new(1.0, 2.0),
                inner: serde_json::json!({"label": "A"}),
                parent_id: Some(GroupId(0)),
                sockets: vec![SocketDoc {
                    id: SocketId(5),
                    kind: SocketKind::Output,
                    name: "out".into(),
                    offset: Vec2::new(10.0, 0.0),
                }],
            }],
            links: Vec::new(),
            groups: Vec::new(),
        };

        let json = serde_json::to_value(&doc).unwrap();
        let entity = &json["entities"][0];
        assert_eq!(entity["id"], 3);
        assert_eq!(entity["parentId"], 0);
        assert_eq!(entity["position"]["x"], 1.0);
        assert_eq!(entity["sockets"][0]["kind"], "OUTPUT");
    }

    #[test]
    fn test_missing_optional_sections_default() {
        let doc: Document<Value> = serde_json::from_value(serde_json::json!({
            "entities": [{"id": 0, "position": {"x": 0.0, "y": 0.0}, "inner": null}]
        }))
        .unwrap();
        assert!(doc.links.is_empty());
        assert!(doc.groups.is_empty());
        assert!(doc.entities[0].parent_id.is_none());
    }
}
