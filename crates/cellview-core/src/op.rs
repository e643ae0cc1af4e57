//! Classified operations and structural outbound message shapes.
//!
//! The operation set is a closed tagged union matched exhaustively, so a new
//! operation kind fails to compile anywhere it is not handled. A `Remove`
//! deliberately does not say whether the client should unload or delete:
//! that is resolved at delivery time, when the object directory can report
//! whether the underlying object still exists.

use serde::{Deserialize, Serialize};

use crate::cell::{BoundingSphere, CellDescriptor, CellId, CellTransform};

/// One classified change for a viewer, produced by a revalidation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum CellOp {
    /// The cell became visible: the client must load it.
    Load(CellDescriptor),
    /// A non-movable visible cell moved.
    Move {
        /// The moved cell.
        id: CellId,
        /// Its new world transform.
        transform: CellTransform,
    },
    /// A visible cell's setup data changed.
    UpdateContent {
        /// The changed cell.
        id: CellId,
        /// Its new setup data.
        content: serde_json::Value,
    },
    /// The cell left visibility. Resolved to unload or delete at delivery.
    Remove {
        /// The departed cell.
        id: CellId,
    },
}

impl CellOp {
    /// The cell this operation concerns.
    #[must_use]
    pub fn id(&self) -> CellId {
        match self {
            Self::Load(desc) => desc.id,
            Self::Move { id, .. } | Self::UpdateContent { id, .. } | Self::Remove { id } => *id,
        }
    }

    /// Short operation name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::Move { .. } => "move",
            Self::UpdateContent { .. } => "update_content",
            Self::Remove { .. } => "remove",
        }
    }
}

/// Structural shape of an outbound message to one viewer's client.
///
/// The wire encoding is out of scope; the serde form documents the structure
/// the transport must carry. `Batch` preserves the intra-tick order of its
/// items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CellMessage {
    /// Create the cell on the client.
    Load {
        /// The cell to create.
        id: CellId,
        /// Parent for hierarchy reconstruction, if any.
        parent: Option<CellId>,
        /// Local-space extent.
        bounds: BoundingSphere,
        /// World transform.
        transform: CellTransform,
        /// Opaque setup data.
        content: serde_json::Value,
    },
    /// Move the cell to a new transform.
    Move {
        /// The moved cell.
        id: CellId,
        /// Its new world transform.
        transform: CellTransform,
    },
    /// Replace the cell's setup data.
    UpdateContent {
        /// The changed cell.
        id: CellId,
        /// Its new setup data.
        content: serde_json::Value,
    },
    /// Drop the cell from the client view; the object still exists and may
    /// return.
    Unload {
        /// The departed cell.
        id: CellId,
    },
    /// Drop the cell permanently; the object has been deleted.
    Delete {
        /// The deleted cell.
        id: CellId,
    },
    /// Ordered aggregate of the above, one per tick under batched delivery.
    Batch {
        /// Messages in classification order.
        items: Vec<CellMessage>,
    },
}

impl CellMessage {
    /// Short message name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Load { .. } => "load",
            Self::Move { .. } => "move",
            Self::UpdateContent { .. } => "update_content",
            Self::Unload { .. } => "unload",
            Self::Delete { .. } => "delete",
            Self::Batch { .. } => "batch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_an_op_tag() {
        let msg = CellMessage::Unload {
            id: CellId::new(12),
        };
        let json = serde_json::to_value(&msg).expect("serializable");
        assert_eq!(json["op"], "unload");
        assert_eq!(json["id"], 12);
    }

    #[test]
    fn batch_preserves_item_order() {
        let msg = CellMessage::Batch {
            items: vec![
                CellMessage::Unload { id: CellId::new(1) },
                CellMessage::Delete { id: CellId::new(2) },
            ],
        };
        let json = serde_json::to_value(&msg).expect("serializable");
        assert_eq!(json["items"][0]["op"], "unload");
        assert_eq!(json["items"][1]["op"], "delete");
    }
}
