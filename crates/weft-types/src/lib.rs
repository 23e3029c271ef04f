//! Shared identity, canvas record, presence and wire types for Weft.
//!
//! This is the leaf crate: it has **no internal weft dependencies**. The
//! replicated document, the client adapter and the relay all speak in terms
//! of these types.
//!
//! # Key Types
//!
//! |----------------------|-----------------------------------------------|
//! | Type                 | Purpose                                       |
//! |----------------------|-----------------------------------------------|
//! | [`ReplicaId`]        | Origin tag of a replica (one connected copy)  |
//! | [`DocumentId`]       | Project/document the canvas belongs to        |
//! | [`RoomName`]         | Relay room, derived from the document id      |
//! | [`Node`] / [`Edge`]  | View-facing canvas records                    |
//! | [`CanvasSnapshot`]   | Persisted projection of nodes + edges         |
//! | [`PresenceTable`]    | Ephemeral per-connection cursor/identity      |
//! | [`ClientFrame`]      | Client → relay frames                         |
//! | [`ServerFrame`]      | Relay → client frames                         |
//! |----------------------|-----------------------------------------------|

pub mod canvas;
pub mod ids;
pub mod presence;
pub mod wire;

pub use canvas::{
    CanvasSnapshot, Connection, Edge, EdgeKind, JsonMap, Node, NodeKind, Position,
    text_field_name,
};
pub use ids::{DocumentId, EdgeId, NodeId, ROOM_PREFIX, ReplicaId, RoomName, UserId};
pub use presence::{
    Cursor, PALETTE, PresenceField, PresenceState, PresenceTable, PresenceUpdate, UserInfo,
    color_for_user,
};
pub use wire::{ClientFrame, MAX_FRAME_LEN, ServerFrame, WireError};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
