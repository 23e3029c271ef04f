//! Weft canvas replica library.
//!
//! Keeps a rendered node/edge canvas in step with a replicated document and
//! a relay. The pieces, bottom-up:
//!
//! | Module          | Role                                                     |
//! |-----------------|----------------------------------------------------------|
//! | [`sync`]        | Origin suppression, empty-regression guard, seed-once    |
//! | [`graph`]       | Cycle check and pluggable connection rules               |
//! | [`changes`]     | UI change sets applied to rendered lists                 |
//! | [`drag`]        | Coalescing of high-frequency drag positions              |
//! | [`canvas`]      | [`SyncedCanvas`], the local view adapter                 |
//! | [`presence`]    | Awareness table, collaborators, remote cursors           |
//! | [`cursor`]      | Outgoing cursor throttle, incoming cursor easing         |
//! | [`actor`]       | [`ReplicaHandle`]: canvas + relay connection as a task   |

pub mod actor;
pub mod canvas;
pub mod changes;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod drag;
pub mod graph;
pub mod presence;
pub mod subscriptions;
pub mod sync;

pub use actor::{ActorError, ReplicaHandle, spawn_replica, spawn_replica_with};
pub use canvas::{AdapterError, RemoteChange, SyncedCanvas, validate_node};
pub use changes::{EdgeChange, NodeChange};
pub use config::ReplicaConfig;
pub use cursor::{CursorInterpolator, CursorThrottle};
pub use graph::{AllowAll, ConnectionPolicy, Rejection, validate_connection};
pub use presence::{Awareness, AwarenessChange, Collaborator, RemoteCursor};
pub use subscriptions::{ConnectionStatus, ReplicaEvent};
pub use sync::{SkipReason, SyncError, SyncManager, SyncResult};
