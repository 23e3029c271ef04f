//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default relay address for local development.
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:1999";

/// First reconnect delay after the connection drops.
pub const RECONNECT_INITIAL: Duration = Duration::from_millis(250);

/// Reconnect delay ceiling. The delay doubles until it reaches this.
pub const RECONNECT_MAX: Duration = Duration::from_secs(10);

/// Timeout for TCP connect plus the hello handshake. Keeps the actor from
/// hanging on a blackholed relay.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum spacing between outgoing cursor samples.
pub const CURSOR_SAMPLE_INTERVAL: Duration = Duration::from_millis(8);

/// Longest ease between two remote cursor samples.
pub const CURSOR_MAX_INTERPOLATION: Duration = Duration::from_millis(16);

/// Minimum spacing between document commits of an in-progress drag.
pub const DRAG_COMMIT_INTERVAL: Duration = Duration::from_millis(50);

/// Offset applied to duplicated and pasted nodes.
pub const CLONE_OFFSET: f64 = 200.0;

/// Replica events buffered per subscriber.
pub const EVENT_CAPACITY: usize = 256;

/// Outgoing frames buffered while the socket is busy.
pub const OUTBOUND_CAPACITY: usize = 1024;
