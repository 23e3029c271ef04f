//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default relay port.
pub const DEFAULT_PORT: u16 = 1999;

/// Default bind address (localhost only for security).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Quiet period after the last update before a room persists its snapshot.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Frames buffered per connection before the member counts as a slow consumer.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Commands buffered per room actor.
pub const ROOM_COMMAND_CAPACITY: usize = 4096;

/// A connection must send `Hello` within this long.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Join attempts against a room that is closing before giving up.
pub const JOIN_RETRIES: usize = 3;

/// Database file name inside the data directory.
pub const DB_FILE_NAME: &str = "weft.db";
