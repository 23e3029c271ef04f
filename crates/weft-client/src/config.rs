//! Replica configuration.

use std::time::Duration;

use weft_types::{DocumentId, RoomName, UserInfo};

use crate::constants::{
    CURSOR_SAMPLE_INTERVAL, DEFAULT_RELAY_ADDR, DRAG_COMMIT_INTERVAL, RECONNECT_INITIAL,
    RECONNECT_MAX,
};

/// Everything a replica needs to join a document room.
#[derive(Clone, Debug)]
pub struct ReplicaConfig {
    /// `host:port` of the relay.
    pub relay_addr: String,
    pub document: DocumentId,
    pub user: UserInfo,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub cursor_interval: Duration,
    pub drag_interval: Duration,
}

impl ReplicaConfig {
    pub fn new(document: DocumentId, user: UserInfo) -> Self {
        Self {
            relay_addr: DEFAULT_RELAY_ADDR.into(),
            document,
            user,
            reconnect_initial: RECONNECT_INITIAL,
            reconnect_max: RECONNECT_MAX,
            cursor_interval: CURSOR_SAMPLE_INTERVAL,
            drag_interval: DRAG_COMMIT_INTERVAL,
        }
    }

    pub fn with_relay_addr(mut self, addr: impl Into<String>) -> Self {
        self.relay_addr = addr.into();
        self
    }

    pub fn room(&self) -> RoomName {
        RoomName::for_document(&self.document)
    }

    /// Reconnect delay after `attempt` consecutive failures (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.reconnect_initial
            .saturating_mul(factor)
            .min(self.reconnect_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::UserId;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let config = ReplicaConfig::new(
            DocumentId::new("doc"),
            UserInfo::new(UserId::new("u"), "U"),
        );
        assert_eq!(config.backoff(0), Duration::from_millis(250));
        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(3), Duration::from_secs(2));
        assert_eq!(config.backoff(10), Duration::from_secs(10));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_room_name_derives_from_document() {
        let config = ReplicaConfig::new(
            DocumentId::new("abc"),
            UserInfo::new(UserId::new("u"), "U"),
        );
        assert_eq!(config.room().as_str(), "weft-project-abc");
    }
}
