//! Live rooms by name.
//!
//! Rooms are spawned on first join and deregister themselves when their
//! last member leaves. A join that races a closing room gets
//! [`RoomError::Closed`] and is retried against a fresh room.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, warn};
use weft_types::{ReplicaId, RoomName};

use crate::constants::JOIN_RETRIES;
use crate::room::{PersistOutcome, RoomError, RoomHandle, RoomMembership, RoomSettings, spawn_room};
use crate::store::SharedStore;

/// Registry of room actors. Cheap to clone; clones share the same rooms.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<RoomName, RoomHandle>>,
    store: SharedStore,
    settings: RoomSettings,
    generations: Arc<AtomicU64>,
}

impl RoomRegistry {
    pub fn new(store: SharedStore, settings: RoomSettings) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            store,
            settings,
            generations: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The live room for `name`, spawning it if needed.
    pub fn room(&self, name: &RoomName) -> RoomHandle {
        self.rooms
            .entry(name.clone())
            .or_insert_with(|| {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                spawn_room(
                    name.clone(),
                    generation,
                    Arc::clone(&self.store),
                    self.settings,
                    Some(self.clone()),
                )
            })
            .clone()
    }

    pub fn get(&self, name: &RoomName) -> Option<RoomHandle> {
        self.rooms.get(name).map(|entry| entry.value().clone())
    }

    /// Join `name`, retrying when the room closes underneath us.
    pub async fn join(
        &self,
        name: &RoomName,
        replica: ReplicaId,
        state_vector: Vec<u8>,
    ) -> Result<(RoomHandle, RoomMembership), RoomError> {
        for attempt in 0..JOIN_RETRIES {
            let room = self.room(name);
            match room.join(replica, state_vector.clone()).await {
                Ok(membership) => return Ok((room, membership)),
                Err(RoomError::Closed) => {
                    debug!(room = %name, attempt, "room closed during join, retrying");
                    // No-op unless the room died without deregistering.
                    self.deregister(name, room.generation());
                }
                Err(e) => return Err(e),
            }
        }
        Err(RoomError::Closed)
    }

    /// Remove `name` if it still maps to the room of this generation.
    pub(crate) fn deregister(&self, name: &RoomName, generation: u64) -> bool {
        self.rooms
            .remove_if(name, |_, handle| handle.generation() == generation)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn names(&self) -> Vec<RoomName> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Persist every live room now. Used on shutdown.
    pub async fn flush_all(&self) -> Vec<(RoomName, PersistOutcome)> {
        let rooms: Vec<RoomHandle> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut outcomes = Vec::with_capacity(rooms.len());
        for room in rooms {
            match room.flush().await {
                Ok(outcome) => outcomes.push((room.name().clone(), outcome)),
                Err(e) => warn!(room = %room.name(), error = %e, "flush failed"),
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_crdt::VersionVector;
    use weft_types::DocumentId;

    use crate::store::MemoryStore;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(MemoryStore::new()), RoomSettings::default())
    }

    fn empty_sv() -> Vec<u8> {
        VersionVector::new().encode().unwrap()
    }

    fn room_name(id: &str) -> RoomName {
        RoomName::for_document(&DocumentId::new(id))
    }

    #[tokio::test]
    async fn test_same_name_same_room() {
        let registry = registry();
        let (a, _ma) = registry.join(&room_name("p1"), ReplicaId::new(1), empty_sv()).await.unwrap();
        let (b, _mb) = registry.join(&room_name("p1"), ReplicaId::new(2), empty_sv()).await.unwrap();
        let (c, _mc) = registry.join(&room_name("p2"), ReplicaId::new(3), empty_sv()).await.unwrap();
        assert_eq!(a.generation(), b.generation());
        assert_ne!(a.generation(), c.generation());
        assert_eq!(registry.len(), 2);
        assert_eq!(a.members().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_room_deregisters_after_last_leave() {
        let registry = registry();
        let name = room_name("p1");
        let (room, membership) = registry.join(&name, ReplicaId::new(1), empty_sv()).await.unwrap();
        room.leave(membership.conn).await.unwrap();

        // Closing room answers Closed (or the channel is gone) once it is done.
        while !room.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(registry.get(&name).is_none());

        let (fresh, _m) = registry.join(&name, ReplicaId::new(2), empty_sv()).await.unwrap();
        assert_ne!(fresh.generation(), room.generation());
    }

    #[tokio::test]
    async fn test_stale_generation_does_not_deregister_new_room() {
        let registry = registry();
        let name = room_name("p1");
        let (room, _m) = registry.join(&name, ReplicaId::new(1), empty_sv()).await.unwrap();
        assert!(!registry.deregister(&name, room.generation() + 100));
        assert!(registry.get(&name).is_some());
    }
}
