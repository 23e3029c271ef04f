//! Awareness: this replica's presence entry plus everyone else's.
//!
//! The local entry is replaced wholesale on every field change and sent to
//! the relay as a [`PresenceUpdate`] with a bumped clock. Remote entries
//! arrive from the relay; a departure removes the entry outright.

use tokio::sync::broadcast;
use weft_types::{
    Cursor, PresenceField, PresenceState, PresenceTable, PresenceUpdate, ReplicaId, UserId,
    UserInfo,
};

const CHANGE_CAPACITY: usize = 64;

/// Which entries an awareness update touched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AwarenessChange {
    pub added: Vec<ReplicaId>,
    pub updated: Vec<ReplicaId>,
    pub removed: Vec<ReplicaId>,
}

impl AwarenessChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// A connected user, for avatar stacks. Includes the local user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collaborator {
    pub replica: ReplicaId,
    pub id: UserId,
    pub name: String,
    pub color: String,
}

/// Another replica's visible cursor.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteCursor {
    pub replica: ReplicaId,
    pub user: UserInfo,
    pub cursor: Cursor,
}

pub struct Awareness {
    replica: ReplicaId,
    clock: u32,
    local: PresenceState,
    table: PresenceTable,
    changes: broadcast::Sender<AwarenessChange>,
}

impl Awareness {
    pub fn new(replica: ReplicaId) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            replica,
            clock: 0,
            local: PresenceState::default(),
            table: PresenceTable::new(),
            changes,
        }
    }

    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    pub fn local(&self) -> &PresenceState {
        &self.local
    }

    pub fn table(&self) -> &PresenceTable {
        &self.table
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AwarenessChange> {
        self.changes.subscribe()
    }

    fn emit(&self, change: AwarenessChange) {
        if !change.is_empty() {
            let _ = self.changes.send(change);
        }
    }

    /// Set one local field. Returns the update to send to the relay.
    pub fn set_local(&mut self, field: PresenceField) -> PresenceUpdate {
        self.local.set(field);
        self.current_update()
    }

    /// Re-issue the local entry with a fresh clock (after reconnect).
    pub fn current_update(&mut self) -> PresenceUpdate {
        self.clock += 1;
        let update = PresenceUpdate {
            replica: self.replica,
            clock: self.clock,
            state: Some(self.local.clone()),
        };
        let existed = self.table.get(self.replica).is_some();
        self.table.apply(&update);
        self.emit(AwarenessChange {
            added: if existed { vec![] } else { vec![self.replica] },
            updated: if existed { vec![self.replica] } else { vec![] },
            removed: vec![],
        });
        update
    }

    /// Apply updates from the relay. Updates about our own replica are ignored.
    pub fn apply_remote(&mut self, updates: &[PresenceUpdate]) -> AwarenessChange {
        let mut change = AwarenessChange::default();
        for update in updates {
            if update.replica == self.replica {
                continue;
            }
            let existed = self.table.get(update.replica).is_some();
            if !self.table.apply(update) {
                continue;
            }
            match (&update.state, existed) {
                (None, _) => change.removed.push(update.replica),
                (Some(_), true) => change.updated.push(update.replica),
                (Some(_), false) => change.added.push(update.replica),
            }
        }
        self.emit(change.clone());
        change
    }

    /// Drop every remote entry (connection lost).
    pub fn clear_remote(&mut self) -> AwarenessChange {
        let removed: Vec<ReplicaId> = self
            .table
            .iter()
            .map(|(replica, _)| replica)
            .filter(|r| *r != self.replica)
            .collect();
        self.table.retain_only(self.replica);
        let change = AwarenessChange {
            removed,
            ..Default::default()
        };
        self.emit(change.clone());
        change
    }

    /// Every entry that carries a user, local one included.
    pub fn collaborators(&self) -> Vec<Collaborator> {
        self.table
            .iter()
            .filter_map(|(replica, state)| {
                state.user.as_ref().map(|user| Collaborator {
                    replica,
                    id: user.id.clone(),
                    name: user.name.clone(),
                    color: user.color.clone(),
                })
            })
            .collect()
    }

    /// Cursors of other replicas that have both a user and a cursor.
    pub fn remote_cursors(&self) -> Vec<RemoteCursor> {
        self.table
            .iter()
            .filter(|(replica, _)| *replica != self.replica)
            .filter_map(|(replica, state)| match (&state.user, state.cursor) {
                (Some(user), Some(cursor)) => Some(RemoteCursor {
                    replica,
                    user: user.clone(),
                    cursor,
                }),
                _ => None,
            })
            .collect()
    }
}
