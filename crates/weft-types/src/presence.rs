//! Ephemeral per-connection presence: user identity and cursor position.
//!
//! Presence never touches the replicated document or durable storage. Each
//! replica owns exactly one entry, keyed by its [`ReplicaId`], and replaces
//! it wholesale on every local change. A monotonically increasing `clock`
//! per entry lets receivers drop updates that arrive out of order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ReplicaId, UserId};

/// Fixed avatar/cursor palette. A user's color is picked from it by id.
pub const PALETTE: [&str; 10] = [
    "#E53E3E", "#D53F8C", "#9F7AEA", "#667EEA", "#3182CE", "#00A3C4", "#00A896", "#38A169",
    "#D69E2E", "#DD6B20",
];

/// Deterministic color for a user: the first UTF-16 code unit of the id
/// picks a palette slot, so ids outside the BMP use their high surrogate.
pub fn color_for_user(id: &UserId) -> &'static str {
    let code = id.as_str().encode_utf16().next().unwrap_or(0);
    PALETTE[code as usize % PALETTE.len()]
}

/// Who is behind a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub name: String,
    pub color: String,
}

impl UserInfo {
    /// Build a user with the palette color derived from `id`.
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        let color = color_for_user(&id).to_string();
        Self {
            id,
            name: name.into(),
            color,
        }
    }
}

/// Cursor position in canvas coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
}

/// Full presence state of one connection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    pub user: Option<UserInfo>,
    pub cursor: Option<Cursor>,
}

/// One settable presence field.
#[derive(Clone, Debug, PartialEq)]
pub enum PresenceField {
    User(UserInfo),
    /// `None` hides the cursor (pointer left the canvas).
    Cursor(Option<Cursor>),
}

impl PresenceState {
    /// Overwrite one field, leaving the other untouched.
    pub fn set(&mut self, field: PresenceField) {
        match field {
            PresenceField::User(user) => self.user = Some(user),
            PresenceField::Cursor(cursor) => self.cursor = cursor,
        }
    }
}

/// Presence change for one replica. `state == None` means the entry is gone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub replica: ReplicaId,
    pub clock: u32,
    pub state: Option<PresenceState>,
}

impl PresenceUpdate {
    pub fn removed(replica: ReplicaId) -> Self {
        Self {
            replica,
            clock: 0,
            state: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct PresenceEntry {
    clock: u32,
    state: PresenceState,
}

/// Table of every known connection's presence.
#[derive(Clone, Debug, Default)]
pub struct PresenceTable {
    entries: BTreeMap<ReplicaId, PresenceEntry>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update. Returns `true` if the table changed.
    ///
    /// Removals always apply. Replacements apply only when their clock is
    /// newer than the stored one.
    pub fn apply(&mut self, update: &PresenceUpdate) -> bool {
        match &update.state {
            None => self.entries.remove(&update.replica).is_some(),
            Some(state) => {
                if let Some(existing) = self.entries.get(&update.replica) {
                    if update.clock <= existing.clock {
                        return false;
                    }
                }
                self.entries.insert(
                    update.replica,
                    PresenceEntry {
                        clock: update.clock,
                        state: state.clone(),
                    },
                );
                true
            }
        }
    }

    /// Drop a replica's entry entirely.
    pub fn remove(&mut self, replica: ReplicaId) -> bool {
        self.entries.remove(&replica).is_some()
    }

    pub fn get(&self, replica: ReplicaId) -> Option<&PresenceState> {
        self.entries.get(&replica).map(|e| &e.state)
    }

    pub fn clock(&self, replica: ReplicaId) -> Option<u32> {
        self.entries.get(&replica).map(|e| e.clock)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReplicaId, &PresenceState)> {
        self.entries.iter().map(|(r, e)| (*r, &e.state))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry except `keep`.
    pub fn retain_only(&mut self, keep: ReplicaId) {
        self.entries.retain(|r, _| *r == keep);
    }

    /// The whole table as updates, for late joiners.
    pub fn to_updates(&self) -> Vec<PresenceUpdate> {
        self.entries
            .iter()
            .map(|(replica, entry)| PresenceUpdate {
                replica: *replica,
                clock: entry.clock,
                state: Some(entry.state.clone()),
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn update(replica: u64, clock: u32, x: f64) -> PresenceUpdate {
        PresenceUpdate {
            replica: ReplicaId::new(replica),
            clock,
            state: Some(PresenceState {
                user: None,
                cursor: Some(Cursor { x, y: 0.0 }),
            }),
        }
    }

    #[test]
    fn test_color_is_deterministic() {
        let id = UserId::new("alice");
        assert_eq!(color_for_user(&id), color_for_user(&UserId::new("alice")));
        // 'a' = 97, 97 % 10 = 7
        assert_eq!(color_for_user(&id), PALETTE[7]);
        assert_eq!(color_for_user(&UserId::new("")), PALETTE[0]);
        // U+1F600 starts with the surrogate 0xD83D (55357).
        assert_eq!(color_for_user(&UserId::new("\u{1F600}x")), PALETTE[7]);
    }

    #[test]
    fn test_update_replaces_wholesale() {
        let mut table = PresenceTable::new();
        let user = UserInfo::new(UserId::new("u1"), "Ann");
        table.apply(&PresenceUpdate {
            replica: ReplicaId::new(1),
            clock: 1,
            state: Some(PresenceState {
                user: Some(user),
                cursor: Some(Cursor { x: 1.0, y: 1.0 }),
            }),
        });
        assert!(table.apply(&update(1, 2, 5.0)));

        let state = table.get(ReplicaId::new(1)).unwrap();
        assert!(state.user.is_none(), "replacement is not a merge");
        assert_eq!(state.cursor.unwrap().x, 5.0);
    }

    #[test]
    fn test_stale_clock_is_ignored() {
        let mut table = PresenceTable::new();
        assert!(table.apply(&update(1, 5, 1.0)));
        assert!(!table.apply(&update(1, 4, 2.0)));
        assert!(!table.apply(&update(1, 5, 3.0)));
        assert_eq!(table.get(ReplicaId::new(1)).unwrap().cursor.unwrap().x, 1.0);
    }

    #[test]
    fn test_removal_drops_entry() {
        let mut table = PresenceTable::new();
        table.apply(&update(1, 1, 0.0));
        table.apply(&update(2, 1, 0.0));
        assert!(table.apply(&PresenceUpdate::removed(ReplicaId::new(1))));
        assert_eq!(table.len(), 1);
        assert!(table.get(ReplicaId::new(1)).is_none());
        // An entry that comes back starts fresh.
        assert!(table.apply(&update(1, 1, 9.0)));
    }

    #[test]
    fn test_set_field_keeps_other_field() {
        let mut state = PresenceState::default();
        state.set(PresenceField::User(UserInfo::new(UserId::new("u"), "U")));
        state.set(PresenceField::Cursor(Some(Cursor { x: 2.0, y: 3.0 })));
        state.set(PresenceField::Cursor(None));
        assert!(state.user.is_some());
        assert!(state.cursor.is_none());
    }
}
