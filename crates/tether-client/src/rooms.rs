//! Room membership tracking.
//!
//! The membership set remembers which rooms the UI asked to join, in the
//! order they were joined. It survives transport drops (the client replays a
//! join for every member room after re-authenticating) and is cleared only by
//! an explicit disconnect.

use indexmap::IndexSet;
use tether_proto::RoomId;

/// Ordered set of joined rooms.
#[derive(Debug, Clone, Default)]
pub struct RoomMembership {
    rooms: IndexSet<RoomId>,
}

impl RoomMembership {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a room. Returns `false` if it was already a member.
    pub fn insert(&mut self, room_id: RoomId) -> bool {
        self.rooms.insert(room_id)
    }

    /// Remove a room, keeping the join order of the others. Returns `false`
    /// if it was not a member.
    pub fn remove(&mut self, room_id: &RoomId) -> bool {
        self.rooms.shift_remove(room_id)
    }

    /// Check membership.
    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains(room_id)
    }

    /// Rooms in join order.
    pub fn iter(&self) -> impl Iterator<Item = &RoomId> {
        self.rooms.iter()
    }

    /// Number of member rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// `true` when no rooms are joined.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Drop every room, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.rooms.len();
        self.rooms.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    fn room(raw: &str) -> RoomId {
        RoomId::new(raw)
    }

    #[test]
    fn insert_is_idempotent() {
        let mut rooms = RoomMembership::new();
        assert!(rooms.insert(room("m1")));
        assert!(!rooms.insert(room("m1")));
        assert_eq!(rooms.len(), 1);
    }

    #[test]
    fn remove_unknown_room_is_noop() {
        let mut rooms = RoomMembership::new();
        assert!(!rooms.remove(&room("m9")));
        assert!(rooms.is_empty());
    }

    #[test]
    fn remove_keeps_join_order() {
        let mut rooms = RoomMembership::new();
        rooms.insert(room("m1"));
        rooms.insert(room("m2"));
        rooms.insert(room("m3"));
        rooms.remove(&room("m2"));

        let order: Vec<_> = rooms.iter().map(RoomId::as_str).collect();
        assert_eq!(order, vec!["m1", "m3"]);
    }

    #[test]
    fn clear_reports_count() {
        let mut rooms = RoomMembership::new();
        rooms.insert(room("m1"));
        rooms.insert(room("m2"));
        assert_eq!(rooms.clear(), 2);
        assert!(rooms.is_empty());
    }

    proptest! {
        #[test]
        fn membership_matches_joins_minus_leaves(
            ops in prop::collection::vec((any::<bool>(), 0u8..6), 0..64),
        ) {
            let mut rooms = RoomMembership::new();
            let mut expected = BTreeSet::new();

            for (join, id) in ops {
                let room_id = RoomId::new(format!("m{id}"));
                if join {
                    rooms.insert(room_id.clone());
                    expected.insert(room_id);
                } else {
                    rooms.remove(&room_id);
                    expected.remove(&room_id);
                }
            }

            let actual: BTreeSet<_> = rooms.iter().cloned().collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
