//! Position store: the latest bulk-reported position per player.
//!
//! The store is a snapshot, not a log. Each ingest replaces the entire
//! content; players absent from the latest snapshot do not exist, even if a
//! stale client still caches them.

use std::collections::HashMap;

use earshot_core::{PlayerId, PlayerPosition};
use parking_lot::RwLock;

#[derive(Default)]
pub struct PositionStore {
    positions: RwLock<HashMap<PlayerId, PlayerPosition>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire store content with one snapshot. The new map is
    /// built outside the lock and swapped in under a single write guard, so
    /// readers observe either the previous snapshot or this one in full.
    /// Returns the number of stored entries (duplicates collapse, last wins).
    pub fn replace_all(
        &self,
        entries: impl IntoIterator<Item = (PlayerId, PlayerPosition)>,
    ) -> usize {
        let next: HashMap<_, _> = entries.into_iter().collect();
        let count = next.len();
        *self.positions.write() = next;
        count
    }

    pub fn get(&self, id: &PlayerId) -> Option<PlayerPosition> {
        self.positions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.positions.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }

    /// Visit every stored entry under the read lock. `f` must stay pure:
    /// no I/O and no re-entrant store access while the guard is held.
    pub(crate) fn for_each(&self, mut f: impl FnMut(&PlayerId, &PlayerPosition)) {
        for (id, pos) in self.positions.read().iter() {
            f(id, pos);
        }
    }
}
