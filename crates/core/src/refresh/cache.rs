use crate::domain::snapshot::{Snapshot, SnapshotSet, View};
use std::sync::{Mutex, PoisonError};

/// Last published snapshot set. Publish and read copy at the boundary, so a
/// reader never sees a half-published set nor shares state with the cache.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    inner: Mutex<SnapshotSet>,
}

impl SnapshotCache {
    pub fn publish(&self, all: Snapshot, to_buy: Snapshot, to_sell: Snapshot) {
        let next = SnapshotSet {
            all,
            to_buy,
            to_sell,
        };
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn publish_set(&self, set: SnapshotSet) {
        self.publish(set.all, set.to_buy, set.to_sell);
    }

    pub fn read(&self, view: View) -> Snapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .view(view)
            .clone()
    }

    /// All three views from the same cycle.
    pub fn read_all(&self) -> SnapshotSet {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
