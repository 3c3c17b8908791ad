use std::sync::{Arc, RwLock};

use crate::store::ScheduleStore;

/// The live schedule, shared read-mostly across tasks.
///
/// Readers take an `Arc` snapshot and keep using it even if the schedule is
/// replaced underneath them; replacement swaps the pointer, never the
/// contents of a store someone may be reading.
pub struct SharedSchedule {
    current: RwLock<Arc<ScheduleStore>>,
}

impl SharedSchedule {
    pub fn new(store: ScheduleStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    /// Snapshot of the schedule in effect right now.
    pub fn current(&self) -> Arc<ScheduleStore> {
        Arc::clone(&self.current.read().expect("schedule lock poisoned"))
    }

    /// Install `store` as the live schedule and return the one it replaced.
    pub fn replace(&self, store: ScheduleStore) -> Arc<ScheduleStore> {
        let next = Arc::new(store);
        let mut slot = self.current.write().expect("schedule lock poisoned");
        std::mem::replace(&mut *slot, next)
    }
}

impl Default for SharedSchedule {
    fn default() -> Self {
        Self::new(ScheduleStore::default())
    }
}
