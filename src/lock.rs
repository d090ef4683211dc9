//! Per-inode exclusive locks for `write` and `truncate`.
//!
//! Slots are handed out from a table keyed by inode number and held weakly, so
//! a slot lives exactly as long as somebody holds or waits on it. The guard owns
//! its slot; dropping it (on success or on an error path) releases the lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use log::trace;
use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

/// Dead slots are swept once the table grows past this many entries.
const SLOT_SWEEP_THRESHOLD: usize = 4096;

type Slot = Mutex<()>;

pub struct InodeLocks {
    slots: spin::Mutex<BTreeMap<u64, Weak<Slot>>>,
}

/// Exclusive hold on one inode. Released on drop.
pub struct InodeGuard {
    ino: u64,
    _held: ArcMutexGuard<RawMutex, ()>,
}

impl InodeGuard {
    pub fn ino(&self) -> u64 {
        self.ino
    }
}

impl std::fmt::Debug for InodeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InodeGuard").field("ino", &self.ino).finish()
    }
}

impl Default for InodeLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeLocks {
    pub fn new() -> Self {
        Self {
            slots: spin::Mutex::new(BTreeMap::new()),
        }
    }

    /// Blocks until the inode is free, then holds it until the guard drops.
    pub fn lock(&self, ino: u64) -> InodeGuard {
        let slot = self.slot(ino);
        trace!("waiting for inode lock ino={}", ino);
        InodeGuard {
            ino,
            _held: slot.lock_arc(),
        }
    }

    #[cfg(test)]
    pub(crate) fn try_lock(&self, ino: u64) -> Option<InodeGuard> {
        let slot = self.slot(ino);
        slot.try_lock_arc().map(|held| InodeGuard { ino, _held: held })
    }

    /// Number of slots currently tracked, live or not yet swept.
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.slots.lock().len()
    }

    fn slot(&self, ino: u64) -> Arc<Slot> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&ino).and_then(Weak::upgrade) {
            return slot;
        }
        let slot = Arc::new(Mutex::new(()));
        slots.insert(ino, Arc::downgrade(&slot));
        if slots.len() > SLOT_SWEEP_THRESHOLD {
            slots.retain(|_, weak| weak.strong_count() > 0);
        }
        slot
    }
}
