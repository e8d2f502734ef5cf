/*
 * Thread Id Allocation
 *
 * Ids live in [1, MAX_THREADS); id 0 belongs to the main thread and is
 * never handed out. Allocation always yields the smallest free id, and a
 * released id becomes available again immediately, so a freed slot is
 * reused before higher ids are touched.
 */

use std::collections::BTreeSet;

use super::MAX_THREADS;
use super::thread::ThreadId;

/// Smallest-free allocator over the spawnable id range.
pub struct IdAllocator {
    free: BTreeSet<usize>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            free: (1..MAX_THREADS).collect(),
        }
    }

    /// Take the smallest free id, or `None` when every id is live.
    pub fn allocate(&mut self) -> Option<ThreadId> {
        let id = self.free.first().copied()?;
        self.free.remove(&id);
        Some(ThreadId(id))
    }

    /// Return a terminated thread's id to the pool.
    pub fn release(&mut self, id: ThreadId) {
        self.free.insert(id.0);
    }
}
