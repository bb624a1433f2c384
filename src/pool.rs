//! Allocator pools: a fixed-size-class free-list allocator for values that
//! are frequently allocated and released in the hot path (tuples, cons
//! cells, struct backing stores).
//!
//! A pool grows by chunks that double in element count, and a released slot
//! goes onto a free list served before any further growth. A free slot must
//! always be returned to its originating pool, even when it is released from
//! a different worker thread than the one that allocated it (a tuple built
//! on one worker can end up owned by a trie leaf on another after delivery).
//!
//! The cross-thread return path is a `crossbeam_channel`: every [`Slot`]
//! carries a sender cloned from its originating [`Pool`], and dropping the
//! slot sends the value back over that channel regardless of which thread
//! the drop runs on. The owning thread drains the channel into its local
//! free list at its own pace (`drain_returns`, called automatically before
//! every allocation). The doubling growth policy is preserved as
//! `chunk_elems` bookkeeping, even though Rust's global allocator — not this
//! module — does the actual memory management.

use crossbeam_channel::{Receiver, Sender};

use crate::error::PoolError;

/// A pooled value. Returns itself to its originating pool on drop.
pub struct Slot<T: Send + 'static> {
    value: Option<T>,
    returner: Sender<T>,
}

impl<T: Send + 'static> Slot<T> {
    pub fn get(&self) -> &T {
        self.value.as_ref().expect("slot value taken before drop")
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("slot value taken before drop")
    }

    /// Detaches the value without returning it to the pool (used when the
    /// value is being moved into a longer-lived container, e.g. a trie leaf,
    /// whose own lifecycle will release it separately).
    pub fn into_inner(mut self) -> T {
        self.value.take().expect("slot value taken before drop")
    }
}

impl<T: Send + 'static> Drop for Slot<T> {
    fn drop(&mut self) {
        if let Some(v) = self.value.take() {
            // A disconnected receiver means the pool itself was dropped;
            // the value is simply dropped normally in that case.
            let _ = self.returner.send(v);
        }
    }
}

/// A fixed-size-class object pool for one thread. `T` is the slot payload
/// (a tuple, cons cell, or struct backing store).
pub struct Pool<T: Send + 'static> {
    free: Vec<T>,
    returner: Sender<T>,
    receiver: Receiver<T>,
    chunk_elems: usize,
    max_chunk_elems: usize,
    max_total_live: Option<usize>,
    total_live: usize,
}

impl<T: Send + 'static> Pool<T> {
    pub fn new(initial_chunk_elems: usize, max_chunk_elems: usize) -> Self {
        let (returner, receiver) = crossbeam_channel::unbounded();
        Pool {
            free: Vec::new(),
            returner,
            receiver,
            chunk_elems: initial_chunk_elems.max(1),
            max_chunk_elems: max_chunk_elems.max(1),
            max_total_live: None,
            total_live: 0,
        }
    }

    /// Caps the number of simultaneously live slots; past this, `allocate`
    /// returns `PoolError::OutOfMemory` instead of growing further. Used to
    /// exercise a worker's OOM-propagation path deterministically in tests.
    pub fn with_live_cap(mut self, cap: usize) -> Self {
        self.max_total_live = Some(cap);
        self
    }

    /// Pulls slots returned by other threads back into the local free list.
    pub fn drain_returns(&mut self) {
        while let Ok(v) = self.receiver.try_recv() {
            self.free.push(v);
            self.total_live -= 1;
        }
    }

    pub fn allocate(&mut self, make: impl FnOnce() -> T) -> Result<Slot<T>, PoolError> {
        self.drain_returns();

        let value = match self.free.pop() {
            Some(v) => v,
            None => {
                if let Some(cap) = self.max_total_live {
                    if self.total_live >= cap {
                        tracing::warn!(cap, "pool_exhausted");
                        return Err(PoolError::OutOfMemory { requested: 1 });
                    }
                }
                self.grow_chunk();
                make()
            }
        };
        self.total_live += 1;
        Ok(Slot { value: Some(value), returner: self.returner.clone() })
    }

    fn grow_chunk(&mut self) {
        if self.chunk_elems < self.max_chunk_elems {
            self.chunk_elems = crate::utils::next_power2(self.chunk_elems + 1).min(self.max_chunk_elems);
        }
    }

    pub fn chunk_elems(&self) -> usize {
        self.chunk_elems
    }

    pub fn num_free(&self) -> usize {
        self.free.len()
    }

    pub fn num_live(&self) -> usize {
        self.total_live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn reused_slot_comes_from_free_list() {
        let mut pool: Pool<Vec<u8>> = Pool::new(2, 64);
        let slot = pool.allocate(|| vec![0u8; 8]).unwrap();
        drop(slot);
        pool.drain_returns();
        assert_eq!(pool.num_free(), 1);

        let slot2 = pool.allocate(|| panic!("should reuse freed slot")).unwrap();
        assert_eq!(slot2.get().len(), 8);
    }

    #[test]
    fn chunk_size_doubles_on_growth() {
        let mut pool: Pool<u32> = Pool::new(1, 1024);
        assert_eq!(pool.chunk_elems(), 1);
        let _a = pool.allocate(|| 1).unwrap();
        assert!(pool.chunk_elems() >= 2);
    }

    #[test]
    fn live_cap_reports_out_of_memory() {
        let mut pool: Pool<u32> = Pool::new(1, 64).with_live_cap(1);
        let _a = pool.allocate(|| 1).unwrap();
        let err = pool.allocate(|| 2);
        assert!(matches!(err, Err(PoolError::OutOfMemory { .. })));
    }

    #[test]
    fn slot_dropped_on_another_thread_returns_to_originating_pool() {
        let mut pool: Pool<u32> = Pool::new(4, 64);
        let slot = pool.allocate(|| 42).unwrap();

        let handle = thread::spawn(move || {
            drop(slot);
        });
        handle.join().unwrap();

        pool.drain_returns();
        assert_eq!(pool.num_free(), 1);
    }
}
