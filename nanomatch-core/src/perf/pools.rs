//! Fixed-capacity lock-free object pool
//!
//! A slab of pre-constructed slots, each guarded by its own atomic free
//! flag. Acquiring claims a slot with an acquire-ordered exchange,
//! reinitializes the object in place, and hands back an owning
//! [`PoolHandle`]; dropping the handle releases the slot with a release
//! store and deliberately does NOT run the object's teardown - slots are
//! reused, and callers owning external resources reset them before
//! release.
//!
//! Slot addresses never move and the pool never resizes, so a handle's
//! referent is stable for the pool's lifetime. The `next_free` hint biases
//! the linear search toward recently vacated slots; it is an optimization
//! only and correctness never depends on it.
//!
//! The pool is `Clone` (the slab is shared behind an `Arc`) and safe under
//! arbitrary multi-threaded acquire/release.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::utils::CachePadded;

use crate::config::constants::{POOL_ACQUIRE_HARD_CAP, POOL_YIELD_AFTER};

struct Slot<T> {
    object: UnsafeCell<T>,
    is_free: CachePadded<AtomicBool>,
}

struct PoolShared<T> {
    store: Box<[Slot<T>]>,
    mask: usize,
    next_free: CachePadded<AtomicUsize>,
    in_use: CachePadded<AtomicUsize>,
}

// A claimed slot's object is only reachable through the single PoolHandle
// that claimed it; the flags arbitrate everything else.
unsafe impl<T: Send> Send for PoolShared<T> {}
unsafe impl<T: Send> Sync for PoolShared<T> {}

/// Lock-free pool of pre-constructed `T` slots.
pub struct MemPool<T> {
    shared: Arc<PoolShared<T>>,
}

impl<T> Clone for MemPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Default> MemPool<T> {
    /// Create a pool of `capacity` slots, each initialized with
    /// `T::default()` and marked free.
    ///
    /// # Panics
    /// If `capacity` is not a power of two. Pool sizing is a compile-time
    /// design decision; a bad value aborts at startup.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity >= 1,
            "MemPool capacity must be a power of two, got {capacity}"
        );

        let store: Box<[Slot<T>]> = (0..capacity)
            .map(|_| Slot {
                object: UnsafeCell::new(T::default()),
                is_free: CachePadded::new(AtomicBool::new(true)),
            })
            .collect();

        Self {
            shared: Arc::new(PoolShared {
                store,
                mask: capacity - 1,
                next_free: CachePadded::new(AtomicUsize::new(0)),
                in_use: CachePadded::new(AtomicUsize::new(0)),
            }),
        }
    }
}

impl<T> MemPool<T> {
    /// Claim a slot, reinitialize it with `value`, and return the owning
    /// handle. Returns `None` once the retry budget is spent - the pool is
    /// exhausted and the caller decides whether to drop, spin, or escalate.
    ///
    /// The search starts at the free hint and walks linearly, yielding the
    /// thread after sustained contention.
    pub fn acquire(&self, value: T) -> Option<PoolHandle<T>> {
        let shared = &self.shared;
        let mut index = shared.next_free.load(Ordering::Relaxed) & shared.mask;

        for attempt in 0..POOL_ACQUIRE_HARD_CAP {
            let slot = &shared.store[index];
            if slot.is_free.swap(false, Ordering::Acquire) {
                shared
                    .next_free
                    .store((index + 1) & shared.mask, Ordering::Relaxed);
                // Exclusive: the exchange above made us the slot's owner.
                unsafe {
                    *slot.object.get() = value;
                }
                shared.in_use.fetch_add(1, Ordering::Relaxed);
                return Some(PoolHandle {
                    shared: Arc::clone(shared),
                    index,
                });
            }

            index = (index + 1) & shared.mask;
            if attempt >= POOL_YIELD_AFTER {
                thread::yield_now();
            }
        }

        None
    }

    /// Total number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.store.len()
    }

    /// Slots currently claimed. Eventually consistent under concurrency.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::Relaxed)
    }

    /// Slots currently free. Eventually consistent under concurrency.
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.in_use()
    }

    /// True when every slot is claimed.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.in_use() >= self.capacity()
    }
}

/// Owning handle to a claimed pool slot.
///
/// Dereferences to the slot's object; dropping it returns the slot to the
/// pool without destructing the object.
pub struct PoolHandle<T> {
    shared: Arc<PoolShared<T>>,
    index: usize,
}

// The handle is the slot's unique owner until dropped.
unsafe impl<T: Send> Send for PoolHandle<T> {}

impl<T> PoolHandle<T> {
    /// Index of the underlying slot. Stable for the handle's lifetime.
    #[inline]
    pub fn slot_index(&self) -> usize {
        self.index
    }
}

impl<T> Deref for PoolHandle<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        unsafe { &*self.shared.store[self.index].object.get() }
    }
}

impl<T> DerefMut for PoolHandle<T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.shared.store[self.index].object.get() }
    }
}

impl<T> Drop for PoolHandle<T> {
    fn drop(&mut self) {
        let slot = &self.shared.store[self.index];
        debug_assert!(
            !slot.is_free.load(Ordering::Relaxed),
            "double release of pool slot {}",
            self.index
        );
        self.shared.in_use.fetch_sub(1, Ordering::Relaxed);
        slot.is_free.store(true, Ordering::Release);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("index", &self.index)
            .field("object", &**self)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Order {
        id: u64,
        qty: u32,
    }

    #[test]
    fn test_acquire_release_cycle() {
        let pool: MemPool<Order> = MemPool::new(4);
        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.available(), 4);

        let mut handle = pool.acquire(Order { id: 1, qty: 10 }).unwrap();
        assert_eq!(handle.id, 1);
        handle.qty = 20;
        assert_eq!(pool.in_use(), 1);

        drop(handle);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_exhaustion_and_slot_reuse() {
        let pool: MemPool<Order> = MemPool::new(4);

        let h1 = pool.acquire(Order { id: 1, qty: 1 }).unwrap();
        let h2 = pool.acquire(Order { id: 2, qty: 1 }).unwrap();
        let h3 = pool.acquire(Order { id: 3, qty: 1 }).unwrap();
        let h4 = pool.acquire(Order { id: 4, qty: 1 }).unwrap();

        let indices = [
            h1.slot_index(),
            h2.slot_index(),
            h3.slot_index(),
            h4.slot_index(),
        ];
        let mut sorted = indices;
        sorted.sort_unstable();
        assert_eq!(sorted, [0, 1, 2, 3], "claimed slots must be distinct");

        assert!(pool.is_exhausted());
        assert!(pool.acquire(Order { id: 5, qty: 1 }).is_none());

        // Vacating one slot makes exactly that slot claimable again.
        let freed = h2.slot_index();
        drop(h2);
        let h5 = pool.acquire(Order { id: 5, qty: 1 }).unwrap();
        assert_eq!(h5.slot_index(), freed);
        assert_eq!(h5.id, 5);

        drop((h1, h3, h4, h5));
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_reinitialized_on_acquire() {
        let pool: MemPool<Order> = MemPool::new(2);

        let mut handle = pool.acquire(Order { id: 7, qty: 70 }).unwrap();
        handle.qty = 99;
        let index = handle.slot_index();
        drop(handle);

        // Same slot comes back carrying the new value, not the stale one.
        let handle = pool.acquire(Order { id: 8, qty: 80 }).unwrap();
        assert_eq!(handle.slot_index(), index);
        assert_eq!(*handle, Order { id: 8, qty: 80 });
    }

    #[test]
    fn test_no_leak_over_many_cycles() {
        let pool: MemPool<Order> = MemPool::new(8);
        for round in 0..1_000u64 {
            let handle = pool.acquire(Order { id: round, qty: 0 }).unwrap();
            assert_eq!(handle.id, round);
        }
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 8);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_non_power_of_two_rejected() {
        let _: MemPool<Order> = MemPool::new(12);
    }

    #[test]
    fn test_concurrent_exclusivity() {
        use std::collections::HashSet;
        use std::sync::Mutex;

        let pool: MemPool<Order> = MemPool::new(64);
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..8)
            .map(|thread_id| {
                let pool = pool.clone();
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for i in 0..2_000u64 {
                        if let Some(handle) = pool.acquire(Order {
                            id: thread_id * 1_000_000 + i,
                            qty: 0,
                        }) {
                            // While held, no other thread may hold this index.
                            let index = handle.slot_index();
                            assert!(
                                seen.lock().unwrap().insert(index),
                                "slot {index} handed to two holders"
                            );
                            assert_eq!(handle.id, thread_id * 1_000_000 + i);
                            seen.lock().unwrap().remove(&index);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.in_use(), 0);
    }
}
