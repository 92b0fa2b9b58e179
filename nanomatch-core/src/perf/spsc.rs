//! Single-producer single-consumer ring buffer
//!
//! The hand-off primitive between pipeline stages. A bounded power-of-two
//! ring with the write and read indices on separate cache lines; the
//! producer publishes slots with release stores, the consumer observes
//! them with acquire loads, so everything written to a slot before
//! `commit_write` is visible after the matching `peek_read`.
//!
//! [`ring`] returns an unclonable [`Producer`] / [`Consumer`] pair, which
//! makes the one-writer/one-reader discipline a compile-time property
//! instead of a comment. Full-versus-empty is distinguished by leaving one
//! slot unused, so occupancy ranges over `[0, N-1]`.
//!
//! Nothing here allocates after construction, and nothing blocks: a full
//! ring returns `None` from `reserve_write` and the caller chooses its
//! overflow policy.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

struct RingShared<T> {
    store: Box<[UnsafeCell<T>]>,
    mask: usize,
    write_pos: CachePadded<AtomicUsize>,
    read_pos: CachePadded<AtomicUsize>,
}

// Slots are only touched by whichever handle currently owns the index, so
// sharing the ring across the two handle threads is sound for T: Send.
unsafe impl<T: Send> Send for RingShared<T> {}
unsafe impl<T: Send> Sync for RingShared<T> {}

impl<T> RingShared<T> {
    #[inline(always)]
    fn size(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read) & self.mask
    }
}

/// Create a ring of the given capacity and split it into its two endpoints.
///
/// Slots are pre-constructed with `T::default()` so the producer only ever
/// overwrites in place.
///
/// # Panics
/// If `capacity` is not a power of two >= 2. That is a wiring bug, not a
/// runtime condition, and aborts rather than limping on.
pub fn ring<T: Default>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(
        capacity.is_power_of_two() && capacity >= 2,
        "SPSC ring capacity must be a power of two >= 2, got {capacity}"
    );

    let store: Box<[UnsafeCell<T>]> = (0..capacity)
        .map(|_| UnsafeCell::new(T::default()))
        .collect();

    let shared = Arc::new(RingShared {
        store,
        mask: capacity - 1,
        write_pos: CachePadded::new(AtomicUsize::new(0)),
        read_pos: CachePadded::new(AtomicUsize::new(0)),
    });

    (
        Producer {
            ring: Arc::clone(&shared),
        },
        Consumer { ring: shared },
    )
}

/// Writing endpoint of an SPSC ring. Exactly one exists per ring.
pub struct Producer<T> {
    ring: Arc<RingShared<T>>,
}

impl<T> Producer<T> {
    /// Next writable slot, or `None` if the ring is full.
    ///
    /// Does not publish; pair every `Some` with a [`Self::commit_write`].
    #[inline(always)]
    pub fn reserve_write(&mut self) -> Option<&mut T> {
        let write = self.ring.write_pos.load(Ordering::Relaxed);
        let next = (write + 1) & self.ring.mask;
        if next == self.ring.read_pos.load(Ordering::Acquire) {
            return None;
        }
        // Sole producer: nothing else can touch this slot until published.
        Some(unsafe { &mut *self.ring.store[write].get() })
    }

    /// Publish the most recently reserved slot to the consumer.
    #[inline(always)]
    pub fn commit_write(&mut self) {
        let write = self.ring.write_pos.load(Ordering::Relaxed);
        self.ring
            .write_pos
            .store((write + 1) & self.ring.mask, Ordering::Release);
    }

    /// Reserve, write, and publish in one call. Returns false when full.
    #[inline(always)]
    pub fn push(&mut self, value: T) -> bool {
        match self.reserve_write() {
            Some(slot) => {
                *slot = value;
                self.commit_write();
                true
            }
            None => false,
        }
    }

    /// Approximate occupancy; exact only when both threads are quiescent.
    #[inline]
    pub fn size(&self) -> usize {
        self.ring.size()
    }

    /// Total slots, of which one is always left unused.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.store.len()
    }
}

/// Reading endpoint of an SPSC ring. Exactly one exists per ring.
pub struct Consumer<T> {
    ring: Arc<RingShared<T>>,
}

impl<T> Consumer<T> {
    /// Next readable slot without consuming it, or `None` if empty.
    #[inline(always)]
    pub fn peek_read(&mut self) -> Option<&T> {
        let read = self.ring.read_pos.load(Ordering::Relaxed);
        if read == self.ring.write_pos.load(Ordering::Acquire) {
            return None;
        }
        Some(unsafe { &*self.ring.store[read].get() })
    }

    /// Release the slot returned by the last `peek_read` back to the
    /// producer. Returns false if the ring was empty.
    #[inline(always)]
    pub fn commit_read(&mut self) -> bool {
        let read = self.ring.read_pos.load(Ordering::Relaxed);
        if read == self.ring.write_pos.load(Ordering::Acquire) {
            return false;
        }
        self.ring
            .read_pos
            .store((read + 1) & self.ring.mask, Ordering::Release);
        true
    }

    /// Copy out the next value and release its slot.
    #[inline(always)]
    pub fn pop(&mut self) -> Option<T>
    where
        T: Clone,
    {
        let value = self.peek_read()?.clone();
        self.commit_read();
        Some(value)
    }

    /// Approximate occupancy; exact only when both threads are quiescent.
    #[inline]
    pub fn size(&self) -> usize {
        self.ring.size()
    }

    /// Total slots, of which one is always left unused.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = ring::<u64>(8);
        for value in 1..=7u64 {
            assert!(tx.push(value));
        }
        for expected in 1..=7u64 {
            assert_eq!(rx.pop(), Some(expected));
        }
        assert_eq!(rx.pop(), None);
        assert_eq!(rx.size(), 0);
    }

    #[test]
    fn test_full_then_drain_one() {
        let (mut tx, mut rx) = ring::<u64>(4);
        assert!(tx.push(1));
        assert!(tx.push(2));
        assert!(tx.push(3));
        // One slot stays unused: capacity 4 holds at most 3.
        assert!(tx.reserve_write().is_none());
        assert!(!tx.push(4));

        assert_eq!(rx.pop(), Some(1));
        assert!(tx.reserve_write().is_some());
        assert!(tx.push(4));
        assert_eq!(rx.size(), 3);
    }

    #[test]
    fn test_reserve_commit_api() {
        let (mut tx, mut rx) = ring::<u64>(8);

        let slot = tx.reserve_write().unwrap();
        *slot = 99;
        tx.commit_write();

        assert_eq!(rx.peek_read(), Some(&99));
        // Peek does not consume.
        assert_eq!(rx.peek_read(), Some(&99));
        assert!(rx.commit_read());
        assert!(!rx.commit_read());
    }

    #[test]
    fn test_occupancy_bounds() {
        let (mut tx, mut rx) = ring::<u32>(16);
        for round in 0..100u32 {
            assert!(tx.size() <= 15);
            if round % 3 == 0 {
                rx.pop();
            } else {
                tx.push(round);
            }
        }
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_non_power_of_two_rejected() {
        let _ = ring::<u64>(6);
    }

    #[test]
    fn test_cross_thread_fifo() {
        const COUNT: u64 = 100_000;
        let (mut tx, mut rx) = ring::<u64>(1024);

        let producer = thread::spawn(move || {
            for value in 0..COUNT {
                while !tx.push(value) {
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0u64;
        while expected < COUNT {
            if let Some(value) = rx.pop() {
                assert_eq!(value, expected);
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }

        producer.join().unwrap();
        assert_eq!(rx.size(), 0);
    }

    #[test]
    fn test_slot_writes_visible_after_publish() {
        #[derive(Clone, Default, PartialEq, Debug)]
        struct Payload {
            a: u64,
            b: u64,
        }

        let (mut tx, mut rx) = ring::<Payload>(8);
        let handle = thread::spawn(move || {
            let slot = tx.reserve_write().unwrap();
            slot.a = 11;
            slot.b = 22;
            tx.commit_write();
        });
        handle.join().unwrap();

        let seen = rx.pop().unwrap();
        assert_eq!(seen, Payload { a: 11, b: 22 });
    }
}
