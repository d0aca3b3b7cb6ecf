//! Core lock-free MPSC ring buffer algorithm.
//!
//! A bounded MPSC (Multi-Producer Single-Consumer) ring buffer using per-slot
//! sequence numbers for synchronization. Capacity is chosen at runtime and the
//! slots live in a single heap allocation.
//!
//! # Algorithm
//!
//! Based on Dmitry Vyukov's bounded MPMC queue, simplified for the
//! single-consumer case:
//!
//! - Each slot has an atomic sequence number
//! - Producers CAS on head to reserve exclusive write positions
//! - After writing, producers publish by setting `slot.seq = pos + 1`
//! - Consumer checks if `slot.seq == tail + 1` before reading
//! - After reading, consumer sets `slot.seq = tail + capacity` to release the slot
//!
//! # Safety
//!
//! The producer side is lock-free for any number of concurrent producers.
//! The consumer side requires exactly one consumer (single consumer invariant).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A slot in the ring with a sequence number for synchronization.
#[repr(C)]
#[repr(align(64))] // Each slot on its own cache line to avoid false sharing between producers
pub(crate) struct Slot<T> {
    /// - Initial: slot index (0, 1, 2, ..., N-1)
    /// - After producer write: position + 1 (signals "data ready")
    /// - After consumer read: position + N (signals "slot free")
    seq: AtomicUsize,

    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn new(seq: usize) -> Self {
        Self {
            seq: AtomicUsize::new(seq),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

// SAFETY: the value cell is only touched by the producer that reserved the
// position or by the single consumer after the sequence number handed it over.
unsafe impl<T: Send> Sync for Slot<T> {}
unsafe impl<T: Send> Send for Slot<T> {}

/// Head and tail live on separate cache lines.
#[repr(C)]
#[repr(align(64))]
struct Cursor(AtomicUsize);

/// Heap-backed MPSC ring.
pub(crate) struct Ring<T> {
    /// Next position to reserve for writing. Shared by all producers.
    head: Cursor,
    /// Next position to read from. Only the consumer modifies this.
    tail: Cursor,
    buffer: Box<[Slot<T>]>,
}

/// Smallest usable ring. With one slot a published sequence (`pos + 1`)
/// equals the next position, so a full slot would look free.
pub(crate) const MIN_CAPACITY: usize = 2;

impl<T> Ring<T> {
    /// Creates a ring with `capacity` slots, raised to [`MIN_CAPACITY`].
    pub(crate) fn with_capacity(capacity: NonZeroUsize) -> Self {
        let buffer = (0..capacity.get().max(MIN_CAPACITY))
            .map(Slot::new)
            .collect();
        Self {
            head: Cursor(AtomicUsize::new(0)),
            tail: Cursor(AtomicUsize::new(0)),
            buffer,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of reserved positions not yet consumed.
    ///
    /// A reservation becomes readable only once its producer publishes it, so
    /// this may briefly count an item that `pop` cannot return yet.
    #[inline]
    pub(crate) fn pending(&self) -> usize {
        // Tail first: head only grows, so head >= this tail snapshot.
        let tail = self.tail.0.load(Ordering::Acquire);
        let head = self.head.0.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    /// Attempts to push an item onto the queue.
    ///
    /// Lock-free for producers; any number of threads may call this
    /// concurrently.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if every slot is occupied.
    #[inline]
    pub(crate) fn push(&self, item: T) -> Result<(), T> {
        let capacity = self.capacity();
        loop {
            let pos = self.head.0.load(Ordering::Relaxed);
            let slot = &self.buffer[pos % capacity];

            let seq = slot.seq.load(Ordering::Acquire);

            // Wrapping difference between sequence and position.
            let diff = seq.wrapping_sub(pos) as isize;

            if diff == 0 {
                if self
                    .head
                    .0
                    .compare_exchange_weak(
                        pos,
                        pos.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // SAFETY: the CAS gave us exclusive ownership of `pos`, and
                    // seq == pos means the consumer has released the slot.
                    unsafe {
                        (*slot.value.get()).write(item);
                    }
                    slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                    return Ok(());
                }
                // Another producer won the CAS; retry with the new head.
            } else if diff < 0 {
                // The consumer has not released this slot yet: full.
                return Err(item);
            }
            // diff > 0: head moved past this position, reload.
        }
    }

    /// Attempts to pop an item from the queue.
    ///
    /// # Safety
    ///
    /// Only one thread may call this at a time (single consumer).
    #[inline]
    pub(crate) unsafe fn pop(&self) -> Option<T> {
        let capacity = self.capacity();
        let tail = self.tail.0.load(Ordering::Relaxed);
        let slot = &self.buffer[tail % capacity];

        let seq = slot.seq.load(Ordering::Acquire);
        if seq != tail.wrapping_add(1) {
            return None;
        }

        // SAFETY: the sequence check confirms the producer finished writing and
        // the single-consumer contract means nobody else reads this slot.
        let item = unsafe { (*slot.value.get()).assume_init_read() };

        // Release the slot for position tail + capacity.
        slot.seq.store(tail.wrapping_add(capacity), Ordering::Release);
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);

        Some(item)
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no producer or consumer is still running.
        while let Some(item) = unsafe { self.pop() } {
            drop(item);
        }
    }
}

// SAFETY: concurrent access is mediated by the head CAS and the per-slot
// sequence numbers.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::thread;

    fn ring<T>(capacity: usize) -> Ring<T> {
        Ring::with_capacity(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_single_producer_single_consumer() {
        let ring: Ring<u64> = ring(8);

        assert!(ring.push(1).is_ok());
        assert!(ring.push(2).is_ok());
        assert!(ring.push(3).is_ok());
        assert_eq!(ring.pending(), 3);

        unsafe {
            assert_eq!(ring.pop(), Some(1));
            assert_eq!(ring.pop(), Some(2));
            assert_eq!(ring.pop(), Some(3));
            assert_eq!(ring.pop(), None);
        }
        assert_eq!(ring.pending(), 0);
    }

    #[test]
    fn test_queue_full() {
        let ring: Ring<u64> = ring(4);

        for i in 1..=4 {
            assert!(ring.push(i).is_ok());
        }
        assert_eq!(ring.push(5), Err(5));

        unsafe {
            assert_eq!(ring.pop(), Some(1));
        }
        assert!(ring.push(5).is_ok());
        assert_eq!(ring.push(6), Err(6));
    }

    #[test]
    fn test_smallest_capacities_report_full() {
        for requested in [1, 2] {
            let ring: Ring<u64> = ring(requested);
            assert_eq!(ring.capacity(), MIN_CAPACITY);

            assert!(ring.push(1).is_ok());
            assert!(ring.push(2).is_ok());
            assert_eq!(ring.push(3), Err(3));
            assert_eq!(ring.pending(), 2);

            unsafe {
                assert_eq!(ring.pop(), Some(1));
            }
            assert!(ring.push(3).is_ok());
            assert_eq!(ring.push(4), Err(4));
            unsafe {
                assert_eq!(ring.pop(), Some(2));
                assert_eq!(ring.pop(), Some(3));
                assert_eq!(ring.pop(), None);
            }
            assert_eq!(ring.pending(), 0);
        }
    }

    #[test]
    fn test_wrapping_with_odd_capacity() {
        let ring: Ring<u64> = ring(3);

        for round in 0..10 {
            for i in 0..3 {
                ring.push(round * 10 + i).unwrap();
            }
            for i in 0..3 {
                assert_eq!(unsafe { ring.pop() }, Some(round * 10 + i));
            }
        }
    }

    #[test]
    fn test_drop_releases_unconsumed_items() {
        let marker = Rc::new(());
        {
            // Rc is !Send; Ring's Send bound is only needed for sharing.
            let ring: Ring<Rc<()>> = ring(4);
            ring.push(Rc::clone(&marker)).unwrap();
            ring.push(Rc::clone(&marker)).unwrap();
            assert_eq!(Rc::strong_count(&marker), 3);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn test_multiple_producers() {
        let ring: Arc<Ring<u64>> = Arc::new(ring(64));
        let num_producers = 4;
        let items_per_producer = 50;

        let handles: Vec<_> = (0..num_producers)
            .map(|p| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..items_per_producer {
                        let value = (p * 1000 + i) as u64;
                        while ring.push(value).is_err() {
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut items = Vec::new();
        while items.len() < num_producers * items_per_producer {
            match unsafe { ring.pop() } {
                Some(item) => items.push(item),
                None => thread::yield_now(),
            }
        }
        for h in handles {
            h.join().unwrap();
        }

        // Per-producer order must be preserved.
        for p in 0..num_producers as u64 {
            let seen: Vec<_> = items.iter().filter(|v| **v / 1000 == p).copied().collect();
            let expected: Vec<_> = (0..items_per_producer as u64).map(|i| p * 1000 + i).collect();
            assert_eq!(seen, expected, "producer {p} out of order");
        }
    }
}
