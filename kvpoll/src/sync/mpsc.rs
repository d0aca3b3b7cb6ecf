//! Lock-free MPSC queue for in-process (inter-thread) communication.
//!
//! A bounded queue using a heap-allocated ring buffer with per-slot sequence
//! numbers.
//!
//! # Overview
//!
//! - [`Producer`] - Write end, cloneable and shareable between threads
//! - [`Consumer`] - Read end (single consumer per queue)
//! - Lock-free: no mutexes or syscalls in the hot path
//!
//! # Example
//!
//! ```
//! use std::num::NonZeroUsize;
//! use kvpoll::sync::mpsc;
//!
//! let (producer, consumer) = mpsc::channel::<u64>(NonZeroUsize::new(1024).unwrap());
//!
//! // Any number of producer threads
//! let other = producer.clone();
//! std::thread::spawn(move || other.push(7).expect("queue full"))
//!     .join()
//!     .unwrap();
//!
//! // Exactly one consumer
//! assert_eq!(consumer.pop(), Some(7));
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::mpsc::ring::Ring;

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the MPSC queue.
///
/// Cloning yields another producer for the same queue. Producers are both
/// [`Send`] and [`Sync`]; concurrent `push` calls are safe.
pub struct Producer<T: Send> {
    ring: Arc<Ring<T>>,
}

impl<T: Send> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Read end of the MPSC queue.
///
/// # Thread Safety
///
/// `Consumer` is [`Send`] but **not** [`Sync`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Consumer` (no concurrent `pop()`)
pub struct Consumer<T: Send> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Creates a new MPSC channel holding at most `capacity` items.
///
/// Capacities below two are raised to two.
/// Returns a `(Producer, Consumer)` pair.
#[must_use]
pub fn channel<T: Send>(capacity: NonZeroUsize) -> (Producer<T>, Consumer<T>) {
    let ring = Arc::new(Ring::with_capacity(capacity));

    let producer = Producer {
        ring: Arc::clone(&ring),
    };
    let consumer = Consumer {
        ring,
        _unsync: PhantomData,
    };

    (producer, consumer)
}

impl<T: Send> Producer<T> {
    /// Attempts to push an item onto the queue (lock-free, never blocks).
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full, handing the item back.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        self.ring.push(item)
    }

    /// Maximum number of items the queue holds.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl<T: Send> Consumer<T> {
    /// Attempts to pop an item from the queue.
    ///
    /// Returns `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: Consumer is !Sync and not Clone, so this is the only reader.
        unsafe { self.ring.pop() }
    }

    /// Number of items pushed (or being pushed) and not yet popped.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.ring.pending()
    }

    /// Returns `true` if no item is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_basic_push_pop() {
        let (producer, consumer) = channel::<u64>(cap(8));

        assert!(producer.push(42).is_ok());
        assert_eq!(consumer.pending(), 1);
        assert_eq!(consumer.pop(), Some(42));
        assert_eq!(consumer.pop(), None);
        assert!(consumer.is_empty());
    }

    #[test]
    fn test_queue_full_hands_item_back() {
        let (producer, consumer) = channel::<String>(cap(2));

        producer.push("a".to_string()).unwrap();
        producer.push("b".to_string()).unwrap();
        assert_eq!(producer.push("c".to_string()), Err("c".to_string()));

        assert_eq!(consumer.pop().as_deref(), Some("a"));
        assert!(producer.push("c".to_string()).is_ok());
    }

    #[test]
    fn test_cloned_producers_share_queue() {
        let (producer, consumer) = channel::<u64>(cap(16));
        let second = producer.clone();

        producer.push(1).unwrap();
        second.push(2).unwrap();

        assert_eq!(consumer.pop(), Some(1));
        assert_eq!(consumer.pop(), Some(2));
        assert_eq!(producer.capacity(), 16);
    }

    #[test]
    fn test_concurrent_push_pop() {
        let (producer, consumer) = channel::<u64>(cap(64));
        let count = 1000u64;

        let producer_handle = std::thread::spawn(move || {
            for i in 0..count {
                while producer.push(i).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let mut received = Vec::with_capacity(count as usize);
        while received.len() < count as usize {
            if let Some(item) = consumer.pop() {
                received.push(item);
            } else {
                std::hint::spin_loop();
            }
        }
        producer_handle.join().unwrap();

        for (i, &val) in received.iter().enumerate() {
            assert_eq!(val, i as u64);
        }
    }
}
