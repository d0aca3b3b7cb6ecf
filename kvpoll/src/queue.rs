//! Per-session action queue.
//!
//! [`ActionSender`]s are cloned into completion closures and run on I/O
//! threads; the single [`ActionReceiver`] belongs to the session and is only
//! drained by `poll`. The queue is unbounded and lock-free, so enqueueing never
//! blocks and never fails while the session is open. Handles whose reply
//! closures are dropped uncalled are parked on an orphan list that the polling
//! thread retires later. The registry itself is never touched off the polling
//! thread.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam::queue::SegQueue;

use crate::action::{Action, Event};
use crate::registry::Handle;
use crate::trace::trace;

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

struct Shared<E: Event> {
    actions: SegQueue<Action<E>>,
    orphans: Mutex<Vec<Handle>>,
    closed: AtomicBool,
}

impl<E: Event> Shared<E> {
    fn orphan(&self, handle: Handle) {
        self.orphans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn take_orphans(&self) -> Vec<Handle> {
        std::mem::take(&mut *self.orphans.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Producer side of a session's action queue.
pub struct ActionSender<E: Event> {
    shared: Arc<Shared<E>>,
}

impl<E: Event> Clone for ActionSender<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Consumer side of a session's action queue.
///
/// `Send` but not `Sync`: only one thread drains it.
pub struct ActionReceiver<E: Event> {
    shared: Arc<Shared<E>>,
    _unsync: PhantomUnsync,
}

/// Creates the queue for one session.
#[must_use]
pub fn action_queue<E: Event>() -> (ActionSender<E>, ActionReceiver<E>) {
    let shared = Arc::new(Shared {
        actions: SegQueue::new(),
        orphans: Mutex::new(Vec::new()),
        closed: AtomicBool::new(false),
    });
    (
        ActionSender {
            shared: Arc::clone(&shared),
        },
        ActionReceiver {
            shared,
            _unsync: PhantomData,
        },
    )
}

impl<E: Event> ActionSender<E> {
    /// Enqueues an action without blocking.
    ///
    /// Returns `false` only once the receiver has been closed. The action is
    /// then dropped: the session that owned its callback is gone.
    pub fn enqueue(&self, action: Action<E>) -> bool {
        if self.shared.closed.load(Ordering::Acquire) {
            trace!(handle = ?action.callback(), "queue closed, dropping action");
            return false;
        }
        self.shared.actions.push(action);
        true
    }

    /// Parks a handle whose action will never be enqueued.
    pub(crate) fn orphan(&self, handle: Handle) {
        if !self.shared.closed.load(Ordering::Acquire) {
            self.shared.orphan(handle);
        }
    }
}

impl<E: Event> ActionReceiver<E> {
    /// Takes the oldest action. Only the polling thread calls this.
    #[must_use]
    pub fn dequeue(&self) -> Option<Action<E>> {
        self.shared.actions.pop()
    }

    /// Actions enqueued and not yet dequeued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.actions.len()
    }

    /// Handles whose actions were lost, emptying the orphan list.
    pub(crate) fn take_orphans(&self) -> Vec<Handle> {
        self.shared.take_orphans()
    }

    /// Refuses further actions and drops everything still queued.
    ///
    /// Returns the number of actions discarded.
    pub fn close(&self) -> usize {
        self.shared.closed.store(true, Ordering::Release);
        let mut discarded = 0;
        while self.shared.actions.pop().is_some() {
            discarded += 1;
        }
        discarded
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl<E: Event> Drop for ActionReceiver<E> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Delivery slot for one pending reply.
///
/// Moved into the completion closure handed to the network. Completing it
/// enqueues the action; dropping it uncompleted (the network discarded the
/// request) orphans the handle, so it is retired either way.
pub(crate) struct ReplyTicket<E: Event> {
    sender: Option<ActionSender<E>>,
    handle: Handle,
}

impl<E: Event> ReplyTicket<E> {
    pub(crate) fn new(sender: ActionSender<E>, handle: Handle) -> Self {
        Self {
            sender: Some(sender),
            handle,
        }
    }

    pub(crate) fn complete(mut self, make: impl FnOnce(Handle) -> E) -> bool {
        match self.sender.take() {
            Some(sender) => sender.enqueue(Action::Event(make(self.handle))),
            None => false,
        }
    }
}

impl<E: Event> Drop for ReplyTicket<E> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.orphan(self.handle);
        }
    }
}
