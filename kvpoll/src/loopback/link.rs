//! One endpoint's connection and the I/O thread driving it.
//!
//! The endpoint pushes [`Request`]s into a bounded queue and unparks the
//! thread. The thread owns the connection lifecycle: it reports every status
//! change, executes requests against the server, runs reply callbacks, and
//! forwards published messages. All callbacks run on this thread.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use minstant::Instant;

use crate::loopback::server::{ConnState, LoopbackServer};
use crate::loopback::{Delivery, Request, Target};
use crate::network::{
    ConnectOptions, ConnectState, MessageCallback, NetworkError, StatusCallback,
};
use crate::reply::WireReply;
use crate::sync::mpsc::{self, Consumer, Producer};
use crate::trace::{debug, info, trace, warn};

/// Requests an endpoint can have in flight to its I/O thread.
pub(crate) const REQUEST_QUEUE_CAPACITY: usize = 1024;

/// Published messages buffered per subscriber.
pub(crate) const INBOX_CAPACITY: usize = 1024;

/// Upper bound on how long the I/O thread sleeps before rechecking the link.
const IDLE_WAIT: Duration = Duration::from_millis(5);

#[derive(Default)]
pub(crate) struct Flags {
    connected: AtomicBool,
    reconnecting: AtomicBool,
    stop: AtomicBool,
}

impl Flags {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::Acquire)
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Handle to a running I/O thread. Dropping it stops and joins the thread.
pub(crate) struct Link {
    requests: Producer<Request>,
    flags: Arc<Flags>,
    thread: Option<JoinHandle<()>>,
}

/// Whether the link carries pub/sub traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Commands,
    Subscriber,
}

impl Link {
    pub(crate) fn spawn(
        server: LoopbackServer,
        options: ConnectOptions,
        status: StatusCallback,
        role: Role,
    ) -> Result<Self, NetworkError> {
        let capacity = NonZeroUsize::new(REQUEST_QUEUE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        let (requests, queue) = mpsc::channel(capacity);
        let flags = Arc::new(Flags::default());
        let peer = server.next_peer_id();

        let inbox = match role {
            Role::Subscriber => Some(mpsc::channel(
                NonZeroUsize::new(INBOX_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            Role::Commands => None,
        };

        let io = IoLoop {
            server,
            options,
            status,
            flags: Arc::clone(&flags),
            queue,
            inbox,
            peer,
            conn: ConnState::default(),
            subscriptions: Vec::new(),
        };

        let thread = thread::Builder::new()
            .name(format!("kvpoll-io-{peer}"))
            .spawn(move || io.run())
            .map_err(|err| NetworkError::Rejected(err.to_string()))?;

        Ok(Self {
            requests,
            flags,
            thread: Some(thread),
        })
    }

    /// Hands a request to the I/O thread.
    ///
    /// # Errors
    ///
    /// Returns the request if the queue is full.
    pub(crate) fn submit(&self, request: Request) -> Result<(), Request> {
        self.requests.push(request)?;
        self.wake();
        Ok(())
    }

    pub(crate) fn flags(&self) -> &Flags {
        &self.flags
    }

    fn wake(&self) {
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.flags.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                warn!("loopback I/O thread panicked");
            }
        }
    }
}

enum Outcome {
    Stopped,
    Dropped,
}

struct IoLoop {
    server: LoopbackServer,
    options: ConnectOptions,
    status: StatusCallback,
    flags: Arc<Flags>,
    queue: Consumer<Request>,
    inbox: Option<(Producer<Delivery>, Consumer<Delivery>)>,
    peer: u64,
    conn: ConnState,
    /// Survives reconnects; re-registered with the server on every connect.
    subscriptions: Vec<(Target, MessageCallback)>,
}

impl IoLoop {
    fn run(mut self) {
        let mut failures = 0u32;

        while !self.flags.stopping() {
            self.report(ConnectState::Start);
            let lost = match self.server.open(&self.options.host) {
                Ok(epoch) => {
                    failures = 0;
                    self.attach();
                    self.flags.reconnecting.store(false, Ordering::Release);
                    self.flags.connected.store(true, Ordering::Release);
                    info!(peer = self.peer, epoch, "loopback connected");
                    self.report(ConnectState::Ok);

                    let outcome = self.serve(epoch);
                    self.flags.connected.store(false, Ordering::Release);
                    self.detach();
                    match outcome {
                        Outcome::Stopped => break,
                        Outcome::Dropped => ConnectState::Dropped,
                    }
                }
                Err(state) => state,
            };

            failures += 1;
            let retry = self
                .options
                .max_reconnects
                .is_none_or(|max| failures <= max);
            self.flags.reconnecting.store(retry, Ordering::Release);
            debug!(peer = self.peer, ?lost, failures, retry, "loopback link down");
            self.report(lost);
            if !retry {
                break;
            }

            self.report(ConnectState::Sleeping);
            self.sleep(self.options.reconnect_interval);
        }

        self.flags.reconnecting.store(false, Ordering::Release);
        self.flags.connected.store(false, Ordering::Release);
        self.discard_requests();
        self.report(ConnectState::Stopped);
        debug!(peer = self.peer, "loopback I/O thread exiting");
    }

    fn serve(&mut self, epoch: u64) -> Outcome {
        loop {
            if self.flags.stopping() {
                return Outcome::Stopped;
            }
            if !self.server.is_up(epoch) {
                return Outcome::Dropped;
            }

            while let Some(request) = self.queue.pop() {
                self.handle(request);
            }
            self.forward_messages();

            thread::park_timeout(IDLE_WAIT);
        }
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Command { command, reply } => {
                let result = self.server.execute(&mut self.conn, &command);
                trace!(peer = self.peer, %command, "executed");
                if let Some(reply) = reply {
                    reply(result);
                }
            }
            Request::Subscribe {
                target,
                on_message,
                ack,
            } => {
                let count = self.server.subscribe(self.peer, target.clone());
                let reply = WireReply::Array(vec![
                    WireReply::BulkString(target.ack_kind().to_string()),
                    WireReply::BulkString(target.name().to_string()),
                    WireReply::Integer(i64::try_from(count).unwrap_or(i64::MAX)),
                ]);
                self.subscriptions.retain(|(existing, _)| *existing != target);
                self.subscriptions.push((target, on_message));
                if let Some(ack) = ack {
                    ack(reply);
                }
            }
            Request::Unsubscribe(target) => {
                self.server.unsubscribe(self.peer, &target);
                self.subscriptions.retain(|(existing, _)| *existing != target);
            }
        }
    }

    fn forward_messages(&self) {
        let Some((_, inbox)) = &self.inbox else {
            return;
        };
        while let Some(delivery) = inbox.pop() {
            if let Some((_, on_message)) = self
                .subscriptions
                .iter()
                .find(|(target, _)| *target == delivery.target)
            {
                on_message(&delivery.channel, &delivery.payload);
            }
        }
    }

    fn attach(&mut self) {
        self.conn = ConnState::default();
        let Some((producer, _)) = &self.inbox else {
            return;
        };
        self.server
            .attach(self.peer, producer.clone(), thread::current());
        for (target, _) in &self.subscriptions {
            self.server.subscribe(self.peer, target.clone());
        }
    }

    fn detach(&mut self) {
        if self.inbox.is_some() {
            self.server.detach(self.peer);
        }
        self.discard_requests();
    }

    /// Drops queued requests. Their reply callbacks are dropped uncalled.
    fn discard_requests(&mut self) {
        let mut discarded = 0usize;
        while self.queue.pop().is_some() {
            discarded += 1;
        }
        if let Some((_, inbox)) = &self.inbox {
            while inbox.pop().is_some() {}
        }
        if discarded > 0 {
            debug!(peer = self.peer, discarded, "discarded requests on link loss");
        }
    }

    /// Sleeps for `interval`, returning early if asked to stop.
    fn sleep(&self, interval: Duration) {
        let deadline = Instant::now() + interval;
        while !self.flags.stopping() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return;
            };
            thread::park_timeout(remaining);
        }
    }

    fn report(&self, state: ConnectState) {
        trace!(peer = self.peer, ?state, "status");
        (self.status)(state);
    }
}
