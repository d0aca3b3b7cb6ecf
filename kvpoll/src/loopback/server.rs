//! Shared in-memory server state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::Thread;

use minstant::Instant;

use crate::loopback::endpoint::{LoopbackClient, LoopbackSubscriber};
use crate::loopback::{Delivery, LOOPBACK_HOSTS, Target, commands};
use crate::network::{Command, ConnectState};
use crate::reply::WireReply;
use crate::sync::mpsc::Producer;
use crate::trace::{debug, warn};

/// Number of logical databases reachable with `SELECT`.
pub(crate) const DATABASES: usize = 16;

pub(crate) struct Entry {
    pub(crate) value: String,
    pub(crate) expires_at: Option<Instant>,
}

impl Entry {
    pub(crate) const fn new(value: String) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub(crate) fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// A connected subscriber: where to push its messages and how to wake it.
pub(crate) struct Peer {
    inbox: Producer<Delivery>,
    thread: Thread,
    targets: Vec<Target>,
}

pub(crate) struct State {
    pub(crate) databases: Vec<HashMap<String, Entry>>,
    pub(crate) peers: HashMap<u64, Peer>,
    pub(crate) password: Option<String>,
}

impl State {
    pub(crate) fn new(password: Option<String>) -> Self {
        Self {
            databases: (0..DATABASES).map(|_| HashMap::new()).collect(),
            peers: HashMap::new(),
            password,
        }
    }

    /// Routes `payload` to every matching subscription. Returns how many
    /// subscriptions received it.
    pub(crate) fn publish(&mut self, channel: &str, payload: &str) -> usize {
        let mut receivers = 0;
        for peer in self.peers.values() {
            let mut woken = false;
            for target in peer.targets.iter().filter(|target| target.matches(channel)) {
                let delivery = Delivery {
                    target: target.clone(),
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                };
                if peer.inbox.push(delivery).is_err() {
                    warn!(thread = ?peer.thread.name(), channel, "subscriber inbox full, dropping message");
                    continue;
                }
                receivers += 1;
                woken = true;
            }
            if woken {
                peer.thread.unpark();
            }
        }
        receivers
    }
}

/// Per-connection protocol state.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ConnState {
    pub(crate) db: usize,
    pub(crate) authenticated: bool,
}

struct Shared {
    state: Mutex<State>,
    available: AtomicBool,
    epoch: AtomicU64,
    next_peer: AtomicU64,
}

/// In-memory key-value server shared by loopback endpoints.
///
/// Cloning yields another handle to the same server.
#[derive(Clone)]
pub struct LoopbackServer {
    shared: Arc<Shared>,
}

impl Default for LoopbackServer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackServer {
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A server that requires `AUTH password` before any other command.
    #[must_use]
    pub fn with_password(password: impl Into<String>) -> Self {
        Self::build(Some(password.into()))
    }

    fn build(password: Option<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new(password)),
                available: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
                next_peer: AtomicU64::new(0),
            }),
        }
    }

    /// A new request/reply endpoint, not yet connected.
    #[must_use]
    pub fn client(&self) -> LoopbackClient {
        LoopbackClient::new(self.clone())
    }

    /// A new pub/sub endpoint, not yet connected.
    #[must_use]
    pub fn subscriber(&self) -> LoopbackSubscriber {
        LoopbackSubscriber::new(self.clone())
    }

    /// While unavailable, connection attempts fail and live links drop.
    pub fn set_available(&self, available: bool) {
        debug!(available, "loopback availability changed");
        self.shared.available.store(available, Ordering::Release);
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::Acquire)
    }

    /// Cuts every live link. Endpoints see `Dropped` and reconnect.
    pub fn drop_connections(&self) {
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        debug!("dropping loopback connections");
    }

    /// Live keys in database 0.
    #[must_use]
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.lock().databases[0]
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Subscribers currently attached.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    /// Opens a connection. Returns the epoch the connection belongs to, or
    /// the failure status to report.
    pub(crate) fn open(&self, host: &str) -> Result<u64, ConnectState> {
        if !LOOPBACK_HOSTS.contains(&host) {
            return Err(ConnectState::LookupFailed);
        }
        if !self.is_available() {
            return Err(ConnectState::Failed);
        }
        Ok(self.shared.epoch.load(Ordering::Acquire))
    }

    /// `false` once a connection opened at `epoch` has been cut.
    pub(crate) fn is_up(&self, epoch: u64) -> bool {
        self.is_available() && self.shared.epoch.load(Ordering::Acquire) == epoch
    }

    pub(crate) fn next_peer_id(&self) -> u64 {
        self.shared.next_peer.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn execute(&self, conn: &mut ConnState, command: &Command) -> WireReply {
        commands::execute(&mut self.lock(), conn, command)
    }

    pub(crate) fn attach(&self, peer: u64, inbox: Producer<Delivery>, thread: Thread) {
        self.lock().peers.insert(
            peer,
            Peer {
                inbox,
                thread,
                targets: Vec::new(),
            },
        );
    }

    pub(crate) fn detach(&self, peer: u64) {
        self.lock().peers.remove(&peer);
    }

    /// Adds `target` to `peer` and returns the peer's subscription count.
    pub(crate) fn subscribe(&self, peer: u64, target: Target) -> usize {
        let mut state = self.lock();
        let Some(entry) = state.peers.get_mut(&peer) else {
            return 0;
        };
        if !entry.targets.contains(&target) {
            entry.targets.push(target);
        }
        entry.targets.len()
    }

    /// Removes `target` from `peer` and returns the peer's subscription count.
    pub(crate) fn unsubscribe(&self, peer: u64, target: &Target) -> usize {
        let mut state = self.lock();
        let Some(entry) = state.peers.get_mut(&peer) else {
            return 0;
        };
        entry.targets.retain(|t| t != target);
        entry.targets.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LoopbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackServer")
            .field("available", &self.is_available())
            .field("epoch", &self.shared.epoch.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
