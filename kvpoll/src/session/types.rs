//! Session identity, configuration, state and errors.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use thiserror::Error;

use crate::host::HostValue;
use crate::network::NetworkError;
use crate::registry::{Handle, RegistryError};
use crate::trace::warn;

/// Environment variable setting [`SessionConfig::poll_budget`].
pub const POLL_BUDGET_ENV: &str = "KVPOLL_POLL_BUDGET";

/// Lifecycle of a session as seen from the polling thread.
///
/// Transitions happen either synchronously (`connect`, `close`) or when
/// `poll` consumes a status action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Per-session tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on actions processed by one `poll`. `None` drains
    /// everything pending when `poll` starts.
    pub poll_budget: Option<NonZeroUsize>,
}

impl SessionConfig {
    /// Defaults overridden by `KVPOLL_POLL_BUDGET`.
    ///
    /// Unparseable or zero values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(budget) = read_env(POLL_BUDGET_ENV) {
            config.poll_budget = Some(budget);
        }
        config
    }

    #[must_use]
    pub const fn poll_budget(mut self, budget: NonZeroUsize) -> Self {
        self.poll_budget = Some(budget);
        self
    }
}

fn read_env(name: &str) -> Option<NonZeroUsize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring invalid setting");
            None
        }
    }
}

/// Errors returned synchronously by session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The session was closed; the host sees a NULL object.
    #[error("NULL kvpoll object")]
    Closed,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SessionError {
    /// The `(nil, message)` pair returned to the host on failure.
    #[must_use]
    pub fn to_host_result(&self) -> (HostValue, HostValue) {
        (HostValue::Nil, HostValue::String(self.to_string()))
    }
}

/// Unique identifier for a session.
///
/// Combines the process ID with a random nonce so that sessions from
/// different processes can be told apart in shared logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    pid: u32,
    nonce: u16,
}

impl SessionId {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            pid: std::process::id(),
            nonce: rand::random(),
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:04x}", self.pid, self.nonce)
    }
}

/// Persistent host hooks, named as the host properties they back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    OnConnected,
    OnDisconnected,
    OnMessage,
}

impl Hook {
    pub const ALL: [Self; 3] = [Self::OnConnected, Self::OnDisconnected, Self::OnMessage];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OnConnected => "OnConnected",
            Self::OnDisconnected => "OnDisconnected",
            Self::OnMessage => "OnMessage",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown hook {0:?}")]
pub struct UnknownHook(pub String);

impl FromStr for Hook {
    type Err = UnknownHook;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|hook| hook.name() == s)
            .ok_or_else(|| UnknownHook(s.to_string()))
    }
}

/// Handles currently bound to each hook.
#[derive(Debug, Default)]
pub(crate) struct Hooks([Option<Handle>; 3]);

impl Hooks {
    pub(crate) const fn get(&self, hook: Hook) -> Option<Handle> {
        self.0[hook as usize]
    }

    /// Binds `handle` and returns the handle it replaces.
    pub(crate) fn replace(&mut self, hook: Hook, handle: Option<Handle>) -> Option<Handle> {
        std::mem::replace(&mut self.0[hook as usize], handle)
    }

    pub(crate) fn clear(&mut self) {
        self.0 = [None; 3];
    }
}
