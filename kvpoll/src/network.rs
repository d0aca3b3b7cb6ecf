//! Capability traits for the external asynchronous protocol client.
//!
//! The wire protocol and connection management live behind these traits.
//! Every callback handed to a network is `Send` and may run on any of its I/O
//! threads. A reply callback runs at most once. A method that returns `Err`
//! has already dropped the callbacks it was given.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::host::HostValue;
use crate::reply::WireReply;

/// Connection status reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// A connection attempt is starting.
    Start,
    /// Waiting before the next reconnect attempt.
    Sleeping,
    /// Connected.
    Ok,
    /// An established connection was lost.
    Dropped,
    /// A connection attempt failed.
    Failed,
    /// The host name could not be resolved.
    LookupFailed,
    /// The network gave up, or the user disconnected.
    Stopped,
}

impl ConnectState {
    /// States that mean "not connected" to the session.
    #[must_use]
    pub const fn is_disconnect(self) -> bool {
        matches!(
            self,
            Self::Dropped | Self::Failed | Self::LookupFailed | Self::Stopped
        )
    }
}

/// Default connect timeout and reconnect interval.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    /// `None` retries forever.
    pub max_reconnects: Option<u32>,
    pub reconnect_interval: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            timeout: DEFAULT_TIMEOUT,
            max_reconnects: None,
            reconnect_interval: DEFAULT_TIMEOUT,
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn max_reconnects(mut self, max: u32) -> Self {
        self.max_reconnects = Some(max);
        self
    }

    #[must_use]
    pub const fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Checks the address before anything is handed to the network.
    ///
    /// # Errors
    ///
    /// [`NetworkError::InvalidAddress`] for an empty host, a host containing
    /// whitespace, or port 0.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if self.host.is_empty() || self.host.chars().any(char::is_whitespace) {
            return Err(NetworkError::InvalidAddress(self.host.clone()));
        }
        if self.port == 0 {
            return Err(NetworkError::InvalidAddress(format!("{}:0", self.host)));
        }
        Ok(())
    }
}

/// Errors a network reports synchronously.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("not connected")]
    NotConnected,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("request pipeline is full")]
    Backpressure,
    #[error("{0}")]
    Rejected(String),
}

pub type StatusCallback = Arc<dyn Fn(ConnectState) + Send + Sync>;
pub type ReplyCallback = Box<dyn FnOnce(WireReply) + Send>;
/// Called with `(channel, payload)`.
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// One protocol command: name followed by arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Builds a command from host values, rendering each as one argument.
    ///
    /// Returns `None` when `values` is empty or holds a nested array.
    #[must_use]
    pub fn from_host(values: &[HostValue]) -> Option<Self> {
        let args = values
            .iter()
            .map(HostValue::to_command_arg)
            .collect::<Option<Vec<_>>>()?;
        if args.is_empty() {
            return None;
        }
        Some(Self { args })
    }

    /// Command name, upper-cased.
    #[must_use]
    pub fn name(&self) -> String {
        self.args[0].to_ascii_uppercase()
    }

    /// Arguments after the name.
    #[must_use]
    pub fn params(&self) -> &[String] {
        &self.args[1..]
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

/// Connection lifecycle shared by command and pub/sub networks.
pub trait NetworkSession {
    /// Starts connecting. Status changes are reported through `status` from
    /// I/O threads, for the whole life of the connection.
    fn connect(&mut self, options: &ConnectOptions, status: StatusCallback)
    -> Result<(), NetworkError>;

    /// Tears the connection down. Requests not yet written are discarded and
    /// their reply callbacks dropped without running.
    fn disconnect(&mut self);

    /// Flushes buffered requests.
    fn commit(&mut self) -> Result<(), NetworkError>;

    fn is_connected(&self) -> bool;

    fn is_reconnecting(&self) -> bool;
}

/// A request/reply network.
pub trait CommandSession: NetworkSession {
    /// Queues a command. `reply`, if given, runs once with the parsed reply.
    fn send(&mut self, command: Command, reply: Option<ReplyCallback>) -> Result<(), NetworkError>;
}

/// A pub/sub network.
pub trait PubSubSession: NetworkSession {
    fn subscribe(
        &mut self,
        channel: &str,
        on_message: MessageCallback,
        ack: Option<ReplyCallback>,
    ) -> Result<(), NetworkError>;

    fn psubscribe(
        &mut self,
        pattern: &str,
        on_message: MessageCallback,
        ack: Option<ReplyCallback>,
    ) -> Result<(), NetworkError>;

    fn unsubscribe(&mut self, channel: &str) -> Result<(), NetworkError>;

    fn punsubscribe(&mut self, pattern: &str) -> Result<(), NetworkError>;
}
