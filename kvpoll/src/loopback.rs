//! In-memory network for tests, demos and benchmarks.
//!
//! [`LoopbackServer`] is a small key-value store with pub/sub. Every
//! [`LoopbackClient`] or [`LoopbackSubscriber`] connected to it runs its own
//! I/O thread, so completions reach a session from a thread other than the
//! one polling it, exactly as with a real protocol client.
//!
//! The server can refuse connections ([`LoopbackServer::set_available`]) or
//! cut every live link ([`LoopbackServer::drop_connections`]) to exercise the
//! reconnect path.

mod commands;
mod endpoint;
mod glob;
mod link;
mod server;

pub use endpoint::{LoopbackClient, LoopbackSubscriber, PIPELINE_LIMIT};
pub use server::LoopbackServer;

use crate::network::{Command, MessageCallback, ReplyCallback};

/// Host names the loopback server answers to. Anything else fails lookup.
pub const LOOPBACK_HOSTS: [&str; 3] = ["127.0.0.1", "localhost", "::1"];

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Target {
    Channel(String),
    Pattern(String),
}

impl Target {
    pub(crate) fn matches(&self, channel: &str) -> bool {
        match self {
            Self::Channel(name) => name == channel,
            Self::Pattern(pattern) => glob::matches(pattern, channel),
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            Self::Channel(name) | Self::Pattern(name) => name,
        }
    }

    /// Kind reported in subscribe acknowledgements.
    pub(crate) const fn ack_kind(&self) -> &'static str {
        match self {
            Self::Channel(_) => "subscribe",
            Self::Pattern(_) => "psubscribe",
        }
    }
}

/// Work handed from an endpoint to its I/O thread.
pub(crate) enum Request {
    Command {
        command: Command,
        reply: Option<ReplyCallback>,
    },
    Subscribe {
        target: Target,
        on_message: MessageCallback,
        ack: Option<ReplyCallback>,
    },
    Unsubscribe(Target),
}

/// A published message routed to one subscription of one peer.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub(crate) target: Target,
    pub(crate) channel: String,
    pub(crate) payload: String,
}
