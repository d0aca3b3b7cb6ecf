//! Poll-driven sessions.
//!
//! A [`Session`] wraps one network and turns its asynchronous completions into
//! callbacks that run only inside [`Session::poll`]:
//!
//! ```text
//! host call -> Session -> network (async)
//!   -> completion on I/O thread -> action queue
//!   -> [later] poll -> registry invokes host callback -> handle retired
//! ```
//!
//! [`Client`] and [`Subscriber`] are the request/reply and pub/sub flavours.

mod base;
mod client;
mod dispatch;
mod subscriber;
mod types;

pub use base::Session;
pub use client::Client;
pub use dispatch::Dispatcher;
pub use subscriber::Subscriber;
pub use types::{
    Hook, POLL_BUDGET_ENV, SessionConfig, SessionError, SessionId,
    SessionState, UnknownHook,
};
