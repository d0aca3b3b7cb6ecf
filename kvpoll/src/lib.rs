//! Poll-driven bridge between an asynchronous key-value client and a
//! single-threaded host.
//!
//! Completions from the network arrive on I/O threads. They are turned into
//! [`Action`]s and pushed onto a lock-free per-session queue. The host drains
//! it with [`Session::poll`], which is the only place host callbacks run.
//!
//! ```
//! use std::time::Duration;
//! use kvpoll::{Callback, Client, ConnectOptions, LoopbackServer};
//!
//! let server = LoopbackServer::new();
//! let mut client = Client::new(server.client());
//! client.connect(ConnectOptions::default()).unwrap();
//!
//! while !client.is_connected() {
//!     client.poll().unwrap();
//!     std::thread::sleep(Duration::from_millis(1));
//! }
//!
//! client
//!     .set("greeting", "hello", Some(Callback::infallible(|reply| {
//!         assert_eq!(reply[0].as_str(), Some("OK"));
//!     })))
//!     .unwrap();
//! client.commit().unwrap();
//!
//! while client.pending_callbacks() > 0 {
//!     client.poll().unwrap();
//!     std::thread::sleep(Duration::from_millis(1));
//! }
//! ```

pub mod action;
pub mod diagnostics;
pub mod host;
pub mod loopback;
mod mpsc;
pub mod network;
pub mod queue;
pub mod registry;
pub mod reply;
pub mod session;
pub mod sync;
mod trace;

pub use action::{Action, Event, Message, Reply, SubscriberEvent};
pub use diagnostics::{Diagnostic, DiagnosticSink, LogSink, Origin};
pub use host::{Callback, CallbackError, HostValue};
pub use loopback::{LoopbackClient, LoopbackServer, LoopbackSubscriber};
pub use network::{
    Command, CommandSession, ConnectOptions, ConnectState, NetworkError, NetworkSession,
    PubSubSession,
};
pub use registry::{CallbackRegistry, Handle, InvocationError, Lifetime, RegistryError};
pub use reply::{ReplyValue, WireReply};
pub use session::{
    Client, Hook, Session, SessionConfig, SessionError, SessionId, SessionState, Subscriber,
};
pub use trace::init_tracing;
