//! Loopback implementations of the network capability traits.

use crate::loopback::link::{Link, Role};
use crate::loopback::server::LoopbackServer;
use crate::loopback::{Request, Target};
use crate::network::{
    Command, CommandSession, ConnectOptions, MessageCallback, NetworkError, NetworkSession,
    PubSubSession, ReplyCallback, StatusCallback,
};
use crate::trace::debug;

/// Requests buffered between two commits.
pub const PIPELINE_LIMIT: usize = 4096;

/// State shared by both endpoint kinds: the link, if connected, and the
/// requests buffered until the next commit.
struct Endpoint {
    server: LoopbackServer,
    role: Role,
    link: Option<Link>,
    pipeline: Vec<Request>,
}

impl Endpoint {
    const fn new(server: LoopbackServer, role: Role) -> Self {
        Self {
            server,
            role,
            link: None,
            pipeline: Vec::new(),
        }
    }

    fn connect(&mut self, options: &ConnectOptions, status: StatusCallback) -> Result<(), NetworkError> {
        options.validate()?;
        self.disconnect();
        self.link = Some(Link::spawn(
            self.server.clone(),
            options.clone(),
            status,
            self.role,
        )?);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.pipeline.clear();
        if self.link.take().is_some() {
            debug!(role = ?self.role, "loopback link stopped");
        }
    }

    fn buffer(&mut self, request: Request) -> Result<(), NetworkError> {
        live(self.link.as_ref())?;
        if self.pipeline.len() >= PIPELINE_LIMIT {
            return Err(NetworkError::Backpressure);
        }
        self.pipeline.push(request);
        Ok(())
    }

    /// Hands buffered requests to the I/O thread in order.
    ///
    /// Without a live link the buffer is dropped. If the link's queue fills
    /// up, the requests not yet handed over stay buffered for the next commit.
    fn commit(&mut self) -> Result<(), NetworkError> {
        if self.pipeline.is_empty() {
            return Ok(());
        }
        let link = match live(self.link.as_ref()) {
            Ok(link) => link,
            Err(err) => {
                self.pipeline.clear();
                return Err(err);
            }
        };

        let mut pending = std::mem::take(&mut self.pipeline).into_iter();
        while let Some(request) = pending.next() {
            if let Err(request) = link.submit(request) {
                self.pipeline.push(request);
                self.pipeline.extend(pending);
                return Err(NetworkError::Backpressure);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| link.flags().is_connected())
    }

    fn is_reconnecting(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.flags().is_reconnecting())
    }
}

fn live(link: Option<&Link>) -> Result<&Link, NetworkError> {
    match link {
        Some(link) if link.flags().is_connected() => Ok(link),
        _ => Err(NetworkError::NotConnected),
    }
}

macro_rules! delegate_network_session {
    ($ty:ty) => {
        impl NetworkSession for $ty {
            fn connect(
                &mut self,
                options: &ConnectOptions,
                status: StatusCallback,
            ) -> Result<(), NetworkError> {
                self.0.connect(options, status)
            }

            fn disconnect(&mut self) {
                self.0.disconnect();
            }

            fn commit(&mut self) -> Result<(), NetworkError> {
                self.0.commit()
            }

            fn is_connected(&self) -> bool {
                self.0.is_connected()
            }

            fn is_reconnecting(&self) -> bool {
                self.0.is_reconnecting()
            }
        }

        impl $ty {
            /// The server this endpoint talks to.
            #[must_use]
            pub fn server(&self) -> &LoopbackServer {
                &self.0.server
            }

            /// Requests buffered since the last commit.
            #[must_use]
            pub fn pipelined(&self) -> usize {
                self.0.pipeline.len()
            }
        }
    };
}

/// Request/reply endpoint of a [`LoopbackServer`].
pub struct LoopbackClient(Endpoint);

impl LoopbackClient {
    pub(crate) const fn new(server: LoopbackServer) -> Self {
        Self(Endpoint::new(server, Role::Commands))
    }
}

delegate_network_session!(LoopbackClient);

impl CommandSession for LoopbackClient {
    fn send(&mut self, command: Command, reply: Option<ReplyCallback>) -> Result<(), NetworkError> {
        self.0.buffer(Request::Command { command, reply })
    }
}

/// Pub/sub endpoint of a [`LoopbackServer`].
pub struct LoopbackSubscriber(Endpoint);

impl LoopbackSubscriber {
    pub(crate) const fn new(server: LoopbackServer) -> Self {
        Self(Endpoint::new(server, Role::Subscriber))
    }
}

delegate_network_session!(LoopbackSubscriber);

impl PubSubSession for LoopbackSubscriber {
    fn subscribe(
        &mut self,
        channel: &str,
        on_message: MessageCallback,
        ack: Option<ReplyCallback>,
    ) -> Result<(), NetworkError> {
        self.0.buffer(Request::Subscribe {
            target: Target::Channel(channel.to_string()),
            on_message,
            ack,
        })
    }

    fn psubscribe(
        &mut self,
        pattern: &str,
        on_message: MessageCallback,
        ack: Option<ReplyCallback>,
    ) -> Result<(), NetworkError> {
        self.0.buffer(Request::Subscribe {
            target: Target::Pattern(pattern.to_string()),
            on_message,
            ack,
        })
    }

    fn unsubscribe(&mut self, channel: &str) -> Result<(), NetworkError> {
        self.0
            .buffer(Request::Unsubscribe(Target::Channel(channel.to_string())))
    }

    fn punsubscribe(&mut self, pattern: &str) -> Result<(), NetworkError> {
        self.0
            .buffer(Request::Unsubscribe(Target::Pattern(pattern.to_string())))
    }
}
