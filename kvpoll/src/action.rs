//! Event records moved from I/O threads to the polling thread.

use crate::diagnostics::Origin;
use crate::registry::Handle;
use crate::reply::ReplyValue;
use crate::session::{Dispatcher, Hook};

/// One unit of work for the polling thread.
///
/// Connection status changes are shared by every session flavour; `E` carries
/// the flavour-specific payloads.
#[derive(Debug)]
pub enum Action<E> {
    Connected,
    Disconnected,
    Event(E),
}

impl<E: Event> Action<E> {
    /// One-shot handle owned by this action, if any.
    #[must_use]
    pub fn callback(&self) -> Option<Handle> {
        match self {
            Self::Connected | Self::Disconnected => None,
            Self::Event(event) => event.callback(),
        }
    }
}

/// Flavour-specific action payload.
pub trait Event: Send + 'static {
    /// Type name shown by the host (`[kvpoll_client: ...]`).
    const KIND: &'static str;

    /// One-shot handle carried by this event. It must be retired whether or
    /// not the event is ever dispatched.
    fn callback(&self) -> Option<Handle>;

    /// Runs the host callback for this event on the polling thread.
    fn dispatch(self, dispatcher: &mut Dispatcher<'_>);
}

/// Completion of a command sent with a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub value: ReplyValue,
    pub callback: Handle,
}

impl Event for Reply {
    const KIND: &'static str = "kvpoll_client";

    fn callback(&self) -> Option<Handle> {
        Some(self.callback)
    }

    fn dispatch(self, dispatcher: &mut Dispatcher<'_>) {
        dispatcher.reply(self.callback, &self.value, Origin::Reply);
    }
}

/// A published message received on a subscribed channel or pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// Events produced by a pub/sub session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriberEvent {
    /// Routed to the persistent `OnMessage` hook.
    Message(Message),
    /// Server acknowledgement of a subscribe request that carried a callback.
    Acknowledged(Reply),
}

impl Event for SubscriberEvent {
    const KIND: &'static str = "kvpoll_subscriber";

    fn callback(&self) -> Option<Handle> {
        match self {
            Self::Message(_) => None,
            Self::Acknowledged(reply) => Some(reply.callback),
        }
    }

    fn dispatch(self, dispatcher: &mut Dispatcher<'_>) {
        match self {
            Self::Message(Message { channel, payload }) => {
                dispatcher.hook(Hook::OnMessage, &[channel.into(), payload.into()]);
            }
            Self::Acknowledged(reply) => {
                dispatcher.reply(reply.callback, &reply.value, Origin::Acknowledgement);
            }
        }
    }
}
