//! Pub/sub session.
//!
//! Every message, whatever channel or pattern it matched, goes to the single
//! `OnMessage` hook as `(channel, payload)`.

use std::sync::Arc;

use crate::action::{Action, Message, SubscriberEvent};
use crate::host::Callback;
use crate::network::{MessageCallback, PubSubSession};
use crate::session::base::Session;
use crate::session::types::SessionError;

/// Session over a pub/sub network.
pub type Subscriber<N> = Session<N, SubscriberEvent>;

impl<N: PubSubSession> Session<N, SubscriberEvent> {
    /// Subscribes to `channel`. `ack`, if given, runs once with the server's
    /// acknowledgement.
    pub fn subscribe(&mut self, channel: &str, ack: Option<Callback>) -> Result<(), SessionError> {
        let on_message = self.message_callback();
        self.request(ack, SubscriberEvent::Acknowledged, |network, reply| {
            network.subscribe(channel, on_message, reply)
        })
    }

    /// Subscribes to every channel matching `pattern` (`*` and `?` globs).
    pub fn psubscribe(&mut self, pattern: &str, ack: Option<Callback>) -> Result<(), SessionError> {
        let on_message = self.message_callback();
        self.request(ack, SubscriberEvent::Acknowledged, |network, reply| {
            network.psubscribe(pattern, on_message, reply)
        })
    }

    pub fn unsubscribe(&mut self, channel: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.network.unsubscribe(channel)?;
        Ok(())
    }

    pub fn punsubscribe(&mut self, pattern: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.network.punsubscribe(pattern)?;
        Ok(())
    }

    fn message_callback(&self) -> MessageCallback {
        let sender = self.sender.clone();
        Arc::new(move |channel: &str, payload: &str| {
            sender.enqueue(Action::Event(SubscriberEvent::Message(Message {
                channel: channel.to_string(),
                payload: payload.to_string(),
            })));
        })
    }
}
