//! Request/reply session.

use crate::action::Reply;
use crate::host::{Callback, HostValue};
use crate::network::{Command, CommandSession};
use crate::session::base::Session;
use crate::session::types::SessionError;

/// Session over a request/reply network.
pub type Client<N> = Session<N, Reply>;

impl<N: CommandSession> Session<N, Reply> {
    /// Sends `command`. With a callback, its reply is delivered by a later
    /// [`Session::poll`]; without one the command is fire-and-forget.
    pub fn send(&mut self, command: Command, callback: Option<Callback>) -> Result<(), SessionError> {
        self.request(callback, std::convert::identity, |network, reply| {
            network.send(command, reply)
        })
    }

    /// Sends a command given as host values, e.g. `{"SET", "k", 5}`.
    pub fn send_host(
        &mut self,
        args: &[HostValue],
        callback: Option<Callback>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let command = Command::from_host(args).ok_or_else(|| {
            SessionError::InvalidArgument("expected a non-empty list of scalars".to_string())
        })?;
        self.send(command, callback)
    }

    pub fn auth(&mut self, password: &str, callback: Option<Callback>) -> Result<(), SessionError> {
        self.send(Command::new("AUTH").arg(password), callback)
    }

    pub fn select(&mut self, db: u32, callback: Option<Callback>) -> Result<(), SessionError> {
        self.send(Command::new("SELECT").arg(db.to_string()), callback)
    }

    pub fn publish(
        &mut self,
        channel: &str,
        message: &str,
        callback: Option<Callback>,
    ) -> Result<(), SessionError> {
        self.send(Command::new("PUBLISH").arg(channel).arg(message), callback)
    }

    pub fn exists(&mut self, key: &str, callback: Option<Callback>) -> Result<(), SessionError> {
        self.send(Command::new("EXISTS").arg(key), callback)
    }

    pub fn delete(&mut self, key: &str, callback: Option<Callback>) -> Result<(), SessionError> {
        self.send(Command::new("DEL").arg(key), callback)
    }

    pub fn get(&mut self, key: &str, callback: Option<Callback>) -> Result<(), SessionError> {
        self.send(Command::new("GET").arg(key), callback)
    }

    pub fn set(
        &mut self,
        key: &str,
        value: &str,
        callback: Option<Callback>,
    ) -> Result<(), SessionError> {
        self.send(Command::new("SET").arg(key).arg(value), callback)
    }

    /// `SETEX key seconds value`.
    pub fn set_ex(
        &mut self,
        key: &str,
        seconds: u64,
        value: &str,
        callback: Option<Callback>,
    ) -> Result<(), SessionError> {
        self.send(
            Command::new("SETEX").arg(key).arg(seconds.to_string()).arg(value),
            callback,
        )
    }

    pub fn ttl(&mut self, key: &str, callback: Option<Callback>) -> Result<(), SessionError> {
        self.send(Command::new("TTL").arg(key), callback)
    }
}
