//! Session core shared by the client and subscriber flavours.

use std::fmt;
use std::sync::Arc;

use crate::action::{Action, Event, Reply};
use crate::diagnostics::{Diagnostic, DiagnosticSink, LogSink, Origin};
use crate::host::Callback;
use crate::network::{
    ConnectOptions, ConnectState, NetworkError, NetworkSession, ReplyCallback, StatusCallback,
};
use crate::queue::{ActionReceiver, ActionSender, ReplyTicket, action_queue};
use crate::registry::{CallbackRegistry, Handle, Lifetime};
use crate::reply::{self, WireReply};
use crate::session::dispatch::Dispatcher;
use crate::session::types::{Hook, Hooks, SessionConfig, SessionError, SessionId, SessionState};
use crate::trace::{debug, info, trace, warn};

/// A network session bridged to a single polling thread.
///
/// I/O threads only ever touch the action queue. Host callbacks live in the
/// session's registry and run inside [`Session::poll`]. Because callbacks are
/// not `Send`, neither is the session, so they cannot run anywhere else.
///
/// Dropping the session closes it.
pub struct Session<N: NetworkSession, E: Event> {
    pub(super) id: SessionId,
    pub(super) network: N,
    pub(super) state: SessionState,
    pub(super) config: SessionConfig,
    pub(super) sender: ActionSender<E>,
    pub(super) receiver: ActionReceiver<E>,
    pub(super) registry: CallbackRegistry,
    pub(super) hooks: Hooks,
    pub(super) diagnostics: Box<dyn DiagnosticSink>,
}

impl<N: NetworkSession, E: Event> Session<N, E> {
    /// Wraps `network` with the default configuration and a [`LogSink`].
    pub fn new(network: N) -> Self {
        Self::with_config(network, SessionConfig::default(), LogSink)
    }

    pub fn with_config(
        network: N,
        config: SessionConfig,
        diagnostics: impl DiagnosticSink + 'static,
    ) -> Self {
        let (sender, receiver) = action_queue();
        let id = SessionId::generate();
        debug!(session = %id, kind = E::KIND, "session created");
        Self {
            id,
            network,
            state: SessionState::Disconnected,
            config,
            sender,
            receiver,
            registry: CallbackRegistry::new(),
            hooks: Hooks::default(),
            diagnostics: Box::new(diagnostics),
        }
    }

    /// Starts connecting and returns immediately.
    ///
    /// Status changes are queued and applied by a later [`Self::poll`], which
    /// also fires the `OnConnected`/`OnDisconnected` hooks.
    pub fn connect(&mut self, options: ConnectOptions) -> Result<(), SessionError> {
        self.ensure_open()?;
        options.validate()?;

        let sender = self.sender.clone();
        let status: StatusCallback = Arc::new(move |state: ConnectState| {
            let action = match state {
                ConnectState::Ok => Action::Connected,
                state if state.is_disconnect() => Action::Disconnected,
                _ => return,
            };
            trace!(?state, "status change");
            sender.enqueue(action);
        });

        self.network.connect(&options, status)?;
        self.state = SessionState::Connecting;
        info!(session = %self.id, host = %options.host, port = options.port, "connecting");
        Ok(())
    }

    /// Requests teardown. The resulting `Disconnected` action is delivered by
    /// the network like any other status change.
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.network.disconnect();
        debug!(session = %self.id, "disconnect requested");
        Ok(())
    }

    /// Flushes the network's request pipeline.
    pub fn commit(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.network.commit()?;
        Ok(())
    }

    /// Drains queued actions and runs their callbacks on this thread.
    ///
    /// Processes at most the actions pending when the call starts, further
    /// capped by the configured poll budget, so callbacks that trigger new
    /// traffic cannot keep it looping. Returns `true` if any action ran.
    pub fn poll(&mut self) -> Result<bool, SessionError> {
        self.ensure_open()?;
        self.retire_orphans(None);

        let mut budget = self.receiver.pending();
        if let Some(cap) = self.config.poll_budget {
            budget = budget.min(cap.get());
        }

        let mut processed = 0usize;
        while processed < budget {
            let Some(action) = self.receiver.dequeue() else {
                break;
            };
            processed += 1;
            self.dispatch(action);
        }

        if processed > 0 {
            trace!(session = %self.id, processed, "poll");
        }
        Ok(processed > 0)
    }

    /// Binds a persistent hook callback, retiring the one it replaces.
    /// `None` unbinds the hook.
    pub fn set_hook(&mut self, hook: Hook, callback: Option<Callback>) -> Result<(), SessionError> {
        self.ensure_open()?;
        let handle = callback
            .map(|callback| self.registry.register(callback, Lifetime::Persistent))
            .transpose()?;
        if let Some(previous) = self.hooks.replace(hook, handle) {
            self.retire(previous);
        }
        Ok(())
    }

    /// Closes the session.
    ///
    /// Disconnects, discards every queued action, and retires every pending
    /// one-shot handle and every hook without invoking any of them. Replies
    /// completing afterwards are dropped. Later calls return
    /// [`SessionError::Closed`]. Closing twice does nothing.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.network.disconnect();

        let _discarded = self.receiver.close();
        let _orphans = self.receiver.take_orphans().len();
        self.hooks.clear();
        let _retired = self.registry.retire_all();

        self.state = SessionState::Closed;
        info!(
            session = %self.id,
            discarded = _discarded,
            orphans = _orphans,
            retired = _retired,
            "session closed"
        );
    }

    /// `false` once the session is closed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state != SessionState::Closed
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Actions queued and not yet polled.
    #[must_use]
    pub fn pending_actions(&self) -> usize {
        self.receiver.pending()
    }

    /// Live callback registrations: pending one-shots plus bound hooks.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.is_valid() && self.network.is_connected()
    }

    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.is_valid() && self.network.is_reconnecting()
    }

    /// The wrapped network.
    #[must_use]
    pub const fn network(&self) -> &N {
        &self.network
    }

    pub(super) fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    /// Hands a request to the network, wiring up its optional reply callback.
    ///
    /// Without a callback the request is fire-and-forget. With one, the
    /// callback is registered first; if `submit` fails, the handle is retired
    /// before the error is returned.
    pub(super) fn request(
        &mut self,
        callback: Option<Callback>,
        wrap: fn(Reply) -> E,
        submit: impl FnOnce(&mut N, Option<ReplyCallback>) -> Result<(), NetworkError>,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        let Some(callback) = callback else {
            submit(&mut self.network, None)?;
            return Ok(());
        };

        let handle = self.registry.register(callback, Lifetime::OneShot)?;
        let ticket = ReplyTicket::new(self.sender.clone(), handle);
        let on_reply: ReplyCallback = Box::new(move |raw: WireReply| {
            ticket.complete(|callback| {
                wrap(Reply {
                    value: reply::build(raw),
                    callback,
                })
            });
        });

        if let Err(err) = submit(&mut self.network, Some(on_reply)) {
            self.retire_orphans(Some(handle));
            if self.registry.contains(handle) {
                warn!(session = %self.id, %handle, "network kept a rejected callback");
                self.retire(handle);
            }
            debug!(session = %self.id, %err, "request rejected");
            return Err(err.into());
        }
        Ok(())
    }

    fn dispatch(&mut self, action: Action<E>) {
        match action {
            Action::Connected => {
                self.state = SessionState::Connected;
                info!(session = %self.id, "connected");
                self.dispatcher().hook(Hook::OnConnected, &[]);
            }
            Action::Disconnected => {
                self.state = if self.network.is_reconnecting() {
                    SessionState::Reconnecting
                } else {
                    SessionState::Disconnected
                };
                info!(session = %self.id, state = ?self.state, "disconnected");
                self.dispatcher().hook(Hook::OnDisconnected, &[]);
            }
            Action::Event(event) => event.dispatch(&mut self.dispatcher()),
        }
    }

    fn dispatcher(&mut self) -> Dispatcher<'_> {
        Dispatcher {
            session: self.id,
            registry: &mut self.registry,
            hooks: &self.hooks,
            diagnostics: self.diagnostics.as_ref(),
        }
    }

    /// Retires handles whose actions were lost. `expected` is a handle the
    /// caller already knows about and is retired without a diagnostic.
    fn retire_orphans(&mut self, expected: Option<Handle>) {
        for handle in self.receiver.take_orphans() {
            if Some(handle) == expected {
                let _ = self.registry.retire(handle);
                continue;
            }
            warn!(session = %self.id, %handle, "retiring undelivered callback");
            match self.registry.retire(handle) {
                Ok(()) => self.diagnostics.report(&Diagnostic::new(
                    Origin::Undelivered,
                    format!("callback {handle} retired without a reply"),
                )),
                Err(err) => self
                    .diagnostics
                    .report(&Diagnostic::new(Origin::Registry, err.to_string())),
            }
        }
    }

    fn retire(&mut self, handle: Handle) {
        if let Err(err) = self.registry.retire(handle) {
            self.diagnostics
                .report(&Diagnostic::new(Origin::Registry, err.to_string()));
        }
    }
}

impl<N: NetworkSession, E: Event> Drop for Session<N, E> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<N: NetworkSession, E: Event> fmt::Display for Session<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "[{}: {}]", E::KIND, self.id)
        } else {
            write!(f, "[NULL {}]", E::KIND)
        }
    }
}

impl<N: NetworkSession, E: Event> fmt::Debug for Session<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("kind", &E::KIND)
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.receiver.pending())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
