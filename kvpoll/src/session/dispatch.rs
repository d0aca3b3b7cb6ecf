//! Invocation of host callbacks for dequeued actions.

use crate::diagnostics::{Diagnostic, DiagnosticSink, Origin};
use crate::host::HostValue;
use crate::registry::{CallbackRegistry, Handle, InvocationError};
use crate::reply::ReplyValue;
use crate::session::types::{Hook, Hooks, SessionId};
use crate::trace::{debug, trace};

/// Borrowed view of a session used while one action is dispatched.
///
/// Only `poll` builds one, so every invocation happens on the polling thread.
pub struct Dispatcher<'a> {
    pub(crate) session: SessionId,
    pub(crate) registry: &'a mut CallbackRegistry,
    pub(crate) hooks: &'a Hooks,
    pub(crate) diagnostics: &'a dyn DiagnosticSink,
}

impl Dispatcher<'_> {
    /// The session whose action is being dispatched.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Delivers a reply to its one-shot callback and retires the handle.
    pub(crate) fn reply(&mut self, handle: Handle, value: &ReplyValue, origin: Origin) {
        trace!(session = %self.session, %handle, "dispatching reply");
        let args = [value.to_host()];
        if let Err(err) = self.registry.invoke_once(handle, &args) {
            self.report(origin, &err);
        }
    }

    /// Invokes the persistent callback bound to `hook`, if any.
    pub(crate) fn hook(&mut self, hook: Hook, args: &[HostValue]) {
        let Some(handle) = self.hooks.get(hook) else {
            trace!(session = %self.session, %hook, "no hook bound");
            return;
        };
        if let Err(err) = self.registry.invoke(handle, args) {
            self.report(Origin::Hook(hook), &err);
        }
    }

    fn report(&self, origin: Origin, err: &InvocationError) {
        debug!(session = %self.session, %origin, %err, "callback failed");
        self.diagnostics
            .report(&Diagnostic::new(origin, err.to_string()));
    }
}
