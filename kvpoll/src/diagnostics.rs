//! Host-facing diagnostics.
//!
//! Failures of host callbacks never abort polling. They are reported through a
//! [`DiagnosticSink`] injected when the session is built.

use std::fmt;

use crate::session::Hook;

/// Where a diagnostic came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A persistent hook callback.
    Hook(Hook),
    /// A one-shot reply callback passed to `send`.
    Reply,
    /// A one-shot subscribe acknowledgement callback.
    Acknowledgement,
    /// A one-shot callback retired without ever receiving its reply, because
    /// the network discarded the request.
    Undelivered,
    /// Registry misuse such as retiring a handle twice.
    Registry,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hook(hook) => write!(f, "{hook}"),
            Self::Reply => f.write_str("Send"),
            Self::Acknowledgement => f.write_str("Subscribe"),
            Self::Undelivered => f.write_str("Undelivered"),
            Self::Registry => f.write_str("Registry"),
        }
    }
}

/// One reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub origin: Origin,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(origin: Origin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[kvpoll {} callback error] {}", self.origin, self.message)
    }
}

/// Receives diagnostics on the polling thread.
pub trait DiagnosticSink {
    fn report(&self, diagnostic: &Diagnostic);
}

impl<F> DiagnosticSink for F
where
    F: Fn(&Diagnostic),
{
    fn report(&self, diagnostic: &Diagnostic) {
        self(diagnostic);
    }
}

/// Default sink: logs at `error` level, or writes to stderr without the
/// `tracing` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, diagnostic: &Diagnostic) {
        #[cfg(feature = "tracing")]
        crate::trace::error!(origin = %diagnostic.origin, "{}", diagnostic.message);

        #[cfg(not(feature = "tracing"))]
        eprintln!("{diagnostic}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_display_matches_host_format() {
        let d = Diagnostic::new(Origin::Hook(Hook::OnConnected), "attempt to call nil");
        assert_eq!(
            d.to_string(),
            "[kvpoll OnConnected callback error] attempt to call nil"
        );
        assert_eq!(
            Diagnostic::new(Origin::Reply, "x").to_string(),
            "[kvpoll Send callback error] x"
        );
    }

    #[test]
    fn test_closure_sink() {
        let seen = RefCell::new(Vec::new());
        let sink = |d: &Diagnostic| seen.borrow_mut().push(d.clone());
        sink.report(&Diagnostic::new(Origin::Registry, "twice"));
        assert_eq!(seen.borrow()[0].origin, Origin::Registry);
    }
}
