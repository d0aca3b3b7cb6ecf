//! Host-side value model and callables.
//!
//! The embedding host (a scripting VM, a game loop, ...) sees replies and
//! messages as [`HostValue`] trees and registers [`Callback`]s that run on its
//! polling thread. Arrays are 0-based here; glue for hosts with 1-based tables
//! maps element `i` to ordinal `i + 1`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A host-native value.
///
/// Numbers are `f64` like most scripting hosts. Integers above 2^53 lose
/// precision on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostValue {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<HostValue>),
}

impl HostValue {
    /// Returns `true` for [`HostValue::Nil`].
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[HostValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Renders a scalar as a single command argument.
    ///
    /// Integral numbers render without a fraction (`5`, not `5.000000`), other
    /// numbers use the shortest round-trip form. Returns `None` for arrays,
    /// which cannot be flattened into one argument.
    #[must_use]
    pub fn to_command_arg(&self) -> Option<String> {
        match self {
            Self::Nil => Some("nil".to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Some(format!("{}", *n as i64))
            }
            Self::Number(n) => Some(n.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::Array(_) => None,
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Failure raised by a host callable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackError(String);

impl CallbackError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallbackError {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CallbackError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

type CallbackFn = dyn FnMut(&[HostValue]) -> Result<(), CallbackError>;

/// A host callable.
///
/// Callables are deliberately not `Send`: they are owned by a session's
/// registry and only ever run on the thread that polls it.
pub struct Callback(Box<CallbackFn>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(&[HostValue]) -> Result<(), CallbackError> + 'static,
    {
        Self(Box::new(f))
    }

    /// Wraps an infallible closure.
    pub fn infallible<F>(mut f: F) -> Self
    where
        F: FnMut(&[HostValue]) + 'static,
    {
        Self::new(move |args| {
            f(args);
            Ok(())
        })
    }

    #[inline]
    pub(crate) fn call(&mut self, args: &[HostValue]) -> Result<(), CallbackError> {
        (self.0)(args)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}
