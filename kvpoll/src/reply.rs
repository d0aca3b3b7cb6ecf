//! Protocol replies and their conversion to host values.
//!
//! [`WireReply`] is what the external protocol client hands over once a reply
//! is fully parsed. [`build`] turns it into an owned [`ReplyValue`] tree on the
//! I/O thread (moves only, no host involvement); [`ReplyValue::to_host`] runs
//! later on the polling thread, right before the callback is invoked.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::HostValue;

/// A fully parsed reply as produced by the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireReply {
    Error(String),
    SimpleString(String),
    BulkString(String),
    Integer(i64),
    Array(Vec<WireReply>),
    Null,
}

/// Immutable reply tree carried by a `Reply` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyValue {
    Error(String),
    String(String),
    Integer(i64),
    Array(Vec<ReplyValue>),
    Null,
}

/// Converts a wire reply into a [`ReplyValue`].
///
/// Simple and bulk strings collapse to [`ReplyValue::String`]; errors keep
/// their tag. Arrays recurse depth-first and keep element order. Never fails.
#[must_use]
pub fn build(raw: WireReply) -> ReplyValue {
    match raw {
        WireReply::Error(msg) => ReplyValue::Error(msg),
        WireReply::SimpleString(s) | WireReply::BulkString(s) => ReplyValue::String(s),
        WireReply::Integer(n) => ReplyValue::Integer(n),
        WireReply::Array(items) => ReplyValue::Array(items.into_iter().map(build).collect()),
        WireReply::Null => ReplyValue::Null,
    }
}

impl From<WireReply> for ReplyValue {
    fn from(raw: WireReply) -> Self {
        build(raw)
    }
}

impl ReplyValue {
    /// Converts to the host representation.
    ///
    /// Errors are delivered as plain strings, the same as any other scalar.
    /// Integers become `f64`; magnitudes above 2^53 are rounded.
    #[must_use]
    pub fn to_host(&self) -> HostValue {
        match self {
            Self::Error(s) | Self::String(s) => HostValue::String(s.clone()),
            Self::Integer(n) => HostValue::Number(*n as f64),
            Self::Array(items) => HostValue::Array(items.iter().map(Self::to_host).collect()),
            Self::Null => HostValue::Nil,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Error(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[ReplyValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Nesting depth; scalars are depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::Array(items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
            _ => 0,
        }
    }
}

/// A host value with no reply equivalent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplyConversionError {
    #[error("boolean {0} has no reply representation")]
    Bool(bool),
    #[error("number {0} is not an integer")]
    Fractional(f64),
}

impl TryFrom<&HostValue> for ReplyValue {
    type Error = ReplyConversionError;

    fn try_from(value: &HostValue) -> Result<Self, ReplyConversionError> {
        match value {
            HostValue::Nil => Ok(Self::Null),
            HostValue::Bool(b) => Err(ReplyConversionError::Bool(*b)),
            HostValue::Number(n) if n.fract() == 0.0 => Ok(Self::Integer(*n as i64)),
            HostValue::Number(n) => Err(ReplyConversionError::Fractional(*n)),
            HostValue::String(s) => Ok(Self::String(s.clone())),
            HostValue::Array(items) => items
                .iter()
                .map(Self::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Array),
        }
    }
}
