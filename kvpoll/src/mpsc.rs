//! Core MPSC (Multi-Producer Single-Consumer) queue primitives.
//!
//! This module contains a bounded lock-free MPSC ring buffer algorithm.
//! Multiple producers can safely push concurrently.
//!
//! Used by:
//! - [`crate::sync::mpsc`] - In-process queues over heap memory

pub(crate) mod ring;
