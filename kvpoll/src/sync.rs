//! Synchronization primitives for in-process communication.
//!
//! This module provides thread-safe queues for moving work between I/O
//! threads and the polling thread within the same process.

pub mod mpsc;
