//! Thread-synchronization primitives.
//!
//! This module provides the two building blocks the rest of the crate is
//! layered on:
//! - [`ThreadSafeQueue`], the blocking MPMC queue drained by dispatch
//!   contexts and thread pools,
//! - [`Promise`] / [`Completion`], a one-shot handoff used to report the
//!   outcome of asynchronous socket operations.

mod oneshot;
mod queue;

pub use oneshot::{Completion, Promise, promise};
pub use queue::ThreadSafeQueue;
