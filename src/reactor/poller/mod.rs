//! OS readiness primitives used by the reactor.
//!
//! This module groups:
//! - the `select(2)` poller and its descriptor sets,
//! - the `eventfd` waker used to interrupt a blocking wait,
//! - thin wrappers over the POSIX calls used by timers and sockets.

mod select;
mod waker;

pub(crate) mod unix;

pub(crate) use select::{Interest, MAX_DESCRIPTOR, SelectPoller};
pub(crate) use unix as platform;
pub(crate) use waker::Waker;
