//! Single-threaded dispatch loops and worker pools.
//!
//! A [`DispatchContext`] owns a queue of [`Action`]s and is drained by
//! exactly one thread at a time, the one that called
//! [`run`](DispatchContext::run). Other threads reach it through
//! [`Channel`]s, which also keep a [`RunPolicy::UntilWorkers`] loop alive
//! for as long as they exist.
//!
//! A [`ThreadPool`] drains a single queue from several threads and is used
//! for work that does not need to run on a particular thread.

mod channel;
mod context;
mod pool;
mod thread;

pub use channel::Channel;
pub use context::{ContextState, DispatchContext, RunPolicy};
pub use pool::ThreadPool;

/// A deferred unit of work.
pub type Action = Box<dyn FnOnce() + Send + 'static>;
