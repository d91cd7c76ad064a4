//! Error types shared by every subsystem.
//!
//! Structural and state errors are returned synchronously to the caller.
//! I/O errors of asynchronous socket operations are never returned
//! synchronously: they are attached to the [`Completion`] of the failed
//! operation and observed only by waiting on it.
//!
//! [`Completion`]: crate::sync::Completion

use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An OS resource (descriptor, timer, socket, thread) could not be created.
    ///
    /// Construction never retries; the object is not returned.
    #[error("failed to create {what}: {source}")]
    ConstructionFailure {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// An operation was attempted in a state that does not allow it.
    #[error("invalid state transition on {object}: {reason}")]
    StateAssertion { object: String, reason: &'static str },

    /// [`ThreadSafeQueue::pop`](crate::sync::ThreadSafeQueue::pop) found no item.
    #[error("queue is empty")]
    QueueEmpty,

    /// The queue could not reserve room for a new item.
    #[error("allocation failed while growing the queue")]
    AllocationFailure,

    /// The handle cannot be watched by the reactor.
    #[error("handle {0} cannot be registered with the reactor")]
    InvalidHandle(i32),

    /// An asynchronous I/O operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The producing side went away before fulfilling the completion.
    #[error("operation was abandoned before it completed")]
    BrokenPromise,
}

impl Error {
    pub(crate) fn construction(what: &'static str, source: io::Error) -> Self {
        Error::ConstructionFailure { what, source }
    }

    pub(crate) fn state(object: impl Into<String>, reason: &'static str) -> Self {
        Error::StateAssertion {
            object: object.into(),
            reason,
        }
    }
}
