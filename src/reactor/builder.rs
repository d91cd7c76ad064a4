use super::core::Reactor;
use crate::error::Result;

use std::sync::Arc;

/// Name given to the reactor thread unless configured otherwise.
pub const DEFAULT_THREAD_NAME: &str = "intercom-reactor";

/// Bytes a socket reads per `recv` unless configured otherwise.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Backlog of listening sockets unless configured otherwise.
pub const DEFAULT_LISTEN_BACKLOG: i32 = 128;

/// Builder for configuring and creating a [`Reactor`].
///
/// # Examples
///
/// ```rust,ignore
/// let reactor = ReactorBuilder::new()
///     .thread_name("network")
///     .read_buffer_size(16 * 1024)
///     .build()?;
/// ```
pub struct ReactorBuilder {
    /// Name of the reactor thread.
    pub(crate) thread_name: String,

    /// Size of the per-`recv` buffer used by sockets.
    pub(crate) read_buffer_size: usize,

    /// Backlog passed to `listen`.
    pub(crate) listen_backlog: i32,
}

impl ReactorBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
        }
    }

    /// Sets the name of the reactor thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Sets how many bytes sockets read per `recv`.
    ///
    /// # Panics
    ///
    /// Panics if `size == 0`.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        assert!(size > 0, "read_buffer_size must be > 0");

        self.read_buffer_size = size;
        self
    }

    /// Sets the backlog of listening sockets.
    ///
    /// # Panics
    ///
    /// Panics if `backlog <= 0`.
    pub fn listen_backlog(mut self, backlog: i32) -> Self {
        assert!(backlog > 0, "listen_backlog must be > 0");

        self.listen_backlog = backlog;
        self
    }

    /// Creates the wake-up descriptor and starts the reactor thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionFailure`](crate::Error::ConstructionFailure)
    /// if either could not be created.
    pub fn build(self) -> Result<Arc<Reactor>> {
        Reactor::start(self)
    }
}

impl Default for ReactorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
