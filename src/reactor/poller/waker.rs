use super::platform::{sys_close, sys_read_counter, sys_write_counter};

use std::os::fd::RawFd;

/// Self-notification handle of the reactor, backed by an `eventfd`.
///
/// Writing to it makes the descriptor readable, which interrupts a
/// blocking `select` on the reactor thread.
pub(crate) struct Waker(RawFd);

impl Waker {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.0
    }

    /// Wakes the poller.
    pub(crate) fn wake(&self) {
        sys_write_counter(self.0);
    }

    /// Resets the counter so the descriptor stops being readable.
    pub(crate) fn drain(&self) {
        let _ = sys_read_counter(self.0);
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        sys_close(self.0);
    }
}
