//! `select(2)`-based readiness wait.
//!
//! The reactor rebuilds three descriptor sets from its committed listener
//! tables on every iteration and blocks in [`SelectPoller::wait`] with no
//! timeout. The wake-up `eventfd` is always part of the read set, so
//! registration changes and stop requests interrupt the wait.

use super::Waker;
use crate::reactor::EventType;

use libc::{FD_ISSET, FD_SET, FD_SETSIZE, FD_ZERO, c_int, fd_set};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::RawFd;
use std::ptr;

/// Highest descriptor number (exclusive) that fits in an `fd_set`.
pub(crate) const MAX_DESCRIPTOR: RawFd = FD_SETSIZE as RawFd;

/// A set of file descriptors passed to `select`.
pub(crate) struct FdSet {
    raw: fd_set,
}

impl FdSet {
    pub(crate) fn new() -> Self {
        let mut raw = MaybeUninit::<fd_set>::uninit();
        unsafe {
            FD_ZERO(raw.as_mut_ptr());
            Self {
                raw: raw.assume_init(),
            }
        }
    }

    pub(crate) fn insert(&mut self, fd: RawFd) {
        debug_assert!((0..MAX_DESCRIPTOR).contains(&fd));
        unsafe { FD_SET(fd, &mut self.raw) };
    }

    pub(crate) fn contains(&self, fd: RawFd) -> bool {
        unsafe { FD_ISSET(fd, &self.raw) }
    }
}

/// Descriptor sets for one `select` call.
pub(crate) struct Interest {
    read: FdSet,
    write: FdSet,
    error: FdSet,

    /// Highest descriptor in any set, or `-1` when all are empty.
    max: RawFd,
}

impl Interest {
    pub(crate) fn new() -> Self {
        Self {
            read: FdSet::new(),
            write: FdSet::new(),
            error: FdSet::new(),
            max: -1,
        }
    }

    /// Adds `fd` to the set watched for `event`.
    pub(crate) fn insert(&mut self, event: EventType, fd: RawFd) {
        self.set_mut(event).insert(fd);
        self.max = self.max.max(fd);
    }

    /// Returns `true` if `fd` was reported ready for `event`.
    pub(crate) fn is_ready(&self, event: EventType, fd: RawFd) -> bool {
        match event {
            EventType::Read => self.read.contains(fd),
            EventType::Write => self.write.contains(fd),
            EventType::Error => self.error.contains(fd),
        }
    }

    fn set_mut(&mut self, event: EventType) -> &mut FdSet {
        match event {
            EventType::Read => &mut self.read,
            EventType::Write => &mut self.write,
            EventType::Error => &mut self.error,
        }
    }
}

/// Blocking readiness poller built on `select`.
///
/// Owns the wake-up [`Waker`] that other threads use to interrupt a wait.
pub(crate) struct SelectPoller {
    waker: Waker,
}

impl SelectPoller {
    pub(crate) fn new(waker: Waker) -> Self {
        Self { waker }
    }

    pub(crate) fn waker(&self) -> &Waker {
        &self.waker
    }

    /// Blocks until a descriptor in `interest` is ready or the poller is
    /// woken.
    ///
    /// On return, the sets in `interest` only contain ready descriptors.
    /// Returns `true` if the wake-up descriptor fired, after draining it.
    pub(crate) fn wait(&self, interest: &mut Interest) -> io::Result<bool> {
        let wake_fd = self.waker.fd();
        interest.insert(EventType::Read, wake_fd);

        let rc = unsafe {
            libc::select(
                (interest.max + 1) as c_int,
                &mut interest.read.raw,
                &mut interest.write.raw,
                &mut interest.error.raw,
                ptr::null_mut(),
            )
        };

        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let woken = interest.read.contains(wake_fd);
        if woken {
            self.waker.drain();
        }

        Ok(woken)
    }
}
