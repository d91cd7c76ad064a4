use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Opaque identifier of an OS resource watched by the reactor.
///
/// On POSIX systems this is a file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(RawFd);

impl Handle {
    /// Sentinel for "no resource".
    pub const INVALID: Handle = Handle(-1);

    pub fn from_raw(fd: RawFd) -> Self {
        Handle(fd)
    }

    pub fn raw(self) -> RawFd {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Readiness condition a callback is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Read,
    Write,
    Error,
}

impl EventType {
    pub(crate) const ALL: [EventType; 3] = [EventType::Read, EventType::Write, EventType::Error];

    pub(crate) fn index(self) -> usize {
        match self {
            EventType::Read => 0,
            EventType::Write => 1,
            EventType::Error => 2,
        }
    }
}

/// Callback run on the reactor thread when a handle becomes ready.
///
/// Two callbacks are equal only if they are clones of the same
/// `ReadinessCallback`, which is how a registration is later identified
/// for removal.
#[derive(Clone)]
pub struct ReadinessCallback(Arc<dyn Fn(Handle) + Send + Sync>);

impl ReadinessCallback {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Handle) + Send + Sync + 'static,
    {
        ReadinessCallback(Arc::new(callback))
    }

    pub(crate) fn call(&self, handle: Handle) {
        (self.0)(handle)
    }
}

impl PartialEq for ReadinessCallback {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }
}

impl Eq for ReadinessCallback {}

impl fmt::Debug for ReadinessCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadinessCallback({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}
