use crate::dispatch::Channel;
use crate::error::{Error, Result};
use crate::listener::{ListenerHandle, Subscribers};
use crate::reactor::poller::platform::{sys_read_counter, sys_timerfd_create, sys_timerfd_settime};
use crate::reactor::{EventType, Handle, ReadinessCallback, Reactor};

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{trace, warn};

/// How many times a started timer expires before it disarms itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repetition {
    /// Re-arm after every expiry until stopped.
    Infinite,

    /// Expire once.
    OneTime,

    /// Expire exactly `n` times. `Times(0)` behaves like `OneTime`.
    Times(u32),
}

impl Repetition {
    /// Returns `true` if the timer may fire again after `fired` expiries.
    fn allows_after(self, fired: u64) -> bool {
        match self {
            Repetition::Infinite => true,
            Repetition::OneTime => false,
            Repetition::Times(n) => fired < u64::from(n.max(1)),
        }
    }
}

impl From<i32> for Repetition {
    /// Negative means infinite, zero means once, `n` means `n` times.
    fn from(number: i32) -> Self {
        match number {
            n if n < 0 => Repetition::Infinite,
            0 => Repetition::OneTime,
            n => Repetition::Times(n as u32),
        }
    }
}

/// Receives timer expiries on the listener's own context.
pub trait TimerListener: Send + Sync {
    /// Called once per expiry with the number of expiries since `start`.
    fn on_timer_expired(&self, fired: u64);
}

struct TimerState {
    handle: Handle,
    inner: Mutex<Inner>,
}

struct Inner {
    interval: Duration,

    /// Configured repetition, applied on the next `start`.
    repetition: Repetition,

    /// Repetition in effect for the current run.
    limit: Repetition,

    armed: bool,
    fired: u64,
    listeners: Subscribers<dyn TimerListener>,
}

impl TimerState {
    /// Expiry callback, run on the reactor thread.
    fn on_expired(&self) {
        if sys_read_counter(self.handle.raw()).is_none() {
            return;
        }

        let mut inner = self.inner.lock().unwrap();

        // Stopped after the expiry was already signalled.
        if !inner.armed {
            return;
        }

        inner.fired += 1;
        let fired = inner.fired;

        trace!(timer = %self.handle, fired, "timer expired");

        inner
            .listeners
            .notify_all(move |listener| listener.on_timer_expired(fired));

        if inner.limit.allows_after(fired) {
            if let Err(e) = sys_timerfd_settime(self.handle.raw(), Some(inner.interval)) {
                warn!(timer = %self.handle, error = %e, "failed to re-arm timer");
                inner.armed = false;
            }
        } else {
            inner.armed = false;
        }
    }
}

/// A reactor-driven timer backed by a `timerfd`.
///
/// The timer is configured with an interval and a [`Repetition`], then
/// armed with [`start`](Self::start). Each expiry is handled on the reactor
/// thread and forwarded to the registered [`TimerListener`]s through their
/// channels. Configuration changes take effect on the next `start`.
///
/// Dropping the timer unregisters it from the reactor before its handle
/// is closed.
///
/// # Examples
///
/// ```rust,ignore
/// let timer = Timer::new(&reactor)?;
/// timer.set_interval(Duration::from_millis(100));
/// timer.set_number_of_repetition(3);
/// timer.add_listener(ListenerHandle::owned(listener), component.channel().unwrap());
/// timer.start()?;
/// ```
pub struct Timer {
    state: Arc<TimerState>,
    reactor: Arc<Reactor>,
    callback: ReadinessCallback,
}

impl Timer {
    /// Creates a disarmed one-shot timer with a zero interval.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionFailure`] if the OS timer could not be
    /// created, or the reactor's error if it refused the registration.
    pub fn new(reactor: &Arc<Reactor>) -> Result<Self> {
        let fd = sys_timerfd_create().map_err(|e| Error::construction("timer", e))?;
        let handle = Handle::from_raw(fd);

        let state = Arc::new(TimerState {
            handle,
            inner: Mutex::new(Inner {
                interval: Duration::ZERO,
                repetition: Repetition::OneTime,
                limit: Repetition::OneTime,
                armed: false,
                fired: 0,
                listeners: Subscribers::new(),
            }),
        });

        let weak = Arc::downgrade(&state);
        let callback = ReadinessCallback::new(move |_| {
            if let Some(state) = weak.upgrade() {
                state.on_expired();
            }
        });

        if let Err(e) = reactor.register(handle, EventType::Read, &callback) {
            reactor.release(handle);
            return Err(e);
        }

        trace!(timer = %handle, "timer created");

        Ok(Self {
            state,
            reactor: reactor.clone(),
            callback,
        })
    }

    /// Sets the time between `start` and the first expiry, and between
    /// subsequent expiries.
    pub fn set_interval(&self, interval: Duration) {
        self.lock().interval = interval;
    }

    /// Sets the repetition from its numeric form.
    ///
    /// Negative means infinite, zero means once, `n` means `n` expiries.
    pub fn set_number_of_repetition(&self, number: i32) {
        self.set_repetition(Repetition::from(number));
    }

    pub fn set_repetition(&self, repetition: Repetition) {
        self.lock().repetition = repetition;
    }

    /// Makes the timer repeat until stopped.
    pub fn enable_continuous(&self) {
        self.set_repetition(Repetition::Infinite);
    }

    /// Turns a continuous timer back into a one-shot timer.
    ///
    /// A finite repetition count is left untouched.
    pub fn disable_continuous(&self) {
        let mut inner = self.lock();
        if inner.repetition == Repetition::Infinite {
            inner.repetition = Repetition::OneTime;
        }
    }

    /// Arms the timer and resets its fired count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateAssertion`] if the timer is already armed, or
    /// [`Error::Io`] if the OS timer could not be armed.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();

        if inner.armed {
            return Err(Error::state(
                format!("timer {}", self.state.handle),
                "timer is already running",
            ));
        }

        sys_timerfd_settime(self.state.handle.raw(), Some(inner.interval))?;

        inner.fired = 0;
        inner.limit = inner.repetition;
        inner.armed = true;

        trace!(timer = %self.state.handle, interval = ?inner.interval, "timer started");
        Ok(())
    }

    /// Disarms the timer. Returns `false` if it was not armed.
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();

        if !inner.armed {
            return false;
        }

        if let Err(e) = sys_timerfd_settime(self.state.handle.raw(), None) {
            warn!(timer = %self.state.handle, error = %e, "failed to disarm timer");
        }

        inner.armed = false;
        true
    }

    /// Registers a listener notified on every expiry through `channel`.
    pub fn add_listener(&self, listener: ListenerHandle<dyn TimerListener>, channel: Channel) {
        self.lock().listeners.add(listener, channel);
    }

    /// Removes every registration of `listener`. Returns whether one was found.
    pub fn remove_listener(&self, listener: &Arc<dyn TimerListener>) -> bool {
        self.lock().listeners.remove(listener)
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    /// Expiries since the last `start`.
    pub fn fired_count(&self) -> u64 {
        self.lock().fired
    }

    pub fn interval(&self) -> Duration {
        self.lock().interval
    }

    pub fn repetition(&self) -> Repetition {
        self.lock().repetition
    }

    pub fn handle(&self) -> Handle {
        self.state.handle
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.state.inner.lock().unwrap()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();

        let _ = self
            .reactor
            .unregister(self.state.handle, EventType::Read, &self.callback);
        self.reactor.release(self.state.handle);
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();

        f.debug_struct("Timer")
            .field("handle", &self.state.handle)
            .field("interval", &inner.interval)
            .field("repetition", &inner.repetition)
            .field("armed", &inner.armed)
            .field("fired", &inner.fired)
            .finish()
    }
}
