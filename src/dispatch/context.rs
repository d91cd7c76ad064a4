use super::channel::Channel;
use super::thread::current_token;
use super::Action;
use crate::sync::ThreadSafeQueue;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, trace, warn};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// No policy installed: the context is not being driven.
const NO_POLICY: u8 = 0;
const FOREVER: u8 = 1;
const UNTIL_WORKERS: u8 = 2;

/// When a running dispatch loop is allowed to end on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPolicy {
    /// Run until [`DispatchContext::stop`] is called.
    Forever,

    /// Run until every [`Channel`] to the context has been dropped and
    /// the remaining actions have been executed, or until `stop`.
    UntilWorkers,
}

impl RunPolicy {
    fn as_u8(self) -> u8 {
        match self {
            RunPolicy::Forever => FOREVER,
            RunPolicy::UntilWorkers => UNTIL_WORKERS,
        }
    }
}

/// Lifecycle of a [`DispatchContext`].
///
/// Transitions only go forward: a stopped context can never run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    NotStarted,
    Running,
    Stopped,
}

/// A single-threaded dispatch loop over a queue of actions.
///
/// Actions are submitted with [`push`](Self::push) or
/// [`invoke`](Self::invoke), usually through a [`Channel`], and executed
/// in submission order by whichever thread calls [`run`](Self::run).
///
/// At most one thread drives a context at a time. A context is created
/// inside an `Arc` because channels, components and reactor callbacks all
/// keep a shared reference to it.
///
/// # Examples
///
/// ```rust,ignore
/// let context = DispatchContext::new();
/// let channel = context.create_channel();
///
/// channel.push(|| println!("hello from the loop"));
/// drop(channel);
///
/// context.run(RunPolicy::UntilWorkers);
/// ```
pub struct DispatchContext {
    /// Identifier used in log output.
    id: u64,

    /// Actions waiting to be executed.
    queue: ThreadSafeQueue<Action>,

    /// Current [`ContextState`], encoded as a `u8`.
    state: AtomicU8,

    /// Token of the thread currently driving the loop, `0` when none.
    driver: AtomicU64,

    /// Number of live channels.
    channels: AtomicUsize,

    /// Policy of the active `run`, [`NO_POLICY`] when not running.
    policy: AtomicU8,
}

impl DispatchContext {
    /// Creates a new context that has not started yet.
    pub fn new() -> Arc<Self> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        trace!(context = id, "dispatch context created");

        Arc::new(Self {
            id,
            queue: ThreadSafeQueue::new(),
            state: AtomicU8::new(NOT_STARTED),
            driver: AtomicU64::new(0),
            channels: AtomicUsize::new(0),
            policy: AtomicU8::new(NO_POLICY),
        })
    }

    /// Creates a new channel submitting into this context.
    ///
    /// Every live channel keeps a [`RunPolicy::UntilWorkers`] loop alive.
    pub fn create_channel(self: &Arc<Self>) -> Channel {
        Channel::new(self.clone())
    }

    /// Enqueues an action for execution on the loop thread.
    ///
    /// The action is never executed inline, even when called from the loop
    /// thread. Actions pushed after the context stopped are dropped.
    pub fn push<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_boxed(Box::new(action));
    }

    /// Executes the action immediately if called from the thread driving
    /// this context, otherwise enqueues it like [`push`](Self::push).
    ///
    /// Running inline makes self-posting from inside an action safe. It
    /// also means an invoked action may run ahead of actions already
    /// queued by other threads.
    pub fn invoke<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current_thread() {
            action();
        } else {
            self.push_boxed(Box::new(action));
        }
    }

    pub(crate) fn push_boxed(&self, action: Action) {
        if self.state.load(Ordering::Acquire) == STOPPED {
            warn!(context = self.id, "push on a stopped dispatch context ignored");
            return;
        }

        if let Err(e) = self.queue.push(action) {
            warn!(context = self.id, error = %e, "dropping action");
        }
    }

    /// Drives the context on the calling thread until it ends according to
    /// `policy` or [`stop`](Self::stop) is called.
    ///
    /// Only one thread can drive a context: if the context is already
    /// running, or has stopped, this returns immediately.
    ///
    /// With [`RunPolicy::UntilWorkers`], the loop ends once no channel is
    /// left. Actions queued at that point are still executed before `run`
    /// returns. A temporarily empty queue does not end the loop while
    /// channels remain.
    pub fn run(&self, policy: RunPolicy) {
        if self
            .state
            .compare_exchange(NOT_STARTED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(context = self.id, state = ?self.state(), "run ignored");
            return;
        }

        self.driver.store(current_token(), Ordering::Release);
        self.policy.store(policy.as_u8(), Ordering::SeqCst);

        debug!(context = self.id, ?policy, "dispatch context running");

        loop {
            if policy == RunPolicy::UntilWorkers && self.channels.load(Ordering::SeqCst) == 0 {
                self.drain();
                break;
            }

            match self.queue.wait_pop() {
                Some(action) => {
                    action();

                    if self.state.load(Ordering::Acquire) != RUNNING {
                        break;
                    }
                }

                None => {
                    if self.state.load(Ordering::Acquire) != RUNNING {
                        break;
                    }

                    // Woken by the last channel going away. The count is
                    // re-checked at the top, a new channel keeps us running.
                    self.queue.reset();

                    // `stop` sets the state before interrupting, so a stop
                    // racing with the reset above is observed here.
                    if self.state.load(Ordering::Acquire) != RUNNING {
                        break;
                    }
                }
            }
        }

        self.policy.store(NO_POLICY, Ordering::SeqCst);
        self.driver.store(0, Ordering::Release);
        self.state.store(STOPPED, Ordering::Release);

        debug!(context = self.id, "dispatch context stopped");
    }

    /// Executes every action still queued, without blocking.
    fn drain(&self) {
        while let Some(action) = self.queue.try_pop() {
            action();
        }
    }

    /// Stops the context. Idempotent.
    ///
    /// Releases the driving thread and wakes a blocked [`run`](Self::run)
    /// so it returns. Stopping a context that never ran prevents it from
    /// ever running.
    pub fn stop(&self) {
        if self.state.swap(STOPPED, Ordering::AcqRel) == STOPPED {
            return;
        }

        self.driver.store(0, Ordering::Release);
        self.queue.interrupt();

        debug!(context = self.id, "dispatch context stop requested");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        match self.state.load(Ordering::Acquire) {
            NOT_STARTED => ContextState::NotStarted,
            RUNNING => ContextState::Running,
            _ => ContextState::Stopped,
        }
    }

    /// Returns `true` while some thread is driving the context.
    pub fn is_running(&self) -> bool {
        self.state() == ContextState::Running
    }

    /// Returns `true` if the calling thread is the one driving the context.
    pub fn is_current_thread(&self) -> bool {
        self.driver.load(Ordering::Acquire) == current_token()
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        self.channels.load(Ordering::SeqCst)
    }

    /// Number of queued actions.
    pub fn pending(&self) -> usize {
        self.queue.count()
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn acquire_channel(&self) {
        self.channels.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release_channel(&self) {
        let previous = self.channels.fetch_sub(1, Ordering::SeqCst);
        trace!(context = self.id, channels = previous - 1, "channel released");

        if previous == 1 && self.policy.load(Ordering::SeqCst) == UNTIL_WORKERS {
            self.queue.interrupt();
        }
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("channels", &self.channel_count())
            .field("pending", &self.pending())
            .finish()
    }
}
