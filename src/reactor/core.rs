use super::builder::ReactorBuilder;
use super::handle::{EventType, Handle, ReadinessCallback};
use super::poller::platform::{sys_close, sys_eventfd, sys_fd_is_open};
use super::poller::{Interest, MAX_DESCRIPTOR, SelectPoller, Waker};
use crate::error::{Error, Result};

use std::fmt;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, error, trace, warn};

/// Process-wide reactor handed out by [`Reactor::default_instance`].
static DEFAULT_REACTOR: Mutex<Option<Arc<Reactor>>> = Mutex::new(None);

/// A registration change waiting to be applied by the loop thread.
enum Change {
    Add {
        handle: Handle,
        event: EventType,
        callback: ReadinessCallback,
    },
    Remove {
        handle: Handle,
        event: EventType,
        callback: ReadinessCallback,
    },
    /// Drop every registration of the handle, then close it.
    Release { handle: Handle },
}

struct Pending {
    /// Changes in submission order.
    changes: Vec<Change>,

    /// Set by the loop thread once it has exited and applied the last batch.
    closed: bool,
}

/// State shared between the [`Reactor`] handle and its loop thread.
struct Shared {
    pending: Mutex<Pending>,
    poller: SelectPoller,
    running: AtomicBool,

    /// Number of committed `(handle, event)` entries.
    registered: AtomicUsize,
}

/// Readiness multiplexer running on a dedicated thread.
///
/// Objects register callbacks for a [`Handle`] and an [`EventType`]; the
/// reactor thread waits in `select(2)` and runs every callback of a handle
/// once it is ready, in registration order.
///
/// Registration changes are queued and applied by the reactor thread
/// between two waits, so the descriptor sets are never touched while the
/// thread is blocked. A change made from another thread wakes the reactor
/// through an `eventfd`.
///
/// Callbacks run on the reactor thread. They must not block, and anything
/// that touches state owned by another thread must be pushed through that
/// thread's [`Channel`](crate::dispatch::Channel).
///
/// # Examples
///
/// ```rust,ignore
/// let reactor = ReactorBuilder::new().thread_name("io").build()?;
///
/// let callback = ReadinessCallback::new(|handle| println!("{handle} is readable"));
/// reactor.register(handle, EventType::Read, &callback)?;
/// ```
pub struct Reactor {
    shared: Arc<Shared>,

    /// Loop thread, taken when joined.
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,

    name: String,
    read_buffer_size: usize,
    listen_backlog: i32,
}

impl Reactor {
    /// Creates a reactor with the default configuration.
    ///
    /// See [`ReactorBuilder`] for the available options.
    pub fn new() -> Result<Arc<Self>> {
        ReactorBuilder::new().build()
    }

    /// Returns the process-wide reactor, creating it on first use.
    ///
    /// A default reactor that has been stopped is replaced by a new one.
    pub fn default_instance() -> Result<Arc<Self>> {
        let mut slot = DEFAULT_REACTOR.lock().unwrap();

        if let Some(reactor) = slot.as_ref().filter(|r| r.is_running()) {
            return Ok(reactor.clone());
        }

        let reactor = ReactorBuilder::new().build()?;
        *slot = Some(reactor.clone());

        Ok(reactor)
    }

    pub(crate) fn start(builder: ReactorBuilder) -> Result<Arc<Self>> {
        let fd = sys_eventfd().map_err(|e| Error::construction("reactor eventfd", e))?;

        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending {
                changes: Vec::new(),
                closed: false,
            }),
            poller: SelectPoller::new(Waker::new(fd)),
            running: AtomicBool::new(true),
            registered: AtomicUsize::new(0),
        });

        let loop_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(builder.thread_name.clone())
            .spawn(move || EventLoop::new(loop_shared).run())
            .map_err(|e| Error::construction("reactor thread", e))?;

        debug!(reactor = %builder.thread_name, "reactor started");

        Ok(Arc::new(Self {
            shared,
            thread_id: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
            name: builder.thread_name,
            read_buffer_size: builder.read_buffer_size,
            listen_backlog: builder.listen_backlog,
        }))
    }

    /// Registers `callback` to run whenever `handle` is ready for `event`.
    ///
    /// Registering the same callback twice for the same handle and event
    /// keeps a single registration. The change takes effect before the
    /// reactor's next wait.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] for a handle `select` cannot watch,
    /// and [`Error::StateAssertion`] once the reactor has stopped.
    pub fn register(&self, handle: Handle, event: EventType, callback: &ReadinessCallback) -> Result<()> {
        check_handle(handle)?;

        self.submit(Change::Add {
            handle,
            event,
            callback: callback.clone(),
        })
    }

    /// Removes a registration made with [`register`](Self::register).
    ///
    /// Changes are applied in submission order, so the last of a register
    /// and an unregister of the same triple wins. Unregistering from a
    /// stopped reactor does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] for a handle `select` cannot watch.
    pub fn unregister(&self, handle: Handle, event: EventType, callback: &ReadinessCallback) -> Result<()> {
        check_handle(handle)?;

        match self.submit(Change::Remove {
            handle,
            event,
            callback: callback.clone(),
        }) {
            Err(Error::StateAssertion { .. }) => Ok(()),
            other => other,
        }
    }

    /// Removes every registration of `handle`, then closes it.
    ///
    /// The close happens on the reactor thread after the registrations are
    /// gone, so the descriptor cannot be recycled while a stale callback is
    /// still watching it. On a stopped reactor the handle is closed at once.
    pub fn release(&self, handle: Handle) {
        if !handle.is_valid() {
            return;
        }

        {
            let mut pending = self.shared.pending.lock().unwrap();
            if !pending.closed {
                pending.changes.push(Change::Release { handle });
                drop(pending);

                self.shared.poller.waker().wake();
                return;
            }
        }

        sys_close(handle.raw());
    }

    fn submit(&self, change: Change) -> Result<()> {
        {
            let mut pending = self.shared.pending.lock().unwrap();
            if pending.closed {
                return Err(Error::state(self.name.clone(), "reactor has stopped"));
            }
            pending.changes.push(change);
        }

        self.shared.poller.waker().wake();
        Ok(())
    }

    /// Stops the reactor thread. Idempotent.
    ///
    /// Waits for the thread to exit unless called from a reactor callback.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            debug!(reactor = %self.name, "reactor stop requested");
        }

        self.shared.poller.waker().wake();

        if self.is_current_thread() {
            return;
        }

        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(reactor = %self.name, "reactor thread panicked");
            }
        }
    }

    /// Returns `true` until the reactor is stopped.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Returns `true` when called from the reactor thread.
    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Number of `(handle, event)` pairs currently watched.
    ///
    /// Only reflects changes the reactor thread has already applied.
    pub fn registered_handles(&self) -> usize {
        self.shared.registered.load(Ordering::Acquire)
    }

    /// Size of the buffer sockets read into on each `recv`.
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    /// Backlog passed to `listen` by server sockets.
    pub fn listen_backlog(&self) -> i32 {
        self.listen_backlog
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("registered", &self.registered_handles())
            .finish()
    }
}

fn check_handle(handle: Handle) -> Result<()> {
    if (0..MAX_DESCRIPTOR).contains(&handle.raw()) {
        Ok(())
    } else {
        Err(Error::InvalidHandle(handle.raw()))
    }
}

/// Callbacks registered for one event type, keyed by handle.
#[derive(Default)]
struct ListenerTable {
    entries: Vec<(Handle, Vec<ReadinessCallback>)>,
}

impl ListenerTable {
    fn add(&mut self, handle: Handle, callback: ReadinessCallback) {
        match self.entries.iter_mut().find(|(h, _)| *h == handle) {
            Some((_, callbacks)) => {
                if !callbacks.contains(&callback) {
                    callbacks.push(callback);
                }
            }
            None => self.entries.push((handle, vec![callback])),
        }
    }

    fn remove(&mut self, handle: Handle, callback: &ReadinessCallback) {
        if let Some(index) = self.entries.iter().position(|(h, _)| *h == handle) {
            let callbacks = &mut self.entries[index].1;
            callbacks.retain(|c| c != callback);

            if callbacks.is_empty() {
                self.entries.remove(index);
            }
        }
    }

    fn purge(&mut self, handle: Handle) {
        self.entries.retain(|(h, _)| *h != handle);
    }

    /// Drops entries whose descriptor has been closed. Returns how many.
    fn prune_closed(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(h, _)| sys_fd_is_open(h.raw()));
        before - self.entries.len()
    }
}

/// Loop state owned by the reactor thread.
struct EventLoop {
    shared: Arc<Shared>,
    tables: [ListenerTable; 3],
}

impl EventLoop {
    fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            tables: Default::default(),
        }
    }

    fn run(mut self) {
        debug!("reactor loop running");

        while self.shared.running.load(Ordering::Acquire) {
            self.apply_pending();

            let mut interest = Interest::new();
            for event in EventType::ALL {
                for (handle, _) in &self.tables[event.index()].entries {
                    interest.insert(event, handle.raw());
                }
            }

            match self.shared.poller.wait(&mut interest) {
                Ok(_) => {}

                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,

                Err(e) if e.raw_os_error() == Some(libc::EBADF) => {
                    // A handle was closed before its unregistration reached us.
                    self.apply_pending();
                    let pruned: usize = self.tables.iter_mut().map(|t| t.prune_closed()).sum();
                    self.publish_count();

                    warn!(pruned, "select reported a closed handle");
                    continue;
                }

                Err(e) => {
                    error!(error = %e, "select failed, stopping reactor");
                    self.shared.running.store(false, Ordering::Release);
                    break;
                }
            }

            if !self.shared.running.load(Ordering::Acquire) {
                break;
            }

            self.apply_pending();
            self.dispatch(&interest);
        }

        let changes = {
            let mut pending = self.shared.pending.lock().unwrap();
            pending.closed = true;
            mem::take(&mut pending.changes)
        };
        self.apply(changes);

        debug!("reactor loop exited");
    }

    /// Runs the callbacks of every ready handle.
    ///
    /// The ready list is collected first so callbacks can register and
    /// unregister freely while they run.
    fn dispatch(&self, interest: &Interest) {
        let mut ready = Vec::new();

        for event in EventType::ALL {
            for (handle, callbacks) in &self.tables[event.index()].entries {
                if interest.is_ready(event, handle.raw()) {
                    ready.extend(callbacks.iter().map(|c| (*handle, c.clone())));
                }
            }
        }

        for (handle, callback) in ready {
            callback.call(handle);
        }
    }

    fn apply_pending(&mut self) {
        let changes = mem::take(&mut self.shared.pending.lock().unwrap().changes);
        if !changes.is_empty() {
            self.apply(changes);
        }
    }

    fn apply(&mut self, changes: Vec<Change>) {
        for change in changes {
            match change {
                Change::Add {
                    handle,
                    event,
                    callback,
                } => {
                    trace!(%handle, ?event, "registering");
                    self.tables[event.index()].add(handle, callback);
                }

                Change::Remove {
                    handle,
                    event,
                    callback,
                } => {
                    trace!(%handle, ?event, "unregistering");
                    self.tables[event.index()].remove(handle, &callback);
                }

                Change::Release { handle } => {
                    trace!(%handle, "releasing");
                    for table in &mut self.tables {
                        table.purge(handle);
                    }
                    sys_close(handle.raw());
                }
            }
        }

        self.publish_count();
    }

    fn publish_count(&self) {
        let count = self.tables.iter().map(|t| t.entries.len()).sum();
        self.shared.registered.store(count, Ordering::Release);
    }
}
