use super::Action;
use crate::error::{Error, Result};
use crate::sync::ThreadSafeQueue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, trace, warn};

/// A fixed-size pool of worker threads draining one shared queue.
///
/// Unlike a [`DispatchContext`](super::DispatchContext), a pool gives no
/// ordering guarantee between actions: any idle worker picks up the next
/// one.
///
/// Dropping the pool stops it and joins every worker.
///
/// # Examples
///
/// ```rust,ignore
/// let pool = ThreadPool::new(4)?;
/// pool.push(|| println!("running on a worker"))?;
/// pool.stop();
/// ```
pub struct ThreadPool {
    /// Queue shared by all workers.
    queue: Arc<ThreadSafeQueue<Action>>,

    /// Join handles for worker threads, emptied by `stop`.
    handles: Mutex<Vec<JoinHandle<()>>>,

    /// Identifiers of the worker threads.
    thread_ids: Vec<ThreadId>,

    /// Set once `stop` has been called.
    stopped: AtomicBool,
}

impl ThreadPool {
    /// Spawns a pool of `size` worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionFailure`] if a worker thread could not
    /// be spawned. Workers spawned before the failure are shut down.
    ///
    /// # Panics
    ///
    /// Panics if `size == 0`.
    pub fn new(size: usize) -> Result<Self> {
        assert!(size > 0, "thread pool size must be > 0");

        let queue = Arc::new(ThreadSafeQueue::<Action>::new());
        let mut handles = Vec::with_capacity(size);

        for index in 0..size {
            let worker_queue = queue.clone();

            let spawned = thread::Builder::new()
                .name(format!("intercom-pool-{index}"))
                .spawn(move || {
                    trace!(worker = index, "pool worker started");

                    while let Some(action) = worker_queue.wait_pop() {
                        action();
                    }

                    trace!(worker = index, "pool worker exiting");
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    queue.interrupt();
                    for handle in handles {
                        join_worker(handle);
                    }
                    return Err(Error::construction("thread pool worker", e));
                }
            }
        }

        let thread_ids = handles.iter().map(|h| h.thread().id()).collect();
        debug!(size, "thread pool started");

        Ok(Self {
            queue,
            handles: Mutex::new(handles),
            thread_ids,
            stopped: AtomicBool::new(false),
        })
    }

    /// Spawns one worker per available logical CPU, falling back to `1`.
    pub fn with_default_size() -> Result<Self> {
        let size = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self::new(size)
    }

    /// Enqueues an action for the next idle worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateAssertion`] once the pool has been stopped, or
    /// [`Error::AllocationFailure`] if the queue could not grow.
    pub fn push<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::state("ThreadPool", "push after stop"));
        }

        self.queue.push(Box::new(action))
    }

    /// Returns `true` if `id` is one of the pool's worker threads.
    pub fn has_thread(&self, id: ThreadId) -> bool {
        self.thread_ids.contains(&id)
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.thread_ids.len()
    }

    /// Stops the pool and joins its workers. Idempotent.
    ///
    /// Workers finish the action they are running; actions still queued
    /// are dropped. When called from a worker, that worker is not joined.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.queue.interrupt();

        let current = thread::current().id();
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();

        for handle in handles {
            if handle.thread().id() != current {
                join_worker(handle);
            }
        }

        debug!(size = self.size(), "thread pool stopped");
    }
}

fn join_worker(handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("unnamed").to_owned();

    if handle.join().is_err() {
        warn!(worker = %name, "pool worker panicked");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}
