use crate::error::{Error, Result};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

/// A multi-producer, multi-consumer blocking FIFO queue.
///
/// Producers append with [`push`](Self::push); consumers either poll with
/// [`try_pop`](Self::try_pop) or block in [`wait_pop`](Self::wait_pop)
/// until an item arrives.
///
/// The queue can be *interrupted*. Once interrupted, every blocked and
/// future `wait_pop` returns `None` immediately, without consuming items,
/// until [`reset`](Self::reset) clears the flag. This is how dispatch loops
/// and worker pools are woken up for shutdown without pushing a sentinel.
///
/// Items pushed by one thread are popped in the order they were pushed.
/// There is no ordering guarantee between different producers beyond the
/// order in which they acquired the lock.
pub struct ThreadSafeQueue<T> {
    /// Items waiting to be consumed.
    items: Mutex<VecDeque<T>>,

    /// Signalled on every push and on interrupt.
    condvar: Condvar,

    /// Set by [`interrupt`](Self::interrupt), cleared by [`reset`](Self::reset).
    ///
    /// Written while holding `items` so a waiter cannot miss the transition
    /// between its check and its wait.
    interrupted: AtomicBool,
}

impl<T> ThreadSafeQueue<T> {
    /// Creates an empty, non-interrupted queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Appends an item to the back of the queue and wakes waiters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the queue could not grow.
    pub fn push(&self, item: T) -> Result<()> {
        if self.try_push(item) {
            Ok(())
        } else {
            Err(Error::AllocationFailure)
        }
    }

    /// Appends an item to the back of the queue.
    ///
    /// Returns `false` if the queue could not grow; the item is dropped.
    pub fn try_push(&self, item: T) -> bool {
        let mut items = self.lock();

        if items.try_reserve(1).is_err() {
            return false;
        }

        items.push_back(item);
        drop(items);

        self.condvar.notify_all();
        true
    }

    /// Removes the front item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueEmpty`] if nothing is queued.
    pub fn pop(&self) -> Result<T> {
        self.try_pop().ok_or(Error::QueueEmpty)
    }

    /// Removes the front item if there is one. Never blocks.
    ///
    /// The interrupted flag is ignored, so this can drain a queue that
    /// has already been interrupted.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Blocks until an item is available or the queue is interrupted.
    ///
    /// Returns `None` on interruption. An interrupted queue returns `None`
    /// right away even if items are still queued.
    pub fn wait_pop(&self) -> Option<T> {
        let mut items = self.lock();

        loop {
            if self.interrupted.load(Ordering::Acquire) {
                return None;
            }

            if let Some(item) = items.pop_front() {
                return Some(item);
            }

            items = self.condvar.wait(items).unwrap();
        }
    }

    /// Interrupts the queue and wakes every waiter. Idempotent.
    pub fn interrupt(&self) {
        {
            let _items = self.lock();
            self.interrupted.store(true, Ordering::Release);
        }

        self.condvar.notify_all();
    }

    /// Clears the interrupted flag so the queue can block again.
    pub fn reset(&self) {
        let _items = self.lock();
        self.interrupted.store(false, Ordering::Release);
    }

    /// Returns `true` if the queue is currently interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Number of queued items.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap()
    }
}

impl<T> Default for ThreadSafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
