use crate::error::{Error, Result};

use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

/// State shared between a [`Promise`] and its [`Completion`].
struct Shared<T> {
    slot: Mutex<Slot<T>>,
    condvar: Condvar,
}

struct Slot<T> {
    /// Outcome, once the promise side has resolved it.
    outcome: Option<Result<T>>,

    /// Set once the outcome has been handed to the completion side.
    taken: bool,

    /// Waker of an async task polling the completion.
    waker: Option<Waker>,
}

/// Creates a connected promise/completion pair.
///
/// The [`Promise`] is kept by whoever performs the operation; the
/// [`Completion`] is handed to whoever wants its outcome.
pub fn promise<T>() -> (Promise<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            outcome: None,
            taken: false,
            waker: None,
        }),
        condvar: Condvar::new(),
    });

    (
        Promise {
            shared: Some(shared.clone()),
        },
        Completion { shared },
    )
}

/// The producing half of a one-shot completion.
///
/// A promise is resolved exactly once, with [`fulfill`](Self::fulfill) or
/// [`fail`](Self::fail). Dropping it unresolved resolves the completion
/// with [`Error::BrokenPromise`].
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    /// Resolves the completion with a value.
    pub fn fulfill(mut self, value: T) {
        self.resolve(Ok(value));
    }

    /// Resolves the completion with an error.
    pub fn fail(mut self, error: Error) {
        self.resolve(Err(error));
    }

    /// Returns `true` if the completion side has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.shared
            .as_ref()
            .is_none_or(|shared| Arc::strong_count(shared) == 1)
    }

    fn resolve(&mut self, outcome: Result<T>) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        let waker = {
            let mut slot = shared.slot.lock().unwrap();
            slot.outcome = Some(outcome);
            slot.waker.take()
        };

        shared.condvar.notify_all();

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        self.resolve(Err(Error::BrokenPromise));
    }
}

/// The consuming half of a one-shot completion.
///
/// The outcome can be obtained by blocking with [`wait`](Self::wait),
/// by polling with [`try_take`](Self::try_take), or by awaiting the
/// completion as a [`Future`] from any executor.
///
/// Dropping a completion discards the outcome, including any error.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completion<T> {
    /// Creates a completion that is already resolved.
    pub fn ready(outcome: Result<T>) -> Self {
        let (mut promise, completion) = promise();
        promise.resolve(outcome);
        completion
    }

    /// Blocks the calling thread until the promise is resolved.
    ///
    /// # Errors
    ///
    /// Returns the error the operation failed with, or
    /// [`Error::BrokenPromise`] if the promise was dropped unresolved.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.slot.lock().unwrap();

        loop {
            if let Some(outcome) = slot.outcome.take() {
                slot.taken = true;
                return outcome;
            }

            if slot.taken {
                return Err(Error::BrokenPromise);
            }

            slot = self.shared.condvar.wait(slot).unwrap();
        }
    }

    /// Takes the outcome if the promise has been resolved. Never blocks.
    ///
    /// Returns `None` while the operation is still pending, and after the
    /// outcome has already been taken.
    pub fn try_take(&mut self) -> Option<Result<T>> {
        let mut slot = self.shared.slot.lock().unwrap();
        let outcome = slot.outcome.take();
        if outcome.is_some() {
            slot.taken = true;
        }
        outcome
    }

    /// Returns `true` if an outcome is available.
    pub fn is_ready(&self) -> bool {
        self.shared.slot.lock().unwrap().outcome.is_some()
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    /// Polls the completion.
    ///
    /// The waker is stored under the same lock that guards the outcome,
    /// so a resolution racing with this poll cannot be missed.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
        let mut slot = self.shared.slot.lock().unwrap();

        if let Some(outcome) = slot.outcome.take() {
            slot.taken = true;
            return Poll::Ready(outcome);
        }

        if slot.taken {
            return Poll::Ready(Err(Error::BrokenPromise));
        }

        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;
    use std::thread;
    use std::time::Duration;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_wait_receives_value_from_other_thread() {
        let (promise, completion) = promise();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            promise.fulfill(42);
        });

        assert_eq!(completion.wait().unwrap(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn test_failure_is_delivered_to_completion() {
        let (promise, completion) = promise::<()>();
        promise.fail(Error::Io(io::Error::from(io::ErrorKind::ConnectionReset)));

        match completion.wait() {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_dropped_promise_breaks_completion() {
        let (promise, completion) = promise::<u8>();
        drop(promise);

        assert!(matches!(completion.wait(), Err(Error::BrokenPromise)));
    }

    #[test]
    fn test_try_take_is_non_blocking() {
        let (promise, mut completion) = promise();
        assert!(completion.try_take().is_none());
        assert!(!completion.is_ready());

        promise.fulfill("done");
        assert!(completion.is_ready());
        assert_eq!(completion.try_take().unwrap().unwrap(), "done");
        assert!(completion.try_take().is_none());
    }

    #[test]
    fn test_poll_registers_waker_and_resolves() {
        let (promise, mut completion) = promise();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        let mut cx = Context::from_waker(&waker);

        assert!(Pin::new(&mut completion).poll(&mut cx).is_pending());

        promise.fulfill(7u32);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        match Pin::new(&mut completion).poll(&mut cx) {
            Poll::Ready(Ok(value)) => assert_eq!(value, 7),
            other => panic!("unexpected poll result: {other:?}"),
        }
    }

    #[test]
    fn test_abandoned_promise_is_detected() {
        let (promise, completion) = promise::<()>();
        assert!(!promise.is_abandoned());

        drop(completion);
        assert!(promise.is_abandoned());
    }
}
