//! Listener registrations for reactor-backed objects.
//!
//! Timers and server sockets notify listeners from the reactor thread. A
//! listener is registered together with the [`Channel`] of the context it
//! lives on, and every notification is pushed through that channel so the
//! listener only ever runs on its own thread.

use crate::dispatch::Channel;

use std::sync::{Arc, Weak};

/// A reference to a listener, either keeping it alive or not.
///
/// - [`Owned`](Self::Owned): the registrar holds the listener alive until
///   it is removed.
/// - [`Borrowed`](Self::Borrowed): the registrar only observes it; once
///   the listener is dropped elsewhere the registration is pruned.
pub enum ListenerHandle<L: ?Sized> {
    Owned(Arc<L>),
    Borrowed(Weak<L>),
}

impl<L: ?Sized> ListenerHandle<L> {
    /// Creates an owning handle.
    pub fn owned(listener: Arc<L>) -> Self {
        ListenerHandle::Owned(listener)
    }

    /// Creates a non-owning handle to `listener`.
    pub fn borrowed(listener: &Arc<L>) -> Self {
        ListenerHandle::Borrowed(Arc::downgrade(listener))
    }

    /// Returns the listener if it is still alive.
    pub fn upgrade(&self) -> Option<Arc<L>> {
        match self {
            ListenerHandle::Owned(listener) => Some(listener.clone()),
            ListenerHandle::Borrowed(listener) => listener.upgrade(),
        }
    }

    /// Returns `true` once a borrowed listener has been dropped.
    ///
    /// Owned listeners never expire.
    pub fn is_expired(&self) -> bool {
        match self {
            ListenerHandle::Owned(_) => false,
            ListenerHandle::Borrowed(listener) => listener.strong_count() == 0,
        }
    }

    /// Returns `true` if this handle refers to `listener`.
    ///
    /// Identity is the address of the listener, ignoring vtables.
    pub fn refers_to(&self, listener: &Arc<L>) -> bool {
        let target = Arc::as_ptr(listener) as *const ();

        match self {
            ListenerHandle::Owned(own) => Arc::as_ptr(own) as *const () == target,
            ListenerHandle::Borrowed(weak) => weak.as_ptr() as *const () == target,
        }
    }
}

impl<L: ?Sized> Clone for ListenerHandle<L> {
    fn clone(&self) -> Self {
        match self {
            ListenerHandle::Owned(listener) => ListenerHandle::Owned(listener.clone()),
            ListenerHandle::Borrowed(listener) => ListenerHandle::Borrowed(listener.clone()),
        }
    }
}

/// A registered listener and the channel its notifications go through.
pub(crate) struct Subscriber<L: ?Sized> {
    handle: ListenerHandle<L>,
    channel: Channel,
}

impl<L: ?Sized + Send + Sync + 'static> Subscriber<L> {
    pub(crate) fn new(handle: ListenerHandle<L>, channel: Channel) -> Self {
        Self { handle, channel }
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.handle.is_expired()
    }

    pub(crate) fn refers_to(&self, listener: &Arc<L>) -> bool {
        self.handle.refers_to(listener)
    }

    /// Pushes `notify` onto the listener's context.
    ///
    /// The listener is upgraded on its own thread, so a borrowed listener
    /// dropped in the meantime is simply skipped.
    pub(crate) fn notify<F>(&self, notify: F)
    where
        F: FnOnce(&L) + Send + 'static,
    {
        let handle = self.handle.clone();

        self.channel.push(move || {
            if let Some(listener) = handle.upgrade() {
                notify(&listener);
            }
        });
    }
}

/// A set of subscribers with lazy pruning of expired entries.
pub(crate) struct Subscribers<L: ?Sized> {
    entries: Vec<Subscriber<L>>,
}

impl<L: ?Sized + Send + Sync + 'static> Subscribers<L> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, handle: ListenerHandle<L>, channel: Channel) {
        self.entries.push(Subscriber::new(handle, channel));
    }

    /// Removes every registration of `listener`. Returns whether any was found.
    pub(crate) fn remove(&mut self, listener: &Arc<L>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| !s.refers_to(listener));
        before != self.entries.len()
    }

    /// Notifies every live subscriber, pruning the expired ones first.
    pub(crate) fn notify_all<F>(&mut self, notify: F)
    where
        F: Fn(&L) + Clone + Send + 'static,
    {
        self.entries.retain(|s| !s.is_expired());

        for subscriber in &self.entries {
            subscriber.notify(notify.clone());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if at least one listener is still alive.
    pub(crate) fn has_live(&self) -> bool {
        self.entries.iter().any(|s| !s.is_expired())
    }
}

impl<L: ?Sized> Default for Subscribers<L> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::dispatch::{DispatchContext, RunPolicy};

    use std::sync::Mutex;

    trait Sink: Send + Sync {
        fn record(&self, value: u32);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u32>>);

    impl Sink for Recorder {
        fn record(&self, value: u32) {
            self.0.lock().unwrap().push(value);
        }
    }

    #[test]
    fn test_borrowed_handle_expires_with_listener() {
        let listener: Arc<dyn Sink> = Arc::new(Recorder::default());
        let handle = ListenerHandle::borrowed(&listener);

        assert!(!handle.is_expired());
        assert!(handle.upgrade().is_some());

        drop(listener);
        assert!(handle.is_expired());
        assert!(handle.upgrade().is_none());
    }

    #[test]
    fn test_owned_handle_keeps_listener_alive() {
        let listener: Arc<dyn Sink> = Arc::new(Recorder::default());
        let handle = ListenerHandle::owned(listener.clone());
        let observer = Arc::downgrade(&listener);

        drop(listener);
        assert!(!handle.is_expired());
        assert!(observer.upgrade().is_some());
    }

    #[test]
    fn test_identity_ignores_ownership_kind() {
        let a: Arc<dyn Sink> = Arc::new(Recorder::default());
        let b: Arc<dyn Sink> = Arc::new(Recorder::default());

        assert!(ListenerHandle::owned(a.clone()).refers_to(&a));
        assert!(ListenerHandle::borrowed(&a).refers_to(&a));
        assert!(!ListenerHandle::borrowed(&a).refers_to(&b));
    }

    #[test]
    fn test_notifications_run_on_listener_context_and_prune_expired() {
        let context = DispatchContext::new();
        let recorder = Arc::new(Recorder::default());
        let kept: Arc<dyn Sink> = recorder.clone();
        let gone: Arc<dyn Sink> = Arc::new(Recorder::default());

        let mut subscribers = Subscribers::<dyn Sink>::new();
        subscribers.add(ListenerHandle::borrowed(&kept), context.create_channel());
        subscribers.add(ListenerHandle::borrowed(&gone), context.create_channel());
        drop(gone);

        subscribers.notify_all(|sink| sink.record(5));
        assert_eq!(subscribers.len(), 1);
        assert!(recorder.0.lock().unwrap().is_empty());

        drop(subscribers);
        context.run(RunPolicy::UntilWorkers);

        assert_eq!(*recorder.0.lock().unwrap(), vec![5]);
    }

    #[test]
    fn test_remove_by_identity() {
        let context = DispatchContext::new();
        let a: Arc<dyn Sink> = Arc::new(Recorder::default());
        let b: Arc<dyn Sink> = Arc::new(Recorder::default());

        let mut subscribers = Subscribers::<dyn Sink>::new();
        subscribers.add(ListenerHandle::owned(a.clone()), context.create_channel());
        subscribers.add(ListenerHandle::borrowed(&b), context.create_channel());

        assert!(subscribers.remove(&a));
        assert!(!subscribers.remove(&a));
        assert_eq!(subscribers.len(), 1);
        assert_eq!(context.channel_count(), 1);
    }

    #[test]
    fn test_has_live_ignores_expired_listeners() {
        let context = DispatchContext::new();
        let gone: Arc<dyn Sink> = Arc::new(Recorder::default());

        let mut subscribers = Subscribers::<dyn Sink>::new();
        assert!(!subscribers.has_live());

        subscribers.add(ListenerHandle::borrowed(&gone), context.create_channel());
        assert!(subscribers.has_live());

        drop(gone);
        assert!(!subscribers.has_live());
    }
}
