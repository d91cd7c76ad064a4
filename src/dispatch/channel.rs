use super::context::DispatchContext;

use std::fmt;
use std::sync::Arc;

/// A submission handle to a [`DispatchContext`].
///
/// Every channel counts as one live worker of its context: a context run
/// with [`RunPolicy::UntilWorkers`](super::RunPolicy::UntilWorkers) keeps
/// going until all of its channels are dropped. Cloning a channel creates
/// a new live channel.
pub struct Channel {
    context: Arc<DispatchContext>,
}

impl Channel {
    pub(crate) fn new(context: Arc<DispatchContext>) -> Self {
        context.acquire_channel();
        Self { context }
    }

    /// Enqueues an action on the target context.
    ///
    /// See [`DispatchContext::push`].
    pub fn push<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.context.push(action);
    }

    /// Runs the action inline if called from the context's loop thread,
    /// otherwise enqueues it.
    ///
    /// See [`DispatchContext::invoke`].
    pub fn invoke<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.context.invoke(action);
    }

    /// The context this channel submits into.
    pub fn context(&self) -> &Arc<DispatchContext> {
        &self.context
    }
}

impl Clone for Channel {
    fn clone(&self) -> Self {
        Self::new(self.context.clone())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.context.release_channel();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("context", &self.context.id())
            .finish()
    }
}
