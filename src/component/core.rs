use crate::dispatch::{Channel, ContextState, DispatchContext, RunPolicy};
use crate::error::{Error, Result};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

/// Hook run on the parent after one of its children has exited.
type ChildExitHook = Arc<dyn Fn(&Component) + Send + Sync>;

/// Shared state behind every [`Component`] handle.
struct Node {
    id: u64,

    /// Channel to the context this component runs on. Taken on exit.
    channel: Mutex<Option<Channel>>,

    /// Context owned by this component, if it created its own.
    context: Mutex<Option<Arc<DispatchContext>>>,

    /// Thread driving the owned context, for [`Component::spawn`].
    worker: Mutex<Option<JoinHandle<()>>>,

    /// Strong link upward: a parent outlives its children.
    parent: Option<Arc<Node>>,

    /// Weak links downward. Mutated only from the owning context's loop.
    children: Mutex<Vec<Weak<Node>>>,

    child_exit_hook: Mutex<Option<ChildExitHook>>,

    exited: AtomicBool,
}

impl Node {
    fn new(
        channel: Channel,
        context: Option<Arc<DispatchContext>>,
        parent: Option<Arc<Node>>,
    ) -> Arc<Self> {
        let node = Arc::new(Self {
            id: NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed),
            channel: Mutex::new(Some(channel)),
            context: Mutex::new(context),
            worker: Mutex::new(None),
            parent,
            children: Mutex::new(Vec::new()),
            child_exit_hook: Mutex::new(None),
            exited: AtomicBool::new(false),
        });

        trace!(component = node.id, "component created");
        node
    }

    /// Context reached through this node's channel, if it still has one.
    ///
    /// The lock is released before the caller uses the context, so actions
    /// submitted through it may freely touch this node again.
    fn target(&self) -> Option<Arc<DispatchContext>> {
        self.channel
            .lock()
            .unwrap()
            .as_ref()
            .map(|channel| channel.context().clone())
    }

    /// Runs `action` on this node's context, or right away when that
    /// context can no longer execute anything.
    fn invoke<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.target() {
            Some(context) if context.state() != ContextState::Stopped => context.invoke(action),
            _ => action(),
        }
    }

    /// Body of [`Component::exit`], run on the owning context.
    fn shutdown(self: &Arc<Self>) {
        if self.exited.swap(true, Ordering::AcqRel) {
            return;
        }

        let children: Vec<Arc<Node>> = self
            .children
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        debug!(component = self.id, children = children.len(), "component exiting");

        // Children share this node's context, so their exit runs inline and
        // has completed when `exit` returns.
        for child in children {
            Component { node: child }.exit();
        }

        drop(self.channel.lock().unwrap().take());

        if let Some(context) = self.context.lock().unwrap().take() {
            context.stop();
        }

        if let Some(parent) = &self.parent {
            let parent_node = parent.clone();
            let child = self.clone();
            parent.invoke(move || parent_node.remove_child(&child));
        }

        debug!(component = self.id, "component exited");
    }

    fn add_child(&self, child: Weak<Node>) {
        self.children.lock().unwrap().push(child);
    }

    fn remove_child(&self, child: &Arc<Node>) {
        self.children
            .lock()
            .unwrap()
            .retain(|weak| weak.upgrade().is_some_and(|c| !Arc::ptr_eq(&c, child)));

        trace!(component = self.id, child = child.id, "child removed");

        let hook = self.child_exit_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(&Component {
                node: child.clone(),
            });
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(context) = self.context.get_mut().unwrap().take() {
            context.stop();
        }
    }
}

/// A node in a tree of cooperating objects that share dispatch contexts.
///
/// A component submits work to its context through a [`Channel`]. It
/// either owns a private context or runs on one supplied by someone else.
/// Children created with [`child_of`](Self::child_of) run on their parent's
/// context.
///
/// [`exit`](Self::exit) tears a subtree down: children exit first, then the
/// component releases its channel and stops its own context, then it is
/// removed from its parent.
///
/// `Component` is a cheap handle: clones refer to the same node.
///
/// # Examples
///
/// ```rust,ignore
/// let parent = Component::spawn()?;
/// let child = Component::child_of(&parent)?;
///
/// child.push(|| println!("runs on the parent's worker thread"));
///
/// parent.exit();
/// parent.join();
/// ```
#[derive(Clone)]
pub struct Component {
    node: Arc<Node>,
}

impl Component {
    /// Creates a component with its own private context.
    ///
    /// The context is not driven until [`exec`](Self::exec) is called.
    pub fn new() -> Self {
        let context = DispatchContext::new();
        let channel = context.create_channel();

        Self {
            node: Node::new(channel, Some(context), None),
        }
    }

    /// Creates a component with its own context, driven by a dedicated
    /// worker thread.
    ///
    /// The worker ends once the component exits; [`join`](Self::join)
    /// waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionFailure`] if the thread could not be
    /// spawned.
    pub fn spawn() -> Result<Self> {
        let component = Self::new();
        let Some(context) = component.node.context.lock().unwrap().clone() else {
            return Err(Error::state(component.describe(), "component has no context"));
        };

        let handle = thread::Builder::new()
            .name(format!("intercom-component-{}", component.id()))
            .spawn(move || context.run(RunPolicy::Forever))
            .map_err(|e| Error::construction("component worker", e))?;

        *component.node.worker.lock().unwrap() = Some(handle);
        Ok(component)
    }

    /// Creates a component that runs on an existing context.
    pub fn with_context(context: &Arc<DispatchContext>) -> Self {
        Self::with_channel(context.create_channel())
    }

    /// Creates a component that submits through an existing channel.
    pub fn with_channel(channel: Channel) -> Self {
        Self {
            node: Node::new(channel, None, None),
        }
    }

    /// Creates a child of `parent`, running on the parent's context.
    ///
    /// The child is attached to the parent on the parent's context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateAssertion`] if `parent` has already exited.
    pub fn child_of(parent: &Component) -> Result<Self> {
        let channel = match parent.node.channel.lock().unwrap().as_ref() {
            Some(channel) if !parent.is_exited() => channel.clone(),
            _ => {
                return Err(Error::state(parent.describe(), "parent has already exited"));
            }
        };

        let node = Node::new(channel, None, Some(parent.node.clone()));

        let parent_node = parent.node.clone();
        let child = Arc::downgrade(&node);
        parent.node.invoke(move || parent_node.add_child(child));

        Ok(Self { node })
    }

    /// Enqueues an action on the component's context.
    ///
    /// Does nothing once the component has exited.
    pub fn push<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.node.target() {
            Some(context) => context.push(action),
            None => trace!(component = self.id(), "push on exited component ignored"),
        }
    }

    /// Runs the action inline when called from the component's context
    /// thread, otherwise enqueues it.
    ///
    /// Does nothing once the component has exited.
    pub fn invoke<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.node.target() {
            Some(context) => context.invoke(action),
            None => trace!(component = self.id(), "invoke on exited component ignored"),
        }
    }

    /// Drives the component's private context on the calling thread until
    /// the component exits.
    ///
    /// Returns immediately if the component has no private context, or if
    /// that context is already being driven.
    pub fn exec(&self) {
        let context = self.node.context.lock().unwrap().clone();
        if let Some(context) = context {
            context.run(RunPolicy::Forever);
        }
    }

    /// Exits the component and, first, all of its children.
    ///
    /// The teardown runs on the component's context: inline when called
    /// from that context, later otherwise. A second call is a no-op.
    pub fn exit(&self) {
        let node = self.node.clone();
        self.node.invoke(move || node.shutdown());
    }

    /// Waits for the worker thread started by [`spawn`](Self::spawn).
    ///
    /// Returns immediately for components without a worker, or when called
    /// from the worker itself.
    pub fn join(&self) {
        let handle = {
            let mut worker = self.node.worker.lock().unwrap();
            match worker.as_ref() {
                Some(h) if h.thread().id() != thread::current().id() => worker.take(),
                _ => None,
            }
        };

        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(component = self.id(), "component worker panicked");
            }
        }
    }

    /// Installs the hook run on this component after a child has exited
    /// and been detached. The hook runs on this component's context.
    pub fn on_child_exit<F>(&self, hook: F)
    where
        F: Fn(&Component) + Send + Sync + 'static,
    {
        *self.node.child_exit_hook.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Returns `true` once [`exit`](Self::exit) has run.
    pub fn is_exited(&self) -> bool {
        self.node.exited.load(Ordering::Acquire)
    }

    /// Process-unique identifier of the component.
    pub fn id(&self) -> u64 {
        self.node.id
    }

    /// A new channel to the component's context, or `None` after exit.
    pub fn channel(&self) -> Option<Channel> {
        self.node.channel.lock().unwrap().clone()
    }

    /// The component's context, or `None` after exit.
    pub fn context(&self) -> Option<Arc<DispatchContext>> {
        self.node.target()
    }

    /// The parent, for components created with [`child_of`](Self::child_of).
    pub fn parent(&self) -> Option<Component> {
        self.node
            .parent
            .as_ref()
            .map(|node| Component { node: node.clone() })
    }

    /// Number of attached children that are still alive.
    pub fn child_count(&self) -> usize {
        self.node
            .children
            .lock()
            .unwrap()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn describe(&self) -> String {
        format!("component {}", self.id())
    }
}

impl Default for Component {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl Eq for Component {}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id())
            .field("exited", &self.is_exited())
            .field("children", &self.child_count())
            .finish()
    }
}
