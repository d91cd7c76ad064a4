use super::socket::Socket;
use crate::dispatch::Channel;
use crate::error::{Error, Result};
use crate::listener::{ListenerHandle, Subscribers};
use crate::reactor::poller::platform::{
    sys_accept, sys_bind, sys_close, sys_domain, sys_ipv6_is_necessary, sys_listen,
    sys_parse_addr, sys_set_nonblocking, sys_set_reuseaddr, sys_socket, sys_sockname,
    socketaddr_to_storage,
};
use crate::reactor::{EventType, Handle, ReadinessCallback, Reactor};
use crate::sync::{Completion, Promise, promise};

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, warn};

/// Receives connections accepted by a [`ServerSocket`] on the listener's
/// own context.
pub trait ServerSocketListener: Send + Sync {
    fn on_new_client(&self, socket: Arc<Socket>);
}

struct Inner {
    /// Accept requests, oldest first.
    accepts: VecDeque<Promise<Arc<Socket>>>,

    /// Accepted connections. Dropped sockets are pruned lazily.
    clients: Vec<Weak<Socket>>,

    listeners: Subscribers<dyn ServerSocketListener>,

    /// Whether the READ callback is currently registered.
    accepting: bool,
}

impl Inner {
    /// Returns `true` while someone is waiting for a connection.
    fn wants_connections(&self) -> bool {
        !self.accepts.is_empty() || self.listeners.has_live()
    }

    fn prune_clients(&mut self) {
        self.clients.retain(|client| client.strong_count() > 0);
    }
}

struct ServerState {
    handle: Handle,
    reactor: Arc<Reactor>,
    callback: ReadinessCallback,
    inner: Mutex<Inner>,
}

impl ServerState {
    /// Accepts pending connections while a request or a listener is
    /// waiting for them. Runs on the reactor thread.
    fn on_readable(&self) {
        let mut inner = self.inner.lock().unwrap();

        while inner.wants_connections() {
            let (fd, peer) = match sys_accept(self.handle.raw()) {
                Ok(accepted) => accepted,
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted => continue,
                    _ => {
                        // The handle stays readable, so stop watching it
                        // until the next accept request.
                        error!(server = %self.handle, error = %e, "accept failed");
                        if let Some(promise) = inner.accepts.pop_front() {
                            promise.fail(Error::Io(e));
                        }
                        self.stop_accepting(&mut inner);
                        return;
                    }
                },
            };

            let socket = match Socket::from_handle(&self.reactor, Handle::from_raw(fd)) {
                Ok(socket) => Arc::new(socket),
                Err(e) => {
                    warn!(server = %self.handle, error = %e, "dropping accepted connection");
                    continue;
                }
            };

            debug!(server = %self.handle, client = fd, %peer, "connection accepted");

            inner.prune_clients();
            inner.clients.push(Arc::downgrade(&socket));

            if let Some(promise) = inner.accepts.pop_front() {
                promise.fulfill(socket.clone());
            }

            inner
                .listeners
                .notify_all(move |listener| listener.on_new_client(socket.clone()));
        }

        self.update_interest(&mut inner);
    }

    /// Watches the listening handle only while connections are wanted.
    ///
    /// Connections arriving in between wait in the kernel backlog.
    fn update_interest(&self, inner: &mut Inner) {
        if !inner.wants_connections() {
            self.stop_accepting(inner);
            return;
        }

        if inner.accepting {
            return;
        }

        match self
            .reactor
            .register(self.handle, EventType::Read, &self.callback)
        {
            Ok(()) => inner.accepting = true,
            Err(e) => {
                warn!(server = %self.handle, error = %e, "cannot watch server socket");
                for promise in inner.accepts.drain(..) {
                    promise.fail(Error::state(
                        format!("server socket {}", self.handle),
                        "reactor refused the registration",
                    ));
                }
            }
        }
    }

    fn stop_accepting(&self, inner: &mut Inner) {
        if inner.accepting {
            inner.accepting = false;
            let _ = self
                .reactor
                .unregister(self.handle, EventType::Read, &self.callback);
        }
    }
}

/// A listening stream socket driven by a [`Reactor`].
///
/// The listening handle is watched only while an accept request or a
/// [`ServerSocketListener`] is waiting. Each accepted connection is wrapped
/// in a [`Socket`], handed to the oldest pending accept request and pushed
/// to every listener. The server itself only keeps a weak reference, so a
/// connection closes as soon as its last owner drops it.
///
/// # Examples
///
/// ```rust,ignore
/// let server = ServerSocket::bind(&reactor, "127.0.0.1:0", None)?;
/// let client = server.accept()?;
/// let request = client.receive()?;
/// ```
pub struct ServerSocket {
    state: Arc<ServerState>,
}

impl ServerSocket {
    /// Binds and listens on `address` (for example `"0.0.0.0:8080"`).
    ///
    /// `backlog` defaults to the reactor's configured listen backlog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionFailure`] if the address is invalid or
    /// any step of creating the listening socket fails.
    pub fn bind(reactor: &Arc<Reactor>, address: &str, backlog: Option<i32>) -> Result<Self> {
        let addr = sys_parse_addr(address).map_err(|e| Error::construction("server socket", e))?;
        let backlog = backlog.unwrap_or_else(|| reactor.listen_backlog());

        let fd = listening_socket(&addr, backlog)
            .map_err(|e| Error::construction("server socket", e))?;
        let handle = Handle::from_raw(fd);

        let state = Arc::new_cyclic(|weak: &Weak<ServerState>| {
            let weak = weak.clone();

            ServerState {
                handle,
                reactor: reactor.clone(),
                callback: ReadinessCallback::new(move |_| {
                    if let Some(state) = weak.upgrade() {
                        state.on_readable();
                    }
                }),
                inner: Mutex::new(Inner {
                    accepts: VecDeque::new(),
                    clients: Vec::new(),
                    listeners: Subscribers::new(),
                    accepting: false,
                }),
            }
        });

        debug!(server = %handle, %addr, backlog, "server socket listening");

        Ok(Self { state })
    }

    /// Requests the next accepted connection.
    ///
    /// The completion fails with the accept error if accepting fails; the
    /// next request retries.
    pub fn accept_async(&self) -> Completion<Arc<Socket>> {
        let (promise, completion) = promise();
        let mut inner = self.state.inner.lock().unwrap();

        inner.accepts.push_back(promise);
        self.state.update_interest(&mut inner);

        completion
    }

    /// Waits for the next accepted connection.
    ///
    /// # Errors
    ///
    /// Returns the accept error, or [`Error::StateAssertion`] when called
    /// from the reactor thread.
    pub fn accept(&self) -> Result<Arc<Socket>> {
        if self.state.reactor.is_current_thread() {
            return Err(Error::state(
                format!("server socket {}", self.state.handle),
                "blocking call on the reactor thread",
            ));
        }

        self.accept_async().wait()
    }

    /// Accepted connections that are still open somewhere.
    pub fn client_sockets(&self) -> Vec<Arc<Socket>> {
        let mut inner = self.state.inner.lock().unwrap();
        inner.prune_clients();

        inner.clients.iter().filter_map(Weak::upgrade).collect()
    }

    /// Forgets a client. Returns whether it was known.
    pub fn remove_client(&self, socket: &Arc<Socket>) -> bool {
        let mut inner = self.state.inner.lock().unwrap();
        let before = inner.clients.len();

        inner
            .clients
            .retain(|client| !std::ptr::eq(client.as_ptr(), Arc::as_ptr(socket)));

        before != inner.clients.len()
    }

    /// Registers a listener notified of every new connection through
    /// `channel`.
    ///
    /// While a listener is alive the server accepts connections without
    /// waiting for accept requests.
    pub fn add_listener(&self, listener: ListenerHandle<dyn ServerSocketListener>, channel: Channel) {
        let mut inner = self.state.inner.lock().unwrap();

        inner.listeners.add(listener, channel);
        self.state.update_interest(&mut inner);
    }

    /// Removes every registration of `listener`. Returns whether one was found.
    pub fn remove_listener(&self, listener: &Arc<dyn ServerSocketListener>) -> bool {
        let mut inner = self.state.inner.lock().unwrap();

        let removed = inner.listeners.remove(listener);
        self.state.update_interest(&mut inner);

        removed
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(sys_sockname(self.state.handle.raw())?)
    }

    pub fn handle(&self) -> Handle {
        self.state.handle
    }
}

/// Creates a non-blocking socket listening on `addr`.
fn listening_socket(addr: &SocketAddr, backlog: i32) -> io::Result<RawFd> {
    let domain = sys_domain(addr);
    let fd = sys_socket(domain)?;

    let (storage, len) = socketaddr_to_storage(addr);

    let configured = sys_set_reuseaddr(fd)
        .and_then(|_| sys_ipv6_is_necessary(fd, domain))
        .and_then(|_| sys_bind(fd, &storage, len))
        .and_then(|_| sys_listen(fd, backlog))
        .and_then(|_| sys_set_nonblocking(fd));

    if let Err(e) = configured {
        sys_close(fd);
        return Err(e);
    }

    Ok(fd)
}

impl Drop for ServerSocket {
    fn drop(&mut self) {
        let state = &self.state;

        let _ = state
            .reactor
            .unregister(state.handle, EventType::Read, &state.callback);
        state.reactor.release(state.handle);

        let mut inner = state.inner.lock().unwrap();
        inner.accepting = false;
        inner.accepts.clear();
        inner.clients.clear();
    }
}

impl fmt::Debug for ServerSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSocket")
            .field("handle", &self.state.handle)
            .finish()
    }
}
