use crate::error::{Error, Result};
use crate::reactor::poller::platform::{
    sys_close, sys_connect, sys_domain, sys_parse_addr, sys_recv, sys_send, sys_set_nonblocking,
    sys_socket, sys_sockname,
};
use crate::reactor::{EventType, Handle, ReadinessCallback, Reactor};
use crate::sync::{Completion, Promise, promise};

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, trace};

/// Pending requests and buffers of one socket.
struct Io {
    /// Buffers waiting to be sent, oldest first.
    outbound: VecDeque<(Vec<u8>, Promise<()>)>,

    /// Bytes of the front outbound buffer already sent.
    sent: usize,

    /// Receive requests, oldest first.
    inbound: VecDeque<Promise<Vec<u8>>>,

    /// Bytes received but not yet handed to a request.
    accumulator: Vec<u8>,

    /// Set once the peer has shut the stream down.
    eof: bool,

    /// Whether the READ callback is currently registered.
    reading: bool,

    /// Whether the WRITE callback is currently registered.
    writing: bool,
}

struct SocketState {
    handle: Handle,
    reactor: Arc<Reactor>,
    read_callback: ReadinessCallback,
    write_callback: ReadinessCallback,
    io: Mutex<Io>,
}

impl SocketState {
    fn new(reactor: &Arc<Reactor>, handle: Handle) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<SocketState>| {
            let reader = weak.clone();
            let writer = weak.clone();

            Self {
                handle,
                reactor: reactor.clone(),
                read_callback: ReadinessCallback::new(move |_| {
                    if let Some(state) = reader.upgrade() {
                        state.on_readable();
                    }
                }),
                write_callback: ReadinessCallback::new(move |_| {
                    if let Some(state) = writer.upgrade() {
                        state.on_writable();
                    }
                }),
                io: Mutex::new(Io {
                    outbound: VecDeque::new(),
                    sent: 0,
                    inbound: VecDeque::new(),
                    accumulator: Vec::new(),
                    eof: false,
                    reading: false,
                    writing: false,
                }),
            }
        })
    }

    /// Flushes as much of the outbound queue as the OS accepts.
    ///
    /// Runs on the reactor thread.
    fn on_writable(&self) {
        let mut guard = self.io.lock().unwrap();
        let io = &mut *guard;

        while let Some((data, _)) = io.outbound.front() {
            let n = sys_send(self.handle.raw(), &data[io.sent..]);

            if n >= 0 {
                io.sent += n as usize;

                if io.sent >= data.len() {
                    io.sent = 0;
                    if let Some((_, promise)) = io.outbound.pop_front() {
                        promise.fulfill(());
                    }
                }
                continue;
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => break,
                io::ErrorKind::Interrupted => continue,
                _ => {
                    error!(socket = %self.handle, error = %err, "send failed");
                    io.sent = 0;
                    if let Some((_, promise)) = io.outbound.pop_front() {
                        promise.fail(Error::Io(err));
                    }
                }
            }
        }

        if io.outbound.is_empty() && io.writing {
            io.writing = false;
            let _ = self
                .reactor
                .unregister(self.handle, EventType::Write, &self.write_callback);
        }
    }

    /// Drains the socket and completes the oldest receive request.
    ///
    /// Runs on the reactor thread.
    fn on_readable(&self) {
        let mut guard = self.io.lock().unwrap();
        let io = &mut *guard;

        if !io.inbound.is_empty() {
            let mut buffer = vec![0u8; self.reactor.read_buffer_size()];
            let mut failure = None;

            loop {
                let n = sys_recv(self.handle.raw(), &mut buffer);

                if n > 0 {
                    io.accumulator.extend_from_slice(&buffer[..n as usize]);
                    continue;
                }

                if n == 0 {
                    debug!(socket = %self.handle, "peer closed the stream");
                    io.eof = true;
                    break;
                }

                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted => continue,
                    _ => {
                        error!(socket = %self.handle, error = %err, "receive failed");
                        failure = Some(err);
                        break;
                    }
                }
            }

            io.settle_receives(failure);
        }

        if (io.inbound.is_empty() || io.eof) && io.reading {
            io.reading = false;
            let _ = self
                .reactor
                .unregister(self.handle, EventType::Read, &self.read_callback);
        }
    }
}

impl Io {
    /// Resolves receive requests after a drain.
    ///
    /// Bytes read before a failure go to the oldest request and the failure
    /// to the next one. At end of stream every remaining request fails.
    fn settle_receives(&mut self, failure: Option<io::Error>) {
        if !self.accumulator.is_empty() {
            if let Some(promise) = self.inbound.pop_front() {
                trace!(bytes = self.accumulator.len(), "receive completed");
                promise.fulfill(mem::take(&mut self.accumulator));
            }
        }

        if let Some(err) = failure {
            if let Some(promise) = self.inbound.pop_front() {
                promise.fail(Error::Io(err));
            }
        }

        if self.eof {
            for promise in self.inbound.drain(..) {
                promise.fail(end_of_stream());
            }
        }
    }
}

fn end_of_stream() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "peer closed the connection",
    ))
}

/// A connected, non-blocking stream socket driven by a [`Reactor`].
///
/// [`send_async`](Self::send_async) and
/// [`receive_async`](Self::receive_async) queue a request and return a
/// [`Completion`]; the reactor thread performs the I/O when the socket is
/// ready. Completions of one socket resolve in the order their requests
/// were made. I/O errors are reported only through the completion of the
/// request that failed.
///
/// Bytes are relayed verbatim: a receive resolves with whatever arrived,
/// which may be part of one send or several sends glued together.
///
/// The socket watches the reactor only while requests are pending.
/// Dropping it fails outstanding requests with
/// [`Error::BrokenPromise`] and closes the handle once the reactor has
/// forgotten it.
pub struct Socket {
    state: Arc<SocketState>,
}

impl Socket {
    /// Connects to `address` (for example `"127.0.0.1:8080"`), blocking
    /// until the connection is established.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionFailure`] if the address is invalid or
    /// the connection could not be made.
    pub fn connect(reactor: &Arc<Reactor>, address: &str) -> Result<Self> {
        let addr = sys_parse_addr(address).map_err(|e| Error::construction("socket", e))?;

        let fd = sys_socket(sys_domain(&addr)).map_err(|e| Error::construction("socket", e))?;

        if let Err(e) = sys_connect(fd, &addr).and_then(|_| sys_set_nonblocking(fd)) {
            sys_close(fd);
            return Err(Error::construction("socket connection", e));
        }

        debug!(socket = fd, %addr, "socket connected");

        Self::from_handle(reactor, Handle::from_raw(fd))
    }

    /// Wraps an already connected socket handle.
    ///
    /// The socket takes ownership of the handle, closing it on failure, and
    /// switches it to non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandle`] for [`Handle::INVALID`], or
    /// [`Error::Io`] if the handle could not be made non-blocking.
    pub fn from_handle(reactor: &Arc<Reactor>, handle: Handle) -> Result<Self> {
        if !handle.is_valid() {
            return Err(Error::InvalidHandle(handle.raw()));
        }

        if let Err(e) = sys_set_nonblocking(handle.raw()) {
            sys_close(handle.raw());
            return Err(e.into());
        }

        Ok(Self {
            state: SocketState::new(reactor, handle),
        })
    }

    /// Queues `data` to be sent.
    ///
    /// The completion resolves once every byte has been handed to the OS,
    /// or with the error that stopped it.
    pub fn send_async(&self, data: impl Into<Vec<u8>>) -> Completion<()> {
        let data = data.into();
        let (promise, completion) = promise();

        if data.is_empty() {
            promise.fulfill(());
            return completion;
        }

        let mut io = self.state.io.lock().unwrap();
        io.outbound.push_back((data, promise));

        if !io.writing {
            match self.state.reactor.register(
                self.state.handle,
                EventType::Write,
                &self.state.write_callback,
            ) {
                Ok(()) => io.writing = true,
                Err(e) => {
                    if let Some((_, promise)) = io.outbound.pop_back() {
                        promise.fail(e);
                    }
                }
            }
        }

        completion
    }

    /// Queues a receive request.
    ///
    /// The completion resolves with the bytes available when the socket
    /// was next drained. Once the peer has closed the stream, the oldest
    /// request gets the remaining bytes and the others fail with
    /// [`io::ErrorKind::UnexpectedEof`].
    pub fn receive_async(&self) -> Completion<Vec<u8>> {
        let (promise, completion) = promise();
        let mut io = self.state.io.lock().unwrap();

        if io.eof {
            if io.accumulator.is_empty() {
                promise.fail(end_of_stream());
            } else {
                promise.fulfill(mem::take(&mut io.accumulator));
            }
            return completion;
        }

        io.inbound.push_back(promise);

        if !io.reading {
            match self.state.reactor.register(
                self.state.handle,
                EventType::Read,
                &self.state.read_callback,
            ) {
                Ok(()) => io.reading = true,
                Err(e) => {
                    if let Some(promise) = io.inbound.pop_back() {
                        promise.fail(e);
                    }
                }
            }
        }

        completion
    }

    /// Sends `data`, blocking until it has all been handed to the OS.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the send, or [`Error::StateAssertion`] when
    /// called from the reactor thread, where waiting would deadlock.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.ensure_can_block()?;
        self.send_async(data).wait()
    }

    /// Receives the next chunk of bytes, blocking until it arrives.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the receive, or [`Error::StateAssertion`]
    /// when called from the reactor thread.
    pub fn receive(&self) -> Result<Vec<u8>> {
        self.ensure_can_block()?;
        self.receive_async().wait()
    }

    fn ensure_can_block(&self) -> Result<()> {
        if self.state.reactor.is_current_thread() {
            Err(Error::state(
                format!("socket {}", self.state.handle),
                "blocking call on the reactor thread",
            ))
        } else {
            Ok(())
        }
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(sys_sockname(self.state.handle.raw())?)
    }

    pub fn handle(&self) -> Handle {
        self.state.handle
    }

    /// Returns `true` once the peer has closed the stream.
    pub fn is_closed_by_peer(&self) -> bool {
        self.state.io.lock().unwrap().eof
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let state = &self.state;

        let (outbound, inbound) = {
            let mut io = state.io.lock().unwrap();
            io.reading = false;
            io.writing = false;
            (mem::take(&mut io.outbound), mem::take(&mut io.inbound))
        };

        // Dropping the promises breaks the pending completions.
        drop(outbound);
        drop(inbound);

        let _ = state
            .reactor
            .unregister(state.handle, EventType::Read, &state.read_callback);
        let _ = state
            .reactor
            .unregister(state.handle, EventType::Write, &state.write_callback);
        state.reactor.release(state.handle);

        trace!(socket = %state.handle, "socket dropped");
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("handle", &self.state.handle)
            .finish()
    }
}
