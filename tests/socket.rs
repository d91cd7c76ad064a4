#![cfg(target_os = "linux")]

use intercom::Error;
use intercom::component::Component;
use intercom::listener::ListenerHandle;
use intercom::net::{ServerSocket, ServerSocketListener, Socket};
use intercom::reactor::Reactor;

use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

/// Polls `condition` until it holds or two seconds have passed.
fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn loopback_server(reactor: &Arc<Reactor>) -> (ServerSocket, String) {
    let server = ServerSocket::bind(reactor, "127.0.0.1:0", None).expect("Failed to bind server");
    let address = server.local_addr().expect("Failed to read local address").to_string();
    (server, address)
}

/// Receives until `expected` bytes have arrived.
fn receive_exactly(socket: &Socket, expected: usize) -> Vec<u8> {
    let mut received = Vec::with_capacity(expected);
    while received.len() < expected {
        let chunk = socket.receive().expect("Failed to receive");
        assert!(!chunk.is_empty(), "Receive should never resolve with nothing");
        received.extend_from_slice(&chunk);
    }
    received
}

#[test]
fn test_connect_accept_and_exchange() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let client = Socket::connect(&reactor, &address).expect("Failed to connect");
    let peer = server.accept().expect("Failed to accept");

    client.send("hello").expect("Failed to send");
    assert_eq!(receive_exactly(&peer, 5), b"hello");

    peer.send(b"world".to_vec()).expect("Failed to send reply");
    assert_eq!(receive_exactly(&client, 5), b"world");

    assert_eq!(server.client_sockets().len(), 1);
    assert!(server.remove_client(&peer));
    assert!(!server.remove_client(&peer));
}

#[test]
fn test_large_payload_arrives_complete_and_in_order() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let client = Socket::connect(&reactor, &address).expect("Failed to connect");
    let peer = server.accept().expect("Failed to accept");

    let payload: Vec<u8> = (0..16 * 1024).map(|i| (i % 251) as u8).collect();
    let sent = client.send_async(payload.clone());

    let received = receive_exactly(&peer, payload.len());
    sent.wait().expect("Send should complete");

    assert_eq!(received, payload);
}

#[test]
fn test_pending_receives_resolve_in_request_order() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let client = Socket::connect(&reactor, &address).expect("Failed to connect");
    let peer = server.accept().expect("Failed to accept");

    let first = peer.receive_async();
    let second = peer.receive_async();

    client.send("one").expect("Failed to send");
    assert_eq!(first.wait().expect("First receive failed"), b"one");

    client.send("two").expect("Failed to send");
    assert_eq!(second.wait().expect("Second receive failed"), b"two");
}

#[test]
fn test_peer_close_ends_the_stream() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let client = Socket::connect(&reactor, &address).expect("Failed to connect");
    let peer = server.accept().expect("Failed to accept");

    let pending = peer.receive_async();
    drop(client);

    match pending.wait() {
        Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
        other => panic!("Expected end of stream, got {other:?}"),
    }

    assert!(peer.is_closed_by_peer());
    assert!(matches!(peer.receive(), Err(Error::Io(_))));
}

#[test]
fn test_empty_send_completes_immediately() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let client = Socket::connect(&reactor, &address).expect("Failed to connect");
    let _peer = server.accept().expect("Failed to accept");

    let mut sent = client.send_async(Vec::new());
    assert!(sent.is_ready());
    assert!(matches!(sent.try_take(), Some(Ok(()))));
}

#[test]
fn test_connections_are_handed_out_in_arrival_order() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let early = Socket::connect(&reactor, &address).expect("Failed to connect");
    let pending = server.accept_async();
    let late = Socket::connect(&reactor, &address).expect("Failed to connect");

    let first = pending.wait().expect("Failed to accept first connection");
    let second = server.accept().expect("Failed to accept second connection");

    early.send("early").expect("Failed to send");
    late.send("late").expect("Failed to send");

    assert_eq!(receive_exactly(&first, 5), b"early");
    assert_eq!(receive_exactly(&second, 4), b"late");
}

struct Announcer {
    tx: Mutex<mpsc::Sender<String>>,
}

impl ServerSocketListener for Announcer {
    fn on_new_client(&self, socket: Arc<Socket>) {
        let address = socket
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        let _ = self.tx.lock().unwrap().send(address);
    }
}

#[test]
fn test_listeners_hear_about_new_clients() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let component = Component::spawn().expect("Failed to spawn component");
    let (server, address) = loopback_server(&reactor);

    let (tx, rx) = mpsc::channel();
    let listener: Arc<dyn ServerSocketListener> = Arc::new(Announcer { tx: Mutex::new(tx) });
    server.add_listener(ListenerHandle::borrowed(&listener), component.channel().unwrap());

    let _client = Socket::connect(&reactor, &address).expect("Failed to connect");

    let announced = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("Listener was not notified");
    assert_eq!(announced, address);

    assert!(server.remove_listener(&listener));

    component.exit();
    component.join();
}

#[test]
fn test_blocking_calls_are_refused_on_reactor_thread() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let client = Arc::new(Socket::connect(&reactor, &address).expect("Failed to connect"));
    let peer = server.accept().expect("Failed to accept");

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let reader = client.clone();
    let callback = intercom::reactor::ReadinessCallback::new(move |_| {
        let refused = matches!(reader.receive(), Err(Error::StateAssertion { .. }));
        let _ = tx.lock().unwrap().send(refused);
    });

    // The client is writable right away, which runs the callback on the reactor thread.
    reactor
        .register(client.handle(), intercom::reactor::EventType::Write, &callback)
        .expect("Failed to register callback");

    assert!(rx.recv_timeout(Duration::from_secs(2)).expect("Callback did not run"));

    reactor
        .unregister(client.handle(), intercom::reactor::EventType::Write, &callback)
        .expect("Failed to unregister callback");
    drop(peer);
}

#[test]
fn test_bind_rejects_bad_addresses() {
    let reactor = Reactor::new().expect("Failed to create reactor");

    let result = ServerSocket::bind(&reactor, "not an address", None);
    assert!(matches!(result, Err(Error::ConstructionFailure { .. })));

    let result = Socket::connect(&reactor, "127.0.0.1");
    assert!(matches!(result, Err(Error::ConstructionFailure { .. })));
}

#[test]
fn test_connect_to_closed_port_fails() {
    let reactor = Reactor::new().expect("Failed to create reactor");

    let address = {
        let (server, address) = loopback_server(&reactor);
        drop(server);
        address
    };

    // Give the reactor a moment to close the released listening handle.
    thread::sleep(Duration::from_millis(50));

    let result = Socket::connect(&reactor, &address);
    assert!(matches!(result, Err(Error::ConstructionFailure { .. })));
}

#[test]
fn test_dropped_accepted_socket_is_closed() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let mut client = TcpStream::connect(&address).expect("Failed to connect");
    let accepted = server.accept().expect("Failed to accept");
    assert_eq!(server.client_sockets().len(), 1);

    drop(accepted);

    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("Failed to set timeout");
    let mut buffer = [0u8; 1];
    let n = client.read(&mut buffer).expect("Server side should close, not hang");
    assert_eq!(n, 0);

    assert!(server.client_sockets().is_empty(), "Dropped clients should not be kept");
}

#[test]
fn test_connections_wait_in_backlog_without_takers() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let clients: Vec<_> = (0..5)
        .map(|_| TcpStream::connect(&address).expect("Failed to connect"))
        .collect();

    thread::sleep(Duration::from_millis(50));
    assert!(server.client_sockets().is_empty(), "Nothing should be accepted without a taker");
    assert_eq!(reactor.registered_handles(), 0, "Idle server should not be watched");

    let first = server.accept().expect("Failed to accept");
    assert_eq!(
        first.local_addr().expect("Failed to read address").to_string(),
        address
    );

    assert!(
        eventually(|| reactor.registered_handles() == 0),
        "Server should stop watching once the request is served"
    );
    assert_eq!(server.client_sockets().len(), 1);

    drop(clients);
}

#[test]
fn test_send_errors_fail_each_queued_request() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let client = Socket::connect(&reactor, &address).expect("Failed to connect");
    let peer = server.accept().expect("Failed to accept");
    drop(peer);
    thread::sleep(Duration::from_millis(50));

    // Lands in the send buffer; the closed peer answers with a reset.
    client.send("x").expect("First send after close is still accepted");
    thread::sleep(Duration::from_millis(100));

    let first = client.send_async("first");
    let second = client.send_async("second");

    for (name, outcome) in [("first", first.wait()), ("second", second.wait())] {
        match outcome {
            Err(Error::Io(e)) => assert!(
                matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset),
                "{name} send failed with unexpected {e:?}"
            ),
            other => panic!("{name} send should fail, got {other:?}"),
        }
    }
}

#[test]
fn test_dropping_socket_breaks_pending_receive() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let _client = Socket::connect(&reactor, &address).expect("Failed to connect");
    let peer = server.accept().expect("Failed to accept");

    let pending = peer.receive_async();
    drop(peer);

    assert!(matches!(pending.wait(), Err(Error::BrokenPromise)));
}

#[test]
fn test_single_receive_assembles_many_read_buffers() {
    let reactor = Reactor::new().expect("Failed to create reactor");
    let (server, address) = loopback_server(&reactor);

    let client = Socket::connect(&reactor, &address).expect("Failed to connect");
    let peer = server.accept().expect("Failed to accept");

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 253) as u8).collect();
    assert!(payload.len() > reactor.read_buffer_size());

    client.send(payload.clone()).expect("Failed to send");
    thread::sleep(Duration::from_millis(50));

    let received = peer.receive_async().wait().expect("Failed to receive");
    assert_eq!(received.len(), payload.len());
    assert_eq!(received, payload);
}
