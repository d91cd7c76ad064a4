//! Example: Echo server on top of the reactor

use intercom::dispatch::ThreadPool;
use intercom::net::{ServerSocket, Socket};
use intercom::reactor::Reactor;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> intercom::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let reactor = Reactor::default_instance()?;
    let pool = ThreadPool::new(4)?;

    // Bind the echo server to localhost:9000
    let server = ServerSocket::bind(&reactor, "127.0.0.1:9000", None)?;
    info!(addr = %server.local_addr()?, "echo server listening");

    loop {
        let client = server.accept()?;
        info!(client = %client.handle(), "accepted connection");

        // Blocking receives must stay off the reactor thread
        pool.push(move || handle_client(client))?;
    }
}

// Reads data and writes it back until the peer goes away
fn handle_client(client: Arc<Socket>) {
    loop {
        let data = match client.receive() {
            Ok(data) => data,
            Err(e) => {
                info!(client = %client.handle(), error = %e, "connection closed");
                break;
            }
        };

        if let Err(e) = client.send(data) {
            warn!(client = %client.handle(), error = %e, "echo failed");
            break;
        }
    }
}
