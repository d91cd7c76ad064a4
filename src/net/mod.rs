//! Reactor-driven stream sockets.
//!
//! This module provides:
//! - [`Socket`]: a connected socket with queued sends and receives,
//! - [`ServerSocket`]: a listening socket that accepts connections on the
//!   reactor thread,
//! - [`ServerSocketListener`]: push-style notification of new connections.
//!
//! No framing is applied: bytes are relayed exactly as the OS delivers them.

mod server_socket;
mod socket;

pub use server_socket::{ServerSocket, ServerSocketListener};
pub use socket::Socket;
