//! Readiness reactor.
//!
//! The reactor owns one background thread that waits for OS handles to
//! become readable, writable or to report an error, and runs the callbacks
//! registered for them. It is the only place in the crate that blocks on
//! I/O readiness; timers and sockets are built on top of it.
//!
//! A reactor is created explicitly with [`ReactorBuilder`] and shared as an
//! `Arc<Reactor>`. [`Reactor::default_instance`] provides one lazily
//! created reactor for code that does not need its own.

mod builder;
mod core;
mod handle;

pub(crate) mod poller;

pub use builder::{
    DEFAULT_LISTEN_BACKLOG, DEFAULT_READ_BUFFER_SIZE, DEFAULT_THREAD_NAME, ReactorBuilder,
};
pub use core::Reactor;
pub use handle::{EventType, Handle, ReadinessCallback};
