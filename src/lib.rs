//! # Intercom
//!
//! **Intercom** is a small runtime for objects that talk to each other across
//! threads. Work is expressed as plain closures and always executed on the
//! thread that owns the state it touches.
//!
//! It is built from a few layers, each usable on its own:
//!
//! - A **blocking task queue** with interrupt semantics ([`sync::ThreadSafeQueue`])
//! - **Dispatch contexts**: single-threaded loops fed through channels
//!   ([`dispatch::DispatchContext`], [`dispatch::Channel`])
//! - A **component tree** that shares contexts and tears subtrees down in
//!   order ([`component::Component`])
//! - A **select-based reactor** running on its own thread, with **timers**
//!   and **stream sockets** built on top ([`reactor`], [`time`], [`net`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use intercom::component::Component;
//! use intercom::listener::ListenerHandle;
//! use intercom::reactor::Reactor;
//! use intercom::time::{Timer, TimerListener};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Tick;
//!
//! impl TimerListener for Tick {
//!     fn on_timer_expired(&self, fired: u64) {
//!         println!("tick #{fired}");
//!     }
//! }
//!
//! fn main() -> intercom::Result<()> {
//!     let reactor = Reactor::default_instance()?;
//!     let component = Component::new();
//!
//!     let timer = Timer::new(&reactor)?;
//!     timer.set_interval(Duration::from_millis(100));
//!     timer.set_number_of_repetition(3);
//!     timer.add_listener(ListenerHandle::owned(Arc::new(Tick)), component.channel().unwrap());
//!     timer.start()?;
//!
//!     // Runs the listener callbacks on this thread until `exit` is called.
//!     component.exec();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`sync`] — Blocking queue and one-shot completions
//! - [`dispatch`] — Dispatch contexts, channels and thread pools
//! - [`component`] — Component ownership tree
//! - [`listener`] — Owned/borrowed listener registrations
//! - [`reactor`] — Readiness reactor (Linux)
//! - [`time`] — Reactor-driven timers (Linux)
//! - [`net`] — Reactor-driven sockets (Linux)

pub mod component;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod sync;

#[cfg(target_os = "linux")]
pub mod net;
#[cfg(target_os = "linux")]
pub mod reactor;
#[cfg(target_os = "linux")]
pub mod time;

pub use error::{Error, Result};
