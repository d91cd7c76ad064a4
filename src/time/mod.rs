//! Reactor-driven timers.
//!
//! - [`Timer`]: a `timerfd` watched by a [`Reactor`](crate::reactor::Reactor)
//! - [`Repetition`]: how many expiries a started timer produces
//! - [`TimerListener`]: push-style expiry notification

mod timer;

pub use timer::{Repetition, Timer, TimerListener};
