//! Component ownership tree.
//!
//! Components pair a [`Channel`](crate::dispatch::Channel) with a place in a
//! parent/child hierarchy. Parents keep weak references to their children
//! and children keep their parent alive, so the tree never holds a dangling
//! link whatever order handles are dropped in.

mod core;

pub use core::Component;
