//! Context management for pipeline runs.
//!
//! A single [`Context`] is created by the caller, borrowed by every node of
//! a run, and handed back with whatever the nodes wrote into it.

mod store;

pub use store::Context;
