//! Units of work and the node wrappers that execute them.
//!
//! A unit author implements one of the capability traits ([`Unit`],
//! [`BatchUnit`], [`AsyncUnit`], [`AsyncBatchUnit`]); the matching wrapper
//! adds a name and a retry policy and exposes the result as a [`Step`] or
//! [`AsyncStep`] that pipelines can hold.

mod async_batch;
mod async_unit;
mod batch;
mod fn_node;
mod step;
mod unit;

pub use async_batch::{AsyncBatchNode, AsyncBatchUnit};
pub use async_unit::{AsyncNode, AsyncUnit};
pub use batch::{flatten_results, index_by, BatchNode, BatchUnit, Batched};
pub use fn_node::FnNode;
pub use step::{AsyncStep, Named, Step};
pub use unit::{Node, Unit};
