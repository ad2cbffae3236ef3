//! Core types shared by nodes and pipelines.

mod action;
mod ids;

pub use action::Action;
pub use ids::{NodeId, RunId};
