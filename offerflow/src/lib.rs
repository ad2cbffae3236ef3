//! # Offerflow
//!
//! A small workflow runtime that sequences units of work into a directed
//! graph, threads one shared [`Context`](context::Context) between them and
//! wraps each unit's computation in bounded retry with an optional fallback.
//!
//! Offerflow provides:
//!
//! - **Three-phase units**: `prepare` reads the context, `compute` does the
//!   work and is retried, `finalize` writes results and picks the next action
//! - **Batch fan-out**: `compute` per item, recombined in item order
//! - **Async variants**: concurrent batch items, awaited pipelines
//! - **Action-keyed routing**: branches, loops and nested pipelines
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use offerflow::prelude::*;
//!
//! let mut builder = PipelineBuilder::new("analysis");
//! let collect = builder.add(Node::new("collect", CollectOffers));
//! let score = builder.add(Node::new("score", ScoreOffers).with_max_attempts(3));
//! builder.connect(collect, score);
//!
//! let mut ctx = Context::new();
//! ctx.insert("offers", offers);
//! builder.build()?.run(&mut ctx)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod nodes;
pub mod observability;
pub mod pipeline;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{FlowConfig, LogFormat, LoggingConfig};
    pub use crate::context::Context;
    pub use crate::core::{Action, NodeId, RunId};
    pub use crate::errors::{
        ConfigError, ContractErrorInfo, ExhaustedRetryError, FlowError, FlowResult,
        PipelineValidationError,
    };
    pub use crate::events::{EventSink, FlowEvent, LoggingEventSink, NoOpEventSink};
    pub use crate::nodes::{
        AsyncBatchNode, AsyncBatchUnit, AsyncNode, AsyncStep, AsyncUnit, BatchNode, BatchUnit,
        Batched, FnNode, Named, Node, Step, Unit,
    };
    pub use crate::observability::{init_tracing, SpanTimer};
    pub use crate::pipeline::{
        AsyncPipeline, AsyncPipelineBuilder, BackoffStrategy, JitterStrategy, Pipeline,
        PipelineBuilder, RetryPolicy,
    };
}
