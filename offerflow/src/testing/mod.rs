//! Testing utilities for offerflow pipelines.
//!
//! This module provides:
//! - Scripted units with controllable failures and latency
//! - An event sink that records everything it receives
//! - Assertions over context contents

mod assertions;
mod mocks;
mod sinks;

pub use assertions::{assert_context_keys, assert_context_value};
pub use mocks::{ScriptedUnit, SleepyBatchUnit};
pub use sinks::CollectingEventSink;
