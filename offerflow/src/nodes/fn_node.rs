//! Closure-backed steps for glue work that needs no `compute` phase.

use super::{AsyncStep, Named, Step};
use crate::context::Context;
use crate::core::Action;
use crate::errors::{FlowError, FlowResult};
use async_trait::async_trait;
use std::fmt::{self, Debug};

/// A step that runs a closure directly against the context.
///
/// Useful for seeding defaults or routing on a flag. Failures are reported
/// as finalize errors since the closure mutates the context.
pub struct FnNode<F>
where
    F: Fn(&mut Context) -> anyhow::Result<Action> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnNode<F>
where
    F: Fn(&mut Context) -> anyhow::Result<Action> + Send + Sync,
{
    /// Creates a new closure step.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnNode<F>
where
    F: Fn(&mut Context) -> anyhow::Result<Action> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNode").field("name", &self.name).finish()
    }
}

impl<F> Named for FnNode<F>
where
    F: Fn(&mut Context) -> anyhow::Result<Action> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> Step for FnNode<F>
where
    F: Fn(&mut Context) -> anyhow::Result<Action> + Send + Sync,
{
    fn run(&self, ctx: &mut Context) -> FlowResult<Action> {
        (self.func)(ctx).map_err(|e| FlowError::finalize(&self.name, e))
    }
}

#[async_trait]
impl<F> AsyncStep for FnNode<F>
where
    F: Fn(&mut Context) -> anyhow::Result<Action> + Send + Sync,
{
    async fn run_async(&self, ctx: &mut Context) -> FlowResult<Action> {
        Step::run(self, ctx)
    }
}
