//! The synchronous pipeline runner.

use super::graph::Graph;
use super::PipelineBuilder;
use crate::context::Context;
use crate::core::{Action, NodeId, RunId};
use crate::errors::FlowResult;
use crate::events::{
    emit_now, FlowEvent, NODE_COMPLETED, NODE_FAILED, NODE_STARTED, PIPELINE_COMPLETED,
    PIPELINE_FAILED, PIPELINE_STARTED,
};
use crate::nodes::{AsyncStep, Named, Step};
use crate::observability::SpanTimer;
use async_trait::async_trait;
use tracing::{debug, info, info_span};

/// A validated graph of [`Step`]s walked one node at a time.
///
/// Starting at the start node, each node runs against the shared context and
/// the returned action selects the next node. The run ends normally when a
/// node returns an action without an outgoing edge, and aborts on the first
/// error, leaving the context as the last successful node left it.
#[derive(Debug)]
pub struct Pipeline {
    graph: Graph<dyn Step>,
}

impl Pipeline {
    /// Creates a builder for a synchronous pipeline.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub(crate) fn from_graph(graph: Graph<dyn Step>) -> Self {
        Self { graph }
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Always false: a built pipeline has at least one node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.len() == 0
    }

    /// Runs the pipeline and returns the action of the last node that ran.
    pub fn run(&self, ctx: &mut Context) -> FlowResult<Action> {
        let run_id = RunId::new();
        let span = info_span!("pipeline", pipeline = %self.graph.name, run_id = %run_id);
        let _entered = span.enter();

        let timer = SpanTimer::start(&self.graph.name);
        emit_now(
            self.graph.events.as_ref(),
            FlowEvent::new(PIPELINE_STARTED, &self.graph.name, run_id),
        );

        let result = self.walk(ctx, run_id);

        let duration_ms = timer.finish();
        let event = match &result {
            Ok(action) => {
                info!(%action, duration_ms, "pipeline completed");
                FlowEvent::new(PIPELINE_COMPLETED, &self.graph.name, run_id).with_action(action)
            }
            Err(error) => FlowEvent::new(PIPELINE_FAILED, &self.graph.name, run_id).with_error(error),
        };
        emit_now(self.graph.events.as_ref(), event.with_duration_ms(duration_ms));
        result
    }

    fn walk(&self, ctx: &mut Context, run_id: RunId) -> FlowResult<Action> {
        let mut current = Some(self.graph.start());
        let mut last = Action::Default;
        let mut steps = 0;

        while let Some(id) = current {
            steps += 1;
            self.graph.check_step_limit(steps)?;

            let action = self.run_node(id, ctx, run_id)?;
            current = self.graph.successor(id, &action);
            last = action;
        }

        Ok(last)
    }

    fn run_node(&self, id: NodeId, ctx: &mut Context, run_id: RunId) -> FlowResult<Action> {
        let node = self.graph.node(id);
        let name = node.name();
        debug!(node = %name, node_id = %id, "running node");
        emit_now(
            self.graph.events.as_ref(),
            FlowEvent::new(NODE_STARTED, &self.graph.name, run_id).for_node(id, name),
        );

        let timer = SpanTimer::start(name);
        let result = node.run(ctx);
        let event = match &result {
            Ok(action) => FlowEvent::new(NODE_COMPLETED, &self.graph.name, run_id).with_action(action),
            Err(error) => FlowEvent::new(NODE_FAILED, &self.graph.name, run_id).with_error(error),
        };
        emit_now(
            self.graph.events.as_ref(),
            event.for_node(id, name).with_duration_ms(timer.finish()),
        );
        result
    }
}

impl Named for Pipeline {
    fn name(&self) -> &str {
        &self.graph.name
    }
}

impl Step for Pipeline {
    fn run(&self, ctx: &mut Context) -> FlowResult<Action> {
        Pipeline::run(self, ctx)
    }
}

#[async_trait]
impl AsyncStep for Pipeline {
    async fn run_async(&self, ctx: &mut Context) -> FlowResult<Action> {
        Pipeline::run(self, ctx)
    }
}
