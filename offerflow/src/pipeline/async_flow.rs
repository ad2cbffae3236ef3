//! The awaitable pipeline runner.

use super::graph::Graph;
use super::AsyncPipelineBuilder;
use crate::context::Context;
use crate::core::{Action, NodeId, RunId};
use crate::errors::FlowResult;
use crate::events::{
    emit_event, FlowEvent, NODE_COMPLETED, NODE_FAILED, NODE_STARTED, PIPELINE_COMPLETED,
    PIPELINE_FAILED, PIPELINE_STARTED,
};
use crate::nodes::{AsyncStep, Named};
use crate::observability::SpanTimer;
use async_trait::async_trait;
use tracing::{debug, info, info_span, Instrument};

/// A validated graph of [`AsyncStep`]s.
///
/// Nodes are awaited strictly one after another; concurrency only happens
/// inside a node, e.g. across the items of an
/// [`AsyncBatchNode`](crate::nodes::AsyncBatchNode). Synchronous nodes and
/// whole [`Pipeline`](super::Pipeline)s can be added as steps too.
#[derive(Debug)]
pub struct AsyncPipeline {
    graph: Graph<dyn AsyncStep>,
}

impl AsyncPipeline {
    /// Creates a builder for an async pipeline.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> AsyncPipelineBuilder {
        AsyncPipelineBuilder::named(name)
    }

    pub(crate) fn from_graph(graph: Graph<dyn AsyncStep>) -> Self {
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
    pub async fn run(&self, ctx: &mut Context) -> FlowResult<Action> {
        let run_id = RunId::new();
        let span = info_span!("pipeline", pipeline = %self.graph.name, run_id = %run_id);
        self.run_with_id(ctx, run_id).instrument(span).await
    }

    async fn run_with_id(&self, ctx: &mut Context, run_id: RunId) -> FlowResult<Action> {
        let sink = self.graph.events.as_ref();
        let timer = SpanTimer::start(&self.graph.name);
        emit_event(sink, FlowEvent::new(PIPELINE_STARTED, &self.graph.name, run_id)).await;

        let result = self.walk(ctx, run_id).await;

        let duration_ms = timer.finish();
        let event = match &result {
            Ok(action) => {
                info!(%action, duration_ms, "pipeline completed");
                FlowEvent::new(PIPELINE_COMPLETED, &self.graph.name, run_id).with_action(action)
            }
            Err(error) => FlowEvent::new(PIPELINE_FAILED, &self.graph.name, run_id).with_error(error),
        };
        emit_event(sink, event.with_duration_ms(duration_ms)).await;
        result
    }

    async fn walk(&self, ctx: &mut Context, run_id: RunId) -> FlowResult<Action> {
        let mut current = Some(self.graph.start());
        let mut last = Action::Default;
        let mut steps = 0;

        while let Some(id) = current {
            steps += 1;
            self.graph.check_step_limit(steps)?;

            let action = self.run_node(id, ctx, run_id).await?;
            current = self.graph.successor(id, &action);
            last = action;
        }

        Ok(last)
    }

    async fn run_node(&self, id: NodeId, ctx: &mut Context, run_id: RunId) -> FlowResult<Action> {
        let sink = self.graph.events.as_ref();
        let node = self.graph.node(id);
        let name = node.name();
        debug!(node = %name, node_id = %id, "running node");
        emit_event(
            sink,
            FlowEvent::new(NODE_STARTED, &self.graph.name, run_id).for_node(id, name),
        )
        .await;

        let timer = SpanTimer::start(name);
        let result = node.run_async(ctx).await;
        let event = match &result {
            Ok(action) => FlowEvent::new(NODE_COMPLETED, &self.graph.name, run_id).with_action(action),
            Err(error) => FlowEvent::new(NODE_FAILED, &self.graph.name, run_id).with_error(error),
        };
        emit_event(sink, event.for_node(id, name).with_duration_ms(timer.finish())).await;
        result
    }
}

impl Named for AsyncPipeline {
    fn name(&self) -> &str {
        &self.graph.name
    }
}

#[async_trait]
impl AsyncStep for AsyncPipeline {
    async fn run_async(&self, ctx: &mut Context) -> FlowResult<Action> {
        self.run(ctx).await
    }
}
