//! Pipeline builder with validation.

use super::graph::Graph;
use super::{AsyncPipeline, Pipeline};
use crate::config::FlowConfig;
use crate::core::{Action, NodeId};
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::events::{EventSink, NoOpEventSink};
use crate::nodes::{AsyncStep, Named, Step};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Builder for [`AsyncPipeline`]s.
pub type AsyncPipelineBuilder = PipelineBuilder<dyn AsyncStep>;

/// Collects steps and their action-keyed edges, then validates them into a
/// runnable pipeline.
///
/// The step kind `S` decides what is built: `dyn Step` gives a [`Pipeline`],
/// `dyn AsyncStep` an [`AsyncPipeline`].
///
/// ```rust,ignore
/// let mut builder = PipelineBuilder::new("analysis");
/// let collect = builder.add(Node::new("collect", CollectOffers));
/// let score = builder.add(Node::new("score", ScoreOffers).with_max_attempts(3));
/// builder.connect(collect, score);
/// let pipeline = builder.build()?;
/// ```
pub struct PipelineBuilder<S: ?Sized = dyn Step> {
    name: String,
    nodes: Vec<Box<S>>,
    edges: Vec<HashMap<Action, NodeId>>,
    start: Option<NodeId>,
    dangling: Vec<NodeId>,
    max_steps: Option<usize>,
    events: Arc<dyn EventSink>,
}

impl PipelineBuilder<dyn Step> {
    /// Creates a builder for a synchronous pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::named(name)
    }

    /// Adds a step and returns its id.
    pub fn add(&mut self, step: impl Step + 'static) -> NodeId {
        self.push(Box::new(step))
    }

    /// Validates the graph and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no nodes or an id belongs to
    /// another builder.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        self.into_graph().map(Pipeline::from_graph)
    }
}

impl PipelineBuilder<dyn AsyncStep> {
    /// Adds an awaitable step (or a synchronous node) and returns its id.
    pub fn add(&mut self, step: impl AsyncStep + 'static) -> NodeId {
        self.push(Box::new(step))
    }

    /// Validates the graph and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no nodes or an id belongs to
    /// another builder.
    pub fn build(self) -> Result<AsyncPipeline, PipelineValidationError> {
        self.into_graph().map(AsyncPipeline::from_graph)
    }
}

impl<S: ?Sized + Named> PipelineBuilder<S> {
    pub(crate) fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            start: None,
            dangling: Vec::new(),
            max_steps: None,
            events: Arc::new(NoOpEventSink),
        }
    }

    fn push(&mut self, step: Box<S>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(step);
        self.edges.push(HashMap::new());
        id
    }

    /// Sets the start node. Defaults to the first node added.
    pub fn start(&mut self, id: NodeId) -> &mut Self {
        self.start = Some(id);
        self
    }

    /// Connects `from` to `to` under the default action.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> &mut Self {
        self.connect_on(from, Action::Default, to)
    }

    /// Connects `from` to `to` under `action`. A second edge for the same
    /// action replaces the first.
    pub fn connect_on(&mut self, from: NodeId, action: impl Into<Action>, to: NodeId) -> &mut Self {
        let action = action.into();
        let Some(edges) = self.edges.get_mut(from.index()) else {
            // reported by `build`
            self.dangling.push(from);
            return self;
        };
        if let Some(previous) = edges.insert(action.clone(), to) {
            tracing::warn!(
                pipeline = %self.name,
                from = %from,
                action = %action,
                previous = %previous,
                to = %to,
                "overwriting successor"
            );
        }
        self
    }

    /// Caps the number of node visits per run.
    pub fn with_max_steps(&mut self, limit: usize) -> &mut Self {
        self.max_steps = Some(limit.max(1));
        self
    }

    /// Sets the sink that receives lifecycle events.
    pub fn with_event_sink(&mut self, sink: Arc<dyn EventSink>) -> &mut Self {
        self.events = sink;
        self
    }

    /// Applies the pipeline-level settings of `config`.
    pub fn with_config(&mut self, config: &FlowConfig) -> &mut Self {
        if let Some(limit) = config.max_steps {
            self.with_max_steps(limit);
        }
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of nodes added so far.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn into_graph(self) -> Result<Graph<S>, PipelineValidationError> {
        if self.nodes.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no nodes",
                self.name
            ))
            .with_error_info(
                ContractErrorInfo::new("FLOW-EMPTY", "Cannot build an empty pipeline")
                    .with_fix_hint("Add at least one node before building."),
            ));
        }

        let count = self.nodes.len();
        let start = self.start.unwrap_or(NodeId(0));
        let mut unknown = self.dangling;
        if start.index() >= count {
            unknown.push(start);
        }
        for edges in &self.edges {
            unknown.extend(edges.values().filter(|to| to.index() >= count));
        }

        if !unknown.is_empty() {
            unknown.sort_unstable();
            unknown.dedup();
            let ids: Vec<String> = unknown.iter().map(ToString::to_string).collect();
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' references unknown nodes: {}",
                self.name,
                ids.join(", ")
            ))
            .with_nodes(ids)
            .with_error_info(
                ContractErrorInfo::new("FLOW-UNKNOWN-NODE", "Node id was not added to this builder")
                    .with_fix_hint("Only connect ids returned by this builder's `add`.")
                    .with_context_entry("node_count", count.to_string()),
            ));
        }

        Ok(Graph::new(
            self.name,
            self.nodes,
            self.edges,
            start,
            self.max_steps,
            self.events,
        ))
    }
}

impl<S: ?Sized> Debug for PipelineBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges)
            .field("start", &self.start)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}
