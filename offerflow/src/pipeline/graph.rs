//! The node arena and action-keyed edges shared by both pipeline kinds.

use crate::core::{Action, NodeId};
use crate::errors::{FlowError, FlowResult};
use crate::events::EventSink;
use crate::nodes::Named;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// A validated state machine: states are boxed steps, transitions are
/// `(node, action) -> node`.
pub(crate) struct Graph<S: ?Sized> {
    pub(crate) name: String,
    nodes: Vec<Box<S>>,
    edges: Vec<HashMap<Action, NodeId>>,
    start: NodeId,
    max_steps: Option<usize>,
    pub(crate) events: Arc<dyn EventSink>,
}

impl<S: ?Sized + Named> Graph<S> {
    pub(crate) fn new(
        name: String,
        nodes: Vec<Box<S>>,
        edges: Vec<HashMap<Action, NodeId>>,
        start: NodeId,
        max_steps: Option<usize>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            name,
            nodes,
            edges,
            start,
            max_steps,
            events,
        }
    }

    pub(crate) fn start(&self) -> NodeId {
        self.start
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: NodeId) -> &S {
        &self.nodes[id.index()]
    }

    /// Looks up the transition for `action`.
    ///
    /// `None` ends the run. Reaching the end through an action the node has
    /// no edge for, while it does have edges for other actions, is usually a
    /// typo in the returned label and is logged.
    pub(crate) fn successor(&self, from: NodeId, action: &Action) -> Option<NodeId> {
        let edges = &self.edges[from.index()];
        let next = edges.get(action).copied();
        if next.is_none() && !edges.is_empty() {
            let mut available: Vec<&str> = edges.keys().map(Action::as_str).collect();
            available.sort_unstable();
            tracing::warn!(
                pipeline = %self.name,
                node = %self.node(from).name(),
                action = %action,
                ?available,
                "pipeline ends: action not found"
            );
        }
        next
    }

    /// Fails once the run is about to exceed the configured step limit.
    pub(crate) fn check_step_limit(&self, steps: usize) -> FlowResult<()> {
        match self.max_steps {
            Some(limit) if steps > limit => Err(FlowError::StepLimitExceeded {
                pipeline: self.name.clone(),
                limit,
            }),
            _ => Ok(()),
        }
    }
}

impl<S: ?Sized + Named> Debug for Graph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<&str> = self.nodes.iter().map(|n| n.name()).collect();
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("nodes", &nodes)
            .field("edges", &self.edges)
            .field("start", &self.start)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}
