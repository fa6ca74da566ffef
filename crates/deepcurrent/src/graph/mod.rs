//! The state-graph engine.
//!
//! A workflow is a directed graph of named nodes over a shared typed state.
//! Nodes return *partial updates* that the engine merges; edges are either
//! direct or conditional, and a conditional router may fan out a dynamic
//! set of [`Send`] packets whose worker tasks rejoin at a *deferred*
//! barrier node.
//!
//! The graph is an explicit data structure (nodes, edges, router
//! functions, defer flags) executed as a barriered superstep loop: every
//! task in the current frontier completes (and its update is merged)
//! before successors are computed. A deferred successor is scheduled once
//! per superstep regardless of how many predecessors point at it, which is
//! exactly the fan-in contract mappers need.
//!
//! ```no_run
//! use deepcurrent::graph::{Route, StateGraph, END};
//! # use deepcurrent::graph::{GraphState, MergeConflict};
//! # #[derive(Clone, Default)]
//! # struct S;
//! # impl GraphState for S {
//! #     type Update = ();
//! #     fn apply(&mut self, _: ()) -> Result<(), MergeConflict> { Ok(()) }
//! # }
//! # async fn demo() -> deepcurrent::Result<()> {
//! let mut graph: StateGraph<S> = StateGraph::new();
//! graph.add_node("plan", |_ctx| async move { Ok(()) });
//! graph.add_node("work", |_ctx| async move { Ok(()) });
//! graph.set_entry_point("plan");
//! graph.add_conditional_edges("plan", |_s: &S| Ok(Route::To("work".into())), ["work"]);
//! graph.add_edge("work", END);
//! let app = graph.compile()?;
//! let outcome = app.invoke(S).await?;
//! # Ok(())
//! # }
//! ```

mod executor;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::cancellation::CancellationProbe;
use crate::error::{Error, Result};

pub use executor::{ExecutionEvent, FlowOutcome};

/// The reserved terminal node name.
pub const END: &str = "__end__";

/// Default ceiling on supersteps for the outer workflow graph.
pub const DEFAULT_RECURSION_LIMIT: usize = 50;

/// A conflicting write detected while merging a partial update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conflicting writes to `{field}` for key `{key}`")]
pub struct MergeConflict {
    /// The state field that collided.
    pub field: String,
    /// The map key (or field name for scalar fields) written twice.
    pub key: String,
}

impl MergeConflict {
    /// Build a conflict record.
    pub fn new(field: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            key: key.into(),
        }
    }
}

/// State carried through a graph.
///
/// Implementations define a sparse `Update` type and the merge rule for
/// applying it. Map-merge fields must take key-union and report a
/// [`MergeConflict`] on overlap; the engine fails fast on collisions
/// because the partitioning discipline of mappers guarantees disjointness.
pub trait GraphState: Clone + std::marker::Send + Sync + 'static {
    /// The sparse partial-update type returned by node handlers.
    type Update: Default + std::marker::Send + Sync + 'static;

    /// Merge a partial update into this state.
    fn apply(&mut self, update: Self::Update) -> std::result::Result<(), MergeConflict>;
}

/// A dynamic dispatch of one worker task: the target node name plus the
/// payload that worker receives via [`NodeContext::payload`].
#[derive(Debug, Clone)]
pub struct Send {
    /// Worker node to run.
    pub target: String,
    /// Arguments for this worker.
    pub payload: Value,
}

impl Send {
    /// Build a send packet.
    pub fn new(target: impl Into<String>, payload: Value) -> Self {
        Self {
            target: target.into(),
            payload,
        }
    }
}

/// The decision a conditional router returns.
pub enum Route {
    /// Continue to a single declared target.
    To(String),
    /// Fan out a dynamic set of worker tasks.
    Fan(Vec<Send>),
    /// Stop this branch.
    End,
}

/// Per-task view handed to a node handler.
pub struct NodeContext<S> {
    /// Snapshot of the merged state at superstep start.
    pub state: S,
    payload: Option<Value>,
    probe: Option<Arc<dyn CancellationProbe>>,
}

impl<S> NodeContext<S> {
    /// The send payload for mapper workers; `None` for unary nodes.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Deserialize the send payload.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| Error::other("node expected a send payload but none was provided"))?;
        serde_json::from_value(payload.clone())
            .map_err(|e| Error::other(format!("invalid send payload: {e}")))
    }

    /// Observe the cancellation protocol; raises [`Error::Cancelled`].
    pub async fn check_cancellation(&self) -> Result<()> {
        match &self.probe {
            Some(probe) => probe.check().await,
            None => Ok(()),
        }
    }

    /// The probe itself, for handing down to agent drivers.
    pub fn probe(&self) -> Option<Arc<dyn CancellationProbe>> {
        self.probe.clone()
    }
}

/// Errors from graph construction and execution.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum GraphError {
    /// `compile` was called without an entry point.
    #[error("graph has no entry point")]
    MissingEntryPoint,

    /// The entry point names an unregistered node.
    #[error("entry point `{0}` is not a registered node")]
    UnknownEntryPoint(String),

    /// A node name was registered twice.
    #[error("node `{0}` is already registered")]
    DuplicateNode(String),

    /// An edge was added from a node that does not exist.
    #[error("edge from unknown node `{0}`")]
    EdgeFromUnknownNode(String),

    /// An edge targets a node that does not exist.
    #[error("edge from `{from}` targets unknown node `{to}`")]
    UnknownEdgeTarget {
        /// Source node.
        from: String,
        /// Missing target.
        to: String,
    },

    /// A node already has an outgoing edge.
    #[error("node `{0}` already has an outgoing edge")]
    DuplicateEdge(String),

    /// A router returned a target it did not declare.
    #[error("router for `{node}` returned undeclared target `{target}`")]
    UndeclaredRoute {
        /// Routing node.
        node: String,
        /// The undeclared target.
        target: String,
    },

    /// The superstep ceiling was exceeded.
    #[error("recursion limit of {limit} supersteps exceeded")]
    RecursionLimit {
        /// The configured limit.
        limit: usize,
    },

    /// A node produced an update conflicting with an earlier merge.
    #[error("node `{node}` produced a conflicting update: {conflict}")]
    UpdateConflict {
        /// The offending node.
        node: String,
        /// The collision details.
        conflict: MergeConflict,
    },

    /// A spawned node task panicked or was aborted.
    #[error("task for node `{node}` aborted: {reason}")]
    TaskAborted {
        /// The node whose task died.
        node: String,
        /// Join error text.
        reason: String,
    },
}

type NodeFuture<S> =
    Pin<Box<dyn Future<Output = Result<<S as GraphState>::Update>> + std::marker::Send>>;
type NodeHandler<S> = Arc<dyn Fn(NodeContext<S>) -> NodeFuture<S> + std::marker::Send + Sync>;
type Router<S> = Arc<dyn Fn(&S) -> Result<Route> + std::marker::Send + Sync>;

enum Edge<S: GraphState> {
    Direct(String),
    Conditional {
        router: Router<S>,
        targets: Vec<String>,
    },
}

/// Builder for a workflow graph.
pub struct StateGraph<S: GraphState> {
    nodes: HashMap<String, NodeHandler<S>>,
    deferred: HashSet<String>,
    edges: HashMap<String, Edge<S>>,
    entry: Option<String>,
    build_errors: Vec<GraphError>,
}

impl<S: GraphState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> StateGraph<S> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            deferred: HashSet::new(),
            edges: HashMap::new(),
            entry: None,
            build_errors: Vec::new(),
        }
    }

    fn register<F, Fut>(&mut self, name: &str, handler: F, deferred: bool)
    where
        F: Fn(NodeContext<S>) -> Fut + std::marker::Send + Sync + 'static,
        Fut: Future<Output = Result<S::Update>> + std::marker::Send + 'static,
    {
        if self.nodes.contains_key(name) {
            self.build_errors
                .push(GraphError::DuplicateNode(name.to_string()));
            return;
        }
        let handler: NodeHandler<S> = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.nodes.insert(name.to_string(), handler);
        if deferred {
            self.deferred.insert(name.to_string());
        }
    }

    /// Register a node.
    pub fn add_node<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(NodeContext<S>) -> Fut + std::marker::Send + Sync + 'static,
        Fut: Future<Output = Result<S::Update>> + std::marker::Send + 'static,
    {
        self.register(name, handler, false);
    }

    /// Register a deferred node: it runs only after every task of the
    /// preceding superstep has delivered, and only once per superstep no
    /// matter how many predecessors point at it.
    pub fn add_deferred_node<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(NodeContext<S>) -> Fut + std::marker::Send + Sync + 'static,
        Fut: Future<Output = Result<S::Update>> + std::marker::Send + 'static,
    {
        self.register(name, handler, true);
    }

    /// Add a direct edge. `to` may be [`END`].
    pub fn add_edge(&mut self, from: &str, to: &str) {
        if self.edges.contains_key(from) {
            self.build_errors
                .push(GraphError::DuplicateEdge(from.to_string()));
            return;
        }
        self.edges
            .insert(from.to_string(), Edge::Direct(to.to_string()));
    }

    /// Add a conditional edge with its declared targets. The router runs
    /// against the merged state after `from` completes and returns a
    /// [`Route`]; fan-out targets must be among `targets`.
    pub fn add_conditional_edges<R, I, T>(&mut self, from: &str, router: R, targets: I)
    where
        R: Fn(&S) -> Result<Route> + std::marker::Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        if self.edges.contains_key(from) {
            self.build_errors
                .push(GraphError::DuplicateEdge(from.to_string()));
            return;
        }
        self.edges.insert(
            from.to_string(),
            Edge::Conditional {
                router: Arc::new(router),
                targets: targets.into_iter().map(Into::into).collect(),
            },
        );
    }

    /// Name the node execution starts at.
    pub fn set_entry_point(&mut self, name: &str) {
        self.entry = Some(name.to_string());
    }

    /// Validate the graph and produce an executable form.
    pub fn compile(mut self) -> Result<CompiledGraph<S>> {
        if let Some(err) = self.build_errors.pop() {
            return Err(err.into());
        }

        let entry = self.entry.clone().ok_or(GraphError::MissingEntryPoint)?;
        if !self.nodes.contains_key(&entry) {
            return Err(GraphError::UnknownEntryPoint(entry).into());
        }

        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(GraphError::EdgeFromUnknownNode(from.clone()).into());
            }
            let targets: Vec<&String> = match edge {
                Edge::Direct(to) => vec![to],
                Edge::Conditional { targets, .. } => targets.iter().collect(),
            };
            for to in targets {
                if to != END && !self.nodes.contains_key(to) {
                    return Err(GraphError::UnknownEdgeTarget {
                        from: from.clone(),
                        to: to.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            deferred: self.deferred,
            edges: self.edges,
            entry,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            probe: None,
        })
    }
}

/// An executable graph. Built by [`StateGraph::compile`].
pub struct CompiledGraph<S: GraphState> {
    nodes: HashMap<String, NodeHandler<S>>,
    deferred: HashSet<String>,
    edges: HashMap<String, Edge<S>>,
    entry: String,
    recursion_limit: usize,
    probe: Option<Arc<dyn CancellationProbe>>,
}

impl<S: GraphState> CompiledGraph<S> {
    /// Override the superstep ceiling.
    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Attach the cancellation probe handed to every node context.
    #[must_use]
    pub fn with_cancellation_probe(mut self, probe: Arc<dyn CancellationProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

#[cfg(test)]
mod tests;
