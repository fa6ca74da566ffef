//! The superstep execution loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::{CompiledGraph, Edge, GraphError, GraphState, NodeContext, Route, END};
use crate::error::{Error, Result};

/// Result of a full graph run.
#[derive(Debug, Clone)]
pub struct FlowOutcome<S> {
    /// The final merged state.
    pub state: S,
    /// Node names in completion order, one entry per superstep a node ran
    /// in (mapper workers collapse to one entry).
    pub nodes_executed: Vec<String>,
    /// True when the run stopped on a cancellation observation.
    pub cancelled: bool,
    /// Number of supersteps executed.
    pub supersteps: usize,
}

/// Progress events emitted by [`CompiledGraph::stream`].
#[derive(Debug)]
pub enum ExecutionEvent<S> {
    /// A node is about to run `tasks` parallel task(s).
    NodeStart {
        /// Node name.
        node: String,
        /// Number of parallel tasks in this superstep.
        tasks: usize,
    },
    /// All of a node's tasks in the current superstep finished.
    NodeEnd {
        /// Node name.
        node: String,
        /// Wall time from superstep start to the group finishing.
        duration: Duration,
    },
    /// A cancellation observation stopped the run.
    Cancelled,
    /// The run finished (including cancelled runs).
    GraphEnd {
        /// Final outcome.
        outcome: FlowOutcome<S>,
    },
    /// The run failed with an unrecoverable error.
    GraphError {
        /// Rendered error.
        error: String,
    },
}

struct Task {
    node: String,
    payload: Option<serde_json::Value>,
}

impl<S: GraphState> CompiledGraph<S> {
    /// Run the graph to completion and return the final outcome.
    pub async fn invoke(&self, initial: S) -> Result<FlowOutcome<S>> {
        self.run(initial, None).await
    }

    /// Run the graph in a background task, yielding progress events. The
    /// final item is always [`ExecutionEvent::GraphEnd`] or
    /// [`ExecutionEvent::GraphError`].
    pub fn stream(self: Arc<Self>, initial: S) -> ReceiverStream<ExecutionEvent<S>> {
        let (tx, rx) = mpsc::channel(64);
        let graph = Arc::clone(&self);
        tokio::spawn(async move {
            match graph.run(initial, Some(tx.clone())).await {
                Ok(outcome) => {
                    let _ = tx.send(ExecutionEvent::GraphEnd { outcome }).await;
                }
                Err(e) => {
                    let _ = tx
                        .send(ExecutionEvent::GraphError {
                            error: e.to_string(),
                        })
                        .await;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    async fn run(
        &self,
        initial: S,
        events: Option<mpsc::Sender<ExecutionEvent<S>>>,
    ) -> Result<FlowOutcome<S>> {
        let mut state = initial;
        let mut nodes_executed: Vec<String> = Vec::new();
        let mut frontier = vec![Task {
            node: self.entry.clone(),
            payload: None,
        }];
        let mut supersteps = 0usize;
        let mut cancelled = false;

        while !frontier.is_empty() && !cancelled {
            supersteps += 1;
            if supersteps > self.recursion_limit {
                return Err(GraphError::RecursionLimit {
                    limit: self.recursion_limit,
                }
                .into());
            }

            let step_started = Instant::now();
            let mut group_counts: Vec<(String, usize)> = Vec::new();
            for task in &frontier {
                match group_counts.iter_mut().find(|(n, _)| *n == task.node) {
                    Some((_, count)) => *count += 1,
                    None => group_counts.push((task.node.clone(), 1)),
                }
            }
            for (node, tasks) in &group_counts {
                debug!(node, tasks, superstep = supersteps, "scheduling node");
                if let Some(tx) = &events {
                    let _ = tx
                        .send(ExecutionEvent::NodeStart {
                            node: node.clone(),
                            tasks: *tasks,
                        })
                        .await;
                }
            }

            let mut handles = Vec::with_capacity(frontier.len());
            for task in frontier.drain(..) {
                let handler = match self.nodes.get(&task.node) {
                    Some(h) => Arc::clone(h),
                    // Compile-time validation makes this unreachable; keep
                    // the run loop total anyway.
                    None => {
                        return Err(GraphError::UnknownEdgeTarget {
                            from: "<frontier>".to_string(),
                            to: task.node,
                        }
                        .into())
                    }
                };
                let ctx = NodeContext {
                    state: state.clone(),
                    payload: task.payload,
                    probe: self.probe.clone(),
                };
                let node = task.node;
                handles.push((node, tokio::spawn(handler(ctx))));
            }

            let mut completed: Vec<String> = Vec::new();
            for (node, handle) in handles {
                match handle.await {
                    Ok(Ok(update)) => {
                        state
                            .apply(update)
                            .map_err(|conflict| GraphError::UpdateConflict {
                                node: node.clone(),
                                conflict,
                            })?;
                        if !completed.contains(&node) {
                            completed.push(node);
                        }
                    }
                    Ok(Err(e)) if e.is_cancelled() => {
                        info!(node, "cancellation observed; stopping graph");
                        cancelled = true;
                    }
                    Ok(Err(e)) => {
                        warn!(node, error = %e, "node failed");
                        return Err(e);
                    }
                    Err(join_err) => {
                        return Err(GraphError::TaskAborted {
                            node,
                            reason: join_err.to_string(),
                        }
                        .into())
                    }
                }
            }

            for (node, _) in &group_counts {
                if let Some(tx) = &events {
                    let _ = tx
                        .send(ExecutionEvent::NodeEnd {
                            node: node.clone(),
                            duration: step_started.elapsed(),
                        })
                        .await;
                }
            }

            if cancelled {
                if let Some(tx) = &events {
                    let _ = tx.send(ExecutionEvent::Cancelled).await;
                }
                break;
            }

            nodes_executed.extend(completed.iter().cloned());

            let mut next: Vec<Task> = Vec::new();
            let mut scheduled_deferred: HashSet<String> = HashSet::new();
            for node in &completed {
                match self.edges.get(node) {
                    None => {
                        debug!(node, "no outgoing edge; branch ends");
                    }
                    Some(Edge::Direct(to)) => {
                        self.push_successor(node, to, None, &mut next, &mut scheduled_deferred)?;
                    }
                    Some(Edge::Conditional { router, targets }) => match router(&state)? {
                        Route::To(to) => {
                            if to != END && !targets.contains(&to) {
                                return Err(GraphError::UndeclaredRoute {
                                    node: node.clone(),
                                    target: to,
                                }
                                .into());
                            }
                            self.push_successor(
                                node,
                                &to,
                                None,
                                &mut next,
                                &mut scheduled_deferred,
                            )?;
                        }
                        Route::Fan(sends) => {
                            debug!(node, count = sends.len(), "fanning out");
                            for send in sends {
                                if !targets.contains(&send.target) {
                                    return Err(GraphError::UndeclaredRoute {
                                        node: node.clone(),
                                        target: send.target,
                                    }
                                    .into());
                                }
                                self.push_successor(
                                    node,
                                    &send.target,
                                    Some(send.payload),
                                    &mut next,
                                    &mut scheduled_deferred,
                                )?;
                            }
                        }
                        Route::End => {}
                    },
                }
            }
            frontier = next;
        }

        info!(
            supersteps,
            cancelled,
            nodes = nodes_executed.len(),
            "graph run finished"
        );
        Ok(FlowOutcome {
            state,
            nodes_executed,
            cancelled,
            supersteps,
        })
    }

    fn push_successor(
        &self,
        from: &str,
        to: &str,
        payload: Option<serde_json::Value>,
        next: &mut Vec<Task>,
        scheduled_deferred: &mut HashSet<String>,
    ) -> Result<()> {
        if to == END {
            return Ok(());
        }
        if !self.nodes.contains_key(to) {
            return Err(Error::Graph(GraphError::UnknownEdgeTarget {
                from: from.to_string(),
                to: to.to_string(),
            }));
        }
        if self.deferred.contains(to) {
            if scheduled_deferred.insert(to.to_string()) {
                next.push(Task {
                    node: to.to_string(),
                    payload,
                });
            }
            return Ok(());
        }
        next.push(Task {
            node: to.to_string(),
            payload,
        });
        Ok(())
    }
}
