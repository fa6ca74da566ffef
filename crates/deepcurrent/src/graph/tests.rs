use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use super::*;
use crate::cancellation::CancellationProbe;

#[derive(Debug, Clone, Default)]
struct CountState {
    log: Vec<String>,
    shards: BTreeMap<String, u32>,
}

#[derive(Debug, Default)]
struct CountUpdate {
    log: Vec<String>,
    shards: BTreeMap<String, u32>,
}

impl GraphState for CountState {
    type Update = CountUpdate;

    fn apply(&mut self, update: CountUpdate) -> std::result::Result<(), MergeConflict> {
        self.log.extend(update.log);
        for (key, value) in update.shards {
            if self.shards.contains_key(&key) {
                return Err(MergeConflict::new("shards", key));
            }
            self.shards.insert(key, value);
        }
        Ok(())
    }
}

fn log_update(entry: &str) -> CountUpdate {
    CountUpdate {
        log: vec![entry.to_string()],
        ..CountUpdate::default()
    }
}

#[tokio::test]
async fn sequential_edges_run_in_order() {
    let mut graph: StateGraph<CountState> = StateGraph::new();
    graph.add_node("a", |_ctx| async move { Ok(log_update("a")) });
    graph.add_node("b", |_ctx| async move { Ok(log_update("b")) });
    graph.add_node("c", |_ctx| async move { Ok(log_update("c")) });
    graph.set_entry_point("a");
    graph.add_edge("a", "b");
    graph.add_edge("b", "c");
    graph.add_edge("c", END);

    let outcome = graph
        .compile()
        .unwrap()
        .invoke(CountState::default())
        .await
        .unwrap();

    assert_eq!(outcome.state.log, vec!["a", "b", "c"]);
    assert_eq!(outcome.nodes_executed, vec!["a", "b", "c"]);
    assert!(!outcome.cancelled);
}

#[tokio::test]
async fn conditional_routing_picks_declared_target() {
    let mut graph: StateGraph<CountState> = StateGraph::new();
    graph.add_node("start", |_ctx| async move { Ok(log_update("start")) });
    graph.add_node("left", |_ctx| async move { Ok(log_update("left")) });
    graph.add_node("right", |_ctx| async move { Ok(log_update("right")) });
    graph.set_entry_point("start");
    graph.add_conditional_edges(
        "start",
        |_s: &CountState| Ok(Route::To("right".to_string())),
        ["left", "right"],
    );
    graph.add_edge("left", END);
    graph.add_edge("right", END);

    let outcome = graph
        .compile()
        .unwrap()
        .invoke(CountState::default())
        .await
        .unwrap();
    assert_eq!(outcome.state.log, vec!["start", "right"]);
}

#[tokio::test]
async fn fan_out_rejoins_at_deferred_barrier_once() {
    let mut graph: StateGraph<CountState> = StateGraph::new();
    graph.add_node("plan", |_ctx| async move { Ok(log_update("plan")) });
    graph.add_node("worker", |ctx: NodeContext<CountState>| async move {
        let shard: String = ctx.payload_as()?;
        Ok(CountUpdate {
            shards: BTreeMap::from([(shard, 1)]),
            ..CountUpdate::default()
        })
    });
    graph.add_deferred_node("barrier", |ctx: NodeContext<CountState>| async move {
        assert_eq!(ctx.state.shards.len(), 4);
        Ok(log_update("barrier"))
    });
    graph.set_entry_point("plan");
    graph.add_conditional_edges(
        "plan",
        |_s: &CountState| {
            Ok(Route::Fan(
                ["w1", "w2", "w3", "w4"]
                    .iter()
                    .map(|w| Send::new("worker", serde_json::json!(w)))
                    .collect(),
            ))
        },
        ["worker"],
    );
    graph.add_edge("worker", "barrier");
    graph.add_edge("barrier", END);

    let outcome = graph
        .compile()
        .unwrap()
        .invoke(CountState::default())
        .await
        .unwrap();

    assert_eq!(outcome.state.shards.len(), 4);
    // All four workers collapse into one barrier execution.
    assert_eq!(
        outcome.state.log.iter().filter(|e| *e == "barrier").count(),
        1
    );
    assert_eq!(outcome.supersteps, 3);
}

#[tokio::test]
async fn map_merge_collision_fails_fast() {
    let mut graph: StateGraph<CountState> = StateGraph::new();
    graph.add_node("plan", |_ctx| async move { Ok(CountUpdate::default()) });
    graph.add_node("worker", |_ctx| async move {
        Ok(CountUpdate {
            shards: BTreeMap::from([("same-key".to_string(), 1)]),
            ..CountUpdate::default()
        })
    });
    graph.add_deferred_node("barrier", |_ctx| async move { Ok(CountUpdate::default()) });
    graph.set_entry_point("plan");
    graph.add_conditional_edges(
        "plan",
        |_s: &CountState| {
            Ok(Route::Fan(vec![
                Send::new("worker", serde_json::json!(1)),
                Send::new("worker", serde_json::json!(2)),
            ]))
        },
        ["worker"],
    );
    graph.add_edge("worker", "barrier");
    graph.add_edge("barrier", END);

    let err = graph
        .compile()
        .unwrap()
        .invoke(CountState::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        crate::Error::Graph(GraphError::UpdateConflict { .. })
    ));
}

#[tokio::test]
async fn recursion_limit_is_enforced() {
    let mut graph: StateGraph<CountState> = StateGraph::new();
    graph.add_node("spin", |_ctx| async move { Ok(CountUpdate::default()) });
    graph.set_entry_point("spin");
    graph.add_conditional_edges(
        "spin",
        |_s: &CountState| Ok(Route::To("spin".to_string())),
        ["spin"],
    );

    let err = graph
        .compile()
        .unwrap()
        .with_recursion_limit(5)
        .invoke(CountState::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        crate::Error::Graph(GraphError::RecursionLimit { limit: 5 })
    ));
}

struct FlagProbe(AtomicBool);

#[async_trait]
impl CancellationProbe for FlagProbe {
    async fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn cancellation_short_circuits_downstream_stages() {
    let probe = Arc::new(FlagProbe(AtomicBool::new(false)));

    let mut graph: StateGraph<CountState> = StateGraph::new();
    {
        let probe = Arc::clone(&probe);
        graph.add_node("first", move |_ctx| {
            let probe = Arc::clone(&probe);
            async move {
                probe.0.store(true, Ordering::SeqCst);
                Ok(log_update("first"))
            }
        });
    }
    graph.add_node("second", |ctx: NodeContext<CountState>| async move {
        ctx.check_cancellation().await?;
        Ok(log_update("second"))
    });
    graph.add_node("third", |_ctx| async move { Ok(log_update("third")) });
    graph.set_entry_point("first");
    graph.add_edge("first", "second");
    graph.add_edge("second", "third");
    graph.add_edge("third", END);

    let outcome = graph
        .compile()
        .unwrap()
        .with_cancellation_probe(probe)
        .invoke(CountState::default())
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.state.log, vec!["first"]);
}

#[tokio::test]
async fn stream_ends_with_graph_end_event() {
    let mut graph: StateGraph<CountState> = StateGraph::new();
    graph.add_node("only", |_ctx| async move { Ok(log_update("only")) });
    graph.set_entry_point("only");
    graph.add_edge("only", END);

    let app = Arc::new(graph.compile().unwrap());
    let mut events = app.stream(CountState::default());

    let mut saw_start = false;
    let mut saw_end = false;
    while let Some(event) = events.next().await {
        match event {
            ExecutionEvent::NodeStart { node, tasks } => {
                assert_eq!(node, "only");
                assert_eq!(tasks, 1);
                saw_start = true;
            }
            ExecutionEvent::GraphEnd { outcome } => {
                assert_eq!(outcome.state.log, vec!["only"]);
                saw_end = true;
            }
            _ => {}
        }
    }
    assert!(saw_start && saw_end);
}

#[test]
fn compile_rejects_unknown_edge_target() {
    let mut graph: StateGraph<CountState> = StateGraph::new();
    graph.add_node("a", |_ctx| async move { Ok(CountUpdate::default()) });
    graph.set_entry_point("a");
    graph.add_edge("a", "missing");

    assert!(matches!(
        graph.compile().map(|_| ()),
        Err(crate::Error::Graph(GraphError::UnknownEdgeTarget { .. }))
    ));
}

#[test]
fn compile_rejects_missing_entry_point() {
    let mut graph: StateGraph<CountState> = StateGraph::new();
    graph.add_node("a", |_ctx| async move { Ok(CountUpdate::default()) });

    assert!(matches!(
        graph.compile().map(|_| ()),
        Err(crate::Error::Graph(GraphError::MissingEntryPoint))
    ));
}

#[tokio::test]
async fn undeclared_route_is_an_error() {
    let mut graph: StateGraph<CountState> = StateGraph::new();
    graph.add_node("a", |_ctx| async move { Ok(CountUpdate::default()) });
    graph.add_node("b", |_ctx| async move { Ok(CountUpdate::default()) });
    graph.set_entry_point("a");
    graph.add_conditional_edges("a", |_s: &CountState| Ok(Route::To("b".to_string())), ["c"]);
    graph.add_node("c", |_ctx| async move { Ok(CountUpdate::default()) });
    graph.add_edge("b", END);
    graph.add_edge("c", END);

    let err = graph
        .compile()
        .unwrap()
        .invoke(CountState::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        crate::Error::Graph(GraphError::UndeclaredRoute { .. })
    ));
}
