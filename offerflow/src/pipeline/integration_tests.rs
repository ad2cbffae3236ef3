//! End-to-end tests for pipeline execution.

use crate::context::Context;
use crate::core::Action;
use crate::errors::FlowError;
use crate::events::{
    EventSink, MockEventSink, NODE_COMPLETED, NODE_FAILED, NODE_STARTED, PIPELINE_COMPLETED,
    PIPELINE_FAILED, PIPELINE_STARTED,
};
use crate::nodes::{AsyncBatchNode, AsyncStep, BatchNode, BatchUnit, Batched, FnNode, Node, Step, Unit};
use crate::pipeline::{AsyncPipeline, Pipeline, PipelineBuilder};
use crate::testing::{
    assert_context_keys, assert_context_value, CollectingEventSink, ScriptedUnit, SleepyBatchUnit,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Appends its name to `trace` in `finalize`.
struct Tracer {
    name: &'static str,
    trace: Arc<Mutex<Vec<String>>>,
}

impl Unit for Tracer {
    type Prep = ();
    type Output = ();

    fn prepare(&self, _ctx: &Context) -> anyhow::Result<()> {
        Ok(())
    }

    fn compute(&self, _prep: &()) -> anyhow::Result<()> {
        Ok(())
    }

    fn finalize(&self, _ctx: &mut Context, _prep: (), _output: ()) -> anyhow::Result<Action> {
        self.trace.lock().push(self.name.to_string());
        Ok(Action::Default)
    }
}

fn tracer(name: &'static str, trace: &Arc<Mutex<Vec<String>>>) -> Node<Tracer> {
    Node::new(
        name,
        Tracer {
            name,
            trace: Arc::clone(trace),
        },
    )
}

/// Reads `from` as an integer and writes `from + 1` under `to`.
struct Increment {
    from: &'static str,
    to: &'static str,
}

impl Unit for Increment {
    type Prep = i64;
    type Output = i64;

    fn prepare(&self, ctx: &Context) -> anyhow::Result<i64> {
        ctx.get_as(self.from)
    }

    fn compute(&self, value: &i64) -> anyhow::Result<i64> {
        Ok(value + 1)
    }

    fn finalize(&self, ctx: &mut Context, _prep: i64, output: i64) -> anyhow::Result<Action> {
        ctx.insert(self.to, output);
        Ok(Action::Default)
    }
}

fn x_y_done_pipeline() -> Pipeline {
    let mut builder = PipelineBuilder::new("x-y-done");
    let seed = builder.add(FnNode::new("seed", |ctx: &mut Context| {
        ctx.insert("x", 1);
        Ok(Action::Default)
    }));
    let bump = builder.add(Node::new("bump", Increment { from: "x", to: "y" }));
    let done = builder.add(FnNode::new("done", |ctx: &mut Context| {
        let y: i64 = ctx.get_as("y")?;
        anyhow::ensure!(y == 2, "unexpected y {y}");
        ctx.insert("done", true);
        Ok(Action::Default)
    }));
    builder.connect(seed, bump).connect(bump, done);
    builder.build().unwrap()
}

#[test]
fn test_chain_visits_each_node_once_in_order() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mut builder = PipelineBuilder::new("chain");
    let ids: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|name| builder.add(tracer(name, &trace)))
        .collect();
    for pair in ids.windows(2) {
        builder.connect(pair[0], pair[1]);
    }
    let pipeline = builder.build().unwrap();

    let action = pipeline.run(&mut Context::new()).unwrap();

    assert!(action.is_default());
    assert_eq!(*trace.lock(), vec!["a", "b", "c", "d"]);
}

#[test]
fn test_end_to_end_context() {
    let mut ctx = Context::new();

    x_y_done_pipeline().run(&mut ctx).unwrap();

    assert_eq!(ctx.to_value(), json!({"x": 1, "y": 2, "done": true}));
}

#[test]
fn test_data_handoff_between_chained_nodes() {
    let mut builder = PipelineBuilder::new("handoff");
    let a = builder.add(FnNode::new("a", |ctx: &mut Context| {
        ctx.insert("offers", json!([{"offer_id": "o1"}, {"offer_id": "o2"}]));
        ctx.insert("user_preferences", json!({"salary": 0.5}));
        Ok(Action::Default)
    }));
    let b = builder.add(FnNode::new("b", |ctx: &mut Context| {
        anyhow::ensure!(ctx.contains_key("offers"), "offers missing");
        anyhow::ensure!(ctx.contains_key("user_preferences"), "preferences missing");
        ctx.insert("seen", true);
        Ok(Action::Default)
    }));
    builder.connect(a, b);
    let mut ctx = Context::new();

    builder.build().unwrap().run(&mut ctx).unwrap();

    assert_context_keys(&ctx, &["offers", "user_preferences", "seen"]);
}

#[test]
fn test_retry_bound_then_exhausted_error() {
    let mut builder = PipelineBuilder::new("retry");
    builder.add(Node::new("flaky", ScriptedUnit::always_failing("out")).with_max_attempts(3));
    let pipeline = builder.build().unwrap();
    let mut ctx = Context::new();

    let err = pipeline.run(&mut ctx).unwrap_err();

    match err {
        FlowError::RetriesExhausted(err) => {
            assert_eq!(err.node, "flaky");
            assert_eq!(err.attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(ctx.is_empty());
}

#[test]
fn test_retry_bound_with_fallback() {
    let node = Node::new(
        "scoring",
        ScriptedUnit::always_failing("score").with_fallback("degraded"),
    )
    .with_max_attempts(2);
    let mut builder = PipelineBuilder::new("fallback");
    builder.add(node);
    let pipeline = builder.build().unwrap();
    let mut ctx = Context::new();

    pipeline.run(&mut ctx).unwrap();

    assert_context_value(&ctx, "score", &json!("degraded"));
}

#[test]
fn test_fallback_result_reaches_finalize() {
    let node = Node::new(
        "scoring",
        ScriptedUnit::always_failing("score").with_fallback("degraded"),
    )
    .with_max_attempts(2);

    let mut ctx = Context::new();
    node.run(&mut ctx).unwrap();

    assert_eq!(node.unit().attempts(), 2);
    assert_eq!(node.unit().finalized(), vec![json!("degraded")]);
}

#[test]
fn test_failure_stops_pipeline_and_keeps_partial_context() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mut builder = PipelineBuilder::new("partial");
    let first = builder.add(Node::new("first", ScriptedUnit::new("first", 1)));
    let broken = builder.add(Node::new("broken", ScriptedUnit::always_failing("broken")));
    let never = builder.add(tracer("never", &trace));
    builder.connect(first, broken).connect(broken, never);
    let mut ctx = Context::new();

    let err = builder.build().unwrap().run(&mut ctx).unwrap_err();

    assert_eq!(err.node(), Some("broken"));
    assert_context_keys(&ctx, &["first"]);
    assert!(trace.lock().is_empty());
}

#[test]
fn test_unmatched_action_terminates_normally() {
    let mut builder = PipelineBuilder::new("single");
    builder.add(Node::new("only", ScriptedUnit::new("count", 1).returning("nowhere")));
    let pipeline = builder.build().unwrap();
    let mut ctx = Context::new();

    let action = pipeline.run(&mut ctx).unwrap();

    assert_eq!(action, Action::named("nowhere"));
    assert_eq!(ctx.to_value(), json!({"count": 1}));
}

#[test]
fn test_branching_follows_returned_action() {
    let mut builder = PipelineBuilder::new("branch");
    let decide = builder.add(FnNode::new("decide", |ctx: &mut Context| {
        let salary: i64 = ctx.get_as("salary")?;
        Ok(if salary > 100 { "accept" } else { "reject" }.into())
    }));
    let accept = builder.add(Node::new("accept", ScriptedUnit::new("decision", "accepted")));
    let reject = builder.add(Node::new("reject", ScriptedUnit::new("decision", "rejected")));
    builder
        .connect_on(decide, "accept", accept)
        .connect_on(decide, "reject", reject);
    let pipeline = builder.build().unwrap();

    let mut high = Context::from_value(json!({"salary": 150})).unwrap();
    pipeline.run(&mut high).unwrap();
    assert_context_value(&high, "decision", &json!("accepted"));

    let mut low = Context::from_value(json!({"salary": 50})).unwrap();
    pipeline.run(&mut low).unwrap();
    assert_context_value(&low, "decision", &json!("rejected"));
}

#[test]
fn test_reconnecting_an_action_overwrites() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mut builder = PipelineBuilder::new("overwrite");
    let a = builder.add(tracer("a", &trace));
    let b = builder.add(tracer("b", &trace));
    let c = builder.add(tracer("c", &trace));
    builder.connect(a, b).connect_on(a, "default", c);

    builder.build().unwrap().run(&mut Context::new()).unwrap();

    assert_eq!(*trace.lock(), vec!["a", "c"]);
}

#[test]
fn test_explicit_start_node() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mut builder = PipelineBuilder::new("start");
    let a = builder.add(tracer("a", &trace));
    let b = builder.add(tracer("b", &trace));
    builder.connect(a, b).start(b);

    builder.build().unwrap().run(&mut Context::new()).unwrap();

    assert_eq!(*trace.lock(), vec!["b"]);
}

#[test]
fn test_cycle_hits_step_limit() {
    let mut builder = PipelineBuilder::new("loop");
    let spin = builder.add(FnNode::new("spin", |ctx: &mut Context| {
        let n: i64 = ctx.get_or("n", 0);
        ctx.insert("n", n + 1);
        Ok(Action::Default)
    }));
    builder.connect(spin, spin).with_max_steps(5);
    let mut ctx = Context::new();

    let err = builder.build().unwrap().run(&mut ctx).unwrap_err();

    assert!(matches!(err, FlowError::StepLimitExceeded { limit: 5, .. }));
    assert_context_value(&ctx, "n", &json!(5));
}

#[test]
fn test_cycle_with_exit_action() {
    let mut builder = PipelineBuilder::new("countdown");
    let tick = builder.add(FnNode::new("tick", |ctx: &mut Context| {
        let n: i64 = ctx.get_as("n")?;
        ctx.insert("n", n - 1);
        Ok(if n > 1 { Action::Default } else { Action::named("finished") })
    }));
    builder.connect(tick, tick);
    let mut ctx = Context::from_value(json!({"n": 3})).unwrap();

    let action = builder.build().unwrap().run(&mut ctx).unwrap();

    assert_eq!(action.as_str(), "finished");
    assert_context_value(&ctx, "n", &json!(0));
}

#[test]
fn test_nested_pipeline_action_drives_outer_edges() {
    let mut inner = PipelineBuilder::new("inner");
    inner.add(Node::new("classify", ScriptedUnit::new("class", "senior").returning("senior")));
    let inner = inner.build().unwrap();

    let mut outer = PipelineBuilder::new("outer");
    let sub = outer.add(inner);
    let senior = outer.add(Node::new("senior", ScriptedUnit::new("track", "senior-track")));
    let junior = outer.add(Node::new("junior", ScriptedUnit::new("track", "junior-track")));
    outer
        .connect_on(sub, "senior", senior)
        .connect_on(sub, "junior", junior);
    let mut ctx = Context::new();

    outer.build().unwrap().run(&mut ctx).unwrap();

    assert_eq!(ctx.to_value(), json!({"class": "senior", "track": "senior-track"}));
}

#[test]
fn test_nested_chains_compose() {
    let mut outer = PipelineBuilder::new("analysis");
    let first = outer.add(x_y_done_pipeline());
    let after = outer.add(Node::new("z", Increment { from: "y", to: "z" }));
    outer.connect(first, after);
    let mut ctx = Context::new();

    outer.build().unwrap().run(&mut ctx).unwrap();

    assert_context_value(&ctx, "z", &json!(3));
    assert_context_keys(&ctx, &["x", "y", "done", "z"]);
}

struct Doubles;

impl BatchUnit for Doubles {
    type Item = Value;
    type Output = Value;

    fn prepare(&self, ctx: &Context) -> anyhow::Result<Vec<Value>> {
        ctx.get_as("offers")
    }

    fn compute(&self, offer: &Value) -> anyhow::Result<Batched<Value>> {
        let id = offer["offer_id"].clone();
        let salary = offer["salary"].as_i64().unwrap_or_default();
        Ok(Batched::Many(vec![json!({"offer_id": id, "doubled": salary * 2})]))
    }

    fn finalize(
        &self,
        ctx: &mut Context,
        items: Vec<Value>,
        outputs: Vec<Value>,
    ) -> anyhow::Result<Action> {
        let lookup = crate::nodes::index_by(outputs, |r| r["offer_id"].to_string());
        let merged: Vec<Value> = items
            .into_iter()
            .map(|mut offer| {
                let key = offer["offer_id"].to_string();
                if let Some(result) = lookup.get(&key) {
                    offer["doubled"] = result["doubled"].clone();
                }
                offer
            })
            .collect();
        ctx.insert("offers", merged);
        Ok(Action::Default)
    }
}

#[test]
fn test_batch_cardinality_in_pipeline() {
    let mut builder = PipelineBuilder::new("batch");
    builder.add(BatchNode::new("double", Doubles));
    let mut ctx = Context::from_value(json!({"offers": [
        {"offer_id": "a", "salary": 10},
        {"offer_id": "b", "salary": 20},
        {"offer_id": "c", "salary": 30}
    ]}))
    .unwrap();

    builder.build().unwrap().run(&mut ctx).unwrap();

    assert_context_value(
        &ctx,
        "offers",
        &json!([
            {"offer_id": "a", "salary": 10, "doubled": 20},
            {"offer_id": "b", "salary": 20, "doubled": 40},
            {"offer_id": "c", "salary": 30, "doubled": 60}
        ]),
    );
}

#[test]
fn test_events_follow_run_lifecycle() {
    let sink = Arc::new(CollectingEventSink::new());
    let mut builder = PipelineBuilder::new("events");
    let a = builder.add(Node::new("a", ScriptedUnit::new("a", 1)));
    let b = builder.add(Node::new("b", ScriptedUnit::new("b", 2)));
    builder
        .connect(a, b)
        .with_event_sink(Arc::clone(&sink) as Arc<dyn EventSink>);

    builder.build().unwrap().run(&mut Context::new()).unwrap();

    assert_eq!(
        sink.event_types(),
        vec![
            PIPELINE_STARTED,
            NODE_STARTED,
            NODE_COMPLETED,
            NODE_STARTED,
            NODE_COMPLETED,
            PIPELINE_COMPLETED,
        ]
    );
    let events = sink.events();
    let run_id = events[0].1.as_ref().map(|d| d["run_id"].clone());
    assert!(events.iter().all(|(_, d)| d.as_ref().map(|d| d["run_id"].clone()) == run_id));
    assert_eq!(events[3].1.as_ref().map(|d| d["node"].clone()), Some(json!("b")));
}

#[test]
fn test_failed_run_emits_failure_events() {
    let mut sink = MockEventSink::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    sink.expect_try_emit()
        .returning(move |event_type, _| recorded.lock().push(event_type.to_string()));
    sink.expect_emit().never();

    let mut builder = PipelineBuilder::new("failing");
    builder.add(Node::new("broken", ScriptedUnit::always_failing("x")));
    builder.with_event_sink(Arc::new(sink));

    let result = builder.build().unwrap().run(&mut Context::new());

    assert!(result.is_err());
    assert_eq!(
        *seen.lock(),
        vec![PIPELINE_STARTED, NODE_STARTED, NODE_FAILED, PIPELINE_FAILED]
    );
}

#[tokio::test]
async fn test_async_pipeline_end_to_end() {
    let mut builder = AsyncPipeline::builder("async-x-y-done");
    let sync_chain = builder.add(x_y_done_pipeline());
    let batch = builder.add(AsyncBatchNode::new(
        "echo",
        SleepyBatchUnit::new(Duration::from_millis(5)),
    ));
    builder.connect(sync_chain, batch);
    let mut ctx = Context::from_value(json!({"items": ["a", "b"]})).unwrap();

    builder.build().unwrap().run(&mut ctx).await.unwrap();

    assert_context_value(&ctx, "done", &json!(true));
    assert_context_value(&ctx, "results", &json!(["a", "b"]));
}

#[tokio::test]
async fn test_async_batch_speed_up_in_pipeline() {
    let mut builder = AsyncPipeline::builder("research");
    builder.add(AsyncBatchNode::new(
        "research",
        SleepyBatchUnit::new(Duration::from_millis(100)),
    ));
    let pipeline = builder.build().unwrap();
    let mut ctx = Context::from_value(json!({"items": [1, 2, 3, 4, 5]})).unwrap();

    let started = Instant::now();
    pipeline.run(&mut ctx).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(300), "took {elapsed:?}");
    assert_context_value(&ctx, "results", &json!([1, 2, 3, 4, 5]));
}

#[tokio::test]
async fn test_async_pipeline_runs_nodes_sequentially() {
    let sink = Arc::new(CollectingEventSink::new());
    let mut builder = AsyncPipeline::builder("sequential");
    let a = builder.add(AsyncBatchNode::new(
        "first",
        SleepyBatchUnit::new(Duration::from_millis(10)),
    ));
    let b = builder.add(Node::new("second", ScriptedUnit::new("second", true)));
    builder
        .connect(a, b)
        .with_event_sink(Arc::clone(&sink) as Arc<dyn EventSink>);
    let mut ctx = Context::from_value(json!({"items": [1]})).unwrap();

    builder.build().unwrap().run(&mut ctx).await.unwrap();

    let nodes: Vec<String> = sink
        .events_of_type("node.")
        .into_iter()
        .map(|(t, d)| format!("{t}:{}", d.map(|d| d["node"].clone()).unwrap_or_default()))
        .collect();
    assert_eq!(
        nodes,
        vec![
            "node.started:\"first\"",
            "node.completed:\"first\"",
            "node.started:\"second\"",
            "node.completed:\"second\"",
        ]
    );
}

#[tokio::test]
async fn test_async_pipeline_nested_in_async_pipeline() {
    let mut inner = AsyncPipeline::builder("inner");
    inner.add(Node::new("mark", ScriptedUnit::new("inner", 1).returning("next")));
    let inner = inner.build().unwrap();

    let mut outer = AsyncPipeline::builder("outer");
    let sub = outer.add(inner);
    let tail = outer.add(Node::new("tail", ScriptedUnit::new("outer", 2)));
    outer.connect_on(sub, "next", tail);
    let outer = outer.build().unwrap();
    let mut ctx = Context::new();

    let action = outer.run_async(&mut ctx).await.unwrap();

    assert!(action.is_default());
    assert_eq!(ctx.to_value(), json!({"inner": 1, "outer": 2}));
}

#[test]
fn test_sync_pipeline_is_a_step() {
    fn run_step(step: &dyn Step, ctx: &mut Context) -> Action {
        step.run(ctx).unwrap()
    }

    let mut ctx = Context::new();
    run_step(&x_y_done_pipeline(), &mut ctx);
    assert_context_value(&ctx, "done", &json!(true));
}
