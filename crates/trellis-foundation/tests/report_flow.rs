//! End-to-end tests for the report-writing workflow.
//!
//! These drive `report_graph` through the public API with
//! [`common::paced_generator::PacedGenerator`] standing in for a real
//! generation service, so section completion order can be controlled.
//!
//! ```bash
//! cargo test -p trellis-foundation --test report_flow
//! ```

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::paced_generator::PacedGenerator;
use common::tasks;
use rand::seq::SliceRandom;
use serde_json::json;
use trellis_foundation::workflow::{FnNode, StateGraphImpl};
use trellis_foundation::workflows::{LLM_CALL, Task, WorkflowState, report_graph};
use trellis_kernel::workflow::{
    Command, CompiledGraph, END, JsonState, START, StateGraph, WorkflowError,
};

async fn run_report(generator: Arc<PacedGenerator>, topic: &str) -> Result<WorkflowState, WorkflowError> {
    let compiled = report_graph(generator, false).compile()?;
    let outcome = compiled.invoke(WorkflowState::new(topic), None).await?;
    Ok(outcome.into_state().expect("run without review completes"))
}

// ─────────────────────────────────────────────────────────────────────────────
// § 1  Fan-out cardinality
// ─────────────────────────────────────────────────────────────────────────────

/// Every planned task yields exactly one section, including an empty plan.
#[tokio::test]
async fn one_section_per_planned_task() {
    for n in [0, 1, 3, 7] {
        let generator = Arc::new(PacedGenerator::new(tasks(n)));
        let state = run_report(generator.clone(), "tides").await.unwrap();

        assert_eq!(state.tasks.len(), n);
        assert_eq!(state.completed_sections.len(), n, "plan of {} tasks", n);
        assert_eq!(generator.section_calls(), n);
        assert!(state.final_report.is_some());
    }
}

/// An empty plan still reaches the synthesizer.
#[tokio::test]
async fn empty_plan_produces_report_without_sections() {
    let generator = Arc::new(PacedGenerator::new(Vec::new()));
    let state = run_report(generator, "nothing").await.unwrap();

    let report = state.final_report.unwrap();
    assert!(report.starts_with("# Report on nothing\n\n## Table of Contents"));
    assert!(!report.contains("Section about"));
}

// ─────────────────────────────────────────────────────────────────────────────
// § 2  Output order equals task order
// ─────────────────────────────────────────────────────────────────────────────

/// B finishes first, C second, A last; sections still come out A, B, C.
#[tokio::test]
async fn sections_follow_plan_order_not_completion_order() {
    let plan = vec![
        Task::new("A", "first"),
        Task::new("B", "second"),
        Task::new("C", "third"),
    ];
    let generator = Arc::new(
        PacedGenerator::new(plan)
            .with_delay("A", Duration::from_millis(60))
            .with_delay("B", Duration::from_millis(5))
            .with_delay("C", Duration::from_millis(30)),
    );

    let state = run_report(generator, "letters").await.unwrap();
    assert_eq!(
        state.completed_sections,
        vec!["Section about A", "Section about B", "Section about C"]
    );

    let report = state.final_report.unwrap();
    let a = report.find("## A\n\nSection about A").unwrap();
    let b = report.find("## B\n\nSection about B").unwrap();
    let c = report.find("## C\n\nSection about C").unwrap();
    assert!(a < b && b < c);
}

/// Repeated runs with shuffled completion delays always keep plan order.
#[tokio::test]
async fn ordering_holds_across_shuffled_delays() {
    let plan = tasks(5);
    let expected: Vec<String> = plan
        .iter()
        .map(|t| format!("Section about {}", t.name))
        .collect();
    let mut rng = rand::thread_rng();

    for run in 0..50 {
        let mut delays: Vec<u64> = (0..5).map(|i| i * 4).collect();
        delays.shuffle(&mut rng);

        let mut generator = PacedGenerator::new(plan.clone());
        for (task, delay) in plan.iter().zip(&delays) {
            generator = generator.with_delay(&task.name, Duration::from_millis(*delay));
        }

        let state = run_report(Arc::new(generator), "shuffle").await.unwrap();
        assert_eq!(state.completed_sections, expected, "run {} delays {:?}", run, delays);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// § 3  Failures
// ─────────────────────────────────────────────────────────────────────────────

/// A failing worker fails the run with the worker name and generation; no
/// partial report is produced.
#[tokio::test]
async fn worker_failure_fails_the_run() {
    let generator = Arc::new(
        PacedGenerator::new(tasks(3))
            .with_delay("Task 0", Duration::from_millis(50))
            .failing_on("Task 1"),
    );

    let err = run_report(generator, "fragile").await.unwrap_err();
    match err {
        WorkflowError::NodeBody {
            node, generation, ..
        } => {
            assert_eq!(node, LLM_CALL);
            assert_eq!(generation, Some(1));
        }
        other => panic!("expected node failure, got {:?}", other),
    }
}

/// A node writing a field the schema does not declare fails with a merge
/// error naming the node and field.
#[tokio::test]
async fn unknown_field_is_merge_error() {
    let mut graph = StateGraphImpl::<WorkflowState>::build("bad-writer");
    graph
        .add_node(
            "writer",
            FnNode::new("writer", |_s: WorkflowState, _c| async {
                Ok(Command::new().update("summary", json!("oops")))
            })
            .boxed(),
        )
        .add_edge(START, "writer")
        .add_edge("writer", END);
    let compiled = graph.compile().unwrap();

    let err = compiled
        .invoke(WorkflowState::new("t"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Merge { node: Some(ref n), ref field, .. } if n == "writer" && field == "summary"
    ));
}

/// A worker update the parent schema rejects fails at the barrier with the
/// worker name and its generation.
#[tokio::test]
async fn worker_merge_failure_names_generation() {
    use trellis_foundation::workflows::WorkerState;
    use trellis_kernel::workflow::{FanOutEdge, SendCommand};

    let mut graph = StateGraphImpl::<WorkflowState, WorkerState>::build("bad-worker");
    graph
        .add_node(
            "plan",
            FnNode::new("plan", |_s: WorkflowState, _c| async {
                Ok(Command::send(
                    (0..2)
                        .map(|i| {
                            SendCommand::new(
                                LLM_CALL,
                                json!({ "task": { "name": format!("Task {}", i), "description": "d" } }),
                            )
                        })
                        .collect(),
                ))
            })
            .boxed(),
        )
        .add_worker(
            LLM_CALL,
            FnNode::new(LLM_CALL, |_s: WorkerState, _c| async {
                Ok(Command::new().update("summary", json!("oops")))
            })
            .boxed(),
        )
        .add_fan_out("plan", FanOutEdge::new(LLM_CALL))
        .add_edge(START, "plan")
        .add_edge(LLM_CALL, END);
    let compiled = graph.compile().unwrap();

    let err = compiled
        .invoke(WorkflowState::new("t"), None)
        .await
        .unwrap_err();
    match err {
        WorkflowError::Merge {
            node,
            generation,
            field,
            ..
        } => {
            assert_eq!(node.as_deref(), Some(LLM_CALL));
            assert_eq!(generation, Some(1));
            assert_eq!(field, "summary");
        }
        other => panic!("expected merge error, got {:?}", other),
    }
}

/// A worker may not steer the run with `goto`.
#[tokio::test]
async fn worker_goto_is_routing_error_in_its_generation() {
    use trellis_kernel::workflow::{FanOutEdge, SendCommand};

    let mut graph = StateGraphImpl::<JsonState>::build("steering-worker");
    graph
        .add_node(
            "plan",
            FnNode::new("plan", |_s: JsonState, _c| async {
                Ok(Command::send(vec![SendCommand::new("work", json!({}))]))
            })
            .boxed(),
        )
        .add_worker(
            "work",
            FnNode::new("work", |_s: JsonState, _c| async { Ok(Command::new().goto("plan")) })
                .boxed(),
        )
        .add_fan_out("plan", FanOutEdge::new("work"))
        .add_edge(START, "plan")
        .add_edge("work", END);
    let compiled = graph.compile().unwrap();

    let err = compiled.invoke(JsonState::new(), None).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::Routing { ref node, generation: Some(1), .. } if node == "work"
    ));
}

/// Two appends to an append field leave two elements.
#[tokio::test]
async fn two_appends_leave_two_elements() {
    let mut graph = StateGraphImpl::<WorkflowState>::build("appends");
    graph
        .add_node(
            "first",
            FnNode::new("first", |_s: WorkflowState, _c| async {
                Ok(Command::new().update("completed_sections", json!(["one"])))
            })
            .boxed(),
        )
        .add_node(
            "second",
            FnNode::new("second", |_s: WorkflowState, _c| async {
                Ok(Command::new().update("completed_sections", json!("two")))
            })
            .boxed(),
        )
        .add_edge(START, "first")
        .add_edge("first", "second")
        .add_edge("second", END);
    let compiled = graph.compile().unwrap();

    let state = compiled
        .invoke(WorkflowState::new("t"), None)
        .await
        .unwrap()
        .into_state()
        .unwrap();
    assert_eq!(state.completed_sections, vec!["one", "two"]);
}

/// `final_report` is write-once.
#[tokio::test]
async fn second_final_report_write_is_rejected() {
    let mut graph = StateGraphImpl::<WorkflowState>::build("twice");
    for name in ["first", "second"] {
        graph.add_node(
            name,
            FnNode::new(name, |_s: WorkflowState, _c| async {
                Ok(Command::new().update("final_report", json!("done")))
            })
            .boxed(),
        );
    }
    graph
        .add_edge(START, "first")
        .add_edge("first", "second")
        .add_edge("second", END);
    let compiled = graph.compile().unwrap();

    let err = compiled
        .invoke(WorkflowState::new("t"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Merge { ref field, .. } if field == "final_report"));
}

// ─────────────────────────────────────────────────────────────────────────────
// § 4  Concurrency bound
// ─────────────────────────────────────────────────────────────────────────────

/// With `max_parallelism = 1` workers run one at a time and still merge in
/// dispatch order.
#[tokio::test]
async fn parallelism_of_one_serialises_workers() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trellis_kernel::workflow::{FanOutEdge, GraphConfig, SendCommand};

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (running_w, peak_w) = (running.clone(), peak.clone());

    let mut graph = StateGraphImpl::<JsonState>::build("serial");
    graph
        .add_node(
            "plan",
            FnNode::new("plan", |_s: JsonState, _c| async {
                Ok(Command::send(
                    (0..4).map(|i| SendCommand::new("work", json!({ "i": i }))).collect(),
                ))
            })
            .boxed(),
        )
        .add_worker(
            "work",
            FnNode::new("work", move |s: JsonState, _c| {
                let running = running_w.clone();
                let peak = peak_w.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(Command::new().update("last", s.as_map().get("i").cloned().unwrap_or_default()))
                }
            })
            .boxed(),
        )
        .add_fan_out("plan", FanOutEdge::new("work"))
        .add_edge(START, "plan")
        .add_edge("work", END)
        .with_config(GraphConfig::new().with_max_parallelism(1));
    let compiled = graph.compile().unwrap();

    let state = compiled
        .invoke(JsonState::new(), None)
        .await
        .unwrap()
        .into_state()
        .unwrap();
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(state.as_map()["last"], json!(3));
}
