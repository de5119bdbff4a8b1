//! End-to-end tests for suspending runs on human review and resuming them.
//!
//! ```bash
//! cargo test -p trellis-foundation --test review_flow
//! ```

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::paced_generator::PacedGenerator;
use common::tasks;
use serde_json::json;
use tokio::sync::mpsc;
use trellis_foundation::workflow::{FileCheckpointStore, FnNode, HumanReviewNode, StateGraphImpl};
use trellis_foundation::workflows::{LLM_CALL, Task, WorkflowState, report_graph};
use trellis_kernel::workflow::{
    CheckpointStore, Command, CompiledGraph, END, ExecutionEvent, JsonState, ResponseKind,
    ResumeToken, ReviewResponse, RunOutcome, START, StateGraph, Suspension, WorkflowError,
};

fn suspended<S>(outcome: RunOutcome<S>) -> Suspension {
    match outcome {
        RunOutcome::Suspended(suspension) => suspension,
        RunOutcome::Completed { .. } => panic!("expected the run to suspend"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// § 1  Suspension inside a generation
// ─────────────────────────────────────────────────────────────────────────────

/// Every worker of the generation asks for review; nothing is generated yet.
#[tokio::test]
async fn every_reviewed_worker_suspends() {
    let generator = Arc::new(PacedGenerator::new(tasks(3)));
    let compiled = report_graph(generator.clone(), true).compile().unwrap();

    let suspension = suspended(
        compiled
            .invoke(WorkflowState::new("tides"), None)
            .await
            .unwrap(),
    );

    assert_eq!(suspension.pending.len(), 3);
    for (i, pending) in suspension.pending.iter().enumerate() {
        assert_eq!(pending.node, LLM_CALL);
        assert_eq!(pending.generation, Some(1));
        assert_eq!(pending.index, Some(i));
        assert_eq!(pending.request.args["name"], format!("Task {}", i));
    }
    assert_eq!(generator.section_calls(), 0);
}

/// Accepting every review completes the run with generated sections in
/// plan order, whatever order the reviews were answered in.
#[tokio::test]
async fn accepting_all_reviews_completes_the_run() {
    let generator = Arc::new(PacedGenerator::new(tasks(3)));
    let compiled = report_graph(generator.clone(), true).compile().unwrap();

    let suspension = suspended(
        compiled
            .invoke(WorkflowState::new("tides"), None)
            .await
            .unwrap(),
    );
    let tokens: Vec<ResumeToken> = suspension.tokens().into_iter().cloned().collect();

    let mut outcome = None;
    for token in tokens.iter().rev() {
        outcome = Some(compiled.resume(token, ReviewResponse::Accept).await.unwrap());
    }

    let state = outcome.unwrap().into_state().unwrap();
    assert_eq!(
        state.completed_sections,
        vec!["Section about Task 0", "Section about Task 1", "Section about Task 2"]
    );
    assert_eq!(generator.section_calls(), 3);
}

/// A `respond` answer becomes the section text; the wrapped writer never runs
/// for that task.
#[tokio::test]
async fn respond_supplies_section_without_calling_the_writer() {
    let generator = Arc::new(PacedGenerator::new(tasks(1)));
    let compiled = report_graph(generator.clone(), true).compile().unwrap();

    let suspension = suspended(
        compiled
            .invoke(WorkflowState::new("tides"), None)
            .await
            .unwrap(),
    );
    let outcome = compiled
        .resume(
            &suspension.pending[0].token,
            ReviewResponse::respond("Written by hand"),
        )
        .await
        .unwrap();

    let state = outcome.into_state().unwrap();
    assert_eq!(state.completed_sections, vec!["Written by hand"]);
    assert_eq!(generator.section_calls(), 0);
    assert!(state.final_report.unwrap().contains("Written by hand"));
}

/// An `edit` answer replaces the task the writer sees.
#[tokio::test]
async fn edit_passes_edited_args_to_the_writer() {
    let generator = Arc::new(PacedGenerator::new(tasks(2)));
    let compiled = report_graph(generator.clone(), true).compile().unwrap();

    let suspension = suspended(
        compiled
            .invoke(WorkflowState::new("tides"), None)
            .await
            .unwrap(),
    );
    let edited = Task::new("Moon Phases", "how the moon drives tides");

    let still_waiting = suspended(
        compiled
            .resume(
                &suspension.pending[0].token,
                ReviewResponse::edit(json!(edited)),
            )
            .await
            .unwrap(),
    );
    assert_eq!(still_waiting.pending.len(), 1);
    assert_eq!(still_waiting.pending[0].index, Some(1));

    let state = compiled
        .resume(&still_waiting.pending[0].token, ReviewResponse::Accept)
        .await
        .unwrap()
        .into_state()
        .unwrap();
    assert_eq!(
        state.completed_sections,
        vec!["Section about Moon Phases", "Section about Task 1"]
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// § 2  Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// An unknown token is reported as not found.
#[tokio::test]
async fn unknown_token_is_not_found() {
    let compiled = report_graph(Arc::new(PacedGenerator::new(tasks(1))), true)
        .compile()
        .unwrap();

    let err = compiled
        .resume(&ResumeToken::from("no-such-token"), ReviewResponse::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

/// A token can be used once.
#[tokio::test]
async fn tokens_are_single_use() {
    let compiled = report_graph(Arc::new(PacedGenerator::new(tasks(2))), true)
        .compile()
        .unwrap();
    let suspension = suspended(
        compiled
            .invoke(WorkflowState::new("tides"), None)
            .await
            .unwrap(),
    );
    let token = suspension.pending[0].token.clone();

    compiled.resume(&token, ReviewResponse::Accept).await.unwrap();
    let err = compiled
        .resume(&token, ReviewResponse::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

/// Resumes delivered concurrently are applied one at a time; exactly one of
/// them completes the run.
#[tokio::test]
async fn concurrent_resumes_complete_once() {
    let generator = Arc::new(PacedGenerator::new(tasks(4)));
    let compiled = report_graph(generator.clone(), true).compile().unwrap();
    let suspension = suspended(
        compiled
            .invoke(WorkflowState::new("tides"), None)
            .await
            .unwrap(),
    );

    let resumes = suspension
        .pending
        .iter()
        .map(|p| compiled.resume(&p.token, ReviewResponse::Accept));
    let outcomes = futures::future::join_all(resumes).await;

    let completed = outcomes
        .into_iter()
        .map(Result::unwrap)
        .filter(RunOutcome::is_completed)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(generator.section_calls(), 4);
}

// ─────────────────────────────────────────────────────────────────────────────
// § 3  Main-path review and protocol errors
// ─────────────────────────────────────────────────────────────────────────────

fn guarded_graph(calls: Arc<AtomicUsize>, allowed: Vec<ResponseKind>) -> StateGraphImpl<JsonState> {
    let body = FnNode::new("book_table", move |state: JsonState, _ctx| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let party = state.as_map()["booking"]["party"].clone();
            Ok(Command::new().update("result", json!(format!("booked for {}", party))))
        }
    })
    .boxed();

    let mut graph = StateGraphImpl::<JsonState>::build("booking");
    graph
        .add_node(
            "book_table",
            Box::new(HumanReviewNode::new(body, "booking", "result").with_allowed(allowed)),
        )
        .add_edge(START, "book_table")
        .add_edge("book_table", END);
    graph
}

fn booking_state() -> JsonState {
    let mut map = serde_json::Map::new();
    map.insert("booking".to_string(), json!({ "party": 2 }));
    JsonState::from_map(map)
}

/// A reviewed main-path node suspends and resumes with the edited args.
#[tokio::test]
async fn main_path_node_resumes_with_edit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let compiled = guarded_graph(calls.clone(), ResponseKind::all())
        .compile()
        .unwrap();

    let suspension = suspended(compiled.invoke(booking_state(), None).await.unwrap());
    assert_eq!(suspension.pending[0].node, "book_table");
    assert_eq!(suspension.pending[0].generation, None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let state = compiled
        .resume(
            &suspension.pending[0].token,
            ReviewResponse::edit(json!({ "party": 6 })),
        )
        .await
        .unwrap()
        .into_state()
        .unwrap();
    assert_eq!(state.as_map()["result"], json!("booked for 6"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// A response kind the request does not allow fails the run.
#[tokio::test]
async fn disallowed_response_is_protocol_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let compiled = guarded_graph(calls.clone(), vec![ResponseKind::Accept])
        .compile()
        .unwrap();

    let suspension = suspended(compiled.invoke(booking_state(), None).await.unwrap());
    let err = compiled
        .resume(
            &suspension.pending[0].token,
            ReviewResponse::respond("no tables left"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WorkflowError::InterruptProtocol { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(compiled.pending_reviews().await.unwrap().is_empty());
}

/// A disallowed response to a reviewed worker names the worker's generation.
#[tokio::test]
async fn disallowed_worker_response_names_generation() {
    use trellis_kernel::workflow::{FanOutEdge, SendCommand};

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let body = FnNode::new("book_table", move |_state: JsonState, _ctx| {
        let calls = counted.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Command::new().update("result", json!("booked")))
        }
    })
    .boxed();

    let mut graph = StateGraphImpl::<JsonState>::build("bookings");
    graph
        .add_node(
            "plan",
            FnNode::new("plan", |_s: JsonState, _c| async {
                Ok(Command::send(vec![SendCommand::new(
                    "book_table",
                    json!({ "booking": { "party": 4 } }),
                )]))
            })
            .boxed(),
        )
        .add_worker(
            "book_table",
            Box::new(
                HumanReviewNode::new(body, "booking", "result")
                    .with_allowed(vec![ResponseKind::Accept]),
            ),
        )
        .add_fan_out("plan", FanOutEdge::new("book_table"))
        .add_edge(START, "plan")
        .add_edge("book_table", END);
    let compiled = graph.compile().unwrap();

    let suspension = suspended(compiled.invoke(JsonState::new(), None).await.unwrap());
    assert_eq!(suspension.pending[0].generation, Some(1));

    let err = compiled
        .resume(&suspension.pending[0].token, ReviewResponse::respond("full"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InterruptProtocol { ref node, generation: Some(1), .. } if node == "book_table"
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// An unsupported response `type` is rejected before reaching the engine.
#[test]
fn unsupported_response_type_is_protocol_error() {
    let err = ReviewResponse::from_value("book_table", json!({ "type": "maybe" })).unwrap_err();
    assert!(matches!(err, WorkflowError::InterruptProtocol { .. }));

    let ok = ReviewResponse::from_value(
        "book_table",
        json!({ "type": "response", "args": "later please" }),
    )
    .unwrap();
    assert_eq!(ok.kind(), ResponseKind::Respond);
}

// ─────────────────────────────────────────────────────────────────────────────
// § 4  Durable checkpoints and events
// ─────────────────────────────────────────────────────────────────────────────

/// A run suspended by one compiled graph is resumed by another reading the
/// same checkpoint directory, as after a process restart.
#[tokio::test]
async fn resume_survives_restart_with_file_store() {
    let dir = tempfile::TempDir::new().unwrap();

    let tokens = {
        let store = Arc::new(FileCheckpointStore::open(dir.path()).await.unwrap());
        let mut graph = report_graph(Arc::new(PacedGenerator::new(tasks(2))), true);
        graph.with_checkpoint_store(store);
        let compiled = graph.compile().unwrap();

        let suspension = suspended(
            compiled
                .invoke(WorkflowState::new("tides"), None)
                .await
                .unwrap(),
        );
        suspension
            .tokens()
            .into_iter()
            .cloned()
            .collect::<Vec<_>>()
    };

    let store = Arc::new(FileCheckpointStore::open(dir.path()).await.unwrap());
    assert_eq!(store.list().await.unwrap().len(), 1);

    let mut graph = report_graph(Arc::new(PacedGenerator::new(tasks(2))), true);
    graph.with_checkpoint_store(store.clone());
    let compiled = graph.compile().unwrap();

    compiled
        .resume(&tokens[0], ReviewResponse::respond("From the first process"))
        .await
        .unwrap();
    let state = compiled
        .resume(&tokens[1], ReviewResponse::Accept)
        .await
        .unwrap()
        .into_state()
        .unwrap();

    assert_eq!(
        state.completed_sections,
        vec!["From the first process", "Section about Task 1"]
    );
    assert!(store.list().await.unwrap().is_empty());
}

/// The event stream brackets the run and reports the review round trip.
#[tokio::test]
async fn events_trace_suspension_and_resume() {
    let (tx, mut rx) = mpsc::channel(256);
    let mut graph = report_graph(Arc::new(PacedGenerator::new(tasks(1))), true);
    graph.with_event_sink(tx);
    let compiled = graph.compile().unwrap();

    let suspension = suspended(
        compiled
            .invoke(WorkflowState::new("tides"), None)
            .await
            .unwrap(),
    );
    compiled
        .resume(&suspension.pending[0].token, ReviewResponse::Accept)
        .await
        .unwrap();
    drop(compiled);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { .. })));
    assert!(matches!(events.last(), Some(ExecutionEvent::RunCompleted { .. })));
    assert!(events.iter().all(|e| e.run_id() == suspension.run_id));

    let kinds: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::GenerationDispatched { .. } => Some("dispatched"),
            ExecutionEvent::Interrupted { .. } => Some("interrupted"),
            ExecutionEvent::Resumed { .. } => Some("resumed"),
            ExecutionEvent::WorkerCompleted { .. } => Some("worker"),
            ExecutionEvent::GenerationJoined { .. } => Some("joined"),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["dispatched", "interrupted", "resumed", "worker", "joined"]
    );
}
