use juliacoder::runtime::constants::{END, START};
use juliacoder::runtime::error::{interrupt, GraphError, ResumeCommand};
use juliacoder::runtime::event::Event;
use juliacoder::runtime::executor::{Checkpoint, ExecutionConfig, ExecutionResult};
use juliacoder::runtime::graph::StateGraph;
use juliacoder::runtime::state::GraphState;
use futures::executor::block_on;
use serde::{Deserialize, Serialize};

use crate::helpers::events::EventLog;

#[derive(Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
struct PauseState {
    steps: usize,
    resume: Option<serde_json::Value>,
}

impl GraphState for PauseState {
    fn set_resume(&mut self, node: &str, value: serde_json::Value) {
        if node == "pause" {
            self.resume = Some(value);
        }
    }
}

async fn pause_node(state: PauseState) -> Result<PauseState, GraphError> {
    if state.resume.is_some() {
        return Ok(state);
    }
    interrupt("paused", "pause")
}

async fn finish_node(mut state: PauseState) -> Result<PauseState, GraphError> {
    state.steps += 1;
    Ok(state)
}

fn pause_graph(events: &EventLog) -> juliacoder::runtime::executor::CompiledGraph<PauseState> {
    let mut graph = StateGraph::<PauseState>::new();
    graph.add_node("pause", pause_node);
    graph.add_node("finish", finish_node);
    graph.add_edge(START, "pause");
    graph.add_edge("pause", "finish");
    graph.add_edge("finish", END);
    graph
        .compile()
        .expect("compile")
        .with_config(ExecutionConfig::new().with_run_event_sink(events.sink()))
}

#[test]
fn pause_and_resume_from_checkpoint() {
    let events = EventLog::new();
    let compiled = pause_graph(&events);

    let result = block_on(compiled.invoke_resumable(PauseState::default())).expect("run");
    let checkpoint = match result {
        ExecutionResult::Interrupted { checkpoint, .. } => checkpoint,
        _ => panic!("expected interrupt"),
    };

    let resumed = block_on(compiled.resume(checkpoint, ResumeCommand::new("continue")))
        .expect("resume");

    let final_state = match resumed {
        ExecutionResult::Complete(state) => state,
        _ => panic!("expected completion"),
    };

    assert_eq!(final_state.steps, 1);
    assert_eq!(final_state.resume, Some(serde_json::json!("continue")));
    assert_eq!(
        events.kinds(),
        vec!["run_started", "run_paused", "run_resumed", "run_completed"]
    );
}

#[test]
fn checkpoint_resumes_after_a_json_round_trip() {
    let events = EventLog::new();
    let compiled = pause_graph(&events);

    let checkpoint = match block_on(compiled.invoke_resumable(PauseState::default())).expect("run") {
        ExecutionResult::Interrupted { checkpoint, .. } => checkpoint,
        _ => panic!("expected interrupt"),
    };
    let json = serde_json::to_string(&checkpoint).expect("serialize");
    let restored: Checkpoint<PauseState> = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(restored, checkpoint);

    let interrupt_id = restored.pending_interrupts[0].id.clone();
    let resumed = block_on(compiled.resume(
        restored,
        ResumeCommand::new(true).for_interrupt(interrupt_id),
    ))
    .expect("resume");
    assert!(resumed.is_complete());
    assert_eq!(
        events.count(|event| matches!(event, Event::RunPaused { .. })),
        1
    );
}

#[test]
fn invoke_surfaces_interrupts_as_errors() {
    let events = EventLog::new();
    let compiled = pause_graph(&events);
    match block_on(compiled.invoke(PauseState::default())) {
        Err(GraphError::Interrupted(interrupts)) => assert_eq!(interrupts[0].node, "pause"),
        other => panic!("expected interrupt, got {other:?}"),
    }
}
