use std::sync::Arc;

use juliacoder::agent::graph::nodes;
use juliacoder::agent::human::{DecisionRequest, HumanDecision, ReviewCheckpoint};
use juliacoder::agent::session::{CodingAgent, PendingTurn, TurnStatus};
use juliacoder::agent::{ConversationState, TurnOutcome};
use juliacoder::runtime::component::ScriptedChatModel;
use juliacoder::runtime::error::ResumeCommand;
use juliacoder::runtime::executor::ExecutionResult;
use juliacoder::runtime::message::MessageRole;
use juliacoder::runtime::session::CheckpointStore;
use futures::executor::block_on;
use serde_json::json;

use crate::helpers::events::EventLog;
use crate::helpers::mocks::{
    agent_graph, code_reply, human_config, request, RecordingSandbox, ScriptedPresenter,
};

fn foo_model() -> Arc<ScriptedChatModel> {
    Arc::new(ScriptedChatModel::new(
        "mock",
        vec![code_reply("Call bar.", "using Foo", "bar()")],
    ))
}

#[test]
fn edit_replaces_code_and_is_logged_before_validation() {
    let model = foo_model();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let events = EventLog::new();
    let graph = agent_graph(human_config(3), &model, &sandbox, &events);

    let (checkpoint, interrupts) = match block_on(graph.invoke_resumable(request("run bar"))).expect("run") {
        ExecutionResult::Interrupted { checkpoint, interrupts } => (checkpoint, interrupts),
        ExecutionResult::Complete(_) => panic!("expected review interrupt"),
    };
    assert_eq!(checkpoint.next_node, nodes::HUMAN_CHECK);
    assert!(sandbox.executed().is_empty());
    let review: DecisionRequest = serde_json::from_value(interrupts[0].value.clone()).expect("request");
    assert_eq!(review.checkpoint, ReviewCheckpoint::CheckCode);
    assert_eq!(review.args["code"], "bar()");

    let command = ResumeCommand::new(json!({"type": "edit", "payload": {"code": "x = 1"}}))
        .for_interrupt(interrupts[0].id.clone());
    let state = match block_on(graph.resume(checkpoint, command)).expect("resume") {
        ExecutionResult::Complete(state) => state,
        ExecutionResult::Interrupted { .. } => panic!("expected completion"),
    };

    let code = state.code.clone().expect("code");
    assert_eq!(code.code, "x = 1");
    assert_eq!(code.imports, "using Foo");
    assert_eq!(
        sandbox.executed(),
        vec!["using Foo".to_string(), "using Foo\nx = 1".to_string()]
    );
    let edit_note = state
        .messages
        .iter()
        .position(|m| m.text_content().starts_with("Code edited during review"))
        .expect("edit message");
    assert_eq!(state.messages[edit_note].role, MessageRole::Assistant);
    assert!(state.messages[edit_note].text_content().contains("x = 1"));
    assert_eq!(state.outcome, Some(TurnOutcome::Validated));

    let kinds = events.kinds();
    assert_eq!(kinds.first().map(String::as_str), Some("run_started"));
    assert!(kinds.iter().any(|kind| kind == "run_paused"));
    assert!(kinds.iter().any(|kind| kind == "run_resumed"));
    assert_eq!(kinds.last().map(String::as_str), Some("run_completed"));
}

#[test]
fn ignore_skips_validation() {
    let model = foo_model();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let presenter = Arc::new(ScriptedPresenter::new(vec![HumanDecision::ignore()]));
    let agent = CodingAgent::new(
        agent_graph(human_config(3), &model, &sandbox, &EventLog::new()),
        human_config(3),
    )
    .with_presenter(presenter.clone());

    let state = block_on(agent.run_turn(ConversationState::new("s1"), "run bar")).expect("turn");

    assert!(sandbox.executed().is_empty());
    assert_eq!(presenter.requests().len(), 1);
    assert_eq!(state.outcome, Some(TurnOutcome::ValidationSkipped));
}

#[test]
fn edit_without_code_falls_back_to_ignore() {
    let model = foo_model();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let presenter = Arc::new(ScriptedPresenter::new(vec![HumanDecision::edit(
        "looks fine to me",
    )]));
    let agent = CodingAgent::new(
        agent_graph(human_config(3), &model, &sandbox, &EventLog::new()),
        human_config(3),
    )
    .with_presenter(presenter);

    let state = block_on(agent.run_turn(ConversationState::new("s1"), "run bar")).expect("turn");

    assert_eq!(state.code.expect("code").code, "bar()");
    assert!(sandbox.executed().is_empty());
    assert!(!state
        .messages
        .iter()
        .any(|m| m.text_content().starts_with("Code edited during review")));
    assert_eq!(state.outcome, Some(TurnOutcome::ValidationSkipped));
}

#[test]
fn every_retry_is_reviewed() {
    let model = Arc::new(ScriptedChatModel::new(
        "mock",
        vec![code_reply("", "", "boom()"), code_reply("", "", "1 + 1")],
    ));
    let sandbox = Arc::new(RecordingSandbox::failing_on("boom()", "boom"));
    let presenter = Arc::new(ScriptedPresenter::new(vec![
        HumanDecision::accept(),
        HumanDecision::accept(),
    ]));
    let agent = CodingAgent::new(
        agent_graph(human_config(3), &model, &sandbox, &EventLog::new()),
        human_config(3),
    )
    .with_presenter(presenter.clone());

    let state = block_on(agent.run_turn(ConversationState::new("s1"), "add")).expect("turn");

    let reviewed: Vec<String> = presenter
        .requests()
        .into_iter()
        .map(|request| request.args["code"].clone())
        .collect();
    assert_eq!(reviewed, vec!["boom()".to_string(), "1 + 1".to_string()]);
    assert_eq!(state.outcome, Some(TurnOutcome::Validated));
}

#[test]
fn disallowed_decision_is_a_protocol_error() {
    let model = foo_model();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let presenter = Arc::new(ScriptedPresenter::new(vec![HumanDecision::respond("hi")]));
    let agent = CodingAgent::new(
        agent_graph(human_config(3), &model, &sandbox, &EventLog::new()),
        human_config(3),
    )
    .with_presenter(presenter);

    let err = block_on(agent.run_turn(ConversationState::new("s1"), "run bar")).unwrap_err();
    assert!(err.is_protocol());
}

#[test]
fn resume_with_unknown_interrupt_id_is_rejected() {
    let model = foo_model();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let graph = agent_graph(human_config(3), &model, &sandbox, &EventLog::new());

    let checkpoint = match block_on(graph.invoke_resumable(request("run bar"))).expect("run") {
        ExecutionResult::Interrupted { checkpoint, .. } => checkpoint,
        ExecutionResult::Complete(_) => panic!("expected review interrupt"),
    };
    let command = ResumeCommand::new(json!("accept")).for_interrupt("not-a-real-id");
    let err = block_on(graph.resume(checkpoint, command)).unwrap_err();
    assert!(err.is_protocol());
}

#[test]
fn review_without_presenter_is_a_protocol_error() {
    let model = foo_model();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let agent = CodingAgent::new(
        agent_graph(human_config(3), &model, &sandbox, &EventLog::new()),
        human_config(3),
    );

    let err = block_on(agent.run_turn(ConversationState::new("s1"), "run bar")).unwrap_err();
    assert!(err.is_protocol());
}

#[test]
fn pending_turn_survives_serialization_and_a_new_agent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let model = foo_model();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let first = CodingAgent::new(
        agent_graph(human_config(3), &model, &sandbox, &EventLog::new()),
        human_config(3),
    )
    .with_checkpoint_store(CheckpointStore::new(temp.path()));

    let pending = match block_on(first.start_turn(ConversationState::new("s1"), "run bar")).expect("turn") {
        TurnStatus::Pending(pending) => pending,
        TurnStatus::Complete(_) => panic!("expected pending review"),
    };
    let token = serde_json::to_string(&pending).expect("serialize");
    drop(first);

    let second = CodingAgent::new(
        agent_graph(human_config(3), &model, &sandbox, &EventLog::new()),
        human_config(3),
    )
    .with_checkpoint_store(CheckpointStore::new(temp.path()));
    let stored = second.load_pending("s1").expect("load").expect("stored turn");
    let restored: PendingTurn = serde_json::from_str(&token).expect("deserialize");
    assert_eq!(stored, restored);

    let state = match block_on(second.resume_turn(restored, HumanDecision::accept())).expect("resume") {
        TurnStatus::Complete(state) => state,
        TurnStatus::Pending(_) => panic!("expected completion"),
    };
    assert_eq!(state.outcome, Some(TurnOutcome::Validated));
    assert_eq!(model.call_count(), 1);
    assert!(second.load_pending("s1").expect("load").is_none());
}
