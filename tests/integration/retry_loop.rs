use std::sync::Arc;

use juliacoder::agent::prompt::RETRY_INSTRUCTION;
use juliacoder::agent::{AgentGraphBuilder, FileCodeWriter, TurnOutcome, ValidationPhase};
use juliacoder::runtime::component::{ScriptedChatModel, ScriptedReply};
use juliacoder::runtime::error::GraphError;
use juliacoder::runtime::event::Event;
use juliacoder::runtime::message::MessageRole;
use futures::executor::block_on;

use crate::helpers::events::EventLog;
use crate::helpers::mocks::{agent_graph, code_reply, config, request, RecordingSandbox};

#[test]
fn always_failing_code_stops_after_max_iterations() {
    let model = Arc::new(ScriptedChatModel::new(
        "mock",
        vec![code_reply("Try this.", "", "boom()")],
    ));
    let sandbox = Arc::new(RecordingSandbox::failing_on("boom()", "UndefVarError: `boom` not defined"));
    let events = EventLog::new();
    let graph = agent_graph(config(3), &model, &sandbox, &events);

    let state = block_on(graph.invoke(request("call boom"))).expect("run");

    assert_eq!(model.call_count(), 3);
    assert_eq!(sandbox.executed().len(), 3);
    assert_eq!(state.iterations, 3);
    assert!(state.error);
    assert_eq!(state.outcome, Some(TurnOutcome::ForcedStop));
    let closing = state.messages.last().expect("closing message").text_content();
    assert!(closing.starts_with("Best effort, unresolved"));
    assert!(closing.contains("Last error (execution check): UndefVarError"));
    assert_eq!(
        events.count(|event| matches!(event, Event::ValidationFinished { failed: true, .. })),
        3
    );
}

#[test]
fn prose_answer_finishes_without_validation() {
    let model = Arc::new(ScriptedChatModel::new(
        "mock",
        vec![ScriptedReply::text("Julia arrays are 1-indexed.")],
    ));
    let sandbox = Arc::new(RecordingSandbox::passing());
    let events = EventLog::new();
    let graph = agent_graph(config(3), &model, &sandbox, &events);

    let state = block_on(graph.invoke(request("how are arrays indexed?"))).expect("run");

    assert!(sandbox.executed().is_empty());
    assert_eq!(state.iterations, 1);
    assert_eq!(state.outcome, Some(TurnOutcome::NoCode));
    let code = state.code.expect("code block");
    assert!(code.imports.is_empty() && code.code.is_empty());
    assert_eq!(
        state.messages.last().map(|m| m.text_content()),
        Some("Julia arrays are 1-indexed.".to_string())
    );
}

#[test]
fn runtime_failure_feeds_back_and_retries() {
    let model = Arc::new(ScriptedChatModel::new(
        "mock",
        vec![
            code_reply("Average it.", "using Statistics", "boom()"),
            code_reply("Fixed.", "using Statistics", "mean([1, 2, 3])"),
        ],
    ));
    let sandbox = Arc::new(RecordingSandbox::failing_on("boom()", "UndefVarError: `boom` not defined"));
    let events = EventLog::new();
    let graph = agent_graph(config(3), &model, &sandbox, &events);

    let state = block_on(graph.invoke(request("average of 1..3"))).expect("run");

    assert_eq!(state.iterations, 2);
    assert!(!state.error);
    assert_eq!(state.outcome, Some(TurnOutcome::Validated));
    assert_eq!(
        sandbox.executed(),
        vec![
            "using Statistics".to_string(),
            "using Statistics\nboom()".to_string(),
            "using Statistics".to_string(),
            "using Statistics\nmean([1, 2, 3])".to_string(),
        ]
    );

    let retry = &model.requests()[1].messages;
    let feedback = &retry[retry.len() - 2];
    assert_eq!(feedback.role, MessageRole::User);
    assert!(feedback
        .text_content()
        .starts_with("Your solution failed the execution check:\nUndefVarError"));
    assert_eq!(retry.last().map(|m| m.text_content()), Some(RETRY_INSTRUCTION.to_string()));

    let phases: Vec<Option<String>> = events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::ValidationFinished { phase, .. } => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![Some("execution".to_string()), None]);
}

#[test]
fn import_failure_never_runs_the_code() {
    let model = Arc::new(ScriptedChatModel::new(
        "mock",
        vec![code_reply("", "using MissingPkg", "MissingPkg.go()")],
    ));
    let sandbox = Arc::new(RecordingSandbox::failing_on(
        "MissingPkg",
        "ArgumentError: Package MissingPkg not found in current path",
    ));
    let events = EventLog::new();
    let graph = agent_graph(config(1), &model, &sandbox, &events);

    let state = block_on(graph.invoke(request("use MissingPkg"))).expect("run");

    assert_eq!(sandbox.executed(), vec!["using MissingPkg".to_string()]);
    let result = state.last_validation.expect("validation result");
    assert_eq!(result.phase, ValidationPhase::Imports);
    assert!(result.failed);
    assert_eq!(state.outcome, Some(TurnOutcome::ForcedStop));
}

#[test]
fn messages_are_append_only_across_the_loop() {
    let model = Arc::new(ScriptedChatModel::new(
        "mock",
        vec![code_reply("", "", "boom()"), code_reply("", "", "1 + 1")],
    ));
    let sandbox = Arc::new(RecordingSandbox::failing_on("boom()", "boom"));
    let events = EventLog::new();
    let graph = agent_graph(config(3), &model, &sandbox, &events);

    let initial = request("add numbers");
    let state = block_on(graph.invoke(initial.clone())).expect("run");

    assert!(state.messages.len() > initial.messages.len());
    assert_eq!(&state.messages[..initial.messages.len()], &initial.messages[..]);
    // Each model request saw the previous one's history unchanged.
    let requests = model.requests();
    let first = &requests[0].messages[1..];
    let second = &requests[1].messages[1..];
    assert_eq!(&second[..first.len()], first);
}

#[test]
fn model_failure_is_reported_and_counts_as_attempt() {
    let model = Arc::new(ScriptedChatModel::new(
        "mock",
        vec![
            ScriptedReply::Failure("rate limited".to_string()),
            code_reply("", "", "1 + 1"),
        ],
    ));
    let sandbox = Arc::new(RecordingSandbox::passing());
    let events = EventLog::new();
    let graph = agent_graph(config(3), &model, &sandbox, &events);

    let state = block_on(graph.invoke(request("add"))).expect("run");

    assert_eq!(state.iterations, 2);
    assert_eq!(state.outcome, Some(TurnOutcome::Validated));
    assert!(state
        .messages
        .iter()
        .any(|m| m.role == MessageRole::Assistant
            && m.text_content().contains("could not generate a response")));
    assert_eq!(events.count(|event| matches!(event, Event::Error { .. })), 1);
}

#[test]
fn model_failing_every_time_ends_the_request() {
    let model = Arc::new(ScriptedChatModel::new(
        "mock",
        vec![ScriptedReply::Failure("offline".to_string())],
    ));
    let sandbox = Arc::new(RecordingSandbox::passing());
    let events = EventLog::new();
    let graph = agent_graph(config(2), &model, &sandbox, &events);

    let state = block_on(graph.invoke(request("anything"))).expect("run");

    assert_eq!(model.call_count(), 2);
    assert_eq!(state.outcome, Some(TurnOutcome::GenerationFailed));
    assert!(sandbox.executed().is_empty());
}

#[test]
fn sandbox_infrastructure_error_is_an_execution_failure() {
    let model = Arc::new(ScriptedChatModel::new("mock", vec![code_reply("", "", "1")]));
    let sandbox = Arc::new(RecordingSandbox::new(|_| {
        Err(GraphError::ExecutionError {
            node: "sandbox".to_string(),
            message: "interpreter crashed".to_string(),
        })
    }));
    let events = EventLog::new();
    let graph = agent_graph(config(1), &model, &sandbox, &events);

    let state = block_on(graph.invoke(request("one"))).expect("run");

    let result = state.last_validation.expect("validation result");
    assert_eq!(result.phase, ValidationPhase::Execution);
    assert!(result.message.contains("interpreter crashed"));
    assert_eq!(state.outcome, Some(TurnOutcome::ForcedStop));
}

#[test]
fn unreachable_interpreter_aborts_the_turn() {
    let model = Arc::new(ScriptedChatModel::new("mock", vec![code_reply("", "", "1")]));
    let sandbox = Arc::new(RecordingSandbox::new(|_| {
        Err(GraphError::io(
            "starting julia",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        ))
    }));
    let events = EventLog::new();
    let graph = agent_graph(config(3), &model, &sandbox, &events);

    let err = block_on(graph.invoke(request("one"))).unwrap_err();
    assert!(err.is_fatal_io());
    assert_eq!(events.count(|event| matches!(event, Event::RunFailed { .. })), 1);
}

#[test]
fn validated_code_is_written_to_the_output_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("out/solution.jl");
    let model = Arc::new(ScriptedChatModel::new(
        "mock",
        vec![code_reply("Sum.", "using Statistics", "mean([1, 2])")],
    ));
    let sandbox = Arc::new(RecordingSandbox::passing());
    let graph = AgentGraphBuilder::new(config(3), model.clone(), sandbox.clone())
        .with_writer(Arc::new(FileCodeWriter::new(&path)))
        .build()
        .expect("build");

    let state = block_on(graph.invoke(request("mean"))).expect("run");

    assert_eq!(
        std::fs::read_to_string(&path).expect("read output"),
        "using Statistics\n\nmean([1, 2])\n"
    );
    let closing = state.messages.last().expect("closing").text_content();
    assert!(closing.contains(&path.display().to_string()));
}
