use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use juliacoder::agent::sandbox::ExecutionOutcome;
use juliacoder::agent::session::{CodingAgent, SessionEnd};
use juliacoder::agent::AgentConfig;
use juliacoder::runtime::component::ScriptedChatModel;
use juliacoder::runtime::error::GraphError;
use futures::executor::block_on;

use crate::helpers::events::EventLog;
use crate::helpers::mocks::{agent_graph, code_reply, config, human_config, RecordingSandbox, ScriptedConsole};

fn session_agent(config: AgentConfig, model: &Arc<ScriptedChatModel>, sandbox: &Arc<RecordingSandbox>) -> CodingAgent {
    CodingAgent::new(
        agent_graph(config.clone(), model, sandbox, &EventLog::new()),
        config,
    )
}

fn one_liner() -> Arc<ScriptedChatModel> {
    Arc::new(ScriptedChatModel::new("mock", vec![code_reply("Adds.", "", "1 + 1")]))
}

#[test]
fn quit_token_ends_the_session_before_any_turn() {
    let model = one_liner();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let agent = session_agent(config(3), &model, &sandbox);
    let mut console = ScriptedConsole::new(&["   ", "QUIT", "never read"]);

    let end = block_on(agent.run_session(&mut console, agent.new_state())).expect("session");

    assert_eq!(end, SessionEnd::Quit);
    assert_eq!(model.call_count(), 0);
    assert!(console.shown.is_empty());
}

#[test]
fn each_turn_shows_its_assistant_messages() {
    let model = one_liner();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let agent = session_agent(config(3), &model, &sandbox);
    let mut console = ScriptedConsole::new(&["add one and one"]);

    let end = block_on(agent.run_session(&mut console, agent.new_state())).expect("session");

    assert_eq!(end, SessionEnd::EndOfInput);
    assert_eq!(console.shown.len(), 2);
    assert!(console.shown[0].contains("```julia\n1 + 1\n```"));
    assert!(console.shown[1].contains("ran successfully"));
}

#[test]
fn fatal_io_is_reported_and_the_session_continues() {
    let model = one_liner();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let sandbox = Arc::new(RecordingSandbox::new(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(GraphError::io(
                "starting julia",
                std::io::Error::new(std::io::ErrorKind::NotFound, "julia not found"),
            ))
        } else {
            Ok(ExecutionOutcome::success("2"))
        }
    }));
    let agent = session_agent(config(3), &model, &sandbox);
    let mut console = ScriptedConsole::new(&["first", "second", "exit"]);

    let end = block_on(agent.run_session(&mut console, agent.new_state())).expect("session");

    assert_eq!(end, SessionEnd::Quit);
    assert!(console.shown[0].starts_with("error: i/o failure while starting julia"));
    assert!(console.shown.last().expect("output").contains("ran successfully"));
    // The aborted turn left no trace in the history the model sees.
    let second = &model.requests()[1].messages;
    assert!(!second.iter().any(|m| m.text_content() == "first"));
}

#[test]
fn protocol_errors_end_the_session() {
    let model = one_liner();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let agent = session_agent(human_config(3), &model, &sandbox);
    let mut console = ScriptedConsole::new(&["needs review"]);

    let err = block_on(agent.run_session(&mut console, agent.new_state())).unwrap_err();
    assert!(err.is_protocol());
}

#[test]
fn history_carries_over_unless_disabled() {
    let model = one_liner();
    let sandbox = Arc::new(RecordingSandbox::passing());
    let agent = session_agent(config(3), &model, &sandbox);
    let mut console = ScriptedConsole::new(&["first question", "second question"]);
    block_on(agent.run_session(&mut console, agent.new_state())).expect("session");
    let second = &model.requests()[1].messages;
    assert!(second.iter().any(|m| m.text_content() == "first question"));

    let model = one_liner();
    let fresh = AgentConfig {
        carry_history: false,
        ..config(3)
    };
    let agent = session_agent(fresh, &model, &sandbox);
    let mut console = ScriptedConsole::new(&["first question", "second question"]);
    block_on(agent.run_session(&mut console, agent.new_state())).expect("session");
    let second = &model.requests()[1].messages;
    assert!(!second.iter().any(|m| m.text_content() == "first question"));
}
