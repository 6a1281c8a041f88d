use std::sync::Arc;

use juliacoder::agent::human::{HumanDecision, ReviewCheckpoint};
use juliacoder::agent::retrieval::EMPTY_CONTEXT;
use juliacoder::agent::session::CodingAgent;
use juliacoder::agent::{AgentConfig, AgentGraphBuilder, ConversationState};
use juliacoder::runtime::component::ScriptedChatModel;
use futures::executor::block_on;
use serde_json::json;

use crate::helpers::mocks::{
    code_reply, config, docs, human_config, CountingRetriever, RecordingSandbox, ScriptedPresenter,
};

fn review_config() -> AgentConfig {
    human_config(3)
}

fn agent(
    config: AgentConfig,
    model: &Arc<ScriptedChatModel>,
    retriever: &Arc<CountingRetriever>,
    presenter: Option<Arc<ScriptedPresenter>>,
) -> CodingAgent {
    let graph = AgentGraphBuilder::new(
        config.clone(),
        model.clone(),
        Arc::new(RecordingSandbox::passing()),
    )
    .with_retriever(retriever.clone())
    .build()
    .expect("build");
    let agent = CodingAgent::new(graph, config);
    match presenter {
        Some(presenter) => agent.with_presenter(presenter),
        None => agent,
    }
}

fn system_prompt(model: &ScriptedChatModel, call: usize) -> String {
    model.requests()[call].messages[0].text_content()
}

fn plot_model() -> Arc<ScriptedChatModel> {
    Arc::new(ScriptedChatModel::new("mock", vec![code_reply("", "", "plot(1:3)")]))
}

#[test]
fn retrieved_context_reaches_the_model() {
    let model = plot_model();
    let retriever = Arc::new(CountingRetriever::new(docs()));
    let agent = agent(config(3), &model, &retriever, None);

    block_on(agent.run_turn(ConversationState::new("s1"), "draw a line plot")).expect("turn");

    assert_eq!(retriever.queries(), vec!["draw a line plot".to_string()]);
    let prompt = system_prompt(&model, 0);
    assert!(prompt.contains("### Line plots (plots.md)"));
    assert!(prompt.contains("### Reading CSV (csv.md)"));
}

#[test]
fn skipped_query_never_calls_the_retriever() {
    let model = plot_model();
    let retriever = Arc::new(CountingRetriever::new(docs()));
    let presenter = Arc::new(ScriptedPresenter::new(vec![
        HumanDecision::ignore(),
        HumanDecision::accept(),
    ]));
    let agent = agent(review_config(), &model, &retriever, Some(presenter.clone()));

    let state =
        block_on(agent.run_turn(ConversationState::new("s1"), "draw a line plot")).expect("turn");

    assert_eq!(retriever.calls(), 0);
    assert!(state.retrieved_context.is_none());
    assert!(system_prompt(&model, 0).ends_with(EMPTY_CONTEXT));
    let checkpoints: Vec<ReviewCheckpoint> =
        presenter.requests().iter().map(|request| request.checkpoint).collect();
    assert_eq!(
        checkpoints,
        vec![ReviewCheckpoint::ReviewQuery, ReviewCheckpoint::CheckCode]
    );
}

#[test]
fn edited_query_is_what_gets_searched() {
    let model = plot_model();
    let retriever = Arc::new(CountingRetriever::new(Vec::new()));
    let presenter = Arc::new(ScriptedPresenter::new(vec![
        HumanDecision::edit("csv dataframe"),
        HumanDecision::accept(),
    ]));
    let agent = agent(review_config(), &model, &retriever, Some(presenter.clone()));

    block_on(agent.run_turn(ConversationState::new("s1"), "load my table")).expect("turn");

    assert_eq!(retriever.queries(), vec!["csv dataframe".to_string()]);
    // Nothing came back, so there was nothing to review.
    assert_eq!(presenter.requests().len(), 2);
}

#[test]
fn emptied_document_is_dropped_before_generation() {
    let model = plot_model();
    let retriever = Arc::new(CountingRetriever::new(docs()));
    let presenter = Arc::new(ScriptedPresenter::new(vec![
        HumanDecision::accept(),
        HumanDecision::edit(json!({"document_0": ""})),
        HumanDecision::accept(),
    ]));
    let agent = agent(review_config(), &model, &retriever, Some(presenter.clone()));

    let state =
        block_on(agent.run_turn(ConversationState::new("s1"), "read a csv file")).expect("turn");

    let accepted = state.retrieved_context.expect("context");
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].source_id, "csv.md");
    let prompt = system_prompt(&model, 0);
    assert!(prompt.contains("Reading CSV"));
    assert!(!prompt.contains("Line plots"));

    let documents = &presenter.requests()[1];
    assert_eq!(documents.checkpoint, ReviewCheckpoint::ReviewDocuments);
    assert_eq!(documents.args.len(), 2);
}

#[test]
fn document_review_rejects_accept() {
    let model = plot_model();
    let retriever = Arc::new(CountingRetriever::new(docs()));
    let presenter = Arc::new(ScriptedPresenter::new(vec![
        HumanDecision::accept(),
        HumanDecision::accept(),
    ]));
    let agent = agent(review_config(), &model, &retriever, Some(presenter));

    let err = block_on(agent.run_turn(ConversationState::new("s1"), "read a csv file")).unwrap_err();
    assert!(err.is_protocol());
}

#[test]
fn retrieval_failure_degrades_to_empty_context() {
    let model = plot_model();
    let retriever = Arc::new(CountingRetriever::failing());
    let agent = agent(config(3), &model, &retriever, None);

    let state =
        block_on(agent.run_turn(ConversationState::new("s1"), "draw a line plot")).expect("turn");

    assert_eq!(retriever.calls(), 1);
    assert_eq!(state.retrieved_context, Some(Vec::new()));
    assert!(system_prompt(&model, 0).ends_with(EMPTY_CONTEXT));
    assert!(state.outcome.is_some());
}

#[test]
fn context_can_be_reused_across_turns() {
    let model = plot_model();
    let retriever = Arc::new(CountingRetriever::new(docs()));
    let once = AgentConfig {
        retrieve_each_turn: false,
        ..config(3)
    };
    let agent = agent(once, &model, &retriever, None);

    let state = block_on(agent.run_turn(ConversationState::new("s1"), "draw a line plot"))
        .expect("first turn");
    let state = block_on(agent.run_turn(state, "now label the axes")).expect("second turn");

    assert_eq!(retriever.calls(), 1);
    assert_eq!(state.retrieved_context.map(|chunks| chunks.len()), Some(2));
    assert!(system_prompt(&model, 1).contains("Line plots"));
}

#[test]
fn human_mode_can_opt_out_of_retrieval_review() {
    let model = plot_model();
    let retriever = Arc::new(CountingRetriever::new(docs()));
    let presenter = Arc::new(ScriptedPresenter::new(vec![HumanDecision::accept()]));
    let code_only = AgentConfig {
        review_retrieval: false,
        ..human_config(3)
    };
    let agent = agent(code_only, &model, &retriever, Some(presenter.clone()));

    block_on(agent.run_turn(ConversationState::new("s1"), "draw a line plot")).expect("turn");

    assert_eq!(retriever.calls(), 1);
    let checkpoints: Vec<ReviewCheckpoint> =
        presenter.requests().iter().map(|request| request.checkpoint).collect();
    assert_eq!(checkpoints, vec![ReviewCheckpoint::CheckCode]);
}
