//! `juliacoder`: interactive Julia coding assistant.

mod cli;

use std::fs::File;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::executor::block_on;

use juliacoder::agent::session::{CodingAgent, SessionEnd};
use juliacoder::agent::{load_config, AgentGraphBuilder, FileCodeWriter};
use juliacoder::logging;
use juliacoder::runtime::component::{register_retriever_tool, Retriever};
use juliacoder::runtime::message::MessageRole;
use juliacoder::runtime::output::JsonLineEventSink;
use juliacoder::runtime::provider::OpenAiChatModel;
use juliacoder::runtime::session::CheckpointStore;
use juliacoder::runtime::tool::ToolRegistry;

use crate::cli::{load_docs, Cli, StdioConsole, StdioPresenter};

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = load_config(&cli.config)?;
    cli.apply(&mut config);
    config.validate()?;

    let model = OpenAiChatModel::new(config.model.openai())?;
    let mut builder =
        AgentGraphBuilder::new(config.clone(), Arc::new(model), Arc::new(config.sandbox.build()));
    if let Some(path) = &cli.docs {
        let retriever: Arc<dyn Retriever> = Arc::new(load_docs(path)?);
        let mut tools = ToolRegistry::new();
        register_retriever_tool(
            &mut tools,
            "search_docs",
            "Search the Julia documentation and examples.",
            Arc::clone(&retriever),
        );
        builder = builder.with_retriever(retriever).with_tools(tools);
    }
    if let Some(path) = &config.output_path {
        builder = builder.with_writer(Arc::new(FileCodeWriter::new(path)));
    }
    if let Some(path) = &cli.event_log {
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        builder = builder.with_event_sink(Arc::new(JsonLineEventSink::new(file)));
    }

    let mut agent =
        CodingAgent::new(builder.build()?, config.clone()).with_presenter(Arc::new(StdioPresenter));
    if let Some(dir) = &config.checkpoint_dir {
        agent = agent.with_checkpoint_store(CheckpointStore::new(dir));
    }
    let state = agent.new_state();

    if let Some(message) = &cli.once {
        let state = block_on(agent.run_turn(state, message))?;
        for message in state.turn_messages() {
            if message.role == MessageRole::Assistant {
                println!("{}\n", message.text_content());
            }
        }
        return Ok(());
    }

    match block_on(agent.run_session(&mut StdioConsole, state))? {
        SessionEnd::Quit => std::process::exit(0),
        SessionEnd::EndOfInput => Ok(()),
    }
}
