//! The coding-agent controller compiled onto a [`StateGraph`].
//!
//! ```text
//! START ─┬─> review_query ─> retrieve ─┬─> review_documents ─┐
//!        ├─────────────────> retrieve ─┴─────────────────────┼─> generate
//!        └───────────────────────────────────────────────────┘      │
//!   generate ─┬─> tools ─> generate                                  │
//!             ├─> human_check ─┬─> validate                          │
//!             │                └─> finalize                          │
//!             ├─> validate ─┬─> generate (retry)                     │
//!             │             └─> finalize                             │
//!             ├─> generate (model failure, budget left)              │
//!             └─> finalize ─> END                                    │
//! ```
//!
//! Collaborators and policy come in through [`AgentGraphBuilder`]; the
//! wiring is the same for every configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::agent::config::AgentConfig;
use crate::agent::handlers;
use crate::agent::human::DecisionKind;
use crate::agent::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::agent::sandbox::ExecutionSandbox;
use crate::agent::state::ConversationState;
use crate::agent::validate::Validator;
use crate::agent::writer::CodeWriter;
use crate::runtime::component::{ChatModel, Retriever};
use crate::runtime::constants::{END, START};
use crate::runtime::error::GraphResult;
use crate::runtime::event::{Event, EventSink, NoopEventSink};
use crate::runtime::executor::{CompiledGraph, ExecutionConfig};
use crate::runtime::graph::StateGraph;
use crate::runtime::tool::ToolRegistry;

/// Node names of the controller graph.
pub mod nodes {
    pub const REVIEW_QUERY: &str = "review_query";
    pub const RETRIEVE: &str = "retrieve";
    pub const REVIEW_DOCUMENTS: &str = "review_documents";
    pub const GENERATE: &str = "generate";
    pub const TOOLS: &str = "tools";
    pub const HUMAN_CHECK: &str = "human_check";
    pub const VALIDATE: &str = "validate";
    pub const FINALIZE: &str = "finalize";
}

/// Collaborators shared by every node of one compiled controller.
pub struct AgentContext {
    pub config: AgentConfig,
    pub model: Arc<dyn ChatModel>,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub validator: Validator,
    pub tools: Arc<ToolRegistry>,
    pub writer: Option<Arc<dyn CodeWriter>>,
    pub sink: Arc<dyn EventSink>,
}

impl AgentContext {
    pub fn system_prompt(&self) -> &str {
        self.config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    /// Observers never fail a turn; a broken sink is logged and skipped.
    pub fn emit(&self, event: Event) {
        if let Err(err) = self.sink.emit(event) {
            warn!(error = %err, "event sink rejected event");
        }
    }
}

pub struct AgentGraphBuilder {
    config: AgentConfig,
    model: Arc<dyn ChatModel>,
    sandbox: Arc<dyn ExecutionSandbox>,
    retriever: Option<Arc<dyn Retriever>>,
    tools: ToolRegistry,
    writer: Option<Arc<dyn CodeWriter>>,
    sink: Arc<dyn EventSink>,
}

impl AgentGraphBuilder {
    pub fn new(
        config: AgentConfig,
        model: Arc<dyn ChatModel>,
        sandbox: Arc<dyn ExecutionSandbox>,
    ) -> Self {
        Self {
            config,
            model,
            sandbox,
            retriever: None,
            tools: ToolRegistry::new(),
            writer: None,
            sink: Arc::new(NoopEventSink),
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Tools the model may call. Their definitions are sent with every request.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn CodeWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Receives model, tool, validation and run lifecycle events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> GraphResult<CompiledGraph<ConversationState>> {
        self.config.validate()?;
        let execution = ExecutionConfig::new()
            .with_recursion_limit(self.config.recursion_limit)
            .with_run_event_sink(Arc::clone(&self.sink));
        let validator = Validator::new(self.sandbox, self.config.sandbox_timeout());
        let ctx = Arc::new(AgentContext {
            config: self.config,
            model: self.model,
            retriever: self.retriever,
            validator,
            tools: Arc::new(self.tools),
            writer: self.writer,
            sink: self.sink,
        });

        let mut graph = StateGraph::<ConversationState>::new();
        let c = Arc::clone(&ctx);
        graph.add_node(nodes::REVIEW_QUERY, move |state| {
            handlers::review_query(Arc::clone(&c), state)
        });
        let c = Arc::clone(&ctx);
        graph.add_node(nodes::RETRIEVE, move |state| {
            handlers::retrieve(Arc::clone(&c), state)
        });
        let c = Arc::clone(&ctx);
        graph.add_node(nodes::REVIEW_DOCUMENTS, move |state| {
            handlers::review_documents(Arc::clone(&c), state)
        });
        let c = Arc::clone(&ctx);
        graph.add_node(nodes::GENERATE, move |state| {
            handlers::generate(Arc::clone(&c), state)
        });
        let c = Arc::clone(&ctx);
        graph.add_node(nodes::TOOLS, move |state| {
            handlers::run_tools(Arc::clone(&c), state)
        });
        let c = Arc::clone(&ctx);
        graph.add_node(nodes::HUMAN_CHECK, move |state| {
            handlers::human_check(Arc::clone(&c), state)
        });
        let c = Arc::clone(&ctx);
        graph.add_node(nodes::VALIDATE, move |state| {
            handlers::validate(Arc::clone(&c), state)
        });
        let c = Arc::clone(&ctx);
        graph.add_node(nodes::FINALIZE, move |state| {
            handlers::finalize(Arc::clone(&c), state)
        });

        let policy = Policy::from_config(&ctx.config, ctx.retriever.is_some());
        graph.add_conditional_edges(
            START,
            move |state: &ConversationState| Ok(route_start(state, policy).to_string()),
            Some(path_map(&[nodes::REVIEW_QUERY, nodes::RETRIEVE, nodes::GENERATE])),
        );
        graph.add_edge(nodes::REVIEW_QUERY, nodes::RETRIEVE);
        graph.add_conditional_edges(
            nodes::RETRIEVE,
            move |state: &ConversationState| Ok(route_after_retrieve(state, policy).to_string()),
            Some(path_map(&[nodes::REVIEW_DOCUMENTS, nodes::GENERATE])),
        );
        graph.add_edge(nodes::REVIEW_DOCUMENTS, nodes::GENERATE);
        graph.add_conditional_edges(
            nodes::GENERATE,
            move |state: &ConversationState| Ok(route_after_generate(state, policy).to_string()),
            Some(path_map(&[
                nodes::TOOLS,
                nodes::GENERATE,
                nodes::HUMAN_CHECK,
                nodes::VALIDATE,
                nodes::FINALIZE,
            ])),
        );
        graph.add_edge(nodes::TOOLS, nodes::GENERATE);
        graph.add_conditional_edges(
            nodes::HUMAN_CHECK,
            |state: &ConversationState| Ok(route_after_human_check(state).to_string()),
            Some(path_map(&[nodes::VALIDATE, nodes::FINALIZE])),
        );
        graph.add_conditional_edges(
            nodes::VALIDATE,
            move |state: &ConversationState| {
                Ok(decide_to_finish(state, policy.max_iterations).to_string())
            },
            Some(path_map(&[nodes::GENERATE, nodes::FINALIZE])),
        );
        graph.add_edge(nodes::FINALIZE, END);

        Ok(graph.compile()?.with_config(execution))
    }
}

fn path_map(targets: &[&str]) -> HashMap<String, String> {
    targets
        .iter()
        .map(|target| (target.to_string(), target.to_string()))
        .collect()
}

/// The routing-relevant slice of [`AgentConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Policy {
    pub max_iterations: u32,
    pub human_in_the_loop: bool,
    pub review_retrieval: bool,
    pub retrieve_each_turn: bool,
}

impl Policy {
    /// Retrieval review needs a retriever; without one there is nothing to review.
    pub fn from_config(config: &AgentConfig, has_retriever: bool) -> Self {
        Self {
            max_iterations: config.max_iterations,
            human_in_the_loop: config.human_in_the_loop,
            review_retrieval: has_retriever && config.reviews_retrieval(),
            retrieve_each_turn: config.retrieve_each_turn,
        }
    }
}

pub fn route_start(state: &ConversationState, policy: Policy) -> &'static str {
    if !policy.retrieve_each_turn && state.retrieved_context.is_some() {
        return nodes::GENERATE;
    }
    if policy.review_retrieval {
        nodes::REVIEW_QUERY
    } else {
        nodes::RETRIEVE
    }
}

pub fn route_after_retrieve(state: &ConversationState, policy: Policy) -> &'static str {
    let has_documents = state
        .retrieved_context
        .as_ref()
        .map_or(false, |chunks| !chunks.is_empty());
    if policy.review_retrieval && has_documents {
        nodes::REVIEW_DOCUMENTS
    } else {
        nodes::GENERATE
    }
}

/// Tool calls are served before anything else looks at the response.
pub fn route_after_generate(state: &ConversationState, policy: Policy) -> &'static str {
    if state.outcome.is_some() {
        return nodes::FINALIZE;
    }
    if !state.pending_tool_calls().is_empty() {
        return nodes::TOOLS;
    }
    if state.generation_failed {
        return if state.iterations >= policy.max_iterations {
            nodes::FINALIZE
        } else {
            nodes::GENERATE
        };
    }
    if !state.has_code() {
        return nodes::FINALIZE;
    }
    if policy.human_in_the_loop {
        nodes::HUMAN_CHECK
    } else {
        nodes::VALIDATE
    }
}

pub fn route_after_human_check(state: &ConversationState) -> &'static str {
    match state.human_verdict {
        Some(DecisionKind::Ignore) => nodes::FINALIZE,
        _ if !state.has_code() => nodes::FINALIZE,
        _ => nodes::VALIDATE,
    }
}

/// Retry while the last validation failed and generation budget remains.
pub fn decide_to_finish(state: &ConversationState, max_iterations: u32) -> &'static str {
    if !state.error {
        nodes::FINALIZE
    } else if state.iterations >= max_iterations {
        nodes::FINALIZE
    } else {
        nodes::GENERATE
    }
}
