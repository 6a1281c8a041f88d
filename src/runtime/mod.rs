//! State-graph runtime.
//!
//! A small engine for running stateful, interruptible workflows:
//!
//! - **State Graph**: nodes, direct edges and conditional routing
//! - **Interrupt/Resume**: serializable checkpoints for human-in-the-loop pauses
//! - **Components**: chat model and retriever interfaces plus a tool registry
//! - **Events**: one stream for run lifecycle, model text and tool activity
//!
//! # Example
//! ```rust,no_run
//! use juliacoder::runtime::prelude::{GraphError, GraphState, StateGraph, END, START};
//!
//! #[derive(Clone, Default)]
//! struct Greeting {
//!     lines: Vec<String>,
//! }
//!
//! impl GraphState for Greeting {}
//!
//! async fn hello(mut state: Greeting) -> Result<Greeting, GraphError> {
//!     state.lines.push("hello".to_string());
//!     Ok(state)
//! }
//!
//! # async fn run() -> Result<(), GraphError> {
//! let mut graph = StateGraph::<Greeting>::new();
//! graph.add_node("hello", hello);
//! graph.add_edge(START, "hello");
//! graph.add_edge("hello", END);
//!
//! let compiled = graph.compile()?;
//! let state = compiled.invoke(Greeting::default()).await?;
//! assert_eq!(state.lines.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod branch;
pub mod component;
pub mod constants;
pub mod error;
pub mod event;
pub mod executor;
pub mod graph;
pub mod message;
pub mod node;
pub mod output;
pub mod provider;
pub mod session;
pub mod state;
pub mod tool;
pub mod trace;

/// Commonly used types.
pub mod prelude {
    pub use crate::runtime::component::{
        register_retriever_tool, ChatModel, ChatRequest, ChatResponse, ContextChunk,
        InMemoryRetriever, Retriever, ScriptedChatModel, ScriptedReply,
    };
    pub use crate::runtime::constants::{END, START};
    pub use crate::runtime::error::{interrupt, GraphError, GraphResult, Interrupt, ResumeCommand};
    pub use crate::runtime::event::{Event, EventSink, NoopEventSink, TokenUsage};
    pub use crate::runtime::executor::{Checkpoint, CompiledGraph, ExecutionConfig, ExecutionResult};
    pub use crate::runtime::graph::StateGraph;
    pub use crate::runtime::message::{Message, MessageRole, Part};
    pub use crate::runtime::output::JsonLineEventSink;
    pub use crate::runtime::provider::openai::{OpenAiChatModel, OpenAiChatModelConfig};
    pub use crate::runtime::session::CheckpointStore;
    pub use crate::runtime::state::GraphState;
    pub use crate::runtime::tool::{tool_fn, ToolCall, ToolDefinition, ToolOutput, ToolRegistry};
    pub use crate::runtime::trace::{ExecutionTrace, TraceEvent};
}
