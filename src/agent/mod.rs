//! Julia coding agent built on the runtime graph.
//!
//! Generation, two-phase validation by execution, bounded retry with error
//! feedback, and optional human review of code and retrieval.

pub mod code;
pub mod config;
pub mod graph;
pub mod handlers;
pub mod human;
pub mod prompt;
pub mod retrieval;
pub mod sandbox;
pub mod session;
pub mod state;
pub mod validate;
pub mod writer;

pub use code::CodeBlock;
pub use config::{load_config, AgentConfig};
pub use graph::AgentGraphBuilder;
pub use human::{DecisionKind, DecisionRequest, HumanDecision, ReviewCheckpoint};
pub use sandbox::{ExecutionOutcome, ExecutionSandbox, JuliaSandbox};
pub use session::{
    CodingAgent, Console, HumanInterruptPresenter, PendingTurn, SessionEnd, TurnStatus,
};
pub use state::{ConversationState, TurnOutcome};
pub use validate::{ValidationPhase, ValidationResult, Validator};
pub use writer::{CodeWriter, FileCodeWriter};
