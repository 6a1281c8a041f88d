//! Runtime error taxonomy and interrupt primitives.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by graph construction and execution.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error("execution error in {node}: {message}")]
    ExecutionError { node: String, message: String },
    /// Contract violation between the controller and one of its callers.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("i/o failure while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("run interrupted with {} pending request(s)", .0.len())]
    Interrupted(Vec<Interrupt>),
    #[error("recursion limit of {limit} steps reached")]
    RecursionLimit { limit: usize },
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type GraphResult<T> = Result<T, GraphError>;

impl GraphError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        GraphError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        GraphError::Protocol(message.into())
    }

    /// Failures that abort the current turn but leave the session usable.
    pub fn is_fatal_io(&self) -> bool {
        matches!(self, GraphError::Io { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, GraphError::Protocol(_))
    }
}

/// A request for external input raised by a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub id: String,
    pub value: serde_json::Value,
    pub node: String,
}

impl Interrupt {
    pub fn new(value: impl Serialize, node: impl Into<String>) -> GraphResult<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            value: serde_json::to_value(value)?,
            node: node.into(),
        })
    }
}

/// Suspend the current node. The executor turns this into a checkpoint.
pub fn interrupt<T>(value: impl Serialize, node: impl Into<String>) -> GraphResult<T> {
    Err(GraphError::Interrupted(vec![Interrupt::new(value, node)?]))
}

/// Value delivered to an interrupted node on resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResumeCommand {
    pub value: serde_json::Value,
    #[serde(default)]
    pub interrupt_id: Option<String>,
}

impl ResumeCommand {
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self {
            value: value.into(),
            interrupt_id: None,
        }
    }

    pub fn for_interrupt(mut self, interrupt_id: impl Into<String>) -> Self {
        self.interrupt_id = Some(interrupt_id.into());
        self
    }
}
