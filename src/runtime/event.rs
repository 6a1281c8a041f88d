//! Event protocol for observing a run.
//!
//! Run lifecycle, model text, tool activity and validation verdicts all flow
//! through one `EventSink` so a CLI or log writer can consume a single stream.

use serde::{Deserialize, Serialize};

use crate::runtime::error::GraphResult;
use crate::runtime::tool::ToolOutput;

/// Token usage reported by a model call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cache_read: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// Runtime events emitted during execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStarted {
        run_id: String,
    },
    RunPaused {
        run_id: String,
        checkpoint_id: String,
    },
    RunResumed {
        run_id: String,
        checkpoint_id: String,
    },
    RunCompleted {
        run_id: String,
    },
    RunFailed {
        run_id: String,
        error: String,
    },
    TextFinal {
        session_id: String,
        message_id: String,
        text: String,
    },
    ToolStart {
        tool: String,
        call_id: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool: String,
        call_id: String,
        output: ToolOutput,
    },
    ToolError {
        tool: String,
        call_id: String,
        error: String,
    },
    StepFinish {
        session_id: String,
        tokens: TokenUsage,
    },
    ValidationFinished {
        session_id: String,
        iteration: u32,
        failed: bool,
        phase: Option<String>,
    },
    Error {
        session_id: String,
        message: String,
    },
}

/// Event sink for streaming runtime events to a UI, CLI or log.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event) -> GraphResult<()>;
}

/// Sink that drops everything.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: Event) -> GraphResult<()> {
        Ok(())
    }
}
