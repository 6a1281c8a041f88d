//! ConversationState: the one record every controller node takes and returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::code::CodeBlock;
use crate::agent::human::DecisionKind;
use crate::agent::validate::ValidationResult;
use crate::runtime::component::ContextChunk;
use crate::runtime::message::{unanswered_tool_calls, Message, MessageRole};
use crate::runtime::state::GraphState;
use crate::runtime::tool::ToolCall;

/// How a request ended, recorded by the finalize node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The last code block passed both validation phases.
    Validated,
    /// The retry budget ran out with the last validation still failing.
    ForcedStop,
    /// A reviewer chose to skip validation.
    ValidationSkipped,
    /// The answer contained no code.
    NoCode,
    /// The model never produced a usable response.
    GenerationFailed,
    /// The model kept asking for tools with too few steps left.
    StepBudgetExhausted,
}

impl TurnOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnOutcome::Validated => "validated",
            TurnOutcome::ForcedStop => "forced_stop",
            TurnOutcome::ValidationSkipped => "validation_skipped",
            TurnOutcome::NoCode => "no_code",
            TurnOutcome::GenerationFailed => "generation_failed",
            TurnOutcome::StepBudgetExhausted => "step_budget_exhausted",
        }
    }
}

/// A resume value waiting for the node that raised the interrupt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingResume {
    pub node: String,
    pub value: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    /// Append-only within a request.
    pub messages: Vec<Message>,
    pub code: Option<CodeBlock>,
    /// Whether the last validation failed.
    pub error: bool,
    /// The retry instruction for the current failure is already in `messages`.
    #[serde(default)]
    pub retry_instructed: bool,
    /// Generation attempts for the current request.
    pub iterations: u32,
    /// Query sent to the retriever; seeded from the latest user message.
    pub rag_query: Option<String>,
    pub retrieved_context: Option<Vec<ContextChunk>>,
    pub last_validation: Option<ValidationResult>,
    pub remaining_steps: usize,
    pub is_last_step: bool,
    pub human_verdict: Option<DecisionKind>,
    pub generation_failed: bool,
    pub outcome: Option<TurnOutcome>,
    /// Index of the first message that belongs to the current request.
    pub turn_start: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<PendingResume>,
}

impl ConversationState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_text(&mut self, role: MessageRole, text: impl Into<String>) {
        self.messages.push(Message::text(role, text));
    }

    /// Start a new request: reset per-request fields and append the user message.
    ///
    /// With `carry_history` false the previous turns are dropped first.
    pub fn begin_request(&mut self, user_message: &str, carry_history: bool) {
        if !carry_history {
            self.messages.clear();
            self.retrieved_context = None;
        }
        self.code = None;
        self.error = false;
        self.retry_instructed = false;
        self.iterations = 0;
        self.last_validation = None;
        self.human_verdict = None;
        self.generation_failed = false;
        self.outcome = None;
        self.resume = None;
        self.rag_query = Some(user_message.trim().to_string());
        self.turn_start = self.messages.len();
        self.push_text(MessageRole::User, user_message);
    }

    pub fn latest_user_message(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(Message::text_content)
    }

    /// Take the resume value if it is addressed to `node`.
    pub fn take_resume(&mut self, node: &str) -> Option<Value> {
        match &self.resume {
            Some(pending) if pending.node == node => self.resume.take().map(|pending| pending.value),
            _ => None,
        }
    }

    /// Tool calls in the history that have no result yet.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        unanswered_tool_calls(&self.messages)
    }

    /// Messages appended since the current request began.
    pub fn turn_messages(&self) -> &[Message] {
        let start = self.turn_start.min(self.messages.len());
        &self.messages[start..]
    }

    pub fn has_code(&self) -> bool {
        self.code.as_ref().map_or(false, |code| !code.is_empty())
    }
}

impl GraphState for ConversationState {
    fn set_remaining_steps(&mut self, remaining: usize) {
        self.remaining_steps = remaining;
        self.is_last_step = remaining <= 1;
    }

    fn set_resume(&mut self, node: &str, value: Value) {
        self.resume = Some(PendingResume {
            node: node.to_string(),
            value,
        });
    }
}
