//! Structured message + part model for conversations.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::runtime::tool::{ToolCall, ToolOutput};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "system" => Some(MessageRole::System),
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "tool" => Some(MessageRole::Tool),
            _ => None,
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        MessageRole::parse(input).ok_or(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub parts: Vec<Part>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at_ms: Option<u64>,
}

impl Message {
    pub fn new(role: MessageRole) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            parts: Vec::new(),
            metadata: serde_json::json!({}),
            created_at_ms: u64::try_from(chrono::Utc::now().timestamp_millis()).ok(),
        }
    }

    /// Single text part message.
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        let mut message = Self::new(role);
        message.parts.push(Part::TextFinal { text: text.into() });
        message
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// Concatenated text parts.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::TextFinal { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolCall {
                    tool,
                    call_id,
                    input,
                } => Some(ToolCall::new(tool.clone(), call_id.clone(), input.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, Part::ToolCall { .. }))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    TextFinal {
        text: String,
    },
    ToolCall {
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
    Error {
        message: String,
    },
}

impl Part {
    /// Call id answered by this part, if it is a tool result or error.
    pub fn answered_call_id(&self) -> Option<&str> {
        match self {
            Part::ToolResult { call_id, .. } | Part::ToolError { call_id, .. } => {
                Some(call_id.as_str())
            }
            _ => None,
        }
    }
}

/// Tool calls anywhere in `messages` that have no result or error part yet.
pub fn unanswered_tool_calls(messages: &[Message]) -> Vec<ToolCall> {
    let answered: HashSet<&str> = messages
        .iter()
        .flat_map(|message| message.parts.iter())
        .filter_map(Part::answered_call_id)
        .collect();
    messages
        .iter()
        .flat_map(Message::tool_calls)
        .filter(|call| !answered.contains(call.call_id.as_str()))
        .collect()
}
