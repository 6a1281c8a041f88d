//! Model-callable tools: definitions, dispatch and lifecycle events.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runtime::error::{GraphError, GraphResult};
use crate::runtime::event::{Event, EventSink};
use crate::runtime::node::BoxFuture;

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub call_id: String,
    pub input: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        tool: impl Into<String>,
        call_id: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            tool: tool.into(),
            call_id: call_id.into(),
            input,
        }
    }
}

/// Describes a tool's input/output contract to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            output_schema: None,
        }
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// Structured tool output payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ToolOutput {
    pub fn new(content: serde_json::Value) -> Self {
        Self {
            content,
            source: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(serde_json::Value::String(text.into()))
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Content as text for feeding back to a model.
    pub fn render(&self) -> String {
        match &self.content {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Tool handler signature for registry execution.
pub type ToolHandler =
    Arc<dyn Fn(ToolCall) -> BoxFuture<'static, GraphResult<ToolOutput>> + Send + Sync>;

/// Wrap an async function as a [`ToolHandler`].
pub fn tool_fn<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(ToolCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GraphResult<ToolOutput>> + Send + 'static,
{
    Arc::new(move |call: ToolCall| -> BoxFuture<'static, GraphResult<ToolOutput>> {
        Box::pin(f(call))
    })
}

/// Registry dispatching tool calls by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolHandler>,
    definitions: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_with_definition(&mut self, definition: ToolDefinition, handler: ToolHandler) {
        let name = definition.name.clone();
        self.tools.insert(name.clone(), handler);
        self.definitions.insert(name, definition);
    }

    /// Definitions sorted by name so prompts are stable across runs.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self.definitions.values().cloned().collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run `call`, emitting start and result/error events around it.
    pub async fn run(&self, call: ToolCall, sink: &dyn EventSink) -> GraphResult<ToolOutput> {
        let tool = call.tool.clone();
        let call_id = call.call_id.clone();
        sink.emit(Event::ToolStart {
            tool: tool.clone(),
            call_id: call_id.clone(),
            input: call.input.clone(),
        })?;

        let result = match self.tools.get(&tool).cloned() {
            Some(handler) => handler(call).await,
            None => Err(GraphError::ExecutionError {
                node: format!("tool:{tool}"),
                message: "tool not found".to_string(),
            }),
        };

        match &result {
            Ok(output) => {
                debug!(tool = %tool, call_id = %call_id, "tool finished");
                sink.emit(Event::ToolResult {
                    tool,
                    call_id,
                    output: output.clone(),
                })?;
            }
            Err(err) => {
                debug!(tool = %tool, call_id = %call_id, error = %err, "tool failed");
                sink.emit(Event::ToolError {
                    tool,
                    call_id,
                    error: err.to_string(),
                })?;
            }
        }
        result
    }
}
