//! Component interfaces for chat models and retrievers.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::runtime::error::{GraphError, GraphResult};
use crate::runtime::event::TokenUsage;
use crate::runtime::message::{Message, MessageRole, Part};
use crate::runtime::node::BoxFuture;
use crate::runtime::tool::{tool_fn, ToolCall, ToolDefinition, ToolOutput, ToolRegistry};

/// Request payload for chat model generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            session_id: session_id.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_output_tokens: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

/// Response payload from chat model generation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<TokenUsage>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            usage: None,
            model: None,
            finish_reason: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_finish_reason(mut self, finish_reason: impl Into<String>) -> Self {
        self.finish_reason = Some(finish_reason.into());
        self
    }

    pub fn text(&self) -> Option<String> {
        let text = self.message.text_content();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.message.tool_calls()
    }
}

/// Standard interface for chat-capable models.
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    fn generate(&self, request: ChatRequest) -> BoxFuture<'_, GraphResult<ChatResponse>>;
}

/// One canned turn of a [`ScriptedChatModel`].
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptedReply {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    Failure(String),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }
}

/// Deterministic chat model replaying a fixed script.
///
/// Replies are consumed in order; once the script runs out the last reply
/// repeats. Every request is recorded for inspection.
pub struct ScriptedChatModel {
    model_id: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    last: Mutex<Option<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChatModel {
    pub fn new(model_id: impl Into<String>, replies: Vec<ScriptedReply>) -> Self {
        Self {
            model_id: model_id.into(),
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_reply(&self) -> Option<ScriptedReply> {
        let mut replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(reply) = replies.pop_front() {
            *last = Some(reply);
        }
        last.clone()
    }
}

impl ChatModel for ScriptedChatModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn generate(&self, request: ChatRequest) -> BoxFuture<'_, GraphResult<ChatResponse>> {
        let input_tokens = request.messages.len() as u64;
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let reply = self.next_reply();
        let model = self.model_id.clone();
        Box::pin(async move {
            let mut message = Message::new(MessageRole::Assistant);
            match reply {
                Some(ScriptedReply::Text(text)) => message.parts.push(Part::TextFinal { text }),
                Some(ScriptedReply::ToolCalls(calls)) => {
                    for call in calls {
                        message.parts.push(Part::ToolCall {
                            tool: call.tool,
                            call_id: call.call_id,
                            input: call.input,
                        });
                    }
                }
                Some(ScriptedReply::Failure(reason)) => {
                    return Err(GraphError::ExecutionError {
                        node: format!("model:{model}"),
                        message: reason,
                    });
                }
                None => {
                    return Err(GraphError::ExecutionError {
                        node: format!("model:{model}"),
                        message: "script is empty".to_string(),
                    });
                }
            }
            Ok(ChatResponse::new(message)
                .with_model(model)
                .with_finish_reason("stop")
                .with_usage(TokenUsage {
                    input: input_tokens,
                    output: 1,
                    ..TokenUsage::default()
                }))
        })
    }
}

/// A ranked piece of documentation or example code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub source_id: String,
    pub heading: String,
    pub content: String,
    #[serde(default)]
    pub score: Option<f32>,
}

impl ContextChunk {
    pub fn new(
        source_id: impl Into<String>,
        heading: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            heading: heading.into(),
            content: content.into(),
            score: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }
}

/// Standard interface for retrievers.
pub trait Retriever: Send + Sync {
    fn retriever_id(&self) -> &str;

    fn retrieve(&self, query: String, limit: usize) -> BoxFuture<'_, GraphResult<Vec<ContextChunk>>>;
}

/// In-memory retriever with lexical overlap ranking.
#[derive(Clone, Debug, Default)]
pub struct InMemoryRetriever {
    retriever_id: String,
    chunks: Vec<ContextChunk>,
}

impl InMemoryRetriever {
    pub fn new(retriever_id: impl Into<String>) -> Self {
        Self {
            retriever_id: retriever_id.into(),
            chunks: Vec::new(),
        }
    }

    pub fn from_chunks(retriever_id: impl Into<String>, chunks: Vec<ContextChunk>) -> Self {
        Self {
            retriever_id: retriever_id.into(),
            chunks,
        }
    }

    pub fn add_chunk(&mut self, chunk: ContextChunk) {
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl Retriever for InMemoryRetriever {
    fn retriever_id(&self) -> &str {
        &self.retriever_id
    }

    fn retrieve(&self, query: String, limit: usize) -> BoxFuture<'_, GraphResult<Vec<ContextChunk>>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let query_terms = tokenize(&query);
            let mut ranked: Vec<ContextChunk> = self
                .chunks
                .iter()
                .filter_map(|chunk| {
                    let terms = tokenize(&format!("{} {}", chunk.heading, chunk.content));
                    let overlap = query_terms.intersection(&terms).count();
                    (overlap > 0).then(|| {
                        let score = overlap as f32 / query_terms.len().max(1) as f32;
                        chunk.clone().with_score(score)
                    })
                })
                .collect();

            ranked.sort_by(|a, b| {
                b.score
                    .unwrap_or(0.0)
                    .partial_cmp(&a.score.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.source_id.cmp(&b.source_id))
            });
            ranked.truncate(limit);
            Ok(ranked)
        })
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[derive(Deserialize)]
struct RetrieverToolInput {
    query: String,
    #[serde(default = "default_retrieval_limit")]
    limit: usize,
}

fn default_retrieval_limit() -> usize {
    5
}

/// Register a retriever as a model-callable tool.
///
/// Output shape: `{"documents": [ContextChunk...], "count": n}`.
pub fn register_retriever_tool(
    registry: &mut ToolRegistry,
    tool_name: impl Into<String>,
    description: impl Into<String>,
    retriever: Arc<dyn Retriever>,
) {
    let definition = ToolDefinition::new(tool_name, description)
        .with_input_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "minimum": 1}
            },
            "required": ["query"]
        }))
        .with_output_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "documents": {"type": "array"},
                "count": {"type": "integer"}
            },
            "required": ["documents", "count"]
        }));
    let handler = tool_fn(move |call: ToolCall| {
        let retriever = Arc::clone(&retriever);
        async move {
            let input: RetrieverToolInput =
                serde_json::from_value(call.input).map_err(|err| GraphError::ExecutionError {
                    node: format!("tool:{}", call.tool),
                    message: format!("invalid retriever input: {err}"),
                })?;
            let chunks = retriever.retrieve(input.query, input.limit).await?;
            let count = chunks.len();
            Ok(ToolOutput::new(serde_json::json!({
                "documents": chunks,
                "count": count,
            }))
            .with_source(format!("retriever:{}", retriever.retriever_id())))
        }
    });
    registry.register_with_definition(definition, handler);
}

/// Chunks carried in a retriever tool's output, if any.
pub fn chunks_from_tool_output(output: &ToolOutput) -> Vec<ContextChunk> {
    output
        .content
        .get("documents")
        .cloned()
        .and_then(|documents| serde_json::from_value(documents).ok())
        .unwrap_or_default()
}
