//! OpenAI chat-completions adapter implementing `ChatModel`.

use std::time::Duration;

use tracing::debug;

use crate::runtime::component::{ChatModel, ChatRequest, ChatResponse};
use crate::runtime::error::{GraphError, GraphResult};
use crate::runtime::event::TokenUsage;
use crate::runtime::message::{Message, MessageRole, Part};
use crate::runtime::node::BoxFuture;
use crate::runtime::tool::ToolDefinition;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiChatModelConfig {
    pub model: String,
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset.
    pub api_key_env: String,
    pub base_url: String,
    pub timeout_ms: u64,
    pub temperature: Option<f32>,
}

impl OpenAiChatModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: 60_000,
            temperature: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_key_env(mut self, env_var: impl Into<String>) -> Self {
        self.api_key_env = env_var.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Chat completions client. Each call is a blocking HTTP round trip.
#[derive(Clone, Debug)]
pub struct OpenAiChatModel {
    model: String,
    api_key: String,
    base_url: String,
    timeout_ms: u64,
    temperature: Option<f32>,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiChatModelConfig) -> GraphResult<Self> {
        if config.model.trim().is_empty() {
            return Err(GraphError::Config("model name is required".to_string()));
        }
        let api_key = resolve_api_key(config.api_key, &config.api_key_env)?;
        Ok(Self {
            model: config.model,
            api_key,
            base_url: config.base_url,
            timeout_ms: config.timeout_ms.max(1),
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl ChatModel for OpenAiChatModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn generate(&self, mut request: ChatRequest) -> BoxFuture<'_, GraphResult<ChatResponse>> {
        if request.temperature.is_none() {
            request.temperature = self.temperature;
        }
        let endpoint = self.endpoint();
        let payload = build_request_payload(&self.model, &request);
        Box::pin(async move {
            debug!(endpoint = %endpoint, messages = request.messages.len(), "requesting completion");
            let agent = ureq::AgentBuilder::new()
                .timeout(Duration::from_millis(self.timeout_ms))
                .build();
            let response = agent
                .post(&endpoint)
                .set("Authorization", &format!("Bearer {}", self.api_key))
                .set("Content-Type", "application/json")
                .send_json(payload);

            let response_json = match response {
                Ok(resp) => resp
                    .into_json::<serde_json::Value>()
                    .map_err(|err| openai_error(format!("decode response failed: {err}")))?,
                Err(ureq::Error::Status(status, resp)) => {
                    let body = resp.into_string().unwrap_or_default();
                    let detail = parse_error_message(&body).unwrap_or(body);
                    return Err(openai_error(format!(
                        "request failed with status {status}: {detail}"
                    )));
                }
                Err(err) => return Err(openai_error(format!("request failed: {err}"))),
            };
            parse_chat_response(response_json)
        })
    }
}

/// Explicit key first, then the named environment variable.
pub fn resolve_api_key(explicit: Option<String>, env_var: &str) -> GraphResult<String> {
    if let Some(key) = explicit.filter(|key| !key.trim().is_empty()) {
        return Ok(key);
    }
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(GraphError::Config(format!(
            "missing API key: set {env_var} or model.api_key"
        ))),
    }
}

fn openai_error(message: impl Into<String>) -> GraphError {
    GraphError::ExecutionError {
        node: "provider:openai".to_string(),
        message: message.into(),
    }
}

fn build_request_payload(model: &str, request: &ChatRequest) -> serde_json::Value {
    let messages = request
        .messages
        .iter()
        .flat_map(render_message)
        .collect::<Vec<_>>();

    let mut payload = serde_json::json!({
        "model": model,
        "messages": messages,
    });
    if !request.tools.is_empty() {
        payload["tools"] = serde_json::Value::Array(
            request.tools.iter().map(render_tool_definition).collect(),
        );
    }
    if let Some(temperature) = request.temperature {
        payload["temperature"] = serde_json::json!(temperature);
    }
    if let Some(max_tokens) = request.max_output_tokens {
        payload["max_tokens"] = serde_json::json!(max_tokens);
    }
    payload
}

fn render_tool_definition(definition: &ToolDefinition) -> serde_json::Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": definition.name,
            "description": definition.description,
            "parameters": definition
                .input_schema
                .clone()
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
        }
    })
}

/// One wire message per chat message, except tool messages, which fan out
/// to one wire message per answered call.
fn render_message(message: &Message) -> Vec<serde_json::Value> {
    match message.role {
        MessageRole::Tool => message
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolResult { call_id, output, .. } => Some(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": output.render(),
                })),
                Part::ToolError { call_id, error, .. } => Some(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": format!("error: {error}"),
                })),
                _ => None,
            })
            .collect(),
        role => {
            let mut wire = serde_json::json!({
                "role": openai_role(role),
                "content": render_message_content(message),
            });
            let calls = message.tool_calls();
            if !calls.is_empty() {
                wire["tool_calls"] = serde_json::Value::Array(
                    calls
                        .iter()
                        .map(|call| {
                            serde_json::json!({
                                "id": call.call_id,
                                "type": "function",
                                "function": {
                                    "name": call.tool,
                                    "arguments": call.input.to_string(),
                                }
                            })
                        })
                        .collect(),
                );
            }
            vec![wire]
        }
    }
}

fn openai_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

fn render_message_content(message: &Message) -> String {
    let mut chunks = Vec::new();
    for part in &message.parts {
        match part {
            Part::TextFinal { text } => chunks.push(text.clone()),
            Part::Error { message } => chunks.push(message.clone()),
            _ => {}
        }
    }
    chunks.join("\n")
}

fn parse_chat_response(value: serde_json::Value) -> GraphResult<ChatResponse> {
    let choice = value
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|choices| choices.first())
        .ok_or_else(|| openai_error("missing choices in response"))?;
    let raw_message = choice
        .get("message")
        .ok_or_else(|| openai_error("missing message in first choice"))?;

    let content = extract_message_content(raw_message);
    let mut message = Message::new(MessageRole::Assistant);
    if !content.is_empty() {
        message.parts.push(Part::TextFinal { text: content });
    }
    message.parts.extend(extract_tool_calls(raw_message)?);
    if let Some(created) = value.get("created").and_then(|v| v.as_u64()) {
        message.created_at_ms = Some(created.saturating_mul(1000));
    }

    let mut response = ChatResponse::new(message);
    response.model = value
        .get("model")
        .and_then(|model| model.as_str())
        .map(|model| model.to_string());
    response.finish_reason = choice
        .get("finish_reason")
        .and_then(|finish_reason| finish_reason.as_str())
        .map(|finish_reason| finish_reason.to_string());
    response.usage = parse_usage(&value);
    Ok(response)
}

fn extract_tool_calls(raw_message: &serde_json::Value) -> GraphResult<Vec<Part>> {
    let Some(calls) = raw_message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };
    calls
        .iter()
        .map(|call| {
            let call_id = call
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| GraphError::Protocol("tool call without id".to_string()))?;
            let function = call
                .get("function")
                .ok_or_else(|| GraphError::Protocol(format!("tool call {call_id} has no function")))?;
            let tool = function
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| GraphError::Protocol(format!("tool call {call_id} has no name")))?;
            let arguments = function
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            let input = serde_json::from_str(arguments).map_err(|err| {
                GraphError::Protocol(format!("tool call {call_id} has malformed arguments: {err}"))
            })?;
            Ok(Part::ToolCall {
                tool: tool.to_string(),
                call_id: call_id.to_string(),
                input,
            })
        })
        .collect()
}

fn parse_usage(value: &serde_json::Value) -> Option<TokenUsage> {
    let usage = value.get("usage")?;
    let count = |path: &[&str]| {
        path.iter()
            .try_fold(usage, |node, key| node.get(*key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    Some(TokenUsage {
        input: count(&["prompt_tokens"]),
        output: count(&["completion_tokens"]),
        reasoning: count(&["completion_tokens_details", "reasoning_tokens"]),
        cache_read: count(&["prompt_tokens_details", "cached_tokens"]),
    })
}

fn extract_message_content(raw_message: &serde_json::Value) -> String {
    if let Some(content) = raw_message.get("content").and_then(|v| v.as_str()) {
        return content.to_string();
    }
    if let Some(parts) = raw_message.get("content").and_then(|v| v.as_array()) {
        return parts
            .iter()
            .filter_map(|part| {
                part.get("text").and_then(|text| {
                    text.as_str()
                        .or_else(|| text.get("value").and_then(|value| value.as_str()))
                })
            })
            .collect();
    }
    String::new()
}

fn parse_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(|message| message.as_str())
        .map(|message| message.to_string())
}
