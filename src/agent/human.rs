//! Human review checkpoints: decision types, requests and edit handling.
//!
//! A node that wants a decision calls [`request_decision`]. Without a resume
//! value this raises an interrupt carrying the [`DecisionRequest`]; the
//! executor checkpoints the run and the driver collects a [`HumanDecision`]
//! out of band. On resume the same call returns the validated decision.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::code::CodeBlock;
use crate::runtime::component::ContextChunk;
use crate::runtime::error::{interrupt, GraphError, GraphResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Accept,
    Edit,
    #[serde(alias = "skip")]
    Ignore,
    #[serde(alias = "response")]
    Respond,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Accept => "accept",
            DecisionKind::Edit => "edit",
            DecisionKind::Ignore => "ignore",
            DecisionKind::Respond => "respond",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "accept" | "a" => Some(DecisionKind::Accept),
            "edit" | "e" => Some(DecisionKind::Edit),
            "ignore" | "skip" | "i" => Some(DecisionKind::Ignore),
            "respond" | "response" | "r" => Some(DecisionKind::Respond),
            _ => None,
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reviewer's answer. `payload` is required for `Edit` and ignored otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HumanDecision {
    #[serde(rename = "type")]
    pub kind: DecisionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl HumanDecision {
    pub fn accept() -> Self {
        Self {
            kind: DecisionKind::Accept,
            payload: None,
        }
    }

    pub fn ignore() -> Self {
        Self {
            kind: DecisionKind::Ignore,
            payload: None,
        }
    }

    pub fn edit(payload: impl Into<Value>) -> Self {
        Self {
            kind: DecisionKind::Edit,
            payload: Some(payload.into()),
        }
    }

    pub fn respond(text: impl Into<String>) -> Self {
        Self {
            kind: DecisionKind::Respond,
            payload: Some(Value::String(text.into())),
        }
    }

    /// Decode a resume value: a bare kind string or a `{"type", "payload"}` object.
    pub fn from_value(value: Value) -> GraphResult<Self> {
        match value {
            Value::String(kind) => DecisionKind::parse(&kind)
                .map(|kind| Self {
                    kind,
                    payload: None,
                })
                .ok_or_else(|| GraphError::protocol(format!("unsupported decision type '{kind}'"))),
            value @ Value::Object(_) => serde_json::from_value(value)
                .map_err(|err| GraphError::protocol(format!("malformed decision: {err}"))),
            other => Err(GraphError::protocol(format!(
                "decision must be a string or object, got {other}"
            ))),
        }
    }

    /// Reject kinds the checkpoint does not offer and payload-less edits.
    pub fn ensure_allowed(&self, allowed: &[DecisionKind]) -> GraphResult<()> {
        if !allowed.contains(&self.kind) {
            let offered: Vec<&str> = allowed.iter().map(DecisionKind::as_str).collect();
            return Err(GraphError::protocol(format!(
                "decision '{}' is not allowed here (allowed: {})",
                self.kind,
                offered.join(", ")
            )));
        }
        if self.kind == DecisionKind::Edit && self.payload.as_ref().map_or(true, Value::is_null) {
            return Err(GraphError::protocol("edit decision requires a payload"));
        }
        Ok(())
    }
}

/// Where in the controller a review happens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewCheckpoint {
    CheckCode,
    ReviewQuery,
    ReviewDocuments,
}

impl ReviewCheckpoint {
    pub fn allowed(&self) -> &'static [DecisionKind] {
        match self {
            ReviewCheckpoint::CheckCode | ReviewCheckpoint::ReviewQuery => &[
                DecisionKind::Accept,
                DecisionKind::Edit,
                DecisionKind::Ignore,
            ],
            ReviewCheckpoint::ReviewDocuments => &[DecisionKind::Edit, DecisionKind::Ignore],
        }
    }

    /// Graph node that raises this checkpoint.
    pub fn node(&self) -> &'static str {
        match self {
            ReviewCheckpoint::CheckCode => crate::agent::graph::nodes::HUMAN_CHECK,
            ReviewCheckpoint::ReviewQuery => crate::agent::graph::nodes::REVIEW_QUERY,
            ReviewCheckpoint::ReviewDocuments => crate::agent::graph::nodes::REVIEW_DOCUMENTS,
        }
    }
}

/// Payload handed to the presentation layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub checkpoint: ReviewCheckpoint,
    pub action: String,
    pub args: BTreeMap<String, String>,
    pub allowed: Vec<DecisionKind>,
    pub description: String,
}

impl DecisionRequest {
    fn new(checkpoint: ReviewCheckpoint, action: &str, description: &str) -> Self {
        Self {
            checkpoint,
            action: action.to_string(),
            args: BTreeMap::new(),
            allowed: checkpoint.allowed().to_vec(),
            description: description.to_string(),
        }
    }

    pub fn check_code(block: &CodeBlock) -> Self {
        let mut request = Self::new(
            ReviewCheckpoint::CheckCode,
            "check_code",
            "Review the generated code before it is executed.",
        );
        request.args.insert("prefix".to_string(), block.prefix.clone());
        request.args.insert("imports".to_string(), block.imports.clone());
        request.args.insert("code".to_string(), block.code.clone());
        request
    }

    pub fn review_query(query: &str) -> Self {
        let mut request = Self::new(
            ReviewCheckpoint::ReviewQuery,
            "review_query",
            "Review the documentation search query. Skipping searches nothing.",
        );
        request.args.insert("query".to_string(), query.to_string());
        request
    }

    pub fn review_documents(chunks: &[ContextChunk]) -> Self {
        let mut request = Self::new(
            ReviewCheckpoint::ReviewDocuments,
            "review_documents",
            "Edit retrieved documents. Clearing a document removes it.",
        );
        for (index, chunk) in chunks.iter().enumerate() {
            request
                .args
                .insert(document_slot(index), format!("{}\n{}", chunk.heading, chunk.content));
        }
        request
    }
}

fn document_slot(index: usize) -> String {
    format!("document_{index}")
}

/// Return the decision delivered on resume, or suspend with `request`.
pub fn request_decision(
    request: DecisionRequest,
    resume: Option<Value>,
) -> GraphResult<HumanDecision> {
    match resume {
        Some(value) => {
            let decision = HumanDecision::from_value(value)?;
            decision.ensure_allowed(&request.allowed)?;
            Ok(decision)
        }
        None => {
            let node = request.checkpoint.node();
            interrupt(request, node)
        }
    }
}

/// Apply an edit to the current code block.
///
/// A string payload is parsed like model output. An object payload overrides
/// any of `prefix`, `imports`, `code` and is re-parsed after rendering. `None`
/// means the edit held no code and should be treated as ignored.
pub fn apply_code_edit(payload: &Value, current: &CodeBlock) -> Option<CodeBlock> {
    match payload {
        Value::String(text) => CodeBlock::extract(text),
        Value::Object(fields) => {
            let field = |name: &str, fallback: &str| {
                fields
                    .get(name)
                    .and_then(Value::as_str)
                    .unwrap_or(fallback)
                    .to_string()
            };
            let candidate = CodeBlock {
                prefix: field("prefix", &current.prefix),
                imports: field("imports", &current.imports),
                code: field("code", &current.code),
            };
            CodeBlock::extract(&candidate.render())
        }
        _ => None,
    }
}

/// Edited query text, or the current query when the payload is unusable.
pub fn apply_query_edit(payload: &Value, current: &str) -> String {
    let edited = match payload {
        Value::String(text) => Some(text.as_str()),
        Value::Object(fields) => fields.get("query").and_then(Value::as_str),
        _ => None,
    };
    edited.unwrap_or(current).trim().to_string()
}

/// Apply per-document edits. An emptied slot drops its document.
///
/// Accepts `{"document_0": "..."}`, `{"0": "..."}`, `["...", null]` or
/// `{"documents": [...]}`. Slots left out or `null` keep their document.
/// Slots are presented as `heading\ncontent`; a leading heading line in the
/// edited text is dropped so an unchanged slot round-trips.
pub fn apply_document_edit(chunks: &[ContextChunk], payload: &Value) -> Vec<ContextChunk> {
    let slot = |index: usize| -> Option<&str> {
        match payload {
            Value::Array(items) => items.get(index).and_then(Value::as_str),
            Value::Object(fields) => match fields.get("documents") {
                Some(Value::Array(items)) => items.get(index).and_then(Value::as_str),
                _ => fields
                    .get(&document_slot(index))
                    .or_else(|| fields.get(&index.to_string()))
                    .and_then(Value::as_str),
            },
            _ => None,
        }
    };

    chunks
        .iter()
        .enumerate()
        .filter_map(|(index, chunk)| match slot(index) {
            Some(text) => {
                let content = text
                    .strip_prefix(chunk.heading.as_str())
                    .and_then(|rest| rest.strip_prefix('\n'))
                    .unwrap_or(text);
                if content.trim().is_empty() {
                    None
                } else {
                    Some(ContextChunk {
                        content: content.to_string(),
                        ..chunk.clone()
                    })
                }
            }
            None => Some(chunk.clone()),
        })
        .collect()
}
