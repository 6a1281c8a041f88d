//! Node bodies of the controller graph.
//!
//! Each handler takes the state by value and returns it. Recoverable
//! failures are written into the state as messages; only protocol and
//! fatal I/O errors leave a handler as `Err`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::code::CodeBlock;
use crate::agent::graph::{nodes, AgentContext};
use crate::agent::AgentConfig;
use crate::agent::human::{
    apply_code_edit, apply_document_edit, apply_query_edit, request_decision, DecisionKind,
    DecisionRequest,
};
use crate::agent::prompt::{build_messages, RETRY_INSTRUCTION, STEP_BUDGET_APOLOGY};
use crate::agent::retrieval::{merge_chunks, retrieve_context};
use crate::agent::state::{ConversationState, TurnOutcome};
use crate::runtime::component::{chunks_from_tool_output, ChatRequest};
use crate::runtime::error::{GraphError, GraphResult};
use crate::runtime::event::Event;
use crate::runtime::message::{Message, MessageRole, Part};

pub async fn review_query(
    _ctx: Arc<AgentContext>,
    mut state: ConversationState,
) -> GraphResult<ConversationState> {
    let query = match &state.rag_query {
        Some(query) => query.clone(),
        None => state.latest_user_message().unwrap_or_default(),
    };
    let resume = state.take_resume(nodes::REVIEW_QUERY);
    let decision = request_decision(DecisionRequest::review_query(&query), resume)?;
    state.rag_query = Some(match decision.kind {
        DecisionKind::Edit => match &decision.payload {
            Some(payload) => apply_query_edit(payload, &query),
            None => query,
        },
        DecisionKind::Ignore => String::new(),
        _ => query,
    });
    debug!(decision = %decision.kind, "retrieval query reviewed");
    Ok(state)
}

pub async fn retrieve(
    ctx: Arc<AgentContext>,
    mut state: ConversationState,
) -> GraphResult<ConversationState> {
    let Some(retriever) = &ctx.retriever else {
        debug!("no retriever configured");
        return Ok(state);
    };
    let query = match &state.rag_query {
        Some(query) => query.clone(),
        None => state.latest_user_message().unwrap_or_default(),
    };
    state.retrieved_context =
        retrieve_context(retriever.as_ref(), &query, ctx.config.retrieval_limit).await;
    Ok(state)
}

pub async fn review_documents(
    _ctx: Arc<AgentContext>,
    mut state: ConversationState,
) -> GraphResult<ConversationState> {
    let chunks = state.retrieved_context.clone().unwrap_or_default();
    if chunks.is_empty() {
        return Ok(state);
    }
    let resume = state.take_resume(nodes::REVIEW_DOCUMENTS);
    let decision = request_decision(DecisionRequest::review_documents(&chunks), resume)?;
    if let (DecisionKind::Edit, Some(payload)) = (decision.kind, &decision.payload) {
        let accepted = apply_document_edit(&chunks, payload);
        debug!(before = chunks.len(), after = accepted.len(), "documents reviewed");
        state.retrieved_context = Some(accepted);
    }
    Ok(state)
}

pub async fn generate(
    ctx: Arc<AgentContext>,
    mut state: ConversationState,
) -> GraphResult<ConversationState> {
    if let Some(dangling) = state.pending_tool_calls().first() {
        return Err(GraphError::protocol(format!(
            "tool call '{}' ({}) has no result before the next model call",
            dangling.call_id, dangling.tool
        )));
    }
    state.generation_failed = false;
    if state.error && !state.retry_instructed {
        state.push_text(MessageRole::User, RETRY_INSTRUCTION);
        state.retry_instructed = true;
    }

    let mut request = ChatRequest::new(
        state.session_id.clone(),
        build_messages(ctx.system_prompt(), &state),
    );
    if !ctx.tools.is_empty() {
        request = request.with_tools(ctx.tools.definitions());
    }

    let response = match ctx.model.generate(request).await {
        Ok(response) => response,
        Err(err) => return Ok(generation_failed(&ctx, state, &err.to_string())),
    };

    if response.message.has_tool_calls() {
        if !tool_round_trip_fits(&state, &ctx.config) {
            warn!(
                remaining_steps = state.remaining_steps,
                "tool calls requested without step budget"
            );
            state.push_text(MessageRole::Assistant, STEP_BUDGET_APOLOGY);
            state.outcome = Some(TurnOutcome::StepBudgetExhausted);
            return Ok(state);
        }
        debug!(calls = response.message.tool_calls().len(), "model requested tools");
        ctx.emit(Event::StepFinish {
            session_id: state.session_id.clone(),
            tokens: response.usage.clone().unwrap_or_default(),
        });
        state.push_message(response.message);
        return Ok(state);
    }

    let text = response.text().unwrap_or_default();
    if text.trim().is_empty() {
        return Ok(generation_failed(&ctx, state, "model returned an empty response"));
    }

    state.iterations += 1;
    let block = CodeBlock::parse(&text);
    let rendered = block.render();
    let message = Message::text(MessageRole::Assistant, rendered.clone());
    ctx.emit(Event::TextFinal {
        session_id: state.session_id.clone(),
        message_id: message.id.clone(),
        text: rendered,
    });
    ctx.emit(Event::StepFinish {
        session_id: state.session_id.clone(),
        tokens: response.usage.clone().unwrap_or_default(),
    });
    debug!(
        iteration = state.iterations,
        has_code = !block.is_empty(),
        "generation finished"
    );
    state.push_message(message);
    state.code = Some(block);
    Ok(state)
}

/// A tool round trip costs two steps (tools, generate). Afterwards every
/// remaining iteration may need three (generate, human_check, validate)
/// plus `min_remaining_steps` for finalize and slack.
fn tool_round_trip_fits(state: &ConversationState, config: &AgentConfig) -> bool {
    let pending_iterations = config.max_iterations.saturating_sub(state.iterations) as usize;
    let needed = config.min_remaining_steps + 3 * pending_iterations;
    !state.is_last_step && state.remaining_steps.saturating_sub(2) >= needed
}

fn generation_failed(
    ctx: &AgentContext,
    mut state: ConversationState,
    reason: &str,
) -> ConversationState {
    warn!(error = %reason, iteration = state.iterations + 1, "generation failed");
    state.iterations += 1;
    state.generation_failed = true;
    state.code = None;
    state.push_message(
        Message::text(
            MessageRole::Assistant,
            format!("I could not generate a response: {reason}"),
        )
        .with_part(Part::Error {
            message: reason.to_string(),
        }),
    );
    ctx.emit(Event::Error {
        session_id: state.session_id.clone(),
        message: reason.to_string(),
    });
    state
}

/// Answer every pending tool call in one tool message.
pub async fn run_tools(
    ctx: Arc<AgentContext>,
    mut state: ConversationState,
) -> GraphResult<ConversationState> {
    let calls = state.pending_tool_calls();
    let mut reply = Message::new(MessageRole::Tool);
    let mut documents = Vec::new();
    for call in calls {
        let tool = call.tool.clone();
        let call_id = call.call_id.clone();
        match ctx.tools.run(call, ctx.sink.as_ref()).await {
            Ok(output) => {
                documents.extend(chunks_from_tool_output(&output));
                reply = reply.with_part(Part::ToolResult {
                    tool,
                    call_id,
                    output,
                });
            }
            Err(err) if err.is_fatal_io() => return Err(err),
            Err(err) => {
                warn!(tool = %tool, error = %err, "tool call failed");
                reply = reply.with_part(Part::ToolError {
                    tool,
                    call_id,
                    error: err.to_string(),
                });
            }
        }
    }
    state.push_message(reply);
    if !documents.is_empty() {
        let context = state.retrieved_context.get_or_insert_with(Vec::new);
        merge_chunks(context, documents);
    }
    Ok(state)
}

pub async fn human_check(
    _ctx: Arc<AgentContext>,
    mut state: ConversationState,
) -> GraphResult<ConversationState> {
    let Some(code) = state.code.clone().filter(|code| !code.is_empty()) else {
        state.human_verdict = Some(DecisionKind::Ignore);
        return Ok(state);
    };
    let resume = state.take_resume(nodes::HUMAN_CHECK);
    let decision = request_decision(DecisionRequest::check_code(&code), resume)?;
    let edited = match (decision.kind, &decision.payload) {
        (DecisionKind::Edit, Some(payload)) => Some(apply_code_edit(payload, &code)),
        _ => None,
    };
    state.human_verdict = Some(match edited {
        Some(Some(block)) => {
            state.push_text(
                MessageRole::Assistant,
                format!("Code edited during review:\n\n{}", block.render()),
            );
            state.code = Some(block);
            DecisionKind::Edit
        }
        Some(None) => {
            warn!("edited text has no code region; treating the review as ignored");
            DecisionKind::Ignore
        }
        None => decision.kind,
    });
    info!(decision = ?state.human_verdict, "code review decided");
    Ok(state)
}

pub async fn validate(
    ctx: Arc<AgentContext>,
    mut state: ConversationState,
) -> GraphResult<ConversationState> {
    let Some(code) = state.code.clone() else {
        return Ok(state);
    };
    let result = ctx.validator.validate(&code)?;
    ctx.emit(Event::ValidationFinished {
        session_id: state.session_id.clone(),
        iteration: state.iterations,
        failed: result.failed,
        phase: result.failed.then(|| result.phase.as_str().to_string()),
    });
    if result.failed {
        info!(phase = %result.phase, iteration = state.iterations, "validation failed");
        state.push_text(MessageRole::User, result.error_report());
        state.error = true;
        state.retry_instructed = false;
    } else {
        info!(iteration = state.iterations, "validation passed");
        state.error = false;
    }
    state.last_validation = Some(result);
    Ok(state)
}

pub async fn finalize(
    ctx: Arc<AgentContext>,
    mut state: ConversationState,
) -> GraphResult<ConversationState> {
    let outcome = classify(&state);
    let mut written = None;
    if let (Some(writer), Some(code)) = (&ctx.writer, state.code.as_ref()) {
        if !code.is_empty() {
            written = Some(writer.write(code)?);
        }
    }

    let closing = match outcome {
        TurnOutcome::Validated => Some(format!(
            "The code ran successfully (attempt {} of {}).",
            state.iterations, ctx.config.max_iterations
        )),
        TurnOutcome::ForcedStop => {
            let mut text = format!(
                "Best effort, unresolved: the code still fails after {} attempts.",
                state.iterations
            );
            if let Some(result) = &state.last_validation {
                text.push_str(&format!(
                    "\nLast error ({}): {}",
                    result.phase.label(),
                    result.message
                ));
            }
            Some(text)
        }
        TurnOutcome::ValidationSkipped => {
            Some("Validation skipped at review; the code was not run.".to_string())
        }
        TurnOutcome::GenerationFailed => Some(format!(
            "No answer could be generated after {} attempts.",
            state.iterations
        )),
        TurnOutcome::NoCode | TurnOutcome::StepBudgetExhausted => None,
    };
    if let Some(mut text) = closing {
        if let Some(path) = &written {
            text.push_str(&format!("\nSaved to {}.", path.display()));
        }
        state.push_text(MessageRole::Assistant, text);
    }

    info!(outcome = outcome.as_str(), iterations = state.iterations, "request finished");
    state.outcome = Some(outcome);
    state.rag_query = None;
    state.human_verdict = None;
    state.generation_failed = false;
    state.resume = None;
    Ok(state)
}

fn classify(state: &ConversationState) -> TurnOutcome {
    if let Some(outcome) = state.outcome {
        return outcome;
    }
    if state.generation_failed {
        return TurnOutcome::GenerationFailed;
    }
    if !state.has_code() {
        return TurnOutcome::NoCode;
    }
    if state.human_verdict == Some(DecisionKind::Ignore) {
        return TurnOutcome::ValidationSkipped;
    }
    if state.error {
        return TurnOutcome::ForcedStop;
    }
    match &state.last_validation {
        Some(result) if !result.failed => TurnOutcome::Validated,
        _ => TurnOutcome::ValidationSkipped,
    }
}
