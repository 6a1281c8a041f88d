//! Prompt text and the message list sent to the model.

use crate::agent::retrieval::format_context;
use crate::agent::state::ConversationState;
use crate::runtime::message::{Message, MessageRole};

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a coding assistant for the Julia programming language.
Answer the user's question. When code is needed, first explain the solution in
a short paragraph, then give one fenced ```julia block. Put every `using` and
`import` statement at the top of the block, followed by the code. The code must
run as-is in a fresh Julia session. If no code is needed, answer in prose only.
Use the documentation context below when it is relevant.";

/// Appended as a user message before regenerating after a failed validation.
pub const RETRY_INSTRUCTION: &str = "\
Now, try again. Give a short explanation, then one ```julia block with the \
imports first and the code after them. Fix the error reported above.";

/// Closing message when the model keeps calling tools with no steps left.
pub const STEP_BUDGET_APOLOGY: &str =
    "Sorry, need more steps to process this request.";

/// System prompt with the retrieved context, followed by the full history.
pub fn build_messages(system_prompt: &str, state: &ConversationState) -> Vec<Message> {
    let context = format_context(state.retrieved_context.as_deref());
    let system = format!("{system_prompt}\n\nDocumentation context:\n{context}");
    let mut messages = Vec::with_capacity(state.messages.len() + 1);
    messages.push(Message::text(MessageRole::System, system));
    messages.extend(state.messages.iter().cloned());
    messages
}
