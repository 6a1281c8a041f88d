//! Session driver: turns, pending decisions and the interactive loop.
//!
//! A turn either completes or comes back as a [`PendingTurn`], a
//! serializable token holding the checkpoint and the decision request.
//! Callers can answer it in-process through a [`HumanInterruptPresenter`]
//! ([`CodingAgent::run_turn`]) or persist it and answer later
//! ([`CodingAgent::resume_turn`]).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::agent::config::AgentConfig;
use crate::agent::human::{DecisionRequest, HumanDecision};
use crate::agent::state::ConversationState;
use crate::runtime::error::{GraphError, GraphResult, Interrupt, ResumeCommand};
use crate::runtime::executor::{Checkpoint, CompiledGraph, ExecutionResult};
use crate::runtime::message::MessageRole;
use crate::runtime::session::CheckpointStore;

/// Presentation layer for review checkpoints.
pub trait HumanInterruptPresenter: Send + Sync {
    fn present(&self, request: &DecisionRequest) -> GraphResult<HumanDecision>;
}

/// Line-oriented user I/O for [`CodingAgent::run_session`].
pub trait Console {
    /// `Ok(None)` at end of input.
    fn read_line(&mut self, prompt: &str) -> GraphResult<Option<String>>;

    fn show(&mut self, text: &str);
}

/// A turn suspended at a review checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingTurn {
    pub checkpoint: Checkpoint<ConversationState>,
    pub request: DecisionRequest,
    pub interrupt_id: String,
}

#[derive(Debug)]
pub enum TurnStatus {
    Complete(ConversationState),
    Pending(PendingTurn),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// A quit token was entered; the caller should exit the process.
    Quit,
    EndOfInput,
}

pub struct CodingAgent {
    graph: CompiledGraph<ConversationState>,
    config: AgentConfig,
    presenter: Option<Arc<dyn HumanInterruptPresenter>>,
    store: Option<CheckpointStore>,
}

impl CodingAgent {
    pub fn new(graph: CompiledGraph<ConversationState>, config: AgentConfig) -> Self {
        Self {
            graph,
            config,
            presenter: None,
            store: None,
        }
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn HumanInterruptPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Persist pending decisions so another process can resume them.
    pub fn with_checkpoint_store(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn new_state(&self) -> ConversationState {
        ConversationState::new(uuid::Uuid::new_v4().to_string())
    }

    /// Begin a request and run until it finishes or needs a decision.
    pub async fn start_turn(
        &self,
        mut state: ConversationState,
        user_message: &str,
    ) -> GraphResult<TurnStatus> {
        state.begin_request(user_message, self.config.carry_history);
        info!(session_id = %state.session_id, "turn started");
        let result = self.graph.invoke_resumable(state).await?;
        self.settle(result)
    }

    /// Continue a suspended turn with the reviewer's decision.
    pub async fn resume_turn(
        &self,
        pending: PendingTurn,
        decision: HumanDecision,
    ) -> GraphResult<TurnStatus> {
        let command =
            ResumeCommand::new(serde_json::to_value(&decision)?).for_interrupt(pending.interrupt_id);
        let result = self.graph.resume(pending.checkpoint, command).await?;
        self.settle(result)
    }

    /// Run one request to completion, asking the presenter at each checkpoint.
    pub async fn run_turn(
        &self,
        state: ConversationState,
        user_message: &str,
    ) -> GraphResult<ConversationState> {
        let mut status = self.start_turn(state, user_message).await?;
        loop {
            match status {
                TurnStatus::Complete(state) => return Ok(state),
                TurnStatus::Pending(pending) => {
                    let presenter = self.presenter.as_ref().ok_or_else(|| {
                        GraphError::protocol("review requested but no presenter is attached")
                    })?;
                    let decision = presenter.present(&pending.request)?;
                    status = self.resume_turn(pending, decision).await?;
                }
            }
        }
    }

    /// Read requests until a quit token or end of input.
    ///
    /// A fatal I/O error aborts the current turn only: it is shown, and the
    /// session continues from the state before that turn.
    pub async fn run_session(
        &self,
        console: &mut dyn Console,
        mut state: ConversationState,
    ) -> GraphResult<SessionEnd> {
        loop {
            let Some(line) = console.read_line("> ")? else {
                return Ok(SessionEnd::EndOfInput);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if self.config.is_quit(line) {
                info!("quit requested");
                return Ok(SessionEnd::Quit);
            }

            let before = state.clone();
            state = match self.run_turn(state, line).await {
                Ok(next) => {
                    for message in next.turn_messages() {
                        if message.role == MessageRole::Assistant {
                            console.show(&message.text_content());
                        }
                    }
                    next
                }
                Err(err) if err.is_fatal_io() => {
                    error!(error = %err, "turn aborted");
                    console.show(&format!("error: {err}"));
                    before
                }
                Err(err) => return Err(err),
            };
        }
    }

    /// The stored pending turn for `session_id`, if any.
    pub fn load_pending(&self, session_id: &str) -> GraphResult<Option<PendingTurn>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(checkpoint) = store.load::<ConversationState>(session_id)? else {
            return Ok(None);
        };
        let interrupt = first_interrupt(&checkpoint.pending_interrupts)?;
        let request = decode_request(&interrupt)?;
        Ok(Some(PendingTurn {
            checkpoint,
            request,
            interrupt_id: interrupt.id,
        }))
    }

    fn settle(&self, result: ExecutionResult<ConversationState>) -> GraphResult<TurnStatus> {
        match result {
            ExecutionResult::Complete(state) => {
                if let Some(store) = &self.store {
                    store.clear(&state.session_id)?;
                }
                Ok(TurnStatus::Complete(state))
            }
            ExecutionResult::Interrupted {
                checkpoint,
                interrupts,
            } => {
                let interrupt = first_interrupt(&interrupts)?;
                let request = decode_request(&interrupt)?;
                if let Some(store) = &self.store {
                    store.save(&checkpoint.state.session_id, &checkpoint)?;
                }
                info!(checkpoint = ?request.checkpoint, node = %checkpoint.next_node, "turn waiting for review");
                Ok(TurnStatus::Pending(PendingTurn {
                    checkpoint,
                    request,
                    interrupt_id: interrupt.id,
                }))
            }
        }
    }
}

fn first_interrupt(interrupts: &[Interrupt]) -> GraphResult<Interrupt> {
    interrupts
        .first()
        .cloned()
        .ok_or_else(|| GraphError::protocol("run paused without a pending request"))
}

fn decode_request(interrupt: &Interrupt) -> GraphResult<DecisionRequest> {
    serde_json::from_value(interrupt.value.clone()).map_err(|err| {
        GraphError::protocol(format!(
            "interrupt from '{}' is not a decision request: {err}",
            interrupt.node
        ))
    })
}
