//! Graph executor with checkpointed interrupt/resume.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::runtime::branch::BranchSpec;
use crate::runtime::constants::{DEFAULT_RECURSION_LIMIT, END, START};
use crate::runtime::error::{GraphError, GraphResult, Interrupt, ResumeCommand};
use crate::runtime::event::{Event, EventSink};
use crate::runtime::graph::{evaluate_branch, Edge, StateGraph};
use crate::runtime::node::NodeSpec;
use crate::runtime::state::GraphState;
use crate::runtime::trace::{ExecutionTrace, TraceEvent};

/// Per-graph execution settings.
#[derive(Clone)]
pub struct ExecutionConfig {
    /// Maximum node executions in one run, resumes included.
    pub recursion_limit: usize,
    pub run_event_sink: Option<Arc<dyn EventSink>>,
    pub trace: Option<Arc<Mutex<ExecutionTrace>>>,
}

impl ExecutionConfig {
    pub fn new() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            run_event_sink: None,
            trace: None,
        }
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_run_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.run_event_sink = Some(sink);
        self
    }

    pub fn with_trace(mut self, trace: Arc<Mutex<ExecutionTrace>>) -> Self {
        self.trace = Some(trace);
        self
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot taken when a node interrupts. Serializable, so a run can be
/// resumed by another process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    pub run_id: String,
    pub checkpoint_id: String,
    /// RFC3339 timestamp.
    pub created_at: String,
    /// State as it was before the interrupted node ran.
    pub state: S,
    /// The interrupted node; execution restarts here.
    pub next_node: String,
    pub pending_interrupts: Vec<Interrupt>,
    /// Node executions already spent in this run.
    pub steps: usize,
}

/// Outcome of a resumable run.
#[derive(Debug)]
pub enum ExecutionResult<S> {
    Complete(S),
    Interrupted {
        checkpoint: Checkpoint<S>,
        interrupts: Vec<Interrupt>,
    },
}

impl<S> ExecutionResult<S> {
    pub fn is_complete(&self) -> bool {
        matches!(self, ExecutionResult::Complete(_))
    }
}

/// A validated graph ready for execution.
pub struct CompiledGraph<S: GraphState> {
    pub(crate) nodes: HashMap<String, NodeSpec<S>>,
    pub(crate) edges: HashMap<String, Vec<Edge>>,
    pub(crate) branches: HashMap<String, BranchSpec<S>>,
    config: ExecutionConfig,
}

impl<S: GraphState> CompiledGraph<S> {
    pub(crate) fn new(graph: StateGraph<S>) -> Self {
        Self {
            nodes: graph.nodes,
            edges: graph.edges,
            branches: graph.branches,
            config: ExecutionConfig::new(),
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.config.recursion_limit = limit;
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run to completion. An interrupt is returned as `GraphError::Interrupted`.
    pub async fn invoke(&self, initial_state: S) -> GraphResult<S> {
        match self.invoke_resumable(initial_state).await? {
            ExecutionResult::Complete(state) => Ok(state),
            ExecutionResult::Interrupted { interrupts, .. } => {
                Err(GraphError::Interrupted(interrupts))
            }
        }
    }

    /// Run until completion or the first interrupt.
    pub async fn invoke_resumable(&self, initial_state: S) -> GraphResult<ExecutionResult<S>> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.emit_run_event(Event::RunStarted {
            run_id: run_id.clone(),
        })?;
        let result = self
            .run_from(run_id.clone(), initial_state, START.to_string(), 0)
            .await;
        self.finish_run(run_id, result)
    }

    /// Continue an interrupted run, delivering `command.value` to the node
    /// that raised the interrupt.
    pub async fn resume(
        &self,
        checkpoint: Checkpoint<S>,
        command: ResumeCommand,
    ) -> GraphResult<ExecutionResult<S>> {
        if let Some(interrupt_id) = &command.interrupt_id {
            let known = checkpoint
                .pending_interrupts
                .iter()
                .any(|pending| &pending.id == interrupt_id);
            if !known {
                return Err(GraphError::Protocol(format!(
                    "resume targets unknown interrupt '{interrupt_id}'"
                )));
            }
        }
        if !self.has_node(&checkpoint.next_node) {
            return Err(GraphError::NodeNotFound(checkpoint.next_node));
        }

        let run_id = checkpoint.run_id.clone();
        self.emit_run_event(Event::RunResumed {
            run_id: run_id.clone(),
            checkpoint_id: checkpoint.checkpoint_id.clone(),
        })?;

        let mut state = checkpoint.state;
        state.set_resume(&checkpoint.next_node, command.value);
        let result = self
            .run_from(run_id.clone(), state, checkpoint.next_node, checkpoint.steps)
            .await;
        self.finish_run(run_id, result)
    }

    async fn run_from(
        &self,
        run_id: String,
        initial_state: S,
        start_node: String,
        start_steps: usize,
    ) -> GraphResult<ExecutionResult<S>> {
        let mut state = initial_state;
        let mut current = if start_node == START {
            self.next_node(START, &state)?
        } else {
            start_node
        };
        let mut steps = start_steps;
        let limit = self.config.recursion_limit;

        while current != END {
            if steps >= limit {
                return Err(GraphError::RecursionLimit { limit });
            }
            steps += 1;
            state.set_remaining_steps(limit - steps + 1);

            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| GraphError::NodeNotFound(current.clone()))?;
            debug!(node = %current, step = steps, "executing node");
            self.record_trace(TraceEvent::NodeStart {
                node: current.clone(),
            });

            match node.execute(state.clone()).await {
                Ok(next_state) => state = next_state,
                Err(GraphError::Interrupted(interrupts)) => {
                    debug!(node = %current, "node interrupted");
                    self.record_trace(TraceEvent::Interrupted {
                        node: current.clone(),
                    });
                    let checkpoint = Checkpoint {
                        run_id,
                        checkpoint_id: uuid::Uuid::new_v4().to_string(),
                        created_at: chrono::Utc::now().to_rfc3339(),
                        state,
                        next_node: current,
                        pending_interrupts: interrupts.clone(),
                        // The interrupted attempt is re-run on resume.
                        steps: steps - 1,
                    };
                    return Ok(ExecutionResult::Interrupted {
                        checkpoint,
                        interrupts,
                    });
                }
                Err(err) => return Err(err),
            }

            self.record_trace(TraceEvent::NodeFinish {
                node: current.clone(),
            });
            current = self.next_node(&current, &state)?;
        }

        Ok(ExecutionResult::Complete(state))
    }

    fn next_node(&self, current: &str, state: &S) -> GraphResult<String> {
        let Some(edges) = self.edges.get(current) else {
            return Ok(END.to_string());
        };
        let mut direct: Option<&String> = None;
        for edge in edges {
            match edge {
                Edge::Conditional(branch) => {
                    return evaluate_branch(&self.branches, branch, state);
                }
                Edge::Direct(to) => {
                    direct.get_or_insert(to);
                }
            }
        }
        Ok(direct.cloned().unwrap_or_else(|| END.to_string()))
    }

    fn finish_run(
        &self,
        run_id: String,
        result: GraphResult<ExecutionResult<S>>,
    ) -> GraphResult<ExecutionResult<S>> {
        match &result {
            Ok(ExecutionResult::Complete(_)) => {
                self.emit_run_event(Event::RunCompleted { run_id })?;
            }
            Ok(ExecutionResult::Interrupted { checkpoint, .. }) => {
                self.emit_run_event(Event::RunPaused {
                    run_id,
                    checkpoint_id: checkpoint.checkpoint_id.clone(),
                })?;
            }
            Err(err) => {
                self.emit_run_event(Event::RunFailed {
                    run_id,
                    error: err.to_string(),
                })?;
            }
        }
        result
    }

    fn emit_run_event(&self, event: Event) -> GraphResult<()> {
        if let Some(sink) = &self.config.run_event_sink {
            sink.emit(event)?;
        }
        Ok(())
    }

    fn record_trace(&self, event: TraceEvent) {
        if let Some(trace) = &self.config.trace {
            match trace.lock() {
                Ok(mut trace) => trace.record_event(event),
                Err(_) => warn!("execution trace lock poisoned; dropping event"),
            }
        }
    }
}
