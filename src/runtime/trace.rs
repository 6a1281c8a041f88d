//! Node-level execution trace.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    NodeStart { node: String },
    NodeFinish { node: String },
    Interrupted { node: String },
}

/// Ordered record of what the executor did.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub events: Vec<TraceEvent>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    /// Nodes that ran to completion, in order.
    pub fn finished_nodes(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::NodeFinish { node } => Some(node.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count_finished(&self, node: &str) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, TraceEvent::NodeFinish { node: n } if n == node))
            .count()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
