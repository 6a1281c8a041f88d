//! Reserved node names and engine defaults.

/// Virtual entry node. Every graph needs an edge out of it.
pub const START: &str = "__start__";
/// Virtual terminal node.
pub const END: &str = "__end__";

/// Default upper bound on node executions per run.
pub const DEFAULT_RECURSION_LIMIT: usize = 50;
