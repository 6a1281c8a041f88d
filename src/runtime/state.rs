//! State trait for graph execution.
//!
//! The state is the single record every node receives by value and returns.
//! The executor only talks to it through the hooks below, so a state type
//! keeps compiler-checked fields instead of a loosely typed key/value bag.

/// Trait for graph state.
///
/// # Example
/// ```rust,no_run
/// use juliacoder::runtime::state::GraphState;
///
/// #[derive(Clone, Default)]
/// struct Counter {
///     hits: u32,
/// }
///
/// impl GraphState for Counter {}
/// ```
pub trait GraphState: Clone + Send + Sync + 'static {
    /// Called before each node with the number of node executions left
    /// under the recursion limit, counting the node about to run.
    fn set_remaining_steps(&mut self, _remaining: usize) {}

    /// Deliver a resume value to the node that raised the pending interrupt.
    fn set_resume(&mut self, _node: &str, _value: serde_json::Value) {}
}
