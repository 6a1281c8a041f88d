//! Graph builder.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::runtime::branch::BranchSpec;
use crate::runtime::constants::{END, START};
use crate::runtime::error::{GraphError, GraphResult};
use crate::runtime::executor::CompiledGraph;
use crate::runtime::node::NodeSpec;
use crate::runtime::state::GraphState;

/// Outgoing edge of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Edge {
    Direct(String),
    /// Name of a registered branch.
    Conditional(String),
}

/// Mutable graph under construction. `compile` validates and freezes it.
pub struct StateGraph<S: GraphState> {
    pub(crate) nodes: HashMap<String, NodeSpec<S>>,
    pub(crate) edges: HashMap<String, Vec<Edge>>,
    pub(crate) branches: HashMap<String, BranchSpec<S>>,
}

impl<S: GraphState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            branches: HashMap::new(),
        }
    }

    pub fn add_node<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GraphResult<S>> + Send + 'static,
    {
        let name = name.into();
        self.nodes.insert(name.clone(), NodeSpec::new(name, handler));
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges
            .entry(from.into())
            .or_default()
            .push(Edge::Direct(to.into()));
        self
    }

    /// Route out of `from` by calling `router` on the state after it runs.
    pub fn add_conditional_edges<F>(
        &mut self,
        from: impl Into<String>,
        router: F,
        path_map: Option<HashMap<String, String>>,
    ) -> &mut Self
    where
        F: Fn(&S) -> GraphResult<String> + Send + Sync + 'static,
    {
        let from = from.into();
        let branch_name = format!("{from}:branch");
        self.branches.insert(
            branch_name.clone(),
            BranchSpec::new(branch_name.clone(), Arc::new(router), path_map),
        );
        self.edges
            .entry(from)
            .or_default()
            .push(Edge::Conditional(branch_name));
        self
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn compile(self) -> GraphResult<CompiledGraph<S>> {
        self.validate()?;
        Ok(CompiledGraph::new(self))
    }

    fn validate(&self) -> GraphResult<()> {
        for name in self.nodes.keys() {
            if name == START || name == END {
                return Err(GraphError::InvalidGraph(format!(
                    "'{name}' is a reserved node name"
                )));
            }
        }
        if !self.edges.contains_key(START) {
            return Err(GraphError::InvalidGraph(
                "no entry edge from START".to_string(),
            ));
        }
        for (from, edges) in &self.edges {
            if from != START && !self.has_node(from) {
                return Err(GraphError::NodeNotFound(from.clone()));
            }
            for edge in edges {
                match edge {
                    Edge::Direct(to) => self.check_target(to)?,
                    Edge::Conditional(branch) => {
                        let targets = self
                            .branches
                            .get(branch)
                            .and_then(|spec| spec.targets())
                            .unwrap_or_default();
                        for target in targets {
                            self.check_target(target)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_target(&self, target: &str) -> GraphResult<()> {
        if target == END || self.has_node(target) {
            Ok(())
        } else {
            Err(GraphError::NodeNotFound(target.to_string()))
        }
    }
}

/// Resolve a registered branch by name.
pub(crate) fn evaluate_branch<S: GraphState>(
    branches: &HashMap<String, BranchSpec<S>>,
    name: &str,
    state: &S,
) -> GraphResult<String> {
    branches
        .get(name)
        .ok_or_else(|| GraphError::InvalidGraph(format!("unknown branch '{name}'")))?
        .resolve(state)
}
