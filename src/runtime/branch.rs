//! Conditional routing out of a node.

use std::collections::HashMap;
use std::sync::Arc;

use crate::runtime::error::{GraphError, GraphResult};
use crate::runtime::state::GraphState;

/// Router returning a route key for the current state.
pub type RouteFn<S> = Arc<dyn Fn(&S) -> GraphResult<String> + Send + Sync>;

/// Conditional edge: a router plus an optional key-to-node map.
pub struct BranchSpec<S: GraphState> {
    pub name: String,
    router: RouteFn<S>,
    path_map: Option<HashMap<String, String>>,
}

impl<S: GraphState> BranchSpec<S> {
    pub fn new(
        name: impl Into<String>,
        router: RouteFn<S>,
        path_map: Option<HashMap<String, String>>,
    ) -> Self {
        Self {
            name: name.into(),
            router,
            path_map,
        }
    }

    /// Resolve the target node for `state`. Without a path map the route key
    /// is the node name.
    pub fn resolve(&self, state: &S) -> GraphResult<String> {
        let key = (self.router)(state)?;
        match &self.path_map {
            None => Ok(key),
            Some(map) => map.get(&key).cloned().ok_or_else(|| GraphError::ExecutionError {
                node: self.name.clone(),
                message: format!("no path mapped for route '{key}'"),
            }),
        }
    }

    /// Targets known at build time, if the branch declares a path map.
    pub fn targets(&self) -> Option<Vec<&str>> {
        self.path_map
            .as_ref()
            .map(|map| map.values().map(String::as_str).collect())
    }
}

impl<S: GraphState> Clone for BranchSpec<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            router: Arc::clone(&self.router),
            path_map: self.path_map.clone(),
        }
    }
}
