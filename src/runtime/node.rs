//! Node definitions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::runtime::error::GraphResult;
use crate::runtime::state::GraphState;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased async node handler.
pub type NodeFn<S> = Arc<dyn Fn(S) -> BoxFuture<'static, GraphResult<S>> + Send + Sync>;

/// A named node in the graph.
pub struct NodeSpec<S: GraphState> {
    pub name: String,
    handler: NodeFn<S>,
}

impl<S: GraphState> NodeSpec<S> {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GraphResult<S>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |state: S| -> BoxFuture<'static, GraphResult<S>> {
                Box::pin(handler(state))
            }),
        }
    }

    pub async fn execute(&self, state: S) -> GraphResult<S> {
        (self.handler)(state).await
    }
}

impl<S: GraphState> Clone for NodeSpec<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}
