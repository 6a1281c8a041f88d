use juliacoder::runtime::constants::{END, START};
use juliacoder::runtime::error::GraphError;
use juliacoder::runtime::graph::StateGraph;
use juliacoder::runtime::state::GraphState;
use futures::executor::block_on;

#[derive(Clone, Debug, Default)]
struct RouteState {
    route: String,
    visited: Vec<String>,
}

impl GraphState for RouteState {}

async fn decide(state: RouteState) -> Result<RouteState, GraphError> {
    Ok(state)
}

async fn approve(mut state: RouteState) -> Result<RouteState, GraphError> {
    state.visited.push("approve".to_string());
    Ok(state)
}

async fn reject(mut state: RouteState) -> Result<RouteState, GraphError> {
    state.visited.push("reject".to_string());
    Ok(state)
}

fn route_by_state(state: &RouteState) -> Result<String, GraphError> {
    Ok(state.route.clone())
}

fn routing_graph() -> StateGraph<RouteState> {
    let mut graph = StateGraph::<RouteState>::new();
    graph.add_node("decide", decide);
    graph.add_node("approve", approve);
    graph.add_node("reject", reject);
    graph.add_edge(START, "decide");
    graph.add_conditional_edges(
        "decide",
        route_by_state,
        Some(
            [
                ("yes".to_string(), "approve".to_string()),
                ("no".to_string(), "reject".to_string()),
            ]
            .into_iter()
            .collect(),
        ),
    );
    graph.add_edge("approve", END);
    graph.add_edge("reject", END);
    graph
}

fn run(route: &str) -> Result<RouteState, GraphError> {
    let compiled = routing_graph().compile().expect("compile");
    block_on(compiled.invoke(RouteState {
        route: route.to_string(),
        visited: Vec::new(),
    }))
}

#[test]
fn conditional_routing_selects_approve() {
    let final_state = run("yes").expect("run");
    assert_eq!(final_state.visited, vec!["approve".to_string()]);
}

#[test]
fn conditional_routing_selects_reject() {
    let final_state = run("no").expect("run");
    assert_eq!(final_state.visited, vec!["reject".to_string()]);
}

#[test]
fn unmapped_route_key_fails_the_run() {
    let err = run("maybe").unwrap_err();
    assert!(matches!(err, GraphError::ExecutionError { .. }));
}

#[test]
fn compile_rejects_unknown_targets() {
    let mut graph = routing_graph();
    graph.add_edge("approve", "missing");
    assert!(matches!(graph.compile(), Err(GraphError::NodeNotFound(_))));
}
