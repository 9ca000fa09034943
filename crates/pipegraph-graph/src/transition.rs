use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use pipegraph_core::error::{PipelineError, Result};
use pipegraph_core::types::{EdgeCondition, GraphEdge, GraphState, PathEntry, PipelineGraph};

use crate::condition::{signal_candidates, Signal};

/// Reason recorded by [`reset`].
pub const REASON_RESET: &str = "reset";

/// Reason recorded by [`advance`].
pub const REASON_ADVANCE: &str = "advance";

/// Outcome of an operation that may legitimately do nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Moved(PathEntry),
    /// Nothing to traverse; state is untouched.
    Stayed { reason: String },
}

impl Step {
    pub fn moved(&self) -> bool {
        matches!(self, Step::Moved(_))
    }
}

/// An outgoing edge of the current node, resolved for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeOption {
    pub edge_id: String,
    pub target: String,
    pub target_name: String,
    pub condition: EdgeCondition,
    pub priority: i32,
    pub visits: u32,
    pub max_visits: u32,
    /// Whether the target is still under its visit cap.
    pub open: bool,
}

/// A node at or near its visit cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitWarning {
    pub node: String,
    pub visits: u32,
    pub max_visits: u32,
    pub blocked: bool,
}

impl fmt::Display for VisitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blocked {
            write!(
                f,
                "BLOCKED: node '{}' has reached max visits ({}/{})",
                self.node, self.visits, self.max_visits
            )
        } else {
            write!(
                f,
                "WARNING: node '{}' approaching max visits ({}/{}, {} remaining)",
                self.node,
                self.visits,
                self.max_visits,
                self.max_visits.saturating_sub(self.visits)
            )
        }
    }
}

/// Visit cap of `node_id` under `state`'s default.
pub fn effective_cap(graph: &PipelineGraph, state: &GraphState, node_id: &str) -> u32 {
    graph
        .node(node_id)
        .map(|n| n.effective_max_visits(state.max_visits_default))
        .unwrap_or(state.max_visits_default)
}

fn is_open(graph: &PipelineGraph, state: &GraphState, node_id: &str) -> bool {
    state.visits(node_id) < effective_cap(graph, state, node_id)
}

/// A fresh state positioned on the start node.
pub fn initial_state(
    graph: &PipelineGraph,
    active_graph: Option<String>,
    max_visits_default: u32,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<GraphState> {
    let start = graph.start_node().ok_or(PipelineError::NoStartNode)?;
    let mut state = GraphState {
        active_graph,
        max_visits_default,
        ..GraphState::default()
    };
    state.record_transition(&start.id, None, reason, at);
    // The entry onto the start node is not a transition.
    state.total_transitions = 0;
    Ok(state)
}

/// Return to the start node with a single-entry history.
///
/// The active graph and the visit default survive; everything else starts
/// over, including the transition counter.
pub fn reset(graph: &PipelineGraph, state: &mut GraphState, at: DateTime<Utc>) -> Result<PathEntry> {
    *state = initial_state(
        graph,
        state.active_graph.clone(),
        state.max_visits_default,
        REASON_RESET,
        at,
    )?;
    state
        .execution_path
        .last()
        .cloned()
        .ok_or(PipelineError::NoStartNode)
}

/// Outgoing edges of the current node by priority.
pub fn available_edges(graph: &PipelineGraph, state: &GraphState) -> Vec<EdgeOption> {
    let Some(current) = state.current_node() else {
        return Vec::new();
    };

    graph
        .outgoing(current)
        .into_iter()
        .map(|edge| edge_option(graph, state, edge))
        .collect()
}

/// Edges `signal` would match from the current node, in firing order.
/// Nothing is recorded; the first open entry is the one [`fire_signal`] takes.
pub fn check_signal(graph: &PipelineGraph, state: &GraphState, signal: &Signal) -> Vec<EdgeOption> {
    let Some(current) = state.current_node() else {
        return Vec::new();
    };

    signal_candidates(graph, current, signal)
        .into_iter()
        .map(|edge| edge_option(graph, state, edge))
        .collect()
}

fn edge_option(graph: &PipelineGraph, state: &GraphState, edge: &GraphEdge) -> EdgeOption {
    EdgeOption {
        edge_id: edge.id.clone(),
        target: edge.to.clone(),
        target_name: graph.node_name(&edge.to).to_string(),
        condition: edge.condition.clone(),
        priority: edge.priority,
        visits: state.visits(&edge.to),
        max_visits: effective_cap(graph, state, &edge.to),
        open: is_open(graph, state, &edge.to),
    }
}

/// The edge [`advance`] would take, or why there is none.
pub fn select_advance<'g>(
    graph: &'g PipelineGraph,
    state: &GraphState,
) -> std::result::Result<&'g GraphEdge, String> {
    let current = state
        .current_node()
        .ok_or_else(|| "no active node".to_string())?;
    let outgoing = graph.outgoing(current);
    if outgoing.is_empty() {
        return Err(format!(
            "node '{}' has no outgoing edges",
            graph.node_name(current)
        ));
    }
    outgoing
        .into_iter()
        .find(|e| is_open(graph, state, &e.to))
        .ok_or_else(|| {
            format!(
                "every target of '{}' has reached its visit cap",
                graph.node_name(current)
            )
        })
}

/// Take the lowest-priority edge whose target is under its cap.
pub fn advance(graph: &PipelineGraph, state: &mut GraphState, at: DateTime<Utc>) -> Step {
    match select_advance(graph, state) {
        Ok(edge) => Step::Moved(state.record_transition(&edge.to, Some(&edge.id), REASON_ADVANCE, at)),
        Err(reason) => {
            debug!(%reason, "Advance refused");
            Step::Stayed { reason }
        }
    }
}

/// Traverse a named edge out of the current node.
pub fn traverse_edge(
    graph: &PipelineGraph,
    state: &mut GraphState,
    edge_id: &str,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<PathEntry> {
    let edge = graph
        .edge(edge_id)
        .ok_or_else(|| PipelineError::UnknownEdge(edge_id.to_string()))?;
    let current = state.current_node().ok_or(PipelineError::NoCurrentNode)?;

    if edge.from != current {
        return Err(PipelineError::InvalidTransition {
            edge: edge.id.clone(),
            from: edge.from.clone(),
            current: current.to_string(),
        });
    }
    if graph.node(&edge.to).is_none() {
        return Err(PipelineError::UnknownNode(edge.to.clone()));
    }

    let visits = state.visits(&edge.to);
    let max = effective_cap(graph, state, &edge.to);
    if visits >= max {
        return Err(PipelineError::VisitCapReached {
            node: edge.to.clone(),
            visits,
            max,
        });
    }

    Ok(state.record_transition(&edge.to, Some(&edge.id), reason, at))
}

/// Move straight to `node_id`, bypassing edges and caps.
pub fn jump_to(
    graph: &PipelineGraph,
    state: &mut GraphState,
    node_id: &str,
    at: DateTime<Utc>,
) -> Result<PathEntry> {
    if graph.node(node_id).is_none() {
        return Err(PipelineError::UnknownNode(node_id.to_string()));
    }
    Ok(state.record_transition(node_id, None, format!("jump to {node_id}"), at))
}

/// Fire the first open edge that `signal` matches.
pub fn fire_signal(
    graph: &PipelineGraph,
    state: &mut GraphState,
    signal: &Signal,
    reason: Option<&str>,
    at: DateTime<Utc>,
) -> Step {
    let Some(current) = state.current_node() else {
        return Step::Stayed {
            reason: "no active node".to_string(),
        };
    };

    let candidates = signal_candidates(graph, current, signal);
    if candidates.is_empty() {
        return Step::Stayed {
            reason: format!("no edge of '{}' matches {}", graph.node_name(current), signal.describe()),
        };
    }

    match candidates.into_iter().find(|e| is_open(graph, state, &e.to)) {
        Some(edge) => {
            let reason = reason.map(str::to_string).unwrap_or_else(|| signal.describe());
            Step::Moved(state.record_transition(&edge.to, Some(&edge.id), reason, at))
        }
        None => Step::Stayed {
            reason: format!(
                "matching edges of '{}' lead only to capped nodes",
                graph.node_name(current)
            ),
        },
    }
}

/// Warning for `node_id` once visits reach `warning_pct` percent of its cap.
pub fn visit_warning(
    graph: &PipelineGraph,
    state: &GraphState,
    node_id: &str,
    warning_pct: u32,
) -> Option<VisitWarning> {
    let visits = state.visits(node_id);
    let max_visits = effective_cap(graph, state, node_id);
    let blocked = visits >= max_visits;
    // visits / max >= pct / 100 without floats
    let near = u64::from(visits) * 100 >= u64::from(max_visits) * u64::from(warning_pct);

    (blocked || near).then(|| VisitWarning {
        node: node_id.to_string(),
        visits,
        max_visits,
        blocked,
    })
}

/// Warnings for every visited node, in definition order.
pub fn visit_warnings(graph: &PipelineGraph, state: &GraphState, warning_pct: u32) -> Vec<VisitWarning> {
    graph
        .nodes
        .iter()
        .filter(|n| state.visits(&n.id) > 0)
        .filter_map(|n| visit_warning(graph, state, &n.id, warning_pct))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipegraph_core::types::{GraphMetadata, GraphNode};

    fn linear() -> PipelineGraph {
        let mut a = GraphNode::new("A", "Alpha");
        a.is_start = true;
        let mut c = GraphNode::new("C", "Gamma");
        c.is_end = true;
        PipelineGraph {
            metadata: GraphMetadata::default(),
            nodes: vec![a, GraphNode::new("B", "Beta"), c],
            edges: vec![GraphEdge::always("ab", "A", "B"), GraphEdge::always("bc", "B", "C")],
        }
    }

    fn branching() -> PipelineGraph {
        let mut x = GraphNode::new("X", "X");
        x.is_start = true;
        PipelineGraph {
            metadata: GraphMetadata::default(),
            nodes: vec![x, GraphNode::new("Y", "Y"), GraphNode::new("Z", "Z")],
            edges: vec![
                GraphEdge::on_tool("x-y", "X", "Y", "mcp__docs__").with_priority(2),
                GraphEdge::always("x-z", "X", "Z").with_priority(1),
                GraphEdge::always("z-x", "Z", "X"),
                GraphEdge::always("y-x", "Y", "X"),
            ],
        }
    }

    fn started(graph: &PipelineGraph) -> GraphState {
        initial_state(graph, Some("test".into()), 10, "activated", Utc::now()).unwrap()
    }

    #[test]
    fn initial_state_sits_on_start() {
        let state = started(&linear());
        assert_eq!(state.current_node(), Some("A"));
        assert_eq!(state.visits("A"), 1);
        assert_eq!(state.execution_path.len(), 1);
        assert_eq!(state.execution_path[0].reason, "activated");
        assert!(initial_state(&PipelineGraph::default(), None, 10, "x", Utc::now()).is_err());
    }

    #[test]
    fn reset_returns_to_start() {
        let graph = linear();
        let mut state = started(&graph);
        state.max_visits_default = 4;
        advance(&graph, &mut state, Utc::now());
        advance(&graph, &mut state, Utc::now());
        assert_eq!(state.current_node(), Some("C"));

        let entry = reset(&graph, &mut state, Utc::now()).unwrap();
        assert_eq!(entry.from_node, None);
        assert_eq!(entry.reason, REASON_RESET);
        assert_eq!(state.current_node(), Some("A"));
        assert_eq!(state.node_visits.len(), 1);
        assert_eq!(state.visits("A"), 1);
        assert_eq!(state.execution_path.len(), 1);
        assert_eq!(state.total_transitions, 0);
        assert_eq!(state.active_graph.as_deref(), Some("test"));
        assert_eq!(state.max_visits_default, 4);
    }

    #[test]
    fn fresh_and_reset_states_agree() {
        let graph = linear();
        let fresh = started(&graph);
        assert_eq!(fresh.total_transitions, 0);

        let mut state = fresh.clone();
        advance(&graph, &mut state, Utc::now());
        assert_eq!(state.total_transitions, 1);
        reset(&graph, &mut state, Utc::now()).unwrap();

        assert_eq!(state.total_transitions, fresh.total_transitions);
        assert_eq!(state.node_visits, fresh.node_visits);
        assert_eq!(state.current_nodes, fresh.current_nodes);
        assert_eq!(state.execution_path.len(), fresh.execution_path.len());
    }

    #[test]
    fn advance_prefers_priority_over_condition_kind() {
        let graph = branching();
        let mut state = started(&graph);
        let step = advance(&graph, &mut state, Utc::now());
        assert!(step.moved());
        assert_eq!(state.current_node(), Some("Z"));
        assert_eq!(state.execution_path.last().unwrap().edge_id.as_deref(), Some("x-z"));
    }

    #[test]
    fn advance_ties_follow_declaration_order() {
        let mut graph = linear();
        graph.edges = vec![
            GraphEdge::always("first", "A", "C"),
            GraphEdge::always("second", "A", "B"),
        ];
        let mut state = started(&graph);
        advance(&graph, &mut state, Utc::now());
        assert_eq!(state.current_node(), Some("C"));
    }

    #[test]
    fn advance_skips_capped_targets() {
        let mut graph = branching();
        graph.nodes[2].max_visits = Some(1);
        let mut state = started(&graph);
        state.node_visits.insert("Z".into(), 1);

        advance(&graph, &mut state, Utc::now());
        assert_eq!(state.current_node(), Some("Y"));
    }

    #[test]
    fn advance_from_end_node_stays() {
        let graph = linear();
        let mut state = started(&graph);
        jump_to(&graph, &mut state, "C", Utc::now()).unwrap();
        let before = state.clone();

        match advance(&graph, &mut state, Utc::now()) {
            Step::Stayed { reason } => assert!(reason.contains("no outgoing edges")),
            other => panic!("expected stay, got {other:?}"),
        }
        assert_eq!(state, before);
    }

    #[test]
    fn traverse_is_not_deduplicated() {
        let graph = branching();
        let mut state = started(&graph);
        for reason in ["first", "second"] {
            traverse_edge(&graph, &mut state, "x-z", reason, Utc::now()).unwrap();
            traverse_edge(&graph, &mut state, "z-x", "back", Utc::now()).unwrap();
        }
        assert_eq!(state.visits("Z"), 2);
        assert_eq!(state.visits("X"), 3);
        assert_eq!(state.execution_path.len(), 5);
        assert_eq!(state.execution_path[1].reason, "first");
        assert_eq!(state.execution_path[3].reason, "second");
        assert_eq!(state.total_transitions, 4);
    }

    #[test]
    fn traverse_rejects_wrong_origin_and_unknown_edge() {
        let graph = branching();
        let mut state = started(&graph);
        let before = state.clone();

        let err = traverse_edge(&graph, &mut state, "z-x", "nope", Utc::now()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { ref current, .. } if current == "X"));
        let err = traverse_edge(&graph, &mut state, "ghost", "nope", Utc::now()).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownEdge(_)));
        assert_eq!(state, before);
    }

    #[test]
    fn visit_cap_is_never_exceeded() {
        let mut graph = branching();
        graph.nodes[2].max_visits = Some(2);
        let mut state = started(&graph);

        for _ in 0..5 {
            let _ = traverse_edge(&graph, &mut state, "x-z", "loop", Utc::now());
            let _ = traverse_edge(&graph, &mut state, "z-x", "loop", Utc::now());
            advance(&graph, &mut state, Utc::now());
            for node in &graph.nodes {
                assert!(state.visits(&node.id) <= effective_cap(&graph, &state, &node.id));
            }
        }

        let before = state.clone();
        if state.current_node() == Some("X") {
            let err = traverse_edge(&graph, &mut state, "x-z", "again", Utc::now()).unwrap_err();
            assert!(matches!(err, PipelineError::VisitCapReached { visits: 2, max: 2, .. }));
            assert_eq!(state, before);
        }
    }

    #[test]
    fn jump_ignores_edges_and_caps() {
        let graph = linear();
        let mut state = started(&graph);
        state.node_visits.insert("C".into(), 10);

        let entry = jump_to(&graph, &mut state, "C", Utc::now()).unwrap();
        assert_eq!(entry.edge_id, None);
        assert_eq!(entry.reason, "jump to C");
        assert_eq!(state.visits("C"), 11);
        assert_eq!(state.total_transitions, 1);

        assert!(matches!(
            jump_to(&graph, &mut state, "Q", Utc::now()),
            Err(PipelineError::UnknownNode(_))
        ));
    }

    #[test]
    fn available_edges_report_caps() {
        let mut graph = branching();
        graph.nodes[1].max_visits = Some(1);
        let mut state = started(&graph);
        state.node_visits.insert("Y".into(), 1);

        let options = available_edges(&graph, &state);
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].edge_id, "x-z");
        assert!(options[0].open);
        assert_eq!(options[0].max_visits, 10);
        assert_eq!(options[1].target_name, "Y");
        assert!(!options[1].open);
        assert!(available_edges(&graph, &GraphState::default()).is_empty());
    }

    #[test]
    fn signal_fires_matching_edge() {
        let graph = branching();
        let mut state = started(&graph);

        let step = fire_signal(&graph, &mut state, &Signal::tool("mcp__docs__search"), None, Utc::now());
        assert!(step.moved());
        assert_eq!(state.current_node(), Some("Y"));
        assert_eq!(state.execution_path.last().unwrap().reason, "tool mcp__docs__search");

        let step = fire_signal(&graph, &mut state, &Signal::tool("Bash"), None, Utc::now());
        assert!(!step.moved());
        assert_eq!(state.current_node(), Some("Y"));
    }

    #[test]
    fn check_previews_without_moving() {
        let mut graph = branching();
        graph.nodes[1].max_visits = Some(1);
        let mut state = started(&graph);
        let before = state.clone();

        let matches = check_signal(&graph, &state, &Signal::tool("mcp__docs__search"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].edge_id, "x-y");
        assert!(matches[0].open);
        assert!(check_signal(&graph, &state, &Signal::tool("Bash")).is_empty());
        assert_eq!(state, before);

        state.node_visits.insert("Y".into(), 1);
        let matches = check_signal(&graph, &state, &Signal::tool("mcp__docs__search"));
        assert!(!matches[0].open);
        assert!(check_signal(&graph, &GraphState::default(), &Signal::tool("mcp__docs__x")).is_empty());
    }

    #[test]
    fn signal_respects_caps() {
        let mut graph = branching();
        graph.nodes[1].max_visits = Some(1);
        let mut state = started(&graph);
        state.node_visits.insert("Y".into(), 1);

        match fire_signal(&graph, &mut state, &Signal::tool("mcp__docs__x"), None, Utc::now()) {
            Step::Stayed { reason } => assert!(reason.contains("capped")),
            other => panic!("expected stay, got {other:?}"),
        }
    }

    #[test]
    fn warnings_at_eighty_percent() {
        let graph = linear();
        let mut state = started(&graph);
        state.node_visits.insert("A".into(), 7);
        assert!(visit_warning(&graph, &state, "A", 80).is_none());

        state.node_visits.insert("A".into(), 8);
        let warning = visit_warning(&graph, &state, "A", 80).unwrap();
        assert!(!warning.blocked);
        assert_eq!(
            warning.to_string(),
            "WARNING: node 'A' approaching max visits (8/10, 2 remaining)"
        );

        state.node_visits.insert("B".into(), 10);
        let warnings = visit_warnings(&graph, &state, 80);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[1].blocked);
    }
}
