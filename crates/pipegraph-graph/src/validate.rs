use std::collections::{BTreeSet, VecDeque};

use pipegraph_core::types::PipelineGraph;

/// Advisory structural warnings. A graph with warnings still runs.
pub fn validate(graph: &PipelineGraph) -> Vec<String> {
    let mut warnings = Vec::new();

    let starts: Vec<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.is_start)
        .map(|n| n.id.as_str())
        .collect();
    match starts.as_slice() {
        [] => {
            if let Some(first) = graph.nodes.first() {
                warnings.push(format!(
                    "No start node defined; '{}' is used (set is_start: true on one node)",
                    first.id
                ));
            }
        }
        [_] => {}
        many => warnings.push(format!(
            "Multiple start nodes: {}; only '{}' is used",
            many.join(", "),
            many[0]
        )),
    }

    let with_outgoing: BTreeSet<&str> = graph.edges.iter().map(|e| e.from.as_str()).collect();
    let with_incoming: BTreeSet<&str> = graph.edges.iter().map(|e| e.to.as_str()).collect();

    for node in &graph.nodes {
        if !node.is_end && !with_outgoing.contains(node.id.as_str()) {
            warnings.push(format!(
                "Node '{}' has no outgoing edges and is not marked as end node",
                node.id
            ));
        }
        if !node.is_start && !with_incoming.contains(node.id.as_str()) {
            warnings.push(format!(
                "Node '{}' has no incoming edges and is not marked as start node",
                node.id
            ));
        }
    }

    let reachable = reachable_from_start(graph);
    for node in &graph.nodes {
        if !reachable.contains(node.id.as_str()) && with_incoming.contains(node.id.as_str()) {
            warnings.push(format!("Node '{}' is not reachable from the start node", node.id));
        }
    }

    warnings
}

fn reachable_from_start(graph: &PipelineGraph) -> BTreeSet<&str> {
    let mut seen = BTreeSet::new();
    let Some(start) = graph.start_node() else {
        return seen;
    };

    let mut queue = VecDeque::from([start.id.as_str()]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        queue.extend(graph.edges.iter().filter(|e| e.from == id).map(|e| e.to.as_str()));
    }
    seen
}
