use std::fmt::Write;

use serde::Serialize;

use pipegraph_core::types::{EdgeCondition, GraphState, PipelineGraph};

/// Style applied to the current node.
pub const CURRENT_STYLE: &str = "fill:#90EE90,stroke:#333,stroke-width:3px";

/// Longest phrase shown on an edge label.
const PHRASE_LABEL_CHARS: usize = 15;

/// A rendered Mermaid flowchart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagram {
    pub text: String,
    pub current_node: Option<String>,
    pub graph_name: Option<String>,
}

/// Render `graph` with the current node of `state` highlighted.
pub fn project(graph: &PipelineGraph, state: &GraphState) -> Diagram {
    let mut text = String::from("flowchart TD\n");

    for node in &graph.nodes {
        let label = node_label(&node.name);
        let shape = if node.is_start {
            format!("([{label}])")
        } else if node.is_end {
            format!("[/{label}/]")
        } else {
            format!("[{label}]")
        };
        let _ = writeln!(text, "    {}{shape}", node.id);
    }

    for edge in &graph.edges {
        let _ = writeln!(
            text,
            "    {} -->|{}| {}",
            edge.from,
            escape_edge_label(&edge_label(&edge.condition)),
            edge.to
        );
    }

    let current = state
        .current_node()
        .filter(|id| graph.node(id).is_some())
        .map(str::to_string);
    if let Some(id) = &current {
        let _ = writeln!(text, "    style {id} {CURRENT_STYLE}");
    }

    Diagram {
        text,
        current_node: current,
        graph_name: state
            .active_graph
            .clone()
            .or_else(|| Some(graph.metadata.name.clone())),
    }
}

/// Diagram shown when no graph is loaded.
pub fn placeholder() -> Diagram {
    Diagram {
        text: "flowchart TD\n    empty[No pipeline graph loaded]\n".to_string(),
        current_node: None,
        graph_name: None,
    }
}

/// Short label derived from an edge condition.
pub fn edge_label(condition: &EdgeCondition) -> String {
    match condition {
        EdgeCondition::Tool { tool } => tool
            .rsplit("__")
            .find(|segment| !segment.is_empty())
            .unwrap_or(tool.as_str())
            .to_string(),
        EdgeCondition::Phrase { phrases } => {
            let first: String = phrases
                .first()
                .map(|p| p.chars().take(PHRASE_LABEL_CHARS).collect())
                .unwrap_or_default();
            let first = first.trim_end().replace(|c: char| c == '"' || c == '\'', "");
            format!("'{first}'")
        }
        EdgeCondition::Always => "always".to_string(),
        EdgeCondition::Default => "default".to_string(),
    }
}

/// Mermaid entity codes for characters that end or break a `-->|..|` label.
fn escape_edge_label(label: &str) -> String {
    label.replace('"', "#quot;").replace('|', "#124;")
}

fn node_label(name: &str) -> String {
    name.replace('"', "'")
        .replace(|c: char| matches!(c, '[' | ']' | '(' | ')' | '/'), " ")
}
