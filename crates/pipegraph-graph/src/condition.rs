use serde::{Deserialize, Serialize};

use pipegraph_core::types::{EdgeCondition, GraphEdge, PipelineGraph};

/// Something observed in a session that may fire an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Signal {
    /// A tool was used, e.g. `mcp__Context7__get-library-docs`.
    Tool(String),
    /// The agent produced text.
    Text(String),
    /// Nothing specific happened; only unconditional edges may fire.
    Idle,
}

impl Signal {
    pub fn tool(name: impl Into<String>) -> Self {
        Signal::Tool(name.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Signal::Text(text.into())
    }

    /// Short description used for path entry reasons.
    pub fn describe(&self) -> String {
        match self {
            Signal::Tool(name) => format!("tool {name}"),
            Signal::Text(_) => "phrase matched".to_string(),
            Signal::Idle => "idle".to_string(),
        }
    }
}

/// Whether a tool or phrase condition is satisfied by the signal.
///
/// `always` and `default` conditions never match here; they are handled by
/// [`signal_candidates`].
pub fn matches_signal(condition: &EdgeCondition, signal: &Signal) -> bool {
    match (condition, signal) {
        (EdgeCondition::Tool { tool }, Signal::Tool(name)) => name.starts_with(tool.as_str()),
        (EdgeCondition::Phrase { phrases }, Signal::Text(text)) => {
            let text = text.to_lowercase();
            phrases.iter().any(|p| text.contains(&p.to_lowercase()))
        }
        _ => false,
    }
}

/// The first phrase of `condition` found in `text`, if any.
pub fn matched_phrase<'c>(condition: &'c EdgeCondition, text: &str) -> Option<&'c str> {
    let EdgeCondition::Phrase { phrases } = condition else {
        return None;
    };
    let text = text.to_lowercase();
    phrases
        .iter()
        .find(|p| text.contains(&p.to_lowercase()))
        .map(String::as_str)
}

/// Edges leaving `node` that `signal` fires, in priority order.
///
/// Tool and text signals match their own condition kind first and fall back
/// to `default` edges when nothing matched. Idle fires `always` and
/// `default` edges.
pub fn signal_candidates<'g>(
    graph: &'g PipelineGraph,
    node: &str,
    signal: &Signal,
) -> Vec<&'g GraphEdge> {
    let outgoing = graph.outgoing(node);

    if let Signal::Idle = signal {
        return outgoing
            .into_iter()
            .filter(|e| matches!(e.condition, EdgeCondition::Always | EdgeCondition::Default))
            .collect();
    }

    let direct: Vec<&GraphEdge> = outgoing
        .iter()
        .copied()
        .filter(|e| matches_signal(&e.condition, signal))
        .collect();
    if !direct.is_empty() {
        return direct;
    }

    outgoing
        .into_iter()
        .filter(|e| e.condition == EdgeCondition::Default)
        .collect()
}
