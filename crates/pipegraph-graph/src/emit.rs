use std::fmt::Write;

use pipegraph_core::types::{EdgeCondition, GraphMetadata, GraphNode, McpAccess, PipelineGraph};

/// Render a graph in the definition format read by [`crate::parse_graph`].
///
/// Every string is quoted, multi-line prompts use literal block scalars
/// when they survive one unchanged, and optional fields are only written
/// when set, so `parse_graph(&serialize_graph(g))` yields `g` again.
pub fn serialize_graph(graph: &PipelineGraph) -> String {
    let mut out = String::new();
    write_metadata(&mut out, &graph.metadata);

    out.push_str("\nnodes:\n");
    for node in &graph.nodes {
        write_node(&mut out, node);
    }

    if graph.edges.is_empty() {
        out.push_str("\nedges: []\n");
    } else {
        out.push_str("\nedges:\n");
    }
    for edge in &graph.edges {
        let _ = writeln!(out, "  - id: {}", quote(&edge.id));
        let _ = writeln!(out, "    from: {}", quote(&edge.from));
        let _ = writeln!(out, "    to: {}", quote(&edge.to));
        out.push_str("    condition:\n");
        let _ = writeln!(out, "      type: {}", edge.condition.kind());
        match &edge.condition {
            EdgeCondition::Tool { tool } => {
                let _ = writeln!(out, "      tool: {}", quote(tool));
            }
            EdgeCondition::Phrase { phrases } => {
                out.push_str("      phrases:\n");
                for phrase in phrases {
                    let _ = writeln!(out, "        - {}", quote(phrase));
                }
            }
            EdgeCondition::Always | EdgeCondition::Default => {}
        }
        let _ = writeln!(out, "    priority: {}", edge.priority);
    }

    out
}

fn write_metadata(out: &mut String, metadata: &GraphMetadata) {
    out.push_str("metadata:\n");
    let _ = writeln!(out, "  name: {}", quote(&metadata.name));
    if let Some(description) = &metadata.description {
        write_text(out, 2, "description", description);
    }
    let _ = writeln!(out, "  version: {}", quote(&metadata.version));
    let _ = writeln!(out, "  type: {}", quote(&metadata.kind));
    write_list(out, 2, "required_agents", &metadata.required_agents);
    write_list(out, 2, "required_mcps", &metadata.required_mcps);
}

fn write_node(out: &mut String, node: &GraphNode) {
    let _ = writeln!(out, "  - id: {}", quote(&node.id));
    let _ = writeln!(out, "    name: {}", quote(&node.name));
    match &node.mcps_enabled {
        McpAccess::All => {}
        McpAccess::Only(names) if names.is_empty() => out.push_str("    mcps_enabled: []\n"),
        McpAccess::Only(names) => write_list(out, 4, "mcps_enabled", names),
    }
    write_list(out, 4, "tools_blocked", &node.tools_blocked);
    if let Some(prompt) = &node.prompt_injection {
        write_text(out, 4, "prompt_injection", prompt);
    }
    if node.is_start {
        out.push_str("    is_start: true\n");
    }
    if node.is_end {
        out.push_str("    is_end: true\n");
    }
    if let Some(max) = node.max_visits {
        let _ = writeln!(out, "    max_visits: {max}");
    }
    if let Some(model) = &node.model {
        let _ = writeln!(out, "    model: {}", quote(model));
    }
}

fn write_list(out: &mut String, indent: usize, key: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let pad = " ".repeat(indent);
    let _ = writeln!(out, "{pad}{key}:");
    for item in items {
        let _ = writeln!(out, "{pad}  - {}", quote(item));
    }
}

fn write_text(out: &mut String, indent: usize, key: &str, text: &str) {
    let pad = " ".repeat(indent);
    if fits_block(text) {
        let _ = writeln!(out, "{pad}{key}: |");
        for line in text.split('\n') {
            if line.is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, "{pad}  {line}");
            }
        }
    } else {
        let _ = writeln!(out, "{pad}{key}: {}", quote(text));
    }
}

/// Whether a literal block reproduces `text` exactly once parsed back.
fn fits_block(text: &str) -> bool {
    text.contains('\n')
        && !text.starts_with(char::is_whitespace)
        && text == text.trim_end()
        && !text.contains('\r')
        && text
            .split('\n')
            .all(|line| line.is_empty() || !line.trim().is_empty())
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
