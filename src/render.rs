//! Human-readable output. `--json` bypasses all of this.

use pipegraph_core::types::{EdgeCondition, GraphState, McpAccess};
use pipegraph_graph::visualize::edge_label;
use pipegraph_graph::{EdgeOption, LegacyView};
use pipegraph_store::{ActivationReport, Advance, CatalogEntry, PipelineStatus, Transition};

pub fn status(status: &PipelineStatus) -> String {
    let mut out = format!("Pipeline: {}\n", status.graph_name);
    if let Some(description) = &status.description {
        out.push_str(&format!("  {description}\n"));
    }

    match &status.current {
        Some(node) => {
            let mut markers = Vec::new();
            if node.is_start {
                markers.push("start");
            }
            if node.is_end {
                markers.push("end");
            }
            let markers = if markers.is_empty() {
                String::new()
            } else {
                format!(" [{}]", markers.join(", "))
            };
            out.push_str(&format!(
                "Current: {} ({}){}  visits {}/{}\n",
                node.id, node.name, markers, node.visits, node.max_visits
            ));
            if let McpAccess::Only(names) = &node.mcps_enabled {
                let names = if names.is_empty() { "none".to_string() } else { names.join(", ") };
                out.push_str(&format!("MCP servers: {names}\n"));
            }
            if !node.tools_blocked.is_empty() {
                out.push_str(&format!("Blocked tools: {}\n", node.tools_blocked.join(", ")));
            }
            if let Some(model) = &node.model {
                out.push_str(&format!("Model: {model}\n"));
            }
            if let Some(prompt) = &node.prompt_injection {
                out.push_str("Prompt:\n");
                for line in prompt.lines() {
                    out.push_str(&format!("  {line}\n"));
                }
            }
        }
        None => out.push_str("Current: (inactive, run activate or reset)\n"),
    }

    out.push_str(&format!(
        "Enforcer: {}\n",
        if status.enforcer_enabled { "enabled" } else { "disabled" }
    ));
    out.push_str(&format!("Transitions: {}\n", status.total_transitions));
    if let Some(at) = status.last_activity {
        out.push_str(&format!("Last activity: {}\n", at.to_rfc3339()));
    }

    if !status.edges.is_empty() {
        out.push_str("\nEdges:\n");
        out.push_str(&edges(&status.edges));
    }
    if !status.warnings.is_empty() {
        out.push('\n');
        for warning in &status.warnings {
            out.push_str(&format!("{warning}\n"));
        }
    }
    out
}

pub fn edges(edges: &[EdgeOption]) -> String {
    if edges.is_empty() {
        return "No outgoing edges.\n".to_string();
    }
    let mut out = String::new();
    for edge in edges {
        let closed = if edge.open { "" } else { "  (capped)" };
        out.push_str(&format!(
            "  {} -> {} ({}) [{}] p{}  visits {}/{}{}\n",
            edge.edge_id,
            edge.target,
            edge.target_name,
            condition(&edge.condition),
            edge.priority,
            edge.visits,
            edge.max_visits,
            closed
        ));
    }
    out
}

fn condition(condition: &EdgeCondition) -> String {
    match condition {
        EdgeCondition::Tool { .. } | EdgeCondition::Phrase { .. } => {
            format!("{}: {}", condition.kind(), edge_label(condition))
        }
        _ => condition.kind().to_string(),
    }
}

pub fn check(matches: &[EdgeOption]) -> String {
    let Some(first) = matches.iter().find(|e| e.open) else {
        if matches.is_empty() {
            return "No edge matches.\n".to_string();
        }
        return format!("Matches, but every target is capped:\n{}", edges(matches));
    };
    format!("Would fire '{}' -> {}\n{}", first.edge_id, first.target, edges(matches))
}

pub fn legacy(view: &LegacyView) -> String {
    let step = view
        .current_step
        .map(|s| format!("{}/{}", s + 1, view.total_steps))
        .unwrap_or_else(|| "-".to_string());
    let mut out = format!("Step: {step}\n");
    for done in &view.completed_steps {
        out.push_str(&format!("  done {} ({})\n", done.id, done.reason));
    }
    if !view.step_history.is_empty() {
        out.push_str(&format!("History: {} changes\n", view.step_history.len()));
    }
    out
}

pub fn transition(t: &Transition) -> String {
    let from = t.entry.from_node.as_deref().unwrap_or("-");
    let via = t
        .entry
        .edge_id
        .as_deref()
        .map(|e| format!(" via '{e}'"))
        .unwrap_or_default();
    format!("{from} -> {}{via} ({})\n", t.entry.to_node, t.entry.reason)
}

pub fn advance(outcome: &Advance) -> String {
    match outcome {
        Advance::Moved(t) => transition(t),
        Advance::Stayed { reason, state } => format!(
            "Stayed at {}: {reason}\n",
            state.current_node().unwrap_or("(none)")
        ),
    }
}

pub fn reset(state: &GraphState) -> String {
    format!(
        "Reset to {}\n",
        state.current_node().unwrap_or("(none)")
    )
}

pub fn activation(report: &ActivationReport) -> String {
    let mut out = format!(
        "Activated '{}' at node {}\n  definition: {}\n  source: {}\n  skill: {}\n",
        report.graph_name,
        report.start_node,
        report.definition.display(),
        report.source.display(),
        report.skill_file.display()
    );
    if !report.agents_installed.is_empty() {
        out.push_str(&format!("  agents: {}\n", report.agents_installed.join(", ")));
    }
    if !report.agents_missing.is_empty() {
        out.push_str(&format!("  missing agents: {}\n", report.agents_missing.join(", ")));
    }
    for warning in &report.warnings {
        out.push_str(&format!("  warning: {warning}\n"));
    }
    out
}

pub fn catalog(entries: &[CatalogEntry]) -> String {
    if entries.is_empty() {
        return "No graphs in the catalog.\n".to_string();
    }
    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for entry in entries {
        let detail = match (&entry.metadata, &entry.error) {
            (_, Some(error)) => format!("error: {error}"),
            (Some(meta), None) => format!(
                "{} nodes  {}",
                entry.node_count,
                meta.description.as_deref().unwrap_or("")
            ),
            (None, None) => String::new(),
        };
        out.push_str(&format!("  {:width$}  {}\n", entry.name, detail.trim_end()));
    }
    out
}

pub fn warnings(warnings: &[String]) -> String {
    if warnings.is_empty() {
        return "No problems found.\n".to_string();
    }
    warnings.iter().map(|w| format!("warning: {w}\n")).collect()
}
