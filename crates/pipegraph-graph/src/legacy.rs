//! Ordinal view of a graph run for consumers that think in linear steps.
//!
//! Steps are node positions in definition order. A branching graph has no
//! canonical linear order, so this view is a convenience computed on demand
//! and never read back.

use chrono::{DateTime, Utc};
use serde::Serialize;

use pipegraph_core::types::{GraphState, PipelineGraph};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyView {
    /// Index of the current node, `None` when idle or the node is unknown.
    pub current_step: Option<usize>,
    pub total_steps: usize,
    pub completed_steps: Vec<CompletedStep>,
    pub step_history: Vec<StepChange>,
}

/// A node that was left, in the order it was left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedStep {
    pub id: String,
    pub completed_at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepChange {
    pub from_step: Option<usize>,
    pub to_step: Option<usize>,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

pub fn project_legacy(graph: &PipelineGraph, state: &GraphState) -> LegacyView {
    let index = |id: &str| graph.node_index(id);

    LegacyView {
        current_step: state.current_node().and_then(index),
        total_steps: graph.nodes.len(),
        completed_steps: state
            .execution_path
            .iter()
            .filter_map(|entry| {
                entry.from_node.as_ref().map(|from| CompletedStep {
                    id: from.clone(),
                    completed_at: entry.timestamp,
                    reason: entry.reason.clone(),
                })
            })
            .collect(),
        step_history: state
            .execution_path
            .iter()
            .map(|entry| StepChange {
                from_step: entry.from_node.as_deref().and_then(index),
                to_step: index(&entry.to_node),
                timestamp: entry.timestamp,
                reason: entry.reason.clone(),
            })
            .collect(),
    }
}
