use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use pipegraph_core::config::{EngineConfig, EnforcerConfig, Environment};
use pipegraph_core::error::{PipelineError, Result};
use pipegraph_core::event::{EventBus, PipelineEvent};
use pipegraph_core::types::{GraphNode, GraphState, McpAccess, PathEntry, PipelineGraph};
use pipegraph_graph::transition::{self, EdgeOption, Step, VisitWarning};
use pipegraph_graph::{gate_tool, Signal, Verdict};

use crate::locks::ProjectLocks;
use crate::scope::resolver_for;
use crate::store::GraphStore;

/// Reason recorded when status finds a graph without state.
pub const REASON_INITIALIZED: &str = "initialized";

/// A state change that was applied.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub state: GraphState,
    pub entry: PathEntry,
    /// `false` when the new state could not be written; it is still returned.
    pub persisted: bool,
}

/// Result of an operation that may decline to move.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Advance {
    Moved(Transition),
    Stayed { reason: String, state: GraphState },
}

impl Advance {
    pub fn state(&self) -> &GraphState {
        match self {
            Advance::Moved(t) => &t.state,
            Advance::Stayed { state, .. } => state,
        }
    }
}

/// The current node with everything a hook layer needs to gate a turn.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub id: String,
    pub name: String,
    pub visits: u32,
    pub max_visits: u32,
    pub is_start: bool,
    pub is_end: bool,
    pub mcps_enabled: McpAccess,
    pub tools_blocked: Vec<String>,
    pub prompt_injection: Option<String>,
    pub model: Option<String>,
}

impl NodeStatus {
    fn new(node: &GraphNode, graph: &PipelineGraph, state: &GraphState) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            visits: state.visits(&node.id),
            max_visits: transition::effective_cap(graph, state, &node.id),
            is_start: node.is_start,
            is_end: node.is_end,
            mcps_enabled: node.mcps_enabled.clone(),
            tools_blocked: node.tools_blocked.clone(),
            prompt_injection: node.prompt_injection.clone(),
            model: node.model.clone(),
        }
    }
}

/// Snapshot of a project's pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    /// `false` after deactivation: the definition stays but nothing is enforced.
    pub active: bool,
    pub graph_name: String,
    pub description: Option<String>,
    pub current: Option<NodeStatus>,
    pub edges: Vec<EdgeOption>,
    pub warnings: Vec<VisitWarning>,
    pub enforcer_enabled: bool,
    pub total_transitions: u64,
    pub path_length: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Persisted transition engine: load, apply, save and publish, one project
/// at a time.
pub struct PipelineEngine {
    store: GraphStore,
    locks: Arc<ProjectLocks>,
    events: Arc<EventBus>,
    config: EngineConfig,
}

impl PipelineEngine {
    pub fn new(env: &Environment, events: Arc<EventBus>) -> Self {
        Self {
            store: GraphStore::new(resolver_for(env)),
            locks: Arc::new(ProjectLocks::new()),
            events,
            config: env.engine.clone(),
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn locks(&self) -> Arc<ProjectLocks> {
        self.locks.clone()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Back to the start node with a one-entry history.
    pub async fn reset(&self, project: &Path) -> Result<Transition> {
        let _guard = self.locks.lock(project).await;
        let graph = self.store.load_graph(project).await?;
        let mut state = self.store.load_state(project).await;

        let entry = transition::reset(&graph, &mut state, Utc::now())?;
        let persisted = self.persist(project, &state).await;

        info!(project = %project.display(), node = %entry.to_node, "Pipeline reset");
        self.events.publish(PipelineEvent::Reset {
            project: project.to_path_buf(),
            start_node: entry.to_node.clone(),
        });
        Ok(Transition {
            state,
            entry,
            persisted,
        })
    }

    /// Follow the preferred open edge, if there is one.
    pub async fn advance(&self, project: &Path) -> Result<Advance> {
        let _guard = self.locks.lock(project).await;
        let graph = self.store.load_graph(project).await?;
        let mut state = self.store.load_state(project).await;

        let step = transition::advance(&graph, &mut state, Utc::now());
        Ok(self.settle(project, state, step).await)
    }

    /// Traverse a named edge out of the current node.
    pub async fn traverse_edge(&self, project: &Path, edge_id: &str, reason: &str) -> Result<Transition> {
        let _guard = self.locks.lock(project).await;
        let graph = self.store.load_graph(project).await?;
        let mut state = self.store.load_state(project).await;

        let entry = transition::traverse_edge(&graph, &mut state, edge_id, reason, Utc::now())
            .map_err(|e| {
                debug!(edge = %edge_id, error = %e, "Traversal refused");
                e
            })?;
        Ok(self.commit(project, state, entry).await)
    }

    /// Manual override: move to `node_id` without an edge.
    pub async fn jump_to(&self, project: &Path, node_id: &str) -> Result<Transition> {
        let _guard = self.locks.lock(project).await;
        let graph = self.store.load_graph(project).await?;
        let mut state = self.store.load_state(project).await;

        let entry = transition::jump_to(&graph, &mut state, node_id, Utc::now())?;
        Ok(self.commit(project, state, entry).await)
    }

    pub async fn available_edges(&self, project: &Path) -> Result<Vec<EdgeOption>> {
        let graph = self.store.load_graph(project).await?;
        let state = self.store.load_state(project).await;
        Ok(transition::available_edges(&graph, &state))
    }

    /// Relay an observed tool use or text fragment.
    pub async fn fire_signal(
        &self,
        project: &Path,
        signal: &Signal,
        reason: Option<&str>,
    ) -> Result<Advance> {
        let _guard = self.locks.lock(project).await;
        let graph = self.store.load_graph(project).await?;
        let mut state = self.store.load_state(project).await;

        let step = transition::fire_signal(&graph, &mut state, signal, reason, Utc::now());
        Ok(self.settle(project, state, step).await)
    }

    /// Edges `signal` would fire from the current node. Read-only.
    pub async fn check(&self, project: &Path, signal: &Signal) -> Result<Vec<EdgeOption>> {
        let graph = self.store.load_graph(project).await?;
        let state = self.store.load_state(project).await;
        Ok(transition::check_signal(&graph, &state, signal))
    }

    /// Snapshot for display. A graph that never had a state file gets one
    /// initialized; a deactivated project is reported as inactive.
    pub async fn status(&self, project: &Path) -> Result<PipelineStatus> {
        let _guard = self.locks.lock(project).await;
        let graph = self.store.load_graph(project).await?;
        let mut state = self.store.load_state(project).await;

        if state.current_node().is_none() && !self.store.has_state(project).await {
            state = transition::initial_state(
                &graph,
                Some(graph.metadata.name.clone()),
                self.config.max_visits_default,
                REASON_INITIALIZED,
                Utc::now(),
            )?;
            self.persist(project, &state).await;
            info!(project = %project.display(), graph = %graph.metadata.name, "Initialized pipeline state");
        }

        let enforcer = self.store.load_enforcer(project).await;
        let current = state
            .current_node()
            .and_then(|id| graph.node(id))
            .map(|node| NodeStatus::new(node, &graph, &state));

        Ok(PipelineStatus {
            active: current.is_some(),
            graph_name: state
                .active_graph
                .clone()
                .unwrap_or_else(|| graph.metadata.name.clone()),
            description: graph.metadata.description.clone(),
            current,
            edges: transition::available_edges(&graph, &state),
            warnings: transition::visit_warnings(
                &graph,
                &state,
                u32::from(self.config.visit_warning_pct),
            ),
            enforcer_enabled: enforcer.enforcer_enabled,
            total_transitions: state.total_transitions,
            path_length: state.execution_path.len(),
            last_activity: state.last_activity,
        })
    }

    /// Whether the current node lets the agent call `tool_name`.
    pub async fn gate_tool(&self, project: &Path, tool_name: &str) -> Result<Verdict> {
        let graph = self.store.load_graph(project).await?;
        let state = self.store.load_state(project).await;
        Ok(state
            .current_node()
            .and_then(|id| graph.node(id))
            .map(|node| gate_tool(node, tool_name))
            .unwrap_or(Verdict::Allow))
    }

    pub async fn enforcer_enabled(&self, project: &Path) -> bool {
        self.store.load_enforcer(project).await.enforcer_enabled
    }

    /// Flip the per-project enable flag.
    pub async fn set_enforcer(&self, project: &Path, enabled: bool) -> Result<EnforcerConfig> {
        let _guard = self.locks.lock(project).await;
        let mut config = self.store.load_enforcer(project).await;
        config.enforcer_enabled = enabled;
        config.last_updated = Some(Utc::now());
        self.store.save_enforcer(project, &config).await?;

        info!(project = %project.display(), enabled, "Enforcer toggled");
        self.events.publish(PipelineEvent::EnforcerToggled {
            project: project.to_path_buf(),
            enabled,
        });
        Ok(config)
    }

    async fn settle(&self, project: &Path, state: GraphState, step: Step) -> Advance {
        match step {
            Step::Moved(entry) => Advance::Moved(self.commit(project, state, entry).await),
            Step::Stayed { reason } => {
                debug!(project = %project.display(), %reason, "Pipeline stayed");
                Advance::Stayed { reason, state }
            }
        }
    }

    async fn commit(&self, project: &Path, state: GraphState, entry: PathEntry) -> Transition {
        let persisted = self.persist(project, &state).await;
        info!(
            project = %project.display(),
            from = entry.from_node.as_deref().unwrap_or("-"),
            to = %entry.to_node,
            edge = entry.edge_id.as_deref().unwrap_or("-"),
            reason = %entry.reason,
            "Pipeline transition"
        );
        self.events.publish(PipelineEvent::Transitioned {
            project: project.to_path_buf(),
            entry: entry.clone(),
        });
        Transition {
            state,
            entry,
            persisted,
        }
    }

    /// Save, retrying once. The caller keeps the in-memory state either way.
    async fn persist(&self, project: &Path, state: &GraphState) -> bool {
        for attempt in 1..=2 {
            match self.store.save_state(project, state).await {
                Ok(()) => return true,
                Err(e) => error!(
                    project = %project.display(),
                    attempt,
                    error = %e,
                    "Failed to save pipeline state"
                ),
            }
        }
        false
    }
}

/// Convenience for callers that want a hard error on an unsaved change.
pub fn require_persisted(transition: &Transition) -> Result<()> {
    if transition.persisted {
        Ok(())
    } else {
        Err(PipelineError::Persistence(
            "state change applied in memory only".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipegraph_test_utils::{FixtureEnv, BRANCHING_GRAPH, LINEAR_GRAPH, REVIEW_GRAPH};

    fn engine(fixture: &FixtureEnv) -> PipelineEngine {
        PipelineEngine::new(&fixture.env, Arc::new(EventBus::default()))
    }

    async fn started(fixture: &FixtureEnv, text: &str) -> PipelineEngine {
        fixture.write_local_graph(text);
        let engine = engine(fixture);
        engine.reset(&fixture.project).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn reset_scenario() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, LINEAR_GRAPH).await;
        engine.advance(&fixture.project).await.unwrap();
        engine.advance(&fixture.project).await.unwrap();

        let t = engine.reset(&fixture.project).await.unwrap();
        assert!(t.persisted);
        assert_eq!(t.state.current_node(), Some("A"));
        assert_eq!(t.state.node_visits.len(), 1);
        assert_eq!(t.state.visits("A"), 1);
        assert_eq!(t.state.execution_path.len(), 1);
        assert_eq!(engine.store().load_state(&fixture.project).await, t.state);
    }

    #[tokio::test]
    async fn reset_without_graph_fails() {
        let fixture = FixtureEnv::local();
        let err = engine(&fixture).reset(&fixture.project).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn advance_persists_and_publishes() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, BRANCHING_GRAPH).await;
        let mut rx = engine.events().subscribe();

        match engine.advance(&fixture.project).await.unwrap() {
            Advance::Moved(t) => assert_eq!(t.entry.to_node, "Z"),
            other => panic!("expected move, got {other:?}"),
        }
        let saved = engine.store().load_state(&fixture.project).await;
        assert_eq!(saved.current_node(), Some("Z"));

        match rx.recv().await.unwrap() {
            PipelineEvent::Transitioned { entry, .. } => assert_eq!(entry.edge_id.as_deref(), Some("x-z")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn stayed_advance_does_not_rewrite_state() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, LINEAR_GRAPH).await;
        engine.jump_to(&fixture.project, "C").await.unwrap();
        let before = std::fs::read_to_string(engine.store().scope().state_file(&fixture.project)).unwrap();

        let outcome = engine.advance(&fixture.project).await.unwrap();
        assert!(matches!(outcome, Advance::Stayed { .. }));
        let after = std::fs::read_to_string(engine.store().scope().state_file(&fixture.project)).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn traverse_twice_counts_twice() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, BRANCHING_GRAPH).await;

        engine.traverse_edge(&fixture.project, "x-y", "first").await.unwrap();
        engine.traverse_edge(&fixture.project, "y-x", "back").await.unwrap();
        engine.traverse_edge(&fixture.project, "x-y", "second").await.unwrap();

        let state = engine.store().load_state(&fixture.project).await;
        assert_eq!(state.visits("Y"), 2);
        assert_eq!(state.execution_path.len(), 4);

        engine.traverse_edge(&fixture.project, "y-x", "back").await.unwrap();
        let err = engine
            .traverse_edge(&fixture.project, "x-y", "third")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::VisitCapReached { visits: 2, max: 2, .. }));
        let state = engine.store().load_state(&fixture.project).await;
        assert_eq!(state.visits("Y"), 2);
        assert_eq!(state.current_node(), Some("X"));
    }

    #[tokio::test]
    async fn traverse_from_wrong_node_is_rejected() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, BRANCHING_GRAPH).await;
        let err = engine
            .traverse_edge(&fixture.project, "y-x", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn signal_relay_moves_on_tool_use() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, BRANCHING_GRAPH).await;

        let outcome = engine
            .fire_signal(&fixture.project, &Signal::tool("mcp__docs__search"), None)
            .await
            .unwrap();
        assert_eq!(outcome.state().current_node(), Some("Y"));
    }

    #[tokio::test]
    async fn check_reports_match_and_leaves_state() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, REVIEW_GRAPH).await;
        let before = engine.store().load_state(&fixture.project).await;

        let matches = engine
            .check(&fixture.project, &Signal::text("Plan APPROVED, starting work"))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].target, "implement");
        assert!(engine
            .check(&fixture.project, &Signal::tool("Read"))
            .await
            .unwrap()
            .is_empty());

        assert_eq!(engine.store().load_state(&fixture.project).await, before);
    }

    #[tokio::test]
    async fn status_initializes_missing_state() {
        let fixture = FixtureEnv::local();
        fixture.write_local_graph(REVIEW_GRAPH);
        let engine = engine(&fixture);

        let status = engine.status(&fixture.project).await.unwrap();
        let current = status.current.unwrap();
        assert_eq!(current.id, "plan");
        assert_eq!(current.tools_blocked, vec!["Write", "Edit"]);
        assert!(status.active);
        assert_eq!(status.graph_name, "review");
        assert_eq!(status.edges.len(), 1);
        assert!(status.enforcer_enabled);

        let saved = engine.store().load_state(&fixture.project).await;
        assert_eq!(saved.execution_path[0].reason, REASON_INITIALIZED);
    }

    #[tokio::test]
    async fn status_leaves_cleared_state_alone() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, REVIEW_GRAPH).await;
        engine
            .store()
            .save_state(&fixture.project, &GraphState::default())
            .await
            .unwrap();

        let status = engine.status(&fixture.project).await.unwrap();
        assert!(!status.active);
        assert!(status.current.is_none());
        assert!(status.edges.is_empty());

        let saved = engine.store().load_state(&fixture.project).await;
        assert_eq!(saved, GraphState::default());
        assert!(!engine.gate_tool(&fixture.project, "Edit").await.unwrap().is_blocked());
    }

    #[tokio::test]
    async fn status_reports_visit_warnings() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, REVIEW_GRAPH).await;
        engine.jump_to(&fixture.project, "implement").await.unwrap();
        engine.jump_to(&fixture.project, "implement").await.unwrap();
        engine.jump_to(&fixture.project, "implement").await.unwrap();

        let status = engine.status(&fixture.project).await.unwrap();
        assert_eq!(status.warnings.len(), 1);
        assert!(status.warnings[0].blocked);
        assert_eq!(status.warnings[0].node, "implement");
    }

    #[tokio::test]
    async fn gate_and_enforcer() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, REVIEW_GRAPH).await;

        assert!(engine.gate_tool(&fixture.project, "Write").await.unwrap().is_blocked());
        assert!(!engine.gate_tool(&fixture.project, "Read").await.unwrap().is_blocked());

        assert!(engine.enforcer_enabled(&fixture.project).await);
        let config = engine.set_enforcer(&fixture.project, false).await.unwrap();
        assert!(config.last_updated.is_some());
        assert!(!engine.enforcer_enabled(&fixture.project).await);
    }

    #[tokio::test]
    async fn failed_save_still_returns_state() {
        let fixture = FixtureEnv::local();
        let engine = started(&fixture, LINEAR_GRAPH).await;

        // A directory where the state file should be makes every write fail.
        let state_file = engine.store().scope().state_file(&fixture.project);
        std::fs::remove_file(&state_file).unwrap();
        std::fs::create_dir_all(&state_file).unwrap();

        let t = engine.jump_to(&fixture.project, "B").await.unwrap();
        assert!(!t.persisted);
        assert!(require_persisted(&t).is_err());
        assert_eq!(t.entry.to_node, "B");
    }
}
