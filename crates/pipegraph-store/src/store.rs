use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use pipegraph_core::config::EnforcerConfig;
use pipegraph_core::error::{PipelineError, Result};
use pipegraph_core::traits::ScopeResolver;
use pipegraph_core::types::{GraphState, PipelineGraph};
use pipegraph_graph::parse_graph;

/// File names tried, in order, when looking a graph up in the catalog.
pub fn catalog_candidates(name: &str) -> [String; 2] {
    [format!("{name}-graph.yaml"), format!("{name}.yaml")]
}

/// Reject names that would resolve outside the catalog directory.
pub fn check_graph_name(name: &str) -> Result<()> {
    let plain = !name.trim().is_empty()
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && !name.starts_with('.');
    if plain {
        Ok(())
    } else {
        Err(PipelineError::InvalidGraphName(name.to_string()))
    }
}

/// Reads and writes graph definitions, state and the enable flag.
///
/// Reads never fail hard except where a broken definition must be
/// reported: state and flag files degrade to their defaults.
#[derive(Clone)]
pub struct GraphStore {
    scope: Arc<dyn ScopeResolver>,
}

impl GraphStore {
    pub fn new(scope: Arc<dyn ScopeResolver>) -> Self {
        Self { scope }
    }

    pub fn scope(&self) -> &dyn ScopeResolver {
        self.scope.as_ref()
    }

    /// The project's copied definition.
    pub async fn load_graph(&self, project: &Path) -> Result<PipelineGraph> {
        let path = self.scope.graph_file(project);
        let text = read_text(&path).await?;
        parse_graph(&text)
    }

    pub async fn has_graph(&self, project: &Path) -> bool {
        tokio::fs::metadata(self.scope.graph_file(project)).await.is_ok()
    }

    /// Path of a named catalog graph, trying `{name}-graph.yaml` first.
    pub async fn find_global_graph(&self, name: &str) -> Result<PathBuf> {
        check_graph_name(name)?;
        let catalog = self
            .scope
            .catalog_dir()
            .ok_or_else(|| PipelineError::NotFound("no hub catalog configured".to_string()))?;

        for file_name in catalog_candidates(name) {
            let path = catalog.join(file_name);
            if tokio::fs::metadata(&path).await.is_ok() {
                return Ok(path);
            }
        }
        Err(PipelineError::NotFound(format!(
            "graph '{name}' in {}",
            catalog.display()
        )))
    }

    pub async fn load_global_graph(&self, name: &str) -> Result<PipelineGraph> {
        let path = self.find_global_graph(name).await?;
        parse_graph(&read_text(&path).await?)
    }

    /// Whether a state file exists, even an empty one left by deactivation.
    pub async fn has_state(&self, project: &Path) -> bool {
        tokio::fs::metadata(self.scope.state_file(project)).await.is_ok()
    }

    /// Current state, or a fresh default when missing or unreadable.
    pub async fn load_state(&self, project: &Path) -> GraphState {
        let path = self.scope.state_file(project);
        read_json(&path).await.unwrap_or_default()
    }

    /// Write the state as pretty JSON, creating directories as needed.
    pub async fn save_state(&self, project: &Path, state: &GraphState) -> Result<()> {
        write_json(&self.scope.state_file(project), state).await
    }

    /// Enable flag; absent or unreadable means enabled.
    pub async fn load_enforcer(&self, project: &Path) -> EnforcerConfig {
        read_json(&self.scope.enforcer_file(project))
            .await
            .unwrap_or_default()
    }

    pub async fn save_enforcer(&self, project: &Path, config: &EnforcerConfig) -> Result<()> {
        write_json(&self.scope.enforcer_file(project), config).await
    }

    /// Raw bytes of the project's definition, `None` when there is none.
    pub async fn read_graph_bytes(&self, project: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.scope.graph_file(project)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Put the definition back to `previous`, removing it when there was none.
    pub async fn restore_graph(&self, project: &Path, previous: Option<&[u8]>) -> Result<()> {
        let path = self.scope.graph_file(project);
        match previous {
            Some(bytes) => write_bytes(&path, bytes).await,
            None => match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Replace the project's definition with `bytes`, unchanged.
    pub async fn write_graph_bytes(&self, project: &Path, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.scope.graph_file(project);
        write_bytes(&path, bytes).await?;
        Ok(path)
    }
}

async fn read_text(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(PipelineError::NotFound(path.display().to_string()))
        }
        Err(e) if e.kind() == ErrorKind::InvalidData => Err(PipelineError::Parse(
            pipegraph_core::error::ParseError::new(0, format!("{} is not valid UTF-8", path.display())),
        )),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable graph definition");
            Err(PipelineError::NotFound(path.display().to_string()))
        }
    }
}

/// `None` when the file is missing (quietly) or corrupt (with a warning).
async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No file, using defaults");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read file, using defaults");
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt file, using defaults");
            None
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_bytes(path, json.as_bytes()).await
}

async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pipegraph_test_utils::{FixtureEnv, LINEAR_GRAPH, REVIEW_GRAPH};

    use crate::scope::resolver_for;

    fn store(fixture: &FixtureEnv) -> GraphStore {
        GraphStore::new(resolver_for(&fixture.env))
    }

    #[tokio::test]
    async fn missing_graph_is_not_found() {
        let fixture = FixtureEnv::local();
        let err = store(&fixture).load_graph(&fixture.project).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store(&fixture).has_graph(&fixture.project).await);
    }

    #[tokio::test]
    async fn malformed_graph_is_reported() {
        let fixture = FixtureEnv::local();
        fixture.write_local_graph("nodes:\n  - id: a\n    bogus: 1\n");
        let err = store(&fixture).load_graph(&fixture.project).await.unwrap_err();
        assert!(matches!(err, PipelineError::Parse(ref e) if e.line == 3));
    }

    #[tokio::test]
    async fn loads_local_graph() {
        let fixture = FixtureEnv::local();
        fixture.write_local_graph(LINEAR_GRAPH);
        let graph = store(&fixture).load_graph(&fixture.project).await.unwrap();
        assert_eq!(graph.metadata.name, "linear");
    }

    #[tokio::test]
    async fn state_defaults_when_missing_or_corrupt() {
        let fixture = FixtureEnv::local();
        let store = store(&fixture);
        assert_eq!(store.load_state(&fixture.project).await, GraphState::default());

        let path = store.scope().state_file(&fixture.project);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(store.load_state(&fixture.project).await, GraphState::default());
    }

    #[tokio::test]
    async fn state_roundtrip_under_hub() {
        let fixture = FixtureEnv::hub();
        let store = store(&fixture);
        let mut state = GraphState::default();
        state.active_graph = Some("review".into());
        state.record_transition("plan", None, "activated", Utc::now());

        store.save_state(&fixture.project, &state).await.unwrap();
        let path = fixture.hub_dir.join(".pipegraph/states/demo/graph_state.json");
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\n  \"current_nodes\""));
        assert_eq!(store.load_state(&fixture.project).await, state);
    }

    #[tokio::test]
    async fn enforcer_defaults_enabled_and_keeps_extra_keys() {
        let fixture = FixtureEnv::local();
        let store = store(&fixture);
        assert!(store.load_enforcer(&fixture.project).await.enforcer_enabled);

        let path = store.scope().enforcer_file(&fixture.project);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"enforcer_enabled": false, "theme": "dark"}"#).unwrap();

        let mut config = store.load_enforcer(&fixture.project).await;
        assert!(!config.enforcer_enabled);
        config.enforcer_enabled = true;
        store.save_enforcer(&fixture.project, &config).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["enforcer_enabled"], true);
    }

    #[tokio::test]
    async fn global_lookup_prefers_graph_suffix() {
        let fixture = FixtureEnv::hub();
        fixture.add_catalog_graph("review.yaml", LINEAR_GRAPH);
        fixture.add_catalog_graph("review-graph.yaml", REVIEW_GRAPH);

        let store = store(&fixture);
        let path = store.find_global_graph("review").await.unwrap();
        assert!(path.ends_with("review-graph.yaml"));
        let graph = store.load_global_graph("review").await.unwrap();
        assert_eq!(graph.metadata.name, "review");

        assert!(store.load_global_graph("missing").await.unwrap_err().is_not_found());
    }

    #[test]
    fn graph_names_must_stay_in_catalog() {
        assert!(check_graph_name("review").is_ok());
        assert!(check_graph_name("code-review_v2").is_ok());
        for bad in ["", "  ", "../secret", "a/b", "a\\b", "..", ".hidden", "x..y"] {
            assert!(
                matches!(check_graph_name(bad), Err(PipelineError::InvalidGraphName(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[tokio::test]
    async fn traversal_names_never_reach_the_filesystem() {
        let fixture = FixtureEnv::hub();
        // A graph sitting just outside the catalog must stay unreachable.
        std::fs::write(fixture.hub_dir.join(".claude/secret-graph.yaml"), LINEAR_GRAPH).unwrap();

        let store = store(&fixture);
        let err = store.find_global_graph("../secret").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGraphName(_)));
        assert!(store.load_global_graph("../../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn restore_graph_undoes_a_write() {
        let fixture = FixtureEnv::local();
        let store = store(&fixture);
        assert_eq!(store.read_graph_bytes(&fixture.project).await.unwrap(), None);

        store.write_graph_bytes(&fixture.project, REVIEW_GRAPH.as_bytes()).await.unwrap();
        store.restore_graph(&fixture.project, None).await.unwrap();
        assert!(!store.has_graph(&fixture.project).await);

        fixture.write_local_graph(LINEAR_GRAPH);
        let previous = store.read_graph_bytes(&fixture.project).await.unwrap();
        store.write_graph_bytes(&fixture.project, REVIEW_GRAPH.as_bytes()).await.unwrap();
        store.restore_graph(&fixture.project, previous.as_deref()).await.unwrap();
        assert_eq!(
            store.read_graph_bytes(&fixture.project).await.unwrap().unwrap(),
            LINEAR_GRAPH.as_bytes()
        );
    }

    #[tokio::test]
    async fn no_catalog_without_hub() {
        let fixture = FixtureEnv::local();
        let err = store(&fixture).load_global_graph("review").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
