use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use pipegraph_core::config::EngineConfig;
use pipegraph_core::error::{ParseError, PipelineError, Result};
use pipegraph_core::event::{EventBus, PipelineEvent};
use pipegraph_core::types::GraphState;
use pipegraph_graph::{parse_graph, transition, validate};

use crate::catalog::{list_catalog, CatalogEntry};
use crate::engine::PipelineEngine;
use crate::locks::ProjectLocks;
use crate::provision::{provision_agents, write_status_skill};
use crate::store::GraphStore;

/// Reason recorded on the first path entry of an activated graph.
pub const REASON_ACTIVATED: &str = "activated";

/// What `activate` did.
#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub graph_name: String,
    /// Catalog file the definition came from.
    pub source: PathBuf,
    /// Project copy of the definition.
    pub definition: PathBuf,
    pub start_node: String,
    pub agents_installed: Vec<String>,
    pub agents_missing: Vec<String>,
    pub skill_file: PathBuf,
    /// Structural warnings about the activated graph.
    pub warnings: Vec<String>,
}

/// Installs catalog graphs into projects.
pub struct ActivationManager {
    store: GraphStore,
    locks: Arc<ProjectLocks>,
    events: Arc<EventBus>,
    engine: EngineConfig,
}

impl ActivationManager {
    /// Share the engine's store and locks so activation and transitions on
    /// one project never interleave.
    pub fn new(engine: &PipelineEngine) -> Self {
        Self {
            store: engine.store().clone(),
            locks: engine.locks(),
            events: engine.events(),
            engine: engine.config().clone(),
        }
    }

    /// Copy the named catalog graph into `project` and start it.
    pub async fn activate(&self, project: &Path, name: &str) -> Result<ActivationReport> {
        let source = self.store.find_global_graph(name).await?;
        let bytes = tokio::fs::read(&source).await?;
        let text = std::str::from_utf8(&bytes).map_err(|_| {
            ParseError::new(0, format!("{} is not valid UTF-8", source.display()))
        })?;
        let graph = parse_graph(text)?;

        let _guard = self.locks.lock(project).await;

        let state = transition::initial_state(
            &graph,
            Some(name.to_string()),
            self.engine.max_visits_default,
            REASON_ACTIVATED,
            Utc::now(),
        )?;

        // Definition and state change together: a failed state write puts
        // the previous definition back.
        let previous = self.store.read_graph_bytes(project).await?;
        let definition = self.store.write_graph_bytes(project, &bytes).await?;
        if let Err(e) = self.store.save_state(project, &state).await {
            if let Err(restore) = self.store.restore_graph(project, previous.as_deref()).await {
                error!(project = %project.display(), error = %restore, "Failed to restore previous definition");
            }
            warn!(project = %project.display(), graph = %name, error = %e, "Activation rolled back");
            return Err(e);
        }
        let start_node = state
            .current_node()
            .map(str::to_string)
            .ok_or(PipelineError::NoStartNode)?;

        let scope = self.store.scope();
        let agents = provision_agents(scope, project, &graph.metadata.required_agents).await?;
        let skill_file = write_status_skill(scope, project).await?;

        let warnings = validate(&graph);
        for warning in &warnings {
            warn!(graph = %name, %warning, "Graph structure warning");
        }

        info!(
            project = %project.display(),
            graph = %name,
            start = %start_node,
            source = %source.display(),
            "Pipeline activated"
        );
        self.events.publish(PipelineEvent::Activated {
            project: project.to_path_buf(),
            graph: name.to_string(),
            start_node: start_node.clone(),
        });

        Ok(ActivationReport {
            graph_name: name.to_string(),
            source,
            definition,
            start_node,
            agents_installed: agents.installed,
            agents_missing: agents.missing,
            skill_file,
            warnings,
        })
    }

    /// Forget the active graph. Project files stay in place.
    pub async fn deactivate(&self, project: &Path) -> Result<()> {
        let _guard = self.locks.lock(project).await;
        self.store.save_state(project, &GraphState::default()).await?;

        info!(project = %project.display(), "Pipeline deactivated");
        self.events.publish(PipelineEvent::Deactivated {
            project: project.to_path_buf(),
        });
        Ok(())
    }

    /// Graphs available for activation.
    pub async fn list_catalog(&self) -> Result<Vec<CatalogEntry>> {
        let catalog = self
            .store
            .scope()
            .catalog_dir()
            .ok_or_else(|| PipelineError::NotFound("no hub catalog configured".to_string()))?;
        Ok(list_catalog(&catalog).await)
    }
}
