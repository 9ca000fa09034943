use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use pipegraph_core::config::{Environment, HubConfig, LayoutConfig};
use pipegraph_core::traits::ScopeResolver;

/// Everything lives inside the project; there is no catalog.
#[derive(Debug, Clone)]
pub struct LocalScope {
    layout: LayoutConfig,
}

impl LocalScope {
    pub fn new(layout: LayoutConfig) -> Self {
        Self { layout }
    }
}

impl ScopeResolver for LocalScope {
    fn name(&self) -> &str {
        "local"
    }

    fn pipeline_dir(&self, project: &Path) -> PathBuf {
        project.join(&self.layout.pipeline_dir)
    }

    fn state_dir(&self, project: &Path) -> PathBuf {
        self.pipeline_dir(project)
    }

    fn catalog_dir(&self) -> Option<PathBuf> {
        None
    }

    fn agents_catalog_dir(&self) -> Option<PathBuf> {
        None
    }

    fn skills_catalog_dir(&self) -> Option<PathBuf> {
        None
    }

    fn project_agents_dir(&self, project: &Path) -> PathBuf {
        project.join(&self.layout.agents_dir)
    }

    fn project_skills_dir(&self, project: &Path) -> PathBuf {
        project.join(&self.layout.skills_dir)
    }
}

/// Definitions stay in the project; state moves under the shared hub.
#[derive(Debug, Clone)]
pub struct HubScope {
    hub: HubConfig,
    local: LocalScope,
}

impl HubScope {
    pub fn new(hub: HubConfig, layout: LayoutConfig) -> Self {
        Self {
            hub,
            local: LocalScope::new(layout),
        }
    }
}

impl ScopeResolver for HubScope {
    fn name(&self) -> &str {
        "hub"
    }

    fn pipeline_dir(&self, project: &Path) -> PathBuf {
        self.local.pipeline_dir(project)
    }

    fn state_dir(&self, project: &Path) -> PathBuf {
        self.hub.states_path().join(project_key(project))
    }

    fn catalog_dir(&self) -> Option<PathBuf> {
        Some(self.hub.pipelines_path())
    }

    fn agents_catalog_dir(&self) -> Option<PathBuf> {
        Some(self.hub.agents_path())
    }

    fn skills_catalog_dir(&self) -> Option<PathBuf> {
        Some(self.hub.skills_path())
    }

    fn project_agents_dir(&self, project: &Path) -> PathBuf {
        self.local.project_agents_dir(project)
    }

    fn project_skills_dir(&self, project: &Path) -> PathBuf {
        self.local.project_skills_dir(project)
    }
}

/// Directory name that keys a project's state under the hub.
///
/// Two projects with the same directory name share hub state.
pub fn project_key(project: &Path) -> String {
    project
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "root".to_string())
}

/// Pick the backend for this process.
pub fn resolver_for(env: &Environment) -> Arc<dyn ScopeResolver> {
    match &env.hub {
        Some(hub) => {
            debug!(hub_dir = %hub.hub_dir.display(), "Using hub scope");
            Arc::new(HubScope::new(hub.clone(), env.layout.clone()))
        }
        None => {
            debug!("Using local scope");
            Arc::new(LocalScope::new(env.layout.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_scope_keeps_everything_in_project() {
        let scope = LocalScope::new(LayoutConfig::default());
        let project = Path::new("/work/app");
        assert_eq!(
            scope.graph_file(project),
            PathBuf::from("/work/app/.claude/pipeline/graph.yaml")
        );
        assert_eq!(
            scope.state_file(project),
            PathBuf::from("/work/app/.claude/pipeline/graph_state.json")
        );
        assert_eq!(
            scope.enforcer_file(project),
            PathBuf::from("/work/app/.claude/pipeline/config.json")
        );
        assert!(scope.catalog_dir().is_none());
    }

    #[test]
    fn hub_scope_moves_state_under_hub() {
        let scope = HubScope::new(HubConfig::new("/hub"), LayoutConfig::default());
        let project = Path::new("/work/app");
        assert_eq!(
            scope.graph_file(project),
            PathBuf::from("/work/app/.claude/pipeline/graph.yaml")
        );
        assert_eq!(
            scope.state_file(project),
            PathBuf::from("/hub/.pipegraph/states/app/graph_state.json")
        );
        assert_eq!(scope.catalog_dir(), Some(PathBuf::from("/hub/.claude/pipelines")));
        assert_eq!(scope.agents_catalog_dir(), Some(PathBuf::from("/hub/.claude/agents")));
        assert_eq!(
            scope.project_agents_dir(project),
            PathBuf::from("/work/app/.claude/agents")
        );
    }

    #[test]
    fn resolver_follows_environment() {
        let local = resolver_for(&Environment::new("/home/u", None));
        assert_eq!(local.name(), "local");
        let hub = resolver_for(&Environment::new("/home/u", Some(HubConfig::new("/hub"))));
        assert_eq!(hub.name(), "hub");
    }

    #[test]
    fn project_key_uses_directory_name() {
        assert_eq!(project_key(Path::new("/a/b/demo")), "demo");
        assert_eq!(project_key(Path::new("/")), "root");
    }
}
