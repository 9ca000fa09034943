use std::path::{Path, PathBuf};

/// File name of a project's copied graph definition.
pub const GRAPH_FILE: &str = "graph.yaml";

/// File name of the persisted graph state.
pub const STATE_FILE: &str = "graph_state.json";

/// File name of the per-project enable flag.
pub const ENFORCER_FILE: &str = "config.json";

/// Maps a project to where its pipeline files live.
///
/// One backend is chosen per process and shared by every store operation.
pub trait ScopeResolver: Send + Sync + 'static {
    /// Backend name (e.g., "local", "hub").
    fn name(&self) -> &str;

    /// Directory holding the project's copied graph definition.
    fn pipeline_dir(&self, project: &Path) -> PathBuf;

    /// Directory holding the mutable state and the enable flag.
    fn state_dir(&self, project: &Path) -> PathBuf;

    /// Shared catalog of installable graphs, if any.
    fn catalog_dir(&self) -> Option<PathBuf>;

    /// Shared catalog of supporting agent definitions, if any.
    fn agents_catalog_dir(&self) -> Option<PathBuf>;

    /// Shared catalog of skill descriptors, if any.
    fn skills_catalog_dir(&self) -> Option<PathBuf>;

    /// Where provisioned agent definitions land inside the project.
    fn project_agents_dir(&self, project: &Path) -> PathBuf;

    /// Where skill descriptors land inside the project.
    fn project_skills_dir(&self, project: &Path) -> PathBuf;

    fn graph_file(&self, project: &Path) -> PathBuf {
        self.pipeline_dir(project).join(GRAPH_FILE)
    }

    fn state_file(&self, project: &Path) -> PathBuf {
        self.state_dir(project).join(STATE_FILE)
    }

    fn enforcer_file(&self, project: &Path) -> PathBuf {
        self.state_dir(project).join(ENFORCER_FILE)
    }
}
