//! Fixture environments and sample graph definitions shared by tests.

use std::fs;
use std::path::{Path, PathBuf};

use pipegraph_core::config::{Environment, HubConfig};
use tempfile::TempDir;

/// `A` (start) → `B` → `C` (end).
pub const LINEAR_GRAPH: &str = r#"metadata:
  name: "linear"
  version: "2.0.0"
  type: graph

nodes:
  - id: A
    name: "Alpha"
    is_start: true
  - id: B
    name: "Beta"
  - id: C
    name: "Gamma"
    is_end: true

edges:
  - id: a-b
    from: A
    to: B
  - id: b-c
    from: B
    to: C
"#;

/// `X` fans out to `Y` on a tool (priority 2) and to `Z` always (priority 1).
pub const BRANCHING_GRAPH: &str = r#"metadata:
  name: "branching"
  type: graph

nodes:
  - id: X
    is_start: true
  - id: Y
    max_visits: 2
  - id: Z
    is_end: true

edges:
  - id: x-y
    from: X
    to: Y
    condition:
      type: tool
      tool: mcp__docs__
    priority: 2
  - id: x-z
    from: X
    to: Z
    priority: 1
  - id: y-x
    from: Y
    to: X
"#;

/// A catalog graph with policy fields and one required agent.
pub const REVIEW_GRAPH: &str = r#"# Code review pipeline
metadata:
  name: "review"
  description: "Plan, implement, review"
  version: "2.0.0"
  type: graph
  required_agents:
    - reviewer
  required_mcps: [Context7]

nodes:
  - id: plan
    name: "Plan"
    mcps_enabled:
      - Context7
    tools_blocked: [Write, Edit]
    prompt_injection: |
      Read the relevant docs before planning.
      Do not edit files yet.
    is_start: true
  - id: implement
    name: "Implement"
    max_visits: 3
  - id: review
    name: "Review"
    is_end: true

edges:
  - id: plan-implement
    from: plan
    to: implement
    condition:
      type: phrase
      phrases:
        - "plan approved"
  - id: implement-review
    from: implement
    to: review
    condition:
      type: tool
      tool: mcp__github__
  - id: review-implement
    from: review
    to: implement
    condition:
      type: default
"#;

/// Agent definition body written by [`FixtureEnv::add_agent`].
pub fn agent_body(name: &str) -> String {
    format!("---\nname: {name}\ndescription: test agent\n---\n\nYou are {name}.\n")
}

/// Temporary home, hub and project directories with a matching [`Environment`].
pub struct FixtureEnv {
    _root: TempDir,
    pub home: PathBuf,
    pub hub_dir: PathBuf,
    pub project: PathBuf,
    pub env: Environment,
}

impl FixtureEnv {
    /// Environment with a hub catalog.
    pub fn hub() -> Self {
        Self::build(true)
    }

    /// Project-local-only environment.
    pub fn local() -> Self {
        Self::build(false)
    }

    fn build(with_hub: bool) -> Self {
        let root = TempDir::new().expect("create temp dir");
        let home = root.path().join("home");
        let hub_dir = root.path().join("hub");
        let project = root.path().join("projects").join("demo");
        fs::create_dir_all(&home).expect("create home");
        fs::create_dir_all(&project).expect("create project");

        let hub = with_hub.then(|| {
            let hub = HubConfig::new(&hub_dir);
            fs::create_dir_all(hub.pipelines_path()).expect("create catalog");
            fs::create_dir_all(hub.agents_path()).expect("create agents");
            hub
        });

        Self {
            env: Environment::new(&home, hub),
            _root: root,
            home,
            hub_dir,
            project,
        }
    }

    fn hub_config(&self) -> &HubConfig {
        self.env.hub.as_ref().expect("fixture has no hub")
    }

    /// Write a graph definition into the hub catalog.
    pub fn add_catalog_graph(&self, file_name: &str, text: &str) -> PathBuf {
        let path = self.hub_config().pipelines_path().join(file_name);
        fs::write(&path, text).expect("write catalog graph");
        path
    }

    /// Write an agent definition into the hub catalog.
    pub fn add_agent(&self, name: &str) -> PathBuf {
        let path = self.hub_config().agents_path().join(format!("{name}.md"));
        fs::write(&path, agent_body(name)).expect("write agent");
        path
    }

    /// Write a graph definition straight into the project.
    pub fn write_local_graph(&self, text: &str) -> PathBuf {
        let dir = self.project.join(&self.env.layout.pipeline_dir);
        fs::create_dir_all(&dir).expect("create pipeline dir");
        let path = dir.join("graph.yaml");
        fs::write(&path, text).expect("write graph");
        path
    }

    /// Write `~/.pipegraph/config.json` pointing at this fixture's hub.
    pub fn write_hub_config(&self) -> PathBuf {
        let dir = self.home.join(".pipegraph");
        fs::create_dir_all(&dir).expect("create config dir");
        let path = dir.join("config.json");
        let body = serde_json::json!({ "hub_dir": self.hub_dir });
        fs::write(&path, serde_json::to_string_pretty(&body).expect("encode"))
            .expect("write hub config");
        path
    }

    /// Read a file relative to the project root.
    pub fn read_project_file(&self, relative: impl AsRef<Path>) -> String {
        fs::read_to_string(self.project.join(relative)).expect("read project file")
    }
}
