//! Copy the assets an activated graph needs into the project.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use pipegraph_core::error::Result;
use pipegraph_core::traits::ScopeResolver;

/// Directory of the status skill under the project's skills dir.
pub const STATUS_SKILL_DIR: &str = "pipeline-status";

pub const SKILL_FILE: &str = "SKILL.md";

/// Written when the hub carries no status skill of its own.
pub const STATUS_SKILL: &str = "---
name: pipeline-status
description: Show where this project is in its pipeline graph and which edges lead on.
---

# Pipeline status

Run `pipegraph status` from the project root to see the current node, its
visit count, blocked tools and the outgoing edges.

- `pipegraph edges` lists the edges out of the current node.
- `pipegraph traverse <edge> --reason \"...\"` follows an edge explicitly.
- `pipegraph visualize` prints a Mermaid diagram of the whole graph.

Add `--json` to any command for machine-readable output.
";

/// What happened to the agents a graph asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentProvisioning {
    pub installed: Vec<String>,
    pub missing: Vec<String>,
}

/// Copy `{name}.md` for each agent from the hub catalog into the project.
///
/// Agents absent from the catalog are skipped and reported. Copy failures
/// are errors.
pub async fn provision_agents(
    scope: &dyn ScopeResolver,
    project: &Path,
    agents: &[String],
) -> Result<AgentProvisioning> {
    let mut report = AgentProvisioning::default();
    if agents.is_empty() {
        return Ok(report);
    }

    let Some(catalog) = scope.agents_catalog_dir() else {
        warn!("No agent catalog configured, skipping required agents");
        report.missing = agents.to_vec();
        return Ok(report);
    };
    let target_dir = scope.project_agents_dir(project);

    for name in agents {
        let file_name = format!("{name}.md");
        let source = catalog.join(&file_name);
        if tokio::fs::metadata(&source).await.is_err() {
            warn!(agent = %name, path = %source.display(), "Required agent not in catalog");
            report.missing.push(name.clone());
            continue;
        }

        tokio::fs::create_dir_all(&target_dir).await?;
        tokio::fs::copy(&source, target_dir.join(&file_name)).await?;
        debug!(agent = %name, "Provisioned agent");
        report.installed.push(name.clone());
    }

    info!(
        installed = report.installed.len(),
        missing = report.missing.len(),
        "Agents provisioned"
    );
    Ok(report)
}

/// Write the status skill descriptor, preferring the hub's copy.
pub async fn write_status_skill(scope: &dyn ScopeResolver, project: &Path) -> Result<PathBuf> {
    let target = scope
        .project_skills_dir(project)
        .join(STATUS_SKILL_DIR)
        .join(SKILL_FILE);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let hub_copy = scope
        .skills_catalog_dir()
        .map(|dir| dir.join(STATUS_SKILL_DIR).join(SKILL_FILE));
    match hub_copy {
        Some(source) if tokio::fs::metadata(&source).await.is_ok() => {
            tokio::fs::copy(&source, &target).await?;
            debug!(source = %source.display(), "Copied status skill from hub");
        }
        _ => tokio::fs::write(&target, STATUS_SKILL).await?,
    }
    Ok(target)
}
