use std::path::Path;

use pipegraph_core::config::Environment;
use pipegraph_core::traits::ScopeResolver;
use pipegraph_graph::validate;
use pipegraph_store::catalog::list_catalog;
use pipegraph_store::PipelineEngine;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

impl CheckResult {
    fn ok(label: &str, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(label: &str, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Print a health report for the configuration and `project`.
/// Returns the number of failed checks.
pub async fn run_doctor(
    config_path: &Path,
    env: &Environment,
    engine: &PipelineEngine,
    project: &Path,
) -> usize {
    let scope = engine.store().scope();
    let checks = vec![
        check_config(config_path),
        check_hub(env),
        check_catalog(scope).await,
        check_graph(engine, project).await,
        check_state(engine, project).await,
        check_enforcer(engine, project).await,
    ];

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
    fail_count
}

fn check_config(path: &Path) -> CheckResult {
    if path.exists() {
        CheckResult::ok("Config", path.display().to_string())
    } else {
        CheckResult::ok("Config", format!("{} not found, using defaults", path.display()))
    }
}

fn check_hub(env: &Environment) -> CheckResult {
    match &env.hub {
        Some(hub) if hub.hub_dir.is_dir() => CheckResult::ok("Hub", hub.hub_dir.display().to_string()),
        Some(hub) => CheckResult::fail(
            "Hub",
            format!("{} (does not exist)", hub.hub_dir.display()),
        ),
        None => CheckResult::ok("Hub", "not configured, project-local storage"),
    }
}

async fn check_catalog(scope: &dyn ScopeResolver) -> CheckResult {
    let Some(catalog) = scope.catalog_dir() else {
        return CheckResult::ok("Catalog", "none (local mode)");
    };
    if !catalog.is_dir() {
        return CheckResult::fail("Catalog", format!("{} (does not exist)", catalog.display()));
    }

    let entries = list_catalog(&catalog).await;
    let broken: Vec<_> = entries
        .iter()
        .filter(|e| e.error.is_some())
        .map(|e| e.name.as_str())
        .collect();
    if broken.is_empty() {
        CheckResult::ok("Catalog", format!("{} graphs in {}", entries.len(), catalog.display()))
    } else {
        CheckResult::fail("Catalog", format!("unparseable: {}", broken.join(", ")))
    }
}

async fn check_graph(engine: &PipelineEngine, project: &Path) -> CheckResult {
    match engine.store().load_graph(project).await {
        Ok(graph) => {
            let warnings = validate(&graph);
            if warnings.is_empty() {
                CheckResult::ok(
                    "Graph",
                    format!("'{}' with {} nodes", graph.metadata.name, graph.nodes.len()),
                )
            } else {
                CheckResult::fail("Graph", warnings.join("; "))
            }
        }
        Err(e) if e.is_not_found() => CheckResult::ok("Graph", "no graph installed"),
        Err(e) => CheckResult::fail("Graph", e.to_string()),
    }
}

async fn check_state(engine: &PipelineEngine, project: &Path) -> CheckResult {
    let state = engine.store().load_state(project).await;
    let Some(current) = state.current_node() else {
        return CheckResult::ok("State", "idle");
    };
    match engine.store().load_graph(project).await {
        Ok(graph) if graph.node(current).is_some() => CheckResult::ok(
            "State",
            format!("at '{}' after {} transitions", current, state.total_transitions),
        ),
        Ok(_) => CheckResult::fail(
            "State",
            format!("current node '{current}' is not in the graph; run reset"),
        ),
        Err(_) => CheckResult::fail("State", format!("at '{current}' but no readable graph")),
    }
}

async fn check_enforcer(engine: &PipelineEngine, project: &Path) -> CheckResult {
    let enabled = engine.enforcer_enabled(project).await;
    CheckResult::ok("Enforcer", if enabled { "enabled" } else { "disabled" })
}
