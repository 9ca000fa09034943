//! Relay for agent-host hooks: JSON on stdin, optional JSON on stdout.
//!
//! A hook must never break the host session, so every failure ends up in
//! the log and the process still exits successfully.

use std::path::Path;

use clap::Subcommand;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use pipegraph_graph::Signal;
use pipegraph_store::{Advance, PipelineEngine};

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// A tool call finished; may fire tool edges
    PostTool,
    /// A tool call is about to run; prints a block decision when gated
    PreTool,
    /// The agent produced text; may fire phrase edges
    Text,
}

/// Fields the relay understands. Hosts send more; the rest is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct HookPayload {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default, alias = "message")]
    pub text: Option<String>,
}

/// Read stdin and handle it. Never fails.
pub async fn run(engine: &PipelineEngine, project: &Path, event: HookEvent) {
    let mut input = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut input).await {
        warn!(error = %e, "Failed to read hook input");
        return;
    }

    match handle(engine, project, event, &input).await {
        Ok(Some(output)) => println!("{output}"),
        Ok(None) => {}
        Err(e) => warn!(?event, error = %e, "Hook ignored"),
    }
}

/// Process one hook payload, returning what to print, if anything.
pub async fn handle(
    engine: &PipelineEngine,
    project: &Path,
    event: HookEvent,
    input: &str,
) -> anyhow::Result<Option<String>> {
    if !engine.enforcer_enabled(project).await {
        debug!("Enforcer disabled, hook is a no-op");
        return Ok(None);
    }
    if !engine.store().has_graph(project).await {
        debug!("No pipeline graph, hook is a no-op");
        return Ok(None);
    }
    if engine.store().load_state(project).await.current_node().is_none() {
        debug!("Pipeline deactivated, hook is a no-op");
        return Ok(None);
    }

    let payload: HookPayload = if input.trim().is_empty() {
        HookPayload::default()
    } else {
        serde_json::from_str(input)?
    };

    let signal = match (event, payload) {
        (HookEvent::PreTool, HookPayload { tool_name: Some(tool), .. }) => {
            let verdict = engine.gate_tool(project, &tool).await?;
            if verdict.is_blocked() {
                info!(tool = %tool, %verdict, "Tool call gated");
                return Ok(Some(serde_json::to_string(&verdict)?));
            }
            return Ok(None);
        }
        (HookEvent::PostTool, HookPayload { tool_name: Some(tool), .. }) => Signal::tool(tool),
        (HookEvent::Text, HookPayload { text: Some(text), .. }) => Signal::text(text),
        (event, _) => {
            debug!(?event, "Hook payload carries nothing to relay");
            return Ok(None);
        }
    };

    match engine.fire_signal(project, &signal, None).await? {
        Advance::Moved(t) => debug!(to = %t.entry.to_node, "Hook advanced pipeline"),
        Advance::Stayed { reason, .. } => debug!(%reason, "Hook left pipeline in place"),
    }
    Ok(None)
}
