mod doctor;
mod hook;
mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use pipegraph_core::config::{AppConfig, Environment};
use pipegraph_core::event::EventBus;
use pipegraph_graph::{parse_graph, placeholder, project_legacy, validate, Signal};
use pipegraph_store::engine::require_persisted;
use pipegraph_store::{ActivationManager, PipelineEngine};

use hook::HookEvent;

#[derive(Parser)]
#[command(name = "pipegraph", version, about = "Graph-driven pipeline engine for coding-agent sessions")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "pipegraph.toml", global = true)]
    config: PathBuf,

    /// Project directory (default: current directory)
    #[arg(short, long, env = "PIPEGRAPH_PROJECT", global = true)]
    project: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current node, its edges and visit warnings
    Status,
    /// List the edges out of the current node
    Edges,
    /// Follow the preferred open edge
    Advance,
    /// Follow a named edge out of the current node
    Traverse {
        /// Edge id
        edge: String,
        /// Reason recorded in the execution path
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    /// Move to a node directly, ignoring edges and visit caps
    Jump {
        /// Node id
        node: String,
    },
    /// Return to the start node and clear the history
    Reset,
    /// Install a graph from the hub catalog into the project
    Activate {
        /// Catalog graph name
        name: String,
    },
    /// Clear the active graph, keeping project files
    Deactivate {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// List graphs in the hub catalog
    List,
    /// Print a Mermaid diagram of the graph
    Visualize,
    /// Print the state as a linear step list
    Legacy,
    /// Check a graph definition for structural problems
    Validate {
        /// Definition file (default: the project's graph)
        file: Option<PathBuf>,
    },
    /// Turn enforcement on for the project
    Enable,
    /// Turn enforcement off for the project
    Disable,
    /// Relay an observed event to the pipeline
    Signal {
        #[command(subcommand)]
        signal: SignalArgs,
    },
    /// Show which edges a tool use or text would fire, without moving
    Check {
        #[command(subcommand)]
        signal: CheckArgs,
    },
    /// Handle an agent-host hook (JSON on stdin)
    Hook {
        #[command(subcommand)]
        event: HookEvent,
    },
    /// Run configuration and project health checks
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum SignalArgs {
    /// A tool was used
    Tool {
        /// Tool name, e.g. mcp__github__create_pr
        name: String,
        /// Reason recorded in the execution path
        #[arg(long)]
        reason: Option<String>,
    },
    /// The agent produced text
    Text {
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
        /// Reason recorded in the execution path
        #[arg(long)]
        reason: Option<String>,
    },
    /// Nothing specific happened
    Idle,
}

#[derive(Subcommand)]
enum CheckArgs {
    /// A tool the agent might call
    Tool {
        /// Tool name, e.g. mcp__github__create_pr
        name: String,
    },
    /// Text the agent might produce
    Text {
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },
}

impl CheckArgs {
    fn into_signal(self) -> Signal {
        match self {
            CheckArgs::Tool { name } => Signal::tool(name),
            CheckArgs::Text { text } => Signal::text(text.join(" ")),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "pipegraph", &mut std::io::stdout());
        return Ok(());
    }

    let is_hook = matches!(cli.command, Commands::Hook { .. });
    let loaded = AppConfig::load_or_default(&cli.config);
    init_tracing(loaded.as_ref().ok().and_then(|c| c.log.filter.as_deref()));

    let config = match loaded {
        Ok(config) => config,
        Err(e) if is_hook => {
            warn!(error = %e, "Config unreadable, using defaults");
            AppConfig::default()
        }
        Err(e) => return Err(e.into()),
    };

    let project = match resolve_project(cli.project.as_deref()) {
        Ok(project) => project,
        Err(e) if is_hook => {
            warn!(error = %e, "Cannot resolve project, hook ignored");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    debug!(project = %project.display(), "Resolved project");

    let env = Environment::from_config(&config);
    let engine = PipelineEngine::new(&env, Arc::new(EventBus::default()));

    if let Commands::Hook { event } = cli.command {
        hook::run(&engine, &project, event).await;
        return Ok(());
    }

    let activation = ActivationManager::new(&engine);
    let json = cli.json;

    match cli.command {
        Commands::Status => {
            let status = engine.status(&project).await?;
            emit(json, &status, render::status)?;
        }
        Commands::Edges => {
            let edges = engine.available_edges(&project).await?;
            emit(json, &edges, |e| render::edges(e))?;
        }
        Commands::Advance => {
            let outcome = engine.advance(&project).await?;
            if let pipegraph_store::Advance::Moved(t) = &outcome {
                warn_unsaved(t);
            }
            emit(json, &outcome, render::advance)?;
        }
        Commands::Traverse { edge, reason } => {
            let t = engine.traverse_edge(&project, &edge, &reason).await?;
            warn_unsaved(&t);
            emit(json, &t, render::transition)?;
        }
        Commands::Jump { node } => {
            let t = engine.jump_to(&project, &node).await?;
            warn_unsaved(&t);
            emit(json, &t, render::transition)?;
        }
        Commands::Reset => {
            let t = engine.reset(&project).await?;
            warn_unsaved(&t);
            emit(json, &t, |t| render::reset(&t.state))?;
        }
        Commands::Activate { name } => {
            let report = activation.activate(&project, &name).await?;
            emit(json, &report, render::activation)?;
        }
        Commands::Deactivate { yes } => {
            if !yes && !confirm_deactivate(&project).await? {
                println!("Cancelled.");
                return Ok(());
            }
            activation.deactivate(&project).await?;
            if !json {
                println!("Pipeline deactivated.");
            }
        }
        Commands::List => {
            let entries = activation.list_catalog().await?;
            emit(json, &entries, |e| render::catalog(e))?;
        }
        Commands::Visualize => {
            let diagram = match engine.store().load_graph(&project).await {
                Ok(graph) => {
                    let state = engine.store().load_state(&project).await;
                    pipegraph_graph::project(&graph, &state)
                }
                Err(e) if e.is_not_found() => placeholder(),
                Err(e) => return Err(e.into()),
            };
            emit(json, &diagram, |d| d.text.clone())?;
        }
        Commands::Legacy => {
            let graph = engine.store().load_graph(&project).await?;
            let state = engine.store().load_state(&project).await;
            emit(json, &project_legacy(&graph, &state), render::legacy)?;
        }
        Commands::Validate { file } => {
            let graph = match file {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    parse_graph(&text)?
                }
                None => engine.store().load_graph(&project).await?,
            };
            let warnings = validate(&graph);
            emit(json, &warnings, |w| render::warnings(w))?;
        }
        Commands::Enable => toggle(&engine, &project, true, json).await?,
        Commands::Disable => toggle(&engine, &project, false, json).await?,
        Commands::Signal { signal } => {
            let (signal, reason) = match signal {
                SignalArgs::Tool { name, reason } => (Signal::tool(name), reason),
                SignalArgs::Text { text, reason } => (Signal::text(text.join(" ")), reason),
                SignalArgs::Idle => (Signal::Idle, None),
            };
            let outcome = engine.fire_signal(&project, &signal, reason.as_deref()).await?;
            emit(json, &outcome, render::advance)?;
        }
        Commands::Check { signal } => {
            let matches = engine.check(&project, &signal.into_signal()).await?;
            emit(json, &matches, |m| render::check(m))?;
        }
        Commands::Doctor => {
            println!("pipegraph doctor\n");
            let failures = doctor::run_doctor(&cli.config, &env, &engine, &project).await;
            if failures > 0 {
                std::process::exit(1);
            }
        }
        // handled before dispatch
        Commands::Hook { .. } | Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Logs go to stderr so hook output on stdout stays parseable.
fn init_tracing(configured: Option<&str>) {
    let fallback = configured.unwrap_or("pipegraph=info,warn");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_project(flag: Option<&Path>) -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    Ok(match flag {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => cwd.join(path),
        None => cwd,
    })
}

fn emit<T: Serialize + ?Sized>(json: bool, value: &T, human: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", human(value));
    }
    Ok(())
}

async fn toggle(engine: &PipelineEngine, project: &Path, enabled: bool, json: bool) -> anyhow::Result<()> {
    let config = engine.set_enforcer(project, enabled).await?;
    emit(json, &config, |c| {
        format!("Enforcer {}.\n", if c.enforcer_enabled { "enabled" } else { "disabled" })
    })
}

fn warn_unsaved(t: &pipegraph_store::Transition) {
    if let Err(e) = require_persisted(t) {
        eprintln!("Warning: {e}");
    }
}

async fn confirm_deactivate(project: &Path) -> anyhow::Result<bool> {
    let prompt = format!("Deactivate the pipeline for {}?", project.display());
    let approved = tokio::task::spawn_blocking(move || {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false)
    })
    .await?;
    Ok(approved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pipegraph", "status", "--json", "-p", "/work/app"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.project.as_deref(), Some(Path::new("/work/app")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn parses_traverse_and_signal() {
        let cli = Cli::try_parse_from(["pipegraph", "traverse", "a-b", "--reason", "done"]).unwrap();
        assert!(matches!(cli.command, Commands::Traverse { ref edge, ref reason } if edge == "a-b" && reason == "done"));

        let cli = Cli::try_parse_from(["pipegraph", "signal", "text", "plan", "approved"]).unwrap();
        match cli.command {
            Commands::Signal { signal: SignalArgs::Text { text, .. } } => assert_eq!(text.join(" "), "plan approved"),
            _ => panic!("expected signal text"),
        }

        let cli = Cli::try_parse_from(["pipegraph", "hook", "pre-tool"]).unwrap();
        assert!(matches!(cli.command, Commands::Hook { event: HookEvent::PreTool }));
    }

    #[test]
    fn parses_check() {
        let cli = Cli::try_parse_from(["pipegraph", "check", "tool", "mcp__github__create_pr"]).unwrap();
        match cli.command {
            Commands::Check { signal } => {
                assert_eq!(signal.into_signal(), Signal::tool("mcp__github__create_pr"))
            }
            _ => panic!("expected check tool"),
        }

        let cli = Cli::try_parse_from(["pipegraph", "--json", "check", "text", "plan", "approved"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Check { signal } => assert_eq!(signal.into_signal(), Signal::text("plan approved")),
            _ => panic!("expected check text"),
        }
    }

    #[test]
    fn relative_project_is_made_absolute() {
        let resolved = resolve_project(Some(Path::new("sub"))).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sub"));
    }
}
