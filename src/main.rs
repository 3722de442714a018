mod check;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conductor_core::config::AppConfig;
use conductor_core::types::{GraphEvent, Value, DEFAULT_OUTPUT};
use conductor_core::ServiceContainer;
use conductor_graph::{GraphRecord, Registry, StateMachine};
use conductor_notebook::{CellResult, Notebook};

#[derive(Parser)]
#[command(name = "conductor", version, about = "Reactive dataflow graph runner")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml", env = "CONDUCTOR_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a graph, apply forced outputs, and print the resulting state
    Run {
        /// Graph file (.toml or .json)
        graph: PathBuf,
        /// Force an output: node[.property]=json (property defaults to "result")
        #[arg(long = "set", value_name = "ASSIGNMENT")]
        sets: Vec<String>,
        /// Keep the graph open and print output events
        #[arg(long)]
        watch: bool,
        /// Stop watching after this many milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,
        /// Print the final snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a graph for structural problems
    Check {
        /// Graph file (.toml or .json)
        graph: PathBuf,
    },
    /// List available node types
    Nodes,
    /// Evaluate a notebook file (one cell per line)
    Notebook {
        /// Notebook file
        file: PathBuf,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "conductor", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let registry = Arc::new(Registry::with_builtins());

    match cli.command {
        Commands::Run {
            graph,
            sets,
            watch,
            duration_ms,
            json,
        } => {
            let options = RunOptions {
                sets,
                watch,
                duration: duration_ms.map(Duration::from_millis),
                json,
            };
            run_graph(&graph, registry, &config, options).await?;
        }
        Commands::Check { graph } => {
            let record = GraphRecord::load(&graph)
                .with_context(|| format!("loading {}", graph.display()))?;
            println!("Conductor Check: {}", graph.display());
            println!("================");
            if !check::run_check(&record, &registry) {
                std::process::exit(1);
            }
        }
        Commands::Nodes => {
            for descriptor in registry.descriptors() {
                println!("  {:<16} {}", descriptor.kind, descriptor.description);
            }
        }
        Commands::Notebook { file, json } => {
            run_notebook(&file, json)?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

struct RunOptions {
    sets: Vec<String>,
    watch: bool,
    duration: Option<Duration>,
    json: bool,
}

async fn run_graph(
    path: &Path,
    registry: Arc<Registry>,
    config: &AppConfig,
    options: RunOptions,
) -> anyhow::Result<()> {
    let record =
        GraphRecord::load(path).with_context(|| format!("loading {}", path.display()))?;
    let machine = StateMachine::from_record(registry, &record, config.engine.clone())?;
    let mut events = machine.subscribe();

    let failures = machine.open(ServiceContainer::new()).await?;
    for failure in &failures {
        warn!(node_id = %failure.node_id, error = %failure.error, "Node failed to open");
    }

    for assignment in &options.sets {
        let (node, property, value) = parse_assignment(assignment)?;
        machine.set_output(node, property, value)?;
    }
    let report = machine.flush().await?;
    info!(
        iterations = report.iterations,
        invoked = report.invoked.len(),
        failed = report.failures.len(),
        "Pass complete"
    );

    if options.watch {
        let deadline = async {
            match options.duration {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = &mut deadline => break,
                event = events.recv() => match event {
                    Ok(GraphEvent::Output { node_id, property, value }) => {
                        println!("{}.{} = {}", node_id, property, value);
                    }
                    Ok(GraphEvent::NodeFailed(failure)) => {
                        eprintln!("{} failed: {}", failure.node_id, failure.error);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    let snapshot = machine.snapshot();
    machine.close();

    if options.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        for node in &snapshot.nodes {
            let status = serde_json::to_value(&node.status)?;
            println!(
                "  {:<12} {:<14} {:<12} in={} out={}",
                node.id.as_str(),
                node.kind,
                status["type"].as_str().unwrap_or("unknown"),
                serde_json::to_string(&node.inputs)?,
                serde_json::to_string(&node.outputs)?,
            );
        }
    }
    Ok(())
}

/// Parse `node[.property]=json`. Values that are not JSON are taken as strings.
fn parse_assignment(input: &str) -> anyhow::Result<(String, String, Value)> {
    let (target, raw) = input
        .split_once('=')
        .with_context(|| format!("expected node[.property]=value, got '{}'", input))?;
    let (node, property) = match target.split_once('.') {
        Some((node, property)) => (node.trim(), property.trim()),
        None => (target.trim(), DEFAULT_OUTPUT),
    };
    anyhow::ensure!(!node.is_empty(), "missing node id in '{}'", input);
    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((node.to_string(), property.to_string(), value))
}

fn run_notebook(path: &Path, json: bool) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let notebook = Notebook::from_sources(
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#')),
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&notebook.cells())?);
        return Ok(());
    }
    for cell in notebook.cells() {
        let label = cell.name.clone().unwrap_or_else(|| format!("[{}]", cell.id.0));
        match cell.result {
            CellResult::Ok { value } => println!("  {} = {}", label, value),
            CellResult::Error { message } => println!("  {} !! {}", label, message),
        }
    }
    Ok(())
}
