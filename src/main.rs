//! Armada - declarative fleet rollout CLI
//!
//! This is the main CLI entry point for Armada.

use armada::config::FleetFile;
use armada::docker::{DockerCluster, RolloutOptions};
use armada::error::{ArmadaError, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Armada - fleet topology compiler and rollout orchestrator
#[derive(Parser)]
#[command(name = "armada")]
#[command(version)]
#[command(about = "Compile a service fleet into Compose/Swarm documents and roll it out", long_about = None)]
struct Cli {
    /// Fleet file; probed in the working directory when omitted
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Environment file loaded before the fleet file is interpolated
    #[arg(short, long, global = true, default_value = ".env")]
    env: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision every node: harden, install the engine, form the swarm
    Setup,

    /// Build, upload, and start the full stack on every node
    Deploy {
        /// Skip the image build phase
        #[arg(long)]
        skip_build: bool,
    },

    /// Start the stack from documents already on the nodes
    Run {
        /// Skip the image build phase
        #[arg(long)]
        skip_build: bool,
    },

    /// Print the compiled deployment document without touching any node
    Render,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = execute(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    load_env_file(&cli.env)?;

    let path = match cli.file {
        Some(path) => path,
        None => FleetFile::find(Path::new(".")).ok_or_else(|| {
            ArmadaError::Config("no fleet file found in the working directory".to_string())
        })?,
    };
    let docker = FleetFile::parse_file(&path)?.into_cluster()?;

    match cli.command {
        Commands::Setup => {
            let report = docker.setup().await?;
            tracing::info!(
                nodes = report.nodes,
                elapsed = %(report.completed_at - report.started_at),
                "setup complete"
            );
        }
        Commands::Deploy { skip_build } => {
            let report = docker.deploy(&RolloutOptions { skip_build }).await?;
            tracing::info!(
                nodes = report.nodes,
                elapsed = %(report.completed_at - report.started_at),
                "deploy complete"
            );
        }
        Commands::Run { skip_build } => {
            let report = docker.run(&RolloutOptions { skip_build }).await?;
            tracing::info!(
                nodes = report.nodes,
                elapsed = %(report.completed_at - report.started_at),
                "run complete"
            );
        }
        Commands::Render => {
            render(&docker)?;
        }
    }
    Ok(())
}

fn render(docker: &DockerCluster) -> Result<()> {
    let document = docker.to_compose()?.to_yaml()?;
    println!("{}", document);
    Ok(())
}

/// Load `KEY=VALUE` lines into the process environment.
///
/// Missing file is not an error; the default `.env` is optional.
fn load_env_file(path: &Path) -> Result<()> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(ArmadaError::Config(format!(
                "failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"');
            std::env::set_var(key.trim(), value);
        }
    }
    Ok(())
}
