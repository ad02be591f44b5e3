use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use quire::config::Config;
use quire::git::CommitSummary;
use quire::logging;
use quire::rest::{self, ApiState};

/// Check that a git binary is on PATH
fn check_git_available() -> Result<()> {
    match which::which("git") {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "git available");
            Ok(())
        }
        Err(_) => {
            eprintln!("git is required to run quire.");
            eprintln!();
            eprintln!("Install git:");
            eprintln!("  macOS:         brew install git");
            eprintln!("  Ubuntu/Debian: sudo apt install git");
            eprintln!("  Fedora/RHEL:   sudo dnf install git");
            bail!("git not found on PATH")
        }
    }
}

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Git-backed tasks and documents with real-time collaborative editing")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync repositories, then run the REST API and collaboration server
    Serve {
        /// REST API port (default: from config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Collaboration server port (default: from config)
        #[arg(long)]
        collab_port: Option<u16>,
    },

    /// Clone or refresh every fleet repository
    Sync,

    /// List configured repositories
    Repos,

    /// Show uncommitted task and document changes
    Status {
        /// Only this repository
        #[arg(short, long)]
        repo: Option<String>,
    },

    /// Commit and push task and document changes
    Commit {
        /// Only this repository
        #[arg(short, long)]
        repo: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let mut config = Config::load(cli.config.as_deref())?;

    let serve_mode = matches!(cli.command, Commands::Serve { .. });
    let logging_handle = logging::init_logging(&config, serve_mode, cli.debug)?;
    if let Some(path) = &logging_handle.log_file_path {
        eprintln!("Logging to {}", path.display());
    }

    check_git_available()?;

    match cli.command {
        Commands::Serve { port, collab_port } => {
            if let Some(port) = port {
                config.rest_api.port = port;
            }
            if let Some(port) = collab_port {
                config.collab.port = port;
            }
            cmd_serve(config).await?;
        }
        Commands::Sync => cmd_sync(config).await?,
        Commands::Repos => cmd_repos(&config)?,
        Commands::Status { repo } => cmd_status(config, repo).await?,
        Commands::Commit { repo } => cmd_commit(config, repo).await?,
    }

    Ok(())
}

async fn cmd_serve(config: Config) -> Result<()> {
    println!("Starting quire...");
    println!("  REST API:      http://0.0.0.0:{}", config.rest_api.port);
    println!("  Collaboration: ws://0.0.0.0:{}/collab", config.collab.port);
    println!("  Endpoints:");
    println!("    GET  /api/v1/health         Health check");
    println!("    GET  /api/v1/status         Server status");
    println!("    GET  /api/v1/repos          Available repositories");
    println!("    GET  /api/v1/changes        Uncommitted changes");
    println!("    POST /api/v1/commit         Commit and push changes");
    println!("    GET  /api/v1/sessions       Live editing sessions");
    println!("    GET  /api/v1/openapi.json   OpenAPI document");
    println!();

    rest::serve(ApiState::new(config)).await
}

async fn cmd_sync(config: Config) -> Result<()> {
    let state = ApiState::new(config);
    if state.registry.is_local() {
        println!("Local mode: nothing to sync.");
        return Ok(());
    }

    let mut failed = 0;
    for (repo, result) in state.sync.sync_all().await? {
        match result {
            Ok(outcome) => println!("  {:<40} {}", repo.identifier, outcome.label()),
            Err(e) => {
                failed += 1;
                println!("  {:<40} failed: {}", repo.identifier, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} repositories failed to sync", failed);
    }
    Ok(())
}

fn cmd_repos(config: &Config) -> Result<()> {
    let state = ApiState::new(config.clone());
    let fleet = state.registry.fleet();
    for dropped in &fleet.dropped {
        println!("  skipped invalid entry: {}", dropped);
    }

    let repos = state.registry.list_repositories()?;
    if repos.is_empty() {
        println!("No repositories configured.");
        return Ok(());
    }

    for repo in repos {
        let note = if repo.has_clone() { "" } else { " (not cloned)" };
        println!(
            "  {:<40} {}{}",
            repo.display_name(),
            repo.local_path.display(),
            note
        );
    }
    Ok(())
}

async fn cmd_status(config: Config, repo: Option<String>) -> Result<()> {
    let state = ApiState::new(config);
    let files = state.pipeline.pending_changes(repo.as_deref()).await?;
    if files.is_empty() {
        println!("No changes to commit.");
        return Ok(());
    }

    for file in files {
        println!(
            "  {:<9} {:<5} {:<30} {} ({})",
            file.status.as_str(),
            file.kind.as_str(),
            file.repository,
            file.title,
            file.path
        );
    }
    Ok(())
}

async fn cmd_commit(config: Config, repo: Option<String>) -> Result<()> {
    let state = ApiState::new(config);
    let report = state.pipeline.commit_and_push(repo.as_deref()).await?;

    if let Some(advisory) = report.advisory() {
        println!("{}", advisory);
    }
    match report.summary() {
        CommitSummary::Failed(errors) => bail!("{}", errors.join("; ")),
        summary => println!("{}", summary),
    }
    Ok(())
}
