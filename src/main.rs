use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use automode::{
    api::{self, AppState, SecurityConfig},
    config::Config,
    db, mcp,
    mcp::client::AutoModeClient,
    models::FeatureStatus,
    runner::CommandRunner,
    scheduler::AutoModeScheduler,
};

/// How often idle loops and stale rate-limit entries are swept.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "automode")]
#[command(about = "Runs coding agents over a feature backlog, respecting dependencies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the automode server
    Serve(ServeArgs),
    /// Start MCP server via stdio, talking to a running server
    Mcp,
    /// Start the auto-loop for a project
    Start {
        /// Project path
        project: String,
        /// Worktree branch (omit for the main worktree)
        #[arg(short, long)]
        branch: Option<String>,
        /// Maximum features executing at once
        #[arg(short, long)]
        max_concurrency: Option<usize>,
    },
    /// Stop the auto-loop for a project
    Stop {
        project: String,
        #[arg(short, long)]
        branch: Option<String>,
    },
    /// Show auto-mode status for one project, or for the whole server
    Status {
        project: Option<String>,
        #[arg(short, long)]
        branch: Option<String>,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(clap::Args, Default)]
struct ServeArgs {
    /// Port for HTTP API
    #[arg(short, long)]
    port: Option<u16>,

    /// Default concurrency ceiling for new loops
    #[arg(short, long)]
    max_concurrency: Option<usize>,

    /// Shell command run for each feature
    #[arg(long)]
    agent_command: Option<String>,

    /// Mark successful features verified instead of waiting for approval
    #[arg(long)]
    auto_verify: bool,

    /// SQLite database file
    #[arg(long)]
    db: Option<PathBuf>,
}

/// Initialize tracing with output to stderr (for MCP mode) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "automode=debug,tower_http=debug".into()),
    );

    if use_stderr {
        // MCP mode: log to stderr so stdout is clean for protocol
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // MCP mode needs stderr for logging since stdout is the protocol channel
    let use_stderr = matches!(cli.command, Some(Commands::Mcp));
    init_tracing(use_stderr);

    match cli.command {
        Some(Commands::Serve(args)) => serve(args).await?,
        None => serve(ServeArgs::default()).await?,
        Some(Commands::Mcp) => {
            mcp::run_stdio_server(AutoModeClient::from_env()).await?;
        }
        Some(Commands::Start {
            project,
            branch,
            max_concurrency,
        }) => {
            let client = AutoModeClient::from_env();
            print_json(
                &client
                    .start(&project, branch.as_deref(), max_concurrency)
                    .await?,
            )?;
        }
        Some(Commands::Stop { project, branch }) => {
            let client = AutoModeClient::from_env();
            print_json(&client.stop(&project, branch.as_deref()).await?)?;
        }
        Some(Commands::Status { project, branch }) => {
            let client = AutoModeClient::from_env();
            match project {
                Some(project) => {
                    print_json(&client.project_status(&project, branch.as_deref()).await?)?
                }
                None => print_json(&client.global_status().await?)?,
            }
        }
        Some(Commands::Config { save }) => {
            let config = Config::load();
            print_json(&config)?;
            if save {
                let path = config.save()?;
                eprintln!("Saved to {}", path.display());
            }
        }
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = Config::load();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max) = args.max_concurrency {
        config.default_max_concurrency = max;
    }
    if let Some(command) = args.agent_command {
        config.agent_command = Some(command);
    }
    if args.auto_verify {
        config.success_status = FeatureStatus::Verified;
    }
    if let Some(path) = args.db {
        config.database_path = Some(path);
    }

    let db = match &config.database_path {
        Some(path) => db::Database::open(path.clone())?,
        None => db::Database::open_default()?,
    };
    db.migrate()?;

    let runner = CommandRunner::new(config.agent_command.clone());
    if !runner.is_configured() {
        tracing::warn!(
            "No agent command configured; dispatched features will fail. Set AUTOMODE_AGENT_COMMAND or --agent-command"
        );
    }

    let scheduler = AutoModeScheduler::new(
        Arc::new(db.clone()),
        Arc::new(runner),
        config.scheduler_config(),
    );
    let security = SecurityConfig::from_env();
    if security.api_key.is_some() {
        tracing::info!("API key authentication enabled");
    }

    spawn_housekeeping(scheduler.clone(), security.clone());

    let app = api::create_router_with_security(
        AppState {
            db,
            scheduler: scheduler.clone(),
        },
        security,
    );

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", config.port)).await?;
    tracing::info!(
        "automode server listening on http://127.0.0.1:{}",
        config.port
    );

    // Peer addresses key the start/stop throttle.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let status = scheduler.global_status();
    if status.running_count > 0 {
        tracing::warn!(
            "Shutting down with {} feature(s) still in progress: {:?}",
            status.running_count,
            status.running_features
        );
    }
    Ok(())
}

fn spawn_housekeeping(scheduler: AutoModeScheduler, security: SecurityConfig) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            interval.tick().await;
            let pruned = scheduler.prune_idle();
            if pruned > 0 {
                tracing::debug!("Pruned {} idle auto-loop(s)", pruned);
            }
            if let Some(limiter) = &security.control_limiter {
                limiter.cleanup();
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
