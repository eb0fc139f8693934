use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rocket_warden::{api, config::WardenConfig, mcp, sessions, Warden, WardenError};

#[derive(Parser)]
#[command(name = "wrdn")]
#[command(about = "Claim coordination and tamper-evident build evidence for concurrent coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and the staleness sweeper
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
    /// Start MCP server via stdio (for agent integration)
    Mcp,
    /// Verify a project's evidence chain
    Verify {
        /// Project whose ledger to verify
        #[arg(short, long)]
        project: String,
    },
    /// End stale sessions once and exit
    Sweep,
}

/// Initialize tracing with output to stderr (for MCP mode) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "rocket_warden=debug,tower_http=debug".into()),
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

async fn serve(warden: Warden, port: u16) -> anyhow::Result<()> {
    let sweeper = sessions::spawn_sweeper(
        warden.sessions().clone(),
        warden.config().sweep_interval(),
    );

    let app = api::create_router(warden);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("RocketWarden server listening on http://127.0.0.1:{}", port);

    let result = axum::serve(listener, app).await;
    sweeper.abort();
    result?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // MCP mode needs stderr for logging since stdout is the protocol channel
    let use_stderr = matches!(cli.command, Some(Commands::Mcp));
    init_tracing(use_stderr);

    let config = WardenConfig::load();
    let warden = Warden::from_config(config)?;

    match cli.command.unwrap_or(Commands::Serve { port: 3000 }) {
        Commands::Serve { port } => {
            tracing::info!("Starting RocketWarden server on port {}", port);
            serve(warden, port).await?;
        }
        Commands::Mcp => {
            let sweeper = sessions::spawn_sweeper(
                warden.sessions().clone(),
                warden.config().sweep_interval(),
            );
            let result = mcp::run_stdio_server(warden).await;
            sweeper.abort();
            result?;
        }
        Commands::Verify { project } => match warden.vault().verify_chain(&project) {
            Ok(summary) => {
                println!(
                    "{}: {} manifests, chain intact (head {})",
                    summary.project,
                    summary.length,
                    summary.head.as_deref().unwrap_or("genesis")
                );
            }
            Err(e @ WardenError::ChainIntegrity { .. }) => {
                eprintln!("{}", e);
                std::process::exit(2);
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Sweep => {
            let swept = warden.sessions().sweep_stale()?;
            for ended in &swept {
                println!(
                    "ended session {} ({}) and released {} claims",
                    ended.session.id,
                    ended.session.agent_name,
                    ended.released.len()
                );
            }
            println!("{} stale sessions swept", swept.len());
        }
    }

    Ok(())
}
