use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tether_mesh::agent::{NodeAgent, NullMetrics, default_registry};
use tether_mesh::config::{AgentConfig, ControllerConfig};
use tether_mesh::db::Role;
use tether_mesh::daemon::Daemon;

/// Tether - edge-fleet controller and node agent
#[derive(Parser)]
#[command(name = "tether", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller
    Serve {
        /// Port to listen on
        #[arg(long, env = "TETHER_PORT", default_value = "8000")]
        port: u16,
    },
    /// Run the node agent
    Agent {
        /// Path to the agent configuration file
        #[arg(short, long, default_value = "agent.toml")]
        config: PathBuf,
    },
    /// Write a starter agent configuration file
    InitConfig {
        /// Stable node identifier
        #[arg(long)]
        node_id: String,
        /// Controller URL
        #[arg(long)]
        controller: String,
        /// Output path
        #[arg(short, long, default_value = "agent.toml")]
        output: PathBuf,
    },
    /// Create an operator account
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: Option<String>,
        /// Password (or set TETHER_USER_PASSWORD)
        #[arg(long, env = "TETHER_USER_PASSWORD", hide_env_values = true)]
        password: String,
        /// Role: admin, operator, or observer
        #[arg(long, default_value = "observer")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,tether_mesh=info",
        1 => "info,tether_mesh=debug",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve { port } => {
            let config = ControllerConfig::from_env();
            tracing::info!(db = %config.database_path.display(), "starting controller");
            let daemon = Daemon::new(config)?;
            daemon.run(port).await?;
        }
        Command::Agent { config } => {
            let agent_config = AgentConfig::load(&config)?;
            let registry = default_registry(&config, &agent_config);

            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("received interrupt, shutting down gracefully");
                        shutdown.store(true, Ordering::Relaxed);
                    }
                });
            }

            let mut agent =
                NodeAgent::new(agent_config, registry, Box::new(NullMetrics), shutdown)?;
            agent.run().await?;
        }
        Command::InitConfig {
            node_id,
            controller,
            output,
        } => {
            AgentConfig::write_template(&output, &node_id, &controller)?;
            println!("configuration file created: {}", output.display());
        }
        Command::CreateUser {
            username,
            email,
            password,
            role,
        } => {
            let role = Role::parse(&role)
                .ok_or_else(|| anyhow::anyhow!("unknown role: {role} (admin|operator|observer)"))?;
            let daemon = Daemon::new(ControllerConfig::from_env())?;
            let user = daemon.create_user(&username, email.as_deref(), &password, role)?;
            println!("user created: {} ({})", user.username, user.role);
        }
    }
    Ok(())
}
