mod commands;
mod skills;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "agentmesh")]
#[command(about = "Tool-server connector and agent orchestration daemon", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "agentmesh.json")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Run the orchestration daemon
    Run,

    /// List the tools exposed by configured tool servers
    Tools {
        /// Only query the named server
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Execute one agent with a manual trigger and print the record
    Agent {
        /// Agent id from the configuration
        agent_id: String,

        /// Input text handed to the agent
        #[arg(short, long)]
        input: Option<String>,

        /// JSON trigger payload
        #[arg(short, long)]
        payload: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { force } => {
            commands::init::run(&cli.config, force).await?;
        }
        Commands::Run => {
            commands::run_cmd::run(&cli.config).await?;
        }
        Commands::Tools { server } => {
            commands::tools_cmd::list(&cli.config, server).await?;
        }
        Commands::Agent {
            agent_id,
            input,
            payload,
        } => {
            commands::agent_cmd::run(&cli.config, &agent_id, input, payload).await?;
        }
    }

    Ok(())
}
