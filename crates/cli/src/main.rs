//! sagebot CLI — the main entry point.
//!
//! Commands:
//! - `serve`   — Start the HTTP chat gateway
//! - `ask`     — Run one turn and stream the answer to stdout
//! - `init`    — Write a default config file
//! - `doctor`  — Print the resolved config and check the provider

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "sagebot",
    about = "sagebot — retrieval-augmented chat backend",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a single question and stream the answer
    Ask {
        /// The question
        message: String,

        /// The page the question is asked from
        #[arg(long)]
        page_url: Option<String>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Diagnose configuration and provider reachability
    Doctor,
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask { message, page_url } => commands::ask::run(message, page_url).await?,
        Commands::Init { force } => commands::init::run(force)?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
