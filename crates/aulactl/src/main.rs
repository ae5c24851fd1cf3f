//! Aula Control - CLI client for the Aula assistant daemon.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Default daemon address
const DEFAULT_ADDR: &str = "http://127.0.0.1:7890";

#[derive(Parser)]
#[command(name = "aulactl")]
#[command(about = "Aula Assistant - classroom data Q&A", long_about = None)]
#[command(version)]
struct Cli {
    /// Daemon base URL
    #[arg(long, default_value = DEFAULT_ADDR)]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question
    Ask {
        /// The question to ask
        question: String,

        /// Continue an existing session
        #[arg(long)]
        session: Option<Uuid>,
    },

    /// Interactive chat session
    Chat,

    /// Show daemon and pipeline status
    Status,

    /// Force a schema snapshot refresh
    RefreshSchema,

    /// Run chunk ingestion
    Ingest,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ask { question, session } => commands::ask(&cli.addr, &question, session).await,
        Commands::Chat => commands::chat(&cli.addr).await,
        Commands::Status => commands::status(&cli.addr).await,
        Commands::RefreshSchema => commands::refresh_schema(&cli.addr).await,
        Commands::Ingest => commands::ingest(&cli.addr).await,
    }
}
