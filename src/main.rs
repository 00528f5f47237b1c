mod logging;
mod server;
mod tui;

use std::sync::Arc;

use adsight_rag::{Config, FeedbackStore, IndexReport, Rag};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "adsight",
    about = "Ask questions about a client's marketing platform data"
)]
struct Cli {
    /// Client whose data and index to use (overrides RAG_CLIENT).
    #[arg(long, global = true)]
    client: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat in the terminal (default).
    Chat,
    /// Rebuild the client's index from its data directory.
    Index,
    /// Serve the query, feedback and index endpoints over HTTP.
    Serve {
        /// Address to bind the HTTP server to (host:port).
        #[arg(long, env = "ADSIGHT_BIND", default_value = "127.0.0.1:8080")]
        bind: String,
    },
    /// Print rating counts from the feedback log.
    FeedbackStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::from_env().context("failed to read configuration")?;
    if let Some(client) = cli.client {
        cfg.client = client;
    }
    let command = cli.command.unwrap_or(Command::Chat);
    logging::init(&cfg.log_dir, !matches!(command, Command::Chat));

    match command {
        Command::Chat => {
            let rag = open_rag(cfg).await?;
            let identity = format!(
                "user_{}",
                std::env::var("USER").unwrap_or_else(|_| "local".to_string())
            );
            tui::run(rag, identity).await.context("terminal UI failed")?;
        }
        Command::Index => {
            let rag = open_rag(cfg).await?;
            let report = tokio::task::spawn_blocking(move || rag.index_corpus())
                .await
                .context("index task panicked")??;
            match &report {
                IndexReport::Indexed { generation, chunks, skipped } => {
                    println!("Indexed {} chunks into {} ({} rows skipped).", chunks, generation, skipped)
                }
                IndexReport::Empty { message, .. } => println!("{}", message),
            }
        }
        Command::Serve { bind } => {
            let rag = open_rag(cfg).await?;
            server::serve(rag, &bind).await?;
        }
        Command::FeedbackStats => {
            let store = FeedbackStore::open(&cfg.feedback_path)
                .with_context(|| format!("failed to open {}", cfg.feedback_path.display()))?;
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
    }
    Ok(())
}

/// Builds the models off the async runtime; the startup model checks block.
async fn open_rag(cfg: Config) -> Result<Arc<Rag>> {
    let client = cfg.client.clone();
    let rag = tokio::task::spawn_blocking(move || Rag::from_config(cfg))
        .await
        .context("startup task panicked")?
        .with_context(|| format!("failed to start RAG for client '{}'", client))?;
    Ok(Arc::new(rag))
}
