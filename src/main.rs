//! Command-line entry point for the RAG chat backend.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};
use rag_agent_lib::commands::knowledge::store_upload;
use rag_agent_lib::config::{load_dotenv, Settings};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rag-agent", version, about = "Retrieval-augmented chat backend")]
struct Cli {
    /// Read environment variables from this file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Overrides HOST
        #[arg(long)]
        host: Option<String>,
        /// Overrides PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Parse, embed and upload documents from disk
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Recreate the index before uploading
        #[arg(long)]
        overwrite: bool,
    },
    /// Validate the configuration and reach the vector store
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    load_dotenv(cli.env_file.as_deref());
    let mut settings = Settings::from_env().context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Serve { host: None, port: None }) {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            rag_agent_lib::run(settings).await?;
        }
        Command::Ingest { files, overwrite } => {
            let state = rag_agent_lib::build_state(settings)?;
            if overwrite {
                state.rag.store().recreate_index().await?;
                let cleared = state.db.clear_documents()?;
                info!("index recreated, {} document records cleared", cleared);
            }

            let mut failed = 0;
            for path in &files {
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .with_context(|| format!("{} has no file name", path.display()))?;
                let bytes = std::fs::read(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                match store_upload(&state, filename, &bytes, None).await {
                    Ok(report) => println!(
                        "{}: {} chunks, {} vectors (document {})",
                        report.filename, report.chunk_count, report.vectors_upserted, report.document_id
                    ),
                    Err(e) => {
                        warn!("{}: {}", path.display(), e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} files failed to ingest", failed, files.len());
            }
        }
        Command::Check => {
            for (key, value) in settings.masked() {
                println!("{key}={value}");
            }
            let state = rag_agent_lib::build_state(settings)?;
            match rag_agent_lib::check_store(state.rag.store().as_ref()).await? {
                Some(stats) => println!(
                    "index '{}': dimension {}, {} vectors",
                    stats.index_name, stats.dimension, stats.total_vector_count
                ),
                None => println!("index does not exist yet; it is created on first upload"),
            }
        }
    }
    Ok(())
}
