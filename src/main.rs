//! # kb-relay CLI (`kbr`)
//!
//! The `kbr` binary runs the webhook server, triggers sync passes, answers
//! one-off questions, and converts local PDFs into processed markdown.
//!
//! ## Usage
//!
//! ```bash
//! kbr --config ./config/kbr.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbr serve` | Start the webhook + admin HTTP server |
//! | `kbr sync` | Run one sync pass against the document store |
//! | `kbr ask "<question>"` | Answer a question through the full pipeline |
//! | `kbr status` | Show the sync status of a running server |
//! | `kbr process [pdf_dir] [output_dir]` | Convert local PDFs to processed markdown |
//! | `kbr chunk <file>` | Print the chunks a text file splits into |
//!
//! Secrets are read from the environment; a `.env` file in the working
//! directory is loaded first. Log verbosity follows `RUST_LOG`
//! (default `kb_relay=info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kb_relay::answer::Answerer;
use kb_relay::chunk::Chunker;
use kb_relay::completion::ChatCompletionClient;
use kb_relay::config::{self, Config};
use kb_relay::docstore::{create_store, DocumentStore};
use kb_relay::processor;
use kb_relay::server;
use kb_relay::state::SyncState;
use kb_relay::sync::{FileOutcome, SyncOrchestrator};

/// kb-relay CLI: incremental knowledge-base sync and keyword retrieval for
/// chat-completion bots.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. `process` and `chunk` fall back to built-in defaults when the file
/// is missing.
#[derive(Parser)]
#[command(
    name = "kbr",
    about = "kb-relay: incremental knowledge-base sync and keyword retrieval for chat bots",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbr.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Serves the webhook on `/`, the admin API under `/admin`, and `/health`.
    Serve,

    /// Run one sync pass and print the per-document outcomes.
    ///
    /// State lives in memory, so a standalone pass classifies every source
    /// document as new.
    Sync,

    /// Answer a question through retrieval, prompt assembly and completion.
    Ask {
        /// The question text.
        question: String,

        /// Print the assembled prompt instead of calling the model.
        #[arg(long)]
        prompt_only: bool,
    },

    /// Show the sync status reported by a running server.
    Status {
        /// Server base URL. Defaults to `http://<server.bind>`.
        #[arg(long)]
        url: Option<String>,
    },

    /// Convert local PDFs into processed markdown.
    Process {
        /// Directory holding the PDFs. Defaults to `[processor].pdf_dir`.
        pdf_dir: Option<PathBuf>,

        /// Output directory. Defaults to `[processor].output_dir`.
        output_dir: Option<PathBuf>,
    },

    /// Split a text file into chunks and print them.
    Chunk {
        /// File to read.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kb_relay=info")),
        )
        .init();

    let cli = Cli::parse();

    // Commands that work without a config file
    match &cli.command {
        Commands::Process {
            pdf_dir,
            output_dir,
        } => {
            let cfg = config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal());
            let pdf_dir = pdf_dir.clone().unwrap_or(cfg.processor.pdf_dir.clone());
            let output_dir = output_dir.clone().unwrap_or(cfg.processor.output_dir.clone());
            let chunker = Chunker::from_config(&cfg.chunking);

            let report = processor::process_all(&pdf_dir, &output_dir, &chunker)?;
            println!("processed {} files", report.total_files);
            for f in &report.files {
                println!("  {} → {} ({} chunks)", f.file_name, f.output_path, f.chunks);
            }
            println!(
                "  total: {} chunks, {} characters",
                report.total_chunks, report.total_chars
            );
            return Ok(());
        }
        Commands::Chunk { file } => {
            let cfg = config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal());
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let chunks = Chunker::from_config(&cfg.chunking)
                .chunk_document(&file.display().to_string(), &text);
            for c in &chunks {
                println!("--- chunk {} ({} chars) ---", c.sequence_index, c.char_length);
                println!("{}", c.text);
            }
            println!("{} chunks", chunks.len());
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Sync => {
            let store: Arc<dyn DocumentStore> = Arc::from(create_store(&cfg.store)?);
            let state = Arc::new(SyncState::in_memory(cfg.sync.log_capacity));
            let sync = SyncOrchestrator::new(state, store, &cfg)?;

            let report = sync.run_sync().await?;
            if let Some(err) = &report.error {
                anyhow::bail!("sync failed: {}", err);
            }
            println!("sync {}", cfg.store.source_folder);
            for f in &report.files {
                match f {
                    FileOutcome::Processed { name, chunk_count } => {
                        println!("  processed         {} ({} chunks)", name, chunk_count)
                    }
                    FileOutcome::NeedsProcessing { name } => {
                        println!("  needs processing  {}", name)
                    }
                    FileOutcome::Failed { name, reason } => {
                        println!("  failed            {}: {}", name, reason)
                    }
                }
            }
            println!(
                "  handled: {}/{}, deleted: {}",
                report.processed, report.total, report.deleted
            );
        }
        Commands::Ask {
            question,
            prompt_only,
        } => {
            let store: Arc<dyn DocumentStore> = Arc::from(create_store(&cfg.store)?);
            let completion = Arc::new(ChatCompletionClient::new(&cfg.completion)?);
            let answerer = Answerer::new(&cfg, store, completion)?;

            if prompt_only {
                println!("{}", answerer.prepare_prompt(&question).await);
            } else {
                println!("{}", answerer.answer_question(&question).await);
            }
        }
        Commands::Status { url } => {
            let base = url.unwrap_or_else(|| format!("http://{}", cfg.server.bind));
            let endpoint = format!("{}/admin/status", base.trim_end_matches('/'));
            let status: serde_json::Value = reqwest::get(&endpoint)
                .await
                .with_context(|| format!("Failed to reach {}", endpoint))?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        // Handled above without a config file.
        Commands::Process { .. } | Commands::Chunk { .. } => {}
    }

    Ok(())
}
