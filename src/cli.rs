//! Command-line entry point for the `smart-recall` binary.
//!
//! JSON results go to stdout, logs to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::memory::core::config::{MemoryConfig, SearchParams};
use crate::memory::core::record::AddEvents;
use crate::memory::engine::MemoryEngine;
use crate::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(name = "smart-recall")]
#[command(about = "Hybrid keyword + vector memory search with recency decay and MMR diversity")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a ranked search
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Max results
        #[arg(long)]
        limit: Option<usize>,
        /// Weight of the vector score
        #[arg(long)]
        vector_weight: Option<f64>,
        /// Weight of the BM25 score
        #[arg(long)]
        text_weight: Option<f64>,
        /// Recency half-life in days
        #[arg(long = "half-life")]
        half_life_days: Option<f64>,
        /// Relevance/diversity tradeoff (1.0 = pure relevance)
        #[arg(long)]
        mmr_lambda: Option<f64>,
    },
    /// Rebuild the keyword index from the history log
    RebuildIndex,
    /// Index a single memory
    Index {
        /// Memory id
        #[arg(long)]
        id: String,
        /// Memory text
        #[arg(long)]
        memory: String,
    },
    /// Index the JSON result of a memory store add call
    IndexEvents {
        /// `{"results": [...]}` or a bare event list
        #[arg(long)]
        json: String,
    },
    /// List the latest stored memories
    List {
        /// Max memories
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Serve the HTTP API
    Serve {
        /// Listen port
        #[arg(long, default_value_t = server::DEFAULT_PORT)]
        port: u16,
    },
}

/// Parse arguments, run the requested command and report failures on stderr.
///
/// # Returns
/// `ExitCode::SUCCESS` on success, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match rt.block_on(dispatch(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MemoryConfig> {
    let config = match path {
        Some(path) => MemoryConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => MemoryConfig::default(),
    };
    let config = config.with_env_overrides();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn emit<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let engine = MemoryEngine::from_config(config)
        .await
        .context("Failed to open memory backends")?;

    match cli.command {
        Command::Search {
            query,
            limit,
            vector_weight,
            text_weight,
            half_life_days,
            mmr_lambda,
        } => {
            let defaults = engine.config().search.default_params();
            let params = SearchParams {
                limit: limit.unwrap_or(defaults.limit),
                vector_weight: vector_weight.unwrap_or(defaults.vector_weight),
                text_weight: text_weight.unwrap_or(defaults.text_weight),
                half_life_days: half_life_days.unwrap_or(defaults.half_life_days),
                mmr_lambda: mmr_lambda.unwrap_or(defaults.mmr_lambda),
            };
            let response = engine
                .search(&query, Some(params))
                .await
                .context("Search failed")?;
            emit(&response)
        }
        Command::RebuildIndex => {
            let report = engine
                .rebuild_index()
                .await
                .context("Keyword index rebuild failed")?;
            emit(&report)
        }
        Command::Index { id, memory } => {
            let indexed = engine.index_single(&id, &memory).await;
            emit(&serde_json::json!({ "indexed": usize::from(indexed) }))
        }
        Command::IndexEvents { json } => {
            let events: AddEvents =
                serde_json::from_str(&json).context("Failed to parse add events")?;
            let indexed = engine.index_add_events(&events.into_events()).await;
            emit(&serde_json::json!({ "indexed": indexed }))
        }
        Command::List { limit } => {
            let listing = engine
                .list_memories(limit)
                .await
                .context("Failed to list memories")?;
            emit(&listing)
        }
        Command::Serve { port } => {
            tracing::info!("Starting smart recall v{}", env!("CARGO_PKG_VERSION"));
            let state = AppState::new(engine);
            server::run_server_with_shutdown(state, port, shutdown_signal())
                .await
                .context("Server error")
        }
    }
}
