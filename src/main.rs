//! textrl: language-model reinforcement learning on text environments.
//!
//! Subcommands:
//!
//! - `train`          -- Run the training loop on the chain environment
//! - `inspect-cache`  -- Summarise a completion cache file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use textrl::config::TextRlConfig;
use textrl::env::ChainEnv;
use textrl::logging::{run_metadata, JsonlLogger, RunLogger, TracingLogger};
use textrl::model::{ClientSettings, CompletionCache, CompletionClient, OpenAiCompletionService};
use textrl::training::Trainer;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Reinforcement learning with a language model as world model and policy.
#[derive(Parser)]
#[command(name = "textrl", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the training loop.
    Train {
        /// Run identifier; evaluation and latency records are only written when set.
        #[arg(long)]
        run_id: Option<String>,

        /// Append run records to this JSON lines file.
        #[arg(long)]
        log_path: Option<PathBuf>,

        /// Override the number of training steps.
        #[arg(long)]
        total_steps: Option<usize>,
    },

    /// Summarise a completion cache file.
    InspectCache {
        /// Path to the cache file.
        #[arg(default_value = "data/completions.jsonl")]
        path: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str::<TextRlConfig>(&text)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        }
        None => TextRlConfig::default(),
    };

    if config.model.api_key.is_empty() {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.model.api_key = key;
        }
    }

    match cli.command {
        Commands::Train {
            run_id,
            log_path,
            total_steps,
        } => {
            if let Some(run_id) = run_id {
                config.logging.run_id = Some(run_id);
            }
            if let Some(log_path) = log_path {
                config.logging.log_path = Some(log_path);
            }
            if let Some(total_steps) = total_steps {
                config.train.total_steps = total_steps;
            }
            cmd_train(config).await
        }
        Commands::InspectCache { path } => cmd_inspect_cache(&path),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_train(mut config: TextRlConfig) -> Result<()> {
    // Asking for a log file implies wanting records in it.
    if config.logging.log_path.is_some() && config.logging.run_id.is_none() {
        config.logging.run_id = Some(uuid::Uuid::new_v4().to_string());
    }
    let run_id = config.logging.run_id.clone();
    tracing::info!(run_id = ?run_id, "Starting training run");

    let logger: Arc<dyn RunLogger> = match &config.logging.log_path {
        Some(path) => {
            ensure_parent(path)?;
            Arc::new(JsonlLogger::open(path, run_id.clone())?)
        }
        None => Arc::new(TracingLogger::new(run_id.clone())),
    };
    if let Some(run_id) = &run_id {
        logger
            .log(&run_metadata(run_id))
            .context("Failed to log run metadata")?;
    }

    let cache = match &config.model.cache_path {
        Some(path) => {
            ensure_parent(path)?;
            CompletionCache::open(path)
                .with_context(|| format!("Failed to open completion cache {}", path.display()))?
        }
        None => CompletionCache::in_memory(),
    };
    tracing::info!(cached = cache.len(), "Loaded completion cache");

    let service = OpenAiCompletionService::new(&config.model.api_base, &config.model.api_key)?;
    let client = CompletionClient::new(service, cache, ClientSettings::from(&config.model))
        .with_logger(logger.clone());

    let env = ChainEnv::new(config.env.states, config.env.goal, config.env.seed)?;
    let mut trainer = Trainer::new(env, client, &config.train, logger)?;
    let summary = trainer.run().await?;

    tracing::info!(
        steps = summary.steps,
        episodes = summary.episodes,
        training_episodes = summary.training_episodes,
        evaluations = summary.evaluations.len(),
        mean_regret = ?summary.mean_regret(),
        buffer = summary.buffer_len,
        "Training run complete"
    );
    Ok(())
}

fn cmd_inspect_cache(path: &Path) -> Result<()> {
    let cache = CompletionCache::open(path)
        .with_context(|| format!("Failed to open completion cache {}", path.display()))?;

    println!("Completion cache: {}", path.display());
    println!("  Records: {}", cache.len());

    let with_logprobs = cache
        .records()
        .filter(|r| !r.top_logprobs.is_empty())
        .count();
    println!("  With log-probabilities: {with_logprobs}");

    let prompt_chars: usize = cache.records().map(|r| r.prompt.len()).sum();
    if !cache.is_empty() {
        println!("  Mean prompt length: {} chars", prompt_chars / cache.len());
    }
    println!();

    for record in cache.records().take(10) {
        let tail = record.prompt.lines().last().unwrap_or_default();
        println!("  ... {tail}");
        println!("    -> {}", record.completion.trim());
    }
    if cache.len() > 10 {
        println!("  ... and {} more", cache.len() - 10);
    }

    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}
