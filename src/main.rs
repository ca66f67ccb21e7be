//! # Factual CLI (`factual`)
//!
//! The `factual` binary runs the fact extraction service and provides
//! terminal equivalents of both endpoints.
//!
//! ## Usage
//!
//! ```bash
//! factual --config ./config/factual.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `factual init` | Create the Postgres tables |
//! | `factual serve` | Start the HTTP server |
//! | `factual parse --text T --context C` | One-off extraction from the terminal |
//! | `factual facts [--context C]` | List stored facts |
//!
//! Secrets come from the environment (a `.env` file is honored):
//! `OPENAI_API_KEY` for the completion API, and `DATABASE_URL` to override
//! `[db].url` from the config file.

mod completion;
mod config;
mod db;
mod extract;
mod hash;
mod migrate;
mod models;
mod server;
mod store;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::store::{FactStore, PgFactStore};

/// Factual — a fact extraction and caching service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/factual.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "factual",
    about = "Factual — a fact extraction and caching service",
    version,
    long_about = "Factual forwards submitted text to an LLM completion API to extract short \
    factual statements, caches results in Postgres keyed by a content hash, and serves \
    previously extracted facts over HTTP."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/factual.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the `prompts` and `facts` tables and their indexes.
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves
    /// `POST /parse`, `GET /facts`, and `GET /health`.
    Serve,

    /// Extract facts from a piece of text, from the terminal.
    ///
    /// Runs the same flow as `POST /parse`: cached results are returned
    /// without calling the completion API.
    Parse {
        /// The text to extract facts from (at most 2000 characters).
        #[arg(long)]
        text: String,

        /// The context the facts belong to (at most 256 characters).
        #[arg(long)]
        context: String,
    },

    /// List stored facts.
    Facts {
        /// Only show facts extracted under this context.
        #[arg(long)]
        context: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Parse { text, context } => {
            let client = completion::create_client(&cfg.completion)?;
            let pool = db::connect(&cfg).await?;
            let store = PgFactStore::new(pool);

            let facts =
                extract::extract_facts(client.as_ref(), &store, Some(&text), Some(&context))
                    .await
                    .map_err(|e| match e {
                        extract::ParseError::InvalidText => {
                            anyhow::anyhow!("Invalid text parameter")
                        }
                        extract::ParseError::InvalidContext => {
                            anyhow::anyhow!("Invalid context parameter")
                        }
                        extract::ParseError::Upstream(err) => err,
                    })?;

            for fact in &facts {
                println!("- {}", fact);
            }
            println!("{} facts", facts.len());
        }
        Commands::Facts { context } => {
            let pool = db::connect(&cfg).await?;
            let store = PgFactStore::new(pool);

            let facts = store.facts_by_context(context.as_deref()).await?;
            if facts.is_empty() {
                println!("No facts found.");
            } else {
                for fact in &facts {
                    println!("[{}] ({}) {}", fact.id, fact.context, fact.text);
                }
                println!("{} facts", facts.len());
            }
        }
    }

    Ok(())
}
