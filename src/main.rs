//! # lexrag CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lexrag init` | Create the SQLite database and run schema migrations |
//! | `lexrag index` | Chunk and embed the corpus into an index snapshot |
//! | `lexrag search "<query>"` | Run one hybrid search against the corpus |
//! | `lexrag serve` | Start the JSON HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! lexrag init --config ./config/lexrag.toml
//!
//! # Build the index and report corpus statistics
//! lexrag index --config ./config/lexrag.toml
//!
//! # Hybrid search from the CLI
//! lexrag search "right to life" --k 3 --alpha 0.6
//!
//! # Start the HTTP API
//! lexrag serve --config ./config/lexrag.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lexrag::config;
use lexrag::conversation::ConversationStore;
use lexrag::corpus;
use lexrag::db;
use lexrag::embedding;
use lexrag::llm::HttpChatClient;
use lexrag::migrate;
use lexrag::pipeline::RagPipeline;
use lexrag::retriever;
use lexrag::server;
use lexrag::snapshot::{build_snapshot, IndexHandle};

/// lexrag — retrieval-augmented legal question answering.
#[derive(Parser)]
#[command(
    name = "lexrag",
    about = "Retrieval-augmented question answering over a legal document corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lexrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the sessions, turns, and
    /// summaries tables. Idempotent.
    Init,

    /// Build the index from the corpus directory and print statistics.
    Index,

    /// Run one hybrid search against a freshly built index.
    Search {
        /// The search query string.
        query: String,

        /// Number of results to return.
        #[arg(long)]
        k: Option<usize>,

        /// Vector weight in score fusion, 0.0 (lexical only) to 1.0
        /// (vector only).
        #[arg(long)]
        alpha: Option<f64>,
    },

    /// Start the JSON HTTP API.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Index => {
            let provider = embedding::create_provider(&cfg.embedding)?;
            let documents = corpus::load_documents(&cfg.corpus.data_dir)?;
            let snapshot = build_snapshot(&cfg, &documents).await?;
            println!(
                "Indexed {} documents into {} chunks ({} dims, model '{}').",
                snapshot.document_count,
                snapshot.chunk_count(),
                provider.dims(),
                provider.model_name()
            );
        }
        Commands::Search { query, k, alpha } => {
            let documents = corpus::load_documents(&cfg.corpus.data_dir)?;
            let snapshot = build_snapshot(&cfg, &documents).await?;
            let k = k.unwrap_or(cfg.retrieval.k);
            let alpha = alpha.unwrap_or(cfg.retrieval.hybrid_alpha);
            let hits = retriever::search(
                &snapshot,
                &cfg.retrieval,
                &cfg.embedding,
                &query,
                k,
                alpha,
            )
            .await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                let excerpt: String = hit.text.chars().take(160).collect();
                println!("{}. [{:.4}] {}  {}", rank + 1, hit.score, hit.chunk_id, excerpt);
            }
        }
        Commands::Serve => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let store = ConversationStore::new(pool);
            let chat = Arc::new(HttpChatClient::new(&cfg.llm)?);
            let pipeline = Arc::new(RagPipeline::new(cfg, IndexHandle::new(), store, chat));
            server::run_server(pipeline).await?;
        }
    }

    Ok(())
}
