use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::path::Path;

use solar_rag::config::{AppConfig, StoreBackend};
use solar_rag::database::{ConfirmReset, QdrantStore, VectorStore};
use solar_rag::gemini::{GeminiClient, GeminiConfig};
use solar_rag::ingest::{clear_database, populate_database};
use solar_rag::local_store::LocalStore;
use solar_rag::query_store::{submit_query, QueryItemStore, DEFAULT_USER_ID};
use solar_rag::rag::{RagEngine, EXAMPLE_QUERY};

/// Question answering over solar time-series data using Gemini and a vector store
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load CSV, notebook and model files from the source directory into the store
    Ingest {
        /// Delete the stored records before loading
        #[arg(long)]
        reset: bool,
    },
    /// Ask a question about the ingested data
    Query {
        /// The question; a built-in example is asked when omitted
        question: Option<String>,
    },
    /// Ask a question and keep the answer under a query id for later lookup
    Submit {
        /// The question; a built-in example is asked when omitted
        question: Option<String>,
        /// User the query is recorded for
        #[arg(long, default_value = DEFAULT_USER_ID)]
        user_id: String,
    },
    /// Show a previously submitted query
    Show {
        /// Id printed by `submit`
        query_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    // Load configuration from environment
    let config = AppConfig::from_env().context("Invalid store configuration")?;

    // Looking up a stored query needs neither the model nor the vector store
    if let Command::Show { query_id } = &args.command {
        return show_query(&config.query_path, query_id);
    }

    let gemini_config = GeminiConfig::from_env().context("Missing GEMINI_API_KEY")?;
    let gemini = GeminiClient::new(gemini_config);

    match &config.backend {
        StoreBackend::Local(path) => {
            info!("Using local store at {}", path.display());
            let store = LocalStore::open(path, gemini.clone())
                .with_context(|| format!("Failed to open store at {}", path.display()))?;
            run(store, gemini, args.command, &config).await
        }
        StoreBackend::Qdrant(qdrant_config) => {
            info!("Using Qdrant collection {}", qdrant_config.collection);
            let store = QdrantStore::new(qdrant_config.clone(), gemini.clone())?;
            run(store, gemini, args.command, &config).await
        }
    }
}

async fn run<S: VectorStore>(
    mut store: S,
    gemini: GeminiClient,
    command: Command,
    config: &AppConfig,
) -> Result<()> {
    let source_path = config.source_path.as_path();

    match command {
        Command::Ingest { reset } => {
            // Validate the source directory before touching the store
            if !source_path.is_dir() {
                error!("Source directory not found: {}", source_path.display());
                return Err(anyhow::anyhow!("Source directory not found"));
            }

            if reset {
                clear_database(&mut store, ConfirmReset).await?;
            }

            populate_database(&mut store, source_path)
                .await
                .context("Failed to populate database")?;
            info!("Store holds {} records", store.len().await?);
        }
        Command::Query { question } => {
            let question = question.unwrap_or_else(|| EXAMPLE_QUERY.to_string());
            let engine = RagEngine::new(store, gemini);

            let response = engine
                .query(&question)
                .await
                .context("Failed to answer question")?;

            println!("\nResponse:\n{}", response.response_text);
            println!("Sources: {:?}", response.sources);
        }
        Command::Submit { question, user_id } => {
            let question = question.unwrap_or_else(|| EXAMPLE_QUERY.to_string());
            let items = QueryItemStore::open(&config.query_path)?;
            let engine = RagEngine::new(store, gemini);

            let item = submit_query(&engine, &items, &question, &user_id)
                .await
                .context("Failed to answer question")?;

            println!("Query id: {}", item.query_id);
            println!("\nResponse:\n{}", item.answer_text.unwrap_or_default());
            println!("Sources: {:?}", item.sources);
        }
        Command::Show { query_id } => show_query(&config.query_path, &query_id)?,
    }

    Ok(())
}

fn show_query(query_path: &Path, query_id: &str) -> Result<()> {
    let items = QueryItemStore::open(query_path)?;
    match items.get(query_id)? {
        Some(item) => {
            println!("{}", serde_json::to_string_pretty(&item)?);
            Ok(())
        }
        None => {
            error!("No query with id {}", query_id);
            Err(anyhow::anyhow!("Query not found"))
        }
    }
}
