use crate::database::QdrantConfig;
use anyhow::Result;
use std::env;
use std::path::PathBuf;

const DEFAULT_SOURCE_PATH: &str = "data/source";
const DEFAULT_STORE_PATH: &str = "data/store";
const DEFAULT_QUERY_PATH: &str = "data/queries";

/// Where the vector store lives
pub enum StoreBackend {
    /// JSON-backed store inside a local directory
    Local(PathBuf),
    /// Remote Qdrant collection
    Qdrant(QdrantConfig),
}

/// Application-level configuration
pub struct AppConfig {
    /// Directory scanned for CSV, notebook and model files
    pub source_path: PathBuf,
    pub backend: StoreBackend,
    /// Directory holding submitted query items
    pub query_path: PathBuf,
}

impl AppConfig {
    /// Create a new configuration from environment variables.
    ///
    /// Qdrant is used when `QDRANT_URL` is set, otherwise the local store at
    /// `RAG_STORE_PATH`.
    pub fn from_env() -> Result<Self> {
        let source_path = env::var("RAG_SOURCE_PATH")
            .unwrap_or_else(|_| DEFAULT_SOURCE_PATH.to_string())
            .into();

        let backend = if env::var("QDRANT_URL").is_ok() {
            StoreBackend::Qdrant(QdrantConfig::from_env()?)
        } else {
            let store_path = env::var("RAG_STORE_PATH")
                .unwrap_or_else(|_| DEFAULT_STORE_PATH.to_string());
            StoreBackend::Local(store_path.into())
        };

        let query_path = env::var("RAG_QUERY_PATH")
            .unwrap_or_else(|_| DEFAULT_QUERY_PATH.to_string())
            .into();

        Ok(AppConfig {
            source_path,
            backend,
            query_path,
        })
    }
}
