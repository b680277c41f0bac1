use crate::database::VectorStore;
use crate::rag::{Generator, RagEngine};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// User id recorded when the caller does not give one
pub const DEFAULT_USER_ID: &str = "local";

/// A submitted question and, once answered, its answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryItem {
    /// Random id handed back on submission and used to look the item up later
    pub query_id: String,
    pub user_id: String,
    pub create_time: DateTime<Utc>,
    pub query_text: String,
    /// Generated answer, `None` until the query completes
    pub answer_text: Option<String>,
    /// Ids of the records the answer was based on
    #[serde(default)]
    pub sources: Vec<String>,
    pub is_complete: bool,
}

impl QueryItem {
    /// Create a pending item with a fresh id
    pub fn new(query_text: impl Into<String>, user_id: impl Into<String>) -> Self {
        QueryItem {
            query_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            create_time: Utc::now(),
            query_text: query_text.into(),
            answer_text: None,
            sources: Vec::new(),
            is_complete: false,
        }
    }
}

/// Directory of query items, one JSON file per item named after its id
pub struct QueryItemStore {
    path: PathBuf,
}

impl QueryItemStore {
    /// Open the item directory, creating it if needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create query directory: {}", path.display()))?;
        Ok(QueryItemStore { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn item_file(&self, query_id: &str) -> Result<PathBuf> {
        // Ids are UUIDs, which also keeps them from escaping the directory
        let id = Uuid::parse_str(query_id)
            .with_context(|| format!("Invalid query id: {}", query_id))?;
        Ok(self.path.join(format!("{}.json", id)))
    }

    /// Write an item, replacing any earlier version with the same id
    pub fn put(&self, item: &QueryItem) -> Result<()> {
        let file = self.item_file(&item.query_id)?;
        let raw = serde_json::to_string_pretty(item)?;
        fs::write(&file, raw)
            .with_context(|| format!("Failed to write query item: {}", file.display()))?;
        Ok(())
    }

    /// Read an item back, `None` when no item has that id
    pub fn get(&self, query_id: &str) -> Result<Option<QueryItem>> {
        let file = self.item_file(query_id)?;
        if !file.is_file() {
            return Ok(None);
        }

        let raw = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read query item: {}", file.display()))?;
        let item = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse query item: {}", file.display()))?;
        Ok(Some(item))
    }
}

/// Record a question, answer it and record the answer.
///
/// The pending item is written before the engine runs, so a failed query
/// leaves an incomplete item behind that can still be looked up.
pub async fn submit_query<S: VectorStore, G: Generator>(
    engine: &RagEngine<S, G>,
    items: &QueryItemStore,
    query_text: &str,
    user_id: &str,
) -> Result<QueryItem> {
    let mut item = QueryItem::new(query_text, user_id);
    items.put(&item)?;
    info!("Submitted query {} for user {}", item.query_id, item.user_id);

    let response = match engine.query(query_text).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Query {} did not complete", item.query_id);
            return Err(e);
        }
    };

    item.answer_text = Some(response.response_text);
    item.sources = response.sources;
    item.is_complete = true;
    items.put(&item)?;

    Ok(item)
}
