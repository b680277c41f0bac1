use crate::database::{ConfirmReset, VectorStore};
use crate::document::Record;
use crate::embeddings::{cosine_similarity, Embedder, Embedding};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File inside the store directory that holds every record and its vector
pub const RECORDS_FILE: &str = "records.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    record: Record,
    embedding: Embedding,
}

/// Vector store persisted as a single JSON file inside a directory.
///
/// The file is read once when the store is opened and rewritten after every
/// mutation; no handle is held between calls. Search is an exhaustive cosine
/// scan, which is adequate for the few thousand records a source folder yields.
pub struct LocalStore<E> {
    path: PathBuf,
    entries: BTreeMap<String, StoredRecord>,
    embedder: E,
}

impl<E: Embedder> LocalStore<E> {
    /// Open the store at `path`, loading previously persisted records if any
    pub fn open<P: AsRef<Path>>(path: P, embedder: E) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = path.join(RECORDS_FILE);

        let entries = if file.is_file() {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read store file: {}", file.display()))?;
            let stored: Vec<StoredRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt store file: {}", file.display()))?;
            stored
                .into_iter()
                .map(|entry| (entry.record.id.clone(), entry))
                .collect()
        } else {
            BTreeMap::new()
        };

        debug!("Opened store at {} with {} records", path.display(), entries.len());

        Ok(LocalStore {
            path,
            entries,
            embedder,
        })
    }

    /// Directory the store persists into
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        fs::create_dir_all(&self.path).with_context(|| {
            format!("Failed to create store directory: {}", self.path.display())
        })?;

        let file = self.path.join(RECORDS_FILE);
        let stored: Vec<&StoredRecord> = self.entries.values().collect();
        fs::write(&file, serde_json::to_string(&stored)?)
            .with_context(|| format!("Failed to write store file: {}", file.display()))?;

        Ok(())
    }
}

impl<E: Embedder> VectorStore for LocalStore<E> {
    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Record, f32)>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;

        let mut scored: Vec<(&StoredRecord, f32)> = self
            .entries
            .values()
            .map(|entry| {
                let score = cosine_similarity(&query_embedding.values, &entry.embedding.values);
                (entry, score)
            })
            .collect();

        // Highest similarity first, ties broken by id for a stable order
        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.0.record.id.cmp(&b.0.record.id))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(entry, score)| (entry.record.clone(), score))
            .collect())
    }

    async fn add_records(&mut self, records: &[Record]) -> Result<()> {
        let texts: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();
        let embeddings = self.embedder.embed_all(&texts).await?;

        for (record, embedding) in records.iter().zip(embeddings) {
            self.entries.insert(
                record.id.clone(),
                StoredRecord {
                    record: record.clone(),
                    embedding,
                },
            );
        }

        self.persist()
    }

    async fn reset(&mut self, _confirm: ConfirmReset) -> Result<()> {
        self.entries.clear();

        let file = self.path.join(RECORDS_FILE);
        if file.exists() {
            fs::remove_file(&file)
                .with_context(|| format!("Failed to remove store file: {}", file.display()))?;
        }

        // Only the store's own file is deleted; anything else in the directory stays
        if self.path.is_dir() {
            match fs::remove_dir(&self.path) {
                Ok(()) => info!("Removed store directory {}", self.path.display()),
                Err(e) => warn!("Store directory {} not removed: {}", self.path.display(), e),
            }
        }

        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}
