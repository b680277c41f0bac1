use crate::chunking::load_csv_records;
use crate::database::{ConfirmReset, VectorStore};
use crate::document::{load_artifact_records, Record};
use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashSet;
use std::path::Path;

/// Collect row-group records for every CSV file followed by artifact records
pub fn load_source_records<P: AsRef<Path>>(source_dir: P) -> Result<Vec<Record>> {
    let source_dir = source_dir.as_ref();

    let mut records = load_csv_records(source_dir)
        .with_context(|| format!("Failed to chunk CSV files in {}", source_dir.display()))?;
    records.extend(
        load_artifact_records(source_dir)
            .with_context(|| format!("Failed to load artifacts in {}", source_dir.display()))?,
    );

    Ok(records)
}

/// Keep the first record seen for each id, preserving order.
///
/// Only duplicates inside `records` are removed; ids already in the store are
/// left to the store's upsert.
pub fn dedup_records(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(records.len());
    let mut unique = Vec::with_capacity(records.len());

    for record in records {
        if seen.insert(record.id.clone()) {
            unique.push(record);
        } else {
            warn!("Dropping duplicate record id within batch: {}", record.id);
        }
    }

    unique
}

/// Deduplicate a batch and upsert it into the store in a single call.
///
/// Returns the number of records handed to the store. An empty batch leaves
/// the store untouched.
pub async fn add_to_store<S: VectorStore>(store: &mut S, records: Vec<Record>) -> Result<usize> {
    let unique = dedup_records(records);

    if unique.is_empty() {
        info!("No new documents to add");
        return Ok(0);
    }

    info!("Adding new documents: {}", unique.len());
    store
        .add_records(&unique)
        .await
        .context("Failed to add documents to the store")?;

    Ok(unique.len())
}

/// Wipe the store before ingestion
pub async fn clear_database<S: VectorStore>(store: &mut S, confirm: ConfirmReset) -> Result<()> {
    info!("Clearing database");
    store
        .reset(confirm)
        .await
        .context("Failed to clear the database")
}

/// Load every supported file in `source_dir` and upsert it into the store
pub async fn populate_database<S: VectorStore, P: AsRef<Path>>(
    store: &mut S,
    source_dir: P,
) -> Result<usize> {
    let source_dir = source_dir.as_ref();
    info!("Loading sources from {}", source_dir.display());

    let records = load_source_records(source_dir)?;
    add_to_store(store, records).await
}
