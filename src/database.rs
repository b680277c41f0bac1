use crate::document::Record;
use crate::embeddings::{Embedder, EMBEDDING_DIMENSION};
use anyhow::{Context, Result};
use log::{debug, info};
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct, UpsertPointsBuilder,
    Value as PayloadValue, VectorParams,
};
use qdrant_client::Qdrant;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::env;
use uuid::Uuid;

const DEFAULT_COLLECTION: &str = "solar_rag";

/// Proof that the caller really wants to wipe a store.
///
/// Only constructible by naming it, so a reset can never happen through a
/// defaulted or forwarded boolean.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmReset;

/// Persistent similarity-searchable storage for records
#[allow(async_fn_in_trait)]
pub trait VectorStore {
    /// Return up to `k` records nearest to `query`, best first, with their scores
    async fn similarity_search_with_score(&self, query: &str, k: usize)
        -> Result<Vec<(Record, f32)>>;

    /// Upsert records keyed by their id
    async fn add_records(&mut self, records: &[Record]) -> Result<()>;

    /// Delete everything the store has persisted
    async fn reset(&mut self, confirm: ConfirmReset) -> Result<()>;

    /// Number of records currently stored
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Configuration for Qdrant
#[derive(Clone, Debug)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

impl QdrantConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = env::var("QDRANT_URL").context("QDRANT_URL not set")?;
        let api_key = env::var("QDRANT_API_KEY").ok();
        let collection =
            env::var("QDRANT_COLLECTION").unwrap_or_else(|_| DEFAULT_COLLECTION.to_string());

        Ok(QdrantConfig {
            url,
            api_key,
            collection,
        })
    }
}

/// Vector store backed by a Qdrant collection
pub struct QdrantStore<E> {
    client: Qdrant,
    collection: String,
    embedder: E,
}

impl<E: Embedder> QdrantStore<E> {
    /// Create a new Qdrant store
    pub fn new(config: QdrantConfig, embedder: E) -> Result<Self> {
        let config_builder = Qdrant::from_url(&config.url);
        let config_builder = if let Some(api_key) = config.api_key {
            config_builder.api_key(api_key)
        } else {
            config_builder
        };

        let client = config_builder
            .build()
            .context("Failed to initialize Qdrant client")?;

        Ok(QdrantStore {
            client,
            collection: config.collection,
            embedder,
        })
    }

    /// Check if the collection exists
    pub async fn collection_exists(&self) -> Result<bool> {
        match self.client.collection_info(&self.collection).await {
            Ok(_) => Ok(true),
            Err(qdrant_client::QdrantError::ResponseError { status })
                if status.code() == tonic::Code::NotFound =>
            {
                Ok(false)
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to check collection existence: {}",
                e
            )),
        }
    }

    async fn ensure_collection(&self) -> Result<()> {
        if self.collection_exists().await? {
            return Ok(());
        }

        info!("Creating collection {}", self.collection);
        let create_collection = CreateCollectionBuilder::new(self.collection.clone())
            .vectors_config(VectorParams {
                size: EMBEDDING_DIMENSION,
                distance: Distance::Cosine.into(),
                ..Default::default()
            });

        self.client
            .create_collection(create_collection)
            .await
            .with_context(|| format!("Failed to create collection {}", self.collection))?;

        Ok(())
    }
}

impl<E: Embedder> VectorStore for QdrantStore<E> {
    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Record, f32)>> {
        use qdrant_client::qdrant::{with_payload_selector, SearchPoints, WithPayloadSelector};

        if !self.collection_exists().await? {
            debug!("Collection {} does not exist yet", self.collection);
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;

        let search_request = SearchPoints {
            collection_name: self.collection.clone(),
            vector: query_embedding.values,
            limit: k as u64,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(with_payload_selector::SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };

        let search_response = self
            .client
            .search_points(search_request)
            .await
            .with_context(|| format!("Failed to search collection {}", self.collection))?;

        // Convert search results back to records
        let results = search_response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                let record = record_from_payload(&scored_point.payload)?;
                Some((record, scored_point.score))
            })
            .collect();

        Ok(results)
    }

    async fn add_records(&mut self, records: &[Record]) -> Result<()> {
        self.ensure_collection().await?;

        let texts: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();
        let embeddings = self.embedder.embed_all(&texts).await?;

        let mut points = Vec::with_capacity(records.len());
        for (record, embedding) in records.iter().zip(embeddings) {
            let payload = record_payload(record)
                .with_context(|| format!("Failed to build payload for {}", record.id))?;

            points.push(PointStruct::new(
                point_id(&record.id),
                embedding.values,
                payload,
            ));
        }

        let upsert_request = UpsertPointsBuilder::new(self.collection.clone(), points).wait(true);

        self.client
            .upsert_points(upsert_request)
            .await
            .with_context(|| {
                format!("Failed to upsert points in collection {}", self.collection)
            })?;

        Ok(())
    }

    async fn reset(&mut self, _confirm: ConfirmReset) -> Result<()> {
        if !self.collection_exists().await? {
            return Ok(());
        }

        self.client
            .delete_collection(self.collection.clone())
            .await
            .with_context(|| format!("Failed to delete collection {}", self.collection))?;

        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        if !self.collection_exists().await? {
            return Ok(0);
        }

        let response = self
            .client
            .count(CountPointsBuilder::new(self.collection.clone()).exact(true))
            .await
            .with_context(|| format!("Failed to count points in {}", self.collection))?;

        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}

/// Qdrant only accepts integers and UUIDs as point ids, so record ids are mapped
/// onto name-based UUIDs. The mapping is deterministic, which keeps upserts of
/// the same record idempotent across runs.
fn point_id(record_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes()).to_string()
}

/// Payload stored next to each point: id, content and metadata serialized as a
/// JSON string
fn record_payload(record: &Record) -> Result<HashMap<String, PayloadValue>> {
    let mut payload = HashMap::new();
    payload.insert("id".to_string(), PayloadValue::from(record.id.clone()));
    payload.insert(
        "page_content".to_string(),
        PayloadValue::from(record.content.clone()),
    );
    payload.insert(
        "metadata".to_string(),
        PayloadValue::from(serde_json::to_string(&record.metadata)?),
    );
    Ok(payload)
}

/// Rebuild a record from a stored payload.
///
/// Points without content are skipped. A missing id reads as `"unknown"` and
/// missing or unparsable metadata as an empty map.
fn record_from_payload(payload: &HashMap<String, PayloadValue>) -> Option<Record> {
    let content = payload.get("page_content")?.as_str()?.to_string();
    let id = payload
        .get("id")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let metadata = payload
        .get("metadata")
        .and_then(|v| v.as_str())
        .and_then(|raw| serde_json::from_str::<Map<String, Value>>(raw.as_ref()).ok())
        .unwrap_or_default();

    Some(Record::new(id, content, metadata))
}
