use crate::error::IndexError;
use crate::models::{IndexedRecord, MetadataFilter, QueryResult};
use crate::store::{
    ensure_dimensions, ensure_record_dimensions, result_from_metadata, sort_by_score,
    UpsertReport, UPSERT_BATCH_SIZE,
};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const NAMESPACE_FIELD: &str = "namespace";
const RECORD_ID_FIELD: &str = "record_id";

/// Qdrant over REST. One collection holds every namespace; the namespace is a
/// payload field that every search is constrained to.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::builder().timeout(timeout).build()?,
            vector_size,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Creates the collection with cosine distance when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|error| IndexError::from_transport(BACKEND, error))?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        info!(collection = %self.collection, vector_size = self.vector_size, "creating qdrant collection");
        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await
            .map_err(|error| IndexError::from_transport(BACKEND, error))?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }

    async fn upsert_batch(&self, namespace: &str, batch: &[IndexedRecord]) -> Result<(), IndexError> {
        let points: Vec<Value> = batch
            .iter()
            .map(|record| {
                let mut payload = record.metadata.to_map();
                payload.insert(NAMESPACE_FIELD.to_string(), json!(namespace));
                payload.insert(RECORD_ID_FIELD.to_string(), json!(record.id));
                json!({
                    "id": point_id(&record.id),
                    "vector": record.vector,
                    "payload": payload,
                })
            })
            .collect();

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|error| IndexError::from_transport(BACKEND, error))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::Unavailable(format!(
                "{BACKEND}: collection {} not found",
                self.collection
            )));
        }
        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(())
    }
}

/// Qdrant only accepts integer or UUID point ids.
fn point_id(record_id: &str) -> String {
    let digest = Sha256::digest(record_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

fn search_filter(namespace: &str, filter: Option<&MetadataFilter>) -> Value {
    let mut must = vec![json!({ "key": NAMESPACE_FIELD, "match": { "value": namespace } })];
    if let Some(filter) = filter {
        must.extend(
            filter
                .iter()
                .map(|(key, value)| json!({ "key": key, "match": { "value": value } })),
        );
    }
    json!({ "must": must })
}

fn parse_hits(parsed: &Value) -> Vec<QueryResult> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.into_iter()
        .map(|hit| {
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let mut payload = match hit.get("payload") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            };
            payload.remove(NAMESPACE_FIELD);
            let id = match payload.remove(RECORD_ID_FIELD) {
                Some(Value::String(id)) => id,
                _ => hit
                    .get("id")
                    .map(|id| id.to_string().trim_matches('"').to_string())
                    .unwrap_or_default(),
            };
            result_from_metadata(id, score, payload)
        })
        .collect()
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn name(&self) -> &str {
        BACKEND
    }

    fn dimensions(&self) -> usize {
        self.vector_size
    }

    async fn upsert(
        &self,
        namespace: &str,
        records: &[IndexedRecord],
    ) -> Result<UpsertReport, IndexError> {
        ensure_record_dimensions(self.vector_size, records)?;

        let mut report = UpsertReport::default();
        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let outcome = self.upsert_batch(namespace, batch).await;
            if let Err(IndexError::Unavailable(reason)) = outcome {
                return Err(IndexError::Unavailable(reason));
            }
            report.record_batch(BACKEND, namespace, batch.len(), outcome);
        }
        report.finish(BACKEND)
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>, IndexError> {
        ensure_dimensions(self.vector_size, vector)?;

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
                "filter": search_filter(namespace, filter),
            }))
            .send()
            .await
            .map_err(|error| IndexError::from_transport(BACKEND, error))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::Unavailable(format!(
                "{BACKEND}: collection {} not found",
                self.collection
            )));
        }
        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let mut results = parse_hits(&parsed);
        sort_by_score(&mut results);
        Ok(results)
    }

    async fn ping(&self) -> Result<(), IndexError> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|error| IndexError::from_transport(BACKEND, error))?;

        if !response.status().is_success() {
            return Err(IndexError::Unavailable(format!(
                "{BACKEND}: collection {} returned {}",
                self.collection,
                response.status()
            )));
        }
        Ok(())
    }
}
