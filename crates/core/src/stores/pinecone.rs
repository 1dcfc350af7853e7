use crate::error::IndexError;
use crate::models::{IndexedRecord, MetadataFilter, QueryResult};
use crate::store::{
    ensure_dimensions, ensure_record_dimensions, result_from_metadata, sort_by_score,
    UpsertReport, UPSERT_BATCH_SIZE,
};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

const BACKEND: &str = "pinecone";
const API_VERSION: &str = "2024-07";

/// Pinecone data-plane client for a single serverless index host.
pub struct PineconeIndex {
    client: Client,
    host: Url,
    api_key: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    vectors: Vec<PineconeVector<'a>>,
    namespace: &'a str,
}

#[derive(Serialize)]
struct PineconeVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    vector: &'a [f32],
    top_k: usize,
    namespace: &'a str,
    include_metadata: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<Value>,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Deserialize)]
struct Match {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl PineconeIndex {
    pub fn new(
        host: &str,
        api_key: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, IndexError> {
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            Url::parse(host)?
        } else {
            Url::parse(&format!("https://{host}"))?
        };
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            host,
            api_key: api_key.into(),
            dimensions,
        })
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<Response, IndexError> {
        let response = self
            .client
            .post(self.host.join(path)?)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|error| IndexError::from_transport(BACKEND, error))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IndexError::Unavailable(format!(
                "{BACKEND}: index not found at {}",
                self.host
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {body}"),
            });
        }

        Ok(response)
    }

    async fn upsert_batch(&self, namespace: &str, batch: &[IndexedRecord]) -> Result<(), IndexError> {
        let body = UpsertBody {
            vectors: batch
                .iter()
                .map(|record| PineconeVector {
                    id: &record.id,
                    values: &record.vector,
                    metadata: record.metadata.to_map(),
                })
                .collect(),
            namespace,
        };
        self.post("vectors/upsert", &body).await.map(|_| ())
    }
}

fn filter_expression(filter: Option<&MetadataFilter>) -> Option<Value> {
    let filter = filter.filter(|filter| !filter.is_empty())?;
    let clauses: Map<String, Value> = filter
        .iter()
        .map(|(key, value)| (key.clone(), json!({ "$eq": value })))
        .collect();
    Some(Value::Object(clauses))
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        BACKEND
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(
        &self,
        namespace: &str,
        records: &[IndexedRecord],
    ) -> Result<UpsertReport, IndexError> {
        ensure_record_dimensions(self.dimensions, records)?;

        let mut report = UpsertReport::default();
        for batch in records.chunks(UPSERT_BATCH_SIZE) {
            let outcome = self.upsert_batch(namespace, batch).await;
            if let Err(IndexError::Unavailable(reason)) = outcome {
                return Err(IndexError::Unavailable(reason));
            }
            report.record_batch(BACKEND, namespace, batch.len(), outcome);
        }

        debug!(namespace, upserted = report.upserted, "pinecone upsert finished");
        report.finish(BACKEND)
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>, IndexError> {
        ensure_dimensions(self.dimensions, vector)?;

        let body = QueryBody {
            vector,
            top_k,
            namespace,
            include_metadata: true,
            filter: filter_expression(filter),
        };
        let parsed: QueryResponse = self.post("query", &body).await?.json().await?;

        let mut results: Vec<QueryResult> = parsed
            .matches
            .into_iter()
            .map(|hit| result_from_metadata(hit.id, hit.score, hit.metadata))
            .collect();
        sort_by_score(&mut results);
        Ok(results)
    }

    async fn ping(&self) -> Result<(), IndexError> {
        self.post("describe_index_stats", &json!({})).await.map(|_| ())
    }
}
