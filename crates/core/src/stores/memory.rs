use crate::error::IndexError;
use crate::models::{IndexedRecord, MetadataFilter, QueryResult};
use crate::store::{
    cosine_similarity, ensure_dimensions, ensure_record_dimensions, matches_filter,
    result_from_metadata, sort_by_score, UpsertReport,
};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local index keyed by namespace. Used for offline runs and tests.
pub struct InMemoryIndex {
    dimensions: usize,
    namespaces: RwLock<HashMap<String, Vec<IndexedRecord>>>,
}

impl InMemoryIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub async fn namespace_len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .map(Vec::len)
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
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

        let mut namespaces = self.namespaces.write().await;
        let stored = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            match stored.iter_mut().find(|existing| existing.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }

        Ok(UpsertReport {
            upserted: records.len(),
            failed_batches: 0,
        })
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>, IndexError> {
        ensure_dimensions(self.dimensions, vector)?;

        let namespaces = self.namespaces.read().await;
        let Some(records) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<QueryResult> = records
            .iter()
            .map(|record| (record, record.metadata.to_map()))
            .filter(|(_, metadata)| matches_filter(metadata, filter))
            .map(|(record, metadata)| {
                result_from_metadata(
                    record.id.clone(),
                    cosine_similarity(vector, &record.vector),
                    metadata,
                )
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    async fn ping(&self) -> Result<(), IndexError> {
        Ok(())
    }
}
