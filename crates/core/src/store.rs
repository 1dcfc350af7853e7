use crate::error::IndexError;
use crate::models::{IndexedRecord, MetadataFilter, QueryResult};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Records per upsert request. Keeps payloads under the hosted index's request limit.
pub const UPSERT_BATCH_SIZE: usize = 100;

/// Component value of the probe vector used for index snapshots.
pub const PROBE_COMPONENT: f32 = 0.1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub upserted: usize,
    pub failed_batches: usize,
}

impl UpsertReport {
    pub fn record_batch(&mut self, backend: &str, namespace: &str, size: usize, outcome: Result<(), IndexError>) {
        match outcome {
            Ok(()) => self.upserted += size,
            Err(error) => {
                warn!(backend, namespace, batch_size = size, %error, "upsert batch failed, continuing");
                self.failed_batches += 1;
            }
        }
    }

    /// Partial success is success. A run where every batch failed is not.
    pub fn finish(self, backend: &str) -> Result<Self, IndexError> {
        if self.upserted == 0 && self.failed_batches > 0 {
            return Err(IndexError::Unavailable(format!(
                "{backend}: all {} upsert batches failed",
                self.failed_batches
            )));
        }
        Ok(self)
    }
}

pub fn ensure_dimensions(expected: usize, vector: &[f32]) -> Result<(), IndexError> {
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

pub fn ensure_record_dimensions(expected: usize, records: &[IndexedRecord]) -> Result<(), IndexError> {
    records
        .iter()
        .try_for_each(|record| ensure_dimensions(expected, &record.vector))
}

pub fn probe_vector(dimensions: usize) -> Vec<f32> {
    vec![PROBE_COMPONENT; dimensions]
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

pub fn matches_filter(metadata: &Map<String, Value>, filter: Option<&MetadataFilter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// Builds a result from stored metadata. Content is the full chunk text, falling
/// back to the preview for records written without it.
pub fn result_from_metadata(id: String, score: f32, metadata: Map<String, Value>) -> QueryResult {
    let content = metadata
        .get("text")
        .or_else(|| metadata.get("text_preview"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    QueryResult {
        id,
        content,
        score,
        metadata,
    }
}

pub fn sort_by_score(results: &mut [QueryResult]) {
    results.sort_by(|left, right| right.score.total_cmp(&left.score));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let score = cosine_similarity(&[1.0, 2.0, 0.0], &[1.0, 2.0, 0.0]);
        assert!((score - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn filter_requires_every_pair() {
        let metadata = match json!({"user_id": "u1", "filename": "policy.pdf", "chunk_index": 3}) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let mut filter = MetadataFilter::new();
        assert!(matches_filter(&metadata, Some(&filter)));
        filter.insert("user_id".to_string(), json!("u1"));
        filter.insert("chunk_index".to_string(), json!(3));
        assert!(matches_filter(&metadata, Some(&filter)));

        let mut stringly = MetadataFilter::new();
        stringly.insert("chunk_index".to_string(), json!("3"));
        assert!(!matches_filter(&metadata, Some(&stringly)));

        filter.insert("filename".to_string(), json!("other.pdf"));
        assert!(!matches_filter(&metadata, Some(&filter)));
        assert!(matches_filter(&metadata, None));
    }

    #[test]
    fn report_fails_only_when_nothing_landed() {
        let mut partial = UpsertReport::default();
        partial.record_batch("test", "ns", 100, Ok(()));
        partial.record_batch("test", "ns", 20, Err(IndexError::Unavailable("boom".to_string())));
        let partial = partial.finish("test").expect("partial upsert succeeds");
        assert_eq!(partial.upserted, 100);
        assert_eq!(partial.failed_batches, 1);

        let mut failed = UpsertReport::default();
        failed.record_batch("test", "ns", 10, Err(IndexError::Unavailable("boom".to_string())));
        assert!(matches!(failed.finish("test"), Err(IndexError::Unavailable(_))));

        assert_eq!(UpsertReport::default().finish("test").ok(), Some(UpsertReport::default()));
    }

    #[test]
    fn content_prefers_full_text() {
        let metadata = match json!({"text": "full chunk", "text_preview": "full"}) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        assert_eq!(result_from_metadata("a".to_string(), 0.5, metadata).content, "full chunk");
    }
}
