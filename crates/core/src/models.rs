use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Bounded span of document text used as a retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub index: usize,
    pub source_document: String,
}

/// A downloaded or loaded document before extraction.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub document_id: String,
    pub filename: String,
    pub source: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub text: String,
    pub text_preview: String,
    pub filename: String,
    pub user_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub upload_timestamp: DateTime<Utc>,
}

impl RecordMetadata {
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub content: String,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

/// Equality constraints on record metadata, e.g. `user_id` or `chunk_index`.
/// Values are compared with their JSON type, so `3` and `"3"` differ.
pub type MetadataFilter = BTreeMap<String, Value>;

/// Question/answer pair returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub documents: String,
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestedDocument {
    pub document_id: String,
    pub filename: String,
    pub namespace: String,
    pub num_chunks: usize,
    pub upserted: usize,
    pub extracted_preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub document: IngestedDocument,
    pub answers: Vec<AnswerRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Downloading,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Answering,
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::Downloading => "downloading",
            PipelineStage::Extracting => "extracting",
            PipelineStage::Chunking => "chunking",
            PipelineStage::Embedding => "embedding",
            PipelineStage::Indexing => "indexing",
            PipelineStage::Answering => "answering",
            PipelineStage::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub threshold: f32,
    pub fallback_top_n: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.1,
            fallback_top_n: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesisOptions {
    pub max_context_chunks: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            max_context_chunks: 3,
            max_tokens: 500,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunking: crate::chunking::ChunkingConfig,
    pub retrieval: RetrievalOptions,
    pub synthesis: SynthesisOptions,
    pub max_questions: usize,
    pub question_timeout: Duration,
    pub namespace_prefix: String,
    pub user_id: String,
    pub preview_chars: usize,
    pub source_preview_chars: usize,
    pub max_sources: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunking: crate::chunking::ChunkingConfig::default(),
            retrieval: RetrievalOptions::default(),
            synthesis: SynthesisOptions::default(),
            max_questions: 20,
            question_timeout: Duration::from_secs(90),
            namespace_prefix: "policy-qa".to_string(),
            user_id: "anonymous".to_string(),
            preview_chars: 500,
            source_preview_chars: 100,
            max_sources: 2,
        }
    }
}

/// Takes the first `max_chars` characters without splitting a code point.
pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Empty keys and template placeholders such as `your-openai-api-key-here`
/// count as no credential.
pub fn usable_credential(api_key: Option<String>) -> Option<String> {
    api_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty() && !key.starts_with("your-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_prefix_respects_multibyte_boundaries() {
        assert_eq!(char_prefix("₹50,000 cover", 3), "₹50");
        assert_eq!(char_prefix("short", 10), "short");
    }

    #[test]
    fn placeholder_keys_are_not_credentials() {
        assert_eq!(usable_credential(None), None);
        assert_eq!(usable_credential(Some("  ".to_string())), None);
        assert_eq!(usable_credential(Some("your-openai-api-key-here".to_string())), None);
        assert_eq!(
            usable_credential(Some(" sk-live ".to_string())),
            Some("sk-live".to_string())
        );
    }

    #[test]
    fn record_metadata_flattens_into_map() {
        let metadata = RecordMetadata {
            text: "Full chunk".to_string(),
            text_preview: "Full".to_string(),
            filename: "policy.pdf".to_string(),
            user_id: "user-1".to_string(),
            chunk_index: 2,
            total_chunks: 7,
            upload_timestamp: Utc::now(),
        };

        let map = metadata.to_map();
        assert_eq!(map.get("filename").and_then(Value::as_str), Some("policy.pdf"));
        assert_eq!(map.get("chunk_index").and_then(Value::as_u64), Some(2));
        assert!(map.contains_key("upload_timestamp"));
    }

    #[test]
    fn stages_render_as_snake_case() {
        assert_eq!(PipelineStage::Extracting.to_string(), "extracting");
        assert_eq!(
            serde_json::to_value(PipelineStage::Indexing).ok(),
            Some(Value::String("indexing".to_string()))
        );
    }
}
