use crate::error::{CompletionError, IndexError};
use crate::models::{IndexedRecord, MetadataFilter, QueryResult};
use crate::store::UpsertReport;
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Dimension every stored and queried vector must have.
    fn dimensions(&self) -> usize;

    /// Best-effort batched upsert. Namespaces are created implicitly.
    async fn upsert(
        &self,
        namespace: &str,
        records: &[IndexedRecord],
    ) -> Result<UpsertReport, IndexError>;

    /// Nearest neighbours within `namespace`, ordered by descending score.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryResult>, IndexError>;

    async fn ping(&self) -> Result<(), IndexError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Models without a separate system role get the instruction folded into the user turn.
    fn supports_system_role(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}
