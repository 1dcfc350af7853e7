use crate::models::PipelineStage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document download failed for {url}: status {status}")]
    Download { url: String, status: u16 },

    #[error("pdf extraction failed: {0}")]
    Extraction(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("{backend} quota exceeded: {details}")]
    QuotaExceeded { backend: String, details: String },

    #[error("{backend} has no usable credential")]
    MissingCredential { backend: String },

    #[error("{backend} model initialization failed: {details}")]
    ModelInit { backend: String, details: String },

    #[error("{backend} returned an error: {details}")]
    Backend { backend: String, details: String },

    #[error("no embedding backend is usable ({attempts})")]
    NoBackend { attempts: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EmbeddingError {
    pub fn is_quota(&self) -> bool {
        matches!(self, EmbeddingError::QuotaExceeded { .. })
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index unavailable: {0}")]
    Unavailable(String),

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexError {
    /// Connection failures and missing indexes are reported as unavailability.
    pub fn from_transport(backend: &str, error: reqwest::Error) -> Self {
        if error.is_connect() || error.is_timeout() {
            IndexError::Unavailable(format!("{backend}: {error}"))
        } else {
            IndexError::Http(error)
        }
    }
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("completion backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion backend returned no content")]
    EmptyResponse,

    #[error("completion backend has no credential configured")]
    MissingCredential,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum PipelineErrorKind {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Terminal `FAILED(stage, reason)` state of a pipeline run.
#[derive(Debug, Error)]
#[error("pipeline failed during {stage}: {kind}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub kind: PipelineErrorKind,
}

impl PipelineError {
    pub fn new(stage: PipelineStage, kind: impl Into<PipelineErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }

    pub fn invalid_request(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: PipelineErrorKind::InvalidRequest(message.into()),
        }
    }
}
