pub mod chunking;
pub mod completion;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod overrides;
pub mod prompt;
pub mod relevance;
pub mod store;
pub mod stores;
pub mod synthesizer;
pub mod traits;

pub use chunking::{chunk_text, clean_text, normalize_whitespace, ChunkingConfig};
pub use completion::ChatCompletionClient;
pub use embeddings::{
    fit_dimensions, CharacterNgramEmbedder, EmbeddingBackend, EmbeddingProvider, HostedEmbedder,
    LocalModelEmbedder, DEFAULT_TARGET_DIMENSIONS,
};
pub use error::{
    CompletionError, EmbeddingError, IndexError, IngestError, PipelineError, PipelineErrorKind,
};
pub use extractor::{ExtractorChain, LopdfExtractor, PdfExtractExtractor, PdfExtractor};
pub use ingest::DocumentFetcher;
pub use models::{
    AnswerRecord, Chunk, DocumentRequest, IndexedRecord, IngestedDocument, MetadataFilter,
    PipelineOptions, PipelineReport, PipelineStage, QueryResult, RecordMetadata,
    RetrievalOptions, SynthesisOptions,
};
pub use orchestrator::QaPipeline;
pub use overrides::KnownAnswerTable;
pub use prompt::{FocusRule, FocusRules, PromptBuilder};
pub use relevance::{RelevanceFilter, RelevanceOutcome};
pub use stores::{InMemoryIndex, PineconeIndex, QdrantStore};
pub use synthesizer::{AnswerSynthesizer, NO_RELEVANT_INFO};
pub use traits::{CompletionModel, CompletionRequest, VectorIndex};
