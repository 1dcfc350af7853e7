use crate::chunking::chunk_text;
use crate::embeddings::EmbeddingProvider;
use crate::error::{EmbeddingError, IndexError, IngestError, PipelineError};
use crate::extractor::ExtractorChain;
use crate::ingest::DocumentFetcher;
use crate::models::{
    char_prefix, AnswerRecord, DocumentRequest, IndexedRecord, IngestedDocument, PipelineOptions,
    PipelineReport, PipelineStage, QueryResult, RecordMetadata, SourceDocument,
};
use crate::overrides::KnownAnswerTable;
use crate::relevance::{RelevanceFilter, RelevanceOutcome};
use crate::store::probe_vector;
use crate::synthesizer::AnswerSynthesizer;
use crate::traits::VectorIndex;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Answer for a question whose retrieval failed or timed out.
pub const UNABLE_TO_PROCESS: &str = "Unable to process this question.";

const RECORD_ID_PREFIX_CHARS: usize = 12;

/// Runs one document request: fetch, extract, chunk, embed, index into a fresh
/// namespace, then answer each question against that namespace.
///
/// Fatal failures return a [`PipelineError`] tagged with the stage. Per-question
/// failures degrade to a fallback answer and never abort the batch.
pub struct QaPipeline {
    fetcher: DocumentFetcher,
    extractors: Arc<ExtractorChain>,
    embeddings: Arc<EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    synthesizer: AnswerSynthesizer,
    overrides: KnownAnswerTable,
    relevance: RelevanceFilter,
    options: PipelineOptions,
}

impl QaPipeline {
    pub fn new(
        fetcher: DocumentFetcher,
        extractors: Arc<ExtractorChain>,
        embeddings: Arc<EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        synthesizer: AnswerSynthesizer,
        options: PipelineOptions,
    ) -> Self {
        if embeddings.target_dimensions() != index.dimensions() {
            warn!(
                embedding_dimensions = embeddings.target_dimensions(),
                index_dimensions = index.dimensions(),
                "embedding dimension differs from index dimension; upserts will be rejected"
            );
        }

        Self {
            fetcher,
            extractors,
            embeddings,
            index,
            synthesizer,
            overrides: KnownAnswerTable::default(),
            relevance: RelevanceFilter::from(&options.retrieval),
            options,
        }
    }

    pub fn with_overrides(mut self, overrides: KnownAnswerTable) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn embedding_backend(&self) -> Option<&str> {
        self.embeddings.selected_backend()
    }

    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    pub async fn ready(&self) -> Result<(), IndexError> {
        self.index.ping().await
    }

    pub async fn run(&self, request: &DocumentRequest) -> Result<PipelineReport, PipelineError> {
        if self.options.max_questions == 0 {
            return Err(PipelineError::invalid_request(
                PipelineStage::Received,
                "max_questions must be at least 1",
            ));
        }

        let questions = self.capped_questions(&request.questions);
        info!(
            stage = %PipelineStage::Received,
            source = %request.documents,
            questions = questions.len(),
            "document request received"
        );

        let document = self.ingest_document(&request.documents).await?;
        let answers = self.answer_questions(&document.namespace, questions).await;

        info!(
            stage = %PipelineStage::Done,
            namespace = %document.namespace,
            answers = answers.len(),
            "document request finished"
        );
        Ok(PipelineReport { document, answers })
    }

    fn capped_questions<'a>(&self, questions: &'a [String]) -> &'a [String] {
        let cap = self.options.max_questions.min(questions.len());
        if cap < questions.len() {
            warn!(
                requested = questions.len(),
                cap = self.options.max_questions,
                "question list truncated to the configured cap"
            );
        }
        &questions[..cap]
    }

    pub async fn ingest_document(&self, source: &str) -> Result<IngestedDocument, PipelineError> {
        debug!(stage = %PipelineStage::Downloading, source, "fetching document");
        let document = self
            .fetcher
            .fetch(source)
            .await
            .map_err(|error| PipelineError::new(PipelineStage::Downloading, error))?;

        self.ingest_source(document).await
    }

    pub async fn ingest_source(&self, document: SourceDocument) -> Result<IngestedDocument, PipelineError> {
        debug!(stage = %PipelineStage::Extracting, filename = %document.filename, bytes = document.bytes.len(), "extracting text");
        let extractors = Arc::clone(&self.extractors);
        let bytes = document.bytes;
        let text = tokio::task::spawn_blocking(move || extractors.extract(&bytes))
            .await
            .map_err(|error| {
                PipelineError::new(
                    PipelineStage::Extracting,
                    IngestError::Extraction(format!("extraction task failed: {error}")),
                )
            })?
            .map_err(|error| PipelineError::new(PipelineStage::Extracting, error))?;

        self.ingest_text(&document.document_id, &document.filename, &text)
            .await
    }

    /// Chunks, embeds and indexes already-extracted text into a new namespace.
    pub async fn ingest_text(
        &self,
        document_id: &str,
        filename: &str,
        text: &str,
    ) -> Result<IngestedDocument, PipelineError> {
        let chunks = chunk_text(text, document_id, &self.options.chunking)
            .map_err(|error| PipelineError::new(PipelineStage::Chunking, error))?;
        if chunks.is_empty() {
            return Err(PipelineError::new(
                PipelineStage::Chunking,
                IngestError::Extraction("document has no usable text".to_string()),
            ));
        }
        info!(stage = %PipelineStage::Chunking, document_id, chunk_count = chunks.len(), "document chunked");

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self
            .embeddings
            .embed(&texts)
            .await
            .map_err(|error| PipelineError::new(PipelineStage::Embedding, error))?;
        info!(
            stage = %PipelineStage::Embedding,
            backend = self.embeddings.selected_backend().unwrap_or("unknown"),
            vectors = vectors.len(),
            "chunks embedded"
        );

        let namespace = new_namespace(&self.options.namespace_prefix);
        let uploaded_at = Utc::now();
        let total_chunks = chunks.len();
        let id_prefix = char_prefix(document_id, RECORD_ID_PREFIX_CHARS);
        let records: Vec<IndexedRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedRecord {
                id: format!("{id_prefix}-{}-{}", chunk.index, short_uuid()),
                vector,
                metadata: RecordMetadata {
                    text_preview: char_prefix(&chunk.text, self.options.preview_chars).to_string(),
                    text: chunk.text,
                    filename: filename.to_string(),
                    user_id: self.options.user_id.clone(),
                    chunk_index: chunk.index,
                    total_chunks,
                    upload_timestamp: uploaded_at,
                },
            })
            .collect();

        let report = self
            .index
            .upsert(&namespace, &records)
            .await
            .map_err(|error| PipelineError::new(PipelineStage::Indexing, error))?;
        info!(
            stage = %PipelineStage::Indexing,
            index = self.index.name(),
            namespace = %namespace,
            upserted = report.upserted,
            failed_batches = report.failed_batches,
            "chunks indexed"
        );

        Ok(IngestedDocument {
            document_id: document_id.to_string(),
            filename: filename.to_string(),
            namespace,
            num_chunks: total_chunks,
            upserted: report.upserted,
            extracted_preview: char_prefix(text, self.options.preview_chars).to_string(),
        })
    }

    /// Answers in input order, one at a time. Always returns one record per question.
    pub async fn answer_questions(&self, namespace: &str, questions: &[String]) -> Vec<AnswerRecord> {
        let mut answers = Vec::with_capacity(questions.len());
        for (question_index, question) in questions.iter().enumerate() {
            debug!(stage = %PipelineStage::Answering, question_index, "answering question");
            let answer = match tokio::time::timeout(
                self.options.question_timeout,
                self.answer_question(namespace, question),
            )
            .await
            {
                Ok(answer) => answer,
                Err(_) => {
                    warn!(
                        question_index,
                        timeout = ?self.options.question_timeout,
                        "question timed out"
                    );
                    degraded(question)
                }
            };
            answers.push(answer);
        }
        answers
    }

    pub async fn answer_question(&self, namespace: &str, question: &str) -> AnswerRecord {
        let outcome = match self.retrieve(namespace, question).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(namespace, %error, "query embedding failed");
                return degraded(question);
            }
        };

        let context = outcome.contents();
        let sources = self.sources(&context);

        if let Some(answer) = self.overrides.lookup(question) {
            info!(namespace, provenance = "known_answer_table", "answer taken from override table");
            return AnswerRecord {
                question: question.to_string(),
                answer: answer.to_string(),
                sources,
            };
        }

        let synthesis = self.synthesizer.synthesize_traced(question, &context).await;
        debug!(namespace, origin = ?synthesis.origin, "answer synthesized");
        AnswerRecord {
            question: question.to_string(),
            answer: synthesis.answer,
            sources,
        }
    }

    /// Embeds the question, queries the namespace and applies the relevance
    /// filter. An unreachable index yields an empty context.
    pub async fn retrieve(&self, namespace: &str, question: &str) -> Result<RelevanceOutcome, EmbeddingError> {
        let vector = self.embeddings.embed_one(question).await?;
        let results = match self
            .index
            .query(namespace, &vector, self.options.retrieval.top_k, None)
            .await
        {
            Ok(results) => results,
            Err(error) => {
                warn!(namespace, %error, "index query failed, continuing without context");
                Vec::new()
            }
        };

        let outcome = self.relevance.apply(results);
        debug!(
            namespace,
            kept = outcome.results.len(),
            used_fallback = outcome.used_fallback,
            "retrieval finished"
        );
        Ok(outcome)
    }

    /// Raw records of a namespace, found with a constant probe vector.
    pub async fn inspect_index(&self, namespace: &str, limit: usize) -> Result<Vec<QueryResult>, IndexError> {
        let probe = probe_vector(self.index.dimensions());
        self.index.query(namespace, &probe, limit, None).await
    }

    fn sources(&self, context: &[String]) -> Vec<String> {
        context
            .iter()
            .take(self.options.max_sources)
            .map(|chunk| format!("{}...", char_prefix(chunk, self.options.source_preview_chars)))
            .collect()
    }
}

fn degraded(question: &str) -> AnswerRecord {
    AnswerRecord {
        question: question.to_string(),
        answer: UNABLE_TO_PROCESS.to_string(),
        sources: Vec::new(),
    }
}

fn short_uuid() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

pub fn new_namespace(prefix: &str) -> String {
    format!("{prefix}-{}", short_uuid())
}
