mod server;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use policy_qa_core::completion::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use policy_qa_core::{
    AnswerSynthesizer, CharacterNgramEmbedder, ChatCompletionClient, ChunkingConfig,
    DocumentFetcher, DocumentRequest, EmbeddingBackend, EmbeddingProvider, ExtractorChain,
    FocusRules, HostedEmbedder, InMemoryIndex, KnownAnswerTable, LocalModelEmbedder,
    PineconeIndex, PipelineOptions, QaPipeline, QdrantStore, RetrievalOptions, SynthesisOptions,
    VectorIndex,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const HOSTED_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(60);
const LOCAL_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(60);
const MODEL_PULL_TIMEOUT: Duration = Duration::from_secs(600);
const INDEX_TIMEOUT: Duration = Duration::from_secs(20);
const LLM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "policy-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Command {
    /// Answer questions about one document and print the answers as JSON.
    Run {
        /// Document URL, file:// URL or local path.
        #[arg(long)]
        document: String,
        /// Question to answer. Repeat for several questions.
        #[arg(long = "question", required = true)]
        questions: Vec<String>,
        /// Print namespace, chunk count and per-answer sources.
        #[arg(long, default_value_t = false)]
        detailed: bool,
    },
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "PORT", default_value = "8000")]
        port: u16,
        /// Static bearer token required on the POST routes when set.
        #[arg(long, env = "HACKRX_TOKEN")]
        token: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum IndexBackend {
    Pinecone,
    Qdrant,
    Memory,
}

#[derive(Args)]
struct Settings {
    /// Vector index backing the namespaces.
    #[arg(long, env = "INDEX_BACKEND", value_enum, default_value = "pinecone", global = true)]
    index_backend: IndexBackend,

    /// Dimension of the vector index; every embedding is fitted to it.
    #[arg(long, env = "INDEX_DIMENSIONS", default_value = "1024", global = true)]
    dimensions: usize,

    #[arg(long, env = "PINECONE_API_KEY", global = true, hide_env_values = true)]
    pinecone_api_key: Option<String>,

    /// Data-plane host of the Pinecone index.
    #[arg(long, env = "PINECONE_HOST", global = true)]
    pinecone_host: Option<String>,

    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333", global = true)]
    qdrant_url: String,

    #[arg(long, env = "QDRANT_COLLECTION", default_value = "policy-document", global = true)]
    qdrant_collection: String,

    #[arg(long, env = "OPENAI_API_KEY", global = true, hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1", global = true)]
    openai_base_url: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small", global = true)]
    embedding_model: String,

    /// Ollama-compatible server for the self-hosted embedding fallback.
    #[arg(long, env = "LOCAL_EMBEDDING_URL", default_value = "http://localhost:11434", global = true)]
    local_embedding_url: String,

    #[arg(long, env = "LOCAL_EMBEDDING_MODEL", default_value = "all-minilm", global = true)]
    local_embedding_model: String,

    /// Append the offline character n-gram embedder after the model backends.
    #[arg(long, env = "NGRAM_FALLBACK", default_value_t = false, global = true)]
    ngram_fallback: bool,

    #[arg(long, env = "OPENROUTER_API_KEY", global = true, hide_env_values = true)]
    openrouter_api_key: Option<String>,

    #[arg(long, env = "LLM_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    llm_base_url: String,

    #[arg(long, env = "LLM_MODEL", default_value = DEFAULT_MODEL, global = true)]
    llm_model: String,

    /// Fold the system instruction into the user message.
    #[arg(long, env = "LLM_NO_SYSTEM_ROLE", default_value_t = false, global = true)]
    llm_no_system_role: bool,

    #[arg(long, env = "MAX_QUESTIONS", default_value = "20", global = true)]
    max_questions: usize,

    #[arg(long, env = "CHUNK_SIZE", default_value = "1000", global = true)]
    chunk_size: usize,

    #[arg(long, env = "CHUNK_OVERLAP", default_value = "200", global = true)]
    chunk_overlap: usize,

    #[arg(long, env = "TOP_K", default_value = "5", global = true)]
    top_k: usize,

    #[arg(long, env = "RELEVANCE_THRESHOLD", default_value = "0.1", global = true)]
    threshold: f32,

    #[arg(long, env = "USER_ID", default_value = "anonymous", global = true)]
    user_id: String,

    /// JSON file of `[{"all_of": [...], "answer": "..."}]` known answers.
    #[arg(long, env = "KNOWN_ANSWERS_FILE", global = true)]
    known_answers: Option<PathBuf>,
}

impl Settings {
    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            chunking: ChunkingConfig {
                chunk_size: self.chunk_size,
                overlap: self.chunk_overlap,
                ..ChunkingConfig::default()
            },
            retrieval: RetrievalOptions {
                top_k: self.top_k,
                threshold: self.threshold,
                ..RetrievalOptions::default()
            },
            synthesis: SynthesisOptions {
                timeout: LLM_TIMEOUT,
                ..SynthesisOptions::default()
            },
            max_questions: self.max_questions,
            user_id: self.user_id.clone(),
            ..PipelineOptions::default()
        }
    }

    async fn vector_index(&self) -> anyhow::Result<Arc<dyn VectorIndex>> {
        match self.index_backend {
            IndexBackend::Pinecone => {
                let (Some(api_key), Some(host)) = (
                    policy_qa_core::models::usable_credential(self.pinecone_api_key.clone()),
                    self.pinecone_host.as_deref(),
                ) else {
                    bail!("pinecone index needs PINECONE_API_KEY and PINECONE_HOST");
                };
                Ok(Arc::new(PineconeIndex::new(
                    host,
                    api_key,
                    self.dimensions,
                    INDEX_TIMEOUT,
                )?))
            }
            IndexBackend::Qdrant => {
                let store = QdrantStore::new(
                    &self.qdrant_url,
                    &self.qdrant_collection,
                    self.dimensions,
                    INDEX_TIMEOUT,
                )?;
                if let Err(error) = store.ensure_collection().await {
                    warn!(%error, "qdrant collection check failed");
                }
                Ok(Arc::new(store))
            }
            IndexBackend::Memory => Ok(Arc::new(InMemoryIndex::new(self.dimensions))),
        }
    }

    fn embedding_provider(&self) -> anyhow::Result<EmbeddingProvider> {
        let hosted = HostedEmbedder::new(
            self.openai_api_key.clone(),
            &self.openai_base_url,
            &self.embedding_model,
            HOSTED_EMBEDDING_TIMEOUT,
        )?;
        if !hosted.has_credential() {
            info!("no hosted embedding credential, the local model will be used");
        }

        let local = LocalModelEmbedder::new(
            &self.local_embedding_url,
            &self.local_embedding_model,
            LOCAL_EMBEDDING_TIMEOUT,
            MODEL_PULL_TIMEOUT,
        )?;

        let mut backends: Vec<Arc<dyn EmbeddingBackend>> = vec![Arc::new(hosted), Arc::new(local)];
        if self.ngram_fallback {
            backends.push(Arc::new(CharacterNgramEmbedder::default()));
        }
        Ok(EmbeddingProvider::new(backends, self.dimensions))
    }

    /// `allow_local` lets the `documents` field name files on this machine.
    async fn build_pipeline(&self, allow_local: bool) -> anyhow::Result<QaPipeline> {
        let options = self.pipeline_options();

        let mut fetcher = DocumentFetcher::new(DOWNLOAD_TIMEOUT)?;
        if !allow_local {
            fetcher = fetcher.remote_only();
        }

        let mut completion = ChatCompletionClient::new(
            &self.llm_base_url,
            &self.llm_model,
            self.openrouter_api_key.clone(),
            LLM_TIMEOUT,
        )?;
        if !completion.has_credential() {
            warn!("no LLM credential configured, answers will quote retrieved context");
        }
        if self.llm_no_system_role {
            completion = completion.without_system_role();
        }

        let synthesizer = AnswerSynthesizer::new(
            Arc::new(completion),
            FocusRules::insurance_defaults(),
            options.synthesis,
        );

        let extractors = ExtractorChain::with_defaults();
        info!(extractors = ?extractors.backend_names(), "pdf extractors configured");

        let mut pipeline = QaPipeline::new(
            fetcher,
            Arc::new(extractors),
            Arc::new(self.embedding_provider()?),
            self.vector_index().await?,
            synthesizer,
            options,
        );

        if let Some(path) = &self.known_answers {
            let table = KnownAnswerTable::from_file(path)
                .with_context(|| format!("loading known answers from {}", path.display()))?;
            info!(entries = table.len(), path = %path.display(), "known-answer table enabled");
            pipeline = pipeline.with_overrides(table);
        }

        Ok(pipeline)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    // Only the local CLI may read documents from disk; HTTP callers are limited to URLs.
    let allow_local = matches!(cli.command, Command::Run { .. });
    let pipeline = cli.settings.build_pipeline(allow_local).await?;
    info!(
        version = app_version,
        index = pipeline.index_name(),
        started_at = %Utc::now().to_rfc3339(),
        "policy-qa boot"
    );

    match cli.command {
        Command::Run {
            document,
            questions,
            detailed,
        } => {
            let report = pipeline
                .run(&DocumentRequest {
                    documents: document,
                    questions,
                })
                .await?;

            let output = if detailed {
                serde_json::to_string_pretty(&server::DetailedResponse::from_report(
                    report,
                    pipeline.embedding_backend(),
                ))?
            } else {
                serde_json::to_string_pretty(&server::RunResponse::from(report))?
            };
            println!("{output}");
        }
        Command::Serve { host, port, token } => {
            let token = token.filter(|token| !token.trim().is_empty());
            if token.is_none() {
                warn!("HACKRX_TOKEN not set, POST routes are unauthenticated");
            }

            let state = Arc::new(server::AppState { pipeline, token });
            let app = server::router(state);

            let addr: SocketAddr = format!("{host}:{port}").parse()?;
            info!(%addr, "listening");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
