//! HTTP surface over [`QaPipeline`].
//!
//! Fatal pipeline errors become an [`ApiError`] with a JSON body
//! `{"error": "...", "stage": "..."}`. Degraded answers are ordinary 200 responses.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use policy_qa_core::{
    AnswerRecord, DocumentRequest, EmbeddingError, IndexError, IngestError, PipelineError,
    PipelineErrorKind, PipelineReport, QaPipeline, QueryResult,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

pub struct AppState {
    pub pipeline: QaPipeline,
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub answers: Vec<String>,
}

impl From<PipelineReport> for RunResponse {
    fn from(report: PipelineReport) -> Self {
        Self {
            answers: report.answers.into_iter().map(|record| record.answer).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetailedResponse {
    pub document_id: String,
    pub namespace: String,
    pub num_chunks: usize,
    pub embedding_backend: Option<String>,
    pub answers: Vec<AnswerRecord>,
}

impl DetailedResponse {
    pub fn from_report(report: PipelineReport, embedding_backend: Option<&str>) -> Self {
        Self {
            document_id: report.document.document_id,
            namespace: report.document.namespace,
            num_chunks: report.document.num_chunks,
            embedding_backend: embedding_backend.map(str::to_string),
            answers: report.answers,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IndexSnapshotQuery {
    pub namespace: String,
    #[serde(default = "default_snapshot_limit")]
    pub limit: usize,
}

fn default_snapshot_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct IndexSnapshot {
    pub namespace: String,
    pub count: usize,
    pub records: Vec<QueryResult>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest { message: String, stage: Option<String> },
    Unauthorized(String),
    ServiceUnavailable { message: String, stage: Option<String> },
    Internal { message: String, stage: Option<String> },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, stage) = match self {
            ApiError::BadRequest { message, stage } => (StatusCode::BAD_REQUEST, message, stage),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message, None),
            ApiError::ServiceUnavailable { message, stage } => {
                (StatusCode::SERVICE_UNAVAILABLE, message, stage)
            }
            ApiError::Internal { message, stage } => {
                (StatusCode::INTERNAL_SERVER_ERROR, message, stage)
            }
        };
        (status, Json(json!({ "error": message, "stage": stage }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(failure: PipelineError) -> Self {
        let message = failure.to_string();
        let stage = Some(failure.stage.to_string());
        match failure.kind {
            PipelineErrorKind::InvalidRequest(_) => ApiError::BadRequest { message, stage },
            PipelineErrorKind::Ingest(IngestError::InvalidChunkConfig(_)) => {
                ApiError::Internal { message, stage }
            }
            PipelineErrorKind::Ingest(_) => ApiError::BadRequest { message, stage },
            PipelineErrorKind::Embedding(EmbeddingError::NoBackend { .. }) => {
                ApiError::ServiceUnavailable { message, stage }
            }
            PipelineErrorKind::Index(IndexError::Unavailable(_)) => {
                ApiError::ServiceUnavailable { message, stage }
            }
            _ => ApiError::Internal { message, stage },
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(failure: IndexError) -> Self {
        let message = failure.to_string();
        match failure {
            IndexError::Unavailable(_) => ApiError::ServiceUnavailable { message, stage: None },
            _ => ApiError::Internal { message, stage: None },
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/hackrx/run", post(run))
        .route("/hackrx/run/detailed", post(run_detailed))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/debug/index", get(debug_index))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.token.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(ApiError::Unauthorized("invalid bearer token".to_string())),
        None => Err(ApiError::Unauthorized("missing bearer token".to_string())),
    }
}

async fn execute(
    state: &AppState,
    headers: &HeaderMap,
    request: &DocumentRequest,
) -> Result<PipelineReport, ApiError> {
    authorize(state, headers)?;
    state.pipeline.run(request).await.map_err(|failure| {
        error!(stage = %failure.stage, error = %failure, "document request failed");
        ApiError::from(failure)
    })
}

/// POST /hackrx/run
async fn run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<DocumentRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    let report = execute(&state, &headers, &request).await?;
    Ok(Json(RunResponse::from(report)))
}

/// POST /hackrx/run/detailed
async fn run_detailed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<DocumentRequest>,
) -> Result<Json<DetailedResponse>, ApiError> {
    let report = execute(&state, &headers, &request).await?;
    Ok(Json(DetailedResponse::from_report(
        report,
        state.pipeline.embedding_backend(),
    )))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn ready(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, ApiError> {
    state.pipeline.ready().await?;
    Ok(Json(json!({
        "status": "ready",
        "index": state.pipeline.index_name(),
        "embedding_backend": state.pipeline.embedding_backend(),
    })))
}

/// GET /debug/index?namespace=...&limit=...
async fn debug_index(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IndexSnapshotQuery>,
) -> Result<Json<IndexSnapshot>, ApiError> {
    let records = state
        .pipeline
        .inspect_index(&query.namespace, query.limit)
        .await?;
    Ok(Json(IndexSnapshot {
        namespace: query.namespace,
        count: records.len(),
        records,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use policy_qa_core::{
        AnswerSynthesizer, CharacterNgramEmbedder, ChatCompletionClient, DocumentFetcher,
        EmbeddingProvider, ExtractorChain, FocusRules, InMemoryIndex, PdfExtractor,
        PipelineOptions, PipelineStage, DEFAULT_TARGET_DIMENSIONS,
    };
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    const POLICY_TEXT: &str = "A grace period of thirty days is provided for premium payment after the due date. \
The waiting period for pre-existing diseases is thirty-six months of continuous coverage. \
Maternity expenses are covered after 24 months of continuous coverage, limited to two deliveries. \
Cataract surgery has a waiting period of two years.";

    struct PlainTextExtractor;

    impl PdfExtractor for PlainTextExtractor {
        fn name(&self) -> &'static str {
            "plain-text"
        }

        fn extract_text(&self, bytes: &[u8]) -> Result<String, IngestError> {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    fn test_app(token: Option<&str>) -> Router {
        let options = PipelineOptions::default();
        // No credential: every completion fails fast and answers quote the context.
        let completion = ChatCompletionClient::new(
            "http://127.0.0.1:9",
            "test-model",
            None,
            Duration::from_secs(1),
        )
        .expect("client builds");
        let synthesizer = AnswerSynthesizer::new(
            Arc::new(completion),
            FocusRules::insurance_defaults(),
            options.synthesis,
        );
        let pipeline = QaPipeline::new(
            DocumentFetcher::new(Duration::from_secs(5))
                .expect("client builds")
                .remote_only(),
            Arc::new(ExtractorChain::new(vec![Box::new(PlainTextExtractor)])),
            Arc::new(EmbeddingProvider::new(
                vec![Arc::new(CharacterNgramEmbedder::default())],
                DEFAULT_TARGET_DIMENSIONS,
            )),
            Arc::new(InMemoryIndex::new(DEFAULT_TARGET_DIMENSIONS)),
            synthesizer,
            options,
        );

        router(Arc::new(AppState {
            pipeline,
            token: token.map(str::to_string),
        }))
    }

    fn post_json(uri: &str, body: &Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        serde_json::from_slice(&bytes).expect("body is json")
    }

    /// Serves the policy text over HTTP on an ephemeral port and returns its URL.
    async fn serve_policy() -> String {
        let documents = Router::new().route("/policy.pdf", get(|| async { POLICY_TEXT }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener binds");
        let addr = listener.local_addr().expect("listener has an address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, documents).await;
        });
        format!("http://{addr}/policy.pdf")
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let response = test_app(None)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request builds"))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn run_returns_one_answer_per_question() {
        let url = serve_policy().await;
        let body = json!({
            "documents": url,
            "questions": ["What is the grace period for premium payment?", "Is cataract covered?"],
        });

        let response = test_app(None)
            .oneshot(post_json("/hackrx/run", &body, None))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        let answers = json["answers"].as_array().cloned().unwrap_or_default();
        assert_eq!(answers.len(), 2);
        assert!(answers[0].as_str().unwrap_or_default().contains("thirty days"));
    }

    #[tokio::test]
    async fn detailed_run_includes_sources() {
        let url = serve_policy().await;
        let body = json!({ "documents": url, "questions": ["What is the grace period?"] });

        let response = test_app(None)
            .oneshot(post_json("/hackrx/run/detailed", &body, None))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_body(response).await;
        assert!(json["namespace"].as_str().unwrap_or_default().starts_with("policy-qa-"));
        assert_eq!(json["embedding_backend"], "character-ngram");
        assert_eq!(json["answers"][0]["question"], "What is the grace period?");
        assert!(!json["answers"][0]["sources"].as_array().cloned().unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn local_paths_are_refused_over_http() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("policy.pdf");
        std::fs::write(&path, POLICY_TEXT).expect("policy written");

        for source in [
            path.to_string_lossy().into_owned(),
            format!("file://{}", path.display()),
        ] {
            let body = json!({ "documents": source, "questions": ["What is the grace period?"] });
            let response = test_app(None)
                .oneshot(post_json("/hackrx/run", &body, None))
                .await
                .expect("router responds");

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json = json_body(response).await;
            assert_eq!(json["stage"], PipelineStage::Downloading.as_str());
            assert!(json["error"].as_str().unwrap_or_default().contains("http(s)"));
        }
    }

    #[tokio::test]
    async fn unreachable_document_is_a_bad_request_with_stage() {
        let body = json!({ "documents": "http://127.0.0.1:9/policy.pdf", "questions": ["q?"] });
        let response = test_app(None)
            .oneshot(post_json("/hackrx/run", &body, None))
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["stage"], PipelineStage::Downloading.as_str());
    }

    #[tokio::test]
    async fn bearer_token_is_enforced_when_configured() {
        let body = json!({ "documents": "/no/such/policy.pdf", "questions": ["q?"] });

        let missing = test_app(Some("secret"))
            .oneshot(post_json("/hackrx/run", &body, None))
            .await
            .expect("router responds");
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = test_app(Some("secret"))
            .oneshot(post_json("/hackrx/run", &body, Some("guess")))
            .await
            .expect("router responds");
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let accepted = test_app(Some("secret"))
            .oneshot(post_json("/hackrx/run", &body, Some("secret")))
            .await
            .expect("router responds");
        assert_eq!(accepted.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn debug_index_lists_nothing_for_unknown_namespace() {
        let response = test_app(None)
            .oneshot(
                Request::builder()
                    .uri("/debug/index?namespace=policy-qa-unknown&limit=5")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["count"], 0);
    }

    #[tokio::test]
    async fn memory_index_is_ready() {
        let response = test_app(None)
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).expect("request builds"))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["index"], "memory");
    }
}
