use super::EmbeddingBackend;
use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

const BACKEND: &str = "local-model";

/// Embeddings from a self-hosted model server speaking the Ollama API
/// (`/api/pull`, `/api/embed`). The default model, `all-minilm`, is 384-d.
///
/// The first call pulls the model, which may download weights. That step runs
/// once per instance behind a `OnceCell`. Share the instance through an `Arc`
/// to reuse it for the whole process.
pub struct LocalModelEmbedder {
    client: Client,
    base_url: String,
    model: String,
    pull_timeout: Duration,
    ready: OnceCell<()>,
}

#[derive(Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl LocalModelEmbedder {
    pub fn new(
        base_url: &str,
        model: &str,
        timeout: Duration,
        pull_timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            pull_timeout,
            ready: OnceCell::new(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.initialized()
    }

    async fn ensure_ready(&self) -> Result<(), EmbeddingError> {
        self.ready
            .get_or_try_init(|| self.initialize())
            .await
            .map(|_| ())
    }

    async fn initialize(&self) -> Result<(), EmbeddingError> {
        info!(model = %self.model, base_url = %self.base_url, "initializing local embedding model");

        let response = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .timeout(self.pull_timeout)
            .json(&PullRequest {
                model: &self.model,
                stream: false,
            })
            .send()
            .await
            .map_err(|error| EmbeddingError::ModelInit {
                backend: BACKEND.to_string(),
                details: format!("model download failed: {error}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ModelInit {
                backend: BACKEND.to_string(),
                details: format!("model download returned {status}: {body}"),
            });
        }

        info!(model = %self.model, "local embedding model ready");
        Ok(())
    }
}

#[async_trait]
impl EmbeddingBackend for LocalModelEmbedder {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.ensure_ready().await?;

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Backend {
                backend: BACKEND.to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        Ok(parsed.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_server_surfaces_model_init_failure() {
        let embedder = LocalModelEmbedder::new(
            "http://127.0.0.1:9",
            "all-minilm",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .expect("client builds");

        let result = embedder.embed_batch(&["hello".to_string()]).await;
        match result {
            Err(EmbeddingError::ModelInit { details, .. }) => {
                assert!(details.contains("model download failed"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!embedder.is_initialized());
    }

    #[test]
    fn embed_response_is_parsed() {
        let json = r#"{"model":"all-minilm","embeddings":[[0.1,0.2],[0.3,0.4]]}"#;
        let parsed: EmbedResponse = serde_json::from_str(json).expect("response deserializes");
        assert_eq!(parsed.embeddings.len(), 2);
    }
}
