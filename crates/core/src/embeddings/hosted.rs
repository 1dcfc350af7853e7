use super::EmbeddingBackend;
use crate::error::EmbeddingError;
use crate::models::usable_credential;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BACKEND: &str = "openai";

/// OpenAI-compatible `/embeddings` client. Native dimension depends on the model
/// (1536 for `text-embedding-3-small`).
pub struct HostedEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    batch_size: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl HostedEmbedder {
    pub fn new(
        api_key: Option<String>,
        base_url: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: usable_credential(api_key),
            batch_size: 100,
        })
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    async fn embed_chunk(&self, api_key: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|entry| entry.index);

        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::Backend {
                backend: BACKEND.to_string(),
                details: format!(
                    "returned {} embeddings for {} inputs",
                    parsed.data.len(),
                    texts.len()
                ),
            });
        }

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingBackend for HostedEmbedder {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::MissingCredential {
                backend: BACKEND.to_string(),
            })?;

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            all_embeddings.extend(self.embed_chunk(api_key, batch).await?);
        }
        Ok(all_embeddings)
    }
}

fn classify_failure(status: StatusCode, body: &str) -> EmbeddingError {
    let lowered = body.to_lowercase();
    if status == StatusCode::TOO_MANY_REQUESTS
        || lowered.contains("quota")
        || lowered.contains("rate limit")
    {
        return EmbeddingError::QuotaExceeded {
            backend: BACKEND.to_string(),
            details: format!("{status}: {body}"),
        };
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return EmbeddingError::MissingCredential {
            backend: BACKEND.to_string(),
        };
    }

    EmbeddingError::Backend {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_signals_are_recognized() {
        assert!(classify_failure(StatusCode::TOO_MANY_REQUESTS, "").is_quota());
        assert!(classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"insufficient_quota"}}"#
        )
        .is_quota());
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, "bad key"),
            EmbeddingError::MissingCredential { .. }
        ));
        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            EmbeddingError::Backend { .. }
        ));
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let embedder = HostedEmbedder::new(
            None,
            "http://127.0.0.1:9",
            "text-embedding-3-small",
            Duration::from_secs(1),
        )
        .expect("client builds");

        assert!(!embedder.has_credential());
        let result = embedder.embed_batch(&["hello".to_string()]).await;
        assert!(matches!(result, Err(EmbeddingError::MissingCredential { .. })));
    }

    #[test]
    fn response_entries_are_parsed() {
        let json = r#"{
            "data": [
                {"embedding": [0.3], "index": 1, "object": "embedding"},
                {"embedding": [0.1, 0.2], "index": 0, "object": "embedding"}
            ],
            "model": "text-embedding-3-small"
        }"#;
        let mut response: EmbeddingResponse =
            serde_json::from_str(json).expect("response deserializes");
        response.data.sort_by_key(|entry| entry.index);
        assert_eq!(response.data[0].embedding, vec![0.1, 0.2]);
    }
}
