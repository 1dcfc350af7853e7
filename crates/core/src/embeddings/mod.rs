pub mod hosted;
pub mod local;
pub mod ngram;

pub use hosted::HostedEmbedder;
pub use local::LocalModelEmbedder;
pub use ngram::CharacterNgramEmbedder;

use crate::error::EmbeddingError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Dimension of the deployed vector index.
pub const DEFAULT_TARGET_DIMENSIONS: usize = 1024;

const PROBE_TEXT: &str = "test";

/// A concrete embedding model. Vectors come back in the backend's native dimension.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Truncates (keep the first `target` components) or zero-pads to `target`.
///
/// This is lossy: a 1536-d vector loses a third of its components and a 384-d
/// vector is compared against others in a mostly-zero subspace. It is kept so
/// vectors from any backend fit the fixed index dimension.
pub fn fit_dimensions(mut vector: Vec<f32>, target: usize) -> Vec<f32> {
    vector.resize(target, 0.0);
    vector
}

/// Picks the first working backend once, then sticks with it for its lifetime.
///
/// Selection runs on first use under a `OnceCell`, so concurrent first callers
/// share a single probe. A failed selection leaves the cell empty and the next
/// call probes again.
pub struct EmbeddingProvider {
    backends: Vec<Arc<dyn EmbeddingBackend>>,
    target_dimensions: usize,
    selected: OnceCell<usize>,
}

impl EmbeddingProvider {
    pub fn new(backends: Vec<Arc<dyn EmbeddingBackend>>, target_dimensions: usize) -> Self {
        Self {
            backends,
            target_dimensions,
            selected: OnceCell::new(),
        }
    }

    pub fn target_dimensions(&self) -> usize {
        self.target_dimensions
    }

    pub fn selected_backend(&self) -> Option<&str> {
        self.selected
            .get()
            .and_then(|index| self.backends.get(*index))
            .map(|backend| backend.name())
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let backend = self.backend().await?;
        let vectors = backend.embed_batch(texts).await?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::Backend {
                backend: backend.name().to_string(),
                details: format!("{} embeddings for {} inputs", vectors.len(), texts.len()),
            });
        }

        Ok(vectors
            .into_iter()
            .map(|vector| fit_dimensions(vector, self.target_dimensions))
            .collect())
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| EmbeddingError::Backend {
            backend: self.selected_backend().unwrap_or("unknown").to_string(),
            details: "no embedding returned for query".to_string(),
        })
    }

    async fn backend(&self) -> Result<&Arc<dyn EmbeddingBackend>, EmbeddingError> {
        let index = self
            .selected
            .get_or_try_init(|| self.select_backend())
            .await?;

        self.backends
            .get(*index)
            .ok_or_else(|| EmbeddingError::NoBackend {
                attempts: "selected backend disappeared".to_string(),
            })
    }

    async fn select_backend(&self) -> Result<usize, EmbeddingError> {
        let probe = vec![PROBE_TEXT.to_string()];
        let mut attempts = Vec::new();

        for (index, backend) in self.backends.iter().enumerate() {
            match backend.embed_batch(&probe).await {
                Ok(vectors) if vectors.len() == 1 => {
                    let native = vectors.first().map(Vec::len).unwrap_or_default();
                    if native != self.target_dimensions {
                        warn!(
                            backend = backend.name(),
                            native_dimensions = native,
                            target_dimensions = self.target_dimensions,
                            "embeddings will be truncated or zero-padded to the index dimension"
                        );
                    }
                    info!(backend = backend.name(), native_dimensions = native, "embedding backend selected");
                    return Ok(index);
                }
                Ok(vectors) => attempts.push(format!(
                    "{}: probe returned {} vectors",
                    backend.name(),
                    vectors.len()
                )),
                Err(error) => {
                    if error.is_quota() {
                        warn!(backend = backend.name(), %error, "embedding quota exhausted, falling back");
                    } else {
                        warn!(backend = backend.name(), %error, "embedding backend unusable, falling back");
                    }
                    attempts.push(format!("{}: {error}", backend.name()));
                }
            }
        }

        if attempts.is_empty() {
            attempts.push("no backends configured".to_string());
        }

        Err(EmbeddingError::NoBackend {
            attempts: attempts.join("; "),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every call with the given error kind and counts calls.
    pub(crate) struct FailingBackend {
        pub quota: bool,
        pub calls: AtomicUsize,
    }

    impl FailingBackend {
        pub(crate) fn quota() -> Self {
            Self {
                quota: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.quota {
                Err(EmbeddingError::QuotaExceeded {
                    backend: "failing".to_string(),
                    details: "insufficient_quota".to_string(),
                })
            } else {
                Err(EmbeddingError::ModelInit {
                    backend: "failing".to_string(),
                    details: "model download failed: network unreachable".to_string(),
                })
            }
        }
    }

    struct FixedWidthBackend {
        width: usize,
    }

    #[async_trait]
    impl EmbeddingBackend for FixedWidthBackend {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0; self.width]).collect())
        }
    }

    #[test]
    fn fitting_truncates_and_pads() {
        let long = fit_dimensions(vec![1.0; 1536], 1024);
        assert_eq!(long.len(), 1024);

        let short = fit_dimensions(vec![1.0; 384], 1024);
        assert_eq!(short.len(), 1024);
        assert_eq!(short[383], 1.0);
        assert!(short[384..].iter().all(|value| *value == 0.0));
    }

    #[test]
    fn fitting_is_idempotent_at_target_length() {
        let vector: Vec<f32> = (0..1024).map(|i| i as f32 / 1024.0).collect();
        let fitted = fit_dimensions(vector.clone(), 1024);
        assert_eq!(fitted, vector);
        assert_eq!(fit_dimensions(fitted.clone(), 1024), fitted);
    }

    #[tokio::test]
    async fn every_backend_width_is_normalized() {
        for width in [1536, 1024, 768, 384, 7] {
            let provider = EmbeddingProvider::new(
                vec![Arc::new(FixedWidthBackend { width })],
                DEFAULT_TARGET_DIMENSIONS,
            );
            let vectors = provider
                .embed(&["a".to_string(), "b".to_string()])
                .await
                .expect("embedding succeeds");
            assert!(vectors.iter().all(|vector| vector.len() == DEFAULT_TARGET_DIMENSIONS));
            let query = provider.embed_one("q").await.expect("query embeds");
            assert_eq!(query.len(), DEFAULT_TARGET_DIMENSIONS);
        }
    }

    #[tokio::test]
    async fn quota_failure_falls_back_and_sticks() {
        let hosted = Arc::new(FailingBackend::quota());
        let provider = EmbeddingProvider::new(
            vec![hosted.clone(), Arc::new(CharacterNgramEmbedder::default())],
            DEFAULT_TARGET_DIMENSIONS,
        );

        let vectors = provider
            .embed(&["grace period".to_string()])
            .await
            .expect("fallback backend embeds");
        assert_eq!(vectors[0].len(), DEFAULT_TARGET_DIMENSIONS);
        assert_eq!(provider.selected_backend(), Some("character-ngram"));

        provider.embed_one("second call").await.expect("sticky backend embeds");
        assert_eq!(hosted.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_usable_backend_reports_each_attempt() {
        let provider = EmbeddingProvider::new(
            vec![
                Arc::new(FailingBackend::quota()),
                Arc::new(FailingBackend {
                    quota: false,
                    calls: AtomicUsize::new(0),
                }),
            ],
            DEFAULT_TARGET_DIMENSIONS,
        );

        match provider.embed_one("anything").await {
            Err(EmbeddingError::NoBackend { attempts }) => {
                assert!(attempts.contains("quota"));
                assert!(attempts.contains("model download failed"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(provider.selected_backend(), None);
    }

    #[tokio::test]
    async fn concurrent_first_calls_probe_once() {
        let hosted = Arc::new(FailingBackend::quota());
        let provider = Arc::new(EmbeddingProvider::new(
            vec![hosted.clone(), Arc::new(CharacterNgramEmbedder::default())],
            DEFAULT_TARGET_DIMENSIONS,
        ));

        let (left, right) = tokio::join!(provider.embed_one("left"), provider.embed_one("right"));
        assert!(left.is_ok() && right.is_ok());
        assert_eq!(hosted.calls.load(Ordering::SeqCst), 1);
    }
}
