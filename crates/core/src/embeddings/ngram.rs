use super::EmbeddingBackend;
use crate::error::EmbeddingError;
use async_trait::async_trait;

pub const DEFAULT_NGRAM_DIMENSIONS: usize = 384;

/// Hashed character-trigram embedder. Needs no model or network, so it is the
/// offline backend of last resort and the deterministic backend in tests.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_NGRAM_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingBackend for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "character-ngram"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::CharacterNgramEmbedder;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Grace period for premium payment");
        let second = embedder.embed("Grace period for premium payment");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc");
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn related_text_scores_higher_than_unrelated_text() {
        let embedder = CharacterNgramEmbedder::default();
        let dot = |left: &[f32], right: &[f32]| -> f32 {
            left.iter().zip(right).map(|(a, b)| a * b).sum()
        };

        let question = embedder.embed("What is the grace period for premium payment?");
        let related = embedder.embed("A grace period of thirty days is provided for premium payment.");
        let unrelated = embedder.embed("Cataract surgery is covered after two years.");

        assert!(dot(&question, &related) > dot(&question, &unrelated));
    }
}
