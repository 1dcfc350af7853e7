use crate::models::{QueryResult, RetrievalOptions};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceOutcome {
    pub results: Vec<QueryResult>,
    /// Nothing cleared the threshold and the raw top-N was kept instead.
    pub used_fallback: bool,
}

impl RelevanceOutcome {
    pub fn contents(&self) -> Vec<String> {
        self.results.iter().map(|result| result.content.clone()).collect()
    }
}

/// Keeps results scoring strictly above `threshold`. When none do, keeps the
/// first `fallback_top_n` raw results instead of returning nothing.
#[derive(Debug, Clone, Copy)]
pub struct RelevanceFilter {
    pub threshold: f32,
    pub fallback_top_n: usize,
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self::from(&RetrievalOptions::default())
    }
}

impl From<&RetrievalOptions> for RelevanceFilter {
    fn from(options: &RetrievalOptions) -> Self {
        Self {
            threshold: options.threshold,
            fallback_top_n: options.fallback_top_n,
        }
    }
}

impl RelevanceFilter {
    pub fn apply(&self, results: Vec<QueryResult>) -> RelevanceOutcome {
        let (relevant, below): (Vec<_>, Vec<_>) = results
            .into_iter()
            .partition(|result| result.score > self.threshold);

        if !relevant.is_empty() {
            return RelevanceOutcome {
                results: relevant,
                used_fallback: false,
            };
        }

        debug!(
            threshold = self.threshold,
            candidates = below.len(),
            "no result above threshold, keeping raw top results"
        );
        RelevanceOutcome {
            results: below.into_iter().take(self.fallback_top_n).collect(),
            used_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn result(id: &str, score: f32) -> QueryResult {
        QueryResult {
            id: id.to_string(),
            content: format!("content {id}"),
            score,
            metadata: Map::new(),
        }
    }

    #[test]
    fn keeps_only_scores_above_threshold() {
        let filter = RelevanceFilter {
            threshold: 0.1,
            fallback_top_n: 3,
        };
        let outcome = filter.apply(vec![result("a", 0.8), result("b", 0.1), result("c", 0.3)]);
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.contents(), vec!["content a", "content c"]);
    }

    #[test]
    fn falls_back_to_top_n_in_order() {
        let filter = RelevanceFilter {
            threshold: 0.5,
            fallback_top_n: 2,
        };
        let outcome = filter.apply(vec![result("a", 0.4), result("b", 0.3), result("c", 0.2)]);
        assert!(outcome.used_fallback);
        assert_eq!(outcome.contents(), vec!["content a", "content b"]);
    }

    #[test]
    fn empty_input_stays_empty() {
        let outcome = RelevanceFilter::default().apply(Vec::new());
        assert!(outcome.results.is_empty());
        assert!(outcome.used_fallback);
    }
}
