use crate::error::CompletionError;
use crate::models::SynthesisOptions;
use crate::prompt::{FocusRules, PromptBuilder};
use crate::traits::{CompletionModel, CompletionRequest};
use std::sync::Arc;
use tracing::warn;

pub const NO_RELEVANT_INFO: &str = "No relevant information found in the document.";

pub const FALLBACK_PREFIX: &str =
    "An answer could not be generated. The most relevant text in the document reads:";

/// Chunks quoted verbatim in a fallback answer.
const FALLBACK_CHUNKS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOrigin {
    /// Empty context; the model was not called.
    NoContext,
    Model,
    /// The model failed and the context was quoted instead.
    ContextFallback { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub answer: String,
    pub origin: AnswerOrigin,
}

pub struct AnswerSynthesizer {
    model: Arc<dyn CompletionModel>,
    prompts: PromptBuilder,
    options: SynthesisOptions,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn CompletionModel>, rules: FocusRules, options: SynthesisOptions) -> Self {
        Self {
            model,
            prompts: PromptBuilder::new(rules, options.max_context_chunks),
            options,
        }
    }

    pub async fn synthesize(&self, question: &str, context_chunks: &[String]) -> String {
        self.synthesize_traced(question, context_chunks).await.answer
    }

    pub async fn synthesize_traced(&self, question: &str, context_chunks: &[String]) -> Synthesis {
        if context_chunks.is_empty() {
            return Synthesis {
                answer: NO_RELEVANT_INFO.to_string(),
                origin: AnswerOrigin::NoContext,
            };
        }

        let prompt = self
            .prompts
            .build(question, context_chunks, self.model.supports_system_role());
        let request = CompletionRequest {
            system: prompt.system,
            user: prompt.user,
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
        };

        let outcome = match tokio::time::timeout(self.options.timeout, self.model.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(self.options.timeout)),
        };

        match outcome {
            Ok(answer) => Synthesis {
                answer,
                origin: AnswerOrigin::Model,
            },
            Err(error) => {
                warn!(model = self.model.name(), %error, "completion failed, answering from context");
                Synthesis {
                    answer: context_fallback(context_chunks),
                    origin: AnswerOrigin::ContextFallback {
                        reason: error.to_string(),
                    },
                }
            }
        }
    }
}

pub fn context_fallback(context_chunks: &[String]) -> String {
    let quoted: Vec<&str> = context_chunks
        .iter()
        .take(FALLBACK_CHUNKS)
        .map(|chunk| chunk.trim())
        .collect();
    format!("{FALLBACK_PREFIX}\n\n{}", quoted.join("\n\n"))
}
