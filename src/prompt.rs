//! Prompt assembly and the token-budget guard.
//!
//! [`build_prompt`] renders the fixed template. [`PromptAssembler::assemble`]
//! estimates the prompt size with a [`TokenEstimator`] and, when the estimate
//! is over budget, rebuilds the prompt once from a fixed-length prefix of the
//! context. The over-budget prompt is discarded and never sent.

use crate::config::PromptConfig;
use crate::retrieve::ELLIPSIS;

const PREAMBLE: &str = "Answer the question using the knowledge base content below.";
const CONTEXT_LABEL: &str = "Knowledge base content:";
const QUESTION_LABEL: &str = "Question:";
const CLOSING: &str = "Give an accurate, concise answer based on the knowledge base content. \
If the knowledge base does not contain the relevant information, say explicitly that you cannot answer.";

/// Render the prompt for `query` over `context`.
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "{}\n\n{}\n{}\n\n{} {}\n\n{}",
        PREAMBLE, CONTEXT_LABEL, context, QUESTION_LABEL, query, CLOSING
    )
}

/// Estimates how many model tokens a prompt will cost.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// `characters / chars_per_token`, rounded up, so a prompt that is a
/// fraction of a token over the budget still counts as over.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    pub chars_per_token: usize,
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token.max(1))
    }
}

/// The prompt that will be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub text: String,
    /// Estimate for the first, untruncated rendering.
    pub estimated_tokens: usize,
    pub truncated: bool,
}

pub struct PromptAssembler {
    token_budget: usize,
    fallback_context_chars: usize,
    estimator: Box<dyn TokenEstimator>,
}

impl PromptAssembler {
    pub fn new(
        token_budget: usize,
        fallback_context_chars: usize,
        estimator: Box<dyn TokenEstimator>,
    ) -> Self {
        Self {
            token_budget,
            fallback_context_chars,
            estimator,
        }
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        Self::new(
            config.token_budget,
            config.fallback_context_chars,
            Box::new(CharRatioEstimator {
                chars_per_token: config.chars_per_token,
            }),
        )
    }

    pub fn assemble(&self, query: &str, context: &str) -> AssembledPrompt {
        let text = build_prompt(query, context);
        let estimated_tokens = self.estimator.estimate(&text);

        if estimated_tokens <= self.token_budget {
            return AssembledPrompt {
                text,
                estimated_tokens,
                truncated: false,
            };
        }

        tracing::warn!(
            estimated_tokens,
            budget = self.token_budget,
            "prompt over token budget, truncating context"
        );
        let prefix: String = context.chars().take(self.fallback_context_chars).collect();
        AssembledPrompt {
            text: build_prompt(query, &format!("{}{}", prefix, ELLIPSIS)),
            estimated_tokens,
            truncated: true,
        }
    }
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::from_config(&PromptConfig::default())
    }
}
