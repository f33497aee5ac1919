//! LLM-backed summarisation, classification and reply drafting.
//!
//! Every operation degrades to a fixed marker string instead of failing, so
//! one flaky completion never loses the rest of an email's analysis.

pub mod prompt;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::config::TriageConfig;
use crate::llm::{LlmProvider, LlmUsage, ProviderError};
pub use prompt::Prompts;

pub const SUMMARY_FAILED: &str = "[Summary failed]";
pub const CLASSIFICATION_FAILED: &str = "[Classification failed]";
pub const DRAFTING_FAILED: &str = "[Drafting failed]";

/// Result of running all assistant steps on one piece of content.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub summary: String,
    pub category: String,
    pub priority_score: i64,
    pub draft_reply: String,
}

#[derive(Debug, Default)]
struct UsageTotals {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct Assistant {
    provider: LlmProvider,
    prompts: Prompts,
    triage: TriageConfig,
    /// Shared by clones.
    usage: Arc<UsageTotals>,
}

impl Assistant {
    pub fn new(provider: LlmProvider, triage: &TriageConfig) -> Self {
        let prompts = Prompts::load(&triage.prompts_dir, &triage.categories);
        Self {
            provider,
            prompts,
            triage: triage.clone(),
            usage: Arc::default(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Tokens reported by the provider since this assistant was built.
    pub fn usage(&self) -> LlmUsage {
        LlmUsage {
            input_tokens: self.usage.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.usage.output_tokens.load(Ordering::Relaxed),
        }
    }

    async fn complete(&self, step: &'static str, content: &str, system: &str) -> Result<String, ProviderError> {
        let resp = self.provider.complete(content, Some(system)).await?;
        match &resp.usage {
            Some(usage) => {
                self.usage.input_tokens.fetch_add(usage.input_tokens, Ordering::Relaxed);
                self.usage.output_tokens.fetch_add(usage.output_tokens, Ordering::Relaxed);
                debug!(
                    step,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "llm usage"
                );
            }
            None => debug!(step, "llm usage not reported"),
        }
        Ok(resp.text)
    }

    pub async fn summarize(&self, content: &str) -> String {
        match self.complete("summarize", content, &self.prompts.summarize).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "summarization failed");
                SUMMARY_FAILED.to_string()
            }
        }
    }

    /// One of the configured categories, the fallback category when the
    /// model answers something else, or [`CLASSIFICATION_FAILED`].
    pub async fn classify(&self, content: &str) -> String {
        match self.complete("classify", content, &self.prompts.classify).await {
            Ok(text) => {
                let answer = text.trim();
                if self.triage.categories.iter().any(|c| c == answer) {
                    answer.to_string()
                } else {
                    warn!(
                        answer,
                        fallback = %self.triage.fallback_category,
                        "model returned a non-standard category"
                    );
                    self.triage.fallback_category.clone()
                }
            }
            Err(e) => {
                warn!(error = %e, "classification failed");
                CLASSIFICATION_FAILED.to_string()
            }
        }
    }

    /// Reply body from the model with the configured signature appended.
    pub async fn draft_reply(&self, content: &str) -> String {
        match self.complete("draft_reply", content, &self.prompts.draft_reply).await {
            Ok(text) => format!("{text}{}", self.signature()),
            Err(e) => {
                warn!(error = %e, "reply drafting failed");
                DRAFTING_FAILED.to_string()
            }
        }
    }

    fn signature(&self) -> String {
        format!("\n\nThanking you,\n{}", self.triage.signature_name)
    }

    pub fn priority(&self, category: &str) -> i64 {
        self.triage.priority_for(category)
    }

    /// Summarize, classify, draft and prioritise, in that order.
    pub async fn analyze(&self, content: &str) -> Analysis {
        debug!(provider = self.provider.name(), content_len = content.len(), "analyzing content");
        let summary = self.summarize(content).await;
        let category = self.classify(content).await;
        let draft_reply = self.draft_reply(content).await;
        let priority_score = self.priority(&category);
        Analysis { summary, category, priority_score, draft_reply }
    }
}
