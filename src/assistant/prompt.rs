//! System prompts for the assistant.
//!
//! Each prompt is a plain-text file under `prompts_dir`; a built-in
//! fallback is used when the file is missing or empty. Variable
//! substitution uses `{{key}}` and is applied once at build time.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SUMMARIZE_FILE: &str = "summarize.txt";
pub const CLASSIFY_FILE: &str = "classify.txt";
pub const DRAFT_REPLY_FILE: &str = "draft_reply.txt";

const SUMMARIZE_FALLBACK: &str = "You are an expert assistant. Summarize the following email content in 30 words or less. \
Focus on the main point and any call to action.";

const CLASSIFY_FALLBACK: &str = "You are a classification assistant. Classify the following email into ONE of these \
categories: [{{categories}}]. Only output the category name and nothing else.";

const DRAFT_REPLY_FALLBACK: &str = "You are a professional and helpful assistant. Draft a complete, polite, and human-like \
reply to the following email. If it's a question, answer it. If it's a task, acknowledge it. Write a full email, but \
do not include a sign-off or closing (e.g., 'Regards', 'Thanks'). Just write the body of the reply.";

/// Builder over template files in one directory.
pub struct PromptBuilder {
    prompts_dir: PathBuf,
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
            parts: Vec::new(),
            vars: HashMap::new(),
        }
    }

    /// Append `filename` from the prompts directory, or `fallback` when the
    /// file is missing or blank.
    pub fn layer_or(mut self, filename: &str, fallback: &str) -> Self {
        let path = self.prompts_dir.join(filename);
        let text = match fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::debug!("prompt: '{}' is empty, using built-in text", path.display());
                fallback.to_string()
            }
            Err(_) => {
                tracing::debug!("prompt: '{}' not found, using built-in text", path.display());
                fallback.to_string()
            }
        };
        self.parts.push(text.trim().to_string());
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> String {
        let mut prompt = self.parts.join("\n\n");
        for (k, v) in &self.vars {
            let placeholder = format!("{{{{{}}}}}", k);
            prompt = prompt.replace(&placeholder, v);
        }
        prompt
    }
}

/// The three rendered system prompts.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub summarize: String,
    pub classify: String,
    pub draft_reply: String,
}

impl Prompts {
    /// Load from `prompts_dir`, substituting `{{categories}}` in the classifier prompt.
    pub fn load(prompts_dir: &Path, categories: &[String]) -> Self {
        Self {
            summarize: PromptBuilder::new(prompts_dir)
                .layer_or(SUMMARIZE_FILE, SUMMARIZE_FALLBACK)
                .build(),
            classify: PromptBuilder::new(prompts_dir)
                .layer_or(CLASSIFY_FILE, CLASSIFY_FALLBACK)
                .var("categories", categories.join(", "))
                .build(),
            draft_reply: PromptBuilder::new(prompts_dir)
                .layer_or(DRAFT_REPLY_FILE, DRAFT_REPLY_FALLBACK)
                .build(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn categories() -> Vec<String> {
        ["Urgent", "Work"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fallbacks_used_when_directory_missing() {
        let tmp = TempDir::new().unwrap();
        let prompts = Prompts::load(&tmp.path().join("absent"), &categories());
        assert!(prompts.summarize.contains("30 words"));
        assert!(prompts.classify.contains("[Urgent, Work]"));
        assert!(!prompts.classify.contains("{{categories}}"));
        assert!(prompts.draft_reply.contains("do not include a sign-off"));
    }

    #[test]
    fn files_override_fallbacks() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(SUMMARIZE_FILE), "  Be brief.\n").unwrap();
        fs::write(tmp.path().join(CLASSIFY_FILE), "Pick from {{categories}}").unwrap();
        fs::write(tmp.path().join(DRAFT_REPLY_FILE), "   \n").unwrap();
        let prompts = Prompts::load(tmp.path(), &categories());
        assert_eq!(prompts.summarize, "Be brief.");
        assert_eq!(prompts.classify, "Pick from Urgent, Work");
        assert!(prompts.draft_reply.contains("polite"));
    }

    #[test]
    fn builder_leaves_unknown_placeholders() {
        let tmp = TempDir::new().unwrap();
        let out = PromptBuilder::new(tmp.path())
            .layer_or("none.txt", "Hello {{name}} and {{other}}")
            .var("name", "Ada")
            .build();
        assert_eq!(out, "Hello Ada and {{other}}");
    }
}
