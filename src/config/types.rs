//! Public configuration types.
//!
//! These are the resolved, ready-to-use structs the service consumes.
//! Raw TOML deserialization types live in `raw.rs`.

use std::collections::HashMap;
use std::path::PathBuf;

// ── Server ───────────────────────────────────────────────────────────────────

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the axum listener binds to.
    pub bind: String,
}

// ── Database ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite file (already resolved against `work_dir`).
    pub path: PathBuf,
}

// ── Gmail ────────────────────────────────────────────────────────────────────

/// Gmail API + OAuth configuration.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// Google client secrets (`credentials.json`), `installed` or `web` shape.
    pub credentials_file: PathBuf,
    /// Token cache written by `smartmail-auth` and refreshed by the service.
    pub token_file: PathBuf,
    /// Loopback redirect used by the one-time OAuth flow.
    pub redirect_uri: String,
    /// `users/me` base URL, e.g. `https://gmail.googleapis.com/gmail/v1/users/me`.
    pub api_base_url: String,
    pub auth_url: String,
    pub token_url: String,
    /// Search string applied to the unread triage listing.
    pub unread_query: String,
    /// Upper bound for `POST /triage`.
    pub triage_max_results: u32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
    /// Client id override (`GOOGLE_CLIENT_ID`); never sourced from TOML.
    pub client_id: Option<String>,
    /// Client secret override (`GOOGLE_CLIENT_SECRET`); never sourced from TOML.
    pub client_secret: Option<String>,
}

// ── LLM ──────────────────────────────────────────────────────────────────────

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[llm.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature (ignored for models that forbid it).
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// LLM configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Which provider is active (`"dummy"`, `"openai"`).
    /// Maps to `default` in `[llm]` TOML.
    pub provider: String,
    pub openai: OpenAiConfig,
}

// ── Triage ───────────────────────────────────────────────────────────────────

/// Classification, priority and drafting settings.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Allowed classification labels, in prompt order.
    pub categories: Vec<String>,
    /// Label used when the model answers outside `categories`.
    pub fallback_category: String,
    /// category → priority score.
    pub priorities: HashMap<String, i64>,
    /// Score for categories missing from `priorities`.
    pub default_priority: i64,
    /// Name appended to every draft reply (`USER_NAME`).
    pub signature_name: String,
    /// Directory holding `summarize.txt`, `classify.txt`, `draft_reply.txt`.
    pub prompts_dir: PathBuf,
}

impl TriageConfig {
    pub fn priority_for(&self, category: &str) -> i64 {
        self.priorities
            .get(category)
            .copied()
            .unwrap_or(self.default_priority)
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────────

/// Daily background triage.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// UTC hour of the daily run.
    pub hour: u32,
    /// UTC minute of the daily run.
    pub minute: u32,
    pub max_results: u32,
}

// ── Documents ────────────────────────────────────────────────────────────────

/// Attachment text extraction settings.
#[derive(Debug, Clone)]
pub struct DocumentsConfig {
    /// Fall back to OCR when a PDF has no usable text layer.
    pub ocr_enabled: bool,
    pub pdftoppm_bin: String,
    pub tesseract_bin: String,
    /// Text layer for PDFs whose security handler lopdf cannot decrypt.
    pub pdftotext_bin: String,
    /// Tesseract language code(s), e.g. `"eng"` or `"eng+deu"`.
    pub ocr_language: String,
    /// Rasterisation resolution for OCR.
    pub ocr_dpi: u32,
    /// Text layers at or below this many characters count as empty.
    pub min_text_chars: usize,
}

// ── Top level ────────────────────────────────────────────────────────────────

/// Fully-resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    /// Working directory for all persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    /// Append logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gmail: GmailConfig,
    pub llm: LlmConfig,
    /// API key from `OPENAI_API_KEY`; `None` for keyless local models.
    /// Never sourced from TOML.
    pub llm_api_key: Option<String>,
    pub triage: TriageConfig,
    pub scheduler: SchedulerConfig,
    pub documents: DocumentsConfig,
}

/// Environment-sourced values applied on top of the TOML.
///
/// [`load`](super::load) reads these from the process environment; tests
/// build them directly instead of mutating env vars.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub work_dir: Option<String>,
    pub log_level: Option<String>,
    pub database_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub user_name: Option<String>,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            work_dir: var("SMARTMAIL_WORK_DIR"),
            log_level: var("SMARTMAIL_LOG_LEVEL"),
            database_url: var("DATABASE_URL"),
            llm_api_key: var("OPENAI_API_KEY"),
            user_name: var("USER_NAME"),
            google_client_id: var("GOOGLE_CLIENT_ID"),
            google_client_secret: var("GOOGLE_CLIENT_SECRET"),
        }
    }
}
