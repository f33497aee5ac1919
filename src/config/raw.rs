//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module converts them into the public `types` structs.

use std::collections::HashMap;

use serde::Deserialize;

// ── Top-level ────────────────────────────────────────────────────────────────

/// Raw TOML shape, the serde target before resolution.
///
/// `[service]` is mandatory in a file; every other section falls back to
/// defaults. [`Default`] is only used when no config file exists at all.
#[derive(Deserialize, Default)]
pub(super) struct RawConfig {
    pub service: RawService,
    #[serde(default)]
    pub server: RawServer,
    #[serde(default)]
    pub database: RawDatabase,
    #[serde(default)]
    pub gmail: RawGmail,
    #[serde(default)]
    pub llm: RawLlm,
    #[serde(default)]
    pub triage: RawTriage,
    #[serde(default)]
    pub scheduler: RawScheduler,
    #[serde(default)]
    pub documents: RawDocuments,
}

#[derive(Deserialize)]
pub(super) struct RawService {
    pub name: String,
    pub work_dir: String,
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for RawService {
    fn default() -> Self {
        Self {
            name: "smartmail-agent".to_string(),
            work_dir: "~/.smartmail".to_string(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

// ── Server / database ────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawServer {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for RawServer {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Deserialize)]
pub(super) struct RawDatabase {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for RawDatabase {
    fn default() -> Self {
        Self { path: default_database_path() }
    }
}

// ── Gmail ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawGmail {
    #[serde(default = "default_credentials_file")]
    pub credentials_file: String,
    #[serde(default = "default_token_file")]
    pub token_file: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_gmail_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_unread_query")]
    pub unread_query: String,
    #[serde(default = "default_triage_max_results")]
    pub triage_max_results: u32,
    #[serde(default = "default_gmail_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for RawGmail {
    fn default() -> Self {
        Self {
            credentials_file: default_credentials_file(),
            token_file: default_token_file(),
            redirect_uri: default_redirect_uri(),
            api_base_url: default_gmail_api_base_url(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            unread_query: default_unread_query(),
            triage_max_results: default_triage_max_results(),
            timeout_seconds: default_gmail_timeout_seconds(),
        }
    }
}

// ── LLM ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            openai: RawOpenAiConfig::default(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: 0.0,
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

// ── Triage ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawTriage {
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,
    #[serde(default = "default_priorities")]
    pub priorities: HashMap<String, i64>,
    #[serde(default = "default_priority")]
    pub default_priority: i64,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: String,
}

impl Default for RawTriage {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            fallback_category: default_fallback_category(),
            priorities: default_priorities(),
            default_priority: default_priority(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

// ── Scheduler ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawScheduler {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scheduler_hour")]
    pub hour: u32,
    #[serde(default)]
    pub minute: u32,
    #[serde(default = "default_scheduler_max_results")]
    pub max_results: u32,
}

impl Default for RawScheduler {
    fn default() -> Self {
        Self {
            enabled: true,
            hour: default_scheduler_hour(),
            minute: 0,
            max_results: default_scheduler_max_results(),
        }
    }
}

// ── Documents ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawDocuments {
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,
    #[serde(default = "default_pdftoppm_bin")]
    pub pdftoppm_bin: String,
    #[serde(default = "default_tesseract_bin")]
    pub tesseract_bin: String,
    #[serde(default = "default_pdftotext_bin")]
    pub pdftotext_bin: String,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    #[serde(default = "default_ocr_dpi")]
    pub ocr_dpi: u32,
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

impl Default for RawDocuments {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            pdftoppm_bin: default_pdftoppm_bin(),
            tesseract_bin: default_tesseract_bin(),
            pdftotext_bin: default_pdftotext_bin(),
            ocr_language: default_ocr_language(),
            ocr_dpi: default_ocr_dpi(),
            min_text_chars: default_min_text_chars(),
        }
    }
}

// ── Default value functions ──────────────────────────────────────────────────

pub(super) fn default_true() -> bool {
    true
}

pub(super) fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub(super) fn default_database_path() -> String {
    "smartmail.db".to_string()
}

pub(super) fn default_credentials_file() -> String {
    "credentials.json".to_string()
}

pub(super) fn default_token_file() -> String {
    "token.json".to_string()
}

pub(super) fn default_redirect_uri() -> String {
    "http://localhost:5001/".to_string()
}

pub(super) fn default_gmail_api_base_url() -> String {
    "https://gmail.googleapis.com/gmail/v1/users/me".to_string()
}

pub(super) fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

pub(super) fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

pub(super) fn default_unread_query() -> String {
    "is:unread category:primary".to_string()
}

pub(super) fn default_triage_max_results() -> u32 {
    10
}

pub(super) fn default_gmail_timeout_seconds() -> u64 {
    30
}

pub(super) fn default_llm_provider() -> String {
    "openai".to_string()
}

pub(super) fn default_openai_api_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

pub(super) fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

pub(super) fn default_openai_timeout_seconds() -> u64 {
    60
}

pub(super) fn default_categories() -> Vec<String> {
    ["Urgent", "Work", "Personal", "Finance", "Newsletter"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(super) fn default_fallback_category() -> String {
    "Personal".to_string()
}

pub(super) fn default_priorities() -> HashMap<String, i64> {
    HashMap::from([
        ("Urgent".to_string(), 3),
        ("Work".to_string(), 2),
        ("Finance".to_string(), 2),
        ("Personal".to_string(), 1),
        ("Newsletter".to_string(), 0),
    ])
}

pub(super) fn default_priority() -> i64 {
    1
}

pub(super) fn default_prompts_dir() -> String {
    "config/prompts".to_string()
}

pub(super) fn default_scheduler_hour() -> u32 {
    9
}

pub(super) fn default_scheduler_max_results() -> u32 {
    25
}

pub(super) fn default_pdftoppm_bin() -> String {
    "pdftoppm".to_string()
}

pub(super) fn default_tesseract_bin() -> String {
    "tesseract".to_string()
}

pub(super) fn default_pdftotext_bin() -> String {
    "pdftotext".to_string()
}

pub(super) fn default_ocr_language() -> String {
    "eng".to_string()
}

pub(super) fn default_ocr_dpi() -> u32 {
    300
}

pub(super) fn default_min_text_chars() -> usize {
    10
}
