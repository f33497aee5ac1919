//! Configuration loading with env-var overrides.
//!
//! Reads TOML files, supports `[meta] base = "..."` inheritance chains,
//! and applies the environment overrides collected in [`EnvOverrides`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AppError;

use super::raw::RawConfig;
use super::types::*;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const DEFAULT_SIGNATURE_NAME: &str = "Your Name";

/// Deep-merge two TOML values.
/// Tables are merged recursively; the overlay only needs to specify keys that
/// differ from the base. For every other type (string, integer, array, …)
/// the overlay value replaces the base value wholesale.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file, follow any `[meta] base = "..."` chain, and return the
/// fully merged `toml::Value`. `visited` carries canonicalized paths already
/// seen in this chain so circular references are caught early.
fn load_raw_merged(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let overlay_val: toml::Value = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if let Some(base_str) = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
    {
        let base_path = if Path::new(base_str).is_absolute() {
            PathBuf::from(base_str)
        } else {
            path.parent().unwrap_or(Path::new(".")).join(base_str)
        };
        let base_val = load_raw_merged(&base_path, visited)?;
        Ok(merge_toml(base_val, overlay_val))
    } else {
        Ok(overlay_val)
    }
}

/// Load config from the given path, or `config/default.toml`, then apply
/// environment overrides. Without an explicit path and without the default
/// file, built-in defaults are used.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let overrides = EnvOverrides::from_env();

    if let Some(path) = config_path {
        return load_from(Path::new(path), &overrides);
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        load_from(default_path, &overrides)
    } else {
        resolve(RawConfig::default(), &overrides)
    }
}

/// Internal loader: accepts an explicit path and overrides.
/// Follows `[meta] base = "..."` inheritance chains before resolving.
pub fn load_from(path: &Path, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let merged_val = load_raw_merged(path, &mut HashSet::new())?;

    let parsed: RawConfig = Deserialize::deserialize(merged_val).map_err(|e: toml::de::Error| {
        AppError::Config(format!("config error in {}: {e}", path.display()))
    })?;

    resolve(parsed, overrides)
}

fn resolve(parsed: RawConfig, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let s = parsed.service;

    let work_dir = expand_home(overrides.work_dir.as_deref().unwrap_or(&s.work_dir));
    let log_level = overrides
        .log_level
        .clone()
        .unwrap_or(s.log_level);
    let log_file = s.log_file.map(|p| under_work_dir(&work_dir, &p));

    let database_path = match overrides.database_url.as_deref() {
        Some(url) => database_path_from_url(url)?,
        None => PathBuf::from(parsed.database.path),
    };

    let scheduler = parsed.scheduler;
    if scheduler.hour > 23 || scheduler.minute > 59 {
        return Err(AppError::Config(format!(
            "scheduler time out of range: {:02}:{:02}",
            scheduler.hour, scheduler.minute
        )));
    }

    let triage = parsed.triage;
    if triage.categories.is_empty() {
        return Err(AppError::Config("triage.categories must not be empty".into()));
    }

    Ok(Config {
        service_name: s.name,
        log_level,
        log_file,
        server: ServerConfig {
            bind: parsed.server.bind,
        },
        database: DatabaseConfig {
            path: under_work_dir_path(&work_dir, database_path),
        },
        gmail: GmailConfig {
            credentials_file: under_work_dir(&work_dir, &parsed.gmail.credentials_file),
            token_file: under_work_dir(&work_dir, &parsed.gmail.token_file),
            redirect_uri: parsed.gmail.redirect_uri,
            api_base_url: parsed.gmail.api_base_url.trim_end_matches('/').to_string(),
            auth_url: parsed.gmail.auth_url,
            token_url: parsed.gmail.token_url,
            unread_query: parsed.gmail.unread_query,
            triage_max_results: parsed.gmail.triage_max_results.max(1),
            timeout_seconds: parsed.gmail.timeout_seconds,
            client_id: overrides.google_client_id.clone(),
            client_secret: overrides.google_client_secret.clone(),
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            openai: OpenAiConfig {
                api_base_url: parsed.llm.openai.api_base_url,
                model: parsed.llm.openai.model,
                temperature: parsed.llm.openai.temperature,
                timeout_seconds: parsed.llm.openai.timeout_seconds,
            },
        },
        llm_api_key: overrides.llm_api_key.clone(),
        triage: TriageConfig {
            categories: triage.categories,
            fallback_category: triage.fallback_category,
            priorities: triage.priorities,
            default_priority: triage.default_priority,
            signature_name: overrides
                .user_name
                .clone()
                .unwrap_or_else(|| DEFAULT_SIGNATURE_NAME.to_string()),
            prompts_dir: expand_home(&triage.prompts_dir),
        },
        scheduler: SchedulerConfig {
            enabled: scheduler.enabled,
            hour: scheduler.hour,
            minute: scheduler.minute,
            max_results: scheduler.max_results.max(1),
        },
        documents: DocumentsConfig {
            ocr_enabled: parsed.documents.ocr_enabled,
            pdftoppm_bin: parsed.documents.pdftoppm_bin,
            tesseract_bin: parsed.documents.tesseract_bin,
            pdftotext_bin: parsed.documents.pdftotext_bin,
            ocr_language: parsed.documents.ocr_language,
            ocr_dpi: parsed.documents.ocr_dpi,
            min_text_chars: parsed.documents.min_text_chars,
        },
        work_dir,
    })
}

/// Turn a `DATABASE_URL` into a SQLite file path.
///
/// Accepts a bare path, `sqlite://path` or the SQLAlchemy-style
/// `sqlite:///relative.db` / `sqlite:////absolute.db`.
pub fn database_path_from_url(url: &str) -> Result<PathBuf, AppError> {
    let url = url.trim();
    if let Some(rest) = url.strip_prefix("sqlite:///") {
        return Ok(PathBuf::from(rest));
    }
    if let Some(rest) = url.strip_prefix("sqlite://") {
        return Ok(PathBuf::from(rest));
    }
    if url.contains("://") {
        return Err(AppError::Config(format!(
            "unsupported DATABASE_URL scheme (only sqlite is supported): {url}"
        )));
    }
    Ok(PathBuf::from(url))
}

fn under_work_dir(work_dir: &Path, path: &str) -> PathBuf {
    under_work_dir_path(work_dir, expand_home(path))
}

fn under_work_dir_path(work_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        work_dir.join(path)
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
