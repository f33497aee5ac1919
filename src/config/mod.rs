//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `SMARTMAIL_*`, `DATABASE_URL`, `OPENAI_API_KEY`, `USER_NAME`
//! and `GOOGLE_CLIENT_*` overrides.
//!
//! # Module layout
//!
//! - **types**: public configuration structs consumed by the service.
//! - **raw**: raw TOML deserialization types; mirror the file shape and use
//!   serde defaults. Kept private.
//! - **load**: `merge_toml`, `load_raw_merged`, `load`, `load_from`,
//!   `expand_home`, `database_path_from_url`.

mod load;
mod raw;
mod types;

pub use load::{database_path_from_url, expand_home, load, load_from};
pub use types::*;

impl Config {
    /// Safe `Config` for tests: dummy LLM, no API keys, everything under `work_dir`.
    pub fn test_default(work_dir: &std::path::Path) -> Self {
        Self {
            service_name: "test".into(),
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            server: ServerConfig {
                bind: "127.0.0.1:0".into(),
            },
            database: DatabaseConfig {
                path: work_dir.join("smartmail.db"),
            },
            gmail: GmailConfig {
                credentials_file: work_dir.join("credentials.json"),
                token_file: work_dir.join("token.json"),
                redirect_uri: raw::default_redirect_uri(),
                api_base_url: "http://127.0.0.1:0/gmail/v1/users/me".into(),
                auth_url: raw::default_auth_url(),
                token_url: "http://127.0.0.1:0/token".into(),
                unread_query: raw::default_unread_query(),
                triage_max_results: raw::default_triage_max_results(),
                timeout_seconds: 5,
                client_id: None,
                client_secret: None,
            },
            llm: LlmConfig {
                provider: "dummy".into(),
                openai: OpenAiConfig {
                    api_base_url: "http://127.0.0.1:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    timeout_seconds: 5,
                },
            },
            llm_api_key: None,
            triage: TriageConfig {
                categories: raw::default_categories(),
                fallback_category: raw::default_fallback_category(),
                priorities: raw::default_priorities(),
                default_priority: raw::default_priority(),
                signature_name: "Test User".into(),
                prompts_dir: work_dir.join("prompts"),
            },
            scheduler: SchedulerConfig {
                enabled: false,
                hour: 9,
                minute: 0,
                max_results: raw::default_scheduler_max_results(),
            },
            documents: DocumentsConfig {
                ocr_enabled: false,
                pdftoppm_bin: raw::default_pdftoppm_bin(),
                tesseract_bin: raw::default_tesseract_bin(),
                pdftotext_bin: raw::default_pdftotext_bin(),
                ocr_language: raw::default_ocr_language(),
                ocr_dpi: raw::default_ocr_dpi(),
                min_text_chars: raw::default_min_text_chars(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::{NamedTempFile, TempDir};

    const MINIMAL_TOML: &str = r#"
[service]
name = "test-agent"
work_dir = "/srv/smartmail"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    fn no_env() -> EnvOverrides {
        EnvOverrides::default()
    }

    #[test]
    fn parse_minimal_config_uses_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &no_env()).unwrap();
        assert_eq!(cfg.service_name, "test-agent");
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.openai.model, "gpt-4o");
        assert_eq!(cfg.llm.openai.temperature, 0.0);
        assert_eq!(cfg.gmail.unread_query, "is:unread category:primary");
        assert_eq!(cfg.gmail.redirect_uri, "http://localhost:5001/");
        assert_eq!(cfg.scheduler.hour, 9);
        assert_eq!(cfg.scheduler.max_results, 25);
        assert_eq!(cfg.triage.signature_name, "Your Name");
        assert!(cfg.llm_api_key.is_none());
    }

    #[test]
    fn relative_paths_resolve_under_work_dir() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &no_env()).unwrap();
        assert_eq!(cfg.database.path, PathBuf::from("/srv/smartmail/smartmail.db"));
        assert_eq!(cfg.gmail.token_file, PathBuf::from("/srv/smartmail/token.json"));
        assert_eq!(
            cfg.gmail.credentials_file,
            PathBuf::from("/srv/smartmail/credentials.json")
        );
    }

    #[test]
    fn default_priorities_match_categories() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &no_env()).unwrap();
        assert_eq!(cfg.triage.priority_for("Urgent"), 3);
        assert_eq!(cfg.triage.priority_for("Work"), 2);
        assert_eq!(cfg.triage.priority_for("Finance"), 2);
        assert_eq!(cfg.triage.priority_for("Personal"), 1);
        assert_eq!(cfg.triage.priority_for("Newsletter"), 0);
        assert_eq!(cfg.triage.priority_for("Encrypted"), 1);
    }

    #[test]
    fn env_overrides_apply() {
        let f = write_toml(MINIMAL_TOML);
        let env = EnvOverrides {
            work_dir: Some("/tmp/override".into()),
            log_level: Some("debug".into()),
            database_url: Some("sqlite:////var/lib/mail.db".into()),
            llm_api_key: Some("sk-test".into()),
            user_name: Some("Ada".into()),
            google_client_id: Some("client-123".into()),
            google_client_secret: None,
        };
        let cfg = load_from(f.path(), &env).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/override"));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.database.path, PathBuf::from("/var/lib/mail.db"));
        assert_eq!(cfg.llm_api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.triage.signature_name, "Ada");
        assert_eq!(cfg.gmail.client_id.as_deref(), Some("client-123"));
    }

    #[test]
    fn database_url_forms() {
        assert_eq!(
            database_path_from_url("sqlite:///./local.db").unwrap(),
            PathBuf::from("./local.db")
        );
        assert_eq!(
            database_path_from_url("sqlite:////abs/mail.db").unwrap(),
            PathBuf::from("/abs/mail.db")
        );
        assert_eq!(
            database_path_from_url("sqlite://mail.db").unwrap(),
            PathBuf::from("mail.db")
        );
        assert_eq!(database_path_from_url("plain.db").unwrap(), PathBuf::from("plain.db"));
        assert!(database_path_from_url("postgresql://db/mail").is_err());
    }

    #[test]
    fn missing_service_section_errors() {
        let f = write_toml("[server]\nbind = \"0.0.0.0:9000\"\n");
        let msg = load_from(f.path(), &no_env()).unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn scheduler_time_validated() {
        let f = write_toml(&format!("{MINIMAL_TOML}\n[scheduler]\nhour = 24\n"));
        let msg = load_from(f.path(), &no_env()).unwrap_err().to_string();
        assert!(msg.contains("scheduler time"));
    }

    #[test]
    fn empty_categories_rejected() {
        let f = write_toml(&format!("{MINIMAL_TOML}\n[triage]\ncategories = []\n"));
        assert!(load_from(f.path(), &no_env()).is_err());
    }

    #[test]
    fn custom_categories_and_priorities() {
        let toml = format!(
            "{MINIMAL_TOML}\n[triage]\ncategories = [\"Bills\", \"Other\"]\nfallback_category = \"Other\"\n\n[triage.priorities]\nBills = 5\n"
        );
        let f = write_toml(&toml);
        let cfg = load_from(f.path(), &no_env()).unwrap();
        assert_eq!(cfg.triage.categories, vec!["Bills", "Other"]);
        assert_eq!(cfg.triage.fallback_category, "Other");
        assert_eq!(cfg.triage.priority_for("Bills"), 5);
        assert_eq!(cfg.triage.priority_for("Other"), 1);
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.smartmail");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".smartmail"));
    }

    #[test]
    fn absolute_and_relative_paths_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_home("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(std::path::Path::new("/nonexistent/config.toml"), &no_env());
        assert!(result.unwrap_err().to_string().contains("config error"));
    }

    const BASE_TOML: &str = r#"
[service]
name = "base-agent"
work_dir = "/srv/base"
log_level = "info"

[llm]
default = "dummy"

[llm.openai]
model = "gpt-base"
temperature = 0.1
"#;

    fn write_named(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, content).unwrap();
        p
    }

    #[test]
    fn overlay_keeps_base_fields() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "base.toml", BASE_TOML);
        let overlay = "[meta]\nbase = \"base.toml\"\n\n[service]\nlog_level = \"debug\"\n";
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let cfg = load_from(&overlay_path, &no_env()).unwrap();
        assert_eq!(cfg.service_name, "base-agent");
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.llm.provider, "dummy");
    }

    #[test]
    fn overlay_wins_scalar() {
        let dir = TempDir::new().unwrap();
        write_named(&dir, "base.toml", BASE_TOML);
        let overlay = "[meta]\nbase = \"base.toml\"\n\n[llm.openai]\nmodel = \"gpt-overlay\"\n";
        let overlay_path = write_named(&dir, "overlay.toml", overlay);
        let cfg = load_from(&overlay_path, &no_env()).unwrap();
        assert_eq!(cfg.llm.openai.model, "gpt-overlay");
        assert_eq!(cfg.llm.openai.temperature, 0.1);
    }

    #[test]
    fn cycle_detection() {
        let dir = TempDir::new().unwrap();
        let self_path = dir.path().join("self.toml");
        let content = format!("[meta]\nbase = \"{}\"\n\n{BASE_TOML}", self_path.display());
        std::fs::write(&self_path, content).unwrap();
        let msg = load_from(&self_path, &no_env()).unwrap_err().to_string();
        assert!(msg.contains("circular"));
    }
}
