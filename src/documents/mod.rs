//! Text extraction from email attachments.
//!
//! Routing is by filename extension. PDFs go through the text layer first
//! and fall back to OCR; PDFs under a security handler lopdf cannot decrypt
//! are read with poppler's `pdftotext` instead. DOCX files are read from their OOXML package,
//! decrypting Office agile encryption when a password is supplied.
//!
//! Parsing is CPU-bound and runs on the blocking pool; OCR shells out to
//! `pdftoppm` and `tesseract` through async subprocesses.

pub mod docx;
#[cfg(feature = "ocr")]
pub mod ocr;
pub mod office_crypto;
pub mod pdf;
pub mod pdftotext;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DocumentsConfig;

pub const UNSUPPORTED_FILE_TEXT: &str = "[Unsupported file type. Can only read .pdf and .docx]";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("File is password-protected.")]
    PasswordRequired,
    #[error("Invalid Password")]
    InvalidPassword,
    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),
    #[error("Could not extract any text, tables, or image data from PDF.")]
    NoText,
    #[error("OCR failed: {0}")]
    Ocr(String),
    #[error("{0}")]
    Extraction(String),
}

impl DocumentError {
    /// Password problems, as opposed to unreadable content.
    pub fn is_password_error(&self) -> bool {
        matches!(self, DocumentError::PasswordRequired | DocumentError::InvalidPassword)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            Some(DocumentKind::Pdf)
        } else if lower.ends_with(".docx") {
            Some(DocumentKind::Docx)
        } else {
            None
        }
    }
}

/// Whether the document needs a password before it can be read.
///
/// Corrupt input reports `false`; extraction surfaces the real error later.
pub async fn check_if_encrypted(bytes: &[u8], filename: &str, config: &DocumentsConfig) -> bool {
    match DocumentKind::from_filename(filename) {
        Some(DocumentKind::Pdf) => match pdf::lock_state(bytes) {
            Ok(locked) => locked,
            Err(e) => {
                debug!(filename, error = %e, "pdf: asking pdftotext whether the file is locked");
                pdftotext::is_locked(bytes, config).await
            }
        },
        Some(DocumentKind::Docx) => office_crypto::is_encrypted_package(bytes),
        None => false,
    }
}

/// Extract readable text from an attachment.
///
/// Unsupported extensions yield [`UNSUPPORTED_FILE_TEXT`] rather than an error.
pub async fn extract_text(
    bytes: Vec<u8>,
    filename: &str,
    password: Option<&str>,
    config: &DocumentsConfig,
) -> Result<String, DocumentError> {
    let Some(kind) = DocumentKind::from_filename(filename) else {
        debug!(filename, "unsupported attachment type");
        return Ok(UNSUPPORTED_FILE_TEXT.to_string());
    };
    let owned_password = password.map(str::to_owned);

    match kind {
        DocumentKind::Docx => {
            tokio::task::spawn_blocking(move || docx::extract_text(&bytes, owned_password.as_deref()))
                .await
                .map_err(|e| DocumentError::Extraction(format!("docx worker failed: {e}")))?
        }
        DocumentKind::Pdf => extract_pdf(bytes, filename, owned_password, config).await,
    }
}

async fn extract_pdf(
    bytes: Vec<u8>,
    filename: &str,
    password: Option<String>,
    config: &DocumentsConfig,
) -> Result<String, DocumentError> {
    let pw = password.clone();
    let (layer, bytes) = tokio::task::spawn_blocking(move || {
        let layer = pdf::extract_text_layer(&bytes, pw.as_deref());
        (layer, bytes)
    })
    .await
    .map_err(|e| DocumentError::Extraction(format!("pdf worker failed: {e}")))?;

    let layer_text = match layer {
        Ok(text) if text.chars().count() > config.min_text_chars => {
            info!(filename, chars = text.len(), "pdf: using text layer");
            return Ok(text);
        }
        Ok(text) => text,
        Err(DocumentError::UnsupportedEncryption(handler)) => {
            info!(filename, %handler, "pdf: lopdf cannot decrypt, using pdftotext");
            match pdftotext::extract(&bytes, password.as_deref(), config).await {
                Ok(text) if text.chars().count() > config.min_text_chars => return Ok(text),
                Ok(text) => text,
                Err(e) if e.is_password_error() => return Err(e),
                Err(e) => {
                    warn!(filename, error = %e, "pdf: pdftotext failed");
                    String::new()
                }
            }
        }
        Err(e) if e.is_password_error() => return Err(e),
        Err(e) => {
            warn!(filename, error = %e, "pdf: text layer unreadable");
            String::new()
        }
    };

    if let Some(ocr_text) = run_ocr(&bytes, filename, password.as_deref(), config).await {
        let combined = [layer_text.as_str(), ocr_text.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        return Ok(combined);
    }

    Err(DocumentError::NoText)
}

#[cfg(feature = "ocr")]
async fn run_ocr(bytes: &[u8], filename: &str, password: Option<&str>, config: &DocumentsConfig) -> Option<String> {
    if !config.ocr_enabled {
        debug!(filename, "pdf: OCR disabled");
        return None;
    }
    match ocr::ocr_pdf(bytes, password, config).await {
        Ok(text) if !text.trim().is_empty() => {
            info!(filename, chars = text.len(), "pdf: using OCR text");
            Some(text.trim().to_string())
        }
        Ok(_) => {
            warn!(filename, "pdf: OCR produced no text");
            None
        }
        Err(e) => {
            warn!(filename, error = %e, "pdf: OCR failed");
            None
        }
    }
}

#[cfg(not(feature = "ocr"))]
async fn run_ocr(_bytes: &[u8], filename: &str, _password: Option<&str>, _config: &DocumentsConfig) -> Option<String> {
    debug!(filename, "pdf: built without OCR support");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn docs_config() -> (TempDir, DocumentsConfig) {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::test_default(tmp.path()).documents;
        (tmp, cfg)
    }

    #[test]
    fn kind_from_filename() {
        assert_eq!(DocumentKind::from_filename("a.PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_filename("b.docx"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_filename("c.doc"), None);
        assert_eq!(DocumentKind::from_filename("pdf"), None);
    }

    #[test]
    fn error_messages_match_user_facing_text() {
        assert_eq!(DocumentError::InvalidPassword.to_string(), "Invalid Password");
        assert_eq!(
            DocumentError::NoText.to_string(),
            "Could not extract any text, tables, or image data from PDF."
        );
        assert!(DocumentError::PasswordRequired.is_password_error());
        assert!(!DocumentError::NoText.is_password_error());
    }

    #[tokio::test]
    async fn corrupt_input_is_not_encrypted() {
        let (_tmp, cfg) = docs_config();
        assert!(!check_if_encrypted(b"garbage", "x.pdf", &cfg).await);
        assert!(!check_if_encrypted(b"garbage", "x.docx", &cfg).await);
        assert!(!check_if_encrypted(b"garbage", "x.txt", &cfg).await);
    }

    #[tokio::test]
    async fn encrypted_pdf_flow() {
        let (_tmp, cfg) = docs_config();
        let locked = pdf::tests::encrypted_pdf_with_lines(&["Salary statement for March"], "s3cret", "owner");
        assert!(check_if_encrypted(&locked, "payslip.pdf", &cfg).await);

        let err = extract_text(locked.clone(), "payslip.pdf", Some("wrong"), &cfg).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid Password");

        let text = extract_text(locked, "payslip.pdf", Some("s3cret"), &cfg).await.unwrap();
        assert!(text.contains("Salary statement for March"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unknown_security_handler_goes_through_pdftotext() {
        let (tmp, mut cfg) = docs_config();
        cfg.pdftotext_bin = pdftotext::tests::fake_pdftotext(tmp.path(), "s3cret", "Statement of account, March");
        let locked = pdf::tests::pdf_with_unknown_security_handler(&["Statement"], "s3cret");

        assert!(check_if_encrypted(&locked, "statement.pdf", &cfg).await);
        let err = extract_text(locked.clone(), "statement.pdf", Some("wrong"), &cfg).await.unwrap_err();
        assert!(matches!(err, DocumentError::InvalidPassword));
        let text = extract_text(locked, "statement.pdf", Some("s3cret"), &cfg).await.unwrap();
        assert_eq!(text, "Statement of account, March");
    }

    #[tokio::test]
    async fn unsupported_type_is_text_not_error() {
        let (_tmp, cfg) = docs_config();
        let text = extract_text(b"hello".to_vec(), "notes.txt", None, &cfg).await.unwrap();
        assert_eq!(text, UNSUPPORTED_FILE_TEXT);
    }

    #[tokio::test]
    async fn pdf_text_layer_is_used() {
        let (_tmp, cfg) = docs_config();
        let bytes = pdf::tests::pdf_with_lines(&["Quarterly invoice total due Friday"]);
        let text = extract_text(bytes, "invoice.pdf", None, &cfg).await.unwrap();
        assert!(text.contains("Quarterly invoice"));
    }

    #[tokio::test]
    async fn pdf_without_text_and_without_ocr_fails() {
        let (_tmp, cfg) = docs_config();
        let bytes = pdf::tests::pdf_with_lines(&[]);
        let err = extract_text(bytes, "scan.pdf", None, &cfg).await.unwrap_err();
        assert!(matches!(err, DocumentError::NoText));
    }

    #[tokio::test]
    async fn corrupt_pdf_without_ocr_fails_with_no_text() {
        let (_tmp, cfg) = docs_config();
        let err = extract_text(b"%PDF-broken".to_vec(), "x.pdf", None, &cfg).await.unwrap_err();
        assert!(matches!(err, DocumentError::NoText));
    }

    #[tokio::test]
    async fn docx_roundtrip_through_encryption() {
        let (_tmp, cfg) = docs_config();
        let plain = docx::tests::docx_with_body(r#"<w:p><w:r><w:t>Locked memo</w:t></w:r></w:p>"#);
        let locked = office_crypto::encrypt_with_spin_count(&plain, "hunter2", 1_000).unwrap();
        assert!(check_if_encrypted(&locked, "memo.docx", &cfg).await);
        assert!(!check_if_encrypted(&plain, "memo.docx", &cfg).await);

        let err = extract_text(locked.clone(), "memo.docx", None, &cfg).await.unwrap_err();
        assert!(matches!(err, DocumentError::PasswordRequired));

        let err = extract_text(locked.clone(), "memo.docx", Some("wrong"), &cfg).await.unwrap_err();
        assert!(matches!(err, DocumentError::InvalidPassword));

        let text = extract_text(locked, "memo.docx", Some("hunter2"), &cfg).await.unwrap();
        assert_eq!(text, "Locked memo");
    }
}
