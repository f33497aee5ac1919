//! Poppler's `pdftotext` for PDFs whose security handler lopdf cannot
//! decrypt. The file is written to a scratch directory and the text read
//! from stdout.

use tokio::process::Command;
use tracing::debug;

use super::DocumentError;
use crate::config::DocumentsConfig;

/// Poppler's stderr when the user password does not open the file.
const INCORRECT_PASSWORD: &str = "Incorrect password";

pub async fn extract(bytes: &[u8], password: Option<&str>, config: &DocumentsConfig) -> Result<String, DocumentError> {
    let program = config.pdftotext_bin.as_str();
    let scratch = tempfile::TempDir::new()
        .map_err(|e| DocumentError::Extraction(format!("cannot create scratch dir: {e}")))?;
    let input = scratch.path().join("input.pdf");
    tokio::fs::write(&input, bytes)
        .await
        .map_err(|e| DocumentError::Extraction(format!("cannot write scratch PDF: {e}")))?;

    let mut cmd = Command::new(program);
    cmd.arg("-enc").arg("UTF-8");
    if let Some(pw) = password {
        cmd.arg("-upw").arg(pw);
    }
    cmd.arg(&input).arg("-");

    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DocumentError::Extraction(format!("cannot run {program}: {e}")))?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains(INCORRECT_PASSWORD) {
        debug!(program, "pdftotext: password rejected");
        return Err(match password {
            Some(_) => DocumentError::InvalidPassword,
            None => DocumentError::PasswordRequired,
        });
    }
    Err(DocumentError::Extraction(format!(
        "{program} exited with {}: {}",
        output.status,
        stderr.trim()
    )))
}

/// Whether the empty user password fails to open the file. Tool failures
/// report `false`; extraction surfaces them later.
pub async fn is_locked(bytes: &[u8], config: &DocumentsConfig) -> bool {
    match extract(bytes, None, config).await {
        Err(DocumentError::PasswordRequired) => true,
        Ok(_) => false,
        Err(e) => {
            debug!(error = %e, "pdftotext: lock state unknown, treating as open");
            false
        }
    }
}
