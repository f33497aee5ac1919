//! OCR fallback for scanned PDFs: `pdftoppm` rasterises each page, then
//! `tesseract` reads each image. Both run as async subprocesses in a
//! scratch directory that is removed afterwards.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use super::DocumentError;
use crate::config::DocumentsConfig;

pub async fn ocr_pdf(bytes: &[u8], password: Option<&str>, config: &DocumentsConfig) -> Result<String, DocumentError> {
    let scratch = tempfile::TempDir::new()
        .map_err(|e| DocumentError::Ocr(format!("cannot create scratch dir: {e}")))?;
    let input = scratch.path().join("input.pdf");
    tokio::fs::write(&input, bytes)
        .await
        .map_err(|e| DocumentError::Ocr(format!("cannot write scratch PDF: {e}")))?;

    let pages = rasterize(&input, scratch.path(), password, config).await?;
    debug!(pages = pages.len(), "ocr: pages rasterised");

    let mut texts = Vec::with_capacity(pages.len());
    for page in &pages {
        texts.push(recognize(page, config).await?);
    }
    Ok(texts.join("\n"))
}

async fn rasterize(
    input: &Path,
    out_dir: &Path,
    password: Option<&str>,
    config: &DocumentsConfig,
) -> Result<Vec<PathBuf>, DocumentError> {
    let prefix = out_dir.join("page");
    let mut cmd = Command::new(&config.pdftoppm_bin);
    cmd.arg("-r").arg(config.ocr_dpi.to_string()).arg("-png");
    if let Some(pw) = password {
        cmd.arg("-upw").arg(pw);
    }
    cmd.arg(input).arg(&prefix);
    run(&mut cmd, &config.pdftoppm_bin).await?;

    let mut entries = tokio::fs::read_dir(out_dir)
        .await
        .map_err(|e| DocumentError::Ocr(format!("cannot list rasterised pages: {e}")))?;
    let mut pages = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DocumentError::Ocr(format!("cannot list rasterised pages: {e}")))?
    {
        let path = entry.path();
        let is_page = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("page-") && n.ends_with(".png"));
        if is_page {
            pages.push(path);
        }
    }
    // pdftoppm zero-pads page numbers to a common width, so names sort in page order.
    pages.sort();
    Ok(pages)
}

async fn recognize(image: &Path, config: &DocumentsConfig) -> Result<String, DocumentError> {
    let mut cmd = Command::new(&config.tesseract_bin);
    cmd.arg(image).arg("stdout").arg("-l").arg(&config.ocr_language);
    let stdout = run(&mut cmd, &config.tesseract_bin).await?;
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

async fn run(cmd: &mut Command, program: &str) -> Result<Vec<u8>, DocumentError> {
    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| DocumentError::Ocr(format!("cannot run {program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DocumentError::Ocr(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn missing_binary_is_an_ocr_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut cfg = Config::test_default(tmp.path()).documents;
        cfg.pdftoppm_bin = tmp.path().join("no-such-pdftoppm").display().to_string();
        let err = ocr_pdf(b"%PDF-1.5", None, &cfg).await.unwrap_err();
        assert!(matches!(err, DocumentError::Ocr(ref m) if m.contains("cannot run")));
    }
}
