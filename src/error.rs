//! Application-wide error types.
//!
//! Layer-specific errors (`GmailError`, `DocumentError`, `StoreError`,
//! `ProviderError`, `TriageError`) live next to the code that raises them;
//! `AppError` covers startup and the process edge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("llm error: {0}")]
    Llm(#[from] crate::llm::ProviderError),

    #[error("server error: {0}")]
    Server(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().starts_with("config error"));
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn logger_error_display() {
        let e = AppError::Logger("already initialized".into());
        assert!(e.to_string().contains("already initialized"));
    }

    #[test]
    fn store_error_converts() {
        let e: AppError = crate::store::StoreError::Database("locked".into()).into();
        assert!(e.to_string().contains("store error"));
        assert!(e.to_string().contains("locked"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }
}
