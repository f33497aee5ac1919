//! Persistence for processed emails.
//!
//! One SQLite table, `emails`, keyed by the Gmail message id. See
//! [`EmailStore`] for the operations the triage pipeline and the HTTP layer
//! rely on.

mod emails;

pub use emails::{DigestEntry, EmailRecord, EmailStore, NewEmail, start_of_day};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("email already stored: {0}")]
    Duplicate(String),
    #[error("email not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
