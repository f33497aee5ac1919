//! SmartMail Agent: backend for the SmartMail Gmail add-on.
//!
//! Fetches mail and attachments through the Gmail API, extracts text from
//! PDF/DOCX attachments (unlocking protected ones on request), asks an
//! OpenAI-compatible model for a summary, a category and a draft reply, and
//! keeps the results in SQLite for the add-on, the daily digest and the
//! dashboard.

pub mod assistant;
pub mod config;
pub mod documents;
pub mod error;
pub mod gmail;
pub mod llm;
pub mod logger;
pub mod store;
pub mod triage;

#[cfg(feature = "scheduler")]
pub mod scheduler;
#[cfg(feature = "server")]
pub mod server;
