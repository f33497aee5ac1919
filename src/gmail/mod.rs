//! Gmail REST API access.
//!
//! - `auth`: client secrets, token cache, refresh, one-time installed-app flow.
//! - `client`: thin typed wrapper over `users/me` endpoints.
//! - `message`: payload types and the parsing helpers the triage pipeline uses.

pub mod auth;
pub mod client;
pub mod message;

pub use auth::{TokenCache, TokenSource};
pub use client::{GmailClient, MessageFormat};
pub use message::{AttachmentRef, Message, MessagePart};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GmailError {
    #[error("gmail auth error: {0}")]
    Auth(String),
    #[error("gmail request failed: {0}")]
    Request(String),
    #[error("gmail API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("gmail response could not be decoded: {0}")]
    Decode(String),
}
