//! Email triage pipeline.
//!
//! Sequences Gmail, document extraction, the assistant and the store for
//! the add-on endpoints, the manual/scheduled bulk triage and replies.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::assistant::{Analysis, Assistant};
use crate::config::{Config, DocumentsConfig};
use crate::documents::{self, DocumentError};
use crate::gmail::message::build_reply_raw;
use crate::gmail::{GmailClient, GmailError, MessageFormat};
use crate::store::{EmailRecord, EmailStore, NewEmail, StoreError};

const REPLY_HEADERS: &[&str] = &["Subject", "From", "Message-ID"];

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("Not authenticated with Google. Run 'smartmail-auth'.")]
    NotAuthenticated,
    #[error("Email not found or not marked as encrypted.")]
    NotAwaitingPassword,
    #[error("Could not find attachment in email.")]
    AttachmentMissing,
    #[error(transparent)]
    Gmail(#[from] GmailError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What the add-on receives for a processed email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedEmail {
    /// Gmail message id.
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub summary: String,
    pub category: String,
    pub priority: i64,
    pub draft_reply: String,
}

impl From<EmailRecord> for ProcessedEmail {
    fn from(r: EmailRecord) -> Self {
        Self {
            id: r.email_id,
            sender: r.sender,
            subject: r.subject,
            summary: r.summary,
            category: r.category,
            priority: r.priority_score,
            draft_reply: r.draft_reply,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Processed(ProcessedEmail),
    /// A locked attachment was found; the add-on should ask for its password.
    NeedsPassword { filename: String, id: String },
}

pub struct Triage {
    gmail: Option<GmailClient>,
    store: EmailStore,
    assistant: Assistant,
    documents: DocumentsConfig,
    unread_query: String,
}

impl Triage {
    /// `gmail` is `None` when no token is available; Gmail-backed operations
    /// then fail with [`TriageError::NotAuthenticated`].
    pub fn new(gmail: Option<GmailClient>, store: EmailStore, assistant: Assistant, config: &Config) -> Self {
        Self {
            gmail,
            store,
            assistant,
            documents: config.documents.clone(),
            unread_query: config.gmail.unread_query.clone(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.gmail.is_some()
    }

    pub fn store(&self) -> &EmailStore {
        &self.store
    }

    fn gmail(&self) -> Result<&GmailClient, TriageError> {
        self.gmail.as_ref().ok_or(TriageError::NotAuthenticated)
    }

    /// Process one message for the add-on, returning the stored result when
    /// the message was seen before.
    pub async fn process_email(&self, message_id: &str) -> Result<ProcessOutcome, TriageError> {
        if let Some(existing) = self.store.get(message_id)? {
            return Ok(stored_outcome(message_id, existing));
        }

        let gmail = self.gmail()?;
        // The row is written as the last step, so a failure leaves nothing behind.
        match self.fetch_and_process(gmail, message_id).await {
            Err(TriageError::Store(StoreError::Duplicate(id))) => {
                info!(message_id, "email stored by a concurrent request");
                match self.store.get(message_id)? {
                    Some(existing) => Ok(stored_outcome(message_id, existing)),
                    None => Err(StoreError::Duplicate(id).into()),
                }
            }
            Err(e) => {
                warn!(message_id, error = %e, "processing failed");
                Err(e)
            }
            ok => ok,
        }
    }

    async fn fetch_and_process(&self, gmail: &GmailClient, message_id: &str) -> Result<ProcessOutcome, TriageError> {
        info!(message_id, "fetching email");
        let message = gmail.get_message(message_id, MessageFormat::Full).await?;
        let subject = message.subject();
        let sender = message.sender();

        let content = match message.document_attachment() {
            Some(attachment) => {
                info!(message_id, filename = %attachment.filename, "found document attachment");
                let bytes = gmail.get_attachment(message_id, &attachment.attachment_id).await?;
                if documents::check_if_encrypted(&bytes, &attachment.filename, &self.documents).await {
                    info!(message_id, filename = %attachment.filename, "attachment is password-protected");
                    self.store.insert(&NewEmail::encrypted_placeholder(
                        message_id,
                        &sender,
                        &attachment.filename,
                    ))?;
                    return Ok(ProcessOutcome::NeedsPassword {
                        filename: attachment.filename,
                        id: message_id.to_string(),
                    });
                }
                documents::extract_text(bytes, &attachment.filename, None, &self.documents).await?
            }
            None => {
                debug!(message_id, "no supported attachment, using body");
                message.body_or_snippet()
            }
        };

        let analysis = self.assistant.analyze(&content).await;
        let record = self.store.insert(&new_email(message_id, &sender, &subject, analysis))?;
        info!(message_id, category = %record.category, priority = record.priority_score, "email processed");
        Ok(ProcessOutcome::Processed(record.into()))
    }

    /// Unlock the attachment of a placeholder record and complete the record.
    pub async fn process_document(&self, message_id: &str, password: &str) -> Result<ProcessedEmail, TriageError> {
        let gmail = self.gmail()?;
        let record = self
            .store
            .get(message_id)?
            .filter(|r| r.encrypted)
            .ok_or(TriageError::NotAwaitingPassword)?;
        let filename = record.subject;

        let message = gmail.get_message(message_id, MessageFormat::Full).await?;
        let attachment = message.document_attachment().ok_or(TriageError::AttachmentMissing)?;
        let bytes = gmail.get_attachment(message_id, &attachment.attachment_id).await?;

        let content = documents::extract_text(bytes, &filename, Some(password), &self.documents).await?;
        info!(message_id, filename = %filename, "document unlocked");

        let analysis = self.assistant.analyze(&content).await;
        let subject = message.header("Subject").map(str::to_string).unwrap_or(filename);
        let updated = self.store.complete_placeholder(
            message_id,
            &subject,
            &analysis.summary,
            &analysis.category,
            analysis.priority_score,
            &analysis.draft_reply,
        )?;
        Ok(updated.into())
    }

    /// Process up to `max_results` unread primary-inbox messages not seen
    /// before, using their bodies only. Failures after authentication are
    /// reported in the returned text.
    pub async fn triage_unread(&self, max_results: u32) -> Result<String, TriageError> {
        let gmail = self.gmail()?;
        info!(max_results, "triage: fetching unread messages");
        match self.triage_with(gmail, max_results).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(error = %e, "triage failed");
                Ok(format!("An error occurred: {e}"))
            }
        }
    }

    async fn triage_with(&self, gmail: &GmailClient, max_results: u32) -> Result<String, TriageError> {
        let ids = gmail.list_message_ids(Some(&self.unread_query), max_results).await?;
        if ids.is_empty() {
            return Ok("No unread 'Primary' messages.".to_string());
        }

        let mut processed = 0usize;
        for id in ids {
            if self.store.exists(&id)? {
                debug!(message_id = %id, "triage: already processed, skipping");
                continue;
            }
            let message = gmail.get_message(&id, MessageFormat::Full).await?;
            let body = message.body_or_snippet();
            let analysis = self.assistant.analyze(&body).await;
            self.store.insert(&new_email(&id, &message.sender(), &message.subject(), analysis))?;
            processed += 1;
            info!(message_id = %id, "triage: processed and stored");
        }
        Ok(format!("Triage complete. Processed {processed} new emails."))
    }

    /// Send `body` as a reply in the thread of message `email_id`.
    pub async fn send_reply(&self, email_id: &str, body: &str) -> Result<Value, TriageError> {
        let gmail = self.gmail()?;
        let original = gmail.get_message(email_id, MessageFormat::Metadata(REPLY_HEADERS)).await?;
        let raw = build_reply_raw(&original, body);
        let sent = gmail.send_raw(&raw, original.thread_id.as_deref()).await?;
        info!(email_id, "reply sent");
        Ok(sent)
    }
}

fn stored_outcome(message_id: &str, existing: EmailRecord) -> ProcessOutcome {
    if existing.encrypted {
        info!(message_id, "email awaiting document password");
        return ProcessOutcome::NeedsPassword {
            filename: existing.subject,
            id: message_id.to_string(),
        };
    }
    debug!(message_id, "email already processed, returning stored record");
    ProcessOutcome::Processed(existing.into())
}

fn new_email(message_id: &str, sender: &str, subject: &str, analysis: Analysis) -> NewEmail {
    NewEmail {
        email_id: message_id.to_string(),
        sender: sender.to_string(),
        subject: subject.to_string(),
        summary: analysis.summary,
        category: analysis.category,
        priority_score: analysis.priority_score,
        draft_reply: analysis.draft_reply,
        encrypted: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmProvider;
    use crate::llm::providers::dummy::DummyProvider;
    use tempfile::TempDir;

    fn offline_triage() -> (TempDir, Triage) {
        let tmp = TempDir::new().unwrap();
        let cfg = Config::test_default(tmp.path());
        let store = EmailStore::open(&cfg.database.path).unwrap();
        let assistant = Assistant::new(LlmProvider::Dummy(DummyProvider), &cfg.triage);
        let triage = Triage::new(None, store, assistant, &cfg);
        (tmp, triage)
    }

    #[tokio::test]
    async fn stored_records_served_without_gmail() {
        let (_tmp, triage) = offline_triage();
        assert!(!triage.is_authenticated());
        triage
            .store()
            .insert(&NewEmail {
                email_id: "m1".into(),
                sender: "a@b.c".into(),
                subject: "Hi".into(),
                summary: "s".into(),
                category: "Work".into(),
                priority_score: 2,
                draft_reply: "d".into(),
                encrypted: false,
            })
            .unwrap();

        match triage.process_email("m1").await.unwrap() {
            ProcessOutcome::Processed(email) => {
                assert_eq!(email.id, "m1");
                assert_eq!(email.priority, 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn placeholder_reports_needs_password() {
        let (_tmp, triage) = offline_triage();
        triage
            .store()
            .insert(&NewEmail::encrypted_placeholder("m2", "a@b.c", "secret.pdf"))
            .unwrap();
        assert_eq!(
            triage.process_email("m2").await.unwrap(),
            ProcessOutcome::NeedsPassword { filename: "secret.pdf".into(), id: "m2".into() }
        );
    }

    #[tokio::test]
    async fn unknown_email_without_gmail_is_not_authenticated() {
        let (_tmp, triage) = offline_triage();
        assert!(matches!(triage.process_email("new").await, Err(TriageError::NotAuthenticated)));
        assert!(matches!(triage.triage_unread(5).await, Err(TriageError::NotAuthenticated)));
        assert!(matches!(triage.send_reply("x", "y").await, Err(TriageError::NotAuthenticated)));
        assert!(matches!(
            triage.process_document("x", "pw").await,
            Err(TriageError::NotAuthenticated)
        ));
    }

    #[test]
    fn user_facing_error_text() {
        assert_eq!(
            TriageError::NotAwaitingPassword.to_string(),
            "Email not found or not marked as encrypted."
        );
        assert_eq!(TriageError::AttachmentMissing.to_string(), "Could not find attachment in email.");
        assert_eq!(TriageError::from(DocumentError::InvalidPassword).to_string(), "Invalid Password");
    }
}
