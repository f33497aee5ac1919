//! `emails` table: one row per processed Gmail message.
//!
//! A row is either a finished record (summary, category, draft filled in) or
//! a placeholder (`encrypted = 1`) written when an attachment turned out to be
//! password-protected. Placeholders are completed in place by
//! [`EmailStore::complete_placeholder`].
//!
//! Timestamps are RFC 3339 UTC strings with second precision, so lexical
//! comparison in SQL matches chronological order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use super::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS emails (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    email_id       TEXT    NOT NULL UNIQUE,
    sender         TEXT    NOT NULL,
    subject        TEXT    NOT NULL,
    summary        TEXT    NOT NULL,
    category       TEXT    NOT NULL,
    priority_score INTEGER NOT NULL,
    draft_reply    TEXT    NOT NULL,
    encrypted      INTEGER NOT NULL DEFAULT 0,
    timestamp      TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_emails_timestamp ON emails (timestamp);
";

const COLUMNS: &str =
    "id, email_id, sender, subject, summary, category, priority_score, draft_reply, encrypted, timestamp";

/// A stored row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailRecord {
    pub id: i64,
    /// Gmail message id.
    pub email_id: String,
    pub sender: String,
    pub subject: String,
    pub summary: String,
    pub category: String,
    pub priority_score: i64,
    pub draft_reply: String,
    /// `true` while the row is a placeholder waiting for a document password.
    pub encrypted: bool,
    pub timestamp: String,
}

/// Insert payload.
#[derive(Debug, Clone)]
pub struct NewEmail {
    pub email_id: String,
    pub sender: String,
    pub subject: String,
    pub summary: String,
    pub category: String,
    pub priority_score: i64,
    pub draft_reply: String,
    pub encrypted: bool,
}

impl NewEmail {
    /// Placeholder for a message whose attachment needs a password.
    /// The filename is kept in `subject` so the add-on can show it.
    pub fn encrypted_placeholder(email_id: &str, sender: &str, filename: &str) -> Self {
        Self {
            email_id: email_id.to_string(),
            sender: sender.to_string(),
            subject: filename.to_string(),
            summary: "[Encrypted File]".to_string(),
            category: "Encrypted".to_string(),
            priority_score: 3,
            draft_reply: "[File is encrypted]".to_string(),
            encrypted: true,
        }
    }
}

/// One line of the daily digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestEntry {
    pub subject: String,
    pub sender: String,
    pub summary: String,
}

/// Handle on the SQLite database. Cheap to clone; a connection is opened
/// per operation.
#[derive(Debug, Clone)]
pub struct EmailStore {
    db_path: PathBuf,
}

impl EmailStore {
    /// Open (creating if needed) the database at `db_path` and ensure the schema.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let store = Self { db_path: db_path.to_path_buf() };
        store.open_conn()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_conn(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            StoreError::Database(format!("cannot open {}: {e}", self.db_path.display()))
        })?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn get(&self, email_id: &str) -> Result<Option<EmailRecord>, StoreError> {
        let conn = self.open_conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM emails WHERE email_id = ?1"),
                params![email_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn exists(&self, email_id: &str) -> Result<bool, StoreError> {
        let conn = self.open_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM emails WHERE email_id = ?1",
                params![email_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a row stamped with the current time.
    pub fn insert(&self, email: &NewEmail) -> Result<EmailRecord, StoreError> {
        self.insert_at(email, Utc::now())
    }

    /// Insert a row with an explicit timestamp.
    pub fn insert_at(&self, email: &NewEmail, at: DateTime<Utc>) -> Result<EmailRecord, StoreError> {
        let conn = self.open_conn()?;
        let result = conn.execute(
            "INSERT INTO emails (email_id, sender, subject, summary, category, priority_score, draft_reply, encrypted, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                email.email_id,
                email.sender,
                email.subject,
                email.summary,
                email.category,
                email.priority_score,
                email.draft_reply,
                email.encrypted,
                format_timestamp(at),
            ],
        );
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Duplicate(email.email_id.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM emails WHERE id = ?1"),
            params![id],
            row_to_record,
        )
        .map_err(StoreError::from)
    }

    /// Fill in a placeholder with processed results and clear its `encrypted` flag.
    pub fn complete_placeholder(
        &self,
        email_id: &str,
        subject: &str,
        summary: &str,
        category: &str,
        priority_score: i64,
        draft_reply: &str,
    ) -> Result<EmailRecord, StoreError> {
        let conn = self.open_conn()?;
        let changed = conn.execute(
            "UPDATE emails
             SET subject = ?2, summary = ?3, category = ?4, priority_score = ?5,
                 draft_reply = ?6, encrypted = 0
             WHERE email_id = ?1",
            params![email_id, subject, summary, category, priority_score, draft_reply],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(email_id.to_string()));
        }
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM emails WHERE email_id = ?1"),
            params![email_id],
            row_to_record,
        )
        .map_err(StoreError::from)
    }

    /// Rows stored at or after `since`, highest priority first, newest first on ties.
    pub fn top_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<EmailRecord>, StoreError> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM emails
             WHERE timestamp >= ?1
             ORDER BY priority_score DESC, timestamp DESC, id DESC
             LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![format_timestamp(since), limit], row_to_record)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Today's digest: rows since `since`, grouped by category, at most
    /// `top_n` per category, each group ordered by priority.
    pub fn digest_since(
        &self,
        since: DateTime<Utc>,
        top_n: usize,
    ) -> Result<BTreeMap<String, Vec<DigestEntry>>, StoreError> {
        let mut digest: BTreeMap<String, Vec<DigestEntry>> = BTreeMap::new();
        for record in self.top_since(since, usize::MAX)? {
            let entries = digest.entry(record.category).or_default();
            if entries.len() < top_n {
                entries.push(DigestEntry {
                    subject: record.subject,
                    sender: record.sender,
                    summary: record.summary,
                });
            }
        }
        Ok(digest)
    }

    /// Number of rows per category over the whole table.
    pub fn category_counts(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        let conn = self.open_conn()?;
        let mut stmt = conn.prepare("SELECT category, COUNT(*) FROM emails GROUP BY category")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        rows.collect::<Result<BTreeMap<_, _>, _>>().map_err(StoreError::from)
    }
}

/// Midnight UTC of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<EmailRecord> {
    Ok(EmailRecord {
        id: row.get(0)?,
        email_id: row.get(1)?,
        sender: row.get(2)?,
        subject: row.get(3)?,
        summary: row.get(4)?,
        category: row.get(5)?,
        priority_score: row.get(6)?,
        draft_reply: row.get(7)?,
        encrypted: row.get(8)?,
        timestamp: row.get(9)?,
    })
}
