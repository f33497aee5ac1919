//! Gmail message payloads and the helpers that read them.
//!
//! Only the fields the service reads are modelled; everything else in the
//! API response is ignored by serde.

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::URL_SAFE;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Deserialize;
use tracing::warn;

use super::GmailError;

/// Gmail emits URL-safe base64, sometimes padded and sometimes not.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const HTML_WRAP_WIDTH: usize = 100;

pub fn decode_base64url(data: &str) -> Result<Vec<u8>, GmailError> {
    URL_SAFE_LENIENT
        .decode(data.trim())
        .map_err(|e| GmailError::Decode(format!("invalid base64url data: {e}")))
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A PDF or DOCX attachment located in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub attachment_id: String,
    pub filename: String,
}

// ── Reading ───────────────────────────────────────────────────────────────────

impl Message {
    fn headers(&self) -> &[Header] {
        self.payload.as_ref().map(|p| p.headers.as_slice()).unwrap_or(&[])
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn subject(&self) -> String {
        self.header("Subject").unwrap_or("No Subject").to_string()
    }

    /// Bare sender address taken from the `From` header.
    pub fn sender(&self) -> String {
        parse_sender_email(self.header("From").unwrap_or("No Sender"))
    }

    /// First `text/plain` part, else the first `text/html` part as text.
    pub fn body_text(&self) -> Option<String> {
        let payload = self.payload.as_ref()?;
        if let Some(text) = payload.find_decoded("text/plain") {
            return Some(text);
        }
        let html = payload.find_decoded("text/html")?;
        match html2text::from_read(html.as_bytes(), HTML_WRAP_WIDTH) {
            Ok(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(message_id = %self.id, error = %e, "html body conversion failed");
                None
            }
        }
    }

    /// Body text, falling back to the snippet and then a fixed marker.
    pub fn body_or_snippet(&self) -> String {
        self.body_text()
            .or_else(|| self.snippet.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "[Could not parse body]".to_string())
    }

    pub fn document_attachment(&self) -> Option<AttachmentRef> {
        self.payload.as_ref()?.find_document()
    }
}

impl MessagePart {
    /// Depth-first search for a part of `mime_type` with inline data, decoded as UTF-8.
    fn find_decoded(&self, mime_type: &str) -> Option<String> {
        if self.mime_type.eq_ignore_ascii_case(mime_type) {
            let data = self.body.as_ref().and_then(|b| b.data.as_deref());
            if let Some(data) = data.filter(|d| !d.is_empty()) {
                match decode_base64url(data) {
                    Ok(bytes) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
                    Err(e) => warn!(error = %e, mime_type, "skipping undecodable body part"),
                }
            }
        }
        self.parts.iter().find_map(|p| p.find_decoded(mime_type))
    }

    fn find_document(&self) -> Option<AttachmentRef> {
        if let Some(filename) = self.filename.as_deref().filter(|f| is_document_filename(f)) {
            if let Some(id) = self.body.as_ref().and_then(|b| b.attachment_id.as_deref()) {
                return Some(AttachmentRef {
                    attachment_id: id.to_string(),
                    filename: filename.to_string(),
                });
            }
        }
        self.parts.iter().find_map(MessagePart::find_document)
    }
}

fn is_document_filename(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".pdf") || lower.ends_with(".docx")
}

/// `"Jane <jane@x.org>"` → `"jane@x.org"`; anything without brackets is returned as is.
pub fn parse_sender_email(raw: &str) -> String {
    if raw.contains('<') && raw.contains('>') {
        if let Some(tail) = raw.rsplit('<').next() {
            if let Some(addr) = tail.split('>').next() {
                return addr.to_string();
            }
        }
    }
    raw.to_string()
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// Build the `raw` field for `messages.send`: an RFC 5322 reply to `original`,
/// URL-safe base64 encoded.
///
/// `original` only needs metadata headers (`Subject`, `From`, `Message-ID`).
pub fn build_reply_raw(original: &Message, body: &str) -> String {
    let to = sanitize_header(&original.sender());
    let subject = original.header("Subject").unwrap_or("");
    let subject = if subject.to_ascii_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    };

    let mut headers = vec![
        format!("To: {to}"),
        format!("Subject: {}", encode_header_value(&sanitize_header(&subject))),
    ];
    if let Some(message_id) = original.header("Message-ID") {
        let message_id = sanitize_header(message_id);
        headers.push(format!("In-Reply-To: {message_id}"));
        headers.push(format!("References: {message_id}"));
    }
    headers.push("MIME-Version: 1.0".to_string());
    headers.push("Content-Type: text/plain; charset=\"utf-8\"".to_string());

    let body = body.replace("\r\n", "\n").replace('\n', "\r\n");
    let encoded_body = if body.is_ascii() {
        headers.push("Content-Transfer-Encoding: 7bit".to_string());
        body
    } else {
        headers.push("Content-Transfer-Encoding: base64".to_string());
        wrap_base64(&base64::engine::general_purpose::STANDARD.encode(body.as_bytes()))
    };

    let mime = format!("{}\r\n\r\n{}\r\n", headers.join("\r\n"), encoded_body);
    URL_SAFE.encode(mime.as_bytes())
}

fn sanitize_header(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!(
            "=?utf-8?b?{}?=",
            base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
        )
    }
}

fn wrap_base64(encoded: &str) -> String {
    encoded
        .as_bytes()
        .chunks(76)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}
