//! Typed wrapper over the `users/me` Gmail endpoints the service uses.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::auth::{OAuthTokens, TokenSource};
use super::message::{Message, decode_base64url};
use super::GmailError;
use crate::config::GmailConfig;

/// `format` parameter of `messages.get`.
#[derive(Debug, Clone, Copy)]
pub enum MessageFormat<'a> {
    Full,
    /// Headers only, restricted to the named ones.
    Metadata(&'a [&'a str]),
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Clone)]
pub struct GmailClient {
    http: Client,
    base_url: String,
    tokens: TokenSource,
}

impl GmailClient {
    pub fn new(config: &GmailConfig, tokens: TokenSource) -> Result<Self, GmailError> {
        let http = build_http_client(config.timeout_seconds)?;
        Ok(Self::with_http(http, config.api_base_url.clone(), tokens))
    }

    fn with_http(http: Client, base_url: String, tokens: TokenSource) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_string(), tokens }
    }

    /// Client backed by the stored token file. Fails when the operator has
    /// not run `smartmail-auth` yet.
    pub fn from_token_file(config: &GmailConfig) -> Result<Self, GmailError> {
        let http = build_http_client(config.timeout_seconds)?;
        let tokens = OAuthTokens::load(config, http.clone())?;
        Ok(Self::with_http(http, config.api_base_url.clone(), TokenSource::OAuth(tokens.into())))
    }

    pub async fn get_message(&self, id: &str, format: MessageFormat<'_>) -> Result<Message, GmailError> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        match format {
            MessageFormat::Full => params.push(("format", "full")),
            MessageFormat::Metadata(headers) => {
                params.push(("format", "metadata"));
                params.extend(headers.iter().map(|h| ("metadataHeaders", *h)));
            }
        }
        let req = self.http.get(format!("{}/messages/{id}", self.base_url)).query(&params);
        self.send_json(req).await
    }

    /// Ids of `INBOX` messages matching `query`, newest first.
    pub async fn list_message_ids(&self, query: Option<&str>, max_results: u32) -> Result<Vec<String>, GmailError> {
        let bounded = max_results.clamp(1, 100).to_string();
        let mut params: Vec<(&str, &str)> = vec![("labelIds", "INBOX"), ("maxResults", bounded.as_str())];
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            params.push(("q", q));
        }
        debug!(query = ?query, max_results = %bounded, "gmail: listing messages");
        let req = self.http.get(format!("{}/messages", self.base_url)).query(&params);
        let list: ListResponse = self.send_json(req).await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    pub async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>, GmailError> {
        let req = self
            .http
            .get(format!("{}/messages/{message_id}/attachments/{attachment_id}", self.base_url));
        let att: AttachmentResponse = self.send_json(req).await?;
        decode_base64url(&att.data)
    }

    /// `messages.send` with an already-encoded `raw` message.
    pub async fn send_raw(&self, raw: &str, thread_id: Option<&str>) -> Result<Value, GmailError> {
        let mut body = json!({ "raw": raw });
        if let Some(thread_id) = thread_id {
            body["threadId"] = Value::String(thread_id.to_string());
        }
        let req = self.http.post(format!("{}/messages/send", self.base_url)).json(&body);
        self.send_json(req).await
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, GmailError> {
        let token = self.tokens.access_token().await?;
        let res = req
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GmailError::Request(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GmailError::Api { status: status.as_u16(), body });
        }
        res.json::<T>().await.map_err(|e| GmailError::Decode(e.to_string()))
    }
}

fn build_http_client(timeout_seconds: u64) -> Result<Client, GmailError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| GmailError::Request(format!("failed building HTTP client: {e}")))
}
