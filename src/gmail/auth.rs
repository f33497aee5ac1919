//! Google OAuth for the Gmail API.
//!
//! The service never runs the interactive flow itself: `smartmail-auth`
//! performs the installed-app flow once and writes the token file; the
//! service then loads that file and refreshes the access token when it is
//! within 60 seconds of expiry, persisting the refreshed token back.

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::GmailError;
use crate::config::GmailConfig;

pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
];

const REFRESH_MARGIN_SECS: u64 = 60;
const CALLBACK_HEAD_LIMIT: usize = 8192;
const CALLBACK_READ_TIMEOUT: Duration = Duration::from_secs(30);

// ── Client secrets ────────────────────────────────────────────────────────────

/// OAuth client identity, from `credentials.json` and/or the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: Option<String>,
}

#[derive(Deserialize)]
struct SecretsFile {
    installed: Option<SecretsEntry>,
    web: Option<SecretsEntry>,
}

#[derive(Deserialize)]
struct SecretsEntry {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

impl ClientSecrets {
    /// Parse a Google client secrets document (`installed` or `web` shape).
    pub fn parse(json: &str) -> Result<Self, GmailError> {
        let file: SecretsFile = serde_json::from_str(json)
            .map_err(|e| GmailError::Auth(format!("invalid client secrets: {e}")))?;
        let entry = file
            .installed
            .or(file.web)
            .ok_or_else(|| GmailError::Auth("client secrets have no 'installed' or 'web' section".into()))?;
        Ok(Self { client_id: entry.client_id, client_secret: entry.client_secret })
    }

    /// Resolve the client from the configured file, with `GOOGLE_CLIENT_ID` /
    /// `GOOGLE_CLIENT_SECRET` taking precedence. The file is optional when the
    /// id comes from the environment.
    pub fn load(config: &GmailConfig) -> Result<Self, GmailError> {
        let from_file = if config.credentials_file.exists() {
            let raw = fs::read_to_string(&config.credentials_file).map_err(|e| {
                GmailError::Auth(format!("cannot read {}: {e}", config.credentials_file.display()))
            })?;
            Some(Self::parse(&raw)?)
        } else {
            None
        };

        let client_id = config
            .client_id
            .clone()
            .or_else(|| from_file.as_ref().map(|s| s.client_id.clone()))
            .ok_or_else(|| {
                GmailError::Auth(format!(
                    "credentials file not found: {} (download it from the Google Cloud console or set GOOGLE_CLIENT_ID)",
                    config.credentials_file.display()
                ))
            })?;
        let client_secret = config
            .client_secret
            .clone()
            .or_else(|| from_file.and_then(|s| s.client_secret));

        Ok(Self { client_id, client_secret })
    }
}

// ── Token cache ───────────────────────────────────────────────────────────────

/// Contents of the token file.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenCache {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: u64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    token_type: Option<String>,
}

impl TokenCache {
    pub fn load(path: &Path) -> Result<Self, GmailError> {
        let bytes = fs::read(path)
            .map_err(|e| GmailError::Auth(format!("cannot read token file {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GmailError::Auth(format!("invalid token file {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), GmailError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| GmailError::Auth(format!("failed creating token dir: {e}")))?;
        }
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| GmailError::Auth(format!("token serialize failed: {e}")))?;
        fs::write(path, data).map_err(|e| GmailError::Auth(format!("token write failed: {e}")))
    }

    pub fn is_fresh(&self, now: u64) -> bool {
        self.expires_at > now + REFRESH_MARGIN_SECS
    }

    /// Merge a token endpoint reply. Google omits the refresh token on
    /// refresh, so the previous one is kept.
    fn from_response(resp: TokenResponse, previous_refresh: Option<String>, now: u64) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.or(previous_refresh),
            expires_at: now + resp.expires_in.unwrap_or(3600),
            scope: resp.scope,
            token_type: resp.token_type,
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

// ── Token endpoint ────────────────────────────────────────────────────────────

async fn post_token_form(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, String)],
    what: &str,
) -> Result<TokenResponse, GmailError> {
    let res = http
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| GmailError::Auth(format!("{what} request failed: {e}")))?;

    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(GmailError::Auth(format!("{what} failed ({status}): {body}")));
    }

    res.json::<TokenResponse>()
        .await
        .map_err(|e| GmailError::Auth(format!("{what} parse failed: {e}")))
}

fn client_form<'a>(secrets: &ClientSecrets, mut form: Vec<(&'a str, String)>) -> Vec<(&'a str, String)> {
    form.push(("client_id", secrets.client_id.clone()));
    if let Some(secret) = &secrets.client_secret {
        form.push(("client_secret", secret.clone()));
    }
    form
}

async fn refresh_access_token(
    http: &reqwest::Client,
    token_url: &str,
    secrets: &ClientSecrets,
    refresh_token: &str,
) -> Result<TokenResponse, GmailError> {
    let form = client_form(
        secrets,
        vec![
            ("refresh_token", refresh_token.to_string()),
            ("grant_type", "refresh_token".to_string()),
        ],
    );
    post_token_form(http, token_url, &form, "token refresh").await
}

async fn exchange_code(
    http: &reqwest::Client,
    token_url: &str,
    secrets: &ClientSecrets,
    code: &str,
    code_verifier: &str,
    redirect_uri: &str,
) -> Result<TokenResponse, GmailError> {
    let form = client_form(
        secrets,
        vec![
            ("code", code.to_string()),
            ("code_verifier", code_verifier.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
            ("grant_type", "authorization_code".to_string()),
        ],
    );
    post_token_form(http, token_url, &form, "token exchange").await
}

// ── Refreshing token holder ───────────────────────────────────────────────────

/// Token file + client secrets, refreshed on demand.
pub struct OAuthTokens {
    http: reqwest::Client,
    token_url: String,
    secrets: ClientSecrets,
    token_file: std::path::PathBuf,
    cache: Mutex<TokenCache>,
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("token_url", &self.token_url)
            .field("token_file", &self.token_file)
            .finish_non_exhaustive()
    }
}

impl OAuthTokens {
    /// Load secrets and the token file. Fails when either is missing or invalid.
    pub fn load(config: &GmailConfig, http: reqwest::Client) -> Result<Self, GmailError> {
        let secrets = ClientSecrets::load(config)?;
        let cache = TokenCache::load(&config.token_file)?;
        if cache.refresh_token.is_none() && !cache.is_fresh(now_unix()) {
            return Err(GmailError::Auth(
                "token file is expired and has no refresh token".into(),
            ));
        }
        Ok(Self {
            http,
            token_url: config.token_url.clone(),
            secrets,
            token_file: config.token_file.clone(),
            cache: Mutex::new(cache),
        })
    }

    /// A valid access token, refreshing and persisting first if needed.
    pub async fn access_token(&self) -> Result<String, GmailError> {
        let mut cache = self.cache.lock().await;
        let now = now_unix();
        if cache.is_fresh(now) {
            return Ok(cache.access_token.clone());
        }

        let refresh = cache
            .refresh_token
            .clone()
            .ok_or_else(|| GmailError::Auth("access token expired and no refresh token is stored".into()))?;
        debug!("gmail: refreshing access token");
        let resp = refresh_access_token(&self.http, &self.token_url, &self.secrets, &refresh).await?;
        let refreshed = TokenCache::from_response(resp, Some(refresh), now);
        refreshed.save(&self.token_file)?;
        *cache = refreshed;
        info!(token_file = %self.token_file.display(), "gmail: access token refreshed");
        Ok(cache.access_token.clone())
    }
}

/// Where the client gets bearer tokens from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// A fixed token, for tests and short-lived tooling.
    Static(String),
    OAuth(Arc<OAuthTokens>),
}

impl TokenSource {
    pub async fn access_token(&self) -> Result<String, GmailError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::OAuth(tokens) => tokens.access_token().await,
        }
    }
}

// ── Installed-app flow ────────────────────────────────────────────────────────

fn random_verifier() -> String {
    format!("{}{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn code_challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn build_auth_url(
    auth_url: &str,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> Result<String, GmailError> {
    let mut url = Url::parse(auth_url).map_err(|e| GmailError::Auth(format!("invalid auth URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &SCOPES.join(" "))
        .append_pair("state", state)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256");
    Ok(url.into())
}

fn parse_loopback_redirect_uri(uri: &str) -> Result<(u16, String), GmailError> {
    let parsed = Url::parse(uri).map_err(|e| GmailError::Auth(format!("invalid redirect URI: {e}")))?;
    if parsed.scheme() != "http" {
        return Err(GmailError::Auth("redirect URI must use http loopback".into()));
    }
    let host = parsed.host_str().unwrap_or_default();
    if host != "127.0.0.1" && host != "localhost" {
        return Err(GmailError::Auth("redirect URI host must be 127.0.0.1 or localhost".into()));
    }
    let port = parsed
        .port_or_known_default()
        .ok_or_else(|| GmailError::Auth("redirect URI must include port".into()))?;
    let path = if parsed.path().is_empty() { "/".to_string() } else { parsed.path().to_string() };
    Ok((port, path))
}

fn write_http_page(stream: &mut TcpStream, title: &str, text: &str) {
    let body = format!("<html><body><h1>{title}</h1><p>{text}</p></body></html>");
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

/// Accept one callback on `listener` and return the authorization code.
/// Read until the end of the request head, EOF or the size limit; browsers
/// may split the request across several segments.
fn read_request_head(stream: &mut TcpStream) -> Result<Vec<u8>, GmailError> {
    stream
        .set_read_timeout(Some(CALLBACK_READ_TIMEOUT))
        .map_err(|e| GmailError::Auth(format!("callback socket setup failed: {e}")))?;
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0_u8; 1024];
    while head.len() < CALLBACK_HEAD_LIMIT && !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream
            .read(&mut chunk)
            .map_err(|e| GmailError::Auth(format!("read callback request failed: {e}")))?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
    }
    Ok(head)
}

fn receive_auth_code(listener: TcpListener, expected_state: &str, expected_path: &str) -> Result<String, GmailError> {
    let (mut stream, _) = listener
        .accept()
        .map_err(|e| GmailError::Auth(format!("failed accepting callback connection: {e}")))?;

    let head = read_request_head(&mut stream)?;
    let raw = String::from_utf8_lossy(&head);
    let target = raw
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| GmailError::Auth("invalid callback request line".into()))?;

    let parsed = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|e| GmailError::Auth(format!("failed to parse callback URI: {e}")))?;

    if parsed.path() != expected_path {
        write_http_page(&mut stream, "Wrong callback path", "Return to the terminal.");
        return Err(GmailError::Auth(format!("unexpected callback path: {}", parsed.path())));
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (k, v) in parsed.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.to_string()),
            "state" => state = Some(v.to_string()),
            "error" => error = Some(v.to_string()),
            _ => {}
        }
    }

    if let Some(error) = error {
        write_http_page(&mut stream, "Authorization failed", "Return to the terminal.");
        return Err(GmailError::Auth(format!("authorization denied: {error}")));
    }
    if state.as_deref() != Some(expected_state) {
        write_http_page(&mut stream, "State mismatch", "Return to the terminal.");
        return Err(GmailError::Auth("callback state mismatch".into()));
    }
    let code = code.ok_or_else(|| GmailError::Auth("callback did not include code".into()))?;
    write_http_page(
        &mut stream,
        "SmartMail authorized",
        "You can close this tab and return to the terminal.",
    );
    Ok(code)
}

/// Run the one-time consent flow and write the token file.
///
/// `on_url` receives the consent URL before the browser is opened, so the
/// caller can print it for headless setups.
pub async fn run_installed_app_flow(
    config: &GmailConfig,
    on_url: impl FnOnce(&str),
) -> Result<TokenCache, GmailError> {
    let secrets = ClientSecrets::load(config)?;
    let (port, path) = parse_loopback_redirect_uri(&config.redirect_uri)?;
    let listener = TcpListener::bind(("127.0.0.1", port))
        .map_err(|e| GmailError::Auth(format!("failed to bind callback server on 127.0.0.1:{port}: {e}")))?;

    let state = Uuid::new_v4().to_string();
    let verifier = random_verifier();
    let auth_url = build_auth_url(
        &config.auth_url,
        &secrets.client_id,
        &config.redirect_uri,
        &state,
        &code_challenge_s256(&verifier),
    )?;

    on_url(&auth_url);
    let _ = Command::new("xdg-open").arg(&auth_url).spawn();

    let code = tokio::task::spawn_blocking(move || receive_auth_code(listener, &state, &path))
        .await
        .map_err(|e| GmailError::Auth(format!("callback task join error: {e}")))??;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .map_err(|e| GmailError::Request(format!("failed building HTTP client: {e}")))?;
    let resp = exchange_code(&http, &config.token_url, &secrets, &code, &verifier, &config.redirect_uri).await?;
    let cache = TokenCache::from_response(resp, None, now_unix());
    cache.save(&config.token_file)?;
    Ok(cache)
}
