//! Email source: IMAP over TLS for fetching candidate newsletters.
//!
//! Blocking I/O runs inside `spawn_blocking`; the session protocol lives in
//! [`super::imap`].

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, PartType};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::imap::ImapSession;
use crate::channels::{MessageSource, Selector};
use crate::config::{ConfigLookup, parse_var, required_var};
use crate::error::{ConfigError, SourceError};
use crate::pipeline::types::RawMessage;

// ── Configuration ───────────────────────────────────────────────────

/// Mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    /// Mailbox or label to select (e.g. `INBOX`, `Newsletters`).
    pub mailbox: String,
    pub allowed_senders: Vec<String>,
    pub selector: Selector,
    pub batch_size: usize,
}

impl MailboxConfig {
    pub fn from_lookup(lookup: &ConfigLookup<'_>) -> Result<Self, ConfigError> {
        let imap_host = required_var(lookup, "EMAIL_IMAP_HOST")?;
        let imap_port = parse_var(lookup, "EMAIL_IMAP_PORT", 993)?;
        let username = lookup("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(lookup("EMAIL_PASSWORD").unwrap_or_default());
        let mailbox = lookup("EMAIL_MAILBOX").unwrap_or_else(|| "INBOX".to_string());

        let allowed_senders: Vec<String> = lookup("EMAIL_ALLOWED_SENDERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let selector = match lookup("EMAIL_SELECTOR") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "EMAIL_SELECTOR".into(),
                message,
            })?,
            None => Selector::All,
        };

        let batch_size: usize = parse_var(lookup, "EMAIL_BATCH_SIZE", 10)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_BATCH_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            imap_host,
            imap_port,
            username,
            password,
            mailbox,
            allowed_senders,
            selector,
            batch_size,
        })
    }
}

// ── Source ──────────────────────────────────────────────────────────

/// IMAP-backed [`MessageSource`].
pub struct ImapSource {
    config: MailboxConfig,
}

impl ImapSource {
    pub fn new(config: MailboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MessageSource for ImapSource {
    fn name(&self) -> &str {
        "imap"
    }

    async fn fetch(
        &self,
        batch_limit: usize,
        selector: Selector,
    ) -> Result<Vec<RawMessage>, SourceError> {
        let cfg = self.config.clone();
        info!(
            host = %cfg.imap_host,
            mailbox = %cfg.mailbox,
            selector = selector.search_criterion(),
            batch_limit,
            "Fetching candidate messages"
        );
        tokio::task::spawn_blocking(move || fetch_imap(&cfg, batch_limit, selector))
            .await
            .map_err(|e| SourceError::Protocol(format!("IMAP fetch task panicked: {e}")))?
    }
}

// ── Helpers (public for testing) ────────────────────────────────────

/// Check whether a sender is on the allow-list.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - otherwise → case-insensitive substring match of any entry, so
///   `Hugo <hugo@x.com>` matches `hugo@x.com` and `@x.com`
pub fn is_sender_allowed(allowed: &[String], sender: &str) -> bool {
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let sender_lower = sender.to_lowercase();
    allowed
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .any(|a| sender_lower.contains(&a.to_lowercase()))
}

/// Parse an RFC 822 message into a [`RawMessage`].
///
/// Returns `None` when the bytes are not a message or carry no `Date` header
/// (no stable identity can be derived without one).
pub fn parse_raw_message(raw: &[u8]) -> Option<RawMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let date = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))?;

    let mut body_html = String::new();
    let mut body_text = String::new();
    for part in &parsed.parts {
        match &part.body {
            PartType::Html(html) if body_html.is_empty() => body_html = html.to_string(),
            PartType::Text(text) if body_text.is_empty() => body_text = text.to_string(),
            _ => {}
        }
    }

    let is_multipart = matches!(
        parsed.parts.first().map(|p| &p.body),
        Some(PartType::Multipart(_))
    );

    Some(RawMessage {
        sender: extract_sender(&parsed),
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        date,
        body_html,
        body_text,
        is_multipart,
    })
}

/// Format the `From` header as `Name <addr>`, or just `addr`.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return "unknown".into();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".into(),
    }
}

/// Keep the most recent `limit` ids (the tail), preserving ascending order.
pub fn tail_ids(ids: &[u32], limit: usize) -> &[u32] {
    &ids[ids.len().saturating_sub(limit)..]
}

/// Fetch candidate messages via raw IMAP over TLS (blocking, call from spawn_blocking).
fn fetch_imap(
    config: &MailboxConfig,
    batch_limit: usize,
    selector: Selector,
) -> Result<Vec<RawMessage>, SourceError> {
    let unavailable = |reason: String| SourceError::Unavailable {
        host: config.imap_host.clone(),
        reason,
    };

    // Connect TCP
    let tcp = TcpStream::connect((&*config.imap_host, config.imap_port))
        .map_err(|e| unavailable(format!("connect failed: {e}")))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| unavailable(format!("socket setup failed: {e}")))?;

    // TLS via rustls
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
        .map_err(|e| unavailable(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| unavailable(format!("TLS setup failed: {e}")))?;
    let tls = rustls::StreamOwned::new(conn, tcp);

    let mut session = ImapSession::new(tls);
    session
        .read_greeting()
        .map_err(|e| unavailable(e.to_string()))?;

    let login = session
        .login(&config.username, config.password.expose_secret())
        .map_err(|e| unavailable(e.to_string()))?;
    if !login.is_ok() {
        return Err(unavailable(format!("login rejected: {}", login.text)));
    }

    let select = session
        .select(&config.mailbox)
        .map_err(|e| unavailable(e.to_string()))?;
    if !select.is_ok() {
        return Err(unavailable(format!(
            "cannot select mailbox {}: {}",
            config.mailbox, select.text
        )));
    }

    let ids = session.search(selector.search_criterion())?;
    let batch = tail_ids(&ids, batch_limit);
    debug!(matched = ids.len(), batch = batch.len(), "IMAP search complete");

    let mut results = Vec::with_capacity(batch.len());
    for &seq in batch {
        let Some(raw) = session.fetch_body(seq)? else {
            warn!(seq, "FETCH returned no body");
            continue;
        };
        match parse_raw_message(&raw) {
            Some(msg) => results.push(msg),
            None => warn!(seq, "Skipping unparseable message or message without Date header"),
        }
    }

    if let Err(e) = session.logout() {
        debug!("IMAP logout failed: {e}");
    }

    Ok(results)
}

// ── Tests ───────────────────────────────────────────────────────────
