//! Mail access — IMAP over TLS for inbound scanning.
//!
//! The pipeline only sees the `MailProvider` trait; the IMAP plumbing lives
//! behind it so tests can swap in scripted providers.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::error::{ConfigError, FetchError};
use crate::pipeline::types::EmailMessage;

// ── Provider trait ──────────────────────────────────────────────────

/// What one scan run asks the mailbox for.
#[derive(Debug, Clone)]
pub struct FetchQuery {
    /// Labels/folders to search, in order.
    pub labels: Vec<String>,
    /// Only messages received at or after this instant.
    pub since: DateTime<Utc>,
    /// Hard cap across all labels.
    pub limit: usize,
}

/// Read-only mailbox access.
#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<EmailMessage>, FetchError>;
}

// ── IMAP configuration ──────────────────────────────────────────────

/// IMAP connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

impl ImapConfig {
    /// Build config from environment variables. `IMAP_HOST` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("IMAP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("IMAP_HOST".to_string()))?;

        let port: u16 = std::env::var("IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("IMAP_USERNAME")
            .map_err(|_| ConfigError::MissingEnvVar("IMAP_USERNAME".to_string()))?;
        let password = std::env::var("IMAP_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("IMAP_PASSWORD".to_string()))?;

        Ok(Self {
            host,
            port,
            username,
            password: SecretString::from(password),
        })
    }
}

// ── IMAP provider ───────────────────────────────────────────────────

/// `MailProvider` backed by raw IMAP over rustls. The blocking protocol
/// exchange runs in `spawn_blocking`.
pub struct ImapMailProvider {
    config: ImapConfig,
}

impl ImapMailProvider {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailProvider for ImapMailProvider {
    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<EmailMessage>, FetchError> {
        let config = self.config.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || fetch_messages_imap(&config, &query))
            .await
            .map_err(|e| FetchError::Protocol(format!("fetch task panicked: {e}")))?
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Fetch messages via raw IMAP over TLS (blocking — run in spawn_blocking).
fn fetch_messages_imap(
    config: &ImapConfig,
    query: &FetchQuery,
) -> Result<Vec<EmailMessage>, FetchError> {
    use std::sync::Arc as StdArc;

    let connect_err = |reason: String| FetchError::Connection {
        host: config.host.clone(),
        reason,
    };

    let tcp = TcpStream::connect((&*config.host, config.port))
        .map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| connect_err(e.to_string()))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = StdArc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name: rustls::pki_types::ServerName<'_> =
        rustls::pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| connect_err(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connect_err(e.to_string()))?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    let _greeting = read_line(&mut tls)?;

    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err(FetchError::AuthFailed {
            user: config.username.clone(),
        });
    }

    // IMAP SINCE is date-granular: "25-Aug-2026".
    let since = query.since.format("%d-%b-%Y").to_string();
    let mut results: Vec<EmailMessage> = Vec::new();
    let mut tag_counter = 2_u32;
    let mut next_tag = move || {
        let tag = format!("A{tag_counter}");
        tag_counter += 1;
        tag
    };

    'labels: for label in &query.labels {
        let select = send_cmd(&mut tls, &next_tag(), &format!("SELECT \"{label}\""))?;
        if !select.last().is_some_and(|l| l.contains("OK")) {
            tracing::warn!(label, "Mailbox select failed, skipping");
            continue;
        }

        let search_resp = send_cmd(&mut tls, &next_tag(), &format!("SEARCH SINCE {since}"))?;
        let mut uids: Vec<String> = Vec::new();
        for line in &search_resp {
            if line.starts_with("* SEARCH") {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() > 2 {
                    uids.extend(parts[2..].iter().map(|s| s.to_string()));
                }
            }
        }

        for uid in &uids {
            if results.len() >= query.limit {
                tracing::debug!(limit = query.limit, "Fetch limit reached");
                break 'labels;
            }

            let fetch_resp = send_cmd(&mut tls, &next_tag(), &format!("FETCH {uid} RFC822"))?;
            let raw: String = fetch_resp
                .iter()
                .skip(1)
                .take(fetch_resp.len().saturating_sub(2))
                .cloned()
                .collect();

            if let Some(message) = parse_message(&raw, label) {
                // SINCE is date-granular; enforce the exact instant here.
                if message.received_at >= query.since {
                    results.push(message);
                }
            }
        }
    }

    let _ = send_cmd(&mut tls, &next_tag(), "LOGOUT");

    Ok(results)
}

/// Parse one raw RFC822 message into an `EmailMessage`. Returns `None` for
/// unparseable input; a broken message never fails the whole fetch.
fn parse_message(raw: &str, label: &str) -> Option<EmailMessage> {
    let parsed = MessageParser::default().parse(raw.as_bytes())?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();

    let body = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        html.to_string()
    } else {
        String::new()
    };

    let id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

    let received_at = parsed
        .date()
        .and_then(|d| {
            chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
                .and_then(|date| {
                    date.and_hms_opt(
                        u32::from(d.hour),
                        u32::from(d.minute),
                        u32::from(d.second),
                    )
                })
                .map(|naive| naive.and_utc())
        })
        .unwrap_or_else(Utc::now);

    Some(EmailMessage {
        id,
        received_at,
        sender,
        subject,
        body,
        labels: vec![label.to_string()],
    })
}

fn read_line(tls: &mut TlsStream) -> Result<String, FetchError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match std::io::Read::read(tls, &mut byte) {
            Ok(0) => {
                return Err(FetchError::Protocol("connection closed".to_string()));
            }
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(e) => return Err(FetchError::Protocol(e.to_string())),
        }
    }
}

fn send_cmd(tls: &mut TlsStream, tag: &str, cmd: &str) -> Result<Vec<String>, FetchError> {
    let full = format!("{tag} {cmd}\r\n");
    IoWrite::write_all(tls, full.as_bytes()).map_err(|e| FetchError::Protocol(e.to_string()))?;
    IoWrite::flush(tls).map_err(|e| FetchError::Protocol(e.to_string()))?;
    let mut lines = Vec::new();
    loop {
        let line = read_line(tls)?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            break;
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_plain_text() {
        let raw = "Message-ID: <abc@mail>\r\nFrom: Alice <alice@example.com>\r\n\
Subject: Hello\r\nDate: Mon, 24 Aug 2026 10:00:00 +0000\r\n\r\nBody text here\r\n";
        let msg = parse_message(raw, "INBOX").unwrap();
        assert_eq!(msg.id, "abc@mail");
        assert_eq!(msg.sender, "alice@example.com");
        assert_eq!(msg.subject, "Hello");
        assert!(msg.body.contains("Body text here"));
        assert_eq!(msg.labels, vec!["INBOX"]);
    }

    #[test]
    fn parse_message_missing_fields_get_defaults() {
        let raw = "From: bob@example.com\r\n\r\nshort\r\n";
        let msg = parse_message(raw, "INBOX").unwrap();
        assert!(msg.id.starts_with("gen-"));
        assert_eq!(msg.subject, "(no subject)");
    }

    #[test]
    fn config_from_env_requires_host() {
        // SAFETY: no other thread reads IMAP_HOST concurrently in this test.
        unsafe { std::env::remove_var("IMAP_HOST") };
        assert!(matches!(
            ImapConfig::from_env(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn since_format_is_imap_date() {
        let dt = DateTime::parse_from_rfc3339("2026-08-25T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(dt.format("%d-%b-%Y").to_string(), "25-Aug-2026");
    }
}
