//! Scan-result notifications — SMTP via lettre, webhooks via reqwest.
//!
//! Delivery failures are logged by the caller and never affect a completed
//! run.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::error::{ConfigError, NotificationError};
use crate::pipeline::types::{ScanRun, ScanStatus};

// ── Summary ─────────────────────────────────────────────────────────

/// What a notification carries about one finished run.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub run_id: String,
    pub slot: String,
    pub status: ScanStatus,
    pub fetched: usize,
    pub topic_count: usize,
    pub topics: Vec<SummaryTopic>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryTopic {
    pub title: String,
    pub description: String,
    pub difficulty: String,
    pub category: String,
}

impl ScanSummary {
    pub fn from_run(run: &ScanRun) -> Self {
        Self {
            run_id: run.id.to_string(),
            slot: run.slot.clone(),
            status: run.status,
            fetched: run.counters.fetched,
            topic_count: run.topics.len(),
            topics: run
                .topics
                .iter()
                .map(|t| SummaryTopic {
                    title: t.title.clone(),
                    description: t.description.clone(),
                    difficulty: t.difficulty.as_str().to_string(),
                    category: t.category.as_str().to_string(),
                })
                .collect(),
            errors: run.errors.clone(),
        }
    }

    /// Plain-text rendering for email bodies.
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "Scan {} ({})\nStatus: {}\nEmails fetched: {}\nTopics: {}\n",
            self.run_id,
            self.slot,
            self.status.as_str(),
            self.fetched,
            self.topic_count,
        );

        if !self.topics.is_empty() {
            out.push('\n');
            for (i, topic) in self.topics.iter().enumerate() {
                out.push_str(&format!(
                    "{}. {} [{}/{}]\n   {}\n",
                    i + 1,
                    topic.title,
                    topic.category,
                    topic.difficulty,
                    topic.description,
                ));
            }
        }

        if !self.errors.is_empty() {
            out.push_str("\nErrors:\n");
            for error in &self.errors {
                out.push_str(&format!("- {error}\n"));
            }
        }

        out
    }

    pub fn subject(&self) -> String {
        match self.status {
            ScanStatus::Failed => format!("Scan failed ({})", self.slot),
            _ => {
                let noun = if self.topic_count == 1 {
                    "blog topic suggestion"
                } else {
                    "blog topic suggestions"
                };
                format!("{} {noun} ({})", self.topic_count, self.slot)
            }
        }
    }
}

// ── Notifier trait ──────────────────────────────────────────────────

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, summary: &ScanSummary) -> Result<(), NotificationError>;
}

// ── Email ───────────────────────────────────────────────────────────

/// SMTP settings for outbound summary emails.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("SMTP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("SMTP_HOST".to_string()))?;
        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("SMTP_PASSWORD").unwrap_or_default();
        let from_address =
            std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Ok(Self {
            host,
            port,
            username,
            password: SecretString::from(password),
            from_address,
        })
    }
}

/// Sends run summaries by email. The blocking lettre transport runs in
/// `spawn_blocking`.
pub struct EmailNotifier {
    config: SmtpConfig,
    to: String,
}

impl EmailNotifier {
    pub fn new(config: SmtpConfig, to: String) -> Self {
        Self { config, to }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn notify(&self, summary: &ScanSummary) -> Result<(), NotificationError> {
        let config = self.config.clone();
        let to = self.to.clone();
        let subject = summary.subject();
        let body = summary.render_text();

        tokio::task::spawn_blocking(move || send_email(&config, &to, &subject, &body))
            .await
            .map_err(|e| NotificationError::SmtpFailed {
                to: self.to.clone(),
                reason: format!("send task panicked: {e}"),
            })?
    }
}

fn send_email(
    config: &SmtpConfig,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<(), NotificationError> {
    let smtp_err = |reason: String| NotificationError::SmtpFailed {
        to: to.to_string(),
        reason,
    };

    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::relay(&config.host)
        .map_err(|e| smtp_err(format!("SMTP relay error: {e}")))?
        .port(config.port)
        .credentials(creds)
        .build();

    let email = Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| NotificationError::InvalidDestination(format!("from address: {e}")))?,
        )
        .to(to
            .parse()
            .map_err(|e| NotificationError::InvalidDestination(format!("to address: {e}")))?)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| smtp_err(format!("Failed to build email: {e}")))?;

    transport
        .send(&email)
        .map_err(|e| smtp_err(format!("SMTP send failed: {e}")))?;

    tracing::info!("Summary email sent to {to}");
    Ok(())
}

// ── Webhook ─────────────────────────────────────────────────────────

/// Posts run summaries as JSON to a webhook URL.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, summary: &ScanSummary) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(summary)
            .send()
            .await
            .map_err(|e| NotificationError::WebhookFailed {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(NotificationError::WebhookFailed {
                url: self.url.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        tracing::info!(url = %self.url, "Summary posted to webhook");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Category, Difficulty, ScanRun, Topic};

    fn run_with_topics() -> ScanRun {
        let mut run = ScanRun::new("2026-08-25T09:00+00:00");
        run.status = ScanStatus::Succeeded;
        run.counters.fetched = 12;
        run.topics = vec![Topic {
            title: "Rust retry patterns".into(),
            description: "Backoff done right".into(),
            difficulty: Difficulty::Intermediate,
            category: Category::Tech,
            keywords: vec!["rust".into()],
        }];
        run
    }

    #[test]
    fn summary_text_lists_topics() {
        let summary = ScanSummary::from_run(&run_with_topics());
        let text = summary.render_text();
        assert!(text.contains("Status: succeeded"));
        assert!(text.contains("1. Rust retry patterns [tech/intermediate]"));
        assert!(!text.contains("Errors:"));
    }

    #[test]
    fn summary_text_includes_errors_on_failure() {
        let mut run = run_with_topics();
        run.status = ScanStatus::Failed;
        run.topics.clear();
        run.errors.push("fetch exhausted".into());

        let summary = ScanSummary::from_run(&run);
        let text = summary.render_text();
        assert!(text.contains("Status: failed"));
        assert!(text.contains("- fetch exhausted"));
    }

    #[test]
    fn subject_reflects_status() {
        let ok = ScanSummary::from_run(&run_with_topics());
        assert_eq!(
            ok.subject(),
            "1 blog topic suggestion (2026-08-25T09:00+00:00)"
        );

        let mut run = run_with_topics();
        run.status = ScanStatus::Failed;
        let failed = ScanSummary::from_run(&run);
        assert!(failed.subject().starts_with("Scan failed"));
    }

    #[test]
    fn subject_pluralizes_topic_count() {
        let mut run = run_with_topics();
        run.topics.push(run.topics[0].clone());
        let summary = ScanSummary::from_run(&run);
        assert!(summary.subject().starts_with("2 blog topic suggestions"));
    }

    #[test]
    fn summary_serializes_for_webhook() {
        let summary = ScanSummary::from_run(&run_with_topics());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["topics"][0]["title"], "Rust retry patterns");
    }
}
