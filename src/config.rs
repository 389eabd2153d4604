//! Configuration types, built from environment variables with defaults.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Scan pipeline configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// How many days back to look for candidate messages.
    pub lookback_days: u32,
    /// Mailbox labels/folders to scan.
    pub labels: Vec<String>,
    /// Hard cap on messages admitted from a single fetch.
    pub max_emails_per_scan: usize,
    /// Cap on topics per scan, and on contents passed as generation evidence.
    pub max_topics_per_scan: usize,
    /// Minimum extracted content length in bytes to keep a message.
    pub min_content_length: usize,
    /// Maximum extracted content length in bytes; longer text is truncated
    /// at a word boundary.
    pub max_content_length: usize,
    /// Verdicts scoring below this degrade to `excluded`.
    pub relevance_threshold: f32,
    /// Processed-id retention horizon in days; older ids are pruned at the
    /// start of each run.
    pub retention_days: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            labels: vec!["INBOX".to_string()],
            max_emails_per_scan: 100,
            max_topics_per_scan: 10,
            min_content_length: 100,
            max_content_length: 4000,
            relevance_threshold: 0.3,
            retention_days: 90,
        }
    }
}

impl ScanConfig {
    /// Build from `SCAN_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lookback_days: env_parse("SCAN_LOOKBACK_DAYS", defaults.lookback_days),
            labels: env_list("SCAN_LABELS").unwrap_or(defaults.labels),
            max_emails_per_scan: env_parse("SCAN_MAX_EMAILS", defaults.max_emails_per_scan),
            max_topics_per_scan: env_parse("SCAN_MAX_TOPICS", defaults.max_topics_per_scan),
            min_content_length: env_parse("SCAN_MIN_CONTENT_LEN", defaults.min_content_length),
            max_content_length: env_parse("SCAN_MAX_CONTENT_LEN", defaults.max_content_length),
            relevance_threshold: env_parse("SCAN_RELEVANCE_THRESHOLD", defaults.relevance_threshold),
            retention_days: env_parse("SCAN_RETENTION_DAYS", defaults.retention_days),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Scan times as "HH:MM" in the configured timezone.
    pub scan_times: Vec<String>,
    /// Fixed UTC offset: "UTC", "+05:30", "-08:00".
    pub timezone: String,
    /// How often the ticker checks for due slots.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_times: vec!["09:00".to_string(), "18:00".to_string()],
            timezone: "UTC".to_string(),
            tick_interval: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            scan_times: env_list("SCHEDULER_SCAN_TIMES").unwrap_or(defaults.scan_times),
            timezone: std::env::var("SCHEDULER_TIMEZONE").unwrap_or(defaults.timezone),
            tick_interval: Duration::from_secs(env_parse(
                "SCHEDULER_TICK_SECS",
                defaults.tick_interval.as_secs(),
            )),
        }
    }
}

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

/// AI provider configuration.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl AiConfig {
    /// Build from environment. `ANTHROPIC_API_KEY` or `OPENAI_API_KEY` is
    /// required; `AI_BACKEND` picks between them when both are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match std::env::var("AI_BACKEND").as_deref() {
            Ok("openai") => LlmBackend::OpenAi,
            Ok("anthropic") | Err(_) => LlmBackend::Anthropic,
            Ok(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "AI_BACKEND".into(),
                    message: format!("unknown backend '{other}'"),
                });
            }
        };

        let key_var = match backend {
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
            LlmBackend::OpenAi => "OPENAI_API_KEY",
        };
        let api_key = std::env::var(key_var)
            .map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let model = std::env::var("AI_MODEL").unwrap_or_else(|_| match backend {
            LlmBackend::Anthropic => "claude-sonnet-4-20250514".to_string(),
            LlmBackend::OpenAi => "gpt-4o".to_string(),
        });

        Ok(Self {
            backend,
            api_key: SecretString::from(api_key),
            model,
            max_tokens: env_parse("AI_MAX_TOKENS", 1024),
            temperature: env_parse("AI_TEMPERATURE", 0.7),
        })
    }
}

/// Retry policy knobs, consumed by `retry::call_with_retry`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_parse("RETRY_MAX_RETRIES", defaults.max_retries),
            base_delay: Duration::from_secs(env_parse(
                "RETRY_BASE_DELAY_SECS",
                defaults.base_delay.as_secs(),
            )),
            max_delay: Duration::from_secs(env_parse(
                "RETRY_MAX_DELAY_SECS",
                defaults.max_delay.as_secs(),
            )),
            attempt_timeout: Duration::from_secs(env_parse(
                "RETRY_ATTEMPT_TIMEOUT_SECS",
                defaults.attempt_timeout.as_secs(),
            )),
            jitter: env_parse("RETRY_JITTER", false),
        }
    }
}

/// Notification configuration.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Email destination for scan summaries. `None` disables email delivery.
    pub email_to: Option<String>,
    /// Webhook URL for JSON summaries. `None` disables webhook delivery.
    pub webhook_url: Option<String>,
    /// Notify when a run produced topics.
    pub on_topics: bool,
    /// Notify when a run failed.
    pub on_errors: bool,
}

impl NotifyConfig {
    pub fn from_env() -> Self {
        Self {
            email_to: std::env::var("NOTIFY_EMAIL").ok().filter(|s| !s.is_empty()),
            webhook_url: std::env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|s| !s.is_empty()),
            on_topics: env_parse("NOTIFY_ON_TOPICS", true),
            on_errors: env_parse("NOTIFY_ON_ERRORS", true),
        }
    }
}

// ── env helpers ─────────────────────────────────────────────────────

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_list(var: &str) -> Option<Vec<String>> {
    let raw = std::env::var(var).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() { None } else { Some(items) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_defaults() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.lookback_days, 7);
        assert_eq!(cfg.max_emails_per_scan, 100);
        assert_eq!(cfg.labels, vec!["INBOX"]);
        assert!((cfg.relevance_threshold - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn retry_defaults_match_policy_contract() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.base_delay, Duration::from_secs(1));
        assert!(!cfg.jitter);
    }

    #[test]
    fn scheduler_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.scan_times.len(), 2);
        assert_eq!(cfg.timezone, "UTC");
    }
}
