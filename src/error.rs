//! Error types for topicscan.

use std::time::Duration;

use crate::retry::RetryableError;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mail fetch errors. Fatal to the enclosing scan run.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication failed for {user}")]
    AuthFailed { user: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Fetch attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl RetryableError for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout(_))
    }

    fn attempt_timeout(timeout: Duration) -> Self {
        Self::Timeout(timeout)
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RetryableError for LlmError {
    /// Rate limits and timeouts are transient; auth failures and malformed
    /// responses are not worth re-sending.
    fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout(_))
    }

    fn attempt_timeout(timeout: Duration) -> Self {
        Self::Timeout(timeout)
    }
}

/// Topic generation errors. Fatal to the run once retries are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("LLM call failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: LlmError },

    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Unparseable topic response: {0}")]
    BadResponse(String),
}

/// Persistence errors. A run whose outcome cannot be recorded is surfaced
/// as failed, never silently swallowed.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Notification errors. Logged only — never roll back a completed run.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("SMTP send to {to} failed: {reason}")]
    SmtpFailed { to: String, reason: String },

    #[error("Webhook post to {url} failed: {reason}")]
    WebhookFailed { url: String, reason: String },

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
