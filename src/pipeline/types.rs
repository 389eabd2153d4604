//! Shared types for the scan pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Fetched message ─────────────────────────────────────────────────

/// One fetched email. Immutable after fetch; owned by a single scan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Provider-assigned unique id.
    pub id: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Sender address, possibly in "Name <user@host>" form.
    pub sender: String,
    /// Subject line.
    pub subject: String,
    /// Raw body as delivered (plain text or HTML).
    pub body: String,
    /// Label/folder tags the message carries.
    pub labels: Vec<String>,
}

// ── Classification ──────────────────────────────────────────────────

/// Topical bucket for a classified message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tech,
    Newsletter,
    Social,
    Professional,
    Excluded,
}

impl Category {
    /// Tie-break priority: lower wins. tech > newsletter > professional >
    /// social; `Excluded` never competes.
    pub fn priority(self) -> u8 {
        match self {
            Self::Tech => 0,
            Self::Newsletter => 1,
            Self::Professional => 2,
            Self::Social => 3,
            Self::Excluded => u8::MAX,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tech => "tech",
            Self::Newsletter => "newsletter",
            Self::Social => "social",
            Self::Professional => "professional",
            Self::Excluded => "excluded",
        }
    }

    /// Parse a category tag leniently. Unknown tags return `None`; the
    /// caller decides the coercion default.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tech" | "technology" => Some(Self::Tech),
            "newsletter" => Some(Self::Newsletter),
            "social" => Some(Self::Social),
            "professional" | "business" => Some(Self::Professional),
            "excluded" => Some(Self::Excluded),
            _ => None,
        }
    }
}

/// The classifier's decision for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryVerdict {
    pub category: Category,
    /// Relevance in [0, 1]: fraction of configured positive signals matched.
    pub score: f32,
    /// Set iff `category == Excluded`.
    pub exclusion_reason: Option<String>,
}

impl CategoryVerdict {
    pub fn excluded(reason: impl Into<String>) -> Self {
        Self {
            category: Category::Excluded,
            score: 0.0,
            exclusion_reason: Some(reason.into()),
        }
    }
}

// ── Extraction ──────────────────────────────────────────────────────

/// Cleaned message text ready for prompting.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub category: Category,
    pub text: String,
}

/// Why extraction dropped a message. Non-fatal, per-message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionFailure {
    #[error("content too short: {len} bytes, minimum {min}")]
    TooShort { len: usize, min: usize },

    #[error("no content after normalization")]
    Empty,
}

// ── Topics ──────────────────────────────────────────────────────────

/// Blog-post difficulty level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }
}

/// A generated blog-topic suggestion. Immutable once assembled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub category: Category,
    /// Ordered keyword list as returned by the provider.
    pub keywords: Vec<String>,
}

// ── Scan run ────────────────────────────────────────────────────────

/// Terminal and in-flight status of a scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "succeeded" => Self::Succeeded,
            "partial" => Self::Partial,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }
}

/// What happened to one message inside a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Already admitted in a prior run; dropped silently.
    Duplicate,
    /// Classifier verdict was `excluded`.
    FilteredOut { reason: String },
    /// Extractor rejected the content.
    ExtractionFailed { reason: String },
    /// Survived all per-message stages and fed topic generation.
    Extracted { category: Category, score: f32 },
}

/// Per-message outcome record, embedded in the run result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageOutcome {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    #[serde(flatten)]
    pub disposition: Disposition,
}

/// Aggregate per-run counters, persisted for auditing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScanCounters {
    pub fetched: usize,
    pub duplicates: usize,
    pub filtered_out: usize,
    pub extraction_failures: usize,
    pub extracted: usize,
    pub topics: usize,
}

/// One end-to-end pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    pub id: Uuid,
    /// Scheduling slot key ("2026-08-25T09:00+00:00") or "manual".
    pub slot: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ScanStatus,
    pub counters: ScanCounters,
    pub outcomes: Vec<MessageOutcome>,
    /// Run-level errors (fetch/generation/persistence), never per-message.
    pub errors: Vec<String>,
    pub topics: Vec<Topic>,
}

impl ScanRun {
    pub fn new(slot: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            slot: slot.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: ScanStatus::Running,
            counters: ScanCounters::default(),
            outcomes: Vec::new(),
            errors: Vec::new(),
            topics: Vec::new(),
        }
    }

    /// Whether any per-message drop occurred (used for `partial` status).
    pub fn had_message_failures(&self) -> bool {
        self.counters.extraction_failures > 0
    }
}
