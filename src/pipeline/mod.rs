//! Scan pipeline: fetch, dedup, classify, extract, generate, assemble.

pub mod classifier;
pub mod dedup;
pub mod extract;
pub mod scan;
pub mod types;

pub use classifier::{Classifier, ClassifierRules};
pub use dedup::Deduplicator;
pub use extract::ContentExtractor;
pub use scan::ScanPipeline;
pub use types::{
    Category, CategoryVerdict, Difficulty, Disposition, EmailMessage, ExtractedContent,
    MessageOutcome, ScanCounters, ScanRun, ScanStatus, Topic,
};
