//! topicscan — turns an email inbox into blog-topic suggestions.
//!
//! The scan pipeline fetches recent mail, classifies it into topical buckets,
//! drops duplicates, extracts clean text, and asks an LLM provider for topic
//! suggestions. A scheduler drives runs at configured times with bounded
//! retries around every external call.

pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod store;
