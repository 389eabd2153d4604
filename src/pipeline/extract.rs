//! Content extraction: strip markup, normalize whitespace, enforce length
//! bounds. Pure per-message transforms; failures are per-message, never
//! run-level.

use tracing::debug;

use crate::config::ScanConfig;
use crate::pipeline::types::{
    Category, EmailMessage, ExtractedContent, ExtractionFailure,
};

/// Extractor over the scan length bounds.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    min_length: usize,
    max_length: usize,
}

impl ContentExtractor {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            min_length: config.min_content_length,
            max_length: config.max_content_length,
        }
    }

    /// Extract prompt-ready text from a classified message.
    ///
    /// Markup is stripped, whitespace collapsed to single spaces, and text
    /// longer than the maximum is truncated at a word boundary. Text shorter
    /// than the minimum after cleaning is rejected.
    pub fn extract(
        &self,
        message: &EmailMessage,
        category: Category,
    ) -> Result<ExtractedContent, ExtractionFailure> {
        let text = normalize(&strip_markup(&message.body));

        if text.is_empty() {
            return Err(ExtractionFailure::Empty);
        }
        if text.len() < self.min_length {
            return Err(ExtractionFailure::TooShort {
                len: text.len(),
                min: self.min_length,
            });
        }

        let text = if text.len() > self.max_length {
            let truncated = truncate_at_word(&text, self.max_length);
            debug!(
                message_id = %message.id,
                original_len = text.len(),
                truncated_len = truncated.len(),
                "Truncated extracted content"
            );
            truncated
        } else {
            text
        };

        Ok(ExtractedContent {
            message_id: message.id.clone(),
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            category,
            text,
        })
    }
}

/// Strip HTML-ish tags (basic). Tolerates malformed markup: an unclosed tag
/// swallows the remainder rather than panicking.
pub fn strip_markup(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                // Keep tags from gluing adjacent words together.
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    decode_entities(&result)
}

/// Decode the handful of entities that matter in email bodies.
fn decode_entities(input: &str) -> String {
    input
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Collapse all whitespace runs to single spaces and trim.
fn normalize(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` bytes, backing up to the last space so no word
/// is cut mid-way. Falls back to a hard char-boundary cut when the text has
/// no spaces.
fn truncate_at_word(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let head = &text[..end];
    match head.rfind(' ') {
        Some(pos) if pos > 0 => head[..pos].to_string(),
        _ => head.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn extractor(min: usize, max: usize) -> ContentExtractor {
        ContentExtractor {
            min_length: min,
            max_length: max,
        }
    }

    fn message(body: &str) -> EmailMessage {
        EmailMessage {
            id: "m1".into(),
            received_at: Utc::now(),
            sender: "a@example.com".into(),
            subject: "Subject".into(),
            body: body.into(),
            labels: vec![],
        }
    }

    #[test]
    fn strips_tags_and_normalizes_whitespace() {
        let msg = message("<div><p>Hello   world</p>\n\n<b>again</b></div> and more words here");
        let out = extractor(5, 4000).extract(&msg, Category::Tech).unwrap();
        assert_eq!(out.text, "Hello world again and more words here");
    }

    #[test]
    fn decodes_common_entities() {
        assert_eq!(strip_markup("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(strip_markup("one&nbsp;two"), "one two");
    }

    #[test]
    fn malformed_markup_does_not_panic() {
        let out = strip_markup("<div unclosed forever and ever");
        assert_eq!(out.trim(), "");
        assert_eq!(strip_markup("orphan > bracket"), "orphan > bracket");
    }

    #[test]
    fn rejects_empty_after_cleaning() {
        let msg = message("<br/><p>   </p>");
        let err = extractor(10, 100).extract(&msg, Category::Tech).unwrap_err();
        assert_eq!(err, ExtractionFailure::Empty);
    }

    #[test]
    fn rejects_too_short_content() {
        let msg = message("tiny");
        let err = extractor(100, 4000)
            .extract(&msg, Category::Tech)
            .unwrap_err();
        assert!(matches!(
            err,
            ExtractionFailure::TooShort { len: 4, min: 100 }
        ));
    }

    #[test]
    fn truncates_at_word_boundary() {
        let text = "alpha beta gamma delta";
        assert_eq!(truncate_at_word(text, 12), "alpha beta");
        assert_eq!(truncate_at_word(text, 100), text);
    }

    #[test]
    fn truncation_never_splits_a_word() {
        let msg = message(&"word ".repeat(100));
        let out = extractor(5, 23).extract(&msg, Category::Tech).unwrap();
        assert!(out.text.len() <= 23);
        assert!(out.text.split(' ').all(|w| w == "word"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "héllo wörld ünïcode everywhere";
        let out = truncate_at_word(text, 15);
        assert!(out.len() <= 15);
        assert!(text.starts_with(&out));
    }
}
