//! Blog-topic generation on top of `LlmProvider`.
//!
//! Builds a single prompt from the extracted contents, asks for a strict
//! JSON response, and assembles validated `Topic` values. Retries wrap the
//! provider call; a parse failure is not retried since re-sending the same
//! prompt rarely fixes a malformed reply.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{AiConfig, RetryConfig};
use crate::error::GenerationError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{Category, Difficulty, ExtractedContent, Topic};
use crate::retry::{RetryError, call_with_retry};

/// Per-source excerpt budget inside the prompt, in bytes.
const EXCERPT_LIMIT: usize = 500;

const SYSTEM_PROMPT: &str = "You are an editorial assistant who turns email \
reading material into blog-post ideas. Respond with JSON only, no prose and \
no markdown fences.";

pub struct TopicGenerator {
    provider: Arc<dyn LlmProvider>,
    ai: AiConfig,
    retry: RetryConfig,
    max_topics: usize,
}

impl TopicGenerator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        ai: AiConfig,
        retry: RetryConfig,
        max_topics: usize,
    ) -> Self {
        Self {
            provider,
            ai,
            retry,
            max_topics,
        }
    }

    /// Generate topics from extracted contents. Returns at most
    /// `max_topics` validated topics; invalid entries in the response are
    /// skipped or coerced, never fatal.
    pub async fn generate(
        &self,
        contents: &[ExtractedContent],
    ) -> Result<Vec<Topic>, GenerationError> {
        if contents.is_empty() {
            return Ok(Vec::new());
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_prompt(contents, self.max_topics)),
        ])
        .with_max_tokens(self.ai.max_tokens)
        .with_temperature(self.ai.temperature);

        let response = call_with_retry("topic_generation", &self.retry, || {
            self.provider.complete(request.clone())
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => {
                GenerationError::Exhausted { attempts, last }
            }
            RetryError::Fatal(last) => GenerationError::Llm(last),
        })?;

        debug!(
            model = self.provider.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Topic generation completed"
        );

        let mut topics = parse_topics(&response.content)?;
        topics.truncate(self.max_topics);
        Ok(topics)
    }
}

/// Build the user prompt: one block per source, separated by `---`.
fn build_prompt(contents: &[ExtractedContent], max_topics: usize) -> String {
    let mut prompt = format!(
        "Based on the following email content, suggest up to {max_topics} \
blog post topics. Respond with a JSON object of the form:\n\
{{\"topics\": [{{\"title\": \"...\", \"description\": \"...\", \
\"keywords\": [\"...\"], \"difficulty\": \"beginner|intermediate|advanced\", \
\"category\": \"tech|newsletter|social|professional\"}}]}}\n\n"
    );

    for content in contents {
        prompt.push_str(&format!(
            "From: {}\nSubject: {}\nCategory: {}\nContent: {}\n---\n",
            content.sender,
            content.subject,
            content.category.as_str(),
            excerpt(&content.text),
        ));
    }
    prompt
}

fn excerpt(text: &str) -> &str {
    if text.len() <= EXCERPT_LIMIT {
        return text;
    }
    let mut end = EXCERPT_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[derive(Debug, Deserialize)]
struct TopicsEnvelope {
    topics: Vec<RawTopic>,
}

#[derive(Debug, Deserialize)]
struct RawTopic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    difficulty: String,
    #[serde(default)]
    category: String,
}

/// Parse and validate a topic response.
///
/// Tolerates markdown fences and surrounding prose. Entries missing a title
/// or description are dropped; unknown difficulty coerces to intermediate
/// and unknown category to tech, so a sloppy reply never loses a usable
/// suggestion.
fn parse_topics(raw: &str) -> Result<Vec<Topic>, GenerationError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| GenerationError::BadResponse("no JSON object in response".to_string()))?;

    let envelope: TopicsEnvelope = serde_json::from_str(json)
        .map_err(|e| GenerationError::BadResponse(format!("invalid topics JSON: {e}")))?;

    let mut topics = Vec::with_capacity(envelope.topics.len());
    for raw in envelope.topics {
        let title = raw.title.trim();
        let description = raw.description.trim();
        if title.is_empty() || description.is_empty() {
            warn!("Skipping topic with empty title or description");
            continue;
        }

        let difficulty = Difficulty::parse(&raw.difficulty).unwrap_or_else(|| {
            warn!(value = %raw.difficulty, "Unknown difficulty, coercing to intermediate");
            Difficulty::Intermediate
        });
        let category = match Category::parse(&raw.category) {
            Some(Category::Excluded) | None => {
                warn!(value = %raw.category, "Unknown category, coercing to tech");
                Category::Tech
            }
            Some(category) => category,
        };

        topics.push(Topic {
            title: title.to_string(),
            description: description.to_string(),
            difficulty,
            category,
            keywords: raw.keywords,
        });
    }
    Ok(topics)
}

/// Locate the outermost JSON object, skipping markdown fences and any text
/// around it.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use secrecy::SecretString;

    use super::*;
    use crate::config::LlmBackend;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;

    struct ScriptedProvider {
        responses: Mutex<Vec<Result<String, LlmError>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let next = self.responses.lock().unwrap().remove(0);
            next.map(|content| CompletionResponse {
                content,
                input_tokens: 100,
                output_tokens: 50,
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn generator(provider: ScriptedProvider) -> TopicGenerator {
        let ai = AiConfig {
            backend: LlmBackend::Anthropic,
            api_key: SecretString::from("test"),
            model: "scripted".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
        };
        let retry = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_secs(5),
            jitter: false,
        };
        TopicGenerator::new(Arc::new(provider), ai, retry, 10)
    }

    fn content(subject: &str) -> ExtractedContent {
        ExtractedContent {
            message_id: "m1".into(),
            sender: "digest@github.com".into(),
            subject: subject.into(),
            category: Category::Tech,
            text: "A longer body about software engineering practices.".into(),
        }
    }

    const GOOD_RESPONSE: &str = r#"{"topics": [{"title": "Rust error handling",
        "description": "Patterns for fallible APIs", "keywords": ["rust", "errors"],
        "difficulty": "intermediate", "category": "tech"}]}"#;

    #[tokio::test]
    async fn generates_topics_from_contents() {
        let r#gen = generator(ScriptedProvider::new(vec![Ok(GOOD_RESPONSE.to_string())]));
        let topics = r#gen.generate(&[content("Weekly digest")]).await.unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "Rust error handling");
        assert_eq!(topics[0].difficulty, Difficulty::Intermediate);
    }

    #[tokio::test]
    async fn empty_contents_skip_the_provider() {
        let r#gen = generator(ScriptedProvider::new(vec![]));
        let topics = r#gen.generate(&[]).await.unwrap();
        assert!(topics.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_are_retried() {
        let r#gen = generator(ScriptedProvider::new(vec![
            Err(LlmError::RateLimited {
                provider: "scripted".into(),
            }),
            Ok(GOOD_RESPONSE.to_string()),
        ]));
        let topics = r#gen.generate(&[content("Digest")]).await.unwrap();
        assert_eq!(topics.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_exhausts() {
        let rate_limited = || {
            Err(LlmError::RateLimited {
                provider: "scripted".into(),
            })
        };
        let r#gen = generator(ScriptedProvider::new(vec![
            rate_limited(),
            rate_limited(),
            rate_limited(),
        ]));
        let err = r#gen.generate(&[content("Digest")]).await.unwrap_err();
        match err {
            GenerationError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let r#gen = generator(ScriptedProvider::new(vec![Err(LlmError::AuthFailed {
            provider: "scripted".into(),
        })]));
        let err = r#gen.generate(&[content("Digest")]).await.unwrap_err();
        assert!(matches!(err, GenerationError::Llm(LlmError::AuthFailed { .. })));
    }

    #[test]
    fn parses_fenced_response() {
        let raw = format!("Here you go:\n```json\n{GOOD_RESPONSE}\n```\nEnjoy!");
        let topics = parse_topics(&raw).unwrap();
        assert_eq!(topics.len(), 1);
    }

    #[test]
    fn skips_entries_missing_title_or_description() {
        let raw = r#"{"topics": [
            {"title": "", "description": "no title", "difficulty": "beginner", "category": "tech"},
            {"title": "Kept", "description": "ok", "difficulty": "beginner", "category": "tech"}
        ]}"#;
        let topics = parse_topics(raw).unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].title, "Kept");
    }

    #[test]
    fn coerces_unknown_difficulty_and_category() {
        let raw = r#"{"topics": [{"title": "T", "description": "D",
            "difficulty": "wizard", "category": "sports"}]}"#;
        let topics = parse_topics(raw).unwrap();
        assert_eq!(topics[0].difficulty, Difficulty::Intermediate);
        assert_eq!(topics[0].category, Category::Tech);
    }

    #[test]
    fn non_json_response_is_bad_response() {
        assert!(matches!(
            parse_topics("I could not find any topics."),
            Err(GenerationError::BadResponse(_))
        ));
    }

    #[test]
    fn prompt_includes_all_sources_with_separators() {
        let contents = vec![content("First"), content("Second")];
        let prompt = build_prompt(&contents, 10);
        assert!(prompt.contains("Subject: First"));
        assert!(prompt.contains("Subject: Second"));
        assert_eq!(prompt.matches("---").count(), 2);
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = "x".repeat(2000);
        assert_eq!(excerpt(&long).len(), EXCERPT_LIMIT);
        assert_eq!(excerpt("short"), "short");
    }
}
