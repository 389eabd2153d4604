//! Bridge between rig-core's `CompletionModel` trait and our `LlmProvider`
//! trait.
//!
//! rig models want a prompt plus optional preamble and chat history; our
//! requests are a flat message list. The adapter splits the list: leading
//! system messages become the preamble, the final user message becomes the
//! prompt, everything in between becomes history.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel};
use rig::message::Message;

use crate::error::LlmError;
use crate::llm::{ChatRole, CompletionRequest, CompletionResponse, LlmProvider};

pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }

    fn map_error(&self, err: CompletionError) -> LlmError {
        let reason = err.to_string();
        let lower = reason.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            LlmError::RateLimited {
                provider: self.model_name.clone(),
            }
        } else if lower.contains("401") || lower.contains("unauthorized") {
            LlmError::AuthFailed {
                provider: self.model_name.clone(),
            }
        } else {
            LlmError::RequestFailed {
                provider: self.model_name.clone(),
                reason,
            }
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync,
{
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut preamble: Option<String> = None;
        let mut history: Vec<Message> = Vec::new();
        let mut prompt: Option<String> = None;

        for message in request.messages {
            match message.role {
                ChatRole::System => {
                    // Concatenate multiple system messages into one preamble.
                    preamble = Some(match preamble.take() {
                        Some(existing) => format!("{existing}\n\n{}", message.content),
                        None => message.content,
                    });
                }
                ChatRole::User => {
                    if let Some(previous) = prompt.replace(message.content) {
                        history.push(Message::user(previous));
                    }
                }
                ChatRole::Assistant => {
                    if let Some(previous) = prompt.take() {
                        history.push(Message::user(previous));
                    }
                    history.push(Message::assistant(message.content));
                }
            }
        }

        let prompt = prompt.ok_or_else(|| LlmError::InvalidResponse {
            provider: self.model_name.clone(),
            reason: "completion request has no user message".to_string(),
        })?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens as u64);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature as f64);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if content.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.model_name.clone(),
                reason: "response contained no text content".to_string(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: response.usage.input_tokens as u32,
            output_tokens: response.usage.output_tokens as u32,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
