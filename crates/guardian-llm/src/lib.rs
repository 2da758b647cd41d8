//! The generation capability the chat pipeline depends on.
//!
//! The pipeline only needs "messages in, stream of role/content chunks out";
//! [`Generator`] is that seam. [`OpenAiGenerator`] talks to any
//! OpenAI-compatible chat completions endpoint, and tests script their own.

mod openai;
mod topics;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use uuid::Uuid;

use guardian_types::models::{ChatMessage, Role, TokenUsage};

pub use openai::{OpenAiConfig, OpenAiGenerator};
pub use topics::{GeneratorTopicExtractor, MAX_TOPICS, TopicExtractor, parse_topics, truncate_transcript};

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Upstream model id.
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    /// Side tools the model may call. Empty disables tool use.
    pub tools: Vec<String>,
    /// Upper bound on model/tool round trips.
    pub max_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    MessageStart { id: Uuid, role: Role },
    TextDelta { id: Uuid, text: String },
    Usage(TokenUsage),
}

pub type EventStream = BoxStream<'static, Result<GenerationEvent>>;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<EventStream>;
}

/// Drain a stream into plain text, ignoring message boundaries.
pub async fn collect_text(mut stream: EventStream) -> Result<String> {
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        if let GenerationEvent::TextDelta { text: delta, .. } = event? {
            text.push_str(&delta);
        }
    }
    Ok(text)
}
