use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use guardian_types::models::{ChatMessage, ExtractedTopic, Role};

use crate::{GenerationRequest, Generator, collect_text};

pub const MAX_TOPICS: usize = 5;
const MAX_TRANSCRIPT_CHARS: usize = 4000;

const TOPIC_PROMPT: &str = "You extract the main topics from conversations between a child and an assistant.
For each topic give a concise name (1-3 words) and a relevance from 0 to 1, where 1 is highly relevant.
Prefer educational, age-appropriate topics. Leave out anything sensitive, political or inappropriate.
Return at most 5 topics as a JSON array and nothing else, for example:
[{\"name\": \"Dinosaurs\", \"relevance\": 0.9}, {\"name\": \"Fossils\", \"relevance\": 0.6}]";

/// Proposes topics for a conversation transcript. Never fails: problems are
/// logged and yield an empty list.
#[async_trait]
pub trait TopicExtractor: Send + Sync {
    async fn extract(&self, transcript: &str) -> Vec<ExtractedTopic>;
}

/// Asks a generation model for topics.
pub struct GeneratorTopicExtractor {
    generator: Arc<dyn Generator>,
    model: String,
}

impl GeneratorTopicExtractor {
    pub fn new(generator: Arc<dyn Generator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    async fn try_extract(&self, transcript: &str) -> Result<Vec<ExtractedTopic>> {
        let request = GenerationRequest {
            model: self.model.clone(),
            system_prompt: TOPIC_PROMPT.to_string(),
            messages: vec![ChatMessage {
                id: Uuid::new_v4(),
                role: Role::User,
                content: format!("Extract topics from this conversation:\n\n{}", truncate_transcript(transcript)),
            }],
            tools: Vec::new(),
            max_steps: 1,
        };
        let stream = self.generator.generate(request).await?;
        let text = collect_text(stream).await?;
        debug!(response = %text, "Topic extraction response");
        parse_topics(&text)
    }
}

#[async_trait]
impl TopicExtractor for GeneratorTopicExtractor {
    async fn extract(&self, transcript: &str) -> Vec<ExtractedTopic> {
        match self.try_extract(transcript).await {
            Ok(topics) => topics,
            Err(e) => {
                warn!("Topic extraction failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Cut long transcripts to a fixed number of characters, marking the cut.
pub fn truncate_transcript(transcript: &str) -> String {
    match transcript.char_indices().nth(MAX_TRANSCRIPT_CHARS) {
        Some((cut, _)) => format!("{}...", &transcript[..cut]),
        None => transcript.to_string(),
    }
}

/// Pull the JSON array out of a model response and clean it up: entries need
/// a non-blank name and a numeric relevance, which is clamped to `[0, 1]`.
/// Highest relevance first, at most [`MAX_TOPICS`].
pub fn parse_topics(response: &str) -> Result<Vec<ExtractedTopic>> {
    let start = response.find('[').ok_or_else(|| anyhow!("No JSON array in topic response"))?;
    // Read one array from the first bracket; whatever follows it is ignored.
    let entries: Vec<Value> = serde_json::Deserializer::from_str(&response[start..])
        .into_iter::<Vec<Value>>()
        .next()
        .ok_or_else(|| anyhow!("No JSON array in topic response"))??;

    let mut topics: Vec<ExtractedTopic> = entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.trim();
            let relevance = entry.get("relevance")?.as_f64()?;
            if name.is_empty() || !relevance.is_finite() {
                return None;
            }
            Some(ExtractedTopic {
                name: name.to_string(),
                relevance: relevance.clamp(0.0, 1.0),
            })
        })
        .collect();

    topics.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    topics.truncate(MAX_TOPICS);
    Ok(topics)
}
