use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use guardian_types::models::{Role, TokenUsage};

use crate::{EventStream, GenerationEvent, GenerationRequest, Generator};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// e.g. "https://api.openai.com/v1" or "http://localhost:11434/v1"
    pub base_url: String,
    /// Empty for local servers that take no key.
    pub api_key: String,
    pub connect_timeout_secs: u64,
    /// Longest silence allowed between reads. Bounds a stalled stream, not a
    /// long one.
    pub read_timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Streaming client for OpenAI-compatible chat completions.
///
/// Runs a single completion step: tool names in the request are not offered
/// upstream, and tool-role history is not replayed since it lacks call ids.
pub struct OpenAiGenerator {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<EventStream> {
        let mut messages = vec![WireMessage {
            role: Role::System.as_str(),
            content: &request.system_prompt,
        }];
        messages.extend(
            request
                .messages
                .iter()
                .filter(|m| m.role != Role::Tool)
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                }),
        );

        let body = CompletionRequest {
            model: &request.model,
            messages,
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        };

        let mut req = self.client.post(self.url()).json(&body);
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }

        debug!(model = %request.model, tools = request.tools.len(), "Starting completion");
        let resp = req.send().await.context("Completion request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Upstream returned {}: {}", status, text);
        }

        let mut bytes = resp.bytes_stream();
        let stream = async_stream::try_stream! {
            let id = Uuid::new_v4();
            let mut started = false;
            let mut pending: Vec<u8> = Vec::new();

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.context("Upstream stream interrupted")?;
                pending.extend_from_slice(&chunk);

                // SSE events may be split across network chunks, even inside a
                // UTF-8 sequence; only complete lines are decoded.
                while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let Some(data) = line.trim().strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'read;
                    }

                    let parsed: CompletionChunk = match serde_json::from_str(data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            warn!("Skipping malformed completion chunk: {}", e);
                            continue;
                        }
                    };

                    for choice in parsed.choices {
                        let Some(text) = choice.delta.content else { continue };
                        if text.is_empty() {
                            continue;
                        }
                        if !started {
                            started = true;
                            yield GenerationEvent::MessageStart { id, role: Role::Assistant };
                        }
                        yield GenerationEvent::TextDelta { id, text };
                    }

                    if let Some(usage) = parsed.usage {
                        yield GenerationEvent::Usage(TokenUsage {
                            prompt_tokens: usage.prompt_tokens,
                            completion_tokens: usage.completion_tokens,
                        });
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_with_usage_only_parses() {
        let chunk: CompletionChunk =
            serde_json::from_str(r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":30,"total_tokens":42}}"#)
                .unwrap();
        assert!(chunk.choices.is_empty());
        let usage = chunk.usage.unwrap();
        assert_eq!((usage.prompt_tokens, usage.completion_tokens), (12, 30));
    }

    #[test]
    fn delta_chunk_parses() {
        let chunk: CompletionChunk =
            serde_json::from_str(r#"{"id":"x","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"}}]}"#)
                .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));
        assert!(chunk.usage.is_none());
    }

    /// Serves one request as an SSE stream, one chunk per `gap`.
    async fn serve_slowly(listener: tokio::net::TcpListener, words: usize, gap: Duration) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= head_end + 4 + length {
                    break;
                }
            }
            assert!(n > 0, "request ended early");
        }

        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        for _ in 0..words {
            socket
                .write_all(b"data: {\"choices\":[{\"delta\":{\"content\":\"w \"}}]}\n\n")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(gap).await;
        }
        socket.write_all(b"data: [DONE]\n\n").await.unwrap();
        socket.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn long_stream_outlives_read_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_slowly(listener, 5, Duration::from_millis(400)));

        let generator = OpenAiGenerator::new(OpenAiConfig {
            base_url: format!("http://{}/v1", addr),
            api_key: String::new(),
            connect_timeout_secs: 1,
            read_timeout_secs: 1,
        })
        .unwrap();
        let request = GenerationRequest {
            model: "m".into(),
            system_prompt: "be brief".into(),
            messages: Vec::new(),
            tools: Vec::new(),
            max_steps: 1,
        };

        // Two seconds in total, but never a second without data.
        let text = crate::collect_text(generator.generate(request).await.unwrap()).await.unwrap();
        assert_eq!(text, "w w w w w ");
        server.await.unwrap();
    }

    #[test]
    fn url_tolerates_trailing_slash() {
        let generator = OpenAiGenerator::new(OpenAiConfig {
            base_url: "http://localhost:11434/v1/".into(),
            api_key: String::new(),
            connect_timeout_secs: 5,
            read_timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(generator.url(), "http://localhost:11434/v1/chat/completions");
    }
}
