// src/openrouter_client.rs
use backoff::{future::retry, ExponentialBackoff};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// Client for the OpenRouter chat-completions API. Constructed once at
/// startup and injected through AppState; there is no global instance.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatCompletionMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Ignore,
}

// One line of the upstream event stream: `data: {json}` carries a delta,
// `data: [DONE]` terminates, everything else (comments, keep-alives,
// non-content events) is skipped.
fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return SseLine::Ignore;
    };
    let payload = payload.trim_start();

    if payload == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseLine::Delta)
            .unwrap_or(SseLine::Ignore),
        Err(_) => SseLine::Ignore,
    }
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/chatgpt-4o-latest".to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Opens a streaming completion and returns a channel of text deltas in
    /// generation order. Transient errors while establishing the stream are
    /// retried with exponential backoff; once streaming has begun, errors
    /// terminate the channel. Dropping the receiver stops consumption of the
    /// upstream stream.
    pub async fn stream_chat(
        &self,
        messages: Vec<ChatCompletionMessage>,
        config: GenerationConfig,
    ) -> Result<mpsc::Receiver<Result<String, String>>, String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: true,
        };

        tracing::debug!(
            "OpenRouter request: model={} messages={}",
            request.model,
            request.messages.len()
        );

        let backoff_config = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let operation = || async {
            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .header("content-type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!("OpenRouter connection error (retrying): {}", e);
                        backoff::Error::transient(format!("Connection error: {}", e))
                    } else {
                        tracing::error!("OpenRouter request error: {}", e);
                        backoff::Error::permanent(format!("Request error: {}", e))
                    }
                })?;

            let status = response.status();
            if matches!(status.as_u16(), 429 | 500 | 502 | 503) {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!("OpenRouter returned {} (retrying): {}", status, body);
                return Err(backoff::Error::transient(format!(
                    "API error ({}): {}",
                    status, body
                )));
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::error!("OpenRouter permanent error ({}): {}", status, body);
                return Err(backoff::Error::permanent(format!(
                    "API error ({}): {}",
                    status, body
                )));
            }

            Ok(response)
        };

        let response = retry(backoff_config, operation).await?;

        let (tx, rx) = mpsc::channel::<Result<String, String>>(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            // Lines are framed by raw newline bytes, which never occur inside
            // a multi-byte UTF-8 sequence, so byte-level splitting is safe.
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line);
                            match parse_sse_line(&line) {
                                SseLine::Delta(text) => {
                                    if tx.send(Ok(text)).await.is_err() {
                                        // Receiver dropped; stop reading upstream.
                                        return;
                                    }
                                }
                                SseLine::Done => return,
                                SseLine::Ignore => {}
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(format!("Stream read error: {}", e))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delta_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Delta("Hello".to_string()));
    }

    #[test]
    fn test_parse_done_marker() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
        assert_eq!(parse_sse_line("data:[DONE]"), SseLine::Done);
    }

    #[test]
    fn test_comments_and_blank_lines_are_ignored() {
        assert_eq!(parse_sse_line(": OPENROUTER PROCESSING"), SseLine::Ignore);
        assert_eq!(parse_sse_line(""), SseLine::Ignore);
        assert_eq!(parse_sse_line("event: ping"), SseLine::Ignore);
    }

    #[test]
    fn test_chunks_without_content_are_ignored() {
        // Role-only and finish-reason chunks carry no text delta.
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Ignore);

        let line = r#"data: {"choices":[{"delta":{}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Ignore);
    }

    #[test]
    fn test_malformed_json_is_ignored() {
        assert_eq!(parse_sse_line("data: {not json"), SseLine::Ignore);
    }
}
