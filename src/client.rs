use anyhow::Result;
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::tokenizer::Tokenizer;

/// Models used when the discovery endpoint is unreachable.
pub const FALLBACK_MODELS: &[&str] = &[
    "glm-5",
    "glm-4.7",
    "glm-4.7-flash",
    "glm-4.6",
    "glm-4.6-air",
    "glm-4.5",
    "glm-4.5-air",
];

/// Failures local to a single run. Each converts that run into a failed
/// sample; none of them propagate out of the benchmark loop.
#[derive(Error, Debug)]
pub enum RunError {
    /// Request failed before any byte was received (connect, auth, HTTP status).
    #[error("request error: {0}")]
    Request(String),

    /// A delta record mid-stream could not be decoded.
    #[error("stream decode error: {0}")]
    StreamDecode(String),

    /// Connection dropped or timed out after partial data.
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    /// Stream completed without a single answer-phase token.
    #[error("empty response")]
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RequestError,
    StreamDecodeError,
    StreamInterrupted,
    EmptyResponse,
}

impl RunError {
    pub fn kind(&self) -> FailureKind {
        match self {
            RunError::Request(_) => FailureKind::RequestError,
            RunError::StreamDecode(_) => FailureKind::StreamDecodeError,
            RunError::StreamInterrupted(_) => FailureKind::StreamInterrupted,
            RunError::EmptyResponse => FailureKind::EmptyResponse,
        }
    }
}

/// One decoded increment from the stream, timestamped at the moment the
/// reader observed the record.
///
/// The variant split keeps the TTFT rule enforceable by type: reasoning
/// tokens from thinking models can never set the first-token time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEvent {
    Reasoning { at: Instant, tokens: u32 },
    Answer { at: Instant, tokens: u32 },
}

impl TokenEvent {
    pub fn at(&self) -> Instant {
        match self {
            TokenEvent::Reasoning { at, .. } | TokenEvent::Answer { at, .. } => *at,
        }
    }

    pub fn tokens(&self) -> u32 {
        match self {
            TokenEvent::Reasoning { tokens, .. } | TokenEvent::Answer { tokens, .. } => *tokens,
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, TokenEvent::Answer { .. })
    }
}

// Request types for the chat completions API
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

// Streaming response types
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    /// Present only for reasoning-capable models.
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

// Models list response
#[derive(Debug, Clone, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
}

/// HTTP client for the Z.AI chat completions API.
///
/// The underlying connection pool is shared read-only configuration across
/// runs; no run mutates it.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    api_key: String,
    tokenizer: Arc<Tokenizer>,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration, pool_size: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(pool_size)
            .pool_idle_timeout(Duration::from_secs(300))
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            tokenizer: Arc::new(Tokenizer::new()?),
        })
    }

    /// Fetch the set of available model identifiers.
    ///
    /// Discovery is best-effort: any failure falls back to the static model
    /// list rather than aborting the benchmark.
    pub async fn list_models(&self) -> Vec<String> {
        let url = format!("{}/models", self.base_url);

        let response = match self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Model discovery failed ({}), using fallback list", e);
                return fallback_models();
            }
        };

        if !response.status().is_success() {
            warn!(
                "Models endpoint returned {}, using fallback list",
                response.status()
            );
            return fallback_models();
        }

        match response.json::<ModelsResponse>().await {
            Ok(parsed) => {
                let mut models: Vec<String> = parsed
                    .data
                    .into_iter()
                    .map(|m| m.id)
                    .filter(|id| !id.is_empty())
                    .collect();
                if models.is_empty() {
                    return fallback_models();
                }
                models.sort();
                models
            }
            Err(e) => {
                warn!("Failed to parse models response ({}), using fallback list", e);
                fallback_models()
            }
        }
    }

    /// Issue one streaming completion request and hand back the reader.
    ///
    /// Everything that goes wrong before the first byte of the body maps to
    /// `RunError::Request`: no timing fields can be populated for such runs.
    pub async fn open_stream(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<StreamingResponse, RunError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            stream: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| RunError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            return Err(RunError::Request(format!("HTTP {}: {}", status, text)));
        }

        debug!("Stream opened for model {}", model);

        Ok(StreamingResponse {
            response,
            buffer: String::new(),
            pending: VecDeque::new(),
            reported_completion_tokens: None,
            tokenizer: Arc::clone(&self.tokenizer),
            done: false,
        })
    }
}

fn fallback_models() -> Vec<String> {
    FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
}

/// Lazy reader over one open streaming body.
///
/// Yields `TokenEvent`s in arrival order; finite and not restartable
/// mid-consumption. Dropping the reader releases the connection on every
/// exit path.
pub struct StreamingResponse {
    response: reqwest::Response,
    // Undecoded bytes carried across transport chunks; a non-terminated
    // trailing fragment stays here as "no event yet".
    buffer: String,
    // One transport chunk can decode to several events.
    pending: VecDeque<TokenEvent>,
    reported_completion_tokens: Option<u32>,
    tokenizer: Arc<Tokenizer>,
    done: bool,
}

impl StreamingResponse {
    /// Next token event, `Ok(None)` at end of stream.
    ///
    /// A malformed record surfaces as `StreamDecode` rather than being
    /// silently dropped; dropping it would corrupt TTFT and token counts.
    pub async fn next_event(&mut self) -> Result<Option<TokenEvent>, RunError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            if self.done {
                return Ok(None);
            }

            // Decode any complete records already buffered. The timestamp is
            // taken when the record is observed here, not when the transport
            // delivered the chunk.
            while let Some(line) = next_line(&mut self.buffer) {
                match parse_sse_line(&line)? {
                    Record::Skip => {}
                    Record::Done => {
                        self.done = true;
                        break;
                    }
                    Record::Chunk(chunk) => {
                        let at = Instant::now();
                        let (events, usage) = events_from_chunk(&chunk, &self.tokenizer, at);
                        if let Some(tokens) = usage {
                            self.reported_completion_tokens = Some(tokens);
                        }
                        self.pending.extend(events);
                    }
                }
            }

            if !self.pending.is_empty() || self.done {
                continue;
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&bytes));
                }
                Ok(None) => {
                    // Body ended without [DONE]; any trailing fragment is
                    // incomplete and produces no event.
                    self.done = true;
                }
                Err(e) => {
                    return Err(RunError::StreamInterrupted(e.to_string()));
                }
            }
        }
    }

    /// Completion token count reported by the provider, if any. This covers
    /// reasoning tokens too, so it is logged for comparison rather than used
    /// for the answer-token statistics.
    pub fn reported_completion_tokens(&self) -> Option<u32> {
        self.reported_completion_tokens
    }
}

#[derive(Debug)]
enum Record {
    Skip,
    Done,
    Chunk(ChatCompletionChunk),
}

fn next_line(buffer: &mut String) -> Option<String> {
    let pos = buffer.find('\n')?;
    let line: String = buffer.drain(..=pos).collect();
    Some(line.trim().to_string())
}

fn parse_sse_line(line: &str) -> Result<Record, RunError> {
    if line.is_empty() {
        return Ok(Record::Skip);
    }

    let Some(payload) = line.strip_prefix("data: ") else {
        // SSE comments, event names and other non-data lines.
        return Ok(Record::Skip);
    };

    if payload == "[DONE]" {
        return Ok(Record::Done);
    }

    serde_json::from_str::<ChatCompletionChunk>(payload)
        .map(Record::Chunk)
        .map_err(|e| RunError::StreamDecode(format!("malformed delta record: {}", e)))
}

fn events_from_chunk(
    chunk: &ChatCompletionChunk,
    tokenizer: &Tokenizer,
    at: Instant,
) -> (Vec<TokenEvent>, Option<u32>) {
    let mut events = Vec::new();

    for choice in &chunk.choices {
        if let Some(text) = non_empty(choice.delta.reasoning_content.as_deref()) {
            events.push(TokenEvent::Reasoning {
                at,
                tokens: fragment_tokens(tokenizer, text),
            });
        }
        if let Some(text) = non_empty(choice.delta.content.as_deref()) {
            events.push(TokenEvent::Answer {
                at,
                tokens: fragment_tokens(tokenizer, text),
            });
        }
    }

    let usage = chunk.usage.as_ref().map(|u| u.completion_tokens);
    (events, usage)
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.is_empty())
}

fn fragment_tokens(tokenizer: &Tokenizer, text: &str) -> u32 {
    (tokenizer.count_tokens(text) as u32).max(1)
}
