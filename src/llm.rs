use crate::config::ProviderConfig;
use crate::events::Role;
use crate::transcript::Message;
use anyhow::{Context, Result, anyhow};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Duration;

const CHANNEL_CAPACITY: usize = 1000;

/// Events emitted during LLM streaming
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// Text delta from streaming response
    TextDelta(String),
    /// Reasoning/thinking content
    ReasoningDelta(String),
    /// Stream completed
    StreamComplete,
    /// Error occurred
    Error(String),
}

/// Request to send to LLM
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub messages: Vec<LlmMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Message in conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl From<&Message> for LlmMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role().to_string(),
            content: message.content().to_string(),
        }
    }
}

impl LlmRequest {
    pub fn new(messages: Vec<LlmMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Build a request from transcript messages
    pub fn from_transcript(context: &[Message]) -> Self {
        Self::new(context.iter().map(LlmMessage::from).collect())
    }

    pub fn with_system_prompt(mut self, prompt: Option<&str>) -> Self {
        if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
            self.messages.insert(
                0,
                LlmMessage {
                    role: "system".to_string(),
                    content: prompt.to_string(),
                },
            );
        }
        self
    }

    pub fn with_temperature(mut self, temp: Option<f32>) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: Option<u32>) -> Self {
        self.max_tokens = tokens;
        self
    }

    /// Text of the most recent user message
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User.as_ref())
            .map(|m| m.content.as_str())
    }
}

/// Anything that can turn a request into a stream of [`LlmEvent`]s.
///
/// `start_stream` must return without waiting for the reply; events are
/// delivered through the returned receiver and end with `StreamComplete`
/// or `Error`. Dropping the receiver tells the producer to stop.
pub trait CompletionProvider {
    fn start_stream(&self, request: LlmRequest) -> Result<mpsc::Receiver<LlmEvent>>;

    /// Model name shown in the status line
    fn model_name(&self) -> &str;
}

/// Streaming client for OpenAI-compatible chat-completion endpoints
#[derive(Clone)]
pub struct LlmClient {
    provider: ProviderConfig,
    system_prompt: Option<String>,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(provider: ProviderConfig, system_prompt: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(provider.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            provider,
            system_prompt,
            client,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.provider.base_url.trim_end_matches('/')
        )
    }

    /// Stream from the configured endpoint, forwarding events to `tx`
    async fn stream_chat_completion(
        client: reqwest::Client,
        url: String,
        model: String,
        api_key: String,
        request: LlmRequest,
        idle_timeout: Duration,
        tx: mpsc::Sender<LlmEvent>,
    ) -> Result<()> {
        let mut payload = serde_json::json!({
            "model": model,
            "messages": request.messages,
            "stream": true,
        });
        if let Some(temperature) = request.temperature {
            payload["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = serde_json::json!(max_tokens);
        }

        let response = client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("API error ({}): {}", status, error_text.trim()));
        }

        Self::process_sse_stream(response.bytes_stream(), idle_timeout, tx).await
    }

    /// Process a Server-Sent Events body. Fails if no chunk arrives within
    /// `idle_timeout`; there is no limit on the length of the whole reply.
    async fn process_sse_stream<S, B, E>(
        mut stream: S,
        idle_timeout: Duration,
        tx: mpsc::Sender<LlmEvent>,
    ) -> Result<()>
    where
        S: Stream<Item = std::result::Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut decoder = SseDecoder::default();

        loop {
            let next = tokio::time::timeout(idle_timeout, stream.next())
                .await
                .map_err(|_| anyhow!("No data received for {:?}", idle_timeout))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.context("Failed to read response stream")?;
            for data in decoder.push(chunk.as_ref()) {
                if !Self::forward(&data, &tx).await {
                    return Ok(());
                }
            }
        }

        if let Some(data) = decoder.finish() {
            if !Self::forward(&data, &tx).await {
                return Ok(());
            }
        }

        let _ = tx.send(LlmEvent::StreamComplete).await;
        Ok(())
    }

    /// Send the events for one `data:` payload. Returns false once the
    /// stream is over, either by `[DONE]` or because the receiver is gone.
    async fn forward(data: &str, tx: &mpsc::Sender<LlmEvent>) -> bool {
        match parse_sse_data(data) {
            SseData::Done => {
                let _ = tx.send(LlmEvent::StreamComplete).await;
                false
            }
            SseData::Events(events) => {
                for event in events {
                    if tx.send(event).await.is_err() {
                        tracing::debug!("stream receiver dropped, stopping");
                        return false;
                    }
                }
                true
            }
        }
    }
}

impl CompletionProvider for LlmClient {
    fn start_stream(&self, request: LlmRequest) -> Result<mpsc::Receiver<LlmEvent>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let Some(api_key) = self.provider.resolve_api_key() else {
            let message = format!(
                "No API key configured. Set {} or provider.api_key.",
                self.provider.api_key_env
            );
            tx.try_send(LlmEvent::Error(message))
                .map_err(|e| anyhow!("Failed to report missing API key: {}", e))?;
            return Ok(rx);
        };

        let request = request
            .with_system_prompt(self.system_prompt.as_deref())
            .with_temperature(self.provider.temperature)
            .with_max_tokens(self.provider.max_tokens);

        let client = self.client.clone();
        let url = self.completions_url();
        let model = self.provider.model.clone();
        let idle_timeout = Duration::from_secs(self.provider.idle_timeout_secs.max(1));
        tracing::info!(%url, %model, messages = request.messages.len(), "starting completion stream");

        tokio::spawn(async move {
            let tx_err = tx.clone();
            if let Err(e) = Self::stream_chat_completion(
                client,
                url,
                model,
                api_key,
                request,
                idle_timeout,
                tx,
            )
            .await
            {
                let message = format!("{:#}", e);
                tracing::warn!(error = %message, "completion stream failed");
                let _ = tx_err.send(LlmEvent::Error(message)).await;
            }
        });

        Ok(rx)
    }

    fn model_name(&self) -> &str {
        &self.provider.model
    }
}

/// Offline provider that streams the last user message back word by word
#[derive(Debug, Clone)]
pub struct EchoProvider {
    delay: Duration,
}

impl EchoProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    fn chunks(text: &str) -> Vec<String> {
        text.split_whitespace()
            .enumerate()
            .map(|(i, word)| {
                if i == 0 {
                    word.to_string()
                } else {
                    format!(" {}", word)
                }
            })
            .collect()
    }
}

impl CompletionProvider for EchoProvider {
    fn start_stream(&self, request: LlmRequest) -> Result<mpsc::Receiver<LlmEvent>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let text = request
            .last_user_text()
            .ok_or_else(|| anyhow!("Request has no user message"))?;
        let chunks = Self::chunks(text);
        let delay = self.delay;

        tokio::spawn(async move {
            for chunk in chunks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(LlmEvent::TextDelta(chunk)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(LlmEvent::StreamComplete).await;
        });

        Ok(rx)
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

/// Outcome of one `data:` payload
#[derive(Debug, Clone, PartialEq)]
pub enum SseData {
    Done,
    Events(Vec<LlmEvent>),
}

/// Splits a byte stream into SSE `data:` payloads.
///
/// Bytes are held until a full line is available so that neither lines nor
/// multi-byte characters are broken at chunk boundaries.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk, returning the payloads of every completed `data:` line
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            if let Some(data) = Self::data_of(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        Self::data_of(&line)
    }

    fn data_of(line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let data = line.trim().strip_prefix("data:")?.trim_start();
        Some(data.to_string())
    }
}

/// Interpret one SSE payload from a chat-completions stream
pub fn parse_sse_data(data: &str) -> SseData {
    if data == "[DONE]" {
        return SseData::Done;
    }

    let mut events = Vec::new();
    let Ok(chunk) = serde_json::from_str::<serde_json::Value>(data) else {
        tracing::debug!(%data, "skipping unparseable SSE payload");
        return SseData::Events(events);
    };

    if let Some(message) = chunk
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
    {
        events.push(LlmEvent::Error(message.to_string()));
        return SseData::Events(events);
    }

    if let Some(delta) = chunk
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
    {
        let reasoning = delta
            .get("reasoning_content")
            .or_else(|| delta.get("reasoning"))
            .and_then(|r| r.as_str());
        if let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) {
            events.push(LlmEvent::ReasoningDelta(reasoning.to_string()));
        }
        if let Some(content) = delta
            .get("content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
        {
            events.push(LlmEvent::TextDelta(content.to_string()));
        }
    }

    SseData::Events(events)
}
