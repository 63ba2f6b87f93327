//! Anthropic Messages API backend.
//!
//! `POST {endpoint}/v1/messages` with the system prompt in the top-level
//! `system` field. Streaming sets `"stream": true` and reads SSE events;
//! only `text_delta` content deltas become fragments.

use super::sse::SseDecoder;
use super::{
    CompletionFuture, Decoded, FrameDecoder, Provider, StreamFuture, WireMessage, error_detail,
    fragment_stream, http_client, wire_messages,
};
use crate::Message;
use crate::config::ProviderConfig;
use crate::error::{MurmurError, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace, warn};

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Direct HTTPS provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.config.model)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize, Debug)]
pub(crate) struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl MessagesResponse {
    /// Concatenation of every text block.
    pub(crate) fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect()
    }
}

impl AnthropicProvider {
    /// Build the provider. Fails fast if no API key is configured.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.credentials().unwrap_or_default().to_string();
        debug!(
            provider = "anthropic",
            model = %config.model,
            api_key_len = api_key.len(),
            "Creating Anthropic provider"
        );
        Ok(Self {
            client: http_client()?,
            config,
            api_key,
        })
    }

    fn url(&self) -> String {
        let base = self
            .config
            .endpoint
            .as_deref()
            .unwrap_or(ANTHROPIC_API_BASE)
            .trim_end_matches('/');
        format!("{base}/v1/messages")
    }

    pub(crate) fn request_body<'a>(
        &'a self,
        messages: &[Message],
        system_prompt: &'a str,
        stream: bool,
    ) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: system_prompt,
            messages: wire_messages(messages),
            stream,
        }
    }

    async fn send(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response> {
        debug!(
            model = body.model,
            messages = body.messages.len(),
            max_tokens = body.max_tokens,
            stream = body.stream,
            "Anthropic request"
        );
        let resp = self
            .client
            .post(self.url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| MurmurError::ProviderRequestFailed(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(MurmurError::ProviderRequestFailed(format!(
                "Anthropic API HTTP {status}: {}",
                error_detail(&text)
            )));
        }
        Ok(resp)
    }

    async fn complete_inner(&self, messages: &[Message], system_prompt: &str) -> Result<String> {
        let body = self.request_body(messages, system_prompt, false);
        let start = Instant::now();
        let resp = self.send(&body).await?;
        let text = resp.text().await.map_err(|e| {
            MurmurError::ProviderRequestFailed(format!("failed to read response: {e}"))
        })?;
        debug!(
            elapsed_secs = start.elapsed().as_secs_f64(),
            bytes = text.len(),
            "Anthropic response"
        );

        let parsed: MessagesResponse = serde_json::from_str(&text).map_err(|e| {
            MurmurError::ProviderRequestFailed(format!("failed to parse response: {e}"))
        })?;
        trace!(stop_reason = ?parsed.stop_reason, "Anthropic stop reason");
        Ok(parsed.text())
    }
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [Message],
        system_prompt: &'a str,
    ) -> CompletionFuture<'a> {
        Box::pin(self.complete_inner(messages, system_prompt))
    }

    fn complete_stream<'a>(
        &'a self,
        messages: &'a [Message],
        system_prompt: &'a str,
    ) -> StreamFuture<'a> {
        Box::pin(async move {
            let body = self.request_body(messages, system_prompt, true);
            let resp = self.send(&body).await?;
            Ok(fragment_stream(resp, AnthropicSseDecoder::default()))
        })
    }
}

// ── Stream decoding ────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEventJson {
    ContentBlockDelta {
        delta: DeltaJson,
    },
    MessageStop,
    Error {
        error: ApiErrorJson,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaJson {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct ApiErrorJson {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Map one Messages-API stream event (JSON) to a decoded item.
///
/// Shared with the Bedrock backend, whose stream chunks carry the same
/// event objects.
pub(crate) fn decode_event_json(data: &str) -> Option<Decoded> {
    match serde_json::from_str::<StreamEventJson>(data) {
        Ok(StreamEventJson::ContentBlockDelta {
            delta: DeltaJson::TextDelta { text },
        }) if !text.is_empty() => Some(Decoded::Text(text)),
        Ok(StreamEventJson::MessageStop) => Some(Decoded::Stop),
        Ok(StreamEventJson::Error { error }) => {
            Some(Decoded::Error(format!("{}: {}", error.kind, error.message)))
        }
        Ok(_) => None,
        Err(e) => {
            warn!("Failed to parse stream event: {e} (data: {data})");
            None
        }
    }
}

/// SSE body decoder for the Messages API.
///
/// A body that ends before `message_stop` was cut off and finishes with an
/// error item.
#[derive(Debug, Default)]
pub(crate) struct AnthropicSseDecoder {
    sse: SseDecoder,
    stopped: bool,
}

impl FrameDecoder for AnthropicSseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Decoded> {
        let items: Vec<Decoded> = self
            .sse
            .push(bytes)
            .into_iter()
            .filter_map(|event| decode_event_json(&event.data))
            .collect();
        self.stopped |= items.contains(&Decoded::Stop);
        items
    }

    fn finish(&mut self) -> Vec<Decoded> {
        let mut items: Vec<Decoded> = self
            .sse
            .finish()
            .and_then(|event| decode_event_json(&event.data))
            .into_iter()
            .collect();
        self.stopped |= items.contains(&Decoded::Stop);
        if !self.stopped {
            items.push(Decoded::Error("stream ended before message_stop".into()));
        }
        items
    }
}
