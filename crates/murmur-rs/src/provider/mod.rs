//! Completion providers.
//!
//! [`Provider`] is the capability the session engine talks to: one blocking
//! [`complete`](Provider::complete) call and one lazy
//! [`complete_stream`](Provider::complete_stream) call whose fragments,
//! concatenated, equal the blocking result. Backends:
//!
//! - [`anthropic`]: direct HTTPS Messages API, SSE streaming.
//! - [`bedrock`]: Amazon Bedrock InvokeModel API, binary event-stream streaming.
//!
//! [`build_provider`] is the single place a [`ProviderKind`] is turned into a
//! concrete backend.

pub mod anthropic;
pub mod bedrock;
pub mod eventstream;
pub mod sse;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{MurmurError, Result};
use crate::{Message, Role};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

pub use anthropic::AnthropicProvider;
pub use bedrock::BedrockProvider;

/// Ordered, finite, non-restartable sequence of text fragments.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Future returned by [`Provider::complete`].
pub type CompletionFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Future returned by [`Provider::complete_stream`].
pub type StreamFuture<'a> = Pin<Box<dyn Future<Output = Result<TextStream>> + Send + 'a>>;

/// A backend that produces completions for a message history.
///
/// `messages` may contain SYSTEM entries; backends drop them from the wire
/// array and send `system_prompt` through their dedicated field instead.
/// Uses boxed futures so the trait stays object-safe.
pub trait Provider: Send + Sync {
    /// Short backend name for logs (`"anthropic"`, `"bedrock"`).
    fn name(&self) -> &'static str;

    /// Model identifier requests are sent with.
    fn model(&self) -> &str;

    /// Single blocking completion returning the full text.
    fn complete<'a>(&'a self, messages: &'a [Message], system_prompt: &'a str)
    -> CompletionFuture<'a>;

    /// Open a streaming completion.
    ///
    /// Errors before the first fragment (connection, HTTP status) come back
    /// as `Err` from the future; failures after that arrive as a final
    /// `Err` item of type [`MurmurError::ProviderStreamInterrupted`].
    fn complete_stream<'a>(
        &'a self,
        messages: &'a [Message],
        system_prompt: &'a str,
    ) -> StreamFuture<'a>;
}

/// Construct the backend selected by `config.kind`.
///
/// Fails with [`MurmurError::ProviderNotConfigured`] when credentials are
/// missing.
pub fn build_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    debug!(provider = %config.kind, model = %config.model, "Building provider");
    Ok(match config.kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)?),
        ProviderKind::Bedrock => Arc::new(BedrockProvider::new(config)?),
    })
}

/// Shared HTTP client settings for all backends.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("murmur-rs/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| MurmurError::InvalidConfig(format!("failed to build HTTP client: {e}")))
}

// ── Wire messages ──────────────────────────────────────────────────

/// A message as sent on the wire: `user` or `assistant` only.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: String,
}

/// Translate the engine's message list into the wire array.
///
/// SYSTEM and empty messages are dropped. Consecutive messages with the same
/// role are merged, since both backends require alternating roles and a
/// failed turn leaves its USER message in place.
pub fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    let mut out: Vec<WireMessage> = Vec::with_capacity(messages.len());
    for msg in messages {
        let role = match msg.role {
            Role::System => continue,
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        if msg.content.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(prev) if prev.role == role => {
                prev.content.push_str("\n\n");
                prev.content.push_str(&msg.content);
            }
            _ => out.push(WireMessage {
                role,
                content: msg.content.clone(),
            }),
        }
    }
    out
}

/// Extract the message from a JSON error body, falling back to the raw text.
pub(crate) fn error_detail(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("message"))
            .or_else(|| v.get("Message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });
    message.unwrap_or_else(|| body.chars().take(500).collect())
}

// ── Fragment streams ───────────────────────────────────────────────

/// One item decoded from a streaming response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A text fragment to append to the reply.
    Text(String),
    /// The backend reported an error mid-stream.
    Error(String),
    /// The backend signalled the end of the message.
    Stop,
}

/// Incremental decoder for a streaming response body.
pub trait FrameDecoder: Send {
    /// Feed raw body bytes, returning every item completed by them.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Decoded>;

    /// Called once the body ends; flushes any buffered partial frame.
    fn finish(&mut self) -> Vec<Decoded> {
        Vec::new()
    }
}

struct StreamState<D> {
    response: reqwest::Response,
    decoder: D,
    pending: VecDeque<Decoded>,
    done: bool,
}

/// Turn a streaming response into a [`TextStream`] using `decoder`.
///
/// The stream ends after a [`Decoded::Stop`], after an error item, or when
/// the body is exhausted.
pub(crate) fn fragment_stream<D>(response: reqwest::Response, decoder: D) -> TextStream
where
    D: FrameDecoder + 'static,
{
    let state = StreamState {
        response,
        decoder,
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                match item {
                    Decoded::Text(text) => return Some((Ok(text), state)),
                    Decoded::Error(e) => {
                        state.pending.clear();
                        state.done = true;
                        return Some((Err(MurmurError::ProviderStreamInterrupted(e)), state));
                    }
                    Decoded::Stop => {
                        state.pending.clear();
                        state.done = true;
                        return None;
                    }
                }
            }
            if state.done {
                return None;
            }
            match state.response.chunk().await {
                Ok(Some(bytes)) => {
                    trace!(bytes = bytes.len(), "Stream chunk");
                    let items = state.decoder.feed(&bytes);
                    state.pending.extend(items);
                }
                Ok(None) => {
                    let items = state.decoder.finish();
                    state.pending.extend(items);
                    state.pending.push_back(Decoded::Stop);
                }
                Err(e) => {
                    state.pending.push_back(Decoded::Error(format!(
                        "failed to read streaming chunk: {e}"
                    )));
                }
            }
        }
    })
    .boxed()
}

/// Wrap already-known fragments as a [`TextStream`].
pub fn text_stream_from(fragments: Vec<Result<String>>) -> TextStream {
    stream::iter(fragments).boxed()
}
