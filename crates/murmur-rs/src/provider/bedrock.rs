//! Amazon Bedrock backend (InvokeModel with the Anthropic request schema).
//!
//! Authenticates with a Bedrock API key sent as a bearer token. Blocking
//! calls use `/model/{id}/invoke`; streaming uses
//! `/model/{id}/invoke-with-response-stream`, whose binary event-stream
//! frames carry base64-encoded Messages-API events.

use super::anthropic::{MessagesResponse, decode_event_json};
use super::eventstream::{EventStreamDecoder, Frame};
use super::{
    CompletionFuture, Decoded, FrameDecoder, Provider, StreamFuture, WireMessage, error_detail,
    fragment_stream, http_client, wire_messages,
};
use crate::Message;
use crate::config::ProviderConfig;
use crate::error::{MurmurError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, trace, warn};

pub const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Cloud-gateway provider.
pub struct BedrockProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
}

impl std::fmt::Debug for BedrockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedrockProvider")
            .field("model", &self.config.model)
            .field("region", &self.config.region)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

#[derive(Serialize, Debug)]
pub(crate) struct InvokeRequest<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<WireMessage>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Action {
    Invoke,
    InvokeStream,
}

impl BedrockProvider {
    /// Build the provider. Fails fast if no API key is configured.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.credentials().unwrap_or_default().to_string();
        debug!(
            provider = "bedrock",
            model = %config.model,
            region = %config.region,
            api_key_len = api_key.len(),
            "Creating Bedrock provider"
        );
        Ok(Self {
            client: http_client()?,
            config,
            api_key,
        })
    }

    fn base_url(&self) -> String {
        match self.config.endpoint.as_deref() {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", self.config.region),
        }
    }

    fn url(&self, action: Action) -> String {
        // Model ids like `...-v2:0` need the colon escaped in the path.
        let model = self.config.model.replace(':', "%3A");
        let suffix = match action {
            Action::Invoke => "invoke",
            Action::InvokeStream => "invoke-with-response-stream",
        };
        format!("{}/model/{model}/{suffix}", self.base_url())
    }

    pub(crate) fn request_body<'a>(
        &self,
        messages: &[Message],
        system_prompt: &'a str,
    ) -> InvokeRequest<'a> {
        InvokeRequest {
            anthropic_version: BEDROCK_ANTHROPIC_VERSION,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: system_prompt,
            messages: wire_messages(messages),
        }
    }

    async fn send(&self, action: Action, body: &InvokeRequest<'_>) -> Result<reqwest::Response> {
        let accept = match action {
            Action::Invoke => "application/json",
            Action::InvokeStream => "application/vnd.amazon.eventstream",
        };
        let url = self.url(action);
        debug!(
            url = %url,
            messages = body.messages.len(),
            max_tokens = body.max_tokens,
            "Bedrock request"
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .header("accept", accept)
            .json(body)
            .send()
            .await
            .map_err(|e| MurmurError::ProviderRequestFailed(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(MurmurError::ProviderRequestFailed(format!(
                "Bedrock API HTTP {status}: {}",
                error_detail(&text)
            )));
        }
        Ok(resp)
    }

    async fn complete_inner(&self, messages: &[Message], system_prompt: &str) -> Result<String> {
        let body = self.request_body(messages, system_prompt);
        let start = Instant::now();
        let resp = self.send(Action::Invoke, &body).await?;
        let text = resp.text().await.map_err(|e| {
            MurmurError::ProviderRequestFailed(format!("failed to read response: {e}"))
        })?;
        debug!(
            elapsed_secs = start.elapsed().as_secs_f64(),
            bytes = text.len(),
            "Bedrock response"
        );

        let parsed: MessagesResponse = serde_json::from_str(&text).map_err(|e| {
            MurmurError::ProviderRequestFailed(format!("failed to parse response: {e}"))
        })?;
        Ok(parsed.text())
    }
}

impl Provider for BedrockProvider {
    fn name(&self) -> &'static str {
        "bedrock"
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
            let body = self.request_body(messages, system_prompt);
            let resp = self.send(Action::InvokeStream, &body).await?;
            Ok(fragment_stream(resp, BedrockEventDecoder::default()))
        })
    }
}

// ── Stream decoding ────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct ChunkPayload {
    bytes: String,
}

/// Event-stream body decoder for `invoke-with-response-stream`.
#[derive(Debug, Default)]
pub(crate) struct BedrockEventDecoder {
    frames: EventStreamDecoder,
    stopped: bool,
}

impl BedrockEventDecoder {
    fn decode_frame(frame: &Frame) -> Option<Decoded> {
        match frame.message_type() {
            Some("event") => match frame.event_type() {
                Some("chunk") => decode_chunk(&frame.payload),
                other => {
                    trace!(event_type = ?other, "Ignoring Bedrock event");
                    None
                }
            },
            Some("exception") | Some("error") => {
                let kind = frame
                    .header(":exception-type")
                    .or_else(|| frame.header(":error-code"))
                    .unwrap_or("BedrockError");
                let message = match frame.header(":error-message") {
                    Some(msg) => msg.to_string(),
                    None => error_detail(&String::from_utf8_lossy(&frame.payload)),
                };
                Some(Decoded::Error(format!("{kind}: {message}")))
            }
            other => {
                warn!(message_type = ?other, "Unexpected Bedrock frame");
                None
            }
        }
    }
}

/// Unwrap `{"bytes": "<base64>"}` and decode the inner Messages-API event.
fn decode_chunk(payload: &[u8]) -> Option<Decoded> {
    let chunk: ChunkPayload = match serde_json::from_slice(payload) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse Bedrock chunk: {e}");
            return None;
        }
    };
    let inner = match STANDARD.decode(chunk.bytes.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to decode Bedrock chunk bytes: {e}");
            return None;
        }
    };
    decode_event_json(&String::from_utf8_lossy(&inner))
}

impl FrameDecoder for BedrockEventDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Decoded> {
        match self.frames.push(bytes) {
            Ok(frames) => {
                let items: Vec<Decoded> = frames.iter().filter_map(Self::decode_frame).collect();
                self.stopped |= items.contains(&Decoded::Stop);
                items
            }
            Err(e) => vec![Decoded::Error(e.to_string())],
        }
    }

    fn finish(&mut self) -> Vec<Decoded> {
        if self.frames.pending() > 0 {
            vec![Decoded::Error(format!(
                "stream ended inside a frame ({} bytes pending)",
                self.frames.pending()
            ))]
        } else if !self.stopped {
            vec![Decoded::Error("stream ended before message_stop".into())]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::provider::eventstream::encode_frame;

    fn provider() -> BedrockProvider {
        BedrockProvider::new(
            ProviderConfig::new(ProviderKind::Bedrock)
                .with_api_key("bedrock-key")
                .with_region("us-west-2"),
        )
        .unwrap()
    }

    fn chunk(event_json: &str) -> Vec<u8> {
        let payload = serde_json::json!({ "bytes": STANDARD.encode(event_json) }).to_string();
        encode_frame(
            &[(":message-type", "event"), (":event-type", "chunk")],
            payload.as_bytes(),
        )
    }

    fn text_delta(text: &str) -> Vec<u8> {
        chunk(
            &serde_json::json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": text},
            })
            .to_string(),
        )
    }

    #[test]
    fn missing_key_is_not_configured() {
        let err = BedrockProvider::new(ProviderConfig::new(ProviderKind::Bedrock)).unwrap_err();
        assert!(matches!(err, MurmurError::ProviderNotConfigured { provider: "bedrock", .. }));
    }

    #[test]
    fn urls_escape_model_colon() {
        let p = provider();
        assert_eq!(
            p.url(Action::Invoke),
            "https://bedrock-runtime.us-west-2.amazonaws.com/model/us.anthropic.claude-3-5-sonnet-20241022-v2%3A0/invoke"
        );
        assert!(p.url(Action::InvokeStream).ends_with("/invoke-with-response-stream"));
    }

    #[test]
    fn request_body_uses_anthropic_schema() {
        let p = provider();
        let messages = vec![Message::system("old"), Message::user("hi")];
        let body = serde_json::to_value(p.request_body(&messages, "sys")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "anthropic_version": "bedrock-2023-05-31",
                "max_tokens": 4096,
                "temperature": 0.7f32,
                "system": "sys",
                "messages": [{"role": "user", "content": "hi"}],
            })
        );
    }

    #[test]
    fn decoder_yields_fragments_across_split_frames() {
        let mut bytes = text_delta("Hel");
        bytes.extend(text_delta("lo, "));
        bytes.extend(text_delta("world"));
        bytes.extend(chunk(r#"{"type":"message_stop"}"#));

        let mut decoder = BedrockEventDecoder::default();
        let mut items = Vec::new();
        for piece in bytes.chunks(11) {
            items.extend(decoder.feed(piece));
        }
        assert_eq!(
            items,
            vec![
                Decoded::Text("Hel".into()),
                Decoded::Text("lo, ".into()),
                Decoded::Text("world".into()),
                Decoded::Stop,
            ]
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn exception_frame_becomes_error() {
        let frame = encode_frame(
            &[
                (":message-type", "exception"),
                (":exception-type", "throttlingException"),
            ],
            br#"{"message":"Too many requests"}"#,
        );
        let mut decoder = BedrockEventDecoder::default();
        assert_eq!(
            decoder.feed(&frame),
            vec![Decoded::Error("throttlingException: Too many requests".into())]
        );
    }

    #[test]
    fn truncated_body_reports_error_on_finish() {
        let frame = text_delta("partial");
        let mut decoder = BedrockEventDecoder::default();
        assert!(decoder.feed(&frame[..frame.len() - 3]).is_empty());
        assert!(matches!(decoder.finish().as_slice(), [Decoded::Error(_)]));
    }

    #[test]
    fn body_cut_between_frames_reports_error_on_finish() {
        let mut decoder = BedrockEventDecoder::default();
        let mut bytes = text_delta("Hel");
        bytes.extend(text_delta("lo"));
        assert_eq!(
            decoder.feed(&bytes),
            vec![Decoded::Text("Hel".into()), Decoded::Text("lo".into())]
        );
        assert_eq!(
            decoder.finish(),
            vec![Decoded::Error("stream ended before message_stop".into())]
        );
    }

    #[test]
    fn bad_base64_chunk_is_skipped() {
        let frame = encode_frame(
            &[(":message-type", "event"), (":event-type", "chunk")],
            br#"{"bytes":"!!!not base64"}"#,
        );
        let mut decoder = BedrockEventDecoder::default();
        assert!(decoder.feed(&frame).is_empty());
    }
}
