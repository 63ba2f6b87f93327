//! Conversation session engine for an editor-embedded LLM assistant.
//!
//! `murmur-rs` owns the state of one multi-turn chat with a large language
//! model, enriched with live context from the buffers and files the user is
//! working on. The core abstraction is the [`ChatSession`](session::ChatSession):
//! it keeps the message list, assembles the context-aware system prompt,
//! dispatches blocking and streaming completions through a pluggable
//! [`Provider`](provider::Provider), and persists every conversation so it can
//! be resumed later.
//!
//! The host editor stays outside the crate. It plugs in through three narrow
//! seams:
//!
//! - [`DisplaySink`](session::DisplaySink) receives the transcript after every
//!   visible mutation.
//! - [`InputSource`](session::InputSource) hands over pending user text.
//! - [`ContextSource`](context::ContextSource) lists active buffers and
//!   registered files. [`ContextRegistry`](context::ContextRegistry) is a
//!   ready-made in-process implementation.
//!
//! # Getting started
//!
//! ```ignore
//! use murmur_rs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> murmur_rs::Result<()> {
//!     let config = ProviderConfig::new(ProviderKind::Anthropic)
//!         .with_api_key(std::env::var("ANTHROPIC_API_KEY").unwrap());
//!     let provider = build_provider(config)?;
//!
//!     let store = ConversationStore::new(Some("/tmp/murmur".into()))?;
//!     let context = Arc::new(ContextRegistry::new());
//!     context.add_file("src/main.rs");
//!
//!     let mut session = ChatSession::new(
//!         provider,
//!         store,
//!         context,
//!         Arc::new(NoopDisplay),
//!         SessionOptions::default(),
//!     );
//!     session.send_turn_streamed("Summarize main.rs").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`context`] builds the system prompt from buffers and files.
//! - [`provider`] holds the capability interface and the HTTP backends.
//! - [`retry`] wraps blocking completions with bounded exponential backoff.
//! - [`store`] persists conversations as JSON documents.
//! - [`session`] is the engine that ties them together.
//! - [`transcript`] renders messages as plain text for hosts.
//! - [`logging`] installs the daily log-file tracing layer.

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod provider;
pub mod retry;
pub mod session;
pub mod store;
pub mod transcript;

pub use error::{MurmurError, Result};

use serde::{Deserialize, Serialize};

// ── Data model ─────────────────────────────────────────────────────

/// Role of a message in a conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Whether this message is part of the visible transcript.
    pub fn is_display(&self) -> bool {
        self.role != Role::System
    }
}

/// Strip SYSTEM messages, yielding the list a display surface shows.
pub fn display_messages(messages: &[Message]) -> Vec<Message> {
    messages.iter().filter(|m| m.is_display()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "hello");
        assert!(!sys.is_display());

        let user = Message::user("world");
        assert_eq!(user.role, Role::User);
        assert!(user.is_display());

        let assist = Message::assistant("reply");
        assert_eq!(assist.role, Role::Assistant);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);

        let parsed: Message = serde_json::from_str(r#"{"role":"system","content":"p"}"#).unwrap();
        assert_eq!(parsed, Message::system("p"));
    }

    #[test]
    fn display_messages_strips_system() {
        let msgs = vec![
            Message::system("prompt"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let display = display_messages(&msgs);
        assert_eq!(display, vec![Message::user("hi"), Message::assistant("hello")]);
    }

    #[test]
    fn role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::System.to_string(), "system");
    }
}
