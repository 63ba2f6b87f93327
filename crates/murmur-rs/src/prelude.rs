//! Convenience re-exports for common `murmur-rs` types.
//!
//! Meant to be glob-imported by hosts:
//!
//! ```ignore
//! use murmur_rs::prelude::*;
//! ```
//!
//! Decoder internals (SSE, event-stream framing) stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, MurmurError, Result, Role, display_messages};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::{MurmurConfig, ProviderConfig, ProviderKind};
pub use crate::retry::RetryConfig;

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{ContextBuffer, ContextRegistry, ContextSnapshot, ContextSource, EmptyContext};

// ── Providers ───────────────────────────────────────────────────────
pub use crate::provider::{Provider, TextStream, build_provider};

// ── Session engine ──────────────────────────────────────────────────
pub use crate::session::{
    ChatSession, DisplaySink, InputSource, NoopDisplay, SessionOptions, SessionState, TurnMode,
    TurnOutcome,
};
pub use crate::store::{ConversationStore, ConversationSummary};

// ── Logging ─────────────────────────────────────────────────────────
pub use crate::logging::FileLogLayer;
