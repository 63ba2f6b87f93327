//! Error taxonomy shared by every component of the engine.
//!
//! A missing conversation is not an error: [`ConversationStore::load`](crate::store::ConversationStore::load)
//! returns `Ok(None)` and [`ChatSession::load_conversation`](crate::session::ChatSession::load_conversation)
//! returns `Ok(false)`.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = MurmurError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MurmurError {
    /// Required credentials were absent when the provider was constructed.
    #[error("{provider} provider is not configured: {reason}")]
    ProviderNotConfigured {
        provider: &'static str,
        reason: String,
    },

    /// A blocking completion (or the opening request of a stream) failed.
    #[error("provider request failed: {0}")]
    ProviderRequestFailed(String),

    /// A stream broke after it started producing fragments.
    #[error("provider stream interrupted: {0}")]
    ProviderStreamInterrupted(String),

    /// A registered context file could not be read. Logged and skipped by
    /// the assembler, never surfaced from a turn.
    #[error("context file {path} is unreadable: {reason}")]
    ContextFileUnreadable { path: String, reason: String },

    /// Reading or writing the persistence medium failed.
    #[error("storage error: {0}")]
    StorageIo(String),

    /// A conversation id that cannot name a storage document.
    #[error("invalid conversation id: {0:?}")]
    InvalidConversationId(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MurmurError {
    /// Whether the retry policy may attempt the failed call again.
    ///
    /// Every error raised by a provider call is retryable except a missing
    /// configuration, which cannot fix itself between attempts.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            MurmurError::ProviderNotConfigured { .. }
                | MurmurError::InvalidConfig(_)
                | MurmurError::InvalidConversationId(_)
        )
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        MurmurError::StorageIo(format!("{context}: {err}"))
    }
}
