//! Editor context: the buffers and files that enrich the system prompt.
//!
//! The engine only sees context through [`ContextSource`]. Hosts either
//! implement it directly on top of their editor, or feed a
//! [`ContextRegistry`] as buffers open, change and close.
//!
//! Buffers carry a soft `is_active` flag. Deactivating a buffer keeps it
//! tracked (same content reference, same identity); only active buffers and
//! registered files reach the prompt built by [`assembler::assemble`].

pub mod assembler;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub use assembler::{FILE_CONTEXT_BLOCK, FILE_CONTEXT_SYSTEM_PROMPT, assemble};

// ── ContextBuffer ──────────────────────────────────────────────────

/// One editor buffer as seen by the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBuffer {
    /// Stable identity (buffer number, URI, ...).
    pub identifier: String,
    /// Name shown in the context block header, usually the file path.
    pub display_name: String,
    /// Buffer text. Shared so toggling the buffer never copies it.
    pub content: Arc<str>,
    pub line_count: usize,
    pub is_active: bool,
}

impl ContextBuffer {
    /// An active buffer whose line count is derived from `content`.
    pub fn new(
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        content: impl Into<Arc<str>>,
    ) -> Self {
        let content = content.into();
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            line_count: count_lines(&content),
            content,
            is_active: true,
        }
    }
}

/// Number of lines an editor would show for `content`.
///
/// An empty buffer still has one (empty) line.
pub fn count_lines(content: &str) -> usize {
    content.lines().count().max(1)
}

// ── ContextSource ──────────────────────────────────────────────────

/// Where the engine reads context from at prompt-assembly time.
pub trait ContextSource: Send + Sync {
    /// Buffers to include, in display order. Implementations may return
    /// inactive buffers; the assembler filters them out.
    fn active_buffers(&self) -> Vec<ContextBuffer>;

    /// Extra file paths registered for context.
    fn registered_files(&self) -> Vec<PathBuf>;
}

/// A source with no buffers and no files.
pub struct EmptyContext;

impl ContextSource for EmptyContext {
    fn active_buffers(&self) -> Vec<ContextBuffer> {
        Vec::new()
    }

    fn registered_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

// ── ContextRegistry ────────────────────────────────────────────────

/// Snapshot of the registry for host pickers.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub buffers: Vec<BufferEntry>,
    pub files: Vec<PathBuf>,
}

/// One tracked buffer in a [`ContextSnapshot`].
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct BufferEntry {
    pub identifier: String,
    pub display_name: String,
    pub line_count: usize,
    pub is_active: bool,
}

#[derive(Default)]
struct RegistryInner {
    buffers: Vec<ContextBuffer>,
    files: Vec<PathBuf>,
}

/// In-process [`ContextSource`] the host keeps up to date.
///
/// Interior locking lets the host mutate the registry while the engine holds
/// an `Arc` to it. Buffers keep their insertion order.
#[derive(Default)]
pub struct ContextRegistry {
    inner: Mutex<RegistryInner>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a buffer, or refresh the content of one already tracked.
    ///
    /// New buffers start active; a refresh keeps the current flag.
    pub fn track_buffer(
        &self,
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        content: impl Into<Arc<str>>,
    ) {
        let buffer = ContextBuffer::new(identifier, display_name, content);
        let mut inner = self.lock();
        match inner
            .buffers
            .iter_mut()
            .find(|b| b.identifier == buffer.identifier)
        {
            Some(existing) => {
                existing.display_name = buffer.display_name;
                existing.line_count = buffer.line_count;
                existing.content = buffer.content;
            }
            None => {
                debug!(identifier = %buffer.identifier, "Tracking buffer");
                inner.buffers.push(buffer);
            }
        }
    }

    /// Stop tracking a buffer. Returns whether it was tracked.
    pub fn untrack_buffer(&self, identifier: &str) -> bool {
        let mut inner = self.lock();
        let before = inner.buffers.len();
        inner.buffers.retain(|b| b.identifier != identifier);
        inner.buffers.len() != before
    }

    /// Set the soft active flag. Returns `false` if the buffer is unknown.
    pub fn set_buffer_active(&self, identifier: &str, active: bool) -> bool {
        let mut inner = self.lock();
        match inner.buffers.iter_mut().find(|b| b.identifier == identifier) {
            Some(buffer) => {
                buffer.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Flip the active flag, returning the new value.
    pub fn toggle_buffer(&self, identifier: &str) -> Option<bool> {
        let mut inner = self.lock();
        let buffer = inner.buffers.iter_mut().find(|b| b.identifier == identifier)?;
        buffer.is_active = !buffer.is_active;
        Some(buffer.is_active)
    }

    /// Look up a tracked buffer (active or not).
    pub fn buffer(&self, identifier: &str) -> Option<ContextBuffer> {
        self.lock()
            .buffers
            .iter()
            .find(|b| b.identifier == identifier)
            .cloned()
    }

    pub fn clear_buffers(&self) {
        self.lock().buffers.clear();
    }

    /// Register a file. Empty and duplicate paths are ignored.
    pub fn add_file(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return false;
        }
        let mut inner = self.lock();
        if inner.files.iter().any(|f| f == path) {
            return false;
        }
        inner.files.push(path.to_path_buf());
        true
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut inner = self.lock();
        let before = inner.files.len();
        inner.files.retain(|f| f != path);
        inner.files.len() != before
    }

    pub fn clear_files(&self) {
        self.lock().files.clear();
    }

    pub fn clear_all(&self) {
        let mut inner = self.lock();
        inner.buffers.clear();
        inner.files.clear();
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let inner = self.lock();
        ContextSnapshot {
            buffers: inner
                .buffers
                .iter()
                .map(|b| BufferEntry {
                    identifier: b.identifier.clone(),
                    display_name: b.display_name.clone(),
                    line_count: b.line_count,
                    is_active: b.is_active,
                })
                .collect(),
            files: inner.files.clone(),
        }
    }
}

impl ContextSource for ContextRegistry {
    fn active_buffers(&self) -> Vec<ContextBuffer> {
        self.lock()
            .buffers
            .iter()
            .filter(|b| b.is_active)
            .cloned()
            .collect()
    }

    fn registered_files(&self) -> Vec<PathBuf> {
        self.lock().files.clone()
    }
}
