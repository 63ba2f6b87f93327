//! The conversation session engine.
//!
//! [`ChatSession`] owns one conversation at a time: its id, the system prompt
//! assembled from the current context, and the visible message list. Hosts
//! plug in through [`DisplaySink`] (transcript rendering) and
//! [`InputSource`] (pending user text); the engine never touches a UI
//! directly.
//!
//! # Turn lifecycle
//!
//! 1. Blank input is a no-op ([`TurnOutcome::Skipped`]).
//! 2. If no conversation is active, one is started and persisted.
//! 3. The trimmed USER message is appended and the system prompt is
//!    reassembled, since buffers and files may have changed.
//! 4. The provider is called. Blocking turns go through
//!    [`retry_call`]; streamed turns append an ASSISTANT message on the
//!    first fragment and grow it in place, rendering after each fragment.
//! 5. The transcript (system prompt plus visible messages) is persisted.
//!
//! Failed turns are never rolled back: the USER message stays, and any
//! partial ASSISTANT text already streamed is kept and saved.
//!
//! Turn methods take `&mut self`, so two turns can never overlap on one
//! session. A streamed turn can be abandoned with
//! [`send_turn_streamed_until`](ChatSession::send_turn_streamed_until); the
//! provider stream is dropped before the method returns, so no late fragment
//! can reach a later turn.

use crate::config::BASE_SYSTEM_PROMPT;
use crate::context::{ContextSource, assemble};
use crate::error::Result;
use crate::provider::Provider;
use crate::retry::{RetryConfig, retry_call};
use crate::store::{ConversationStore, ConversationSummary, generate_conversation_id};
use crate::{Message, Role};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ── Host seams ─────────────────────────────────────────────────────

/// Surface that shows the transcript to the user.
///
/// `render` fires after every visible mutation, including once per streamed
/// fragment, so implementations should be cheap. Both methods must be safe
/// to call when nothing is on screen.
pub trait DisplaySink: Send + Sync {
    /// Redraw with the full visible message list (never contains SYSTEM).
    fn render(&self, messages: &[Message]);

    /// Make the display visible. Called before rendering a loaded
    /// conversation.
    fn show(&self) {}
}

/// Display sink that discards everything.
pub struct NoopDisplay;

impl DisplaySink for NoopDisplay {
    fn render(&self, _messages: &[Message]) {}
}

/// Source of text the user has typed but not yet submitted.
pub trait InputSource {
    /// Destructively read the pending text, if any.
    fn take_pending_text(&mut self) -> Option<String>;
}

impl InputSource for Option<String> {
    fn take_pending_text(&mut self) -> Option<String> {
        self.take()
    }
}

// ── Options and outcomes ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Prompt the assembled context is appended to.
    pub base_prompt: String,
    /// Retry policy for blocking completions.
    pub retry: RetryConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            base_prompt: BASE_SYSTEM_PROMPT.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl SessionOptions {
    pub fn with_base_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_prompt = prompt.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No conversation id has been assigned yet.
    NoConversation,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Blocking,
    Streamed,
}

/// How a turn ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Input was blank; nothing changed.
    Skipped,
    Completed,
    /// The caller's cancellation fired mid-stream; partial text was kept.
    Cancelled,
}

// ── ChatSession ────────────────────────────────────────────────────

pub struct ChatSession {
    provider: Arc<dyn Provider>,
    store: ConversationStore,
    context: Arc<dyn ContextSource>,
    display: Arc<dyn DisplaySink>,
    options: SessionOptions,
    conversation_id: Option<String>,
    system_prompt: String,
    /// Visible messages only; the system prompt is kept separately.
    messages: Vec<Message>,
}

impl ChatSession {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: ConversationStore,
        context: Arc<dyn ContextSource>,
        display: Arc<dyn DisplaySink>,
        options: SessionOptions,
    ) -> Self {
        let system_prompt = options.base_prompt.clone();
        Self {
            provider,
            store,
            context,
            display,
            options,
            conversation_id: None,
            system_prompt,
            messages: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.conversation_id.is_some() {
            SessionState::Active
        } else {
            SessionState::NoConversation
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// The visible transcript. Never contains SYSTEM messages.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// System prompt as of the last assembly.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    fn assemble_prompt(&self) -> String {
        assemble(
            &self.options.base_prompt,
            &self.context.active_buffers(),
            &self.context.registered_files(),
        )
    }

    /// The persisted form: leading SYSTEM message, then the visible ones.
    fn document(&self) -> Vec<Message> {
        let mut doc = Vec::with_capacity(self.messages.len() + 1);
        doc.push(Message::system(self.system_prompt.clone()));
        doc.extend(self.messages.iter().cloned());
        doc
    }

    fn persist(&self) -> Result<()> {
        match &self.conversation_id {
            Some(id) => self.store.save(id, &self.document()),
            None => Ok(()),
        }
    }

    /// Persist after a failed or cancelled turn. The turn's own outcome
    /// wins over a storage error, which is only logged.
    fn persist_best_effort(&self) {
        if let Err(e) = self.persist() {
            warn!(
                conversation_id = self.conversation_id.as_deref().unwrap_or_default(),
                "Failed to save conversation: {e}"
            );
        }
    }

    fn render(&self) {
        self.display.render(&self.messages);
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Begin a fresh conversation and persist it with just its system
    /// prompt, so it is listable before the first reply.
    pub fn start_new_conversation(&mut self) -> Result<()> {
        let id = generate_conversation_id();
        self.messages.clear();
        self.system_prompt = self.assemble_prompt();
        self.conversation_id = Some(id);
        info!(
            conversation_id = self.conversation_id.as_deref().unwrap_or_default(),
            provider = self.provider.name(),
            "Started new conversation"
        );
        self.render();
        self.persist()
    }

    /// Drop the current conversation and immediately start a new one.
    pub fn clear(&mut self) -> Result<()> {
        debug!(
            conversation_id = self.conversation_id.as_deref().unwrap_or_default(),
            "Clearing conversation"
        );
        self.conversation_id = None;
        self.messages.clear();
        self.start_new_conversation()
    }

    /// Replace the current conversation with a stored one.
    ///
    /// Returns `Ok(false)` and leaves the session untouched when `id` is not
    /// stored. On success the display is shown and re-rendered.
    pub fn load_conversation(&mut self, id: &str) -> Result<bool> {
        let Some(stored) = self.store.load(id)? else {
            info!(conversation_id = id, "Conversation not found");
            return Ok(false);
        };

        let (system, visible): (Vec<Message>, Vec<Message>) =
            stored.into_iter().partition(|m| m.role == Role::System);
        self.system_prompt = match system.into_iter().next() {
            Some(msg) => msg.content,
            None => self.assemble_prompt(),
        };
        self.messages = visible;
        self.conversation_id = Some(id.to_string());
        info!(
            conversation_id = id,
            messages = self.messages.len(),
            "Loaded conversation"
        );

        self.display.show();
        self.render();
        Ok(true)
    }

    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.store.list()
    }

    // ── Turns ──────────────────────────────────────────────────────

    /// Shared turn prologue. Returns `false` for blank input.
    fn begin_turn(&mut self, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring blank input");
            return Ok(false);
        }
        if self.conversation_id.is_none() {
            self.start_new_conversation()?;
        }
        self.messages.push(Message::user(text));
        self.system_prompt = self.assemble_prompt();
        debug!(
            conversation_id = self.conversation_id.as_deref().unwrap_or_default(),
            messages = self.messages.len(),
            system_prompt_len = self.system_prompt.len(),
            "Turn started"
        );
        self.render();
        Ok(true)
    }

    /// Blocking turn: one completion through the retry policy.
    pub async fn send_turn(&mut self, text: &str) -> Result<TurnOutcome> {
        if !self.begin_turn(text)? {
            return Ok(TurnOutcome::Skipped);
        }

        let provider = Arc::clone(&self.provider);
        let messages = &self.messages;
        let system_prompt = self.system_prompt.as_str();
        let result = retry_call(&self.options.retry, || {
            provider.complete(messages, system_prompt)
        })
        .await;

        match result {
            Ok(reply) => {
                debug!(reply_len = reply.len(), "Turn completed");
                self.messages.push(Message::assistant(reply));
                self.render();
                self.persist()?;
                Ok(TurnOutcome::Completed)
            }
            Err(e) => {
                warn!(provider = self.provider.name(), "Turn failed: {e}");
                self.persist_best_effort();
                Err(e)
            }
        }
    }

    /// Streamed turn, consumed to the end.
    pub async fn send_turn_streamed(&mut self, text: &str) -> Result<TurnOutcome> {
        self.send_turn_streamed_until(text, std::future::pending())
            .await
    }

    /// Streamed turn that stops early when `cancel` completes.
    ///
    /// On cancellation the provider stream is dropped, the partial
    /// transcript is persisted and [`TurnOutcome::Cancelled`] is returned.
    /// A mid-stream provider error keeps the partial reply, persists it and
    /// surfaces the error.
    pub async fn send_turn_streamed_until<C>(&mut self, text: &str, cancel: C) -> Result<TurnOutcome>
    where
        C: Future<Output = ()>,
    {
        if !self.begin_turn(text)? {
            return Ok(TurnOutcome::Skipped);
        }
        tokio::pin!(cancel);

        let provider = Arc::clone(&self.provider);
        let opened = tokio::select! {
            opened = provider.complete_stream(&self.messages, &self.system_prompt) => opened,
            () = &mut cancel => {
                info!("Turn cancelled before the stream opened");
                self.persist_best_effort();
                return Ok(TurnOutcome::Cancelled);
            }
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(provider = self.provider.name(), "Failed to open stream: {e}");
                self.persist_best_effort();
                return Err(e);
            }
        };

        let mut reply_index: Option<usize> = None;
        let mut fragments = 0usize;
        let mut interrupted = None;
        let mut cancelled = false;
        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(fragment)) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        let index = *reply_index.get_or_insert_with(|| {
                            self.messages.push(Message::assistant(String::new()));
                            self.messages.len() - 1
                        });
                        self.messages[index].content.push_str(&fragment);
                        fragments += 1;
                        self.render();
                    }
                    Some(Err(e)) => {
                        interrupted = Some(e);
                        break;
                    }
                    None => break,
                },
                () = &mut cancel => {
                    cancelled = true;
                    break;
                }
            }
        }
        drop(stream);

        if let Some(e) = interrupted {
            warn!(fragments, "Stream interrupted: {e}");
            self.persist_best_effort();
            return Err(e);
        }
        if cancelled {
            info!(fragments, "Turn cancelled mid-stream");
            self.persist_best_effort();
            return Ok(TurnOutcome::Cancelled);
        }

        debug!(fragments, "Stream completed");
        self.persist()?;
        Ok(TurnOutcome::Completed)
    }

    /// Pull pending text from `input` and run a turn with it.
    pub async fn submit_pending(
        &mut self,
        input: &mut dyn InputSource,
        mode: TurnMode,
    ) -> Result<TurnOutcome> {
        let Some(text) = input.take_pending_text() else {
            return Ok(TurnOutcome::Skipped);
        };
        match mode {
            TurnMode::Blocking => self.send_turn(&text).await,
            TurnMode::Streamed => self.send_turn_streamed(&text).await,
        }
    }
}
