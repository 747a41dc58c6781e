//! Turn lifecycle: the single-flight send/queue/cancel state machine
//!
//! At most one turn is in flight per conversation. A send arriving while a
//! turn streams merges into the single queued message instead of starting a
//! second stream; the queued message is consumed exactly once when the turn
//! completes. Every turn captures the conversation's generation counter at
//! start; a stream running for a stale generation stops consuming and skips
//! finalization entirely.

use crate::backend::{Backend, ImageAttachment, QueryOptions, QueryRequest};
use crate::dispatcher::{ControllerContext, StreamController, classify_result};
use crate::error::{Error, Result};
use crate::events::EngineEvent;
use crate::handle::EngineHandle;
use crate::render::RenderDelegate;
use crate::subagent::SubagentTracker;
use async_trait::async_trait;
use futures::StreamExt;
use loom_protocol::{ConversationSnapshot, Message, SubagentInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, atomic::Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tool name that spawns a subagent
    pub spawn_tool: String,
    /// Tool name of the invisible link joining an async subagent's output
    /// back into the parent message
    pub link_tool: String,
    /// Default per-turn options forwarded to the backend
    pub options: QueryOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spawn_tool: "dispatch_agent".into(),
            link_tool: "agent_result".into(),
            options: QueryOptions::default(),
        }
    }
}

/// One user-initiated send request
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SendRequest {
    pub content: String,
    pub images: Vec<ImageAttachment>,
    /// Editor/selection context appended to the prompt
    pub editor_context: Option<String>,
    /// Prefix prepended to the prompt (e.g. an expanded command)
    pub prompt_prefix: Option<String>,
}

impl SendRequest {
    /// Create a plain text request
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// The single pending message accumulated while a turn is in flight.
///
/// Multiple sends during one busy period merge: content segments are
/// newline-joined and image attachments concatenated. Consumed exactly
/// once when the turn completes, or discarded on conversation reset.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    segments: Vec<String>,
    images: Vec<ImageAttachment>,
    editor_context: Option<String>,
    prompt_prefix: Option<String>,
}

impl QueuedMessage {
    pub(crate) fn from_request(request: SendRequest) -> Self {
        Self {
            segments: vec![request.content],
            images: request.images,
            editor_context: request.editor_context,
            prompt_prefix: request.prompt_prefix,
        }
    }

    pub(crate) fn merge(&mut self, request: SendRequest) {
        self.segments.push(request.content);
        self.images.extend(request.images);
        if request.editor_context.is_some() {
            self.editor_context = request.editor_context;
        }
        if self.prompt_prefix.is_none() {
            self.prompt_prefix = request.prompt_prefix;
        }
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn drop_oldest_segment(&mut self) {
        if !self.segments.is_empty() {
            self.segments.remove(0);
        }
    }

    /// Merged content, newline-joined in arrival order
    pub fn content(&self) -> String {
        self.segments.join("\n")
    }

    fn into_request(self) -> SendRequest {
        SendRequest {
            content: self.segments.join("\n"),
            images: self.images,
            editor_context: self.editor_context,
            prompt_prefix: self.prompt_prefix,
        }
    }
}

/// Persistence contract: the engine hands snapshots out, it never reads
/// them back mid-turn. Writes are best-effort; a failure is logged, not
/// propagated, so finalization always runs to completion.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn persist(&self, snapshot: &ConversationSnapshot) -> std::io::Result<()>;
}

enum TurnOutcome {
    Completed { interrupted: bool },
    /// Superseded by a generation bump; finalization was skipped
    Fenced,
}

/// A conversation: its snapshot plus the machinery that streams turns into it.
pub struct Conversation {
    config: EngineConfig,
    snapshot: ConversationSnapshot,
    backend: Arc<dyn Backend>,
    render: Arc<dyn RenderDelegate>,
    sink: Option<Arc<dyn SnapshotSink>>,
    tracker: Arc<Mutex<SubagentTracker>>,
    event_tx: broadcast::Sender<EngineEvent>,
    handle: EngineHandle,
    /// Subagent id -> index of the message that recorded it
    subagent_owner: HashMap<String, usize>,
    suppress_usage: bool,
    last_error: Option<String>,
}

impl Conversation {
    /// Create a conversation over an already-opened backend handle
    pub fn new(config: EngineConfig, backend: Arc<dyn Backend>, render: Arc<dyn RenderDelegate>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            snapshot: ConversationSnapshot::new(),
            backend,
            render,
            sink: None,
            tracker: Arc::new(Mutex::new(SubagentTracker::new())),
            event_tx,
            handle: EngineHandle::new(),
            subagent_owner: HashMap::new(),
            suppress_usage: false,
            last_error: None,
        }
    }

    /// Attach a persistence sink
    pub fn set_sink(&mut self, sink: Arc<dyn SnapshotSink>) {
        self.sink = Some(sink);
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Get a cloneable handle for cancel/queue/invalidate from external code
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// The current conversation snapshot
    pub fn snapshot(&self) -> &ConversationSnapshot {
        &self.snapshot
    }

    /// All messages
    pub fn messages(&self) -> &[Message] {
        &self.snapshot.messages
    }

    /// Last stream error, if the previous turn recorded one
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether a turn is in flight
    pub fn is_streaming(&self) -> bool {
        self.handle.is_streaming()
    }

    /// Suppress or re-enable usage chunk application (used around session
    /// resets, when early figures would corrupt the displayed meter)
    pub fn set_usage_suppressed(&mut self, suppressed: bool) {
        self.suppress_usage = suppressed;
    }

    /// Replace the conversation state, invalidating any in-flight stream.
    ///
    /// Bumps the generation so a still-running chunk loop stops without
    /// persisting, discards the queued message, and orphans async
    /// subagents that have not reached a terminal state.
    pub async fn reset(&mut self, snapshot: ConversationSnapshot) {
        self.handle.bump_generation();
        self.handle.cancel.lock().cancel();
        *self.handle.queued.lock() = None;
        self.handle.is_streaming.store(false, Ordering::Release);
        self.handle.idle_notify.notify_waiters();

        let effects = self.tracker.lock().orphan_all();
        for effect in effects {
            let info = effect.info().clone();
            self.render.subagent_updated(&info).await;
            let _ = self.event_tx.send(EngineEvent::SubagentChanged {
                id: info.id,
                status: info.status,
            });
        }

        self.snapshot = snapshot;
        self.subagent_owner.clear();
        self.suppress_usage = true;
        self.last_error = None;
    }

    /// Apply a background subagent completion callback.
    ///
    /// Safe to call after the main stream finished; no-ops against
    /// terminal or orphaned state, even if it races the link result.
    pub async fn complete_background(&mut self, agent_id: &str, content: &str, is_error: bool) {
        let status = classify_result(content, is_error);
        let effect = self
            .tracker
            .lock()
            .complete_background(agent_id, status, content);
        let Some(effect) = effect else {
            return;
        };

        let info = effect.info().clone();
        self.render.subagent_updated(&info).await;
        let _ = self.event_tx.send(EngineEvent::SubagentChanged {
            id: info.id.clone(),
            status: info.status,
        });
        self.apply_subagent_to_owner(info);
        self.persist().await;
    }

    fn apply_subagent_to_owner(&mut self, info: SubagentInfo) {
        if let Some(&index) = self.subagent_owner.get(&info.id) {
            if let Some(message) = self.snapshot.messages.get_mut(index) {
                message.upsert_subagent(info);
            }
        }
    }

    /// Send a message. Starts a turn when idle; otherwise merges into the
    /// single queued message, which is resent exactly once after the
    /// active turn ends.
    pub async fn send(&mut self, request: SendRequest) -> Result<()> {
        if self.handle.is_streaming() {
            self.handle.queue(request);
            let _ = self.event_tx.send(EngineEvent::QueueChanged { pending: true });
            return Ok(());
        }

        let mut next = Some(request);
        while let Some(request) = next {
            next = self.run_turn(request).await?;
        }
        Ok(())
    }

    /// Compose the prompt sent to the backend
    fn build_prompt(request: &SendRequest) -> String {
        let mut prompt = String::new();
        if let Some(prefix) = &request.prompt_prefix {
            prompt.push_str(prefix);
            prompt.push('\n');
        }
        prompt.push_str(&request.content);
        if let Some(context) = &request.editor_context {
            prompt.push('\n');
            prompt.push_str(context);
        }
        prompt
    }

    /// Run one turn. Returns the dequeued follow-up request, if one should
    /// be resent.
    async fn run_turn(&mut self, request: SendRequest) -> Result<Option<SendRequest>> {
        let generation = self.handle.generation();
        *self.handle.cancel.lock() = CancellationToken::new();
        let cancel = self.handle.cancel.lock().clone();

        let query = QueryRequest {
            prompt: Self::build_prompt(&request),
            images: request.images.clone(),
            // Excludes the in-progress turn so session rebuild does not
            // duplicate it
            history: self.snapshot.messages.clone(),
            options: self.config.options.clone(),
        };

        // A backend failure here aborts before any message is added to
        // history, leaving state unchanged for retry
        let mut stream = match self.backend.query(query, cancel.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                let message = e.to_string();
                let _ = self.event_tx.send(EngineEvent::StreamError {
                    message: message.clone(),
                });
                return Err(Error::BackendUnavailable(message));
            }
        };

        self.handle.is_streaming.store(true, Ordering::Release);
        self.last_error = None;
        let _ = self.event_tx.send(EngineEvent::TurnStarted { generation });
        self.snapshot.messages.push(Message::user(request.content));

        let ctx = ControllerContext {
            tracker: self.tracker.clone(),
            render: self.render.clone(),
            event_tx: self.event_tx.clone(),
            spawn_tool: self.config.spawn_tool.clone(),
            link_tool: self.config.link_tool.clone(),
            session_id: self.snapshot.session_id.clone(),
            suppress_usage: self.suppress_usage,
        };
        let mut controller = StreamController::new(ctx, self.snapshot.usage.clone());

        let outcome = loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => None,
                chunk = stream.next() => chunk,
            };

            // Generation fencing takes precedence over ordinary cancellation
            if self.handle.generation() != generation {
                break TurnOutcome::Fenced;
            }
            let Some(chunk) = chunk else {
                break TurnOutcome::Completed {
                    interrupted: cancel.is_cancelled(),
                };
            };
            if cancel.is_cancelled() {
                break TurnOutcome::Completed { interrupted: true };
            }

            let terminal = chunk.is_terminal();
            controller.handle(chunk).await;
            if terminal {
                break TurnOutcome::Completed { interrupted: false };
            }
        };

        let interrupted = match outcome {
            TurnOutcome::Fenced => {
                // Stale stream: skip finalization entirely so the now-active
                // conversation's state is never touched. No persistence, no
                // queue processing.
                tracing::debug!(generation, "stream superseded, dropping remainder");
                self.handle.is_streaming.store(false, Ordering::Release);
                self.handle.idle_notify.notify_waiters();
                return Ok(None);
            }
            TurnOutcome::Completed { interrupted } => interrupted,
        };

        if interrupted {
            // The backend's own interrupt call runs in parallel with local
            // finalization
            let backend = self.backend.clone();
            tokio::spawn(async move {
                backend.cancel().await;
            });
        }

        // Finalization always runs: dangling buffers would corrupt the next
        // turn. Flush pending tools, close open blocks, mark interruption.
        controller.finish(interrupted).await;
        let (message, usage, stream_error) = controller.into_parts();

        if !message.is_empty() {
            let index = self.snapshot.messages.len();
            for subagent in &message.subagents {
                self.subagent_owner.insert(subagent.id.clone(), index);
            }
            self.snapshot.messages.push(message);
        }
        self.snapshot.usage = usage;
        self.snapshot.updated_at = chrono::Utc::now().timestamp_millis();
        self.last_error = stream_error;
        self.persist().await;

        let _ = self.event_tx.send(EngineEvent::TurnEnded {
            generation,
            interrupted,
            usage: self.snapshot.usage.clone(),
        });
        self.handle.is_streaming.store(false, Ordering::Release);
        self.handle.idle_notify.notify_waiters();

        // Consume the queued message exactly once: resend after a normal or
        // errored turn, hand back to the input after a cancellation
        let queued = self.handle.queued.lock().take();
        if let Some(queued) = queued {
            let _ = self.event_tx.send(EngineEvent::QueueChanged { pending: false });
            if interrupted {
                let _ = self.event_tx.send(EngineEvent::InputRestored {
                    request: queued.into_request(),
                });
                return Ok(None);
            }
            return Ok(Some(queued.into_request()));
        }
        Ok(None)
    }

    async fn persist(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.persist(&self.snapshot).await {
            tracing::warn!("failed to persist conversation snapshot: {}", e);
        }
    }
}
