//! A cloneable handle for poking a conversation from external code.

use crate::turn::{QueuedMessage, SendRequest};
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio_util::sync::CancellationToken;

/// A cloneable handle for poking a conversation from external code.
///
/// All fields are `Arc`-wrapped, so cloning is cheap. The queued message
/// and the generation counter are the only conversation state mutable from
/// outside the active chunk-processing loop.
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) queued: Arc<Mutex<Option<QueuedMessage>>>,
    pub(crate) generation: Arc<AtomicU64>,
    pub(crate) is_streaming: Arc<AtomicBool>,
    pub(crate) idle_notify: Arc<tokio::sync::Notify>,
}

impl EngineHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            queued: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            is_streaming: Arc::new(AtomicBool::new(false)),
            idle_notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Maximum number of merged segments in the queued message.
    const MAX_QUEUE_SEGMENTS: usize = 100;

    /// Request cooperative cancellation of the in-flight turn.
    pub fn interrupt(&self) {
        self.cancel.lock().cancel();
    }

    /// The conversation's current stream generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate any in-flight stream. A loop running for an older
    /// generation stops consuming and skips finalization entirely.
    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Merge a send request into the pending queued message, creating it
    /// on first use. Returns true if a queued message now exists.
    pub fn queue(&self, request: SendRequest) -> bool {
        let mut slot = self.queued.lock();
        match slot.as_mut() {
            Some(queued) => {
                queued.merge(request);
                if queued.segment_count() > Self::MAX_QUEUE_SEGMENTS {
                    tracing::warn!(
                        "Queued message full ({} segments), dropping oldest",
                        Self::MAX_QUEUE_SEGMENTS
                    );
                    queued.drop_oldest_segment();
                }
            }
            None => *slot = Some(QueuedMessage::from_request(request)),
        }
        true
    }

    /// Whether a queued message is pending.
    pub fn has_queued(&self) -> bool {
        self.queued.lock().is_some()
    }

    /// Whether a turn is currently in flight.
    pub fn is_streaming(&self) -> bool {
        self.is_streaming.load(Ordering::Acquire)
    }

    /// Wait until the conversation becomes idle.
    pub async fn wait_for_idle(&self) {
        let notified = self.idle_notify.notified();
        if !self.is_streaming.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    /// Wait until idle with a timeout. Returns `true` if idle was reached.
    pub async fn wait_for_idle_timeout(&self, timeout: std::time::Duration) -> bool {
        if !self.is_streaming.load(Ordering::Acquire) {
            return true;
        }
        tokio::time::timeout(timeout, self.wait_for_idle())
            .await
            .is_ok()
    }
}
