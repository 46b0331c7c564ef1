//! One connected client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use printfleet_core::SessionId;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatch::ResponseEnvelope;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// A connected client session.
///
/// `S` is the per-session extension state the action handlers keep, such
/// as subscriptions. Outbound text goes through a bounded queue drained by
/// the session's writer task. Pushes are dropped when the queue is full;
/// replies wait for room.
pub struct Session<S> {
    id: SessionId,
    outbound: mpsc::Sender<Arc<str>>,
    state: S,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped: AtomicU64,
    cancel: CancellationToken,
}

impl<S> Session<S> {
    /// A session writing to `outbound`.
    pub fn new(id: SessionId, outbound: mpsc::Sender<Arc<str>>, state: S) -> Self {
        let now = Instant::now();
        Self {
            id,
            outbound,
            state,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Handler-owned extension state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Enqueue `text`. Returns `false` when the queue is full or the session
    /// is gone; the message is dropped and counted.
    pub fn send(&self, text: Arc<str>) -> bool {
        match self.outbound.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                debug!(session_id = %self.id, "outbound queue full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue the reply to a request, waiting for room in the queue.
    /// Returns `false` only when the session closes first.
    pub async fn reply(&self, text: Arc<str>) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.outbound.send(text) => sent.is_ok(),
        }
    }

    /// Serialize and enqueue `envelope`.
    pub fn send_envelope<T: Serialize>(&self, envelope: &ResponseEnvelope<T>) -> bool {
        match envelope.to_text() {
            Ok(text) => self.send(text.into()),
            Err(error) => {
                warn!(session_id = %self.id, topic = %envelope.topic, %error, "failed to serialize envelope");
                false
            }
        }
    }

    /// Messages dropped on a full queue.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the session has not been closed.
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.outbound.is_closed()
    }

    /// Close the session. Its socket is closed by the session loop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Cancelled when the session ends, for tasks scoped to it.
    pub fn closed_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the client last sent any frame.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Time since the session was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("dropped", &self.drop_count())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
