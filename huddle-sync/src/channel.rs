//! Channel adapter over the call SDK's custom-event broadcast.
//!
//! The hosted video SDK exposes a fire-and-forget event bus scoped to the
//! active call: at-most-once delivery, no ordering across senders, and
//! sends can reject transiently (no peers yet, transport hiccup). The
//! [`SyncChannel`] trait is the narrow waist the engines program against;
//! nothing above it may assume a sent event was received by every peer.
//!
//! [`LocalChannel`] is the in-process implementation used by tests and
//! demos, built on `tokio::sync::broadcast` so the loss/lag behavior of
//! the real bus can be exercised deterministically.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::protocol::ChannelEvent;

/// Transient channel failures. Always recoverable by the caller's retry
/// policy; never fatal to the call.
#[derive(Debug, Clone)]
pub enum ChannelError {
    /// Nobody is listening (yet). Typical right after joining a call.
    NoPeers,
    /// The transport rejected the send.
    Transport(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPeers => write!(f, "no peers subscribed to the channel"),
            Self::Transport(e) => write!(f, "transport rejected send: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Best-effort, unordered, session-scoped event bus.
///
/// `send` may fail transiently and gives no delivery guarantee even when
/// it succeeds. `subscribe` delivers events in local arrival order only.
pub trait SyncChannel: Send + Sync + 'static {
    /// Fire-and-forget send. Returns the number of local receivers that
    /// were handed the event, which says nothing about remote delivery.
    fn send(&self, event: &ChannelEvent) -> Result<usize, ChannelError>;

    /// Subscribe to events in arrival order.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;
}

/// Statistics for monitoring channel health.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    pub events_sent: u64,
    pub sends_rejected: u64,
}

/// In-memory channel over `tokio::sync::broadcast`.
///
/// `fail_sends` injects the transient-rejection failure mode so retry
/// behavior can be tested without a flaky transport.
pub struct LocalChannel {
    sender: broadcast::Sender<ChannelEvent>,
    fail_sends: AtomicBool,
    events_sent: AtomicU64,
    sends_rejected: AtomicU64,
}

impl LocalChannel {
    /// Create a channel buffering up to `capacity` events per receiver.
    /// Lagging receivers drop oldest events, mirroring the real bus.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            fail_sends: AtomicBool::new(false),
            events_sent: AtomicU64::new(0),
            sends_rejected: AtomicU64::new(0),
        }
    }

    /// Toggle injected send failures (test hook).
    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::Relaxed);
    }

    /// Lock-free stats snapshot.
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            sends_rejected: self.sends_rejected.load(Ordering::Relaxed),
        }
    }
}

impl SyncChannel for LocalChannel {
    fn send(&self, event: &ChannelEvent) -> Result<usize, ChannelError> {
        if self.fail_sends.load(Ordering::Relaxed) {
            self.sends_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(ChannelError::Transport("injected failure".to_string()));
        }
        match self.sender.send(event.clone()) {
            Ok(count) => {
                self.events_sent.fetch_add(1, Ordering::Relaxed);
                Ok(count)
            }
            Err(_) => {
                self.sends_rejected.fetch_add(1, Ordering::Relaxed);
                Err(ChannelError::NoPeers)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.sender.subscribe()
    }
}
