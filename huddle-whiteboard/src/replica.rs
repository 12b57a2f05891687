//! Participant side of the whiteboard: a read-only replica.
//!
//! The replica never originates strokes (there is no drawing API on it —
//! pointer handlers gate on role upstream). It converges by:
//!
//! - appending every received `StrokeBatch` unconditionally, then
//! - replacing its entire state on every `FullState`, marking itself
//!   initialized.
//!
//! Incoming deltas are applied without checking that they postdate the
//! local version; the periodic authoritative `FullState` makes any
//! resulting divergence transient. See DESIGN.md for why that stays.
//!
//! On mount, a cached board (if any) is restored for an instant redraw;
//! otherwise a `RequestState` is sent, retried only if the send itself
//! fails. There is no reply timeout: a replica that never hears back
//! simply waits for the host's periodic broadcast.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use huddle_sync::cache::StateCache;
use huddle_sync::channel::SyncChannel;
use huddle_sync::protocol::{BoardState, ChannelEvent, EventBody, Stroke};
use huddle_sync::retry::RetryPolicy;

use crate::host::{load_cached, store_cached};

/// Redraw notifications for the canvas layer.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    /// Incremental: draw this stroke on top of the current canvas.
    Stroke(Stroke),
    /// The whole board changed; repaint from scratch.
    FullRedraw,
    /// The board was wiped.
    Cleared,
}

/// The participant engine. Holds a replica that must be treated as
/// read-only and overwritten wholesale on `FullState`.
pub struct WhiteboardReplica<C: SyncChannel> {
    session_id: Uuid,
    local_id: Uuid,
    channel: Arc<C>,
    cache: Arc<dyn StateCache>,
    retry: RetryPolicy,
    state: Arc<RwLock<BoardState>>,
    initialized: Arc<AtomicBool>,
    event_rx: Option<mpsc::Receiver<BoardEvent>>,
    event_tx: mpsc::Sender<BoardEvent>,
    task: Option<JoinHandle<()>>,
}

impl<C: SyncChannel> WhiteboardReplica<C> {
    pub fn new(
        session_id: Uuid,
        local_id: Uuid,
        channel: Arc<C>,
        cache: Arc<dyn StateCache>,
        retry: RetryPolicy,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            session_id,
            local_id,
            channel,
            cache,
            retry,
            state: Arc::new(RwLock::new(BoardState::new())),
            initialized: Arc::new(AtomicBool::new(false)),
            event_rx: Some(event_rx),
            event_tx,
            task: None,
        }
    }

    /// Take the redraw event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<BoardEvent>> {
        self.event_rx.take()
    }

    /// Restore the cache, start listening, and ask the host for state if
    /// no cache was found.
    pub async fn mount(&mut self) {
        // Subscribe before requesting so the reply cannot be missed.
        let mut rx = self.channel.subscribe();

        let had_cache = match load_cached(&*self.cache, self.session_id) {
            Some(cached) => {
                log::info!(
                    "whiteboard replica: redrawing {} strokes (v{}) from cache",
                    cached.strokes.len(),
                    cached.version
                );
                *self.state.write().await = cached;
                let _ = self.event_tx.send(BoardEvent::FullRedraw).await;
                true
            }
            None => false,
        };

        let session_id = self.session_id;
        let local_id = self.local_id;
        let state = self.state.clone();
        let cache = self.cache.clone();
        let initialized = self.initialized.clone();
        let event_tx = self.event_tx.clone();

        self.task = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.is_for(session_id, local_id) => {
                        apply_event(
                            event, &state, &*cache, &initialized, &event_tx, session_id,
                        )
                        .await;
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Lost deltas; the next FullState heals this.
                        log::warn!("whiteboard replica: lagged by {n} events, awaiting resync");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        if !had_cache {
            let event =
                ChannelEvent::new(self.local_id, self.session_id, EventBody::RequestState);
            let channel = self.channel.clone();
            // Retries cover the send itself only; there is deliberately no
            // reply timeout — the periodic host broadcast is the backstop.
            self.retry
                .run("whiteboard state request", || channel.send(&event))
                .await;
        }
    }

    /// Whether an authoritative `FullState` has been applied yet.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    /// Snapshot of the local replica.
    pub async fn state(&self) -> BoardState {
        self.state.read().await.clone()
    }

    /// Tear down the listener. In-flight retries no-op afterwards.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<C: SyncChannel> Drop for WhiteboardReplica<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn apply_event(
    event: ChannelEvent,
    state: &RwLock<BoardState>,
    cache: &dyn StateCache,
    initialized: &AtomicBool,
    event_tx: &mpsc::Sender<BoardEvent>,
    session_id: Uuid,
) {
    match event.body {
        EventBody::StrokeBatch(stroke) => {
            {
                let mut state = state.write().await;
                state.append(stroke.clone());
                store_cached(cache, session_id, &state);
            }
            let _ = event_tx.send(BoardEvent::Stroke(stroke)).await;
        }
        EventBody::FullState(board) => {
            {
                let mut state = state.write().await;
                state.replace_with(board);
                store_cached(cache, session_id, &state);
            }
            initialized.store(true, Ordering::Relaxed);
            let _ = event_tx.send(BoardEvent::FullRedraw).await;
        }
        EventBody::ClearBoard => {
            {
                let mut state = state.write().await;
                state.clear();
                store_cached(cache, session_id, &state);
            }
            let _ = event_tx.send(BoardEvent::Cleared).await;
        }
        // Quiz traffic shares the channel; not ours.
        EventBody::RequestState
        | EventBody::QuizStart { .. }
        | EventBody::QuizEnd { .. }
        | EventBody::QuizCompleted { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_sync::cache::MemoryCache;
    use huddle_sync::channel::LocalChannel;
    use huddle_sync::protocol::Point;
    use std::time::Duration;
    use tokio::time::timeout;

    fn stroke(n: usize) -> Stroke {
        Stroke {
            points: (0..n).map(|i| Point::new(i as f32, 0.0)).collect(),
            color: "#000".to_string(),
            new_stroke: true,
        }
    }

    async fn mounted_replica(
        session_id: Uuid,
        channel: Arc<LocalChannel>,
    ) -> (WhiteboardReplica<LocalChannel>, mpsc::Receiver<BoardEvent>) {
        let mut replica = WhiteboardReplica::new(
            session_id,
            Uuid::new_v4(),
            channel,
            Arc::new(MemoryCache::new()),
            RetryPolicy::new(1, Duration::from_millis(1)),
        );
        let rx = replica.take_event_rx().unwrap();
        replica.mount().await;
        (replica, rx)
    }

    #[tokio::test]
    async fn test_mount_without_cache_requests_state() {
        let session_id = Uuid::new_v4();
        let channel = Arc::new(LocalChannel::new(64));
        let mut host_rx = channel.subscribe();

        let (_replica, _events) = mounted_replica(session_id, channel).await;

        let event = timeout(Duration::from_secs(1), host_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event.body {
            EventBody::RequestState => {}
            other => panic!("Expected RequestState, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stroke_applied_and_forwarded() {
        let session_id = Uuid::new_v4();
        let channel = Arc::new(LocalChannel::new(64));
        let (replica, mut events) = mounted_replica(session_id, channel.clone()).await;

        let host_id = Uuid::new_v4();
        channel
            .send(&ChannelEvent::new(
                host_id,
                session_id,
                EventBody::StrokeBatch(stroke(4)),
            ))
            .unwrap();

        match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
            Some(BoardEvent::Stroke(s)) => assert_eq!(s.points.len(), 4),
            other => panic!("Expected Stroke, got {other:?}"),
        }
        let state = replica.state().await;
        assert_eq!(state.strokes.len(), 1);
        assert_eq!(state.version, 1);
        // Deltas alone never mark the replica initialized.
        assert!(!replica.is_initialized());
    }

    #[tokio::test]
    async fn test_full_state_replaces_wholesale() {
        let session_id = Uuid::new_v4();
        let channel = Arc::new(LocalChannel::new(64));
        let (replica, mut events) = mounted_replica(session_id, channel.clone()).await;

        let host_id = Uuid::new_v4();
        // Divergent local content first.
        channel
            .send(&ChannelEvent::new(
                host_id,
                session_id,
                EventBody::StrokeBatch(stroke(9)),
            ))
            .unwrap();
        let _ = timeout(Duration::from_secs(1), events.recv()).await.unwrap();

        let mut authority = BoardState::new();
        authority.append(stroke(1));
        authority.append(stroke(2));
        channel
            .send(&ChannelEvent::new(
                host_id,
                session_id,
                EventBody::FullState(authority.clone()),
            ))
            .unwrap();

        match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
            Some(BoardEvent::FullRedraw) => {}
            other => panic!("Expected FullRedraw, got {other:?}"),
        }
        assert_eq!(replica.state().await, authority);
        assert!(replica.is_initialized());
    }

    #[tokio::test]
    async fn test_clear_empties_replica() {
        let session_id = Uuid::new_v4();
        let channel = Arc::new(LocalChannel::new(64));
        let (replica, mut events) = mounted_replica(session_id, channel.clone()).await;

        let host_id = Uuid::new_v4();
        channel
            .send(&ChannelEvent::new(
                host_id,
                session_id,
                EventBody::StrokeBatch(stroke(2)),
            ))
            .unwrap();
        let _ = timeout(Duration::from_secs(1), events.recv()).await.unwrap();

        channel
            .send(&ChannelEvent::new(host_id, session_id, EventBody::ClearBoard))
            .unwrap();
        match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
            Some(BoardEvent::Cleared) => {}
            other => panic!("Expected Cleared, got {other:?}"),
        }
        assert!(replica.state().await.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_session_events_ignored() {
        let session_id = Uuid::new_v4();
        let channel = Arc::new(LocalChannel::new(64));
        let (replica, _events) = mounted_replica(session_id, channel.clone()).await;

        channel
            .send(&ChannelEvent::new(
                Uuid::new_v4(),
                Uuid::new_v4(), // different session
                EventBody::StrokeBatch(stroke(3)),
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(replica.state().await.is_empty());
    }

    #[tokio::test]
    async fn test_mount_with_cache_skips_request() {
        let session_id = Uuid::new_v4();
        let channel = Arc::new(LocalChannel::new(64));
        let mut host_rx = channel.subscribe();

        let cache: Arc<MemoryCache> = Arc::new(MemoryCache::new());
        let mut seeded = BoardState::new();
        seeded.append(stroke(5));
        store_cached(&*cache, session_id, &seeded);

        let mut replica = WhiteboardReplica::new(
            session_id,
            Uuid::new_v4(),
            channel,
            cache,
            RetryPolicy::new(1, Duration::from_millis(1)),
        );
        let mut events = replica.take_event_rx().unwrap();
        replica.mount().await;

        // Cached state redraws immediately...
        match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
            Some(BoardEvent::FullRedraw) => {}
            other => panic!("Expected FullRedraw, got {other:?}"),
        }
        assert_eq!(replica.state().await, seeded);

        // ...and no RequestState goes out.
        let got = timeout(Duration::from_millis(100), host_rx.recv()).await;
        assert!(got.is_err(), "no request should be sent when cache exists");
    }
}
