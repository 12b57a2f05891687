//! Host side of the whiteboard: canonical state, point batching, and
//! self-healing resync.
//!
//! Locally drawn points are coalesced on a short timer and shipped as
//! `StrokeBatch` events; every batch is one accepted mutation (version +1).
//! Independently of requests, the full state is rebroadcast on a fixed
//! interval so a participant that missed any number of deltas converges
//! without ever detecting the loss. Only the host engine exists on the
//! host client — drawing handlers gate on role, so a non-host receiving
//! pointer input is a no-op by construction.
//!
//! Retried sends run on their own spawned tasks: a send stuck in retry
//! pacing must never stall the flush timer, the periodic resync, or a
//! `RequestState` reply.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use uuid::Uuid;

use huddle_sync::cache::StateCache;
use huddle_sync::channel::SyncChannel;
use huddle_sync::protocol::{BoardState, ChannelEvent, EventBody, Point, Stroke};
use huddle_sync::retry::RetryPolicy;

use crate::cache_key;

/// Batching and resync knobs.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Pending points are flushed at least this often.
    pub batch_interval: Duration,
    /// A batch never carries more points than this; reaching the cap
    /// flushes immediately to bound message size.
    pub max_batch_points: usize,
    /// Proactive `FullState` rebroadcast period.
    pub resync_interval: Duration,
    /// Send retry policy.
    pub retry: RetryPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            batch_interval: Duration::from_millis(50),
            max_batch_points: 25,
            resync_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// Points buffered between flushes.
#[derive(Default)]
struct PendingBatch {
    points: Vec<Point>,
    color: String,
    new_stroke: bool,
}

impl PendingBatch {
    fn take(&mut self) -> Option<Stroke> {
        if self.points.is_empty() {
            return None;
        }
        Some(Stroke {
            points: std::mem::take(&mut self.points),
            color: self.color.clone(),
            new_stroke: std::mem::replace(&mut self.new_stroke, false),
        })
    }
}

/// The host engine. Owns the canonical [`BoardState`].
pub struct WhiteboardHost<C: SyncChannel> {
    session_id: Uuid,
    local_id: Uuid,
    channel: Arc<C>,
    cache: Arc<dyn StateCache>,
    config: HostConfig,
    state: Arc<RwLock<BoardState>>,
    pending: Arc<Mutex<PendingBatch>>,
    task: Option<JoinHandle<()>>,
}

impl<C: SyncChannel> WhiteboardHost<C> {
    pub fn new(
        session_id: Uuid,
        local_id: Uuid,
        channel: Arc<C>,
        cache: Arc<dyn StateCache>,
        config: HostConfig,
    ) -> Self {
        Self {
            session_id,
            local_id,
            channel,
            cache,
            config,
            state: Arc::new(RwLock::new(BoardState::new())),
            pending: Arc::new(Mutex::new(PendingBatch::default())),
            task: None,
        }
    }

    /// Restore cached state (if any) and spawn the engine loop: batch
    /// flushing, periodic resync, and `RequestState` replies.
    pub async fn start(&mut self) {
        if let Some(cached) = load_cached(&*self.cache, self.session_id) {
            let mut state = self.state.write().await;
            if state.is_empty() {
                log::info!(
                    "whiteboard host: restored {} strokes (v{}) from cache",
                    cached.strokes.len(),
                    cached.version
                );
                *state = cached;
            }
        }

        let session_id = self.session_id;
        let local_id = self.local_id;
        let channel = self.channel.clone();
        let cache = self.cache.clone();
        let state = self.state.clone();
        let pending = self.pending.clone();
        let config = self.config.clone();
        let mut rx = self.channel.subscribe();

        self.task = Some(tokio::spawn(async move {
            let mut flush_tick = interval(config.batch_interval);
            let mut resync_tick = interval(config.resync_interval);
            loop {
                tokio::select! {
                    _ = flush_tick.tick() => {
                        let batch = pending.lock().await.take();
                        if let Some(stroke) = batch {
                            commit_stroke(
                                &state, &*cache, &channel, config.retry,
                                session_id, local_id, stroke,
                            )
                            .await;
                        }
                    }
                    _ = resync_tick.tick() => {
                        send_full_state(
                            &state, &channel, config.retry, session_id, local_id,
                        )
                        .await;
                    }
                    event = rx.recv() => {
                        match event {
                            Ok(event) if event.is_for(session_id, local_id) => {
                                if let EventBody::RequestState = event.body {
                                    log::debug!("whiteboard host: state requested, replying");
                                    send_full_state(
                                        &state, &channel, config.retry,
                                        session_id, local_id,
                                    )
                                    .await;
                                }
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("whiteboard host: receiver lagged by {n} events");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        }));
    }

    /// Buffer a locally drawn point. A `new_stroke` point closes the
    /// previous batch; hitting the point cap flushes immediately.
    pub async fn draw_point(&self, point: Point, color: &str, new_stroke: bool) {
        let mut to_flush: Vec<Stroke> = Vec::new();
        {
            let mut pending = self.pending.lock().await;
            if new_stroke {
                if let Some(stroke) = pending.take() {
                    to_flush.push(stroke);
                }
                pending.color = color.to_string();
                pending.new_stroke = true;
            } else if pending.points.is_empty() {
                pending.color = color.to_string();
            }
            pending.points.push(point);
            if pending.points.len() >= self.config.max_batch_points {
                if let Some(stroke) = pending.take() {
                    to_flush.push(stroke);
                }
            }
        }
        for stroke in to_flush {
            commit_stroke(
                &self.state,
                &*self.cache,
                &self.channel,
                self.config.retry,
                self.session_id,
                self.local_id,
                stroke,
            )
            .await;
        }
    }

    /// Wipe the board: drop pending points, reset the stroke log
    /// (version +1), and broadcast `ClearBoard`.
    pub async fn clear(&self) {
        self.pending.lock().await.points.clear();
        {
            let mut state = self.state.write().await;
            state.clear();
            store_cached(&*self.cache, self.session_id, &state);
        }
        let event = ChannelEvent::new(self.local_id, self.session_id, EventBody::ClearBoard);
        spawn_send(
            self.channel.clone(),
            self.config.retry,
            "whiteboard clear broadcast",
            event,
        );
    }

    /// Force a `FullState` broadcast outside the periodic schedule.
    pub async fn broadcast_full_state(&self) {
        send_full_state(
            &self.state,
            &self.channel,
            self.config.retry,
            self.session_id,
            self.local_id,
        )
        .await;
    }

    /// Snapshot of the canonical state.
    pub async fn state(&self) -> BoardState {
        self.state.read().await.clone()
    }

    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    /// Tear down the engine loop. An already-scheduled retry may still
    /// fire and will no-op against the closed channel.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<C: SyncChannel> Drop for WhiteboardHost<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accept a stroke into canonical state, mirror the cache, and ship it.
/// The send itself runs on a spawned task so a retry never blocks the
/// caller.
async fn commit_stroke<C: SyncChannel>(
    state: &RwLock<BoardState>,
    cache: &dyn StateCache,
    channel: &Arc<C>,
    retry: RetryPolicy,
    session_id: Uuid,
    local_id: Uuid,
    stroke: Stroke,
) {
    {
        let mut state = state.write().await;
        state.append(stroke.clone());
        store_cached(cache, session_id, &state);
    }
    let event = ChannelEvent::new(local_id, session_id, EventBody::StrokeBatch(stroke));
    spawn_send(channel.clone(), retry, "whiteboard stroke broadcast", event);
}

async fn send_full_state<C: SyncChannel>(
    state: &RwLock<BoardState>,
    channel: &Arc<C>,
    retry: RetryPolicy,
    session_id: Uuid,
    local_id: Uuid,
) {
    let snapshot = state.read().await.clone();
    let event = ChannelEvent::new(local_id, session_id, EventBody::FullState(snapshot));
    spawn_send(channel.clone(), retry, "whiteboard full-state broadcast", event);
}

/// Detach a retried send from the caller. The task outlives `shutdown`
/// at worst by its own pacing and no-ops against a closed channel.
fn spawn_send<C: SyncChannel>(
    channel: Arc<C>,
    retry: RetryPolicy,
    what: &'static str,
    event: ChannelEvent,
) {
    tokio::spawn(async move {
        retry.run(what, || channel.send(&event)).await;
    });
}

pub(crate) fn load_cached(cache: &dyn StateCache, session_id: Uuid) -> Option<BoardState> {
    let bytes = cache.load(&cache_key(session_id))?;
    match bincode::serde::decode_from_slice(&bytes, bincode::config::standard()) {
        Ok((state, _)) => Some(state),
        Err(e) => {
            log::warn!("whiteboard: discarding undecodable cache entry: {e}");
            None
        }
    }
}

pub(crate) fn store_cached(cache: &dyn StateCache, session_id: Uuid, state: &BoardState) {
    match bincode::serde::encode_to_vec(state, bincode::config::standard()) {
        Ok(bytes) => cache.store(&cache_key(session_id), &bytes),
        Err(e) => log::warn!("whiteboard: cache serialize failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_sync::cache::MemoryCache;
    use huddle_sync::channel::LocalChannel;

    fn host_with_channel() -> (WhiteboardHost<LocalChannel>, Arc<LocalChannel>) {
        let channel = Arc::new(LocalChannel::new(64));
        let host = WhiteboardHost::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            channel.clone(),
            Arc::new(MemoryCache::new()),
            HostConfig::default(),
        );
        (host, channel)
    }

    #[tokio::test]
    async fn test_point_cap_flushes_immediately() {
        let (host, channel) = host_with_channel();
        let mut rx = channel.subscribe();

        for i in 0..25 {
            host.draw_point(Point::new(i as f32, 0.0), "#000", i == 0).await;
        }

        // Cap reached: one accepted mutation, one broadcast batch.
        assert_eq!(host.version().await, 1);
        let state = host.state().await;
        assert_eq!(state.strokes.len(), 1);
        assert_eq!(state.strokes[0].points.len(), 25);

        let event = rx.recv().await.unwrap();
        match event.body {
            EventBody::StrokeBatch(stroke) => assert_eq!(stroke.points.len(), 25),
            other => panic!("Expected StrokeBatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_new_stroke_closes_previous_batch() {
        let (host, channel) = host_with_channel();
        let _rx = channel.subscribe();

        host.draw_point(Point::new(1.0, 1.0), "#f00", true).await;
        host.draw_point(Point::new(2.0, 2.0), "#f00", false).await;
        // Pen lifted, new segment: previous batch is committed.
        host.draw_point(Point::new(9.0, 9.0), "#0f0", true).await;

        let state = host.state().await;
        assert_eq!(state.strokes.len(), 1);
        assert_eq!(state.version, 1);
        assert_eq!(state.strokes[0].points.len(), 2);
        assert_eq!(state.strokes[0].color, "#f00");
        assert!(state.strokes[0].new_stroke);
    }

    #[tokio::test]
    async fn test_clear_bumps_version_and_broadcasts() {
        let (host, channel) = host_with_channel();
        let mut rx = channel.subscribe();

        for i in 0..25 {
            host.draw_point(Point::new(i as f32, 0.0), "#000", i == 0).await;
        }
        let _ = rx.recv().await.unwrap(); // the batch

        host.clear().await;
        let state = host.state().await;
        assert!(state.is_empty());
        assert_eq!(state.version, 2);

        match rx.recv().await.unwrap().body {
            EventBody::ClearBoard => {}
            other => panic!("Expected ClearBoard, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_restores_cache() {
        let session_id = Uuid::new_v4();
        let cache: Arc<MemoryCache> = Arc::new(MemoryCache::new());

        let mut seeded = BoardState::new();
        seeded.append(Stroke {
            points: vec![Point::new(1.0, 2.0)],
            color: "#00f".to_string(),
            new_stroke: true,
        });
        store_cached(&*cache, session_id, &seeded);

        let channel = Arc::new(LocalChannel::new(64));
        let mut host = WhiteboardHost::new(
            session_id,
            Uuid::new_v4(),
            channel,
            cache,
            HostConfig::default(),
        );
        host.start().await;

        let state = host.state().await;
        assert_eq!(state, seeded);
        host.shutdown();
    }

    #[tokio::test]
    async fn test_failed_broadcast_still_accepts_mutation() {
        let channel = Arc::new(LocalChannel::new(64));
        channel.set_failing(true);

        let config = HostConfig {
            retry: RetryPolicy::new(2, Duration::from_millis(1)),
            ..HostConfig::default()
        };
        let host = WhiteboardHost::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            channel,
            Arc::new(MemoryCache::new()),
            config,
        );

        // The send is dropped past the retry bound, but the canonical
        // state still advanced by exactly one mutation.
        for i in 0..25 {
            host.draw_point(Point::new(i as f32, 0.0), "#000", i == 0).await;
        }
        assert_eq!(host.version().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_send_does_not_block_drawing() {
        let channel = Arc::new(LocalChannel::new(64));
        let _rx = channel.subscribe();
        channel.set_failing(true);

        let host = WhiteboardHost::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            channel,
            Arc::new(MemoryCache::new()),
            HostConfig::default(),
        );

        let before = tokio::time::Instant::now();
        for i in 0..25 {
            host.draw_point(Point::new(i as f32, 0.0), "#000", i == 0).await;
        }
        // Retry pacing happens on the spawned send task; committing a
        // stroke never waits on it.
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert_eq!(host.version().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_reply_not_starved_by_failing_send() {
        let session_id = Uuid::new_v4();
        let channel = Arc::new(LocalChannel::new(64));
        let mut rx = channel.subscribe();

        let config = HostConfig {
            resync_interval: Duration::from_secs(3600),
            ..HostConfig::default()
        };
        let mut host = WhiteboardHost::new(
            session_id,
            Uuid::new_v4(),
            channel.clone(),
            Arc::new(MemoryCache::new()),
            config,
        );
        host.start().await;

        // Three buffered points get committed by the flush tick while
        // every send fails, leaving that broadcast stuck in retry pacing.
        channel.set_failing(true);
        for i in 0..3 {
            host.draw_point(Point::new(i as f32, 0.0), "#000", i == 0).await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(host.version().await, 1);
        channel.set_failing(false);

        // The engine loop must still answer a state request while that
        // send keeps retrying (its pacing alone spans ~2s).
        channel
            .send(&ChannelEvent::new(
                Uuid::new_v4(),
                session_id,
                EventBody::RequestState,
            ))
            .unwrap();

        let replied = tokio::time::timeout(Duration::from_millis(400), async {
            loop {
                match rx.recv().await.unwrap().body {
                    EventBody::FullState(board) if board.version == 1 => return,
                    _ => {}
                }
            }
        })
        .await;
        assert!(replied.is_ok(), "state request went unanswered");
    }
}
