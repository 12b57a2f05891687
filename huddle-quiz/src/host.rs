//! Host side of the quiz: composing, starting, mirroring, ending.
//!
//! Lifecycle is strictly `idle → active → ended`; nothing visible to
//! participants ever moves it backward. The host is the only writer of
//! the question list and `is_active`. While active, the host mirrors the
//! record's result mapping through the store's live feed and, as a
//! best-effort optimization, ends the quiz once every currently-connected
//! participant has a recorded result — the explicit [`QuizHost::end_quiz`]
//! action remains the authoritative completion signal (a late joiner is
//! simply not accounted for by the heuristic).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use huddle_sync::banner::BannerFeed;
use huddle_sync::channel::SyncChannel;
use huddle_sync::protocol::{ChannelEvent, EventBody};
use huddle_sync::retry::RetryPolicy;
use huddle_sync::session::SessionContext;

use crate::model::{unix_now, Quiz, QuizQuestion, QuizResult, ValidationError};
use crate::store::QuizStore;

/// Host-side lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizPhase {
    /// Composing questions; no participant has been notified.
    Idle,
    /// Record created, `QuizStart` announced, results flowing in.
    Active,
    /// Record marked inactive, final results announced.
    Ended,
}

/// The host state machine.
pub struct QuizHost<C: SyncChannel, S: QuizStore> {
    ctx: SessionContext,
    channel: Arc<C>,
    store: Arc<S>,
    retry: RetryPolicy,
    banners: BannerFeed,
    phase: Arc<RwLock<QuizPhase>>,
    title: String,
    questions: Vec<QuizQuestion>,
    quiz_id: Option<Uuid>,
    /// Local mirror of the record's result mapping.
    results: Arc<RwLock<HashMap<Uuid, QuizResult>>>,
    /// Live roster size, host included.
    participants: Arc<AtomicUsize>,
    mirror_task: Option<JoinHandle<()>>,
}

impl<C: SyncChannel, S: QuizStore> QuizHost<C, S> {
    pub fn new(
        ctx: SessionContext,
        channel: Arc<C>,
        store: Arc<S>,
        retry: RetryPolicy,
        banners: BannerFeed,
    ) -> Self {
        let participants = Arc::new(AtomicUsize::new(ctx.participant_count));
        Self {
            ctx,
            channel,
            store,
            retry,
            banners,
            phase: Arc::new(RwLock::new(QuizPhase::Idle)),
            title: String::new(),
            questions: Vec::new(),
            quiz_id: None,
            results: Arc::new(RwLock::new(HashMap::new())),
            participants,
            mirror_task: None,
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    /// Update the roster size from the SDK (host included).
    pub fn set_participant_count(&self, count: usize) {
        self.participants.store(count, Ordering::Relaxed);
    }

    /// Validate and accept a question. Rejection mutates nothing.
    pub async fn add_question(
        &mut self,
        text: impl Into<String>,
        options: Vec<String>,
        correct_option: usize,
        time_limit_secs: u32,
    ) -> Result<(), ValidationError> {
        if *self.phase.read().await != QuizPhase::Idle {
            return Err(ValidationError::AlreadyStarted);
        }
        let question = QuizQuestion::new(text, options, correct_option, time_limit_secs)?;
        self.questions.push(question);
        Ok(())
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn quiz_id(&self) -> Option<Uuid> {
        self.quiz_id
    }

    pub async fn phase(&self) -> QuizPhase {
        *self.phase.read().await
    }

    /// Mirrored result mapping.
    pub async fn results(&self) -> HashMap<Uuid, QuizResult> {
        self.results.read().await.clone()
    }

    /// Create the record and announce the quiz.
    ///
    /// Returns `Err` only for synchronous validation failures. Store and
    /// channel failures surface as banners and leave the host idle; in
    /// particular, if the announcement exhausts its retries the created
    /// record is rolled back so no orphaned active quiz survives.
    pub async fn start_quiz(&mut self) -> Result<(), ValidationError> {
        if *self.phase.read().await != QuizPhase::Idle {
            return Err(ValidationError::AlreadyStarted);
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.questions.is_empty() {
            return Err(ValidationError::NoQuestions);
        }

        let quiz = Quiz::new(
            self.title.clone(),
            self.questions.clone(),
            self.ctx.local.id,
            self.ctx.session_id,
        );
        let quiz_id = quiz.id;
        let question_count = quiz.questions.len();

        if let Err(e) = self.store.create(quiz).await {
            self.banners.post(format!("Could not create the quiz: {e}"));
            return Ok(());
        }

        let event = ChannelEvent::new(
            self.ctx.local.id,
            self.ctx.session_id,
            EventBody::QuizStart {
                quiz_id,
                title: self.title.clone(),
                question_count,
            },
        );
        let channel = self.channel.clone();
        let announced = self
            .retry
            .run("quiz start broadcast", || channel.send(&event))
            .await;

        if announced.is_none() {
            log::warn!("quiz {quiz_id}: announcement failed, rolling back record");
            if let Err(e) = self.store.delete(quiz_id).await {
                self.banners
                    .post(format!("Could not roll back the quiz record: {e}"));
            }
            self.banners
                .post("Could not announce the quiz to participants");
            return Ok(());
        }

        self.quiz_id = Some(quiz_id);
        *self.phase.write().await = QuizPhase::Active;
        self.spawn_mirror(quiz_id).await;
        log::info!("quiz {quiz_id}: started with {question_count} questions");
        Ok(())
    }

    /// Mirror the record's result mapping and run the completion
    /// heuristic on every live update.
    async fn spawn_mirror(&mut self, quiz_id: Uuid) {
        let mut rx = match self.store.subscribe(quiz_id).await {
            Ok(rx) => rx,
            Err(e) => {
                self.banners
                    .post(format!("Could not follow quiz updates: {e}"));
                return;
            }
        };

        let results = self.results.clone();
        let phase = self.phase.clone();
        let participants = self.participants.clone();
        let channel = self.channel.clone();
        let store = self.store.clone();
        let retry = self.retry;
        let banners = self.banners.clone();
        let session_id = self.ctx.session_id;
        let local_id = self.ctx.local.id;

        self.mirror_task = Some(tokio::spawn(async move {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                if let Some(quiz) = snapshot {
                    *results.write().await = quiz.results.clone();

                    // Heuristic, not a guarantee: a participant joining
                    // after the last expected result is undercounted.
                    let expected = participants.load(Ordering::Relaxed).saturating_sub(1);
                    let active = *phase.read().await == QuizPhase::Active;
                    if active && expected > 0 && quiz.results.len() >= expected {
                        log::info!(
                            "quiz {quiz_id}: all {expected} connected participants reported, ending"
                        );
                        finalize(
                            &*channel, &*store, &retry, &banners, session_id, local_id,
                            &phase, quiz_id, &results,
                        )
                        .await;
                    }
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Mark the record inactive, stamp the end time, and announce the
    /// final results. Idempotent in intent but not enforced: a second
    /// call rewrites the same terminal state.
    pub async fn end_quiz(&self) {
        let Some(quiz_id) = self.quiz_id else {
            return;
        };
        finalize(
            &*self.channel,
            &*self.store,
            &self.retry,
            &self.banners,
            self.ctx.session_id,
            self.ctx.local.id,
            &self.phase,
            quiz_id,
            &self.results,
        )
        .await;
    }

    /// Delete the record and clear all local state, returning to idle.
    /// Destructive and irreversible.
    pub async fn reset_quiz(&mut self) {
        if let Some(task) = self.mirror_task.take() {
            task.abort();
        }
        if let Some(quiz_id) = self.quiz_id.take() {
            if let Err(e) = self.store.delete(quiz_id).await {
                self.banners.post(format!("Could not delete the quiz: {e}"));
            }
            log::info!("quiz {quiz_id}: reset");
        }
        self.title.clear();
        self.questions.clear();
        self.results.write().await.clear();
        *self.phase.write().await = QuizPhase::Idle;
    }
}

impl<C: SyncChannel, S: QuizStore> Drop for QuizHost<C, S> {
    fn drop(&mut self) {
        if let Some(task) = self.mirror_task.take() {
            task.abort();
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn finalize<C: SyncChannel, S: QuizStore>(
    channel: &C,
    store: &S,
    retry: &RetryPolicy,
    banners: &BannerFeed,
    session_id: Uuid,
    local_id: Uuid,
    phase: &RwLock<QuizPhase>,
    quiz_id: Uuid,
    results_mirror: &RwLock<HashMap<Uuid, QuizResult>>,
) {
    if let Err(e) = store.set_active(quiz_id, false, Some(unix_now())).await {
        banners.post(format!("Could not mark the quiz as ended: {e}"));
    }

    let summaries = match store.get(quiz_id).await {
        Ok(quiz) => {
            *results_mirror.write().await = quiz.results.clone();
            quiz.summaries()
        }
        Err(e) => {
            log::warn!("quiz {quiz_id}: reading final results failed ({e}), using mirror");
            results_mirror
                .read()
                .await
                .iter()
                .map(|(id, r)| (*id, r.summary()))
                .collect()
        }
    };

    *phase.write().await = QuizPhase::Ended;

    let event = ChannelEvent::new(
        local_id,
        session_id,
        EventBody::QuizEnd {
            quiz_id,
            results: summaries,
        },
    );
    retry.run("quiz end broadcast", || channel.send(&event)).await;
    log::info!("quiz {quiz_id}: ended");
}
