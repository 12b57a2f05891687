//! Participant side of the quiz: fetch, pace, answer, submit.
//!
//! Pacing is independent per participant: each runs its own countdown
//! per question, and an expired timer records the "no answer" sentinel
//! and advances without waiting on the host or anyone else. Finishing
//! the last question triggers exactly one result merge into the quiz
//! record, keyed by the participant's own identity, followed by a
//! best-effort `QuizCompleted` ping whose failure is swallowed — the
//! store write is the source of truth, not the ping.
//!
//! After submission the participant follows the record's live feed to
//! render the leaderboard, keeping the last-known-good view so a missed
//! update never blanks the screen. A `QuizEnd` from the channel
//! force-displays the final standings even if the feed has not yet
//! delivered the terminal mapping.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use uuid::Uuid;

use huddle_sync::banner::BannerFeed;
use huddle_sync::channel::SyncChannel;
use huddle_sync::protocol::{ChannelEvent, EventBody};
use huddle_sync::retry::RetryPolicy;
use huddle_sync::session::SessionContext;

use crate::model::{leaderboard, score_answers, LeaderboardEntry, Quiz, QuizAnswer, QuizResult};
use crate::store::QuizStore;

/// Participant-side lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantPhase {
    Idle,
    Answering { index: usize },
    Submitted,
    Ended,
}

/// Events emitted to the quiz view.
#[derive(Debug, Clone)]
pub enum ParticipantEvent {
    QuestionStarted {
        index: usize,
        total: usize,
        time_limit_secs: u32,
    },
    /// The countdown expired with no selection; the sentinel was recorded.
    QuestionTimedOut { index: usize },
    Submitted { score: u32, total_questions: usize },
    LeaderboardUpdated(Vec<LeaderboardEntry>),
    /// Terminal standings; force-displayed on `QuizEnd`.
    QuizEnded(Vec<LeaderboardEntry>),
}

enum Command {
    Answer(usize),
}

/// An in-progress run through the questions.
struct Run {
    quiz: Quiz,
    answers: Vec<QuizAnswer>,
    current: usize,
    question_started: Instant,
    deadline: Instant,
    total_time_secs: u32,
}

/// The participant state machine.
pub struct QuizParticipant<C: SyncChannel, S: QuizStore> {
    ctx: SessionContext,
    channel: Arc<C>,
    store: Arc<S>,
    retry: RetryPolicy,
    banners: BannerFeed,
    phase: Arc<RwLock<ParticipantPhase>>,
    /// Last-known-good leaderboard.
    leaderboard_view: Arc<RwLock<Vec<LeaderboardEntry>>>,
    cmd_tx: mpsc::Sender<Command>,
    cmd_rx: Option<mpsc::Receiver<Command>>,
    event_tx: mpsc::Sender<ParticipantEvent>,
    event_rx: Option<mpsc::Receiver<ParticipantEvent>>,
    task: Option<JoinHandle<()>>,
}

impl<C: SyncChannel, S: QuizStore> QuizParticipant<C, S> {
    pub fn new(
        ctx: SessionContext,
        channel: Arc<C>,
        store: Arc<S>,
        retry: RetryPolicy,
        banners: BannerFeed,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            ctx,
            channel,
            store,
            retry,
            banners,
            phase: Arc::new(RwLock::new(ParticipantPhase::Idle)),
            leaderboard_view: Arc::new(RwLock::new(Vec::new())),
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            event_tx,
            event_rx: Some(event_rx),
            task: None,
        }
    }

    /// Take the view event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ParticipantEvent>> {
        self.event_rx.take()
    }

    /// Start listening for `QuizStart` announcements.
    pub fn mount(&mut self) {
        let Some(cmd_rx) = self.cmd_rx.take() else {
            return; // already mounted
        };
        let chan_rx = self.channel.subscribe();
        let runner = Runner {
            ctx: self.ctx.clone(),
            channel: self.channel.clone(),
            store: self.store.clone(),
            retry: self.retry,
            banners: self.banners.clone(),
            phase: self.phase.clone(),
            leaderboard_view: self.leaderboard_view.clone(),
            event_tx: self.event_tx.clone(),
        };
        self.task = Some(tokio::spawn(runner.run(chan_rx, cmd_rx)));
    }

    /// Select an option for the current question.
    pub async fn answer(&self, option: usize) {
        let _ = self.cmd_tx.send(Command::Answer(option)).await;
    }

    pub async fn phase(&self) -> ParticipantPhase {
        *self.phase.read().await
    }

    /// Last-known-good leaderboard view.
    pub async fn leaderboard_view(&self) -> Vec<LeaderboardEntry> {
        self.leaderboard_view.read().await.clone()
    }

    /// Tear down the listener and any running countdown. In-flight
    /// retries no-op afterwards.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<C: SyncChannel, S: QuizStore> Drop for QuizParticipant<C, S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Everything the spawned runner needs, detached from the handle.
struct Runner<C: SyncChannel, S: QuizStore> {
    ctx: SessionContext,
    channel: Arc<C>,
    store: Arc<S>,
    retry: RetryPolicy,
    banners: BannerFeed,
    phase: Arc<RwLock<ParticipantPhase>>,
    leaderboard_view: Arc<RwLock<Vec<LeaderboardEntry>>>,
    event_tx: mpsc::Sender<ParticipantEvent>,
}

impl<C: SyncChannel, S: QuizStore> Runner<C, S> {
    async fn run(
        self,
        mut chan_rx: tokio::sync::broadcast::Receiver<ChannelEvent>,
        mut cmd_rx: mpsc::Receiver<Command>,
    ) {
        let mut run: Option<Run> = None;
        let mut feed: Option<watch::Receiver<Option<Quiz>>> = None;
        // Quiz we joined, kept through submission until its end arrives.
        let mut current_quiz: Option<Uuid> = None;

        loop {
            // Far-future fallback keeps the timer arm well-typed when idle.
            let deadline = run
                .as_ref()
                .map(|r| r.deadline)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
            let answering = run.is_some();
            let following = feed.is_some();

            tokio::select! {
                event = chan_rx.recv() => {
                    match event {
                        Ok(event) if event.is_for(self.ctx.session_id, self.ctx.local.id) => {
                            self.on_channel_event(event, &mut run, &mut feed, &mut current_quiz)
                                .await;
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("quiz participant: lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Answer(option)) => {
                            self.on_answer(option, &mut run, &mut feed).await;
                        }
                        None => break,
                    }
                }
                _ = sleep_until(deadline), if answering => {
                    self.on_timeout(&mut run, &mut feed).await;
                }
                snapshot = next_feed_snapshot(&mut feed), if following => {
                    match snapshot {
                        Ok(snapshot) => self.on_feed_update(snapshot).await,
                        Err(_) => feed = None,
                    }
                }
            }
        }
    }

    async fn on_channel_event(
        &self,
        event: ChannelEvent,
        run: &mut Option<Run>,
        feed: &mut Option<watch::Receiver<Option<Quiz>>>,
        current_quiz: &mut Option<Uuid>,
    ) {
        match event.body {
            EventBody::QuizStart { quiz_id, title, .. } => {
                if run.is_some() {
                    log::debug!("quiz participant: ignoring QuizStart while answering");
                    return;
                }
                log::info!("quiz participant: joining quiz {quiz_id} ({title})");
                *run = self.begin(quiz_id).await;
                if run.is_some() {
                    *current_quiz = Some(quiz_id);
                }
            }
            EventBody::QuizEnd { quiz_id, results } => {
                // The unordered channel can replay the end of an earlier
                // quiz; only the one we joined may tear this run down. A
                // late joiner with no run still gets the force-display.
                if current_quiz.is_some_and(|id| id != quiz_id) {
                    log::debug!("quiz participant: ignoring end of stale quiz {quiz_id}");
                    return;
                }
                // Force-display even if the live feed is behind.
                let standings = leaderboard(results);
                *self.leaderboard_view.write().await = standings.clone();
                *self.phase.write().await = ParticipantPhase::Ended;
                *run = None;
                *feed = None;
                *current_quiz = None;
                let _ = self.event_tx.send(ParticipantEvent::QuizEnded(standings)).await;
            }
            // Whiteboard traffic and peer completion pings share the channel.
            _ => {}
        }
    }

    /// Fetch the record and open the first question. A missing record is
    /// surfaced and leaves the participant idle.
    async fn begin(&self, quiz_id: Uuid) -> Option<Run> {
        let quiz = match self.store.get(quiz_id).await {
            Ok(quiz) => quiz,
            Err(e) => {
                self.banners.post(format!("Could not load the quiz: {e}"));
                return None;
            }
        };

        let Some(first) = quiz.questions.first() else {
            log::warn!("quiz participant: record {quiz_id} has no questions");
            return None;
        };
        let limit = first.time_limit_secs;
        let answers = quiz
            .questions
            .iter()
            .map(|q| QuizAnswer::unanswered(q.id))
            .collect();
        let now = Instant::now();
        let total = quiz.questions.len();

        *self.phase.write().await = ParticipantPhase::Answering { index: 0 };
        let _ = self
            .event_tx
            .send(ParticipantEvent::QuestionStarted {
                index: 0,
                total,
                time_limit_secs: limit,
            })
            .await;

        Some(Run {
            quiz,
            answers,
            current: 0,
            question_started: now,
            deadline: now + Duration::from_secs(limit as u64),
            total_time_secs: 0,
        })
    }

    async fn on_answer(
        &self,
        option: usize,
        run: &mut Option<Run>,
        feed: &mut Option<watch::Receiver<Option<Quiz>>>,
    ) {
        let Some(r) = run.as_mut() else {
            return; // no question on screen
        };
        let question = &r.quiz.questions[r.current];
        if option >= question.options.len() {
            log::warn!("quiz participant: ignoring out-of-range option {option}");
            return;
        }

        let elapsed =
            (r.question_started.elapsed().as_secs() as u32).min(question.time_limit_secs);
        r.answers[r.current] = QuizAnswer {
            question_id: question.id,
            selected: Some(option),
            time_taken_secs: elapsed,
        };
        r.total_time_secs += elapsed;
        self.advance(run, feed).await;
    }

    async fn on_timeout(
        &self,
        run: &mut Option<Run>,
        feed: &mut Option<watch::Receiver<Option<Quiz>>>,
    ) {
        let Some(r) = run.as_mut() else {
            return;
        };
        let question = &r.quiz.questions[r.current];
        // Slate slot already holds the sentinel; stamp the time spent.
        r.answers[r.current].time_taken_secs = question.time_limit_secs;
        r.total_time_secs += question.time_limit_secs;
        let index = r.current;
        let _ = self
            .event_tx
            .send(ParticipantEvent::QuestionTimedOut { index })
            .await;
        self.advance(run, feed).await;
    }

    /// Move to the next question, or submit after the last one.
    async fn advance(
        &self,
        run: &mut Option<Run>,
        feed: &mut Option<watch::Receiver<Option<Quiz>>>,
    ) {
        let Some(r) = run.as_mut() else {
            return;
        };
        r.current += 1;
        if r.current < r.quiz.questions.len() {
            let question = &r.quiz.questions[r.current];
            let now = Instant::now();
            r.question_started = now;
            r.deadline = now + Duration::from_secs(question.time_limit_secs as u64);
            *self.phase.write().await = ParticipantPhase::Answering { index: r.current };
            let _ = self
                .event_tx
                .send(ParticipantEvent::QuestionStarted {
                    index: r.current,
                    total: r.quiz.questions.len(),
                    time_limit_secs: question.time_limit_secs,
                })
                .await;
            return;
        }

        if let Some(finished) = run.take() {
            *feed = self.submit(finished).await;
        }
    }

    /// Score locally, merge the single result under our own key, ping
    /// completion best-effort, and start following the leaderboard.
    async fn submit(&self, run: Run) -> Option<watch::Receiver<Option<Quiz>>> {
        let score = score_answers(&run.quiz.questions, &run.answers);
        let total_questions = run.quiz.questions.len();
        let result = QuizResult {
            display_name: self.ctx.local.display_name.clone(),
            score,
            answers: run.answers,
            total_questions,
            time_taken_secs: run.total_time_secs,
        };

        if let Err(e) = self
            .store
            .merge_result(run.quiz.id, self.ctx.local.id, result)
            .await
        {
            self.banners.post(format!("Could not submit your score: {e}"));
        }

        // Best-effort ping; the store write above is the real record.
        let event = ChannelEvent::new(
            self.ctx.local.id,
            self.ctx.session_id,
            EventBody::QuizCompleted {
                participant_id: self.ctx.local.id,
                score,
                total_questions,
            },
        );
        let channel = self.channel.clone();
        self.retry
            .run("quiz completion ping", || channel.send(&event))
            .await;

        *self.phase.write().await = ParticipantPhase::Submitted;
        let _ = self
            .event_tx
            .send(ParticipantEvent::Submitted {
                score,
                total_questions,
            })
            .await;

        match self.store.subscribe(run.quiz.id).await {
            Ok(mut rx) => {
                let snapshot = rx.borrow_and_update().clone();
                self.on_feed_update(snapshot).await;
                Some(rx)
            }
            Err(e) => {
                log::warn!("quiz participant: could not follow results: {e}");
                None
            }
        }
    }

    /// Mirror a record snapshot into the leaderboard view. A deleted
    /// record keeps the last-known-good view on screen.
    async fn on_feed_update(&self, snapshot: Option<Quiz>) {
        let Some(quiz) = snapshot else {
            log::debug!("quiz participant: record gone, keeping last-known-good view");
            return;
        };
        let standings = leaderboard(quiz.summaries());
        *self.leaderboard_view.write().await = standings.clone();
        let _ = self
            .event_tx
            .send(ParticipantEvent::LeaderboardUpdated(standings))
            .await;
    }
}

/// Await the next record snapshot, or hang forever when there is no feed
/// (the select arm is also gated on `feed.is_some()`).
async fn next_feed_snapshot(
    feed: &mut Option<watch::Receiver<Option<Quiz>>>,
) -> Result<Option<Quiz>, watch::error::RecvError> {
    match feed {
        Some(rx) => {
            rx.changed().await?;
            Ok(rx.borrow_and_update().clone())
        }
        None => std::future::pending().await,
    }
}
