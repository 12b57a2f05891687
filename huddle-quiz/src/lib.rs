//! # huddle-quiz — Live quiz replicated across a call
//!
//! Host-authoritative quiz lifecycle synchronized to participants through
//! the best-effort call channel plus a subscribable document-store record:
//!
//! ```text
//! ┌────────────┐  QuizStart / QuizEnd   ┌──────────────────┐
//! │  QuizHost  │ ─────────────────────► │ QuizParticipant  │
//! │ idle→act→  │                        │ fetch, pace,     │
//! │   ended    │ ◄──── QuizCompleted ── │ answer, submit   │
//! └─────┬──────┘      (best-effort)     └────────┬─────────┘
//!       │ create / end / delete                  │ one result merge
//!       ▼                                        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │    Quiz record in the document store (live-subscribed)   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Write conflicts are eliminated by construction: the host is the only
//! writer of the question list and `is_active`; each participant writes
//! only its own key in the result mapping. Question pacing is independent
//! per participant — an expired timer records the "no answer" sentinel
//! and moves on without waiting for anyone.
//!
//! ## Modules
//!
//! - [`model`] — quiz data model, validation, scoring, leaderboard
//! - [`store`] — document-store trait + in-memory implementation
//! - [`host`] — host lifecycle state machine
//! - [`participant`] — participant pacing and submission

pub mod model;
pub mod store;
pub mod host;
pub mod participant;

pub use model::{
    leaderboard, score_answers, LeaderboardEntry, Quiz, QuizAnswer, QuizQuestion, QuizResult,
    ValidationError, MAX_TIME_LIMIT_SECS, MIN_TIME_LIMIT_SECS,
};
pub use store::{MemoryQuizStore, QuizStore, StoreError};
pub use host::{QuizHost, QuizPhase};
pub use participant::{ParticipantEvent, ParticipantPhase, QuizParticipant};
