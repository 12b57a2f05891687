//! Quiz data model, validation, scoring, and leaderboard ordering.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;
use uuid::Uuid;

use huddle_sync::protocol::ResultSummary;

/// Per-question time limit bounds, in seconds.
pub const MIN_TIME_LIMIT_SECS: u32 = 5;
pub const MAX_TIME_LIMIT_SECS: u32 = 300;

/// A single question. The UI renders exactly four options; the model
/// only requires that every option is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: Uuid,
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: usize,
    pub time_limit_secs: u32,
}

impl QuizQuestion {
    /// Build a validated question. Rejection leaves no trace anywhere:
    /// validation runs synchronously before any network effect.
    pub fn new(
        text: impl Into<String>,
        options: Vec<String>,
        correct_option: usize,
        time_limit_secs: u32,
    ) -> Result<Self, ValidationError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyQuestionText);
        }
        if options.is_empty() {
            return Err(ValidationError::NoOptions);
        }
        if let Some(index) = options.iter().position(|o| o.trim().is_empty()) {
            return Err(ValidationError::EmptyOption(index));
        }
        if correct_option >= options.len() {
            return Err(ValidationError::CorrectOptionOutOfRange {
                index: correct_option,
                options: options.len(),
            });
        }
        if !(MIN_TIME_LIMIT_SECS..=MAX_TIME_LIMIT_SECS).contains(&time_limit_secs) {
            return Err(ValidationError::TimeLimitOutOfRange(time_limit_secs));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            text,
            options,
            correct_option,
            time_limit_secs,
        })
    }
}

/// One submitted answer. `selected: None` is the sentinel for a timer
/// that expired without a selection; it never scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAnswer {
    pub question_id: Uuid,
    pub selected: Option<usize>,
    pub time_taken_secs: u32,
}

impl QuizAnswer {
    /// The unanswered sentinel for a question.
    pub fn unanswered(question_id: Uuid) -> Self {
        Self {
            question_id,
            selected: None,
            time_taken_secs: 0,
        }
    }
}

/// A participant's finished run. Written exactly once, as a single merge
/// into the quiz record, keyed by the participant's own identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizResult {
    pub display_name: String,
    pub score: u32,
    pub answers: Vec<QuizAnswer>,
    pub total_questions: usize,
    pub time_taken_secs: u32,
}

impl QuizResult {
    /// The compact wire/leaderboard form.
    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            display_name: self.display_name.clone(),
            score: self.score,
            total_questions: self.total_questions,
            time_taken_secs: self.time_taken_secs,
        }
    }
}

/// The authoritative quiz record as stored in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: Uuid,
    pub title: String,
    pub questions: Vec<QuizQuestion>,
    pub creator_id: Uuid,
    pub session_id: Uuid,
    pub is_active: bool,
    pub results: HashMap<Uuid, QuizResult>,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

impl Quiz {
    pub fn new(
        title: impl Into<String>,
        questions: Vec<QuizQuestion>,
        creator_id: Uuid,
        session_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            questions,
            creator_id,
            session_id,
            is_active: true,
            results: HashMap::new(),
            started_at: Some(unix_now()),
            ended_at: None,
        }
    }

    /// Result mapping in its compact form.
    pub fn summaries(&self) -> HashMap<Uuid, ResultSummary> {
        self.results
            .iter()
            .map(|(id, r)| (*id, r.summary()))
            .collect()
    }
}

/// Synchronous validation failures. Surfaced to the user verbatim; the
/// question list / record is never touched on rejection.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyTitle,
    NoQuestions,
    EmptyQuestionText,
    NoOptions,
    EmptyOption(usize),
    CorrectOptionOutOfRange { index: usize, options: usize },
    TimeLimitOutOfRange(u32),
    AlreadyStarted,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "The quiz needs a title"),
            Self::NoQuestions => write!(f, "Add at least one question before starting"),
            Self::EmptyQuestionText => write!(f, "Question text cannot be empty"),
            Self::NoOptions => write!(f, "A question needs answer options"),
            Self::EmptyOption(i) => write!(f, "Option {} cannot be empty", i + 1),
            Self::CorrectOptionOutOfRange { index, options } => {
                write!(f, "Correct option {index} is out of range (have {options})")
            }
            Self::TimeLimitOutOfRange(secs) => write!(
                f,
                "Time limit {secs}s must be between {MIN_TIME_LIMIT_SECS} and {MAX_TIME_LIMIT_SECS} seconds"
            ),
            Self::AlreadyStarted => write!(f, "The quiz has already started"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Exact scoring rule: 1 point when `selected == Some(correct)`, summed
/// over all questions. There is no partial credit and no speed bonus;
/// speed only breaks leaderboard ties. The sentinel never scores.
pub fn score_answers(questions: &[QuizQuestion], answers: &[QuizAnswer]) -> u32 {
    answers
        .iter()
        .filter(|answer| {
            questions
                .iter()
                .find(|q| q.id == answer.question_id)
                .is_some_and(|q| answer.selected == Some(q.correct_option))
        })
        .count() as u32
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub participant_id: Uuid,
    pub summary: ResultSummary,
}

/// Order results for display: score descending, then total time taken
/// ascending. The sort is stable, so ties beyond that keep the order the
/// caller supplied (arrival order).
pub fn leaderboard(entries: impl IntoIterator<Item = (Uuid, ResultSummary)>) -> Vec<LeaderboardEntry> {
    let mut rows: Vec<LeaderboardEntry> = entries
        .into_iter()
        .map(|(participant_id, summary)| LeaderboardEntry {
            participant_id,
            summary,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.summary
            .score
            .cmp(&a.summary.score)
            .then(a.summary.time_taken_secs.cmp(&b.summary.time_taken_secs))
    });
    rows
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
