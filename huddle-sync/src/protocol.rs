//! Tagged event union for the in-call broadcast channel.
//!
//! One channel carries every collaboration message, so the payload is a
//! discriminated enum and every receiver matches exhaustively — a new
//! variant is a compile error at each handler, not a silently ignored
//! string tag.
//!
//! Every event carries the sender and session ids so receivers can drop
//! their own echoes and cross-session noise before dispatching:
//! ```text
//! ┌──────────┬────────────┬──────────────────────────┐
//! │ sender   │ session_id │ body (tagged variant)    │
//! └──────────┴────────────┴──────────────────────────┘
//! ```
//!
//! Encoded with bincode for minimal overhead.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 2D canvas position in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A drawn stroke segment. Immutable once created: strokes are only ever
/// appended to a board or replaced wholesale, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    /// Ordered points of the segment.
    pub points: Vec<Point>,
    /// CSS-style color string (the canvas renderer consumes it as-is).
    pub color: String,
    /// True when this segment starts a new path (pen down).
    pub new_stroke: bool,
}

/// Replicated whiteboard state: an append-only stroke log plus a
/// monotonic version counter.
///
/// The host owns the canonical copy; participants hold replicas that are
/// overwritten wholesale on every `FullState` receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardState {
    pub strokes: Vec<Stroke>,
    /// Bumped by exactly 1 on every accepted mutation (append, clear).
    pub version: u64,
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stroke. Version +1.
    pub fn append(&mut self, stroke: Stroke) {
        self.strokes.push(stroke);
        self.version += 1;
    }

    /// Wipe the board. Version +1.
    pub fn clear(&mut self) {
        self.strokes.clear();
        self.version += 1;
    }

    /// Adopt another state wholesale, discarding local content.
    ///
    /// This is the only legal way for a replica to converge: last
    /// authoritative snapshot wins, no merging.
    pub fn replace_with(&mut self, other: BoardState) {
        *self = other;
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }
}

/// Compact per-participant result carried in `QuizEnd` payloads and used
/// for leaderboard rendering. The full answer list stays in the document
/// store; the wire only needs what the leaderboard shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub display_name: String,
    pub score: u32,
    pub total_questions: usize,
    /// Aggregate seconds spent; leaderboard tie-break, ascending.
    pub time_taken_secs: u32,
}

/// Everything the broadcast channel carries, in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventBody {
    /// Host → all: a coalesced batch of drawn points.
    StrokeBatch(Stroke),
    /// Participant → host: resend the full board, I may have missed deltas.
    RequestState,
    /// Host → all: authoritative board snapshot. Replicas replace, never merge.
    FullState(BoardState),
    /// Host → all: wipe the canvas.
    ClearBoard,
    /// Host → all: a quiz just went live; fetch the record by id.
    QuizStart {
        quiz_id: Uuid,
        title: String,
        question_count: usize,
    },
    /// Host → all: quiz is over, here is the terminal result mapping.
    QuizEnd {
        quiz_id: Uuid,
        results: HashMap<Uuid, ResultSummary>,
    },
    /// Participant → all: best-effort "I finished" ping. The result merge
    /// into the document store is the source of truth, not this.
    QuizCompleted {
        participant_id: Uuid,
        score: u32,
        total_questions: usize,
    },
}

/// Top-level channel event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub sender: Uuid,
    pub session_id: Uuid,
    pub body: EventBody,
}

impl ChannelEvent {
    pub fn new(sender: Uuid, session_id: Uuid, body: EventBody) -> Self {
        Self {
            sender,
            session_id,
            body,
        }
    }

    /// Whether a receiver with the given identity in the given session
    /// should process this event at all.
    pub fn is_for(&self, session_id: Uuid, local_id: Uuid) -> bool {
        self.session_id == session_id && self.sender != local_id
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (event, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(event)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke(n: usize) -> Stroke {
        Stroke {
            points: (0..n).map(|i| Point::new(i as f32, i as f32 * 2.0)).collect(),
            color: "#1a73e8".to_string(),
            new_stroke: true,
        }
    }

    #[test]
    fn test_stroke_batch_roundtrip() {
        let event = ChannelEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            EventBody::StrokeBatch(stroke(25)),
        );
        let encoded = event.encode().unwrap();
        let decoded = ChannelEvent::decode(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_full_state_roundtrip() {
        let mut board = BoardState::new();
        board.append(stroke(3));
        board.append(stroke(7));

        let event = ChannelEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            EventBody::FullState(board.clone()),
        );
        let decoded = ChannelEvent::decode(&event.encode().unwrap()).unwrap();
        match decoded.body {
            EventBody::FullState(got) => assert_eq!(got, board),
            other => panic!("Expected FullState, got {other:?}"),
        }
    }

    #[test]
    fn test_quiz_end_roundtrip() {
        let participant = Uuid::new_v4();
        let mut results = HashMap::new();
        results.insert(
            participant,
            ResultSummary {
                display_name: "Alice".to_string(),
                score: 2,
                total_questions: 3,
                time_taken_secs: 41,
            },
        );

        let event = ChannelEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            EventBody::QuizEnd {
                quiz_id: Uuid::new_v4(),
                results,
            },
        );
        let decoded = ChannelEvent::decode(&event.encode().unwrap()).unwrap();
        match decoded.body {
            EventBody::QuizEnd { results, .. } => {
                assert_eq!(results[&participant].score, 2);
                assert_eq!(results[&participant].display_name, "Alice");
            }
            other => panic!("Expected QuizEnd, got {other:?}"),
        }
    }

    #[test]
    fn test_version_bumps_by_one_per_mutation() {
        let mut board = BoardState::new();
        assert_eq!(board.version, 0);

        board.append(stroke(1));
        assert_eq!(board.version, 1);
        board.append(stroke(2));
        assert_eq!(board.version, 2);
        board.clear();
        assert_eq!(board.version, 3);
        assert!(board.is_empty());
    }

    #[test]
    fn test_replace_with_is_wholesale() {
        let mut replica = BoardState::new();
        replica.append(stroke(9)); // divergent local content

        let mut authority = BoardState::new();
        authority.append(stroke(1));
        authority.append(stroke(2));
        authority.clear();
        authority.append(stroke(3));

        replica.replace_with(authority.clone());
        assert_eq!(replica, authority);

        // Idempotent: applying the same snapshot again changes nothing.
        replica.replace_with(authority.clone());
        assert_eq!(replica, authority);
    }

    #[test]
    fn test_is_for_filters_echo_and_foreign_session() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let session = Uuid::new_v4();

        let event = ChannelEvent::new(other, session, EventBody::RequestState);
        assert!(event.is_for(session, me));
        // Own echo
        assert!(!event.is_for(session, other));
        // Foreign session
        assert!(!event.is_for(Uuid::new_v4(), me));
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(ChannelEvent::decode(&garbage).is_err());
    }

    #[test]
    fn test_batch_size_bounded() {
        // A full 25-point batch must stay well under a kilobyte on the wire.
        let event = ChannelEvent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            EventBody::StrokeBatch(stroke(25)),
        );
        let encoded = event.encode().unwrap();
        assert!(
            encoded.len() < 512,
            "Encoded size {} too large for a 25-point batch",
            encoded.len()
        );
    }
}
