//! # huddle-whiteboard — Shared whiteboard convergence engine
//!
//! Host-authoritative whiteboard replicated over the best-effort call
//! channel. The host owns the canonical stroke log; participants hold
//! replicas that converge through two mechanisms:
//!
//! ```text
//! Host pointer input
//!       │  (coalesced ~50ms, ≤25 points)
//!       ▼
//! StrokeBatch ──── best-effort ────► replica appends, redraws
//!
//! every 5s, and on RequestState:
//! FullState ────── authoritative ──► replica replaces wholesale
//! ```
//!
//! Missed deltas are never detected — they are healed by the next
//! periodic `FullState`, whose wholesale-replace semantics make delivery
//! idempotent. Accepted state is mirrored to a session-keyed local cache
//! so a reload redraws immediately; the cache is advisory only.
//!
//! ## Modules
//!
//! - [`host`] — canonical state owner: batching, resync, clear
//! - [`replica`] — read-only follower: apply, replace, request

pub mod host;
pub mod replica;

pub use huddle_sync::protocol::{BoardState, Point, Stroke};
pub use host::{HostConfig, WhiteboardHost};
pub use replica::{BoardEvent, WhiteboardReplica};

/// Local cache key for a session's board state.
pub fn cache_key(session_id: uuid::Uuid) -> String {
    format!("huddle.whiteboard.{session_id}")
}
