//! # huddle-sync — Synchronization substrate for in-call collaboration
//!
//! Shared plumbing for the whiteboard and quiz features that run inside a
//! video call. Both features replicate host-owned state to participants over
//! two parallel paths:
//!
//! ```text
//! ┌──────────┐   ChannelEvent (best-effort)   ┌──────────────┐
//! │   Host   │ ─────────────────────────────► │ Participant  │
//! │ (owner)  │                                │ (replica)    │
//! └────┬─────┘                                └──────┬───────┘
//!      │                                            │
//!      │ writes                              reads/merges
//!      ▼                                            ▼
//! ┌──────────────────────────────────────────────────────┐
//! │            Hosted document store (quiz record)       │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The broadcast channel gives no delivery or ordering guarantee and may
//! reject transiently; every layer above it is written against that contract.
//!
//! ## Modules
//!
//! - [`protocol`] — Tagged event union carried on the broadcast channel
//! - [`channel`] — Channel adapter trait + in-memory implementation
//! - [`retry`] — Bounded fixed-delay retry for lossy sends
//! - [`session`] — Call-scoped identity, role, and quiz visibility
//! - [`banner`] — Auto-dismissing user-facing error banners
//! - [`cache`] — Browser-local state cache keyed by session

pub mod protocol;
pub mod channel;
pub mod retry;
pub mod session;
pub mod banner;
pub mod cache;

// Re-exports for convenience
pub use protocol::{
    BoardState, ChannelEvent, EventBody, Point, ProtocolError, ResultSummary, Stroke,
};
pub use channel::{ChannelError, ChannelStats, LocalChannel, SyncChannel};
pub use retry::RetryPolicy;
pub use session::{ParticipantInfo, Role, SessionContext};
pub use banner::{BannerFeed, ErrorBanner, BANNER_DISMISS_AFTER};
pub use cache::{MemoryCache, StateCache};
