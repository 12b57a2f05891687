//! Auto-dismissing error banners.
//!
//! Document-store failures and other user-visible errors surface as a
//! banner that dismisses itself after five seconds. Engines post banners
//! through a [`BannerFeed`]; the UI drains the paired receiver. Nothing in
//! this path is fatal: a full queue or a dropped receiver only logs.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How long a banner stays visible.
pub const BANNER_DISMISS_AFTER: Duration = Duration::from_secs(5);

/// A user-facing error with its display deadline.
#[derive(Debug, Clone)]
pub struct ErrorBanner {
    pub message: String,
    pub shown_at: Instant,
}

impl ErrorBanner {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            shown_at: Instant::now(),
        }
    }

    /// Whether the banner should be dismissed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.shown_at) >= BANNER_DISMISS_AFTER
    }
}

/// Fan-in handle engines use to surface errors to the UI.
#[derive(Clone)]
pub struct BannerFeed {
    tx: mpsc::Sender<ErrorBanner>,
}

impl BannerFeed {
    /// Create a feed and its UI-side receiver.
    pub fn channel() -> (Self, mpsc::Receiver<ErrorBanner>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }

    /// Post a banner. Also logs, so headless runs keep a trace.
    pub fn post(&self, message: impl Into<String>) {
        let banner = ErrorBanner::new(message);
        log::warn!("{}", banner.message);
        let _ = self.tx.try_send(banner);
    }
}
