//! Browser-local state cache.
//!
//! A reload should redraw the whiteboard immediately instead of waiting
//! for a fresh sync, so accepted state is mirrored to a local cache keyed
//! by session id. This is a performance optimization only: cached content
//! is always superseded by the next authoritative message, and a missing
//! or stale cache is never an error.

use std::collections::HashMap;
use std::sync::Mutex;

/// Opaque byte-oriented cache, read once at mount and written on every
/// accepted mutation. The browser build backs this with `localStorage`;
/// tests use [`MemoryCache`].
pub trait StateCache: Send + Sync + 'static {
    fn load(&self, key: &str) -> Option<Vec<u8>>;
    fn store(&self, key: &str, bytes: &[u8]);
    fn remove(&self, key: &str);
}

/// In-memory cache for tests and native demos.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateCache for MemoryCache {
    fn load(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn store(&self, key: &str, bytes: &[u8]) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), bytes.to_vec());
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}
