//! Document-store abstraction for the quiz record.
//!
//! The real backing is a hosted document database reached through its
//! JS SDK; this trait is the narrow surface the engines use, and the
//! in-memory implementation backs tests and native demos. Live updates
//! arrive through a `watch` receiver per record: `Some(quiz)` on every
//! mutation, `None` once the record is deleted.
//!
//! Write partitioning is built into the API: `set_active` and `delete`
//! are host-only operations on host-owned fields, and `merge_result`
//! touches exactly one key of the result mapping, so two writers never
//! contend for the same field.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::model::{Quiz, QuizResult};

/// Document-store operation failures. Surfaced to the user as a banner;
/// never retried automatically except where explicitly chained.
#[derive(Debug, Clone)]
pub enum StoreError {
    NotFound(Uuid),
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "quiz record {id} not found"),
            Self::Backend(e) => write!(f, "document store error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Client-side view of the hosted document store, scoped to quiz records.
pub trait QuizStore: Send + Sync + 'static {
    /// Create the record. Host-only.
    fn create(&self, quiz: Quiz) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Fetch the full record by id.
    fn get(&self, id: Uuid) -> impl std::future::Future<Output = Result<Quiz, StoreError>> + Send;

    /// Flip `is_active` and stamp the end time. Host-only.
    fn set_active(
        &self,
        id: Uuid,
        active: bool,
        ended_at: Option<u64>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Merge one participant's result under its own key. Never touches
    /// any other key.
    fn merge_result(
        &self,
        id: Uuid,
        participant_id: Uuid,
        result: QuizResult,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Delete the record. Host-only, destructive, no undo.
    fn delete(&self, id: Uuid) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Live-update feed for the record. Yields the current snapshot
    /// immediately, then every subsequent mutation; `None` after delete.
    fn subscribe(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<watch::Receiver<Option<Quiz>>, StoreError>> + Send;
}

struct Record {
    quiz: Quiz,
    updates: watch::Sender<Option<Quiz>>,
}

/// In-memory store for tests and demos.
#[derive(Default)]
pub struct MemoryQuizStore {
    records: Arc<RwLock<HashMap<Uuid, Record>>>,
    fail_writes: AtomicBool,
}

impl MemoryQuizStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle injected write failures (test hook).
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            Err(StoreError::Backend("injected failure".to_string()))
        } else {
            Ok(())
        }
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.records.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl QuizStore for MemoryQuizStore {
    async fn create(&self, quiz: Quiz) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        let (updates, _) = watch::channel(Some(quiz.clone()));
        records.insert(quiz.id, Record { quiz, updates });
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Quiz, StoreError> {
        let records = self.records.read().await;
        records
            .get(&id)
            .map(|r| r.quiz.clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn set_active(&self, id: Uuid, active: bool, ended_at: Option<u64>) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.quiz.is_active = active;
        if ended_at.is_some() {
            record.quiz.ended_at = ended_at;
        }
        let _ = record.updates.send(Some(record.quiz.clone()));
        Ok(())
    }

    async fn merge_result(
        &self,
        id: Uuid,
        participant_id: Uuid,
        result: QuizResult,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.quiz.results.insert(participant_id, result);
        let _ = record.updates.send(Some(record.quiz.clone()));
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        let record = records.remove(&id).ok_or(StoreError::NotFound(id))?;
        let _ = record.updates.send(None);
        Ok(())
    }

    async fn subscribe(&self, id: Uuid) -> Result<watch::Receiver<Option<Quiz>>, StoreError> {
        let records = self.records.read().await;
        records
            .get(&id)
            .map(|r| r.updates.subscribe())
            .ok_or(StoreError::NotFound(id))
    }
}
