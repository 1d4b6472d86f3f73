//! Process-wide sync state.
//!
//! [`SyncState`] bundles the known-document map, the single-flight
//! `processing` flag, a bounded log buffer, and the progress counters read by
//! the admin status endpoint. It is passed by `Arc` into the
//! [`SyncOrchestrator`](crate::sync::SyncOrchestrator), which is the only
//! component that mutates it.
//!
//! The document map lives behind the [`DocumentStateStore`] trait so a
//! durable backend can be injected. The shipped [`InMemoryStateStore`] keeps
//! state for the life of the process only; a restart starts empty and every
//! remote document is classified as new again.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Document;

/// Keyed storage for tracked documents.
#[async_trait]
pub trait DocumentStateStore: Send + Sync {
    /// All known documents, keyed by name.
    async fn snapshot(&self) -> Result<BTreeMap<String, Document>>;

    async fn get(&self, name: &str) -> Result<Option<Document>>;

    /// Insert or replace the record for `doc.name`.
    async fn put(&self, doc: Document) -> Result<()>;

    /// Remove a record. Returns whether it existed.
    async fn remove(&self, name: &str) -> Result<bool>;
}

/// In-memory [`DocumentStateStore`].
#[derive(Default)]
pub struct InMemoryStateStore {
    docs: RwLock<BTreeMap<String, Document>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStateStore for InMemoryStateStore {
    async fn snapshot(&self) -> Result<BTreeMap<String, Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.clone())
    }

    async fn get(&self, name: &str) -> Result<Option<Document>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(name).cloned())
    }

    async fn put(&self, doc: Document) -> Result<()> {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.insert(doc.name.clone(), doc);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        Ok(docs.remove(name).is_some())
    }
}

/// Ring buffer keeping the most recent `capacity` log lines.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// The last `n` lines, oldest first.
    pub fn recent(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn all(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Counters describing the current (or last) sync pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncProgress {
    pub started_at: Option<DateTime<Utc>>,
    pub current_file: Option<String>,
    pub total_files: usize,
    pub processed_files: usize,
}

/// Snapshot returned by the admin status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub processing: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub current_file: Option<String>,
    pub total_files: usize,
    pub processed_files: usize,
    pub recent_logs: Vec<String>,
}

pub struct SyncState {
    documents: Box<dyn DocumentStateStore>,
    processing: AtomicBool,
    logs: Mutex<LogBuffer>,
    progress: Mutex<SyncProgress>,
}

impl SyncState {
    pub fn new(documents: Box<dyn DocumentStateStore>, log_capacity: usize) -> Self {
        Self {
            documents,
            processing: AtomicBool::new(false),
            logs: Mutex::new(LogBuffer::new(log_capacity)),
            progress: Mutex::new(SyncProgress::default()),
        }
    }

    /// Empty in-memory state.
    pub fn in_memory(log_capacity: usize) -> Self {
        Self::new(Box::new(InMemoryStateStore::new()), log_capacity)
    }

    pub fn documents(&self) -> &dyn DocumentStateStore {
        self.documents.as_ref()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Claim the processing flag. Returns `None` if a pass already holds it.
    pub fn try_begin(self: &Arc<Self>) -> Option<ProcessingGuard> {
        self.processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ProcessingGuard {
                state: Arc::clone(self),
            })
    }

    pub fn logs(&self) -> MutexGuard<'_, LogBuffer> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn progress(&self) -> MutexGuard<'_, SyncProgress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self, recent: usize) -> SyncStatus {
        let progress = self.progress().clone();
        SyncStatus {
            processing: self.is_processing(),
            started_at: progress.started_at,
            current_file: progress.current_file,
            total_files: progress.total_files,
            processed_files: progress.processed_files,
            recent_logs: self.logs().recent(recent),
        }
    }
}

/// Holds the processing flag; releases it on drop, including on early return.
/// Owns its state handle so it can be moved into a spawned task.
pub struct ProcessingGuard {
    state: Arc<SyncState>,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.state.processing.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;

    fn doc(name: &str) -> Document {
        Document {
            name: name.to_string(),
            fingerprint: "fp".to_string(),
            size_bytes: 1,
            status: DocumentStatus::NeedsProcessing,
            processed_at: None,
            chunk_count: None,
            processed_file: None,
        }
    }

    #[test]
    fn test_log_buffer_bounded() {
        let mut logs = LogBuffer::new(3);
        for i in 0..5 {
            logs.push(format!("line {}", i));
        }
        assert_eq!(logs.len(), 3);
        assert_eq!(logs.all(), vec!["line 2", "line 3", "line 4"]);
        assert_eq!(logs.recent(2), vec!["line 3", "line 4"]);
        assert_eq!(logs.recent(10).len(), 3);
    }

    #[test]
    fn test_guard_is_single_flight() {
        let state = Arc::new(SyncState::in_memory(10));
        let guard = state.try_begin().expect("first claim succeeds");
        assert!(state.is_processing());
        assert!(state.try_begin().is_none());
        drop(guard);
        assert!(!state.is_processing());
        assert!(state.try_begin().is_some());
    }

    #[tokio::test]
    async fn test_guard_moves_into_task() {
        let state = Arc::new(SyncState::in_memory(10));
        let guard = state.try_begin().expect("first claim succeeds");
        tokio::spawn(async move { drop(guard) }).await.unwrap();
        assert!(!state.is_processing());
    }

    #[tokio::test]
    async fn test_in_memory_store_crud() {
        let store = InMemoryStateStore::new();
        store.put(doc("b.pdf")).await.unwrap();
        store.put(doc("a.pdf")).await.unwrap();

        let snap = store.snapshot().await.unwrap();
        assert_eq!(snap.keys().collect::<Vec<_>>(), vec!["a.pdf", "b.pdf"]);
        assert!(store.get("a.pdf").await.unwrap().is_some());

        assert!(store.remove("a.pdf").await.unwrap());
        assert!(!store.remove("a.pdf").await.unwrap());
        assert!(store.get("a.pdf").await.unwrap().is_none());
    }

    #[test]
    fn test_status_reports_recent_logs() {
        let state = SyncState::in_memory(50);
        for i in 0..30 {
            state.logs().push(format!("entry {}", i));
        }
        state.progress().total_files = 4;
        let status = state.status(20);
        assert!(!status.processing);
        assert_eq!(status.total_files, 4);
        assert_eq!(status.recent_logs.len(), 20);
        assert_eq!(status.recent_logs[0], "entry 10");
    }
}
