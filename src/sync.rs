//! Synchronization passes.
//!
//! [`SyncOrchestrator::run_sync`] lists the source folder, classifies every
//! entry with [`detect`], adopts the pre-chunked rendition of each new or
//! updated document from the processed folder, and evicts documents that
//! disappeared from the listing. Raw PDFs are never parsed here; the
//! [`processor`](crate::processor) produces the markdown out of band.
//!
//! At most one pass runs at a time. A second trigger while a pass is active
//! returns [`SyncError::AlreadyRunning`] without touching state.
//!
//! Every step appends a line to the bounded log in [`SyncState`] and emits
//! the same line through `tracing`.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use globset::GlobSet;
use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::detect::detect;
use crate::docstore::{name_matcher, processed_name, DocumentStore};
use crate::error::{SyncError, TransportError};
use crate::models::{Document, DocumentStatus, EntryKind, RemoteFile};
use crate::processor::count_chunks;
use crate::state::{ProcessingGuard, SyncProgress, SyncState, SyncStatus};

/// What happened to one document during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Processed { name: String, chunk_count: usize },
    NeedsProcessing { name: String },
    Failed { name: String, reason: String },
}

impl FileOutcome {
    pub fn name(&self) -> &str {
        match self {
            Self::Processed { name, .. }
            | Self::NeedsProcessing { name }
            | Self::Failed { name, .. } => name,
        }
    }
}

/// Result of a pass that was allowed to start.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub success: bool,
    /// Documents handled, including the ones that failed.
    pub processed: usize,
    pub total: usize,
    pub deleted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub files: Vec<FileOutcome>,
    pub logs: Vec<String>,
}

pub struct SyncOrchestrator {
    state: Arc<SyncState>,
    store: Arc<dyn DocumentStore>,
    chunker: Chunker,
    source_folder: String,
    processed_folder: String,
    processed_extension: String,
    source_names: GlobSet,
    recent_logs: usize,
}

impl SyncOrchestrator {
    pub fn new(state: Arc<SyncState>, store: Arc<dyn DocumentStore>, config: &Config) -> Result<Self> {
        Ok(Self {
            state,
            store,
            chunker: Chunker::from_config(&config.chunking),
            source_folder: config.store.source_folder.clone(),
            processed_folder: config.store.processed_folder.clone(),
            processed_extension: config.sync.processed_extension.clone(),
            source_names: name_matcher(&config.sync.source_globs)?,
            recent_logs: config.sync.recent_logs,
        })
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    pub fn is_processing(&self) -> bool {
        self.state.is_processing()
    }

    /// Progress counters and the most recent log lines.
    pub fn status(&self) -> SyncStatus {
        self.state.status(self.recent_logs)
    }

    fn log(&self, line: String) {
        info!("{}", line);
        self.state.logs().push(line);
    }

    fn log_warn(&self, line: String) {
        warn!("{}", line);
        self.state.logs().push(line);
    }

    /// Source documents currently in the store, filtered to the configured names.
    async fn list_sources(&self) -> Result<Vec<RemoteFile>, TransportError> {
        let listing = self.store.list_documents(&self.source_folder).await?;
        Ok(listing
            .into_iter()
            .filter(|f| f.kind == EntryKind::File && self.source_names.is_match(&f.name))
            .collect())
    }

    /// Remote source files with their tracked state; untracked ones are `unprocessed`.
    pub async fn list_known_documents(&self) -> Result<Vec<Document>> {
        let remote = self.list_sources().await?;
        let known = self.state.documents().snapshot().await?;
        Ok(remote
            .iter()
            .map(|f| known.get(&f.name).cloned().unwrap_or_else(|| Document::unprocessed(f)))
            .collect())
    }

    /// Run one pass. Rejected when another pass holds the processing flag.
    pub async fn run_sync(&self) -> Result<SyncReport, SyncError> {
        let guard = self.begin()?;
        Ok(self.run_claimed(guard).await)
    }

    /// Claim the processing flag for a pass that will run later.
    pub fn begin(&self) -> Result<ProcessingGuard, SyncError> {
        self.state.try_begin().ok_or(SyncError::AlreadyRunning)
    }

    /// Run one pass under a claim taken with [`begin`](Self::begin). The flag
    /// is released when the pass ends.
    pub async fn run_claimed(&self, _guard: ProcessingGuard) -> SyncReport {
        self.state.logs().clear();
        *self.state.progress() = SyncProgress {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        match self.run_pass().await {
            Ok(report) => report,
            Err(e) => {
                self.log_warn(format!("sync failed: {:#}", e));
                let (processed, total) = {
                    let mut progress = self.state.progress();
                    progress.current_file = None;
                    (progress.processed_files, progress.total_files)
                };
                SyncReport {
                    success: false,
                    processed,
                    total,
                    deleted: 0,
                    error: Some(format!("{:#}", e)),
                    files: Vec::new(),
                    logs: self.state.logs().all(),
                }
            }
        }
    }

    async fn run_pass(&self) -> Result<SyncReport> {
        self.log(format!("detecting changes in '{}'", self.source_folder));
        let remote = self.list_sources().await?;
        let known = self.state.documents().snapshot().await?;
        let changes = detect(&remote, &known);

        let total = changes.pending();
        self.state.progress().total_files = total;
        self.log(format!("found {} new files", changes.new.len()));
        self.log(format!("found {} updated files", changes.updated.len()));
        self.log(format!("found {} deleted files", changes.deleted.len()));

        let mut files = Vec::with_capacity(total);
        for file in changes.new.iter().chain(changes.updated.iter()) {
            let outcome = self.sync_document(file).await;
            self.state.progress().processed_files += 1;
            files.push(outcome);
        }

        for name in &changes.deleted {
            self.state.documents().remove(name).await?;
            self.log(format!("removed: {}", name));
        }

        self.state.progress().current_file = None;
        self.log("sync complete".to_string());

        Ok(SyncReport {
            success: true,
            processed: files.len(),
            total,
            deleted: changes.deleted.len(),
            error: None,
            files,
            logs: self.state.logs().all(),
        })
    }

    /// Adopt the processed rendition of one document. Failures are returned
    /// as an outcome and leave the state untouched.
    async fn sync_document(&self, file: &RemoteFile) -> FileOutcome {
        self.state.progress().current_file = Some(file.name.clone());
        self.log(format!("processing: {}", file.name));

        let processed = processed_name(&file.name, &self.processed_extension);
        let path = format!("{}/{}", self.processed_folder.trim_matches('/'), processed);

        let (doc, outcome) = match self.store.fetch_processed(&path).await {
            Ok(Some(found)) => {
                self.log(format!("found processed file: {}", processed));
                let chunk_count = match count_chunks(&found.content) {
                    0 => self.chunker.split(&found.content).len(),
                    n => n,
                };
                let doc = Document {
                    name: file.name.clone(),
                    fingerprint: file.fingerprint.clone(),
                    size_bytes: file.size_bytes,
                    status: DocumentStatus::Processed,
                    processed_at: Some(Utc::now()),
                    chunk_count: Some(chunk_count),
                    processed_file: Some(processed),
                };
                let outcome = FileOutcome::Processed {
                    name: file.name.clone(),
                    chunk_count,
                };
                (doc, outcome)
            }
            Ok(None) => {
                self.log(format!("no processed file found, PDF needs processing: {}", file.name));
                self.log(format!(
                    "hint: run `kbr process` locally and upload the output to '{}/'",
                    self.processed_folder
                ));
                let doc = Document {
                    status: DocumentStatus::NeedsProcessing,
                    processed_at: Some(Utc::now()),
                    ..Document::unprocessed(file)
                };
                (doc, FileOutcome::NeedsProcessing { name: file.name.clone() })
            }
            Err(e) => return self.fail(file, e.to_string()),
        };

        if let Err(e) = self.state.documents().put(doc).await {
            return self.fail(file, format!("{:#}", e));
        }
        if matches!(outcome, FileOutcome::Processed { .. }) {
            self.log(format!("done: {}", file.name));
        }
        outcome
    }

    fn fail(&self, file: &RemoteFile, reason: String) -> FileOutcome {
        self.log_warn(format!("failed {}: {}", file.name, reason));
        FileOutcome::Failed {
            name: file.name.clone(),
            reason,
        }
    }
}
