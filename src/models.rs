//! Core data models used throughout kb-relay.
//!
//! These types represent the remote files, tracked documents, and chunks that
//! flow through the sync and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of an entry returned by a document-store listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    #[serde(other)]
    Other,
}

/// One entry of a remote folder listing, before any change detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFile {
    /// File name, unique within its folder.
    pub name: String,
    /// Store-relative path (`folder/name`).
    pub path: String,
    /// Opaque content hash supplied by the store. Only ever compared for equality.
    pub fingerprint: String,
    pub size_bytes: u64,
    pub download_url: Option<String>,
    pub kind: EntryKind,
}

/// Processing state of a tracked document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Unprocessed,
    NeedsProcessing,
    Processed,
}

/// A source document as remembered by the sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub name: String,
    pub fingerprint: String,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub chunk_count: Option<usize>,
    /// Path of the pre-chunked markdown adopted for this document, if any.
    pub processed_file: Option<String>,
}

impl Document {
    /// A remote file seen in a listing but never synchronized.
    pub fn unprocessed(file: &RemoteFile) -> Self {
        Self {
            name: file.name.clone(),
            fingerprint: file.fingerprint.clone(),
            size_bytes: file.size_bytes,
            status: DocumentStatus::Unprocessed,
            processed_at: None,
            chunk_count: None,
            processed_file: None,
        }
    }
}

/// A bounded span of text derived from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub source_document: String,
    pub sequence_index: usize,
    pub text: String,
    pub char_length: usize,
}

/// Pre-chunked markdown found in the processed namespace of the store.
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub path: String,
    pub content: String,
}
