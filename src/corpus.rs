//! Corpus snapshot assembly.
//!
//! A snapshot is the concatenation of every readable document in a store
//! folder, each one introduced by a `--- name ---` header line. Snapshots are
//! rebuilt from the store on every question; nothing is cached.
//!
//! # Fallback chain
//!
//! | Mode | Tier 1 | On listing failure | On empty | Last resort |
//! |------|--------|--------------------|----------|-------------|
//! | `rag` | processed folder (`*.md`) | simple tier | "still being processed" placeholder | none |
//! | `simple` | knowledge folder (`*.md`, `*.txt`) | placeholder | empty corpus | "temporarily unavailable" placeholder |
//!
//! The processed tier skips individual files that fail to download; the
//! simple tier treats any failure as a failure of the whole tier.

use std::sync::Arc;

use anyhow::Result;
use globset::GlobSet;
use tracing::{debug, warn};

use crate::config::{Config, KnowledgeMode};
use crate::docstore::{name_matcher, DocumentStore};
use crate::error::CorpusError;
use crate::models::{EntryKind, RemoteFile};

/// Returned when even the simple corpus cannot be fetched.
pub const UNAVAILABLE_PLACEHOLDER: &str =
    "The knowledge base is temporarily unavailable. Please try again later.";

/// Returned when the processed folder lists no readable documents.
pub const PROCESSING_PLACEHOLDER: &str =
    "The knowledge base is still being processed. Please try again later.";

/// Where a snapshot's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusSource {
    Processed,
    Simple,
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct CorpusSnapshot {
    pub text: String,
    pub source: CorpusSource,
}

/// Render one document as a corpus block.
pub fn format_block(name: &str, content: &str) -> String {
    format!("\n--- {} ---\n{}\n", name, content)
}

pub struct CorpusLoader {
    store: Arc<dyn DocumentStore>,
    knowledge_folder: String,
    processed_folder: String,
    knowledge_names: GlobSet,
    processed_names: GlobSet,
}

impl CorpusLoader {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Result<Self> {
        let processed_glob = format!(
            "*.{}",
            config.sync.processed_extension.trim_start_matches('.')
        );
        Ok(Self {
            store,
            knowledge_folder: config.store.knowledge_folder.clone(),
            processed_folder: config.store.processed_folder.clone(),
            knowledge_names: name_matcher(&config.retrieval.knowledge_globs)?,
            processed_names: name_matcher(&[processed_glob])?,
        })
    }

    /// Build a snapshot for `mode`, walking the fallback chain. Never fails.
    pub async fn load(&self, mode: KnowledgeMode) -> CorpusSnapshot {
        if mode == KnowledgeMode::Rag {
            match self.load_processed().await {
                Ok(text) => {
                    return CorpusSnapshot {
                        text,
                        source: CorpusSource::Processed,
                    }
                }
                Err(CorpusError::Empty(folder)) => {
                    debug!(folder = %folder, "processed corpus is empty");
                    return CorpusSnapshot {
                        text: PROCESSING_PLACEHOLDER.to_string(),
                        source: CorpusSource::Placeholder,
                    };
                }
                Err(CorpusError::Transport(e)) => {
                    warn!(error = %e, "processed corpus unavailable, falling back to simple corpus");
                }
            }
        }

        match self.load_simple().await {
            Ok(text) => CorpusSnapshot {
                text,
                source: CorpusSource::Simple,
            },
            Err(e) => {
                warn!(error = %e, "simple corpus unavailable");
                CorpusSnapshot {
                    text: UNAVAILABLE_PLACEHOLDER.to_string(),
                    source: CorpusSource::Placeholder,
                }
            }
        }
    }

    /// Every knowledge file, failing on the first transport error.
    pub async fn load_simple(&self) -> Result<String, CorpusError> {
        let files = self.list(&self.knowledge_folder, &self.knowledge_names).await?;

        let mut corpus = String::new();
        for file in &files {
            let content = self.store.fetch_content(file).await?;
            corpus.push_str(&format_block(&file.name, &content));
        }
        Ok(corpus)
    }

    /// Every processed markdown file, skipping files that fail to download.
    pub async fn load_processed(&self) -> Result<String, CorpusError> {
        let files = self.list(&self.processed_folder, &self.processed_names).await?;

        let mut corpus = String::new();
        for file in &files {
            match self.store.fetch_content(file).await {
                Ok(content) => corpus.push_str(&format_block(&file.name, &content)),
                Err(e) => warn!(file = %file.name, error = %e, "skipping processed file"),
            }
        }

        if corpus.is_empty() {
            return Err(CorpusError::Empty(self.processed_folder.clone()));
        }
        Ok(corpus)
    }

    async fn list(&self, folder: &str, names: &GlobSet) -> Result<Vec<RemoteFile>, CorpusError> {
        let files = self.store.list_documents(folder).await?;
        Ok(files
            .into_iter()
            .filter(|f| f.kind == EntryKind::File && names.is_match(&f.name))
            .collect())
    }
}
