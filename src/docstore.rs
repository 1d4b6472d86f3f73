//! Document-store clients.
//!
//! The [`DocumentStore`] trait is the only way the core reads the corpus:
//! folder listings with content fingerprints, raw text downloads, and
//! lookups in the processed (pre-chunked) namespace.
//!
//! | Store | Backend | Fingerprint |
//! |-------|---------|-------------|
//! | [`GitHubStore`] | GitHub contents API | git blob `sha` |
//! | [`FsStore`] | local directory tree | SHA-256 of the file bytes |
//! | [`MemoryStore`] | in-process map (tests, demos) | SHA-256 of the content |
//!
//! Listings are flat (one folder level) and sorted by name.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::{StoreConfig, StoreKind};
use crate::error::TransportError;
use crate::models::{EntryKind, ProcessedFile, RemoteFile};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// List the entries directly under `folder`.
    async fn list_documents(&self, folder: &str) -> Result<Vec<RemoteFile>, TransportError>;

    /// Download the text content of a listed file.
    async fn fetch_content(&self, file: &RemoteFile) -> Result<String, TransportError>;

    /// Look up a pre-chunked file by store path. `Ok(None)` when absent.
    async fn fetch_processed(&self, path: &str) -> Result<Option<ProcessedFile>, TransportError>;
}

/// Build the configured store.
pub fn create_store(config: &StoreConfig) -> Result<Box<dyn DocumentStore>> {
    match config.kind {
        StoreKind::Github => Ok(Box::new(GitHubStore::new(config)?)),
        StoreKind::Filesystem => {
            let root = config
                .root
                .clone()
                .ok_or_else(|| anyhow::anyhow!("store.root required for filesystem store"))?;
            Ok(Box::new(FsStore::new(root)))
        }
    }
}

/// Name of the processed rendition of `name`: extension replaced by `ext`.
///
/// `guide.pdf` → `guide.md`; a name without extension gets one appended.
pub fn processed_name(name: &str, ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    let stem = match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    };
    format!("{}.{}", stem, ext)
}

/// Case-insensitive glob set matched against bare file names.
pub fn name_matcher(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("invalid glob: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn join_path(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============ GitHub ============

/// Reads a repository through `GET /repos/{repo}/contents/{path}`.
///
/// Authenticates with the token found in the environment variable named by
/// `store.token_env`, when set. Public repositories work without one.
pub struct GitHubStore {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ContentEntry {
    name: String,
    path: String,
    sha: String,
    #[serde(default)]
    size: u64,
    download_url: Option<String>,
    #[serde(rename = "type")]
    kind: EntryKind,
}

#[derive(Deserialize)]
struct ContentFile {
    path: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

impl GitHubStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let repo = config
            .repo
            .clone()
            .ok_or_else(|| anyhow::anyhow!("store.repo required for github store"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("kb-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            repo,
            token: crate::config::secret_from_env(&config.token_env),
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.api_base,
            self.repo,
            path.trim_matches('/')
        )
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, TransportError> {
        let mut req = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github.v3+json");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("token {}", token));
        }
        req.send()
            .await
            .map_err(|e| TransportError::request(url, e))
    }
}

async fn error_for_status(
    url: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DocumentStore for GitHubStore {
    async fn list_documents(&self, folder: &str) -> Result<Vec<RemoteFile>, TransportError> {
        let url = self.contents_url(folder);
        let resp = error_for_status(&url, self.get(&url).await?).await?;
        let entries: Vec<ContentEntry> = resp
            .json()
            .await
            .map_err(|e| TransportError::decode(&url, e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|e| RemoteFile {
                name: e.name,
                path: e.path,
                fingerprint: e.sha,
                size_bytes: e.size,
                download_url: e.download_url,
                kind: e.kind,
            })
            .collect())
    }

    async fn fetch_content(&self, file: &RemoteFile) -> Result<String, TransportError> {
        let url = file
            .download_url
            .clone()
            .ok_or_else(|| TransportError::decode(&file.path, "no download_url"))?;
        let mut req = self.client.get(&url);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("token {}", token));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::request(&url, e))?;
        let resp = error_for_status(&url, resp).await?;
        resp.text()
            .await
            .map_err(|e| TransportError::decode(&url, e.to_string()))
    }

    async fn fetch_processed(&self, path: &str) -> Result<Option<ProcessedFile>, TransportError> {
        let url = self.contents_url(path);
        let resp = self.get(&url).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = error_for_status(&url, resp).await?;
        let file: ContentFile = resp
            .json()
            .await
            .map_err(|e| TransportError::decode(&url, e.to_string()))?;

        let content = match file.encoding.as_str() {
            "base64" => {
                let packed: String = file.content.split_whitespace().collect();
                let bytes = STANDARD
                    .decode(packed)
                    .map_err(|e| TransportError::decode(&url, e.to_string()))?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            _ => file.content,
        };

        Ok(Some(ProcessedFile {
            path: file.path,
            content,
        }))
    }
}

// ============ Filesystem ============

/// Serves folders of a local directory tree.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn io_error(&self, path: &str, source: std::io::Error) -> TransportError {
        TransportError::Io {
            path: self.root.join(path).display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl DocumentStore for FsStore {
    async fn list_documents(&self, folder: &str) -> Result<Vec<RemoteFile>, TransportError> {
        let dir = self.root.join(folder.trim_matches('/'));
        let mut files = Vec::new();

        let entries: Vec<_> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .collect();
        for entry in entries {
            let entry = entry.map_err(|e| {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                self.io_error(folder, source)
            })?;

            let name = entry.file_name().to_string_lossy().to_string();
            let path = join_path(folder, &name);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                files.push(RemoteFile {
                    name,
                    path,
                    fingerprint: String::new(),
                    size_bytes: 0,
                    download_url: None,
                    kind: EntryKind::Dir,
                });
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let bytes = tokio::fs::read(entry.path())
                .await
                .map_err(|e| self.io_error(&path, e))?;
            files.push(RemoteFile {
                fingerprint: sha256_hex(&bytes),
                size_bytes: bytes.len() as u64,
                download_url: Some(format!("file://{}", entry.path().display())),
                kind: EntryKind::File,
                name,
                path,
            });
        }

        Ok(files)
    }

    async fn fetch_content(&self, file: &RemoteFile) -> Result<String, TransportError> {
        let full = self.root.join(&file.path);
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| self.io_error(&file.path, e))
    }

    async fn fetch_processed(&self, path: &str) -> Result<Option<ProcessedFile>, TransportError> {
        let full = self.root.join(path.trim_matches('/'));
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(ProcessedFile {
                path: path.to_string(),
                content,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(path, e)),
        }
    }
}

// ============ In-memory ============

/// In-process store keyed by `folder/name` paths.
///
/// Supports injected failures and a listing delay so tests can exercise
/// fallback tiers and the single-flight guard.
#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, String>>,
    failing: RwLock<HashSet<String>>,
    list_delay: RwLock<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, content: &str) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path.trim_matches('/').to_string(), content.to_string());
    }

    pub fn remove(&self, path: &str) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.remove(path.trim_matches('/'));
    }

    /// Make every request touching `path` (a folder or a file) fail.
    pub fn fail(&self, path: &str) {
        let mut failing = self.failing.write().unwrap_or_else(|e| e.into_inner());
        failing.insert(path.trim_matches('/').to_string());
    }

    pub fn heal(&self, path: &str) {
        let mut failing = self.failing.write().unwrap_or_else(|e| e.into_inner());
        failing.remove(path.trim_matches('/'));
    }

    pub fn set_list_delay(&self, delay: Option<Duration>) {
        *self.list_delay.write().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    fn check(&self, path: &str) -> Result<(), TransportError> {
        let failing = self.failing.read().unwrap_or_else(|e| e.into_inner());
        if failing.contains(path.trim_matches('/')) {
            return Err(TransportError::Status {
                url: format!("memory://{}", path),
                status: 503,
                body: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_documents(&self, folder: &str) -> Result<Vec<RemoteFile>, TransportError> {
        let delay = *self.list_delay.read().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check(folder)?;

        let prefix = format!("{}/", folder.trim_matches('/'));
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files
            .iter()
            .filter_map(|(path, content)| {
                let name = path.strip_prefix(&prefix)?;
                if name.contains('/') {
                    return None;
                }
                Some(RemoteFile {
                    name: name.to_string(),
                    path: path.clone(),
                    fingerprint: sha256_hex(content.as_bytes()),
                    size_bytes: content.len() as u64,
                    download_url: Some(format!("memory://{}", path)),
                    kind: EntryKind::File,
                })
            })
            .collect())
    }

    async fn fetch_content(&self, file: &RemoteFile) -> Result<String, TransportError> {
        self.check(&file.path)?;
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files.get(&file.path).cloned().ok_or_else(|| TransportError::Status {
            url: format!("memory://{}", file.path),
            status: 404,
            body: "not found".to_string(),
        })
    }

    async fn fetch_processed(&self, path: &str) -> Result<Option<ProcessedFile>, TransportError> {
        self.check(path)?;
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.get(path.trim_matches('/')).map(|content| ProcessedFile {
            path: path.to_string(),
            content: content.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::TempDir;

    #[test]
    fn test_processed_name_replaces_extension() {
        assert_eq!(processed_name("guide.pdf", "md"), "guide.md");
        assert_eq!(processed_name("v1.2-notes.PDF", ".md"), "v1.2-notes.md");
        assert_eq!(processed_name("README", "md"), "README.md");
        assert_eq!(processed_name(".hidden", "md"), ".hidden.md");
    }

    #[test]
    fn test_name_matcher_case_insensitive() {
        let set = name_matcher(&["*.pdf".to_string()]).unwrap();
        assert!(set.is_match("Manual.PDF"));
        assert!(set.is_match("manual.pdf"));
        assert!(!set.is_match("manual.md"));
    }

    #[tokio::test]
    async fn test_memory_store_lists_one_level() {
        let store = MemoryStore::new();
        store.insert("pdfs/a.pdf", "A");
        store.insert("pdfs/nested/b.pdf", "B");
        store.insert("processed/a.md", "# a");

        let listed = store.list_documents("pdfs").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a.pdf");
        assert_eq!(listed[0].path, "pdfs/a.pdf");

        let processed = store.fetch_processed("processed/a.md").await.unwrap();
        assert_eq!(processed.unwrap().content, "# a");
        assert!(store.fetch_processed("processed/zz.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_fingerprint_tracks_content() {
        let store = MemoryStore::new();
        store.insert("pdfs/a.pdf", "v1");
        let before = store.list_documents("pdfs").await.unwrap()[0].fingerprint.clone();
        store.insert("pdfs/a.pdf", "v2");
        let after = store.list_documents("pdfs").await.unwrap()[0].fingerprint.clone();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_memory_store_injected_failure() {
        let store = MemoryStore::new();
        store.insert("knowledge/a.md", "text");
        store.fail("knowledge");
        assert!(store.list_documents("knowledge").await.is_err());
        store.heal("knowledge");
        assert_eq!(store.list_documents("knowledge").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fs_store_lists_and_reads() {
        let tmp = TempDir::new().unwrap();
        let knowledge = tmp.path().join("knowledge");
        std::fs::create_dir_all(knowledge.join("sub")).unwrap();
        std::fs::write(knowledge.join("b.md"), "Beta").unwrap();
        std::fs::write(knowledge.join("a.txt"), "Alpha").unwrap();

        let store = FsStore::new(tmp.path().to_path_buf());
        let listed = store.list_documents("knowledge").await.unwrap();
        let names: Vec<&str> = listed.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.md", "sub"]);
        assert_eq!(listed[2].kind, EntryKind::Dir);
        assert_eq!(listed[0].path, "knowledge/a.txt");
        assert_eq!(listed[0].fingerprint.len(), 64);

        let text = store.fetch_content(&listed[1]).await.unwrap();
        assert_eq!(text, "Beta");

        assert!(store
            .fetch_processed("processed/none.md")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_fs_store_listing_runs_on_spawned_task() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("pdfs")).unwrap();
        std::fs::write(tmp.path().join("pdfs/guide.pdf"), "%PDF guide").unwrap();

        let store = Arc::new(FsStore::new(tmp.path().to_path_buf()));
        let listed = tokio::spawn({
            let store = store.clone();
            async move { store.list_documents("pdfs").await }
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].fingerprint, sha256_hex(b"%PDF guide"));
        assert_eq!(listed[0].size_bytes, 10);
    }

    #[tokio::test]
    async fn test_fs_store_missing_folder_is_error() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path().to_path_buf());
        assert!(store.list_documents("nope").await.is_err());
    }
}
