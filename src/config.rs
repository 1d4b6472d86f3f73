use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

/// Which document-store backend serves the corpus.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Github,
    Filesystem,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// `owner/repo`, required for the GitHub store.
    #[serde(default)]
    pub repo: Option<String>,
    /// Root directory, required for the filesystem store.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Folder holding the plain-text knowledge files (simple mode).
    #[serde(default = "default_knowledge_folder")]
    pub knowledge_folder: String,
    /// Folder holding the raw source documents tracked by sync.
    #[serde(default = "default_source_folder")]
    pub source_folder: String,
    /// Folder holding the pre-chunked markdown renditions.
    #[serde(default = "default_processed_folder")]
    pub processed_folder: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_knowledge_folder() -> String {
    "knowledge".to_string()
}
fn default_source_folder() -> String {
    "pdfs".to_string()
}
fn default_processed_folder() -> String {
    "processed".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Globs (matched against file names) selecting the tracked source documents.
    #[serde(default = "default_source_globs")]
    pub source_globs: Vec<String>,
    #[serde(default = "default_processed_extension")]
    pub processed_extension: String,
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    #[serde(default = "default_recent_logs")]
    pub recent_logs: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_globs: default_source_globs(),
            processed_extension: default_processed_extension(),
            log_capacity: default_log_capacity(),
            recent_logs: default_recent_logs(),
        }
    }
}

fn default_source_globs() -> Vec<String> {
    vec!["*.pdf".to_string()]
}
fn default_processed_extension() -> String {
    "md".to_string()
}
fn default_log_capacity() -> usize {
    200
}
fn default_recent_logs() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap_hint")]
    pub overlap_hint: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_hint: default_overlap_hint(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap_hint() -> usize {
    200
}

/// How the corpus is sourced and narrowed before prompting.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeMode {
    /// Whole plain-text knowledge folder, no filtering.
    Simple,
    /// Pre-chunked corpus narrowed by the keyword retriever.
    Rag,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_mode")]
    pub mode: KnowledgeMode,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_blocks")]
    pub max_blocks: usize,
    #[serde(default = "default_knowledge_globs")]
    pub knowledge_globs: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            max_chars: default_max_chars(),
            max_blocks: default_max_blocks(),
            knowledge_globs: default_knowledge_globs(),
        }
    }
}

fn default_mode() -> KnowledgeMode {
    KnowledgeMode::Simple
}
fn default_max_chars() -> usize {
    8000
}
fn default_max_blocks() -> usize {
    3
}
fn default_knowledge_globs() -> Vec<String> {
    vec!["*.md".to_string(), "*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_fallback_context_chars")]
    pub fallback_context_chars: usize,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            fallback_context_chars: default_fallback_context_chars(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

fn default_token_budget() -> usize {
    32_000
}
fn default_fallback_context_chars() -> usize {
    10_000
}
fn default_chars_per_token() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_completion_endpoint(),
            model: default_completion_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_completion_endpoint() -> String {
    "https://api.deepseek.com/v1/chat/completions".to_string()
}
fn default_completion_model() -> String {
    "deepseek-chat".to_string()
}
fn default_api_key_env() -> String {
    "DEEPSEEK_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    /// Environment variable holding the shared signature token.
    #[serde(default = "default_webhook_token_env")]
    pub token_env: String,
    #[serde(default = "default_mention_markers")]
    pub mention_markers: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            token_env: default_webhook_token_env(),
            mention_markers: default_mention_markers(),
        }
    }
}

fn default_webhook_token_env() -> String {
    "WECHAT_TOKEN".to_string()
}
fn default_mention_markers() -> Vec<String> {
    vec!["@机器人".to_string(), "@bot".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorConfig {
    #[serde(default = "default_pdf_dir")]
    pub pdf_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            pdf_dir: default_pdf_dir(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_pdf_dir() -> PathBuf {
    PathBuf::from("./pdfs")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./processed")
}

impl Config {
    /// A config with every default and a filesystem store rooted at `./kb`.
    pub fn minimal() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig {
                kind: StoreKind::Filesystem,
                repo: None,
                root: Some(PathBuf::from("./kb")),
                api_base: default_api_base(),
                token_env: default_token_env(),
                knowledge_folder: default_knowledge_folder(),
                source_folder: default_source_folder(),
                processed_folder: default_processed_folder(),
                timeout_secs: default_timeout_secs(),
            },
            sync: SyncConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            prompt: PromptConfig::default(),
            completion: CompletionConfig::default(),
            webhook: WebhookConfig::default(),
            processor: ProcessorConfig::default(),
        }
    }

    /// Validate cross-field constraints after deserialization.
    pub fn validate(&self) -> Result<()> {
        match self.store.kind {
            StoreKind::Github => match self.store.repo.as_deref() {
                Some(repo) if repo.contains('/') => {}
                _ => bail!("store.repo must be 'owner/repo' when store.kind is 'github'"),
            },
            StoreKind::Filesystem => {
                if self.store.root.is_none() {
                    bail!("store.root must be set when store.kind is 'filesystem'");
                }
            }
        }

        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.retrieval.max_chars == 0 {
            bail!("retrieval.max_chars must be > 0");
        }
        if self.retrieval.max_blocks == 0 {
            bail!("retrieval.max_blocks must be >= 1");
        }
        if self.prompt.chars_per_token == 0 {
            bail!("prompt.chars_per_token must be > 0");
        }
        if self.sync.log_capacity == 0 {
            bail!("sync.log_capacity must be > 0");
        }
        if self.sync.source_globs.is_empty() {
            bail!("sync.source_globs must not be empty");
        }
        if self.sync.processed_extension.trim_start_matches('.').is_empty() {
            bail!("sync.processed_extension must not be empty");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Read a secret from the environment variable named by `var`.
pub fn secret_from_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
