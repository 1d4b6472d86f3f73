//! # kb-relay
//!
//! An incremental knowledge-base relay for chat-completion bots.
//!
//! kb-relay keeps track of which documents in a remote store have been
//! synchronized, retrieves the parts of the corpus relevant to a question by
//! keyword, and forwards them with the question to a chat-completion model.
//! Questions arrive through a WeChat-style XML webhook; an admin JSON API
//! triggers and inspects sync passes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ DocumentStore│──▶│ SyncOrchestr.│──▶│  SyncState   │
//! │ GitHub / FS  │   │ detect+adopt │   │ docs + logs  │
//! └──────┬───────┘   └──────────────┘   └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ CorpusLoader │──▶│  Retriever   │──▶│PromptAssemb. │──▶ completion
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! PDFs are converted out of band by the [`processor`] into pre-chunked
//! markdown, which a sync pass then adopts from the processed folder.
//!
//! ## Quick Start
//!
//! ```bash
//! kbr process ./pdfs ./processed   # convert local PDFs
//! kbr sync                          # run one sync pass
//! kbr ask "what is the refund policy?"
//! kbr serve                         # start the webhook + admin server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`chunk`] | Sentence-based chunking |
//! | [`detect`] | Change detection between listing and state |
//! | [`state`] | Document state, single-flight flag, log buffer |
//! | [`docstore`] | Document-store clients |
//! | [`sync`] | Sync passes |
//! | [`corpus`] | Corpus snapshots and their fallback chain |
//! | [`retrieve`] | Keyword retrieval |
//! | [`prompt`] | Prompt template and token-budget guard |
//! | [`completion`] | Chat-completion client |
//! | [`answer`] | The question-answering pipeline |
//! | [`processor`] | Offline PDF conversion |
//! | [`webhook`] | Webhook XML envelope and signature |
//! | [`server`] | HTTP server |

pub mod answer;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod corpus;
pub mod detect;
pub mod docstore;
pub mod error;
pub mod models;
pub mod processor;
pub mod prompt;
pub mod retrieve;
pub mod server;
pub mod state;
pub mod sync;
pub mod webhook;
