//! End-to-end sync and answer flow over in-memory collaborators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kb_relay::answer::{Answerer, APOLOGY};
use kb_relay::completion::CompletionClient;
use kb_relay::config::{Config, KnowledgeMode};
use kb_relay::docstore::MemoryStore;
use kb_relay::error::TransportError;
use kb_relay::models::DocumentStatus;
use kb_relay::state::SyncState;
use kb_relay::sync::{FileOutcome, SyncOrchestrator};

/// Records prompts and replies with a canned answer.
struct ScriptedModel {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn answering(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn down() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CompletionClient for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, TransportError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().ok_or_else(|| TransportError::Status {
            url: "test://model".to_string(),
            status: 502,
            body: "bad gateway".to_string(),
        })
    }
}

fn rag_config() -> Config {
    let mut cfg = Config::minimal();
    cfg.retrieval.mode = KnowledgeMode::Rag;
    cfg
}

fn handbook() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert("pdfs/refunds.pdf", "%PDF refunds v1");
    store.insert("pdfs/shipping.pdf", "%PDF shipping v1");
    store.insert(
        "processed/refunds.md",
        "# refunds\n\n---\n\n## Chunk 1\n\nRefunds are accepted within thirty days。\n\n---\n\n",
    );
    store.insert("knowledge/faq.md", "Shipping takes five business days.");
    store
}

#[tokio::test]
async fn test_sync_then_answer_uses_adopted_rendition() {
    let cfg = rag_config();
    let store = handbook();
    let model = ScriptedModel::answering("Within thirty days.");

    let sync = SyncOrchestrator::new(Arc::new(SyncState::in_memory(200)), store.clone(), &cfg)
        .unwrap();
    let report = sync.run_sync().await.unwrap();
    assert!(report.success);
    assert_eq!(report.total, 2);
    assert_eq!(
        report.files,
        vec![
            FileOutcome::Processed {
                name: "refunds.pdf".to_string(),
                chunk_count: 1
            },
            FileOutcome::NeedsProcessing {
                name: "shipping.pdf".to_string()
            },
        ]
    );

    let answerer = Answerer::new(&cfg, store, model.clone()).unwrap();
    let answer = answerer.answer_question("refunds accepted?").await;
    assert_eq!(answer, "Within thirty days.");

    let prompt = model.last_prompt();
    assert!(prompt.contains("--- refunds.md ---"));
    assert!(prompt.contains("Question: refunds accepted?"));
}

#[tokio::test]
async fn test_processed_listing_failure_falls_back_to_knowledge_folder() {
    let cfg = rag_config();
    let store = handbook();
    store.fail("processed");
    let model = ScriptedModel::answering("ok");

    let answerer = Answerer::new(&cfg, store, model.clone()).unwrap();
    answerer.answer_question("shipping days").await;
    assert!(model
        .last_prompt()
        .contains("--- faq.md ---\nShipping takes five business days."));
}

#[tokio::test]
async fn test_model_outage_yields_apology() {
    let answerer = Answerer::new(&rag_config(), handbook(), ScriptedModel::down()).unwrap();
    assert_eq!(answerer.answer_question("refunds").await, APOLOGY);
}

#[tokio::test]
async fn test_oversized_corpus_is_cut_before_dispatch() {
    let mut cfg = Config::minimal();
    cfg.prompt.token_budget = 100;
    cfg.prompt.fallback_context_chars = 50;
    let store = Arc::new(MemoryStore::new());
    store.insert("knowledge/big.md", &"lorem ipsum ".repeat(500));
    let model = ScriptedModel::answering("ok");

    let answerer = Answerer::new(&cfg, store, model.clone()).unwrap();
    answerer.answer_question("lorem").await;
    let prompt = model.last_prompt();
    assert!(prompt.chars().count() < 600);
    assert!(prompt.contains("..."));
}

#[tokio::test]
async fn test_update_and_removal_across_passes() {
    let cfg = rag_config();
    let store = handbook();
    let state = Arc::new(SyncState::in_memory(200));
    let sync = SyncOrchestrator::new(state.clone(), store.clone(), &cfg).unwrap();
    sync.run_sync().await.unwrap();

    // The rendition for shipping shows up together with a new PDF revision.
    store.insert("pdfs/shipping.pdf", "%PDF shipping v2");
    store.insert("processed/shipping.md", "## Chunk 1\n\na\n\n## Chunk 2\n\nb\n");
    store.remove("pdfs/refunds.pdf");

    let report = sync.run_sync().await.unwrap();
    assert_eq!((report.total, report.deleted), (1, 1));

    let docs = state.documents().snapshot().await.unwrap();
    assert_eq!(docs.len(), 1);
    let shipping = &docs["shipping.pdf"];
    assert_eq!(shipping.status, DocumentStatus::Processed);
    assert_eq!(shipping.chunk_count, Some(2));
}
