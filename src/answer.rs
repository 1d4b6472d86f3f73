//! Question answering.
//!
//! [`Answerer::answer_question`] runs the whole read path: corpus snapshot
//! (with its fallback chain), keyword retrieval in `rag` mode, prompt
//! assembly under the token budget, and the completion call. It always
//! returns a well-formed reply; a failed completion becomes [`APOLOGY`].

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::completion::CompletionClient;
use crate::config::{Config, KnowledgeMode};
use crate::corpus::CorpusLoader;
use crate::docstore::DocumentStore;
use crate::prompt::PromptAssembler;
use crate::retrieve::Retriever;

/// Reply sent when the completion model cannot be reached.
pub const APOLOGY: &str = "Sorry, I can't answer your question right now. Please try again later.";

pub struct Answerer {
    mode: KnowledgeMode,
    corpus: CorpusLoader,
    retriever: Retriever,
    assembler: PromptAssembler,
    completion: Arc<dyn CompletionClient>,
}

impl Answerer {
    pub fn new(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        completion: Arc<dyn CompletionClient>,
    ) -> Result<Self> {
        Ok(Self {
            mode: config.retrieval.mode,
            corpus: CorpusLoader::new(store, config)?,
            retriever: Retriever::from_config(&config.retrieval),
            assembler: PromptAssembler::from_config(&config.prompt),
            completion,
        })
    }

    /// Build the prompt that would be sent for `question`.
    pub async fn prepare_prompt(&self, question: &str) -> String {
        let snapshot = self.corpus.load(self.mode).await;
        debug!(source = ?snapshot.source, chars = snapshot.text.len(), "corpus loaded");

        let context = match self.mode {
            KnowledgeMode::Rag => {
                let retrieval = self.retriever.retrieve(question, &snapshot.text);
                if retrieval.fell_back {
                    info!("no relevant blocks, using corpus prefix");
                }
                info!(
                    chars = retrieval.context.chars().count(),
                    blocks = retrieval.matched_blocks,
                    "retrieved context"
                );
                retrieval.context
            }
            KnowledgeMode::Simple => snapshot.text,
        };

        self.assembler.assemble(question, &context).text
    }

    pub async fn answer_question(&self, question: &str) -> String {
        let prompt = self.prepare_prompt(question).await;

        match self.completion.complete(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "completion failed");
                APOLOGY.to_string()
            }
        }
    }
}
