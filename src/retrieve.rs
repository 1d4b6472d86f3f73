//! Keyword retrieval over a corpus snapshot.
//!
//! The query is tokenized on whitespace and tokens of one character are
//! dropped. The corpus is cut into blocks at `--- name ---` header lines, and
//! a block is relevant when any keyword occurs in it as a case-insensitive
//! substring. The first `max_blocks` relevant blocks, in corpus order, are
//! joined with a blank line and hard-truncated to `max_chars` characters
//! plus [`ELLIPSIS`].
//!
//! When nothing matches, the first `max_chars` characters of the raw corpus
//! are returned instead, so a non-empty corpus never yields empty context.
//!
//! # Example
//!
//! ```rust
//! use kb_relay::retrieve::retrieve;
//!
//! let corpus = "\n--- a.md ---\nCats are mammals.\n\n--- b.md ---\nDogs bark loudly.\n";
//! assert_eq!(retrieve("cats mammals", corpus, 8000), "--- a.md ---\nCats are mammals.");
//! ```

use crate::config::RetrievalConfig;

/// Marker appended to truncated context.
pub const ELLIPSIS: &str = "...";

/// Outcome of one retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieval {
    pub context: String,
    /// Number of relevant blocks found (before the `max_blocks` cap).
    pub matched_blocks: usize,
    /// True when no block matched and the raw corpus prefix was used.
    pub fell_back: bool,
}

#[derive(Debug, Clone)]
pub struct Retriever {
    max_chars: usize,
    max_blocks: usize,
}

impl Retriever {
    pub fn new(max_chars: usize, max_blocks: usize) -> Self {
        Self {
            max_chars,
            max_blocks,
        }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.max_chars, config.max_blocks)
    }

    pub fn retrieve(&self, query: &str, corpus: &str) -> Retrieval {
        let keywords: Vec<String> = keywords(query).map(str::to_lowercase).collect();

        let relevant: Vec<&str> = split_blocks(corpus)
            .into_iter()
            .filter(|block| {
                let lowered = block.to_lowercase();
                keywords.iter().any(|k| lowered.contains(k.as_str()))
            })
            .collect();

        if relevant.is_empty() {
            return Retrieval {
                context: take_chars(corpus, self.max_chars).to_string(),
                matched_blocks: 0,
                fell_back: true,
            };
        }

        let joined = relevant
            .iter()
            .take(self.max_blocks)
            .copied()
            .collect::<Vec<_>>()
            .join("\n\n");

        let context = if joined.chars().count() > self.max_chars {
            format!("{}{}", take_chars(&joined, self.max_chars), ELLIPSIS)
        } else {
            joined
        };

        Retrieval {
            context,
            matched_blocks: relevant.len(),
            fell_back: false,
        }
    }
}

impl Default for Retriever {
    fn default() -> Self {
        Self::new(8000, 3)
    }
}

/// Retrieve with the default block cap of three.
pub fn retrieve(query: &str, corpus: &str, max_chars: usize) -> String {
    Retriever::new(max_chars, 3).retrieve(query, corpus).context
}

/// Whitespace tokens longer than one character.
pub fn keywords(query: &str) -> impl Iterator<Item = &str> {
    query.split_whitespace().filter(|t| t.chars().count() > 1)
}

fn is_header(line: &str) -> bool {
    let line = line.trim_end_matches(['\r', '\n']);
    line.len() > 8 && line.starts_with("--- ") && line.ends_with(" ---")
}

/// Cut `corpus` at header lines. Blocks are trimmed; blank ones are dropped.
pub fn split_blocks(corpus: &str) -> Vec<&str> {
    let mut starts = vec![0];
    let mut offset = 0;
    for line in corpus.split_inclusive('\n') {
        if offset > 0 && is_header(line) {
            starts.push(offset);
        }
        offset += line.len();
    }
    starts.push(corpus.len());

    starts
        .windows(2)
        .map(|w| corpus[w[0]..w[1]].trim())
        .filter(|b| !b.is_empty())
        .collect()
}

/// Prefix of `s` holding at most `n` characters.
fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = "\n--- a.md ---\nCats are mammals.\n\n--- b.md ---\nDogs bark loudly.\n";

    #[test]
    fn test_matching_block_returned_verbatim() {
        assert_eq!(
            retrieve("cats mammals", CORPUS, 8000),
            "--- a.md ---\nCats are mammals."
        );
    }

    #[test]
    fn test_no_match_falls_back_to_corpus_prefix() {
        let r = Retriever::new(20, 3).retrieve("xyz", CORPUS);
        assert!(r.fell_back);
        assert_eq!(r.context, CORPUS.chars().take(20).collect::<String>());
    }

    #[test]
    fn test_single_char_tokens_ignored() {
        let r = Retriever::default().retrieve("a b c", CORPUS);
        assert!(r.fell_back);
        assert_eq!(r.context, CORPUS);
    }

    #[test]
    fn test_case_insensitive_substring() {
        let out = retrieve("BARK", CORPUS, 8000);
        assert_eq!(out, "--- b.md ---\nDogs bark loudly.");
    }

    #[test]
    fn test_at_most_three_blocks_in_corpus_order() {
        let corpus: String = (0..6)
            .map(|i| format!("\n--- doc{}.md ---\nshared term {}\n", i, i))
            .collect();
        let r = Retriever::default().retrieve("shared", &corpus);
        assert_eq!(r.matched_blocks, 6);
        assert_eq!(
            r.context,
            "--- doc0.md ---\nshared term 0\n\n--- doc1.md ---\nshared term 1\n\n--- doc2.md ---\nshared term 2"
        );
    }

    #[test]
    fn test_truncates_to_budget_plus_ellipsis() {
        let body = "relevant ".repeat(200);
        let corpus = format!("\n--- big.md ---\n{}\n", body);
        let out = retrieve("relevant", &corpus, 100);
        assert!(out.ends_with(ELLIPSIS));
        assert_eq!(out.chars().count(), 100 + ELLIPSIS.len());
    }

    #[test]
    fn test_budget_counts_characters_not_bytes() {
        let corpus = format!("\n--- 手册.md ---\n{}\n", "知识库内容".repeat(50));
        let out = retrieve("知识库", &corpus, 30);
        assert_eq!(out.chars().count(), 30 + ELLIPSIS.len());
    }

    #[test]
    fn test_non_empty_for_any_non_empty_corpus() {
        for query in ["", "x", "zzz qqq", "cats"] {
            assert!(!retrieve(query, CORPUS, 5).is_empty(), "query {:?}", query);
        }
    }

    #[test]
    fn test_never_exceeds_budget() {
        for max in [1, 10, 25, 1000] {
            for query in ["cats", "dogs cats", "none"] {
                let out = retrieve(query, CORPUS, max);
                assert!(out.chars().count() <= max + ELLIPSIS.len());
            }
        }
    }

    #[test]
    fn test_split_blocks_keeps_preamble_and_ignores_rules() {
        let corpus = "intro text\n--- a.md ---\n# A\n\n---\n\nbody\n--- b.md ---\nB";
        let blocks = split_blocks(corpus);
        assert_eq!(
            blocks,
            vec!["intro text", "--- a.md ---\n# A\n\n---\n\nbody", "--- b.md ---\nB"]
        );
    }
}
