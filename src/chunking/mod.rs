//! Deterministic, heading-aware chunking of note text.
//!
//! The chunker scans line by line: markdown headings close the running chunk
//! and open a new one tagged with the heading text, and oversized chunks are
//! split at sentence boundaries with a configurable word overlap carried into
//! the next chunk for lexical continuity. Output order is emission order and
//! chunk indices are contiguous from zero.

pub mod tokens;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::types::TextChunk;

pub use tokens::{CharHeuristicEstimator, TokenEstimator};

#[cfg(feature = "precise-tokens")]
pub use tokens::TiktokenEstimator;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})(?:\s+(.*))?$").expect("valid heading pattern"));

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("valid sentence pattern"));

/// Noise floor: chunks at or below this trimmed length are discarded.
const MIN_CHUNK_CHARS: usize = 10;

/// Tuning knobs for [`MarkdownChunker`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Approximate token budget per chunk.
    pub max_tokens: usize,
    /// Number of trailing words duplicated into the next chunk after a
    /// sentence-boundary split.
    pub overlap_words: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            overlap_words: 50,
        }
    }
}

/// Splits raw note text into overlapping, heading-tagged [`TextChunk`]s.
#[derive(Clone)]
pub struct MarkdownChunker {
    config: ChunkerConfig,
    estimator: Arc<dyn TokenEstimator>,
}

impl Default for MarkdownChunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl MarkdownChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self {
            config,
            estimator: Arc::new(CharHeuristicEstimator),
        }
    }

    /// Replace the token estimator (e.g. with a BPE-backed one).
    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk `content` into heading-tagged segments for `source_document_id`.
    ///
    /// Empty or whitespace-only input yields no chunks, as does a document
    /// consisting solely of heading lines.
    pub fn chunk(&self, content: &str, source_document_id: &str) -> Vec<TextChunk> {
        let mut bodies: Vec<(String, Option<String>)> = Vec::new();
        let mut acc = String::new();
        let mut heading: Option<String> = None;

        for line in content.lines() {
            if let Some(caps) = HEADING_RE.captures(line) {
                if !acc.trim().is_empty() {
                    bodies.push((std::mem::take(&mut acc), heading.clone()));
                } else {
                    acc.clear();
                }
                heading = caps
                    .get(2)
                    .map(|m| m.as_str().trim())
                    .filter(|text| !text.is_empty())
                    .map(str::to_string);
                // The heading line stays in the new chunk's content; only the
                // tag has the markers stripped.
                acc.push_str(line);
                acc.push('\n');
                continue;
            }

            acc.push_str(line);
            acc.push('\n');

            if self.estimator.estimate(&acc) > self.config.max_tokens {
                match split_at_sentence_midpoint(&acc) {
                    Some((first, rest)) => {
                        let overlap = trailing_words(&first, self.config.overlap_words);
                        let reseeded = if overlap.is_empty() {
                            rest.trim_start().to_string()
                        } else {
                            format!("{overlap} {}", rest.trim_start())
                        };
                        bodies.push((first, heading.clone()));
                        acc = reseeded;
                    }
                    // No sentence boundary to cut at: force-flush as-is.
                    None => bodies.push((std::mem::take(&mut acc), heading.clone())),
                }
            }
        }

        if !acc.trim().is_empty() {
            bodies.push((acc, heading));
        }

        bodies.retain(|(body, _)| keep_chunk(body));
        bodies
            .into_iter()
            .enumerate()
            .map(|(index, (body, heading))| {
                TextChunk::new(source_document_id, body, index, heading)
            })
            .collect()
    }
}

/// Post-filter: drop noise chunks and chunks that carry no body text beyond
/// their heading lines.
fn keep_chunk(body: &str) -> bool {
    if body.trim().chars().count() <= MIN_CHUNK_CHARS {
        return false;
    }
    body.lines()
        .any(|line| !line.trim().is_empty() && !HEADING_RE.is_match(line))
}

/// Split `text` at the midpoint of its sentence fragments.
///
/// Fragments end at runs of `.`, `!`, `?`. Returns `None` when fewer than two
/// fragments exist; otherwise the first `ceil(n / 2)` fragments form the
/// emitted half and the remainder is returned for reseeding.
fn split_at_sentence_midpoint(text: &str) -> Option<(String, String)> {
    let mut fragments: Vec<&str> = Vec::new();
    let mut cursor = 0usize;
    for m in SENTENCE_END_RE.find_iter(text) {
        fragments.push(&text[cursor..m.end()]);
        cursor = m.end();
    }
    let remainder = &text[cursor..];
    if !remainder.trim().is_empty() {
        fragments.push(remainder);
    }
    if fragments.len() < 2 {
        return None;
    }

    let mid = fragments.len().div_ceil(2);
    let first: String = fragments[..mid].concat();
    let rest: String = fragments[mid..].concat();
    Some((first, rest))
}

/// The tail of `text` starting at its nth-from-last word, punctuation kept.
fn trailing_words(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    let starts: Vec<usize> = text.unicode_word_indices().map(|(at, _)| at).collect();
    if starts.is_empty() {
        return "";
    }
    let from = starts[starts.len().saturating_sub(n)];
    text[from..].trim_end()
}
