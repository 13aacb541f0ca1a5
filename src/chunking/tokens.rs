//! Pluggable token estimation.
//!
//! Chunking and context assembly only ever see the [`TokenEstimator`] trait,
//! so the default `ceil(chars / 4)` heuristic can be swapped for a real
//! tokenizer (the `precise-tokens` feature) without touching either.

/// Estimates how many model tokens a piece of text will cost.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Default heuristic: `ceil(character_count / 4)`.
///
/// Systematically misestimates non-English and code-heavy text; the contract
/// everywhere it is used is "approximately bounded", not token-exact.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharHeuristicEstimator;

impl TokenEstimator for CharHeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// BPE-backed estimator using `cl100k_base`.
#[cfg(feature = "precise-tokens")]
pub struct TiktokenEstimator {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "precise-tokens")]
impl TiktokenEstimator {
    pub fn cl100k() -> Result<Self, crate::types::RagError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|err| crate::types::RagError::Configuration(err.to_string()))?;
        Ok(Self { bpe })
    }
}

#[cfg(feature = "precise-tokens")]
impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}
