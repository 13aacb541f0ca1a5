//! Maximal Marginal Relevance selection over scored neighbors.
//!
//! A plain top-k-by-similarity ranking lets near-duplicate chunks from one
//! repetitive document crowd out everything else. MMR trades relevance to the
//! query against redundancy with already-selected chunks, so the returned set
//! stays bounded AND diverse.

use std::cmp::Ordering;

use crate::types::ScoredChunk;

/// Default relevance/diversity balance. 1.0 is pure relevance, 0.0 pure
/// anti-redundancy.
pub const DEFAULT_MMR_LAMBDA: f32 = 0.7;

/// Cosine similarity of two vectors.
///
/// Defined as 0.0 (never NaN) when either vector has zero norm; mismatched
/// lengths also score 0.0 since callers guard dimensions upstream.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

/// Select up to `k` diverse chunks from `candidates` by greedy MMR.
///
/// Candidates are re-scored against `query` with cosine similarity and sorted
/// descending (stable, so equal scores keep their incoming order). The best
/// candidate seeds the selection; each following pick maximizes
/// `lambda * sim(query, c) - (1 - lambda) * max(sim(c, s) for s in selected)`.
/// Exact ties go to the candidate earlier in the similarity-sorted order,
/// keeping the result deterministic.
pub fn select_diverse(
    query: &[f32],
    candidates: Vec<ScoredChunk>,
    k: usize,
    lambda: f32,
) -> Vec<ScoredChunk> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let mut pool: Vec<ScoredChunk> = candidates
        .into_iter()
        .map(|mut candidate| {
            candidate.similarity = cosine_similarity(query, &candidate.record.embedding);
            candidate
        })
        .collect();
    pool.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });

    let k = k.min(pool.len());
    let mut selected: Vec<ScoredChunk> = Vec::with_capacity(k);
    selected.push(pool.remove(0));

    while selected.len() < k && !pool.is_empty() {
        let mut best_at = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for (at, candidate) in pool.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|chosen| {
                    cosine_similarity(&candidate.record.embedding, &chosen.record.embedding)
                })
                .fold(f32::NEG_INFINITY, f32::max);
            let score = lambda * candidate.similarity - (1.0 - lambda) * redundancy;
            // Strict comparison: ties keep the earlier candidate.
            if score > best_score {
                best_score = score;
                best_at = at;
            }
        }
        selected.push(pool.remove(best_at));
    }

    selected
}
