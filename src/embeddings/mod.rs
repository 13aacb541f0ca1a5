//! Embedding provider seam.
//!
//! Chunk and query text is converted to fixed-length vectors through the
//! [`EmbeddingProvider`] trait. One `embed_batch` call maps to one provider
//! request; failures propagate as [`RagError::EmbeddingProvider`] and retry
//! is always the caller's decision. [`MockEmbeddingProvider`] gives
//! deterministic vectors for tests and offline development.

pub mod openai;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::types::{EmbeddedChunk, RagError, TextChunk};

pub use openai::{OpenAiEmbeddingConfig, OpenAiEmbeddingProvider};

/// Converts batches of texts into fixed-length float vectors.
///
/// All vectors returned by one provider model have identical length, and the
/// output preserves input order and cardinality.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the embedding model, persisted with every vector so
    /// cross-model comparisons can be rejected.
    fn model_id(&self) -> &str;

    /// Embed a batch of texts with a single provider request.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError>;
}

/// Embed chunks in order, preserving 1:1 positional correspondence.
///
/// An empty input yields an empty output without touching the provider.
pub async fn embed_chunks(
    provider: &dyn EmbeddingProvider,
    chunks: Vec<TextChunk>,
) -> Result<Vec<EmbeddedChunk>, RagError> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }
    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
    let vectors = provider.embed_batch(&texts).await?;
    if vectors.len() != chunks.len() {
        return Err(RagError::EmbeddingProvider(format!(
            "provider returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        )));
    }
    if let Some(first) = vectors.first() {
        let dim = first.len();
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != dim) {
            return Err(RagError::EmbeddingProvider(format!(
                "provider returned mixed vector lengths ({dim} and {})",
                bad.len()
            )));
        }
    }
    Ok(chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
        .collect())
}

/// Embed a single query string.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Vec<f32>, RagError> {
    let texts = [text.to_string()];
    let vectors = provider.embed_batch(&texts).await?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| RagError::EmbeddingProvider("provider returned no vector for query".into()))
}

/// Deterministic bag-of-words embedder for tests and offline runs.
///
/// Each word hashes to a vector slot, so texts sharing vocabulary land close
/// together under cosine similarity. Identical input always produces
/// identical output.
pub struct MockEmbeddingProvider {
    dimension: usize,
    calls: AtomicUsize,
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::with_dimension(64)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed_batch` calls issued so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            let hash = fnv1a(word.as_bytes());
            vector[(hash % self.dimension as u64) as usize] += 1.0;
            vector[((hash >> 16) % self.dimension as u64) as usize] += 0.5;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn model_id(&self) -> &str {
        "mock-bag-of-words"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::cosine_similarity;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new();
        let inputs = vec![
            "Hello world".to_string(),
            "Goodbye world".to_string(),
            "Hello world".to_string(),
        ];

        let first = provider.embed_batch(&inputs).await.unwrap();
        let second = provider.embed_batch(&inputs).await.unwrap();

        assert_eq!(first, second, "mock embeddings should be deterministic");
        assert_eq!(first[0], first[2], "identical text, identical embedding");
        assert_ne!(first[0], first[1], "different text, different embedding");
    }

    #[tokio::test]
    async fn mock_embeddings_reflect_shared_vocabulary() {
        let provider = MockEmbeddingProvider::new();
        let vectors = provider
            .embed_batch(&[
                "the quick brown fox".to_string(),
                "a quick brown dog".to_string(),
                "thermodynamics of stellar interiors".to_string(),
            ])
            .await
            .unwrap();

        let near = cosine_similarity(&vectors[0], &vectors[1]);
        let far = cosine_similarity(&vectors[0], &vectors[2]);
        assert!(near > far, "shared words should score higher: {near} vs {far}");
    }

    #[tokio::test]
    async fn empty_chunk_batch_skips_the_provider() {
        let provider = MockEmbeddingProvider::new();
        let out = embed_chunks(&provider, Vec::new()).await.unwrap();

        assert!(out.is_empty());
        assert_eq!(provider.calls(), 0, "no provider call for an empty batch");
    }

    #[tokio::test]
    async fn embed_chunks_preserves_order() {
        let provider = MockEmbeddingProvider::new();
        let chunks = vec![
            crate::types::TextChunk::new("doc", "first chunk body", 0, None),
            crate::types::TextChunk::new("doc", "second chunk body", 1, None),
        ];
        let expected: Vec<Vec<f32>> = provider
            .embed_batch(&[
                "first chunk body".to_string(),
                "second chunk body".to_string(),
            ])
            .await
            .unwrap();

        let embedded = embed_chunks(&provider, chunks).await.unwrap();

        assert_eq!(embedded.len(), 2);
        assert_eq!(embedded[0].chunk.index, 0);
        assert_eq!(embedded[1].chunk.index, 1);
        assert_eq!(embedded[0].embedding, expected[0]);
        assert_eq!(embedded[1].embedding, expected[1]);
    }
}
