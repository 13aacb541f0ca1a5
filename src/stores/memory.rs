//! In-memory vector store with an exact cosine scan.
//!
//! Backing store for tests and single-process development; behavior matches
//! the SQLite store contract exactly (CAS replace, model pinning, owner
//! scoping) so pipelines can swap implementations freely.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::VectorStore;
use crate::retrieval::cosine_similarity;
use crate::types::{EmbeddedChunk, RagError, ScoredChunk, VectorRecord};

#[derive(Default)]
struct OwnerShelf {
    /// Model id and dimension pinned by the owner's first insert.
    model: Option<(String, usize)>,
    versions: HashMap<String, u64>,
    records: Vec<VectorRecord>,
}

/// Process-local [`VectorStore`] implementation.
#[derive(Default)]
pub struct InMemoryVectorStore {
    owners: RwLock<HashMap<String, OwnerShelf>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total records across all owners (diagnostics/tests).
    pub fn len(&self) -> usize {
        self.owners
            .read()
            .values()
            .map(|shelf| shelf.records.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn document_version(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<u64, RagError> {
        Ok(self
            .owners
            .read()
            .get(owner_id)
            .and_then(|shelf| shelf.versions.get(document_id).copied())
            .unwrap_or(0))
    }

    async fn replace_for_document(
        &self,
        owner_id: &str,
        document_id: &str,
        title: &str,
        model: &str,
        chunks: Vec<EmbeddedChunk>,
        expected_version: u64,
    ) -> Result<u64, RagError> {
        let mut owners = self.owners.write();
        let shelf = owners.entry(owner_id.to_string()).or_default();

        let current = shelf.versions.get(document_id).copied().unwrap_or(0);
        if current != expected_version {
            return Err(RagError::ConcurrentReplacement {
                document_id: document_id.to_string(),
            });
        }

        if let Some(first) = chunks.first() {
            let dimension = first.embedding.len();
            if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimension) {
                return Err(RagError::DimensionMismatch {
                    stored: dimension,
                    actual: bad.embedding.len(),
                });
            }
            match &shelf.model {
                Some((pinned_model, pinned_dim)) => {
                    if pinned_model != model {
                        return Err(RagError::ModelMismatch {
                            stored: pinned_model.clone(),
                            requested: model.to_string(),
                        });
                    }
                    if *pinned_dim != dimension {
                        return Err(RagError::DimensionMismatch {
                            stored: *pinned_dim,
                            actual: dimension,
                        });
                    }
                }
                None => shelf.model = Some((model.to_string(), dimension)),
            }
        }

        shelf
            .records
            .retain(|record| record.source_document_id != document_id);
        let now = Utc::now();
        for embedded in chunks {
            shelf.records.push(VectorRecord {
                id: embedded.chunk.id,
                owner_id: owner_id.to_string(),
                source_document_id: document_id.to_string(),
                title: title.to_string(),
                content: embedded.chunk.content,
                index: embedded.chunk.index,
                heading: embedded.chunk.heading,
                model: model.to_string(),
                embedding: embedded.embedding,
                created_at: now,
            });
        }

        let next = current + 1;
        shelf.versions.insert(document_id.to_string(), next);
        Ok(next)
    }

    async fn top_neighbors(
        &self,
        owner_id: &str,
        query: &[f32],
        n: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let owners = self.owners.read();
        let Some(shelf) = owners.get(owner_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredChunk> = shelf
            .records
            .iter()
            .map(|record| ScoredChunk {
                similarity: cosine_similarity(query, &record.embedding),
                record: record.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(n);
        Ok(scored)
    }

    async fn count_for_document(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<usize, RagError> {
        Ok(self
            .owners
            .read()
            .get(owner_id)
            .map(|shelf| {
                shelf
                    .records
                    .iter()
                    .filter(|record| record.source_document_id == document_id)
                    .count()
            })
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextChunk;

    fn embedded(doc: &str, content: &str, index: usize, embedding: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: TextChunk::new(doc, content, index, None),
            embedding,
        }
    }

    #[tokio::test]
    async fn neighbors_never_cross_the_owner_boundary() {
        let store = InMemoryVectorStore::new();
        // Owner B indexes content nearly identical to owner A's.
        store
            .replace_for_document(
                "owner-a",
                "doc",
                "A note",
                "mock",
                vec![embedded("doc", "shared secret text", 0, vec![1.0, 0.0])],
                0,
            )
            .await
            .unwrap();
        store
            .replace_for_document(
                "owner-b",
                "doc",
                "B note",
                "mock",
                vec![embedded("doc", "shared secret text", 0, vec![1.0, 0.001])],
                0,
            )
            .await
            .unwrap();

        let hits = store.top_neighbors("owner-a", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|hit| hit.record.owner_id == "owner-a"));
    }

    #[tokio::test]
    async fn replace_is_idempotent_per_document() {
        let store = InMemoryVectorStore::new();
        let chunks = || {
            vec![
                embedded("doc", "first chunk text", 0, vec![1.0, 0.0]),
                embedded("doc", "second chunk text", 1, vec![0.0, 1.0]),
            ]
        };

        let v1 = store
            .replace_for_document("owner", "doc", "Note", "mock", chunks(), 0)
            .await
            .unwrap();
        let v2 = store
            .replace_for_document("owner", "doc", "Note", "mock", chunks(), v1)
            .await
            .unwrap();

        assert_eq!(v2, 2);
        assert_eq!(store.count_for_document("owner", "doc").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = InMemoryVectorStore::new();
        store
            .replace_for_document(
                "owner",
                "doc",
                "Note",
                "mock",
                vec![embedded("doc", "original body", 0, vec![1.0])],
                0,
            )
            .await
            .unwrap();

        // A second writer still holding version 0 loses the race.
        let err = store
            .replace_for_document(
                "owner",
                "doc",
                "Note",
                "mock",
                vec![embedded("doc", "conflicting body", 0, vec![0.5])],
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ConcurrentReplacement { .. }));
        assert_eq!(store.count_for_document("owner", "doc").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn model_and_dimension_are_pinned_per_owner() {
        let store = InMemoryVectorStore::new();
        store
            .replace_for_document(
                "owner",
                "doc-1",
                "Note",
                "model-a",
                vec![embedded("doc-1", "pinning body", 0, vec![1.0, 0.0, 0.0])],
                0,
            )
            .await
            .unwrap();

        let model_err = store
            .replace_for_document(
                "owner",
                "doc-2",
                "Other",
                "model-b",
                vec![embedded("doc-2", "other body", 0, vec![1.0, 0.0, 0.0])],
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(model_err, RagError::ModelMismatch { .. }));

        let dim_err = store
            .replace_for_document(
                "owner",
                "doc-2",
                "Other",
                "model-a",
                vec![embedded("doc-2", "other body", 0, vec![1.0, 0.0])],
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(dim_err, RagError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn empty_replace_clears_the_document() {
        let store = InMemoryVectorStore::new();
        let v1 = store
            .replace_for_document(
                "owner",
                "doc",
                "Note",
                "mock",
                vec![embedded("doc", "body to clear", 0, vec![1.0])],
                0,
            )
            .await
            .unwrap();

        store
            .replace_for_document("owner", "doc", "Note", "mock", Vec::new(), v1)
            .await
            .unwrap();
        assert_eq!(store.count_for_document("owner", "doc").await.unwrap(), 0);
        assert_eq!(store.document_version("owner", "doc").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn neighbors_are_ranked_by_similarity() {
        let store = InMemoryVectorStore::new();
        store
            .replace_for_document(
                "owner",
                "doc",
                "Note",
                "mock",
                vec![
                    embedded("doc", "far away content", 0, vec![0.0, 1.0]),
                    embedded("doc", "right on target", 1, vec![1.0, 0.0]),
                ],
                0,
            )
            .await
            .unwrap();

        let hits = store.top_neighbors("owner", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits[0].record.content, "right on target");
        assert!(hits[0].similarity > hits[1].similarity);
    }
}
