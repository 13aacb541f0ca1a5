//! Shared data model and error types for the retrieval core.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors surfaced by the retrieval core.
///
/// I/O failures (provider, store) always propagate to the immediate caller;
/// "no relevant data" is represented by empty results, never by an error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RagError {
    /// Network, timeout, or quota failure from the embedding provider.
    /// Retry is the caller's decision; the client never retries implicitly.
    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// Persistence or query failure in the vector store.
    #[error("vector store error: {0}")]
    Storage(String),

    /// An embedding's length disagrees with vectors already stored for the
    /// owner. Fatal configuration error: the model must not change without
    /// reprocessing every document for that owner.
    #[error("embedding dimension mismatch: stored {stored}, got {actual}")]
    DimensionMismatch { stored: usize, actual: usize },

    /// The embedding model identifier disagrees with the one pinned for the
    /// owner on first write. Cross-model similarity is meaningless.
    #[error("embedding model mismatch: owner is pinned to '{stored}', got '{requested}'")]
    ModelMismatch { stored: String, requested: String },

    /// A concurrent reprocessing of the same document won the version race.
    /// The losing replace is rejected; callers re-read and retry.
    #[error("document '{document_id}' was reprocessed concurrently")]
    ConcurrentReplacement { document_id: String },

    /// The document source has no document with this id for this owner.
    #[error("unknown document '{document_id}'")]
    UnknownDocument { document_id: String },

    /// Chunking failed to produce a well-formed result.
    #[error("chunking error: {0}")]
    Chunking(String),

    /// Missing or invalid configuration (credentials, endpoints).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        RagError::EmbeddingProvider(err.to_string())
    }
}

/// A bounded, heading-tagged segment of a source document.
///
/// Produced by the chunker in emission order; `index` is 0-based and
/// contiguous within the source document. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: Uuid,
    pub source_document_id: String,
    pub content: String,
    pub index: usize,
    pub heading: Option<String>,
}

impl TextChunk {
    pub fn new(
        source_document_id: impl Into<String>,
        content: impl Into<String>,
        index: usize,
        heading: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_document_id: source_document_id.into(),
            content: content.into(),
            index,
            heading,
        }
    }
}

/// A chunk paired with its embedding vector.
///
/// Batches preserve 1:1 positional correspondence with the input chunks, and
/// all vectors in one batch share the same provider and length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: TextChunk,
    pub embedding: Vec<f32>,
}

/// Persisted form of an embedded chunk.
///
/// `owner_id` is the tenant isolation key: every store query is scoped by it.
/// `model` pins the embedding model the vector was produced with, and `title`
/// denormalizes the source document's title for citation assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub source_document_id: String,
    pub title: String,
    pub content: String,
    pub index: usize,
    pub heading: Option<String>,
    pub model: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// A stored record scored against a query vector at retrieval time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub record: VectorRecord,
    /// Cosine similarity to the query vector, in [-1, 1].
    pub similarity: f32,
}

/// Provenance for one chunk included in an assembled context.
///
/// Order-preserving projection of the included chunks; duplicate titles are
/// expected when several chunks of one document make the cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
}

/// Per-owner, per-day token counters. Accumulated, never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub owner_id: String,
    pub day: NaiveDate,
    pub embedding_tokens: u64,
    pub chat_tokens: u64,
}

/// A note as supplied by the external note-management collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDocument {
    pub id: String,
    pub title: String,
    pub content: String,
}
