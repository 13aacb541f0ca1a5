//! Owner-scoped vector storage.
//!
//! The [`VectorStore`] trait is the adapter boundary around the host's
//! nearest-neighbor index: this crate issues replace/query commands and
//! interprets results, it does not reimplement the index structure.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ VectorStore trait│
//!                  └────────┬─────────┘
//!                           │
//!               ┌───────────┴───────────┐
//!               ▼                       ▼
//!      ┌────────────────┐     ┌──────────────────┐
//!      │ InMemoryVector │     │ SqliteVectorStore│
//!      │ Store (exact)  │     │ (sqlite-vec)     │
//!      └────────────────┘     └──────────────────┘
//! ```
//!
//! Two invariants hold for every implementation:
//! - every record returned by `top_neighbors(owner, ..)` belongs to that
//!   owner — a hard tenant-isolation boundary, not a filter convenience;
//! - `replace_for_document` is atomic and version-checked, so concurrent
//!   reprocessing of one document can never interleave delete/insert runs.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::types::{EmbeddedChunk, RagError, ScoredChunk};

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Current replace version for `(owner, document)`; 0 before first write.
    async fn document_version(&self, owner_id: &str, document_id: &str)
    -> Result<u64, RagError>;

    /// Atomically replace every record of `(owner, document)` with `chunks`.
    ///
    /// `expected_version` must equal the stored version or the call fails
    /// with [`RagError::ConcurrentReplacement`] (compare-and-swap; callers
    /// re-read the version and retry). An empty `chunks` clears the
    /// document's vectors. The owner's embedding model and dimension are
    /// pinned on first insert; later writes with a different model fail with
    /// [`RagError::ModelMismatch`], a different vector length with
    /// [`RagError::DimensionMismatch`]. Returns the new version.
    async fn replace_for_document(
        &self,
        owner_id: &str,
        document_id: &str,
        title: &str,
        model: &str,
        chunks: Vec<EmbeddedChunk>,
        expected_version: u64,
    ) -> Result<u64, RagError>;

    /// Up to `n` records owned by `owner_id`, ranked by descending cosine
    /// similarity to `query`.
    async fn top_neighbors(
        &self,
        owner_id: &str,
        query: &[f32],
        n: usize,
    ) -> Result<Vec<ScoredChunk>, RagError>;

    /// Number of records currently stored for `(owner, document)`.
    async fn count_for_document(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<usize, RagError>;
}
