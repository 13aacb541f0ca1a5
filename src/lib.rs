//! ```text
//! Note saved ──► pipeline::RagPipeline::process_document
//!                     │
//!                     ├─► chunking::MarkdownChunker ──► TextChunk batch
//!                     ├─► embeddings::EmbeddingProvider (batch)
//!                     └─► stores::VectorStore::replace_for_document (CAS)
//!
//! Chat turn ──► pipeline::RagPipeline::retrieve_context
//!                     │
//!                     ├─► embeddings::EmbeddingProvider (query)
//!                     ├─► stores::VectorStore::top_neighbors (owner-scoped)
//!                     ├─► retrieval::select_diverse (MMR)
//!                     └─► retrieval::ContextAssembler ──► context + citations
//!
//! Both paths ──► usage::UsageRecorder ──► usage::UsageLedger
//! ```
//!
pub mod chunking;
pub mod embeddings;
pub mod pipeline;
pub mod retrieval;
pub mod stores;
pub mod types;
pub mod usage;

pub use chunking::{ChunkerConfig, MarkdownChunker, TokenEstimator};
pub use embeddings::{EmbeddingProvider, MockEmbeddingProvider, OpenAiEmbeddingProvider};
pub use pipeline::{
    DocumentSource, IngestOutcome, RagPipeline, RetrievalConfig, RetrievalOutcome,
};
pub use retrieval::{AssembledContext, ContextAssembler};
pub use stores::{InMemoryVectorStore, SqliteVectorStore, VectorStore};
pub use types::RagError;
pub use usage::{InMemoryUsageLedger, UsageLedger, UsageRecorder};
