//! End-to-end orchestration: note ingestion and chat retrieval.
//!
//! [`RagPipeline`] wires the chunker, embedding provider, vector store, and
//! usage recorder into the two operations the host application calls:
//! [`RagPipeline::process_document`] when a note is saved and
//! [`RagPipeline::retrieve_context`] (or the degrading
//! [`RagPipeline::retrieve_context_or_empty`]) when a chat turn arrives.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::chunking::{CharHeuristicEstimator, ChunkerConfig, MarkdownChunker, TokenEstimator};
use crate::embeddings::{EmbeddingProvider, embed_chunks, embed_query};
use crate::retrieval::{
    AssembledContext, ContextAssembler, DEFAULT_CONTEXT_BUDGET, DEFAULT_MMR_LAMBDA,
    select_diverse,
};
use crate::stores::VectorStore;
use crate::types::{NoteDocument, RagError};
use crate::usage::{UsageDelta, UsageRecorder};

/// Replace attempts before giving up on a document that keeps being
/// rewritten underneath us.
const MAX_REPLACE_ATTEMPTS: usize = 3;

/// Where the pipeline fetches note content from at ingestion time.
///
/// Fetching at processing time (rather than passing content along) means a
/// queued reprocess always indexes the latest revision of the note.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// The current revision of `(owner, document)`, or `None` if the note no
    /// longer exists.
    async fn fetch(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<Option<NoteDocument>, RagError>;
}

/// Knobs for the retrieval half of the pipeline.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Nearest neighbors fetched from the store before re-ranking.
    pub candidate_pool: usize,
    /// Chunks kept after diversity selection.
    pub select_k: usize,
    /// Relevance/diversity balance for the re-ranker.
    pub mmr_lambda: f32,
    /// Token budget for the assembled context block.
    pub context_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_pool: 20,
            select_k: 8,
            mmr_lambda: DEFAULT_MMR_LAMBDA,
            context_budget: DEFAULT_CONTEXT_BUDGET,
        }
    }
}

/// Result of reprocessing one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The note is gone or has no indexable text; its vectors were cleared.
    EmptyContent,
    /// The note was chunked, embedded, and stored.
    Indexed { chunks: usize, version: u64 },
}

/// Result of the degrading retrieval entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    /// Context was assembled; citations ride along.
    Context(AssembledContext),
    /// Retrieval worked but produced nothing usable for this query.
    NoMatches,
    /// A dependency failed; the chat should proceed without context.
    Unavailable,
}

pub struct RagPipeline {
    source: Arc<dyn DocumentSource>,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    recorder: Option<UsageRecorder>,
    chunker: MarkdownChunker,
    assembler: ContextAssembler,
    estimator: Arc<dyn TokenEstimator>,
    retrieval: RetrievalConfig,
}

impl RagPipeline {
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Re-index one note: fetch, chunk, embed, and atomically replace its
    /// vectors. Safe to call repeatedly; each run fully supersedes the last.
    pub async fn process_document(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<IngestOutcome, RagError> {
        let Some(document) = self.source.fetch(owner_id, document_id).await? else {
            debug!(owner_id, document_id, "note missing; clearing its vectors");
            self.replace_with_retry(owner_id, document_id, "", Vec::new())
                .await?;
            return Ok(IngestOutcome::EmptyContent);
        };

        let chunks = self.chunker.chunk(&document.content, &document.id);
        if chunks.is_empty() {
            debug!(owner_id, document_id, "no indexable text; clearing vectors");
            self.replace_with_retry(owner_id, document_id, &document.title, Vec::new())
                .await?;
            return Ok(IngestOutcome::EmptyContent);
        }

        let embedding_tokens: u64 = chunks
            .iter()
            .map(|chunk| self.estimator.estimate(&chunk.content) as u64)
            .sum();

        let embedded = embed_chunks(self.provider.as_ref(), chunks).await?;
        let stored = embedded.len();
        let version = self
            .replace_with_retry(owner_id, document_id, &document.title, embedded)
            .await?;

        info!(owner_id, document_id, chunks = stored, version, "note indexed");
        self.record_usage(owner_id, embedding_tokens, 0);
        Ok(IngestOutcome::Indexed {
            chunks: stored,
            version,
        })
    }

    /// Assemble a context block for one chat query.
    ///
    /// An empty result means nothing relevant is indexed for this owner;
    /// dependency failures surface as errors (see
    /// [`Self::retrieve_context_or_empty`] for the degrading variant).
    pub async fn retrieve_context(
        &self,
        owner_id: &str,
        query: &str,
    ) -> Result<AssembledContext, RagError> {
        if query.trim().is_empty() {
            return Ok(AssembledContext::default());
        }

        let query_vector = embed_query(self.provider.as_ref(), query).await?;
        let candidates = self
            .store
            .top_neighbors(owner_id, &query_vector, self.retrieval.candidate_pool)
            .await?;
        if candidates.is_empty() {
            debug!(owner_id, "no indexed neighbors for query");
            return Ok(AssembledContext::default());
        }

        let selected = select_diverse(
            &query_vector,
            candidates,
            self.retrieval.select_k,
            self.retrieval.mmr_lambda,
        );
        let context = self
            .assembler
            .build(&selected, self.retrieval.context_budget);

        let chat_tokens = (self.estimator.estimate(query)
            + self.estimator.estimate(&context.context)) as u64;
        self.record_usage(owner_id, 0, chat_tokens);
        Ok(context)
    }

    /// Retrieval that never fails the chat turn: dependency errors are logged
    /// and collapse to [`RetrievalOutcome::Unavailable`].
    pub async fn retrieve_context_or_empty(
        &self,
        owner_id: &str,
        query: &str,
    ) -> RetrievalOutcome {
        match self.retrieve_context(owner_id, query).await {
            Ok(context) if context.is_empty() => RetrievalOutcome::NoMatches,
            Ok(context) => RetrievalOutcome::Context(context),
            Err(err) => {
                warn!(owner_id, error = %err, "retrieval degraded; answering without context");
                RetrievalOutcome::Unavailable
            }
        }
    }

    async fn replace_with_retry(
        &self,
        owner_id: &str,
        document_id: &str,
        title: &str,
        chunks: Vec<crate::types::EmbeddedChunk>,
    ) -> Result<u64, RagError> {
        let model = self.provider.model_id().to_string();
        let mut last_conflict = None;
        for attempt in 0..MAX_REPLACE_ATTEMPTS {
            let expected = self.store.document_version(owner_id, document_id).await?;
            match self
                .store
                .replace_for_document(
                    owner_id,
                    document_id,
                    title,
                    &model,
                    chunks.clone(),
                    expected,
                )
                .await
            {
                Ok(version) => return Ok(version),
                Err(RagError::ConcurrentReplacement { document_id }) => {
                    debug!(owner_id, %document_id, attempt, "replace raced; retrying");
                    last_conflict = Some(RagError::ConcurrentReplacement { document_id });
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_conflict.unwrap_or_else(|| RagError::ConcurrentReplacement {
            document_id: document_id.to_string(),
        }))
    }

    fn record_usage(&self, owner_id: &str, embedding_tokens: u64, chat_tokens: u64) {
        if embedding_tokens == 0 && chat_tokens == 0 {
            return;
        }
        if let Some(recorder) = &self.recorder {
            recorder.record(UsageDelta {
                owner_id: owner_id.to_string(),
                day: Utc::now().date_naive(),
                embedding_tokens,
                chat_tokens,
            });
        }
    }
}

/// Builder for [`RagPipeline`]. Source, provider, and store are required;
/// everything else has defaults.
#[derive(Default)]
pub struct RagPipelineBuilder {
    source: Option<Arc<dyn DocumentSource>>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    store: Option<Arc<dyn VectorStore>>,
    recorder: Option<UsageRecorder>,
    chunker_config: Option<ChunkerConfig>,
    estimator: Option<Arc<dyn TokenEstimator>>,
    retrieval: Option<RetrievalConfig>,
}

impl RagPipelineBuilder {
    #[must_use]
    pub fn document_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn usage_recorder(mut self, recorder: UsageRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    #[must_use]
    pub fn chunker_config(mut self, config: ChunkerConfig) -> Self {
        self.chunker_config = Some(config);
        self
    }

    #[must_use]
    pub fn token_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    #[must_use]
    pub fn retrieval_config(mut self, config: RetrievalConfig) -> Self {
        self.retrieval = Some(config);
        self
    }

    pub fn build(self) -> Result<RagPipeline, RagError> {
        let source = self
            .source
            .ok_or_else(|| RagError::Configuration("document source is required".into()))?;
        let provider = self
            .provider
            .ok_or_else(|| RagError::Configuration("embedding provider is required".into()))?;
        let store = self
            .store
            .ok_or_else(|| RagError::Configuration("vector store is required".into()))?;

        let estimator = self
            .estimator
            .unwrap_or_else(|| Arc::new(CharHeuristicEstimator));
        let chunker = MarkdownChunker::new(self.chunker_config.unwrap_or_default())
            .with_estimator(estimator.clone());

        Ok(RagPipeline {
            source,
            provider,
            store,
            recorder: self.recorder,
            chunker,
            assembler: ContextAssembler::new(estimator.clone()),
            estimator,
            retrieval: self.retrieval.unwrap_or_default(),
        })
    }
}
