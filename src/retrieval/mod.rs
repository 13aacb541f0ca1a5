//! Query-time ranking and prompt-context assembly.
//!
//! Both halves are pure computation: [`mmr`] re-ranks scored neighbors for
//! diversity (Maximal Marginal Relevance) and [`context`] folds the ranked
//! chunks into a token-budgeted context block with parallel citations.

pub mod context;
pub mod mmr;

pub use context::{AssembledContext, ContextAssembler, DEFAULT_CONTEXT_BUDGET};
pub use mmr::{DEFAULT_MMR_LAMBDA, cosine_similarity, select_diverse};
