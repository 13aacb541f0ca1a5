//! Token-budgeted context assembly with provenance.

use std::sync::Arc;

use crate::chunking::{CharHeuristicEstimator, TokenEstimator};
use crate::types::{Citation, ScoredChunk};

/// Default token budget for an assembled context block.
pub const DEFAULT_CONTEXT_BUDGET: usize = 3000;

/// Flat allowance for each chunk's separator/header line.
const SEPARATOR_ALLOWANCE: usize = 20;

/// A prompt-ready context string plus the provenance of everything in it.
///
/// `citations[i]` corresponds to the i-th chunk whose text appears in
/// `context`; there is never a citation without included text or vice versa.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub context: String,
    pub citations: Vec<Citation>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }
}

/// Folds ranked chunks into a bounded context block.
#[derive(Clone)]
pub struct ContextAssembler {
    estimator: Arc<dyn TokenEstimator>,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            estimator: Arc::new(CharHeuristicEstimator),
        }
    }
}

impl ContextAssembler {
    pub fn new(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { estimator }
    }

    /// Include ranked chunks in order until the next one would overflow
    /// `max_tokens`, then stop.
    ///
    /// The incoming order is assumed to already reflect descending priority,
    /// so later (lower-priority) chunks are never inspected once one is
    /// rejected. The estimated cost of the result never exceeds `max_tokens`.
    pub fn build(&self, ranked: &[ScoredChunk], max_tokens: usize) -> AssembledContext {
        let mut context = String::new();
        let mut citations = Vec::new();
        let mut spent = 0usize;

        for chunk in ranked {
            let record = &chunk.record;
            let cost = self.estimator.estimate(&record.content) + SEPARATOR_ALLOWANCE;
            if spent + cost > max_tokens {
                break;
            }
            spent += cost;

            match &record.heading {
                Some(heading) => {
                    context.push_str(&format!("[Source: {} > {heading}]\n", record.title));
                }
                None => context.push_str(&format!("[Source: {}]\n", record.title)),
            }
            context.push_str(&record.content);
            if !record.content.ends_with('\n') {
                context.push('\n');
            }
            context.push('\n');

            citations.push(Citation {
                title: record.title.clone(),
                heading: record.heading.clone(),
            });
        }

        AssembledContext { context, citations }
    }
}
