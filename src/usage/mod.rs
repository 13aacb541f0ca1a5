//! Per-owner, per-day usage accounting.
//!
//! The [`UsageLedger`] is a pure accumulate-upsert: counters for an
//! `(owner, day)` pair are created lazily on first activity and only ever
//! incremented. The ledger has no idempotency key — de-duplicating logical
//! events is the caller's job. [`recorder::UsageRecorder`] feeds a ledger
//! from a background queue so the chat path never waits on accounting I/O.

pub mod recorder;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::types::{RagError, UsageRecord};

pub use recorder::{UsageDelta, UsageRecorder};

#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Add both deltas to the `(owner, day)` record, creating it if absent.
    async fn record(
        &self,
        owner_id: &str,
        day: NaiveDate,
        embedding_tokens: u64,
        chat_tokens: u64,
    ) -> Result<(), RagError>;

    /// Current counters for `(owner, day)`, if any activity was recorded.
    async fn usage_for(
        &self,
        owner_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageRecord>, RagError>;
}

/// Process-local ledger for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryUsageLedger {
    records: Mutex<HashMap<(String, NaiveDate), UsageRecord>>,
}

impl InMemoryUsageLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageLedger for InMemoryUsageLedger {
    async fn record(
        &self,
        owner_id: &str,
        day: NaiveDate,
        embedding_tokens: u64,
        chat_tokens: u64,
    ) -> Result<(), RagError> {
        let mut records = self.records.lock();
        let entry = records
            .entry((owner_id.to_string(), day))
            .or_insert_with(|| UsageRecord {
                owner_id: owner_id.to_string(),
                day,
                embedding_tokens: 0,
                chat_tokens: 0,
            });
        entry.embedding_tokens += embedding_tokens;
        entry.chat_tokens += chat_tokens;
        Ok(())
    }

    async fn usage_for(
        &self,
        owner_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageRecord>, RagError> {
        Ok(self
            .records
            .lock()
            .get(&(owner_id.to_string(), day))
            .cloned())
    }
}
