//! Background usage recorder.
//!
//! Ingestion and retrieval paths hand their token deltas to a
//! [`UsageRecorder`] and move on; a spawned worker drains the queue into the
//! [`UsageLedger`](super::UsageLedger). A ledger write that fails is retried
//! once after a short backoff; if it fails again the delta is dropped and
//! logged at error level. Accounting never blocks or fails a user request.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use super::UsageLedger;

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// One increment destined for the ledger.
#[derive(Debug, Clone)]
pub struct UsageDelta {
    pub owner_id: String,
    pub day: NaiveDate,
    pub embedding_tokens: u64,
    pub chat_tokens: u64,
}

enum Envelope {
    Delta(UsageDelta),
    Flush(oneshot::Sender<()>),
}

/// Cheap-to-clone handle to the recording worker.
#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl UsageRecorder {
    /// Spawn the worker task on the current runtime.
    pub fn spawn(ledger: Arc<dyn UsageLedger>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(ledger, rx));
        Self { tx }
    }

    /// Enqueue a delta without waiting. Never blocks; if the worker is gone
    /// the delta is dropped and logged.
    pub fn record(&self, delta: UsageDelta) {
        if let Err(rejected) = self.tx.send(Envelope::Delta(delta)) {
            if let Envelope::Delta(delta) = rejected.0 {
                error!(
                    owner_id = %delta.owner_id,
                    day = %delta.day,
                    embedding_tokens = delta.embedding_tokens,
                    chat_tokens = delta.chat_tokens,
                    "usage recorder is closed; delta dropped"
                );
            }
        }
    }

    /// Wait until every delta enqueued before this call has been written
    /// (or given up on). Mainly for tests and graceful shutdown.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run_worker(ledger: Arc<dyn UsageLedger>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Delta(delta) => write_with_retry(ledger.as_ref(), delta).await,
            Envelope::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

async fn write_with_retry(ledger: &dyn UsageLedger, delta: UsageDelta) {
    let first = ledger
        .record(
            &delta.owner_id,
            delta.day,
            delta.embedding_tokens,
            delta.chat_tokens,
        )
        .await;

    if let Err(first) = first {
        warn!(
            owner_id = %delta.owner_id,
            day = %delta.day,
            error = %first,
            "usage write failed; retrying once"
        );
        tokio::time::sleep(RETRY_DELAY).await;
        if let Err(second) = ledger
            .record(
                &delta.owner_id,
                delta.day,
                delta.embedding_tokens,
                delta.chat_tokens,
            )
            .await
        {
            error!(
                owner_id = %delta.owner_id,
                day = %delta.day,
                embedding_tokens = delta.embedding_tokens,
                chat_tokens = delta.chat_tokens,
                error = %second,
                "usage delta lost after retry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::types::{RagError, UsageRecord};
    use crate::usage::InMemoryUsageLedger;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn delta(embedding: u64, chat: u64) -> UsageDelta {
        UsageDelta {
            owner_id: "owner".into(),
            day: day(),
            embedding_tokens: embedding,
            chat_tokens: chat,
        }
    }

    /// Fails the first `failures` record calls, then delegates.
    struct FlakyLedger {
        inner: InMemoryUsageLedger,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl UsageLedger for FlakyLedger {
        async fn record(
            &self,
            owner_id: &str,
            day: NaiveDate,
            embedding_tokens: u64,
            chat_tokens: u64,
        ) -> Result<(), RagError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RagError::Storage("ledger offline".into()));
            }
            self.inner
                .record(owner_id, day, embedding_tokens, chat_tokens)
                .await
        }

        async fn usage_for(
            &self,
            owner_id: &str,
            day: NaiveDate,
        ) -> Result<Option<UsageRecord>, RagError> {
            self.inner.usage_for(owner_id, day).await
        }
    }

    #[tokio::test]
    async fn enqueued_deltas_reach_the_ledger() {
        let ledger = Arc::new(InMemoryUsageLedger::new());
        let recorder = UsageRecorder::spawn(ledger.clone());

        recorder.record(delta(120, 0));
        recorder.record(delta(0, 40));
        recorder.flush().await;

        let record = ledger.usage_for("owner", day()).await.unwrap().unwrap();
        assert_eq!(record.embedding_tokens, 120);
        assert_eq!(record.chat_tokens, 40);
    }

    #[tokio::test]
    async fn one_transient_failure_is_retried() {
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryUsageLedger::new(),
            failures: AtomicUsize::new(1),
        });
        let recorder = UsageRecorder::spawn(ledger.clone());

        recorder.record(delta(33, 7));
        recorder.flush().await;

        let record = ledger.usage_for("owner", day()).await.unwrap().unwrap();
        assert_eq!(record.embedding_tokens, 33);
        assert_eq!(record.chat_tokens, 7);
    }

    #[tokio::test]
    async fn persistent_failure_drops_the_delta_and_keeps_going() {
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryUsageLedger::new(),
            failures: AtomicUsize::new(2),
        });
        let recorder = UsageRecorder::spawn(ledger.clone());

        recorder.record(delta(99, 0));
        recorder.record(delta(11, 0));
        recorder.flush().await;

        // First delta burned both failures and was dropped; second landed.
        let record = ledger.usage_for("owner", day()).await.unwrap().unwrap();
        assert_eq!(record.embedding_tokens, 11);
    }

    #[tokio::test]
    async fn flush_on_an_idle_recorder_resolves_immediately() {
        let ledger = Arc::new(InMemoryUsageLedger::new());
        let recorder = UsageRecorder::spawn(ledger);
        recorder.flush().await;
    }
}
