//! Durable-store tests against a real SQLite file with sqlite-vec loaded.

use chrono::NaiveDate;
use tempfile::TempDir;

use ragweave::stores::{SqliteVectorStore, VectorStore};
use ragweave::types::{EmbeddedChunk, RagError, TextChunk};
use ragweave::usage::UsageLedger;

async fn open_store() -> (TempDir, SqliteVectorStore) {
    let dir = TempDir::new().expect("temp dir");
    let store = SqliteVectorStore::open(dir.path().join("vectors.db"))
        .await
        .expect("open store");
    (dir, store)
}

fn embedded(doc: &str, content: &str, index: usize, embedding: Vec<f32>) -> EmbeddedChunk {
    EmbeddedChunk {
        chunk: TextChunk::new(doc, content, index, Some("Section".into())),
        embedding,
    }
}

#[tokio::test]
async fn round_trip_preserves_record_fields_and_ranking() {
    let (_dir, store) = open_store().await;
    store
        .replace_for_document(
            "owner",
            "doc",
            "A Note",
            "mock-model",
            vec![
                embedded("doc", "nearby content body", 0, vec![1.0, 0.0, 0.0, 0.0]),
                embedded("doc", "orthogonal content body", 1, vec![0.0, 1.0, 0.0, 0.0]),
            ],
            0,
        )
        .await
        .unwrap();

    let hits = store
        .top_neighbors("owner", &[1.0, 0.0, 0.0, 0.0], 5)
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    let best = &hits[0];
    assert_eq!(best.record.content, "nearby content body");
    assert_eq!(best.record.owner_id, "owner");
    assert_eq!(best.record.source_document_id, "doc");
    assert_eq!(best.record.title, "A Note");
    assert_eq!(best.record.heading.as_deref(), Some("Section"));
    assert_eq!(best.record.model, "mock-model");
    assert_eq!(best.record.index, 0);
    assert_eq!(best.record.embedding, vec![1.0, 0.0, 0.0, 0.0]);
    assert!((best.similarity - 1.0).abs() < 1e-5);
    assert!(best.similarity > hits[1].similarity);
}

#[tokio::test]
async fn neighbors_are_scoped_to_the_owner() {
    let (_dir, store) = open_store().await;
    store
        .replace_for_document(
            "owner-a",
            "doc",
            "A",
            "mock-model",
            vec![embedded("doc", "alpha body text", 0, vec![1.0, 0.0, 0.0, 0.0])],
            0,
        )
        .await
        .unwrap();
    store
        .replace_for_document(
            "owner-b",
            "doc",
            "B",
            "mock-model",
            vec![embedded("doc", "beta body text", 0, vec![1.0, 0.0, 0.0, 0.0])],
            0,
        )
        .await
        .unwrap();

    let hits = store
        .top_neighbors("owner-a", &[1.0, 0.0, 0.0, 0.0], 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits.iter().all(|hit| hit.record.owner_id == "owner-a"));

    let nobody = store
        .top_neighbors("owner-c", &[1.0, 0.0, 0.0, 0.0], 10)
        .await
        .unwrap();
    assert!(nobody.is_empty());
}

#[tokio::test]
async fn stale_replace_is_rejected_and_leaves_data_intact() {
    let (_dir, store) = open_store().await;
    store
        .replace_for_document(
            "owner",
            "doc",
            "Note",
            "mock-model",
            vec![embedded("doc", "original body text", 0, vec![1.0, 0.0, 0.0, 0.0])],
            0,
        )
        .await
        .unwrap();

    let err = store
        .replace_for_document(
            "owner",
            "doc",
            "Note",
            "mock-model",
            vec![embedded("doc", "late writer body", 0, vec![0.0, 1.0, 0.0, 0.0])],
            0,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::ConcurrentReplacement { .. }));
    assert_eq!(store.document_version("owner", "doc").await.unwrap(), 1);
    let hits = store
        .top_neighbors("owner", &[1.0, 0.0, 0.0, 0.0], 1)
        .await
        .unwrap();
    assert_eq!(hits[0].record.content, "original body text");
}

#[tokio::test]
async fn reprocessing_replaces_rather_than_appends() {
    let (_dir, store) = open_store().await;
    let v1 = store
        .replace_for_document(
            "owner",
            "doc",
            "Note",
            "mock-model",
            vec![
                embedded("doc", "first revision a", 0, vec![1.0, 0.0, 0.0, 0.0]),
                embedded("doc", "first revision b", 1, vec![0.0, 1.0, 0.0, 0.0]),
            ],
            0,
        )
        .await
        .unwrap();

    let v2 = store
        .replace_for_document(
            "owner",
            "doc",
            "Note",
            "mock-model",
            vec![embedded("doc", "second revision only", 0, vec![0.0, 0.0, 1.0, 0.0])],
            v1,
        )
        .await
        .unwrap();

    assert_eq!((v1, v2), (1, 2));
    assert_eq!(store.count_for_document("owner", "doc").await.unwrap(), 1);
    let hits = store
        .top_neighbors("owner", &[0.0, 0.0, 1.0, 0.0], 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.content, "second revision only");
}

#[tokio::test]
async fn empty_replace_clears_and_bumps_the_version() {
    let (_dir, store) = open_store().await;
    let v1 = store
        .replace_for_document(
            "owner",
            "doc",
            "Note",
            "mock-model",
            vec![embedded("doc", "body to clear", 0, vec![1.0, 0.0, 0.0, 0.0])],
            0,
        )
        .await
        .unwrap();

    store
        .replace_for_document("owner", "doc", "Note", "mock-model", Vec::new(), v1)
        .await
        .unwrap();

    assert_eq!(store.count_for_document("owner", "doc").await.unwrap(), 0);
    assert_eq!(store.document_version("owner", "doc").await.unwrap(), 2);
    assert!(
        store
            .top_neighbors("owner", &[1.0, 0.0, 0.0, 0.0], 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn owner_model_is_pinned_across_documents() {
    let (_dir, store) = open_store().await;
    store
        .replace_for_document(
            "owner",
            "doc-1",
            "Note",
            "model-a",
            vec![embedded("doc-1", "pinning body text", 0, vec![1.0, 0.0, 0.0, 0.0])],
            0,
        )
        .await
        .unwrap();

    let err = store
        .replace_for_document(
            "owner",
            "doc-2",
            "Other",
            "model-b",
            vec![embedded("doc-2", "other body text", 0, vec![1.0, 0.0, 0.0, 0.0])],
            0,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::ModelMismatch { .. }));
    assert_eq!(store.count_for_document("owner", "doc-2").await.unwrap(), 0);
}

#[tokio::test]
async fn query_before_any_insert_returns_empty() {
    let (_dir, store) = open_store().await;
    let hits = store
        .top_neighbors("owner", &[1.0, 0.0, 0.0, 0.0], 5)
        .await
        .unwrap();
    assert!(hits.is_empty());
    assert_eq!(store.document_version("owner", "doc").await.unwrap(), 0);
}

#[tokio::test]
async fn usage_counters_accumulate_in_the_same_database() {
    let (_dir, store) = open_store().await;
    let day = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();

    assert!(store.usage_for("owner", day).await.unwrap().is_none());
    store.record("owner", day, 150, 0).await.unwrap();
    store.record("owner", day, 50, 30).await.unwrap();

    let usage = store.usage_for("owner", day).await.unwrap().unwrap();
    assert_eq!(usage.embedding_tokens, 200);
    assert_eq!(usage.chat_tokens, 30);

    let other_day = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
    assert!(store.usage_for("owner", other_day).await.unwrap().is_none());
}
