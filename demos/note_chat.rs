//! Index a few notes into a SQLite database and answer ad-hoc queries.
//!
//! Runs entirely offline with the deterministic mock embedder:
//!
//! ```sh
//! cargo run --example note_chat -- "grocery list"
//! ```
//!
//! Set `NOTE_CHAT_DB` to keep the database between runs.

use std::env;
use std::sync::Arc;

use tracing_subscriber::FmtSubscriber;

use async_trait::async_trait;
use ragweave::embeddings::MockEmbeddingProvider;
use ragweave::pipeline::{DocumentSource, RagPipeline, RetrievalOutcome};
use ragweave::stores::SqliteVectorStore;
use ragweave::types::{NoteDocument, RagError};
use ragweave::usage::UsageRecorder;

struct DemoNotes(Vec<NoteDocument>);

#[async_trait]
impl DocumentSource for DemoNotes {
    async fn fetch(
        &self,
        _owner_id: &str,
        document_id: &str,
    ) -> Result<Option<NoteDocument>, RagError> {
        Ok(self.0.iter().find(|note| note.id == document_id).cloned())
    }
}

fn demo_notes() -> Vec<NoteDocument> {
    vec![
        NoteDocument {
            id: "groceries".into(),
            title: "Groceries".into(),
            content: "# This week\nEggs, oat milk, basil, and rye bread.\n\
                      # Later\nLook for a good olive oil when the current bottle runs out.\n"
                .into(),
        },
        NoteDocument {
            id: "reading".into(),
            title: "Reading List".into(),
            content: "# Fiction\nFinish the sea trilogy before the library loan expires.\n\
                      # Technical\nThe database internals book, chapters on B-trees and LSM trees.\n"
                .into(),
        },
        NoteDocument {
            id: "trip".into(),
            title: "Trip Planning".into(),
            content: "Ferry tickets are cheaper on weekdays. Pack rain gear; the coast is wet \
                      in October. Book the harbor-side hostel early.\n"
                .into(),
        },
    ]
}

#[tokio::main]
async fn main() -> Result<(), RagError> {
    init_tracing();

    let query = env::args().skip(1).collect::<Vec<_>>().join(" ");
    let query = if query.is_empty() {
        "what should I buy".to_string()
    } else {
        query
    };

    let db_path = env::var("NOTE_CHAT_DB").unwrap_or_else(|_| "./note_chat.sqlite".to_string());
    let store = Arc::new(SqliteVectorStore::open(&db_path).await?);
    let recorder = UsageRecorder::spawn(store.clone());

    let notes = demo_notes();
    let ids: Vec<String> = notes.iter().map(|note| note.id.clone()).collect();
    let pipeline = RagPipeline::builder()
        .document_source(Arc::new(DemoNotes(notes)))
        .embedding_provider(Arc::new(MockEmbeddingProvider::new()))
        .vector_store(store)
        .usage_recorder(recorder.clone())
        .build()?;

    for id in &ids {
        let outcome = pipeline.process_document("demo-owner", id).await?;
        println!("indexed {id}: {outcome:?}");
    }

    match pipeline.retrieve_context_or_empty("demo-owner", &query).await {
        RetrievalOutcome::Context(found) => {
            println!("\n--- context for {query:?} ---\n{}", found.context);
            println!("--- sources ---");
            for citation in &found.citations {
                match &citation.heading {
                    Some(heading) => println!("  {} > {heading}", citation.title),
                    None => println!("  {}", citation.title),
                }
            }
        }
        RetrievalOutcome::NoMatches => println!("no relevant notes for {query:?}"),
        RetrievalOutcome::Unavailable => println!("retrieval unavailable; check the logs"),
    }

    recorder.flush().await;
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder().with_env_filter("info").finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
