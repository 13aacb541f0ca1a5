//! SQLite-backed [`VectorStore`] using the `sqlite-vec` extension.
//!
//! Layout: a plain `chunks` table carries the text and provenance columns,
//! and a `vec0` virtual table `chunk_embeddings` carries the vectors, joined
//! by rowid. The virtual table is created lazily on the first insert because
//! `vec0` needs the vector dimension up front; one database therefore serves
//! one embedding dimension, which the per-owner model pinning already implies.
//!
//! Compare-and-swap versions live in `document_versions` and usage counters
//! in `usage_records`, so a single file holds the whole retrieval state.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use tokio_rusqlite::{Connection, ffi};
use uuid::Uuid;

use super::VectorStore;
use crate::types::{EmbeddedChunk, RagError, ScoredChunk, UsageRecord, VectorRecord};
use crate::usage::UsageLedger;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL,
    document_id TEXT NOT NULL,
    title       TEXT NOT NULL,
    content     TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    heading     TEXT,
    model       TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_owner_document
    ON chunks(owner_id, document_id);
CREATE TABLE IF NOT EXISTS document_versions (
    owner_id    TEXT NOT NULL,
    document_id TEXT NOT NULL,
    version     INTEGER NOT NULL,
    PRIMARY KEY (owner_id, document_id)
);
CREATE TABLE IF NOT EXISTS owner_models (
    owner_id  TEXT PRIMARY KEY,
    model     TEXT NOT NULL,
    dimension INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS usage_records (
    owner_id         TEXT NOT NULL,
    day              TEXT NOT NULL,
    embedding_tokens INTEGER NOT NULL,
    chat_tokens      INTEGER NOT NULL,
    PRIMARY KEY (owner_id, day)
);
";

/// Durable vector store and usage ledger over one SQLite file.
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Connection,
}

/// Domain verdict carried out of a `conn.call` closure, since rusqlite's
/// error type cannot express replace conflicts or pinning violations.
enum ReplaceVerdict {
    Done(u64),
    Conflict,
    ModelMismatch { stored: String },
    DimensionMismatch { stored: usize, actual: usize },
}

struct PendingRow {
    id: String,
    content: String,
    index: i64,
    heading: Option<String>,
    embedding_json: String,
}

impl SqliteVectorStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RagError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        Self::initialize(conn).await
    }

    /// Private in-memory database, mainly for tests.
    pub async fn open_in_memory() -> Result<Self, RagError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self, RagError> {
        conn.call(|conn| {
            conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

    fn register_sqlite_vec() -> Result<(), RagError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(RagError::Storage)
    }
}

fn embedding_table_exists(conn: &rusqlite::Connection) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'chunk_embeddings'",
        [],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn current_version(
    conn: &rusqlite::Connection,
    owner_id: &str,
    document_id: &str,
) -> Result<u64, rusqlite::Error> {
    conn.query_row(
        "SELECT version FROM document_versions WHERE owner_id = ? AND document_id = ?",
        [owner_id, document_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|version| version.unwrap_or(0) as u64)
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn document_version(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<u64, RagError> {
        let owner_id = owner_id.to_string();
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                current_version(conn, &owner_id, &document_id)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    async fn replace_for_document(
        &self,
        owner_id: &str,
        document_id: &str,
        title: &str,
        model: &str,
        chunks: Vec<EmbeddedChunk>,
        expected_version: u64,
    ) -> Result<u64, RagError> {
        // Uniform-dimension check needs no database state.
        let dimension = chunks.first().map(|c| c.embedding.len());
        if let Some(dimension) = dimension {
            if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dimension) {
                return Err(RagError::DimensionMismatch {
                    stored: dimension,
                    actual: bad.embedding.len(),
                });
            }
        }

        let mut rows = Vec::with_capacity(chunks.len());
        for embedded in chunks {
            let embedding_json = serde_json::to_string(&embedded.embedding)
                .map_err(|err| RagError::Storage(err.to_string()))?;
            rows.push(PendingRow {
                id: embedded.chunk.id.to_string(),
                content: embedded.chunk.content,
                index: embedded.chunk.index as i64,
                heading: embedded.chunk.heading,
                embedding_json,
            });
        }

        let owner = owner_id.to_string();
        let document = document_id.to_string();
        let title = title.to_string();
        let requested_model = model.to_string();
        let created_at = Utc::now().to_rfc3339();

        let verdict = self
            .conn
            .call(move |conn| {
                let tx = conn
                    .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

                let current = current_version(&tx, &owner, &document)?;
                if current != expected_version {
                    return Ok(ReplaceVerdict::Conflict);
                }

                if let Some(dimension) = dimension {
                    let pinned = tx
                        .query_row(
                            "SELECT model, dimension FROM owner_models WHERE owner_id = ?",
                            [&owner],
                            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                        )
                        .optional()?;
                    match pinned {
                        Some((pinned_model, _)) if pinned_model != requested_model => {
                            return Ok(ReplaceVerdict::ModelMismatch {
                                stored: pinned_model,
                            });
                        }
                        Some((_, pinned_dim)) if pinned_dim as usize != dimension => {
                            return Ok(ReplaceVerdict::DimensionMismatch {
                                stored: pinned_dim as usize,
                                actual: dimension,
                            });
                        }
                        Some(_) => {}
                        None => {
                            tx.execute(
                                "INSERT INTO owner_models (owner_id, model, dimension) \
                                 VALUES (?, ?, ?)",
                                rusqlite::params![owner, requested_model, dimension as i64],
                            )?;
                        }
                    }
                    // vec0 needs the dimension at creation time.
                    tx.execute_batch(&format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS chunk_embeddings \
                         USING vec0(embedding float[{dimension}])"
                    ))?;
                }

                if embedding_table_exists(&tx)? {
                    tx.execute(
                        "DELETE FROM chunk_embeddings WHERE rowid IN \
                         (SELECT rowid FROM chunks WHERE owner_id = ? AND document_id = ?)",
                        [&owner, &document],
                    )?;
                }
                tx.execute(
                    "DELETE FROM chunks WHERE owner_id = ? AND document_id = ?",
                    [&owner, &document],
                )?;

                for row in &rows {
                    tx.execute(
                        "INSERT INTO chunks \
                         (id, owner_id, document_id, title, content, chunk_index, heading, \
                          model, created_at) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        rusqlite::params![
                            row.id,
                            owner,
                            document,
                            title,
                            row.content,
                            row.index,
                            row.heading,
                            requested_model,
                            created_at,
                        ],
                    )?;
                    let rowid = tx.last_insert_rowid();
                    tx.execute(
                        "INSERT INTO chunk_embeddings (rowid, embedding) \
                         VALUES (?, vec_f32(?))",
                        rusqlite::params![rowid, row.embedding_json],
                    )?;
                }

                let next = (current + 1) as i64;
                tx.execute(
                    "INSERT INTO document_versions (owner_id, document_id, version) \
                     VALUES (?, ?, ?) \
                     ON CONFLICT(owner_id, document_id) \
                     DO UPDATE SET version = excluded.version",
                    rusqlite::params![owner, document, next],
                )?;

                tx.commit()?;
                Ok(ReplaceVerdict::Done(next as u64))
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))?;

        match verdict {
            ReplaceVerdict::Done(version) => Ok(version),
            ReplaceVerdict::Conflict => Err(RagError::ConcurrentReplacement {
                document_id: document_id.to_string(),
            }),
            ReplaceVerdict::ModelMismatch { stored } => Err(RagError::ModelMismatch {
                stored,
                requested: model.to_string(),
            }),
            ReplaceVerdict::DimensionMismatch { stored, actual } => {
                Err(RagError::DimensionMismatch { stored, actual })
            }
        }
    }

    async fn top_neighbors(
        &self,
        owner_id: &str,
        query: &[f32],
        n: usize,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        let embedding_json = serde_json::to_string(query)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        let owner = owner_id.to_string();

        self.conn
            .call(move |conn| {
                if !embedding_table_exists(conn)? {
                    return Ok(Vec::new());
                }

                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT c.id, c.owner_id, c.document_id, c.title, c.content, \
                         c.chunk_index, c.heading, c.model, c.created_at, \
                         vec_to_json(e.embedding), \
                         vec_distance_cosine(e.embedding, vec_f32(?)) AS distance \
                         FROM chunks c \
                         JOIN chunk_embeddings e ON c.rowid = e.rowid \
                         WHERE c.owner_id = ? \
                         ORDER BY distance ASC \
                         LIMIT {n}"
                    ))?;

                let rows = stmt
                    .query_map([&embedding_json, &owner], |row| {
                        let created_at: String = row.get(8)?;
                        let embedding: String = row.get(9)?;
                        let distance: f32 = row.get(10)?;
                        Ok(ScoredChunk {
                            record: VectorRecord {
                                id: Uuid::parse_str(&row.get::<_, String>(0)?)
                                    .unwrap_or_default(),
                                owner_id: row.get(1)?,
                                source_document_id: row.get(2)?,
                                title: row.get(3)?,
                                content: row.get(4)?,
                                index: row.get::<_, i64>(5)? as usize,
                                heading: row.get(6)?,
                                model: row.get(7)?,
                                embedding: serde_json::from_str(&embedding)
                                    .unwrap_or_default(),
                                created_at: DateTime::parse_from_rfc3339(&created_at)
                                    .map(|dt| dt.with_timezone(&Utc))
                                    .unwrap_or_else(|_| Utc::now()),
                            },
                            similarity: 1.0 - distance,
                        })
                    })?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    async fn count_for_document(
        &self,
        owner_id: &str,
        document_id: &str,
    ) -> Result<usize, RagError> {
        let owner = owner_id.to_string();
        let document = document_id.to_string();
        self.conn
            .call(move |conn| {
                let count: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM chunks WHERE owner_id = ? AND document_id = ?",
                        [&owner, &document],
                        |row| row.get(0),
                    )?;
                Ok(count as usize)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }
}

#[async_trait]
impl UsageLedger for SqliteVectorStore {
    async fn record(
        &self,
        owner_id: &str,
        day: NaiveDate,
        embedding_tokens: u64,
        chat_tokens: u64,
    ) -> Result<(), RagError> {
        let owner = owner_id.to_string();
        let day = day.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO usage_records (owner_id, day, embedding_tokens, chat_tokens) \
                     VALUES (?, ?, ?, ?) \
                     ON CONFLICT(owner_id, day) DO UPDATE SET \
                     embedding_tokens = embedding_tokens + excluded.embedding_tokens, \
                     chat_tokens = chat_tokens + excluded.chat_tokens",
                    rusqlite::params![owner, day, embedding_tokens as i64, chat_tokens as i64],
                )?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    async fn usage_for(
        &self,
        owner_id: &str,
        day: NaiveDate,
    ) -> Result<Option<UsageRecord>, RagError> {
        let owner = owner_id.to_string();
        let day_key = day.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT embedding_tokens, chat_tokens FROM usage_records \
                     WHERE owner_id = ? AND day = ?",
                    [&owner, &day_key],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
            .map(|counters| {
                counters.map(|(embedding_tokens, chat_tokens)| UsageRecord {
                    owner_id: owner_id.to_string(),
                    day,
                    embedding_tokens: embedding_tokens as u64,
                    chat_tokens: chat_tokens as u64,
                })
            })
    }
}
