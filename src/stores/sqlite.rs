//! SQLite vector store backed by the `sqlite-vec` extension.
//!
//! Layout: a `posts` table with the denormalized post records, a `chunks`
//! table keyed by id with a unique `fingerprint` index, and a
//! `chunk_embeddings` table holding `vec_f32` blobs joined by chunk id.
//! Similarity queries use `vec_distance_cosine` directly in SQL.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{Connection, OptionalExtension, ffi};

use super::VectorStore;
use crate::types::{ChunkRecord, PipelineError, Post};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS posts (
    gallery_id   TEXT NOT NULL,
    post_id      TEXT NOT NULL,
    title        TEXT NOT NULL,
    body         TEXT NOT NULL,
    author       TEXT NOT NULL,
    published_at TEXT NOT NULL,
    view_count   INTEGER NOT NULL DEFAULT 0,
    upvote_count INTEGER NOT NULL DEFAULT 0,
    source_url   TEXT NOT NULL UNIQUE,
    comments     TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (gallery_id, post_id)
);
CREATE TABLE IF NOT EXISTS chunks (
    id          TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL UNIQUE,
    gallery_id  TEXT NOT NULL,
    post_id     TEXT NOT NULL,
    field_path  TEXT NOT NULL,
    content     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_gallery ON chunks (gallery_id);
CREATE TABLE IF NOT EXISTS chunk_embeddings (
    id        TEXT PRIMARY KEY,
    embedding BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS crawl_log (
    gallery_id      TEXT PRIMARY KEY,
    last_crawled_at TEXT NOT NULL
);
";

#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    /// Opens (or creates) the store at `path` and applies the schema.
    /// `:memory:` is accepted for throwaway stores.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;

        conn.call(|conn| {
            // Fail fast if the vec extension did not load.
            conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Error)?;
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Error)?;
            Ok::<_, tokio_rusqlite::Error>(())
        })
        .await
        .map_err(|err| PipelineError::Storage(err.to_string()))?;

        Ok(Self { conn })
    }

    fn register_sqlite_vec() -> Result<(), PipelineError> {
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
                    Err(format!("failed to register sqlite-vec extension (code {rc})"))
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
            .map_err(PipelineError::Storage)
    }
}

fn row_to_post(
    gallery_id: String,
    post_id: String,
    title: String,
    body: String,
    author: String,
    published_at: String,
    view_count: i64,
    upvote_count: i64,
    source_url: String,
    comments_json: String,
) -> Post {
    Post {
        id: post_id,
        gallery_id,
        title,
        body,
        author,
        published_at,
        view_count: view_count.max(0) as u64,
        upvote_count: upvote_count.max(0) as u64,
        source_url,
        comments: serde_json::from_str(&comments_json).unwrap_or_default(),
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<usize, PipelineError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(|err| tokio_rusqlite::Error::Error(err.into()))?;

                let mut added = 0usize;
                for chunk in &chunks {
                    let Some(embedding) = chunk.embedding.as_ref() else {
                        continue;
                    };
                    let inserted = tx
                        .execute(
                            "INSERT OR IGNORE INTO chunks \
                             (id, fingerprint, gallery_id, post_id, field_path, content) \
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                            (
                                &chunk.id,
                                &chunk.fingerprint,
                                &chunk.gallery_id,
                                &chunk.post_id,
                                &chunk.field_path,
                                &chunk.content,
                            ),
                        )
                        .map_err(|err| tokio_rusqlite::Error::Error(err.into()))?;

                    // An existing fingerprint means the row (and its
                    // embedding) stays exactly as first written.
                    if inserted == 1 {
                        let embedding_json = serde_json::to_string(embedding)
                            .map_err(|err| tokio_rusqlite::Error::Error(err.into()))?;
                        tx.execute(
                            "INSERT OR IGNORE INTO chunk_embeddings (id, embedding) \
                             VALUES (?1, vec_f32(?2))",
                            (&chunk.id, &embedding_json),
                        )
                        .map_err(|err| tokio_rusqlite::Error::Error(err.into()))?;
                        added += 1;
                    }
                }

                tx.commit()
                    .map_err(|err| tokio_rusqlite::Error::Error(err.into()))?;
                Ok::<_, tokio_rusqlite::Error<Box<dyn std::error::Error + Send + Sync>>>(added)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn upsert_post(&self, post: &Post) -> Result<(), PipelineError> {
        let post = post.clone();
        self.conn
            .call(move |conn| {
                let comments_json = serde_json::to_string(&post.comments)
                    .map_err(|err| tokio_rusqlite::Error::Error(err.into()))?;
                conn.execute(
                    "INSERT OR IGNORE INTO posts \
                     (gallery_id, post_id, title, body, author, published_at, \
                      view_count, upvote_count, source_url, comments) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    (
                        &post.gallery_id,
                        &post.id,
                        &post.title,
                        &post.body,
                        &post.author,
                        &post.published_at,
                        post.view_count as i64,
                        post.upvote_count as i64,
                        &post.source_url,
                        &comments_json,
                    ),
                )
                .map_err(|err| tokio_rusqlite::Error::Error(err.into()))?;
                Ok::<_, tokio_rusqlite::Error<Box<dyn std::error::Error + Send + Sync>>>(())
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn has_post(&self, source_url: &str) -> Result<bool, PipelineError> {
        let source_url = source_url.to_string();
        self.conn
            .call(move |conn| {
                let found: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM posts WHERE source_url = ?1",
                        (&source_url,),
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Error)?;
                Ok::<_, tokio_rusqlite::Error>(found.is_some())
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn post_by_key(
        &self,
        gallery_id: &str,
        post_id: &str,
    ) -> Result<Option<Post>, PipelineError> {
        let gallery_id = gallery_id.to_string();
        let post_id = post_id.to_string();
        self.conn
            .call(move |conn| {
                let post = conn
                    .query_row(
                        "SELECT gallery_id, post_id, title, body, author, published_at, \
                         view_count, upvote_count, source_url, comments \
                         FROM posts WHERE gallery_id = ?1 AND post_id = ?2",
                        (&gallery_id, &post_id),
                        |row| {
                            Ok(row_to_post(
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                                row.get(5)?,
                                row.get(6)?,
                                row.get(7)?,
                                row.get(8)?,
                                row.get(9)?,
                            ))
                        },
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Error)?;
                Ok::<_, tokio_rusqlite::Error>(post)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn search_similar(
        &self,
        query_embedding: &[f32],
        limit: usize,
        gallery_id: Option<&str>,
    ) -> Result<Vec<(ChunkRecord, f32)>, PipelineError> {
        let embedding_json = serde_json::to_string(query_embedding)
            .map_err(|err| PipelineError::Storage(err.to_string()))?;
        let gallery_id = gallery_id.map(str::to_string);

        self.conn
            .call(move |conn| {
                let mut results = Vec::new();

                let sql = match &gallery_id {
                    Some(_) => format!(
                        "SELECT c.id, c.fingerprint, c.gallery_id, c.post_id, c.field_path, c.content, \
                         vec_distance_cosine(e.embedding, vec_f32(?1)) AS distance \
                         FROM chunks c JOIN chunk_embeddings e ON c.id = e.id \
                         WHERE c.gallery_id = ?2 \
                         ORDER BY distance ASC LIMIT {limit}"
                    ),
                    None => format!(
                        "SELECT c.id, c.fingerprint, c.gallery_id, c.post_id, c.field_path, c.content, \
                         vec_distance_cosine(e.embedding, vec_f32(?1)) AS distance \
                         FROM chunks c JOIN chunk_embeddings e ON c.id = e.id \
                         ORDER BY distance ASC LIMIT {limit}"
                    ),
                };

                let mut stmt = stmt_or_err(conn.prepare(&sql))?;

                let map_row = |row: &tokio_rusqlite::rusqlite::Row<'_>| {
                    let chunk = ChunkRecord {
                        id: row.get(0)?,
                        fingerprint: row.get(1)?,
                        gallery_id: row.get(2)?,
                        post_id: row.get(3)?,
                        field_path: row.get(4)?,
                        content: row.get(5)?,
                        embedding: None,
                    };
                    let distance: f32 = row.get(6)?;
                    // Cosine distance to similarity.
                    Ok((chunk, 1.0 - distance))
                };

                let rows = match &gallery_id {
                    Some(gall) => stmt
                        .query_map((&embedding_json, gall), map_row)
                        .map_err(tokio_rusqlite::Error::Error)?
                        .collect::<Result<Vec<_>, _>>(),
                    None => stmt
                        .query_map((&embedding_json,), map_row)
                        .map_err(tokio_rusqlite::Error::Error)?
                        .collect::<Result<Vec<_>, _>>(),
                };

                results.extend(rows.map_err(tokio_rusqlite::Error::Error)?);
                Ok::<_, tokio_rusqlite::Error>(results)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn record_crawl(&self, gallery_id: &str) -> Result<(), PipelineError> {
        let gallery_id = gallery_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO crawl_log (gallery_id, last_crawled_at) VALUES (?1, ?2) \
                     ON CONFLICT(gallery_id) DO UPDATE SET last_crawled_at = excluded.last_crawled_at",
                    (&gallery_id, &now),
                )
                .map_err(tokio_rusqlite::Error::Error)?;
                Ok::<_, tokio_rusqlite::Error>(())
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn last_crawled(
        &self,
        gallery_id: &str,
    ) -> Result<Option<DateTime<Utc>>, PipelineError> {
        let gallery_id = gallery_id.to_string();
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT last_crawled_at FROM crawl_log WHERE gallery_id = ?1",
                    (&gallery_id,),
                    |row| row.get(0),
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Error)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;

        Ok(raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    async fn purge_gallery(&self, gallery_id: &str) -> Result<usize, PipelineError> {
        let gallery_id = gallery_id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Error)?;
                tx.execute(
                    "DELETE FROM chunk_embeddings WHERE id IN \
                     (SELECT id FROM chunks WHERE gallery_id = ?1)",
                    (&gallery_id,),
                )
                .map_err(tokio_rusqlite::Error::Error)?;
                let deleted = tx
                    .execute("DELETE FROM chunks WHERE gallery_id = ?1", (&gallery_id,))
                    .map_err(tokio_rusqlite::Error::Error)?;
                tx.execute("DELETE FROM posts WHERE gallery_id = ?1", (&gallery_id,))
                    .map_err(tokio_rusqlite::Error::Error)?;
                tx.execute("DELETE FROM crawl_log WHERE gallery_id = ?1", (&gallery_id,))
                    .map_err(tokio_rusqlite::Error::Error)?;
                tx.commit().map_err(tokio_rusqlite::Error::Error)?;
                Ok::<_, tokio_rusqlite::Error>(deleted)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn chunk_count(&self) -> Result<usize, PipelineError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Error)?;
                Ok::<_, tokio_rusqlite::Error>(count as usize)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn list_galleries(&self) -> Result<Vec<String>, PipelineError> {
        self.conn
            .call(|conn| {
                let mut stmt = stmt_or_err(
                    conn.prepare("SELECT DISTINCT gallery_id FROM chunks ORDER BY gallery_id"),
                )?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Error)?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(tokio_rusqlite::Error::Error)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }
}

fn stmt_or_err<T>(
    result: Result<T, tokio_rusqlite::rusqlite::Error>,
) -> Result<T, tokio_rusqlite::Error> {
    result.map_err(tokio_rusqlite::Error::Error)
}
