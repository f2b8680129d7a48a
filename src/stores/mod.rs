//! Persistence backends for posts and chunk embeddings.
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ VectorStore trait│
//!                  │   (async CRUD)   │
//!                  └────────┬─────────┘
//!                           │
//!                           ▼
//!                  ┌──────────────────┐
//!                  │     SQLite       │
//!                  │   sqlite-vec     │
//!                  └──────────────────┘
//! ```
//!
//! The trait separates the retrieval/indexing logic from any specific
//! database. Upserts are fingerprint-idempotent and transactional, so a
//! concurrent reader only ever observes fully committed batches.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{ChunkRecord, PipelineError, Post};

pub use sqlite::SqliteVectorStore;

/// Unified interface over chunk + post persistence.
///
/// There is deliberately no eviction or TTL surface here: index growth is
/// unbounded by design, and cleanup happens only through
/// [`purge_gallery`](VectorStore::purge_gallery).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts chunks that carry embeddings, skipping any fingerprint already
    /// present. Returns the number of genuinely new chunks. The whole batch
    /// commits atomically.
    async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<usize, PipelineError>;

    /// Stores the denormalized post record backing its chunks. Existing
    /// `(gallery_id, id)` / `source_url` rows are left untouched.
    async fn upsert_post(&self, post: &Post) -> Result<(), PipelineError>;

    /// Crawl dedup check by `source_url`.
    async fn has_post(&self, source_url: &str) -> Result<bool, PipelineError>;

    /// Resolves a stored post by its unique key.
    async fn post_by_key(
        &self,
        gallery_id: &str,
        post_id: &str,
    ) -> Result<Option<Post>, PipelineError>;

    /// Cosine-similarity search over all chunk embeddings (optionally scoped
    /// to one gallery), most similar first. Scores are raw similarities; the
    /// retrieval layer clamps and filters them.
    async fn search_similar(
        &self,
        query_embedding: &[f32],
        limit: usize,
        gallery_id: Option<&str>,
    ) -> Result<Vec<(ChunkRecord, f32)>, PipelineError>;

    /// Records a successful crawl of a gallery, for freshness-window checks.
    async fn record_crawl(&self, gallery_id: &str) -> Result<(), PipelineError>;

    /// When the gallery was last successfully crawled, if ever.
    async fn last_crawled(&self, gallery_id: &str)
    -> Result<Option<DateTime<Utc>>, PipelineError>;

    /// Removes every post, chunk, and embedding for one gallery. Returns the
    /// number of chunks deleted.
    async fn purge_gallery(&self, gallery_id: &str) -> Result<usize, PipelineError>;

    /// Total indexed chunks.
    async fn chunk_count(&self) -> Result<usize, PipelineError>;

    /// Distinct gallery ids present in the index.
    async fn list_galleries(&self) -> Result<Vec<String>, PipelineError>;
}
