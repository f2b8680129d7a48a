//! Core data model and error taxonomy shared across the pipeline.
//!
//! Everything that crosses a component boundary lives here: the canonical
//! [`Post`]/[`Comment`] records produced by the crawler, the stored-chunk
//! representation used by the vector store, the per-query [`RetrievedHit`],
//! and the [`PipelineError`] enum that encodes the propagation policy
//! (per-item failures are absorbed and counted, store unavailability is
//! fatal to the request).

use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persona::Persona;

/// A community forum board discovered for (or named by) a request.
///
/// Request-scoped: never persisted beyond the request that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Minor boards use a different URL path on the source site.
    #[serde(default)]
    pub minor: bool,
}

impl GalleryRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            minor: false,
        }
    }

    #[must_use]
    pub fn minor_board(mut self, minor: bool) -> Self {
        self.minor = minor;
        self
    }
}

/// A normalized forum post with its comment tree.
///
/// `(gallery_id, id)` is unique; `source_url` is the dedup key across crawls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub gallery_id: String,
    pub title: String,
    pub body: String,
    pub author: String,
    /// Raw site-formatted timestamp (for example `2025-06-01 12:34:56`).
    pub published_at: String,
    pub view_count: u64,
    pub upvote_count: u64,
    pub source_url: String,
    pub comments: Vec<Comment>,
}

impl Post {
    /// Best-effort epoch seconds for recency tie-breaking.
    ///
    /// The source site emits a handful of timestamp shapes; anything
    /// unparseable sorts oldest.
    pub fn published_ts(&self) -> i64 {
        parse_site_timestamp(&self.published_at).unwrap_or(0)
    }
}

/// Parses the timestamp formats observed on gallery pages.
pub(crate) fn parse_site_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y.%m.%d %H:%M:%S", "%Y.%m.%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y.%m.%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
        }
    }
    None
}

/// One comment in a post's tree.
///
/// Sibling order is crawl order (site display order), not timestamp order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub text: String,
    pub published_at: String,
    #[serde(default)]
    pub replies: Vec<Comment>,
}

/// A bounded slice of post/comment text as persisted in the vector store.
///
/// `fingerprint` (content hash) is the idempotency key: indexing identical
/// text twice never creates a second row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub fingerprint: String,
    pub gallery_id: String,
    pub post_id: String,
    /// Which field of the post the text came from (`body` or `comment/<id>`).
    pub field_path: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

/// A chunk that cleared similarity search, resolved back to its full post.
#[derive(Clone, Debug)]
pub struct RetrievedHit {
    pub chunk: ChunkRecord,
    /// Cosine similarity clamped to `[0, 1]`.
    pub score: f32,
    pub post: Post,
}

/// Outcome of a crawl operation, successful or partially successful.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlOutcome {
    pub posts_indexed: usize,
    pub message: String,
}

/// Final shape of one smart-search invocation. Immutable after return.
#[derive(Clone, Debug)]
pub struct SmartSearchResult {
    pub query: String,
    /// Descending relevance; scores are non-increasing.
    pub hits: Vec<RetrievedHit>,
    /// The only field permitted to be absent in a successful result.
    pub synthesized_answer: Option<String>,
    pub persona: Persona,
    pub query_time_ms: u64,
    pub discovered_galleries: Vec<String>,
    pub posts_crawled: usize,
}

/// Error taxonomy for the whole pipeline.
///
/// Variant choice encodes the handling policy: `DiscoveryUnavailable`,
/// `EmbeddingFailed`, and `GenerationFailed` degrade the stage that raised
/// them; `CrawlUnreachable` is reported per gallery; `CrawlAlreadyRunning`
/// rejects a duplicate job; only `RetrievalUnavailable` fails an entire
/// search request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("web discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("crawl target unreachable: {0}")]
    CrawlUnreachable(String),

    #[error("a crawl for gallery '{0}' is already running")]
    CrawlAlreadyRunning(String),

    #[error("malformed content: {0}")]
    MalformedContent(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_timestamps_parse_known_formats() {
        assert!(parse_site_timestamp("2025-06-01 12:34:56").is_some());
        assert!(parse_site_timestamp("2025.06.01 12:34").is_some());
        assert!(parse_site_timestamp("2025.06.01").is_some());
        assert_eq!(parse_site_timestamp("06.01"), None);
    }

    #[test]
    fn unparseable_timestamp_sorts_oldest() {
        let post = Post {
            id: "1".into(),
            gallery_id: "g".into(),
            title: "t".into(),
            body: "b".into(),
            author: "a".into(),
            published_at: "just now".into(),
            view_count: 0,
            upvote_count: 0,
            source_url: "https://example.com/1".into(),
            comments: vec![],
        };
        assert_eq!(post.published_ts(), 0);
    }
}
