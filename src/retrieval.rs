//! Retrieval: query embedding, similarity search, and post-level ranking.
//!
//! Search happens at chunk granularity but results are reported per post:
//! when several chunks of one post clear the floor, only the best-scoring
//! chunk survives. Scores are clamped to `[0, 1]` before filtering so the
//! floor has a stable meaning regardless of backend quirks. Any store
//! failure here is `RetrievalUnavailable`, the one error that fails a whole
//! search request.

use std::sync::Arc;

use tracing::debug;

use crate::embeddings::EmbeddingProvider;
use crate::stores::VectorStore;
use crate::types::{PipelineError, RetrievedHit};

/// Oversampling factor: chunk-level hits collapse onto posts, so we fetch
/// more chunks than posts requested.
const CHUNK_OVERSAMPLE: usize = 4;

pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    score_floor: f32,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        score_floor: f32,
    ) -> Self {
        Self {
            embedder,
            store,
            score_floor,
        }
    }

    /// Returns up to `top_k` posts most similar to `query`, best first.
    /// Ties on score break toward the more recent post.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        gallery_id: Option<&str>,
    ) -> Result<Vec<RetrievedHit>, PipelineError> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .embedder
            .embed_batch(&[query.to_string()])
            .await
            .map_err(|err| PipelineError::RetrievalUnavailable(err.to_string()))?;
        let query_embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::RetrievalUnavailable("empty query embedding".into()))?;

        let raw = self
            .store
            .search_similar(&query_embedding, top_k * CHUNK_OVERSAMPLE, gallery_id)
            .await
            .map_err(|err| PipelineError::RetrievalUnavailable(err.to_string()))?;

        // Collapse chunk hits onto posts, keeping each post's best chunk.
        let mut hits: Vec<RetrievedHit> = Vec::new();
        for (chunk, raw_score) in raw {
            let score = raw_score.clamp(0.0, 1.0);
            if score < self.score_floor {
                continue;
            }
            if let Some(existing) = hits
                .iter_mut()
                .find(|h| h.chunk.gallery_id == chunk.gallery_id && h.chunk.post_id == chunk.post_id)
            {
                if score > existing.score {
                    existing.score = score;
                    existing.chunk = chunk;
                }
                continue;
            }
            let Some(post) = self
                .store
                .post_by_key(&chunk.gallery_id, &chunk.post_id)
                .await
                .map_err(|err| PipelineError::RetrievalUnavailable(err.to_string()))?
            else {
                // Chunk without its post record; skip rather than fabricate.
                debug!(
                    gallery = %chunk.gallery_id,
                    post = %chunk.post_id,
                    "orphaned chunk skipped"
                );
                continue;
            };
            hits.push(RetrievedHit { chunk, score, post });
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.post.published_ts().cmp(&a.post.published_ts()))
        });
        hits.truncate(top_k);

        debug!(query, returned = hits.len(), "retrieval complete");
        Ok(hits)
    }
}
