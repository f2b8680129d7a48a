//! Indexing pipeline: chunk normalized posts, embed, and upsert.
//!
//! Failure policy per the pipeline contract: one chunk's embedding failure is
//! logged and that chunk skipped; the batch continues. `chunks_added` counts
//! only rows genuinely new to the store (fingerprint idempotence), never
//! optimistic estimates.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chunking::{ChunkerConfig, chunk_post};
use crate::embeddings::EmbeddingProvider;
use crate::stores::VectorStore;
use crate::types::{PipelineError, Post};

/// How many chunks ride in one embedding call.
const EMBED_BATCH_SIZE: usize = 32;

#[derive(Clone, Copy, Debug, Default)]
pub struct IndexOutcome {
    pub chunks_added: usize,
    pub chunks_skipped: usize,
}

pub struct IndexingPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: ChunkerConfig,
}

impl IndexingPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
        }
    }

    /// Indexes a batch of posts: persists the denormalized post records, then
    /// chunk-embeds their text and upserts by fingerprint.
    pub async fn index(&self, posts: &[Post]) -> Result<IndexOutcome, PipelineError> {
        if posts.is_empty() {
            return Ok(IndexOutcome::default());
        }

        let mut pending = Vec::new();
        for post in posts {
            self.store.upsert_post(post).await?;
            pending.extend(chunk_post(post, self.chunker));
        }

        let mut outcome = IndexOutcome::default();
        for batch in pending.chunks_mut(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            match self.embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    for (chunk, vector) in batch.iter_mut().zip(vectors) {
                        chunk.embedding = Some(vector);
                    }
                }
                Err(err) => {
                    // Skip this batch's chunks, keep the rest of the posts.
                    warn!(error = %err, skipped = batch.len(), "embedding batch failed");
                    outcome.chunks_skipped += batch.len();
                    continue;
                }
            }

            let ready: Vec<_> = batch
                .iter()
                .filter(|c| c.embedding.is_some())
                .cloned()
                .collect();
            outcome.chunks_added += self.store.upsert_chunks(ready).await?;
        }

        debug!(
            posts = posts.len(),
            added = outcome.chunks_added,
            skipped = outcome.chunks_skipped,
            embedder = self.embedder.name(),
            "indexing batch complete"
        );
        Ok(outcome)
    }
}
