//! The smart-search engine: one orchestrator over every pipeline stage.
//!
//! ```text
//!  query ──▶ discovery ──▶ crawl (fresh galleries) ──▶ index
//!                                                        │
//!  answer ◀── synthesis ◀── retrieval ◀─────────────────┘
//! ```
//!
//! Degradation policy: discovery, crawling, and generation failures shrink
//! the response (fewer sources, no synthesized answer) and are logged;
//! retrieval is the only stage whose failure fails the request.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::crawler::jobs::{CrawlJob, JobTracker};
use crate::crawler::politeness::RequestGate;
use crate::crawler::site::SiteClient;
use crate::crawler::CrawlOrchestrator;
use crate::discovery::WebDiscovery;
use crate::embeddings::EmbeddingProvider;
use crate::generation::Generator;
use crate::indexing::IndexingPipeline;
use crate::persona::{Persona, build_rag_prompt, build_synthesis_prompt};
use crate::retrieval::RetrievalEngine;
use crate::stores::VectorStore;
use crate::types::{CrawlOutcome, PipelineError, Post, SmartSearchResult};

/// Capacity of the log channel; stale lines are dropped when nobody
/// drains them.
const LOG_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct SmartSearchRequest {
    pub query: String,
    pub top_k: usize,
    pub persona: Persona,
    /// Search results to request from the discovery backend.
    pub max_search_results: usize,
    /// Listing pages crawled per discovered gallery.
    pub pages_per_gallery: usize,
}

impl SmartSearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: 5,
            persona: Persona::default(),
            max_search_results: 10,
            pages_per_gallery: 2,
        }
    }
}

/// Point-in-time snapshot for health reporting.
#[derive(Clone, Debug, serde::Serialize)]
pub struct EngineStatus {
    /// Always true while the handle is alive; mirrors the liveness flag the
    /// external status interface expects.
    pub running: bool,
    pub running_crawls: usize,
    pub indexed_chunks: usize,
    pub galleries: Vec<String>,
    pub uptime_secs: u64,
}

pub struct SearchEngine {
    config: EngineConfig,
    store: Arc<dyn VectorStore>,
    discovery: WebDiscovery,
    crawler: CrawlOrchestrator,
    indexer: Arc<IndexingPipeline>,
    retrieval: RetrievalEngine,
    generator: Arc<dyn Generator>,
    jobs: Arc<JobTracker>,
    log_tx: flume::Sender<String>,
    log_rx: flume::Receiver<String>,
    started: Instant,
}

impl SearchEngine {
    pub fn builder(config: EngineConfig) -> SearchEngineBuilder {
        SearchEngineBuilder {
            config,
            store: None,
            embedder: None,
            generator: None,
        }
    }

    /// Receiver for free-text pipeline log lines. Multiple subscribers
    /// compete for messages; use a single consumer for a complete stream.
    pub fn subscribe_logs(&self) -> flume::Receiver<String> {
        self.log_rx.clone()
    }

    fn emit(&self, line: String) {
        // Dropped when the channel is full or unobserved.
        let _ = self.log_tx.try_send(line);
    }

    /// Full pipeline run: discover galleries for the query, crawl whatever is
    /// stale, then retrieve and synthesize an answer.
    pub async fn smart_search(
        &self,
        request: SmartSearchRequest,
    ) -> Result<SmartSearchResult, PipelineError> {
        let started = Instant::now();
        let query = request.query.trim().to_string();

        // Stage 1: discovery. Unavailable search degrades to index-only.
        let discovered = match self
            .discovery
            .discover(&query, request.max_search_results)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "discovery degraded, searching existing index only");
                Default::default()
            }
        };
        self.emit(format!(
            "discovery: {} galleries, {} seed posts for '{}'",
            discovered.galleries.len(),
            discovered.seeds.len(),
            query
        ));

        // Stage 2: seed posts found directly in search results.
        let mut posts_crawled = 0usize;
        let mut seed_posts: Vec<Post> = Vec::new();
        for seed in &discovered.seeds {
            match self
                .crawler
                .is_indexed(&seed.gallery_id, seed.minor, &seed.post_id)
                .await
            {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    warn!(error = %err, "seed dedup check failed, skipping seed");
                    continue;
                }
            }
            match self
                .crawler
                .fetch_post(&seed.gallery_id, seed.minor, &seed.post_id)
                .await
            {
                Ok(post) => seed_posts.push(post),
                Err(err) => {
                    warn!(
                        gallery = %seed.gallery_id,
                        post = %seed.post_id,
                        error = %err,
                        "seed post skipped"
                    );
                }
            }
        }
        if !seed_posts.is_empty() {
            posts_crawled += seed_posts.len();
            self.indexer.index(&seed_posts).await?;
        }

        // Stage 3: crawl discovered galleries not crawled recently.
        for gallery in &discovered.galleries {
            if self.is_fresh(&gallery.id).await {
                info!(gallery = %gallery.id, "skipping crawl, index is fresh");
                continue;
            }
            match self
                .crawler
                .crawl(&gallery.id, request.pages_per_gallery, gallery.minor)
                .await
            {
                Ok(outcome) => {
                    posts_crawled += outcome.posts_indexed;
                    self.emit(outcome.message.clone());
                }
                Err(err) => {
                    warn!(gallery = %gallery.id, error = %err, "gallery crawl skipped");
                }
            }
        }

        // Stage 4: retrieval. The only stage allowed to fail the request.
        let hits = self.retrieval.retrieve(&query, request.top_k, None).await?;

        // Stage 5: synthesis, absent rather than failing.
        let synthesized_answer = self.synthesize(&query, &hits, request.persona).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.emit(format!(
            "search '{}': {} hits in {}ms",
            query,
            hits.len(),
            elapsed_ms
        ));
        info!(
            %query,
            hits = hits.len(),
            posts_crawled,
            elapsed_ms,
            "smart search complete"
        );

        Ok(SmartSearchResult {
            query,
            hits,
            synthesized_answer,
            persona: request.persona,
            query_time_ms: elapsed_ms,
            discovered_galleries: discovered.gallery_ids(),
            posts_crawled,
        })
    }

    /// Retrieval-only search over what is already indexed, with optional
    /// gallery scoping. Never crawls.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        persona: Persona,
        gallery_id: Option<&str>,
    ) -> Result<SmartSearchResult, PipelineError> {
        let started = Instant::now();
        let hits = self.retrieval.retrieve(query, top_k, gallery_id).await?;
        let synthesized_answer = self.synthesize(query, &hits, persona).await;

        Ok(SmartSearchResult {
            query: query.to_string(),
            hits,
            synthesized_answer,
            persona,
            query_time_ms: started.elapsed().as_millis() as u64,
            discovered_galleries: Vec::new(),
            posts_crawled: 0,
        })
    }

    /// Explicit crawl of one gallery, outside of any search.
    pub async fn crawl(
        &self,
        gallery_id: &str,
        max_pages: usize,
        minor: bool,
    ) -> Result<CrawlOutcome, PipelineError> {
        let outcome = self.crawler.crawl(gallery_id, max_pages, minor).await?;
        self.emit(outcome.message.clone());
        Ok(outcome)
    }

    pub fn job_status(&self, gallery_id: &str) -> CrawlJob {
        self.jobs.status_of(gallery_id)
    }

    pub async fn status(&self) -> Result<EngineStatus, PipelineError> {
        Ok(EngineStatus {
            running: true,
            running_crawls: self.jobs.running_count(),
            indexed_chunks: self.store.chunk_count().await?,
            galleries: self.store.list_galleries().await?,
            uptime_secs: self.started.elapsed().as_secs(),
        })
    }

    /// Consumes the handle. Pipeline state lives on the handle (nothing is
    /// process-global), so dropping it is a complete shutdown; log
    /// subscribers observe the channel closing.
    pub fn shutdown(self) {
        info!("engine shut down");
    }

    async fn is_fresh(&self, gallery_id: &str) -> bool {
        match self.store.last_crawled(gallery_id).await {
            Ok(Some(at)) => {
                let age = chrono::Utc::now().signed_duration_since(at);
                age.to_std()
                    .map(|age| age < self.config.freshness_window)
                    .unwrap_or(true)
            }
            Ok(None) => false,
            Err(err) => {
                warn!(gallery = gallery_id, error = %err, "freshness check failed");
                false
            }
        }
    }

    async fn synthesize(
        &self,
        query: &str,
        hits: &[crate::types::RetrievedHit],
        persona: Persona,
    ) -> Option<String> {
        if hits.is_empty() {
            return None;
        }
        let multi_gallery = hits
            .iter()
            .any(|h| h.post.gallery_id != hits[0].post.gallery_id);
        let prompt = if multi_gallery {
            build_synthesis_prompt(query, hits, persona)
        } else {
            build_rag_prompt(query, hits, persona)
        };
        match self.generator.complete(&prompt).await {
            Ok(answer) => Some(answer),
            Err(err) => {
                warn!(error = %err, "synthesis degraded to retrieval-only");
                None
            }
        }
    }
}

pub struct SearchEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn Generator>>,
}

impl SearchEngineBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn build(self) -> Result<SearchEngine, PipelineError> {
        let store = self
            .store
            .ok_or_else(|| PipelineError::Config("engine requires a vector store".into()))?;
        let embedder = self
            .embedder
            .ok_or_else(|| PipelineError::Config("engine requires an embedding provider".into()))?;
        let generator = self
            .generator
            .ok_or_else(|| PipelineError::Config("engine requires a generator".into()))?;

        let config = self.config;
        let jobs = Arc::new(JobTracker::new());
        let gate = RequestGate::new(config.crawl_delay);
        let site = SiteClient::new(config.site_base.clone(), gate, config.fetch_timeout);
        let indexer = Arc::new(IndexingPipeline::new(
            store.clone(),
            embedder.clone(),
            Default::default(),
        ));
        let crawler = CrawlOrchestrator::new(site, store.clone(), indexer.clone(), jobs.clone());
        let discovery = WebDiscovery::new(config.search_base.clone(), config.fetch_timeout);
        let retrieval = RetrievalEngine::new(embedder, store.clone(), config.score_floor);
        let (log_tx, log_rx) = flume::bounded(LOG_CAPACITY);

        Ok(SearchEngine {
            config,
            store,
            discovery,
            crawler,
            indexer,
            retrieval,
            generator,
            jobs,
            log_tx,
            log_rx,
            started: Instant::now(),
        })
    }
}
