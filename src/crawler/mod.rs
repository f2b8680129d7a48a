//! Crawl orchestration: listing pages → new posts → indexed chunks.
//!
//! Best effort, report what happened: a failed page or post is counted and
//! skipped, and partial success is described in the outcome message. Only a
//! dead first listing page is a total failure (`CrawlUnreachable`). The job
//! tracker guarantees at most one running crawl per gallery; duplicates are
//! rejected immediately, never queued.

pub mod jobs;
pub mod parse;
pub mod politeness;
pub mod site;

use std::sync::Arc;

use tracing::{info, warn};

use crate::indexing::IndexingPipeline;
use crate::stores::VectorStore;
use crate::types::{CrawlOutcome, PipelineError, Post};
use jobs::JobTracker;
use site::SiteClient;

pub use jobs::{CrawlJob, JobState};
pub use politeness::RequestGate;

pub struct CrawlOrchestrator {
    site: SiteClient,
    store: Arc<dyn VectorStore>,
    indexer: Arc<IndexingPipeline>,
    jobs: Arc<JobTracker>,
}

impl CrawlOrchestrator {
    pub fn new(
        site: SiteClient,
        store: Arc<dyn VectorStore>,
        indexer: Arc<IndexingPipeline>,
        jobs: Arc<JobTracker>,
    ) -> Self {
        Self {
            site,
            store,
            indexer,
            jobs,
        }
    }

    pub fn jobs(&self) -> &Arc<JobTracker> {
        &self.jobs
    }

    /// Crawls up to `max_pages` listing pages of a gallery and indexes every
    /// post not yet present in the store.
    pub async fn crawl(
        &self,
        gallery_id: &str,
        max_pages: usize,
        minor: bool,
    ) -> Result<CrawlOutcome, PipelineError> {
        self.jobs.begin(gallery_id)?;

        match self.crawl_inner(gallery_id, max_pages, minor).await {
            Ok(outcome) => {
                self.jobs
                    .complete(gallery_id, outcome.posts_indexed, &outcome.message);
                Ok(outcome)
            }
            Err(err) => {
                self.jobs.fail(gallery_id, &err.to_string());
                Err(err)
            }
        }
    }

    async fn crawl_inner(
        &self,
        gallery_id: &str,
        max_pages: usize,
        minor: bool,
    ) -> Result<CrawlOutcome, PipelineError> {
        let mut harvested: Vec<Post> = Vec::new();
        let mut pages_failed = 0usize;
        let mut posts_failed = 0usize;
        let mut already_indexed = 0usize;

        for page in 1..=max_pages.max(1) {
            let list_url = self.site.list_url(gallery_id, minor, page);
            let listing = match self.site.fetch(&list_url).await {
                Ok(html) => html,
                Err(err) if page == 1 => {
                    return Err(PipelineError::CrawlUnreachable(format!(
                        "{gallery_id}: first listing page failed: {err}"
                    )));
                }
                Err(err) => {
                    warn!(gallery = gallery_id, page, error = %err, "listing page failed, skipping");
                    pages_failed += 1;
                    continue;
                }
            };

            let stubs = match parse::parse_post_list(&listing) {
                Ok(stubs) => stubs,
                Err(err) if page == 1 => {
                    return Err(PipelineError::CrawlUnreachable(format!(
                        "{gallery_id}: first listing page unparseable: {err}"
                    )));
                }
                Err(err) => {
                    warn!(gallery = gallery_id, page, error = %err, "listing page unparseable, skipping");
                    pages_failed += 1;
                    continue;
                }
            };

            for stub in stubs {
                let view_url = self.site.view_url(gallery_id, minor, &stub.id);
                if self.store.has_post(&view_url).await? {
                    already_indexed += 1;
                    continue;
                }
                match self.fetch_post(gallery_id, minor, &stub.id).await {
                    Ok(post) => harvested.push(post),
                    Err(err) => {
                        warn!(gallery = gallery_id, post = %stub.id, error = %err, "post skipped");
                        posts_failed += 1;
                    }
                }
            }
        }

        let posts_indexed = harvested.len();
        let index_outcome = self.indexer.index(&harvested).await?;
        self.store.record_crawl(gallery_id).await?;

        let mut message = format!(
            "{gallery_id}: {posts_indexed} new posts indexed ({} chunks)",
            index_outcome.chunks_added
        );
        if already_indexed > 0 {
            message.push_str(&format!(", {already_indexed} already indexed"));
        }
        if pages_failed > 0 || posts_failed > 0 {
            message.push_str(&format!(
                ", partial: {pages_failed} pages and {posts_failed} posts failed"
            ));
        }

        info!(gallery = gallery_id, posts_indexed, "crawl finished");
        Ok(CrawlOutcome {
            posts_indexed,
            message,
        })
    }

    /// Fetches and normalizes one post by id, without touching job state.
    /// Used for seed posts found during discovery.
    pub async fn fetch_post(
        &self,
        gallery_id: &str,
        minor: bool,
        post_id: &str,
    ) -> Result<Post, PipelineError> {
        let url = self.site.view_url(gallery_id, minor, post_id);
        let html = self.site.fetch(&url).await?;
        parse::parse_post_detail(&html, gallery_id, post_id, &url)
    }

    /// Whether a seed post is already present in the store.
    pub async fn is_indexed(
        &self,
        gallery_id: &str,
        minor: bool,
        post_id: &str,
    ) -> Result<bool, PipelineError> {
        let url = self.site.view_url(gallery_id, minor, post_id);
        self.store.has_post(&url).await
    }
}
