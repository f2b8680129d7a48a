//! Web discovery: expand a free-text query into candidate galleries.
//!
//! Runs a site-scoped query against the configured web-search endpoint and
//! extracts gallery identifiers (and directly crawlable seed posts) from the
//! result markup with the site's URL patterns. URLs that match no pattern are
//! dropped silently; gallery ids are deduplicated preserving first-seen
//! order. An unreachable or rate-limited search capability surfaces as
//! `DiscoveryUnavailable`, which the orchestrator treats as a degraded (not
//! fatal) stage.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::types::{GalleryRef, PipelineError};

// View/list URL shapes; `&` may arrive entity-encoded inside result markup.
static VIEW_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"gall\.dcinside\.com/(mgallery/)?board/view/\?id=([a-zA-Z0-9_]+)&(?:amp;)?no=(\d+)",
    )
    .expect("static regex")
});
static LIST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"gall\.dcinside\.com/(mgallery/)?board/lists/\?id=([a-zA-Z0-9_]+)")
        .expect("static regex")
});

/// A post found directly in search results, crawlable without paging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedPost {
    pub gallery_id: String,
    pub post_id: String,
    pub minor: bool,
}

#[derive(Clone, Debug, Default)]
pub struct DiscoveryOutcome {
    pub galleries: Vec<GalleryRef>,
    pub seeds: Vec<SeedPost>,
}

impl DiscoveryOutcome {
    pub fn gallery_ids(&self) -> Vec<String> {
        self.galleries.iter().map(|g| g.id.clone()).collect()
    }
}

pub struct WebDiscovery {
    client: reqwest::Client,
    search_base: String,
    timeout: Duration,
}

impl WebDiscovery {
    pub fn new(search_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            search_base: search_base.into(),
            timeout,
        }
    }

    /// Searches for forum content related to `query` and returns the deduped
    /// galleries plus seed posts found along the way.
    pub async fn discover(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<DiscoveryOutcome, PipelineError> {
        let scoped = format!("site:gall.dcinside.com {query}");
        debug!(query = %scoped, "running discovery search");

        let mut endpoint = url::Url::parse(&self.search_base)
            .map_err(|err| PipelineError::Config(format!("search base url: {err}")))?;
        endpoint
            .query_pairs_mut()
            .append_pair("q", &scoped)
            .append_pair("num", &max_results.to_string());

        let response = self
            .client
            .get(endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| PipelineError::DiscoveryUnavailable(err.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::DiscoveryUnavailable(format!(
                "search endpoint returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| PipelineError::DiscoveryUnavailable(err.to_string()))?;

        let outcome = extract_targets(&body, max_results);
        info!(
            galleries = outcome.galleries.len(),
            seeds = outcome.seeds.len(),
            "discovery complete"
        );
        Ok(outcome)
    }
}

/// Pulls gallery ids and seed posts out of raw search-result markup.
pub fn extract_targets(body: &str, max_results: usize) -> DiscoveryOutcome {
    let mut outcome = DiscoveryOutcome::default();
    let mut seen_galleries = Vec::new();

    for caps in VIEW_PATTERN.captures_iter(body) {
        if outcome.seeds.len() >= max_results {
            break;
        }
        let minor = caps.get(1).is_some();
        let gallery_id = caps[2].to_string();
        let post_id = caps[3].to_string();

        let seed = SeedPost {
            gallery_id: gallery_id.clone(),
            post_id,
            minor,
        };
        if !outcome.seeds.contains(&seed) {
            outcome.seeds.push(seed);
        }
        if !seen_galleries.contains(&gallery_id) {
            seen_galleries.push(gallery_id.clone());
            outcome
                .galleries
                .push(GalleryRef::new(gallery_id).minor_board(minor));
        }
    }

    for caps in LIST_PATTERN.captures_iter(body) {
        let minor = caps.get(1).is_some();
        let gallery_id = caps[2].to_string();
        if !seen_galleries.contains(&gallery_id) {
            seen_galleries.push(gallery_id.clone());
            outcome
                .galleries
                .push(GalleryRef::new(gallery_id).minor_board(minor));
        }
    }

    outcome
}
