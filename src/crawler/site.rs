//! HTTP access to the forum site: URL construction and polite fetching.
//!
//! Every request passes through the shared [`RequestGate`] and rotates
//! through a small pool of realistic User-Agent strings. HTTP error statuses
//! surface as errors; the caller decides whether they are fatal.

use std::time::Duration;

use rand::prelude::IndexedRandom;
use reqwest::Client;
use tracing::debug;

use super::politeness::RequestGate;
use crate::types::PipelineError;

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

#[derive(Clone)]
pub struct SiteClient {
    client: Client,
    base: String,
    gate: RequestGate,
    timeout: Duration,
}

impl SiteClient {
    pub fn new(base: impl Into<String>, gate: RequestGate, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            gate,
            timeout,
        }
    }

    /// Listing page URL for a gallery; minor boards live under a different
    /// path prefix.
    pub fn list_url(&self, gallery_id: &str, minor: bool, page: usize) -> String {
        let prefix = if minor { "/mgallery" } else { "" };
        format!(
            "{}{}/board/lists/?id={}&page={}",
            self.base, prefix, gallery_id, page
        )
    }

    /// View page URL for a single post.
    pub fn view_url(&self, gallery_id: &str, minor: bool, post_id: &str) -> String {
        let prefix = if minor { "/mgallery" } else { "" };
        format!(
            "{}{}/board/view/?id={}&no={}",
            self.base, prefix, gallery_id, post_id
        )
    }

    /// Fetches a page body after acquiring the politeness gate.
    pub async fn fetch(&self, url: &str) -> Result<String, PipelineError> {
        self.gate.acquire().await;

        let agent = USER_AGENTS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        debug!(%url, "fetching page");
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header("User-Agent", agent)
            .header("Accept-Language", "ko-KR,ko;q=0.9,en-US;q=0.8")
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?)
    }
}
