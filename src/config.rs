//! Environment-driven engine configuration.
//!
//! Every knob has a default that works against the real services; tests
//! override the base URLs to point at local mock servers. `.env` files are
//! honoured when the binary calls [`dotenvy::dotenv`] before
//! [`EngineConfig::from_env`].

use std::env;
use std::time::Duration;

use crate::types::PipelineError;

/// Minimum politeness delay the crawler will accept, mirroring the source
/// site's tolerance. Requests are never spaced closer than this.
pub const MIN_CRAWL_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// REST bind address.
    pub bind_addr: String,
    /// Path of the sqlite vector store. `:memory:` is accepted for tests.
    pub db_path: String,

    /// Base URL of the forum site being crawled.
    pub site_base: String,
    /// Base URL of the web-search capability used for discovery.
    pub search_base: String,

    /// OpenAI-compatible embeddings endpoint base (`…/v1`).
    pub embedding_base: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dimensions: usize,

    /// OpenAI-compatible chat-completions endpoint base (`…/v1`).
    pub generation_base: String,
    pub generation_api_key: Option<String>,
    pub generation_model: String,

    /// Minimum spacing between any two outbound crawl requests.
    pub crawl_delay: Duration,
    /// Per-request timeout for crawl and discovery fetches.
    pub fetch_timeout: Duration,
    /// Timeout for one embedding batch call.
    pub embed_timeout: Duration,
    /// Timeout for one generation call.
    pub generation_timeout: Duration,

    /// Galleries crawled within this window are not re-crawled by smart search.
    pub freshness_window: Duration,
    /// Hits scoring below this are discarded.
    pub score_floor: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8911".into(),
            db_path: "gallrag.db".into(),
            site_base: "https://gall.dcinside.com".into(),
            search_base: "https://www.google.com/search".into(),
            embedding_base: "https://api.openai.com/v1".into(),
            embedding_api_key: None,
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimensions: 1536,
            generation_base: "https://api.groq.com/openai/v1".into(),
            generation_api_key: None,
            generation_model: "llama-3.3-70b-versatile".into(),
            crawl_delay: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(15),
            embed_timeout: Duration::from_secs(20),
            generation_timeout: Duration::from_secs(30),
            freshness_window: Duration::from_secs(900),
            score_floor: 0.0,
        }
    }
}

impl EngineConfig {
    /// Reads configuration from the process environment, keeping defaults
    /// for anything unset. Malformed numeric values are a hard error rather
    /// than a silent fallback.
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("GALLRAG_BIND") {
            cfg.bind_addr = v;
        }
        if let Ok(v) = env::var("GALLRAG_DB") {
            cfg.db_path = v;
        }
        if let Ok(v) = env::var("GALLRAG_SITE_BASE") {
            cfg.site_base = v;
        }
        if let Ok(v) = env::var("GALLRAG_SEARCH_BASE") {
            cfg.search_base = v;
        }

        if let Ok(v) = env::var("EMBEDDING_BASE_URL") {
            cfg.embedding_base = v;
        }
        cfg.embedding_api_key = env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty());
        if let Ok(v) = env::var("EMBEDDING_MODEL") {
            cfg.embedding_model = v;
        }
        if let Ok(v) = env::var("EMBEDDING_DIMENSIONS") {
            cfg.embedding_dimensions = parse_num("EMBEDDING_DIMENSIONS", &v)?;
        }

        if let Ok(v) = env::var("GENERATION_BASE_URL") {
            cfg.generation_base = v;
        }
        cfg.generation_api_key = env::var("GROQ_API_KEY").ok().filter(|v| !v.is_empty());
        if let Ok(v) = env::var("GENERATION_MODEL") {
            cfg.generation_model = v;
        }

        if let Ok(v) = env::var("GALLRAG_CRAWL_DELAY_MS") {
            cfg.crawl_delay = Duration::from_millis(parse_num("GALLRAG_CRAWL_DELAY_MS", &v)?);
        }
        if let Ok(v) = env::var("GALLRAG_FRESHNESS_SECS") {
            cfg.freshness_window = Duration::from_secs(parse_num("GALLRAG_FRESHNESS_SECS", &v)?);
        }
        if let Ok(v) = env::var("GALLRAG_SCORE_FLOOR") {
            cfg.score_floor = v
                .parse::<f32>()
                .map_err(|_| PipelineError::Config(format!("GALLRAG_SCORE_FLOOR: '{v}' is not a float")))?;
        }

        cfg.crawl_delay = cfg.crawl_delay.max(MIN_CRAWL_DELAY);
        Ok(cfg)
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, PipelineError> {
    raw.parse::<T>()
        .map_err(|_| PipelineError::Config(format!("{key}: '{raw}' is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_polite() {
        let cfg = EngineConfig::default();
        assert!(cfg.crawl_delay >= Duration::from_secs(1));
        assert_eq!(cfg.score_floor, 0.0);
    }
}
