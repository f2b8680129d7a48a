//! HTTP surface over the search engine.
//!
//! Thin adapter layer: handlers deserialize a request, call one engine
//! operation, and reshape the result into the wire schema. No pipeline logic
//! lives here. Error payloads are always `{"error": {"code", "message"}}`
//! with a status derived from the error variant.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::engine::{SearchEngine, SmartSearchRequest};
use crate::persona::Persona;
use crate::types::{Comment, PipelineError, Post, RetrievedHit};

type AppState = Arc<SearchEngine>;

pub fn router(engine: Arc<SearchEngine>) -> Router {
    Router::new()
        .route("/smart-search", post(smart_search))
        .route("/search", post(search))
        .route("/crawl", post(crawl))
        .route("/crawl/status/{gall_id}", get(crawl_status))
        .route("/health", get(health))
        .with_state(engine)
}

/// Serves on the given listener until ctrl-c. The listener is passed in so
/// tests can bind an ephemeral port first.
pub async fn serve_on(listener: TcpListener, engine: Arc<SearchEngine>) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
}

// ── wire schema ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SmartSearchBody {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    persona: Option<String>,
    #[serde(default = "default_google_results")]
    google_results: usize,
    #[serde(default = "default_gallery_pages")]
    gallery_pages: usize,
}

#[derive(Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    persona: Option<String>,
    #[serde(default)]
    gall_id: Option<String>,
}

#[derive(Deserialize)]
struct CrawlBody {
    gall_id: String,
    #[serde(default = "default_gallery_pages")]
    max_pages: usize,
    /// Minor boards live under the `/mgallery` path prefix on the site.
    #[serde(default, alias = "minor")]
    is_mgall: bool,
}

fn default_top_k() -> usize {
    5
}
fn default_google_results() -> usize {
    10
}
fn default_gallery_pages() -> usize {
    2
}

#[derive(Serialize)]
struct CommentOut {
    id: String,
    author: String,
    text: String,
    date: String,
    replies: Vec<CommentOut>,
}

impl From<&Comment> for CommentOut {
    fn from(c: &Comment) -> Self {
        Self {
            id: c.id.clone(),
            author: c.author.clone(),
            text: c.text.clone(),
            date: c.published_at.clone(),
            replies: c.replies.iter().map(CommentOut::from).collect(),
        }
    }
}

#[derive(Serialize)]
struct PostOut {
    id: String,
    gall_id: String,
    title: String,
    body: String,
    author: String,
    date: String,
    views: u64,
    upvotes: u64,
    score: f32,
    comments: Vec<CommentOut>,
    source_url: String,
}

impl PostOut {
    fn from_hit(hit: &RetrievedHit) -> Self {
        Self::from_post(&hit.post, hit.score)
    }

    fn from_post(post: &Post, score: f32) -> Self {
        Self {
            id: post.id.clone(),
            gall_id: post.gallery_id.clone(),
            title: post.title.clone(),
            body: post.body.clone(),
            author: post.author.clone(),
            date: post.published_at.clone(),
            views: post.view_count,
            upvotes: post.upvote_count,
            score,
            comments: post.comments.iter().map(CommentOut::from).collect(),
            source_url: post.source_url.clone(),
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    posts: Vec<PostOut>,
    synthesized_answer: Option<String>,
    persona: String,
    /// Wall-clock time in whole milliseconds.
    query_time: u64,
    discovered_galls: Vec<String>,
    posts_crawled: usize,
}

impl From<crate::types::SmartSearchResult> for SearchResponse {
    fn from(result: crate::types::SmartSearchResult) -> Self {
        Self {
            posts: result.hits.iter().map(PostOut::from_hit).collect(),
            synthesized_answer: result.synthesized_answer,
            persona: result.persona.as_str().to_string(),
            query_time: result.query_time_ms,
            discovered_galls: result.discovered_galleries,
            posts_crawled: result.posts_crawled,
        }
    }
}

#[derive(Serialize)]
struct CrawlResponse {
    gall_id: String,
    posts_indexed: usize,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            PipelineError::CrawlAlreadyRunning(_) => (StatusCode::CONFLICT, "crawl_already_running"),
            PipelineError::MalformedContent(_) => (StatusCode::BAD_REQUEST, "malformed_content"),
            PipelineError::Config(_) => (StatusCode::BAD_REQUEST, "config"),
            PipelineError::CrawlUnreachable(_) => (StatusCode::BAD_GATEWAY, "crawl_unreachable"),
            PipelineError::DiscoveryUnavailable(_) => {
                (StatusCode::BAD_GATEWAY, "discovery_unavailable")
            }
            PipelineError::RetrievalUnavailable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "retrieval_unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ── handlers ────────────────────────────────────────────────────────────────

async fn smart_search(
    State(engine): State<AppState>,
    Json(body): Json<SmartSearchBody>,
) -> Result<Json<SearchResponse>, ApiError> {
    let mut request = SmartSearchRequest::new(body.query);
    request.top_k = body.top_k;
    request.persona = body
        .persona
        .as_deref()
        .map(Persona::parse_or_default)
        .unwrap_or_default();
    request.max_search_results = body.google_results;
    request.pages_per_gallery = body.gallery_pages;

    let result = engine.smart_search(request).await?;
    Ok(Json(result.into()))
}

async fn search(
    State(engine): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, ApiError> {
    let persona = body
        .persona
        .as_deref()
        .map(Persona::parse_or_default)
        .unwrap_or_default();
    let result = engine
        .search(&body.query, body.top_k, persona, body.gall_id.as_deref())
        .await?;
    Ok(Json(result.into()))
}

async fn crawl(
    State(engine): State<AppState>,
    Json(body): Json<CrawlBody>,
) -> Result<Json<CrawlResponse>, ApiError> {
    let outcome = engine
        .crawl(&body.gall_id, body.max_pages, body.is_mgall)
        .await?;
    Ok(Json(CrawlResponse {
        gall_id: body.gall_id,
        posts_indexed: outcome.posts_indexed,
        message: outcome.message,
    }))
}

async fn crawl_status(
    State(engine): State<AppState>,
    axum::extract::Path(gall_id): axum::extract::Path<String>,
) -> Json<crate::crawler::CrawlJob> {
    Json(engine.job_status(&gall_id))
}

async fn health(State(engine): State<AppState>) -> Result<Response, ApiError> {
    let status = engine.status().await?;
    let body = serde_json::json!({
        "status": "ok",
        "running": status.running,
        "running_crawls": status.running_crawls,
        "indexed_chunks": status.indexed_chunks,
        "galleries": status.galleries,
        "uptime_secs": status.uptime_secs,
    });
    Ok(Json(body).into_response())
}
