//! Crawl orchestration against a mock gallery site.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;

use gallrag::chunking::ChunkerConfig;
use gallrag::crawler::jobs::JobTracker;
use gallrag::crawler::politeness::RequestGate;
use gallrag::crawler::site::SiteClient;
use gallrag::crawler::{CrawlOrchestrator, JobState};
use gallrag::embeddings::MockEmbeddingProvider;
use gallrag::indexing::IndexingPipeline;
use gallrag::stores::{SqliteVectorStore, VectorStore};
use gallrag::types::PipelineError;

fn listing_html(ids: &[&str]) -> String {
    let rows: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<tr class="ub-content">
                    <td class="gall_num">{id}</td>
                    <td class="gall_tit"><a href="/board/view/?id=g&no={id}">글 {id}</a></td>
                    <td class="gall_writer">작성자</td>
                    <td class="gall_date" title="2025-06-01 10:00:00">06.01</td>
                    <td class="gall_count">42</td>
                </tr>"#
            )
        })
        .collect();
    format!("<table>{rows}</table>")
}

fn view_html(title: &str, body: &str) -> String {
    format!(
        r#"<html><body>
            <span class="title_subject">{title}</span>
            <div class="fl"><span class="gall_writer" data-nick="고닉"></span></div>
            <span class="gall_date" title="2025-06-01 12:00:00">06.01</span>
            <span class="gall_count">조회 100</span>
            <div class="write_div"><p>{body}</p></div>
        </body></html>"#
    )
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<SqliteVectorStore>,
    jobs: Arc<JobTracker>,
    crawler: CrawlOrchestrator,
}

async fn harness(base_url: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteVectorStore::open(dir.path().join("crawl.db"))
            .await
            .unwrap(),
    );
    let embedder = Arc::new(MockEmbeddingProvider::default());
    let indexer = Arc::new(IndexingPipeline::new(
        store.clone(),
        embedder,
        ChunkerConfig::default(),
    ));
    let jobs = Arc::new(JobTracker::new());
    let site = SiteClient::new(
        base_url,
        RequestGate::without_jitter(Duration::from_millis(1)),
        Duration::from_secs(5),
    );
    let crawler = CrawlOrchestrator::new(site, store.clone(), indexer, jobs.clone());
    Harness {
        _dir: dir,
        store,
        jobs,
        crawler,
    }
}

#[tokio::test]
async fn crawl_indexes_listed_posts() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/board/lists/")
                .query_param("id", "g")
                .query_param("page", "1");
            then.status(200).body(listing_html(&["101", "102"]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/board/view/")
                .query_param("id", "g")
                .query_param("no", "101");
            then.status(200)
                .body(view_html("첫 글", "루엔 학살자 공략은 회피 타이밍이 전부다."));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/board/view/")
                .query_param("id", "g")
                .query_param("no", "102");
            then.status(200)
                .body(view_html("둘째 글", "말레니아는 패턴 암기가 중요하다는 평가."));
        })
        .await;

    let h = harness(&server.base_url()).await;
    let outcome = h.crawler.crawl("g", 1, false).await.unwrap();

    assert_eq!(outcome.posts_indexed, 2);
    assert!(h.store.chunk_count().await.unwrap() >= 2);
    let job = h.jobs.status_of("g");
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.posts_indexed, Some(2));

    // Second crawl finds everything already indexed but still completes.
    let again = h.crawler.crawl("g", 1, false).await.unwrap();
    assert_eq!(again.posts_indexed, 0);
    assert!(again.message.contains("already indexed"));
    assert_eq!(h.jobs.status_of("g").state, JobState::Done);
}

#[tokio::test]
async fn dead_first_page_fails_the_job() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/board/lists/");
            then.status(500);
        })
        .await;

    let h = harness(&server.base_url()).await;
    let err = h.crawler.crawl("g", 2, false).await.unwrap_err();
    assert!(matches!(err, PipelineError::CrawlUnreachable(_)));

    let job = h.jobs.status_of("g");
    assert_eq!(job.state, JobState::Error);
    assert_eq!(job.posts_indexed, None);
}

#[tokio::test]
async fn failed_post_fetch_is_partial_not_fatal() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/board/lists/");
            then.status(200).body(listing_html(&["201", "202"]));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/board/view/")
                .query_param("no", "201");
            then.status(200)
                .body(view_html("살아있는 글", "이 글은 정상적으로 내려온다."));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/board/view/")
                .query_param("no", "202");
            then.status(404);
        })
        .await;

    let h = harness(&server.base_url()).await;
    let outcome = h.crawler.crawl("g", 1, false).await.unwrap();

    assert_eq!(outcome.posts_indexed, 1);
    assert!(outcome.message.contains("partial"));
    assert_eq!(h.jobs.status_of("g").state, JobState::Done);
}

#[tokio::test]
async fn duplicate_crawl_is_rejected_while_running() {
    let h = harness("http://127.0.0.1:1").await;
    h.jobs.begin("busy").unwrap();

    let err = h.crawler.crawl("busy", 1, false).await.unwrap_err();
    assert!(matches!(err, PipelineError::CrawlAlreadyRunning(_)));
    // The pre-existing job record is untouched.
    assert_eq!(h.jobs.status_of("busy").state, JobState::Running);
}

#[tokio::test]
async fn seed_fetch_round_trips_one_post() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/board/view/")
                .query_param("id", "g")
                .query_param("no", "777");
            then.status(200)
                .body(view_html("시드 글", "검색 결과에서 바로 찾은 게시물이다."));
        })
        .await;

    let h = harness(&server.base_url()).await;
    assert!(!h.crawler.is_indexed("g", false, "777").await.unwrap());
    let post = h.crawler.fetch_post("g", false, "777").await.unwrap();
    assert_eq!(post.title, "시드 글");
    assert_eq!(post.author, "고닉");
    assert_eq!(post.id, "777");
}
