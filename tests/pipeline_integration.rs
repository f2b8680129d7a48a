//! End-to-end indexing and retrieval over a real sqlite-vec store, with
//! deterministic mock embeddings.

use std::sync::Arc;

use gallrag::chunking::ChunkerConfig;
use gallrag::embeddings::MockEmbeddingProvider;
use gallrag::indexing::IndexingPipeline;
use gallrag::retrieval::RetrievalEngine;
use gallrag::stores::{SqliteVectorStore, VectorStore};
use gallrag::types::{Comment, Post};

fn post(gallery: &str, id: &str, title: &str, body: &str) -> Post {
    Post {
        id: id.into(),
        gallery_id: gallery.into(),
        title: title.into(),
        body: body.into(),
        author: "ㅇㅇ".into(),
        published_at: "2025-06-01 10:00:00".into(),
        view_count: 100,
        upvote_count: 5,
        source_url: format!("https://gall.example.com/{gallery}/board/view/?id={gallery}&no={id}"),
        comments: vec![],
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<SqliteVectorStore>,
    indexer: IndexingPipeline,
    retrieval: RetrievalEngine,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteVectorStore::open(dir.path().join("test.db"))
            .await
            .unwrap(),
    );
    let embedder = Arc::new(MockEmbeddingProvider::default());
    let indexer = IndexingPipeline::new(store.clone(), embedder.clone(), ChunkerConfig::default());
    let retrieval = RetrievalEngine::new(embedder, store.clone(), 0.0);
    Harness {
        _dir: dir,
        store,
        indexer,
        retrieval,
    }
}

#[tokio::test]
async fn indexing_identical_posts_twice_adds_nothing() {
    let h = harness().await;
    let posts = vec![
        post("programming", "1", "러스트 질문", "소유권 규칙이 헷갈리는데 설명 좀 해줄 사람?"),
        post("programming", "2", "비동기 정리", "tokio 런타임에서 태스크를 나누는 기준을 정리해봤다."),
    ];

    let first = h.indexer.index(&posts).await.unwrap();
    assert!(first.chunks_added > 0);
    assert_eq!(first.chunks_skipped, 0);
    let count_after_first = h.store.chunk_count().await.unwrap();

    let second = h.indexer.index(&posts).await.unwrap();
    assert_eq!(second.chunks_added, 0);
    assert_eq!(h.store.chunk_count().await.unwrap(), count_after_first);
}

#[tokio::test]
async fn retrieval_ranks_the_exact_match_first_with_valid_scores() {
    let h = harness().await;
    let target_body = "엘든링 출혈 빌드가 현재 메타에서 가장 강력하다는 평가를 받는다.";
    let posts = vec![
        post("eldenring", "10", "", target_body),
        post("eldenring", "11", "잡담", "오늘 날씨가 좋아서 산책 다녀온 이야기."),
        post("baseball_new11", "12", "직관 후기", "야구장 다녀왔는데 응원 분위기가 최고였다."),
    ];
    h.indexer.index(&posts).await.unwrap();

    let hits = h.retrieval.retrieve(target_body, 3, None).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].post.id, "10");
    assert!(hits[0].score > 0.99);
    for window in hits.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
    for hit in &hits {
        assert!((0.0..=1.0).contains(&hit.score));
    }
}

#[tokio::test]
async fn each_post_appears_at_most_once() {
    let h = harness().await;
    let mut long_post = post(
        "programming",
        "20",
        "장문 정리글",
        &"러스트 소유권과 수명에 대한 긴 정리. ".repeat(80),
    );
    long_post.comments = vec![Comment {
        id: "c1".into(),
        author: "고닉".into(),
        text: "소유권 정리 감사합니다, 수명 부분이 특히 도움됐어요.".into(),
        published_at: "2025-06-01 11:00:00".into(),
        replies: vec![],
    }];
    h.indexer.index(&[long_post]).await.unwrap();
    assert!(h.store.chunk_count().await.unwrap() > 1);

    let hits = h
        .retrieval
        .retrieve("러스트 소유권 수명 정리", 5, None)
        .await
        .unwrap();
    let mut keys: Vec<(String, String)> = hits
        .iter()
        .map(|hit| (hit.post.gallery_id.clone(), hit.post.id.clone()))
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), hits.len());
}

#[tokio::test]
async fn gallery_scope_filters_hits() {
    let h = harness().await;
    let posts = vec![
        post("eldenring", "30", "보스 공략", "말레니아 공략은 패턴 암기가 전부다."),
        post("programming", "31", "보스 공략?", "레거시 코드라는 보스를 공략하는 법."),
    ];
    h.indexer.index(&posts).await.unwrap();

    let hits = h
        .retrieval
        .retrieve("보스 공략", 5, Some("programming"))
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|hit| hit.post.gallery_id == "programming"));
}

#[tokio::test]
async fn empty_index_returns_no_hits() {
    let h = harness().await;
    let hits = h.retrieval.retrieve("아무 검색어", 5, None).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn purge_removes_a_gallery_completely() {
    let h = harness().await;
    let posts = vec![
        post("eldenring", "40", "공략", "루엔 학살자 상대로는 회피 타이밍이 중요하다."),
        post("programming", "41", "질문", "트레이트 객체와 제네릭 중 무엇을 쓸지 고민된다."),
    ];
    h.indexer.index(&posts).await.unwrap();

    let deleted = h.store.purge_gallery("eldenring").await.unwrap();
    assert!(deleted > 0);
    assert_eq!(
        h.store.list_galleries().await.unwrap(),
        vec!["programming".to_string()]
    );

    let hits = h.retrieval.retrieve("회피 타이밍", 5, None).await.unwrap();
    assert!(hits.iter().all(|hit| hit.post.gallery_id != "eldenring"));
}

#[tokio::test]
async fn crawl_log_round_trips() {
    let h = harness().await;
    assert!(h.store.last_crawled("eldenring").await.unwrap().is_none());
    h.store.record_crawl("eldenring").await.unwrap();
    let at = h.store.last_crawled("eldenring").await.unwrap().unwrap();
    let age = chrono::Utc::now().signed_duration_since(at);
    assert!(age.num_seconds() < 60);
}
