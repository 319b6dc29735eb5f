//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the listing API and drive full crawls
//! end-to-end against the in-memory store.

use crate::common::{
    comments_page, listing, more_stub, permalink, post, raw_comment, raw_post, test_config,
    FaultyStore, SUBREDDIT,
};
use serde_json::Value;
use std::time::{Duration, Instant};
use subreddit_harvester::config::SortMode;
use subreddit_harvester::crawler::{CrawlOperation, Crawler, Scheduler, TransportError};
use subreddit_harvester::storage::{ChangeFilter, MemoryStore, Store};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING_PATH: &str = "/r/rust/new.json";

fn listing_of(ids: &[&str], after: Option<&str>) -> Value {
    let children = ids
        .iter()
        .enumerate()
        .map(|(i, id)| raw_post(id, 10, -(i as i64) * 60))
        .collect();
    listing(children, after)
}

async fn mount_listing(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn memory_crawler(server: &MockServer) -> Crawler<MemoryStore> {
    Crawler::new(test_config(&server.uri()), MemoryStore::new())
        .expect("Failed to build crawler")
}

#[tokio::test]
async fn test_crawl_without_comments_inserts_every_post() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, listing_of(&["a1", "a2", "a3"], None)).await;

    let mut crawler = memory_crawler(&mock_server);
    let result = crawler
        .crawl(SUBREDDIT, 100, false, false)
        .await
        .expect("Crawl should run");

    assert_eq!(result.posts_fetched, 3);
    assert_eq!(result.posts_inserted, 3);
    assert_eq!(result.posts_updated, 0);
    assert_eq!(result.comments_fetched, 0);
    assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors);
    assert!(!result.interrupted);

    let state = crawler
        .store()
        .get_crawl_state(SUBREDDIT)
        .unwrap()
        .expect("Crawl state should be saved");
    assert!(state.is_complete);
    assert_eq!(state.posts_crawled, 3);
    assert_eq!(state.after_token, None);

    let stored = crawler.store().get_post("a2").unwrap().expect("Post stored");
    assert_eq!(stored.title, "Post a2");
    assert_eq!(stored.permalink, permalink("a2"));
}

#[tokio::test]
async fn test_recrawl_detects_score_change() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, listing_of(&["a1", "a2", "a3"], None)).await;

    let mut crawler = memory_crawler(&mock_server);
    crawler.crawl(SUBREDDIT, 100, false, false).await.unwrap();
    let first_seen = crawler.store().get_post("a2").unwrap().unwrap().first_seen;

    mock_server.reset().await;
    let children = vec![
        raw_post("a1", 10, 0),
        raw_post("a2", 42, -60),
        raw_post("a3", 10, -120),
    ];
    mount_listing(&mock_server, listing(children, None)).await;

    let result = crawler.crawl(SUBREDDIT, 100, false, false).await.unwrap();
    assert_eq!(result.posts_fetched, 3);
    assert_eq!(result.posts_inserted, 0);
    assert_eq!(result.posts_updated, 1);

    let changes = crawler.store().get_changes(&ChangeFilter::default()).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].content_id, "a2");
    assert_eq!(changes[0].old_value["score"], 10);
    assert_eq!(changes[0].new_value["score"], 42);

    let updated = crawler.store().get_post("a2").unwrap().unwrap();
    assert_eq!(updated.score, 42);
    assert_eq!(updated.first_seen, first_seen);
}

#[tokio::test]
async fn test_pager_follows_cursor_across_pages() {
    let mock_server = MockServer::start().await;

    let ids: Vec<String> = (0..237).map(|i| format!("p{}", i)).collect();
    let page = |range: std::ops::Range<usize>, after: Option<&str>| {
        let children = ids[range].iter().map(|id| raw_post(id, 1, 0)).collect();
        listing(children, after)
    };

    // Cursor-specific pages are mounted first so they win over the bare listing
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("after", "t3_p99"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(100..200, Some("t3_p199"))))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("after", "t3_p199"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(200..237, None)))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("limit", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(0..100, Some("t3_p99"))))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = memory_crawler(&mock_server);
    let mut pager = crawler.fetch_posts(SUBREDDIT, 1000, SortMode::New);

    let mut seen = Vec::new();
    while let Some(post) = pager.next().await {
        seen.push(post.post_id);
    }

    assert_eq!(seen.len(), 237);
    assert_eq!(seen.first().map(String::as_str), Some("p0"));
    assert_eq!(seen.last().map(String::as_str), Some("p236"));
    assert_eq!(pager.pages_fetched(), 3);
    assert!(pager.error().is_none());
}

#[tokio::test]
async fn test_pager_sizes_last_request_to_remaining_need() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("limit", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(listing_of(&["a1", "a2"], Some("t3_a2"))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = memory_crawler(&mock_server);
    let mut pager = crawler.fetch_posts(SUBREDDIT, 2, SortMode::New);
    assert!(pager.next().await.is_some());
    assert!(pager.next().await.is_some());
    assert!(pager.next().await.is_none());
    assert_eq!(pager.pages_fetched(), 1);
}

#[tokio::test]
async fn test_top_sort_sends_time_filter() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/rust/top.json"))
        .and(query_param("t", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_of(&["a1"], None)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = memory_crawler(&mock_server);
    let mut pager = crawler.fetch_posts(SUBREDDIT, 10, SortMode::Top);
    assert_eq!(pager.next().await.map(|p| p.post_id), Some("a1".to_string()));
    assert!(pager.next().await.is_none());
}

#[tokio::test]
async fn test_rate_limit_honors_retry_after() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_listing(&mock_server, listing_of(&["a1"], None)).await;

    let crawler = memory_crawler(&mock_server);
    let url = format!("{}{}", mock_server.uri(), LISTING_PATH);

    let start = Instant::now();
    let response = crawler.transport().get(&url, &[]).await;
    let elapsed = start.elapsed();

    assert!(response.is_success());
    assert!(response.json.is_some());
    assert!(elapsed >= Duration::from_secs(1), "retried after {:?}", elapsed);

    let stats = crawler.transport().stats();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.successful, 1);
}

#[tokio::test]
async fn test_server_errors_exhaust_attempt_budget() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let crawler = memory_crawler(&mock_server);
    let url = format!("{}{}", mock_server.uri(), LISTING_PATH);
    let response = crawler.transport().get(&url, &[]).await;

    assert!(!response.is_success());
    assert_eq!(response.error, Some(TransportError::Server { status: 503 }));
    assert_eq!(crawler.transport().stats().failed, 1);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut crawler = memory_crawler(&mock_server);
    let result = crawler.crawl(SUBREDDIT, 10, false, false).await.unwrap();

    assert_eq!(result.posts_fetched, 0);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].operation, CrawlOperation::FetchListing);
    assert_eq!(result.errors[0].item_id, SUBREDDIT);
    assert!(!result.interrupted);
}

#[tokio::test]
async fn test_requests_are_paced() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, listing_of(&["a1"], None)).await;

    let mut config = test_config(&mock_server.uri());
    config.http.request_delay = 0.2;
    let crawler = Crawler::new(config, MemoryStore::new()).unwrap();
    let url = format!("{}{}", mock_server.uri(), LISTING_PATH);

    let start = Instant::now();
    crawler.transport().get(&url, &[]).await;
    crawler.transport().get(&url, &[]).await;
    crawler.transport().get(&url, &[]).await;

    assert!(start.elapsed() >= Duration::from_millis(400));
    assert_eq!(crawler.transport().rate_limiter().request_count(), 3);
}

#[tokio::test]
async fn test_crawl_with_comments_stores_tree() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, listing_of(&["a1"], None)).await;

    let reply = raw_comment("c2", "t1_c1", "a reply", 3, 120, None);
    let tree = vec![
        raw_comment("c1", "t3_a1", "top level", 7, 60, Some(listing(vec![reply], None))),
        raw_comment("c3", "t3_a1", "second top level", 1, 180, None),
        more_stub(&["c4", "c5"]),
    ];
    Mock::given(method("GET"))
        .and(path(format!("{}.json", permalink("a1"))))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(comments_page(raw_post("a1", 10, 0), tree)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut crawler = memory_crawler(&mock_server);
    let result = crawler.crawl(SUBREDDIT, 10, true, false).await.unwrap();

    assert_eq!(result.posts_inserted, 1);
    assert_eq!(result.comments_fetched, 3);
    assert_eq!(result.comments_inserted, 3);
    assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors);

    let reply = crawler.store().get_comment("c2").unwrap().expect("Reply stored");
    assert_eq!(reply.parent_id, "c1");
    assert_eq!(reply.depth, 1);
    assert_eq!(reply.post_id, "a1");

    let thread = crawler.store().get_comment_thread("a1").unwrap();
    let top: Vec<_> = thread.iter().map(|c| c.comment_id.as_str()).collect();
    assert_eq!(top, vec!["c1", "c3"]);

    let post = crawler.store().get_post("a1").unwrap().unwrap();
    let mut registered = post.comment_ids.clone();
    registered.sort();
    assert_eq!(registered, vec!["c1", "c2", "c3"]);
    assert!(post.comments_fetched_at.is_some());

    let state = crawler.store().get_crawl_state(SUBREDDIT).unwrap().unwrap();
    assert_eq!(state.comments_crawled, 3);
}

#[tokio::test]
async fn test_failed_comment_fetch_is_recorded() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, listing_of(&["a1", "a2"], None)).await;
    Mock::given(method("GET"))
        .and(path(format!("{}.json", permalink("a1"))))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}.json", permalink("a2"))))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(comments_page(raw_post("a2", 10, 0), vec![])),
        )
        .mount(&mock_server)
        .await;

    let mut crawler = memory_crawler(&mock_server);
    let result = crawler.crawl(SUBREDDIT, 10, true, false).await.unwrap();

    assert_eq!(result.posts_inserted, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].operation, CrawlOperation::FetchComments);
    assert_eq!(result.errors[0].item_id, "a1");
}

#[tokio::test]
async fn test_fetch_comments_sends_limit_and_depth() {
    let mock_server = MockServer::start().await;
    let tree = vec![
        raw_comment("c1", "t3_a1", "first", 2, 60, None),
        raw_comment("c2", "t3_a1", "second", 1, 120, None),
    ];
    Mock::given(method("GET"))
        .and(path(format!("{}.json", permalink("a1"))))
        .and(query_param("limit", "50"))
        .and(query_param("depth", "4"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(comments_page(raw_post("a1", 10, 0), tree)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_config(&mock_server.uri());
    config.comments.max_per_post = 50;
    config.comments.max_depth = 4;
    let crawler = Crawler::new(config, MemoryStore::new()).unwrap();

    let comments = crawler.fetch_comments(&post("a1", 10)).await;
    let ids: Vec<_> = comments.iter().map(|c| c.comment_id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    assert!(comments.iter().all(|c| c.post_id == "a1"));
}

#[tokio::test]
async fn test_fetch_comments_returns_empty_on_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}.json", permalink("a1"))))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = memory_crawler(&mock_server);
    assert!(crawler.fetch_comments(&post("a1", 10)).await.is_empty());
}

#[tokio::test]
async fn test_unreachable_store_aborts_before_fetching() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_of(&["a1"], None)))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = FaultyStore {
        unreachable: true,
        ..Default::default()
    };
    let mut crawler = Crawler::new(test_config(&mock_server.uri()), store).unwrap();

    let err = crawler
        .crawl(SUBREDDIT, 10, false, false)
        .await
        .expect_err("Crawl should fail");
    assert!(matches!(err, subreddit_harvester::HarvestError::FatalInit(_)));
}

#[tokio::test]
async fn test_post_upsert_failure_does_not_stop_crawl() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, listing_of(&["a1", "a2", "a3"], None)).await;

    let store = FaultyStore {
        failing_posts: vec!["a2".to_string()],
        ..Default::default()
    };
    let mut crawler = Crawler::new(test_config(&mock_server.uri()), store).unwrap();
    let result = crawler.crawl(SUBREDDIT, 10, false, false).await.unwrap();

    assert_eq!(result.posts_fetched, 3);
    assert_eq!(result.posts_inserted, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].operation, CrawlOperation::UpsertPost);
    assert_eq!(result.errors[0].item_id, "a2");
    assert!(crawler.store().get_post("a3").unwrap().is_some());
}

#[tokio::test]
async fn test_checkpoints_follow_processed_posts() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("after", "t3_a3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_of(&["a4", "a5"], None)))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_listing(&mock_server, listing_of(&["a1", "a2", "a3"], Some("t3_a3"))).await;

    let mut config = test_config(&mock_server.uri());
    config.crawler.checkpoint_every = 2;
    let store = FaultyStore {
        failing_posts: vec!["a2".to_string()],
        ..Default::default()
    };
    let mut crawler = Crawler::new(config, store).unwrap();
    let result = crawler.crawl(SUBREDDIT, 10, false, false).await.unwrap();

    assert_eq!(result.posts_fetched, 5);
    assert_eq!(result.errors.len(), 1);

    let saves = &crawler.store().saves;
    let counts: Vec<_> = saves.iter().map(|s| s.posts_crawled).collect();
    assert_eq!(counts, vec![0, 2, 4, 5]);

    assert_eq!(saves[1].last_post_id.as_deref(), Some("a2"));
    assert_eq!(saves[1].after_token.as_deref(), Some("t3_a3"));
    assert!(!saves[1].is_complete);

    assert_eq!(saves[2].last_post_id.as_deref(), Some("a4"));
    assert_eq!(saves[2].after_token, None);

    assert_eq!(saves[3].last_post_id.as_deref(), Some("a5"));
    assert!(saves[3].is_complete);
}

#[tokio::test]
async fn test_interrupt_mid_crawl_saves_progress() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, listing_of(&["a1", "a2", "a3", "a4"], None)).await;

    let mut crawler =
        Crawler::new(test_config(&mock_server.uri()), FaultyStore::default()).unwrap();
    let token = crawler.cancellation_token();
    crawler.store_mut().cancel_on = Some(("a2".to_string(), token));

    let result = crawler.crawl(SUBREDDIT, 10, false, false).await.unwrap();

    assert!(result.interrupted);
    assert_eq!(result.posts_fetched, 2);
    assert_eq!(
        result.errors.last().map(|e| e.operation),
        Some(CrawlOperation::Interrupted)
    );
    assert!(crawler.store().get_post("a3").unwrap().is_none());

    let state = crawler.store().get_crawl_state(SUBREDDIT).unwrap().unwrap();
    assert_eq!(state.posts_crawled, 2);
    assert_eq!(state.last_post_id.as_deref(), Some("a2"));
    assert!(!state.is_complete);
}

#[tokio::test]
async fn test_crawl_after_interrupt_runs_to_completion() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, listing_of(&["a1", "a2", "a3"], None)).await;

    let mut crawler = memory_crawler(&mock_server);
    crawler.cancellation_token().cancel();
    let first = crawler.crawl(SUBREDDIT, 10, false, false).await.unwrap();
    assert!(first.interrupted);
    assert_eq!(first.posts_fetched, 0);

    let second = crawler.crawl(SUBREDDIT, 10, false, false).await.unwrap();
    assert!(!second.interrupted);
    assert_eq!(second.posts_fetched, 3);
    assert!(second.errors.is_empty(), "unexpected errors: {:?}", second.errors);

    let state = crawler.store().get_crawl_state(SUBREDDIT).unwrap().unwrap();
    assert!(state.is_complete);
}

#[tokio::test]
async fn test_resume_keeps_original_start_time() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, listing_of(&["a1"], None)).await;

    let mut crawler = memory_crawler(&mock_server);
    crawler.crawl(SUBREDDIT, 10, false, false).await.unwrap();
    let first = crawler.store().get_crawl_state(SUBREDDIT).unwrap().unwrap();

    let result = crawler.crawl(SUBREDDIT, 10, false, true).await.unwrap();
    assert_eq!(result.posts_fetched, 1);

    let resumed = crawler.store().get_crawl_state(SUBREDDIT).unwrap().unwrap();
    assert_eq!(resumed.started_at, first.started_at);
    assert!(resumed.last_activity >= first.last_activity);
    assert!(resumed.is_complete);

    assert!(crawler.reset_crawl_state(SUBREDDIT).unwrap());
    assert!(!crawler.reset_crawl_state(SUBREDDIT).unwrap());
}

#[tokio::test]
async fn test_scheduler_stops_from_another_task() {
    let mock_server = MockServer::start().await;
    mount_listing(&mock_server, listing_of(&["a1"], None)).await;
    Mock::given(method("GET"))
        .and(path(format!("{}.json", permalink("a1"))))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(comments_page(raw_post("a1", 10, 0), vec![])),
        )
        .mount(&mock_server)
        .await;

    let crawler = memory_crawler(&mock_server);
    let mut scheduler = Scheduler::new(crawler, Duration::from_secs(3600));
    let handle = scheduler.handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.stop();
    });

    tokio::time::timeout(Duration::from_secs(10), scheduler.start(SUBREDDIT, 10))
        .await
        .expect("Scheduler should stop well before its interval");

    assert_eq!(scheduler.cycles(), 1);
    assert!(!scheduler.is_running());

    let crawler = scheduler.into_crawler();
    assert!(crawler.store().get_post("a1").unwrap().is_some());
}
