//! Behavior every store backend must share
//!
//! Each test runs the same assertions against the SQLite store and the in-memory store.

use crate::common::{backends, comment, post, post_created, BASE_CREATED, SUBREDDIT};
use chrono::{TimeZone, Utc};
use subreddit_harvester::model::{ContentType, CrawlState, UpsertAction, CHANGE_CONTENT_UPDATED};
use subreddit_harvester::storage::{ChangeFilter, CommentFilter, PostFilter, PostSort, Store};

fn for_each_backend(check: impl Fn(&str, &mut dyn Store)) {
    for (name, mut store) in backends() {
        check(name, store.as_mut());
    }
}

fn ids<T>(items: &[T], id: impl Fn(&T) -> &str) -> Vec<String> {
    items.iter().map(|item| id(item).to_string()).collect()
}

#[test]
fn test_post_upsert_lifecycle() {
    for_each_backend(|name, store| {
        let outcome = store.upsert_post(&post("a1", 10));
        assert_eq!(outcome.action, UpsertAction::Inserted, "{}", name);
        assert!(outcome.changed, "{}", name);
        let inserted = store.get_post("a1").unwrap().unwrap();

        let outcome = store.upsert_post(&post("a1", 10));
        assert_eq!(outcome.action, UpsertAction::Unchanged, "{}", name);
        assert!(!outcome.changed, "{}", name);
        let touched = store.get_post("a1").unwrap().unwrap();
        assert!(touched.last_updated >= inserted.last_updated, "{}", name);
        assert!(store.get_changes(&ChangeFilter::default()).unwrap().is_empty(), "{}", name);

        let outcome = store.upsert_post(&post("a1", 11));
        assert_eq!(outcome.action, UpsertAction::Updated, "{}", name);
        assert!(outcome.changed, "{}", name);

        let updated = store.get_post("a1").unwrap().unwrap();
        assert_eq!(updated.score, 11, "{}", name);
        assert_eq!(updated.first_seen, inserted.first_seen, "{}", name);
        assert_ne!(updated.content_hash, inserted.content_hash, "{}", name);

        let changes = store.get_changes(&ChangeFilter::default()).unwrap();
        assert_eq!(changes.len(), 1, "{}", name);
        assert_eq!(changes[0].content_type, ContentType::Post, "{}", name);
        assert_eq!(changes[0].content_id, "a1", "{}", name);
        assert_eq!(changes[0].change_type, CHANGE_CONTENT_UPDATED, "{}", name);
        assert_eq!(changes[0].old_value["score"], 10, "{}", name);
        assert_eq!(changes[0].new_value["score"], 11, "{}", name);

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.posts_inserted, 1, "{}", name);
        assert_eq!(stats.posts_updated, 1, "{}", name);
        assert_eq!(stats.changes_logged, 1, "{}", name);
        assert_eq!(stats.total_posts, 1, "{}", name);
        assert_eq!(stats.total_changes, 1, "{}", name);

        store.reset_stats();
        let stats = store.get_stats().unwrap();
        assert_eq!(stats.posts_inserted, 0, "{}", name);
        assert_eq!(stats.changes_logged, 0, "{}", name);
        assert_eq!(stats.total_posts, 1, "{}", name);
    });
}

#[test]
fn test_missing_records_are_none() {
    for_each_backend(|name, store| {
        assert!(store.ping().is_ok(), "{}", name);
        assert!(store.get_post("nope").unwrap().is_none(), "{}", name);
        assert!(store.get_comment("nope").unwrap().is_none(), "{}", name);
        assert!(store.get_crawl_state(SUBREDDIT).unwrap().is_none(), "{}", name);
        assert!(store.get_comments_for_post("nope").unwrap().is_empty(), "{}", name);
    });
}

#[test]
fn test_comment_registration() {
    for_each_backend(|name, store| {
        store.upsert_post(&post("a1", 10));

        let c1 = comment("c1", "a1", "a1", 0, 1, 60);
        assert_eq!(store.upsert_comment(&c1).action, UpsertAction::Inserted, "{}", name);
        assert_eq!(store.upsert_comment(&c1).action, UpsertAction::Unchanged, "{}", name);

        let registered = store.get_post("a1").unwrap().unwrap();
        assert_eq!(registered.comment_ids, vec!["c1".to_string()], "{}", name);
        assert!(registered.comments_fetched_at.is_some(), "{}", name);

        // A post update keeps the registered comments
        store.upsert_post(&post("a1", 99));
        let updated = store.get_post("a1").unwrap().unwrap();
        assert_eq!(updated.comment_ids, vec!["c1".to_string()], "{}", name);
        assert_eq!(updated.comments_fetched_at, registered.comments_fetched_at, "{}", name);

        // Orphans are stored without a post to register against
        let orphan = comment("c9", "missing", "missing", 0, 1, 60);
        assert_eq!(store.upsert_comment(&orphan).action, UpsertAction::Inserted, "{}", name);
        assert!(store.get_post("missing").unwrap().is_none(), "{}", name);

        let mut edited = c1.clone();
        edited.body = "Comment c1, edited".to_string();
        edited.content_hash = "changed".to_string();
        assert_eq!(store.upsert_comment(&edited).action, UpsertAction::Updated, "{}", name);

        let changes = store
            .get_changes(&ChangeFilter {
                content_type: Some(ContentType::Comment),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(&changes, |c| c.content_id.as_str()), vec!["c1"], "{}", name);

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.comments_inserted, 2, "{}", name);
        assert_eq!(stats.comments_updated, 1, "{}", name);
        assert_eq!(stats.total_comments, 2, "{}", name);
    });
}

#[test]
fn test_comment_queries() {
    for_each_backend(|name, store| {
        store.upsert_post(&post("a1", 10));
        store.upsert_comment(&comment("c1", "a1", "a1", 0, 1, 60));
        store.upsert_comment(&comment("c2", "a1", "c1", 1, 2, 30));
        store.upsert_comment(&comment("c3", "a1", "a1", 0, 9, 90));

        let all = store.get_comments_for_post("a1").unwrap();
        assert_eq!(ids(&all, |c| c.comment_id.as_str()), vec!["c2", "c1", "c3"], "{}", name);

        let top = store.get_comment_thread("a1").unwrap();
        assert_eq!(ids(&top, |c| c.comment_id.as_str()), vec!["c1", "c3"], "{}", name);
        let replies = store.get_comment_thread("c1").unwrap();
        assert_eq!(ids(&replies, |c| c.comment_id.as_str()), vec!["c2"], "{}", name);

        let shallow = store
            .get_comments(&CommentFilter {
                max_depth: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(&shallow, |c| c.comment_id.as_str()), vec!["c3", "c1"], "{}", name);

        let popular = store
            .get_comments(&CommentFilter {
                min_score: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(&popular, |c| c.comment_id.as_str()), vec!["c3", "c2"], "{}", name);

        let other = store
            .get_comments(&CommentFilter {
                subreddit: Some("other".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(other.is_empty(), "{}", name);

        let found = store.search_comments("COMMENT C", 10).unwrap();
        assert_eq!(ids(&found, |c| c.comment_id.as_str()), vec!["c3", "c2", "c1"], "{}", name);
    });
}

#[test]
fn test_post_queries() {
    for_each_backend(|name, store| {
        store.upsert_post(&post_created("b1", 5, 0));
        store.upsert_post(&post_created("b2", 50, 100));
        store.upsert_post(&post_created("b3", 20, 200));

        let newest = store.get_posts(&PostFilter::default()).unwrap();
        assert_eq!(ids(&newest, |p| p.post_id.as_str()), vec!["b3", "b2", "b1"], "{}", name);

        let by_score = store
            .get_posts(&PostFilter {
                sort: PostSort::Score,
                descending: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(&by_score, |p| p.post_id.as_str()), vec!["b1", "b3", "b2"], "{}", name);

        let popular = store
            .get_posts(&PostFilter {
                min_score: Some(10),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(&popular, |p| p.post_id.as_str()), vec!["b3", "b2"], "{}", name);

        let window = store
            .get_posts(&PostFilter {
                since: Utc.timestamp_opt(BASE_CREATED + 100, 0).single(),
                until: Utc.timestamp_opt(BASE_CREATED + 150, 0).single(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(&window, |p| p.post_id.as_str()), vec!["b2"], "{}", name);

        let paged = store
            .get_posts(&PostFilter {
                limit: Some(1),
                offset: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ids(&paged, |p| p.post_id.as_str()), vec!["b2"], "{}", name);

        let other = store
            .get_posts(&PostFilter {
                subreddit: Some("other".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(other.is_empty(), "{}", name);
    });
}

#[test]
fn test_post_search() {
    for_each_backend(|name, store| {
        store.upsert_post(&post("b1", 5));
        store.upsert_post(&post("b2", 50));
        store.upsert_post(&post("b3", 20));

        let all = store.search_posts("POST B", 10).unwrap();
        assert_eq!(ids(&all, |p| p.post_id.as_str()), vec!["b2", "b3", "b1"], "{}", name);

        let body = store.search_posts("body of b1", 10).unwrap();
        assert_eq!(ids(&body, |p| p.post_id.as_str()), vec!["b1"], "{}", name);

        let limited = store.search_posts("post", 2).unwrap();
        assert_eq!(limited.len(), 2, "{}", name);

        assert!(store.search_posts("%", 10).unwrap().is_empty(), "{}", name);
        assert!(store.search_posts("_", 10).unwrap().is_empty(), "{}", name);
    });
}

#[test]
fn test_crawl_state_keeps_first_start() {
    for_each_backend(|name, store| {
        let started = Utc.timestamp_opt(BASE_CREATED, 0).unwrap();
        store.save_crawl_state(&CrawlState::new(SUBREDDIT, started)).unwrap();

        let later = Utc.timestamp_opt(BASE_CREATED + 3600, 0).unwrap();
        let mut state = CrawlState::new(SUBREDDIT, later);
        state.posts_crawled = 5;
        state.after_token = Some("t3_b5".to_string());
        state.is_complete = true;
        store.save_crawl_state(&state).unwrap();

        let stored = store.get_crawl_state(SUBREDDIT).unwrap().unwrap();
        assert_eq!(stored.started_at, started, "{}", name);
        assert_eq!(stored.last_activity, later, "{}", name);
        assert_eq!(stored.posts_crawled, 5, "{}", name);
        assert_eq!(stored.after_token.as_deref(), Some("t3_b5"), "{}", name);
        assert!(stored.is_complete, "{}", name);

        assert!(store.reset_crawl_state(SUBREDDIT).unwrap(), "{}", name);
        assert!(store.get_crawl_state(SUBREDDIT).unwrap().is_none(), "{}", name);
        assert!(!store.reset_crawl_state(SUBREDDIT).unwrap(), "{}", name);
    });
}

#[test]
fn test_changes_are_newest_first() {
    for_each_backend(|name, store| {
        store.upsert_post(&post("a1", 1));
        store.upsert_post(&post("a1", 2));
        store.upsert_post(&post("a1", 3));

        let changes = store.get_changes(&ChangeFilter::default()).unwrap();
        assert_eq!(changes.len(), 2, "{}", name);
        assert_eq!(changes[0].new_value["score"], 3, "{}", name);
        assert_eq!(changes[1].new_value["score"], 2, "{}", name);

        let limited = store
            .get_changes(&ChangeFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1, "{}", name);

        let comments_only = store
            .get_changes(&ChangeFilter {
                content_type: Some(ContentType::Comment),
                ..Default::default()
            })
            .unwrap();
        assert!(comments_only.is_empty(), "{}", name);
    });
}
