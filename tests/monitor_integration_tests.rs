use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use subwatch::monitor::Monitor;
use subwatch::notify::{DiscordMessenger, Dispatcher};
use subwatch::source::fetcher::RedditFetcher;
use subwatch::storage::{FilterStore, ListingCache, SqliteFilterStore};

use test_data::*;

/// Integration tests for the complete monitoring workflow: listing fetch,
/// keyword matching, cursor persistence, and Discord DM delivery.

async fn store_in(dir: &TempDir) -> SqliteFilterStore {
    SqliteFilterStore::open(dir.path().join("subwatch.db"))
        .await
        .unwrap()
}

fn build_monitor(
    store: SqliteFilterStore,
    reddit: &MockServer,
    discord: &MockServer,
    cache_ttl: Duration,
) -> Monitor {
    let fetcher = RedditFetcher::new(reddit.uri())
        .with_timeout(Duration::from_secs(5))
        .with_rate_limit_backoff(Duration::from_millis(10));
    let messenger = DiscordMessenger::new(discord.uri(), "test-token");
    let dispatcher = Dispatcher::new(
        Arc::new(messenger),
        Url::parse("https://reddit.com").unwrap(),
    );

    Monitor::new(
        Arc::new(store),
        Arc::new(fetcher),
        dispatcher,
        ListingCache::new(8, cache_ttl),
        Duration::from_secs(120),
        100,
    )
}

#[tokio::test]
async fn test_match_delivers_discord_dm() {
    let reddit = MockServer::start().await;
    let discord = MockServer::start().await;

    let page = listing_body(vec![
        listing_post(
            "c2",
            "Interest check results",
            "/r/mechmarket/comments/c2/ic_results/",
            1_700_000_200,
        ),
        listing_post(
            "c1",
            "GMK Olivia groupbuy opens",
            "/r/mechmarket/comments/c1/gmk_olivia/",
            1_700_000_100,
        ),
    ]);

    Mock::given(method("GET"))
        .and(path("/r/mechmarket/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .expect(1)
        .mount(&reddit)
        .await;

    Mock::given(method("POST"))
        .and(path("/users/@me/channels"))
        .and(header("Authorization", "Bot test-token"))
        .and(body_json(json!({"recipient_id": "100"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "9001"})))
        .expect(1)
        .mount(&discord)
        .await;

    Mock::given(method("POST"))
        .and(path("/channels/9001/messages"))
        .and(body_json(json!({
            "content": "Match found: GMK Olivia groupbuy opens\nhttps://reddit.com/r/mechmarket/comments/c1/gmk_olivia/"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
        .expect(1)
        .mount(&discord)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = store_in(&temp_dir).await;
    store
        .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
        .await
        .unwrap();

    let monitor = build_monitor(store.clone(), &reddit, &discord, Duration::from_secs(60));

    let stats = monitor.run_cycle().await;
    assert_eq!(stats.sources_polled, 1);
    assert_eq!(stats.sources_failed, 0);
    assert_eq!(stats.matches, 1);
    assert_eq!(stats.notifications_sent, 1);

    // The cursor lands on the newest post of the page, match or not.
    let subs = store.subscriptions_for_user("100").await.unwrap();
    assert_eq!(
        subs[0].filters[0].last_seen_at,
        Some(Utc.timestamp_opt(1_700_000_200, 0).unwrap())
    );

    // A second cycle sees nothing unseen and sends nothing; the mock
    // expectations above hold the counts at one.
    let stats = monitor.run_cycle().await;
    assert_eq!(stats.notifications_sent, 0);
}

#[tokio::test]
async fn test_second_page_only_new_posts_notify() {
    let reddit = MockServer::start().await;
    let discord = MockServer::start().await;

    let first_page = listing_body(vec![
        listing_post(
            "p2",
            "Interest check results",
            "/r/mechmarket/comments/p2/ic/",
            1_700_000_200,
        ),
        listing_post(
            "p1",
            "GMK Olivia groupbuy opens",
            "/r/mechmarket/comments/p1/olivia/",
            1_700_000_100,
        ),
    ]);
    let second_page = listing_body(vec![
        listing_post(
            "p3",
            "GMK Dots restock announced",
            "/r/mechmarket/comments/p3/dots/",
            1_700_000_300,
        ),
        listing_post(
            "p2",
            "Interest check results",
            "/r/mechmarket/comments/p2/ic/",
            1_700_000_200,
        ),
    ]);

    Mock::given(method("GET"))
        .and(path("/r/mechmarket/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(first_page))
        .up_to_n_times(1)
        .mount(&reddit)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/mechmarket/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(second_page))
        .mount(&reddit)
        .await;

    Mock::given(method("POST"))
        .and(path("/users/@me/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "9001"})))
        .mount(&discord)
        .await;
    Mock::given(method("POST"))
        .and(path("/channels/9001/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m"})))
        .expect(2)
        .mount(&discord)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = store_in(&temp_dir).await;
    store
        .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
        .await
        .unwrap();

    // Short cache lifetime so the second cycle refetches.
    let monitor = build_monitor(store.clone(), &reddit, &discord, Duration::from_millis(10));

    let stats = monitor.run_cycle().await;
    assert_eq!(stats.notifications_sent, 1);

    tokio::time::sleep(Duration::from_millis(30)).await;

    let stats = monitor.run_cycle().await;
    assert_eq!(stats.notifications_sent, 1);

    let requests = discord.received_requests().await.unwrap();
    let contents: Vec<String> = requests
        .iter()
        .filter(|r| r.url.path().ends_with("/messages"))
        .map(|r| {
            serde_json::from_slice::<Value>(&r.body).unwrap()["content"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(contents.len(), 2);
    assert!(contents[0].starts_with("Match found: GMK Olivia groupbuy opens"));
    assert!(contents[1].starts_with("Match found: GMK Dots restock announced"));

    let subs = store.subscriptions_for_user("100").await.unwrap();
    assert_eq!(
        subs[0].filters[0].last_seen_at,
        Some(Utc.timestamp_opt(1_700_000_300, 0).unwrap())
    );
}

#[tokio::test]
async fn test_failing_source_isolated() {
    let reddit = MockServer::start().await;
    let discord = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/broken/new.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&reddit)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/gear/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_body(vec![
            listing_post("g1", "Widget sale today", "/r/gear/comments/g1/widget/", 1_700_000_000),
        ])))
        .mount(&reddit)
        .await;

    Mock::given(method("POST"))
        .and(path("/users/@me/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "9001"})))
        .mount(&discord)
        .await;
    Mock::given(method("POST"))
        .and(path("/channels/9001/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m"})))
        .expect(1)
        .mount(&discord)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = store_in(&temp_dir).await;
    store
        .upsert_filter("100", "alice", "broken", "stuff", "widget")
        .await
        .unwrap();
    store
        .upsert_filter("100", "alice", "gear", "deals", "widget")
        .await
        .unwrap();

    let monitor = build_monitor(store.clone(), &reddit, &discord, Duration::from_secs(60));

    let stats = monitor.run_cycle().await;
    assert_eq!(stats.sources_polled, 2);
    assert_eq!(stats.sources_failed, 1);
    assert_eq!(stats.notifications_sent, 1);
}

#[tokio::test]
async fn test_rate_limited_fetch_retries_and_notifies() {
    let reddit = MockServer::start().await;
    let discord = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/mechmarket/new.json"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&reddit)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/mechmarket/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_body(vec![
            listing_post("r1", "GMK restock", "/r/mechmarket/comments/r1/restock/", 1_700_000_000),
        ])))
        .expect(1)
        .mount(&reddit)
        .await;

    Mock::given(method("POST"))
        .and(path("/users/@me/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "9001"})))
        .mount(&discord)
        .await;
    Mock::given(method("POST"))
        .and(path("/channels/9001/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m"})))
        .expect(1)
        .mount(&discord)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = store_in(&temp_dir).await;
    store
        .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
        .await
        .unwrap();

    let monitor = build_monitor(store.clone(), &reddit, &discord, Duration::from_secs(60));

    let stats = monitor.run_cycle().await;
    assert_eq!(stats.sources_failed, 0);
    assert_eq!(stats.notifications_sent, 1);
}

#[tokio::test]
async fn test_malformed_listing_counts_as_source_failure() {
    let reddit = MockServer::start().await;
    let discord = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/mechmarket/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MALFORMED_LISTING))
        .mount(&reddit)
        .await;

    Mock::given(method("POST"))
        .and(path("/users/@me/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "9001"})))
        .expect(0)
        .mount(&discord)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = store_in(&temp_dir).await;
    store
        .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
        .await
        .unwrap();

    let monitor = build_monitor(store.clone(), &reddit, &discord, Duration::from_secs(60));

    let stats = monitor.run_cycle().await;
    assert_eq!(stats.sources_failed, 1);
    assert_eq!(stats.notifications_sent, 0);

    // Nothing was marked seen, so the posts are still eligible once the
    // source recovers.
    let subs = store.subscriptions_for_user("100").await.unwrap();
    assert!(subs[0].filters[0].last_seen_at.is_none());
}

#[tokio::test]
async fn test_two_watchers_notified_on_own_channels() {
    let reddit = MockServer::start().await;
    let discord = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/r/mechmarket/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_body(vec![
            listing_post("d1", "GMK Dots second run", "/r/mechmarket/comments/d1/dots/", 1_700_000_000),
        ])))
        .mount(&reddit)
        .await;

    Mock::given(method("POST"))
        .and(path("/users/@me/channels"))
        .and(body_json(json!({"recipient_id": "100"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "111"})))
        .expect(1)
        .mount(&discord)
        .await;
    Mock::given(method("POST"))
        .and(path("/users/@me/channels"))
        .and(body_json(json!({"recipient_id": "200"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "222"})))
        .expect(1)
        .mount(&discord)
        .await;

    Mock::given(method("POST"))
        .and(path("/channels/111/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m"})))
        .expect(1)
        .mount(&discord)
        .await;
    Mock::given(method("POST"))
        .and(path("/channels/222/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m"})))
        .expect(1)
        .mount(&discord)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let store = store_in(&temp_dir).await;
    store
        .upsert_filter("100", "alice", "mechmarket", "keycaps", "gmk")
        .await
        .unwrap();
    store
        .upsert_filter("200", "bob", "mechmarket", "caps", "gmk")
        .await
        .unwrap();

    let monitor = build_monitor(store.clone(), &reddit, &discord, Duration::from_secs(60));

    let stats = monitor.run_cycle().await;
    assert_eq!(stats.notifications_sent, 2);
    assert_eq!(stats.delivery_failures, 0);
}
