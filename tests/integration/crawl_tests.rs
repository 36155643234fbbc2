//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use trawl::config::{Config, TaskConfig};
use trawl::crawler::Mux;
use trawl::{
    normalize_url, Controller, Crawler, HttpClient, MemoryStore, OnceController, SqliteStore,
    UrlRecord, UrlStatus, UrlStore,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a configuration that crawls a local mock server quickly
fn create_test_config() -> Config {
    let mut config = Config::default();
    config.crawler.default_interval_ms = 1;
    config.crawler.retry_delay_ms = 10;
    config.crawler.max_retries = 2;
    config.client.timeout_secs = 5;
    config
}

fn create_crawler(
    config: Config,
    controller: Arc<dyn Controller>,
    store: Arc<dyn UrlStore>,
) -> Crawler {
    let client = Arc::new(HttpClient::new(&config.client).unwrap());
    Crawler::new(config, controller, store, client)
}

/// Runs a crawl to completion, failing the test if it hangs
async fn run(crawler: &Crawler) {
    tokio::time::timeout(Duration::from_secs(10), crawler.crawl())
        .await
        .expect("crawl did not finish")
        .unwrap();
}

fn loc(server: &MockServer, route: &str) -> String {
    normalize_url(&format!("{}{}", server.uri(), route))
        .unwrap()
        .to_string()
}

async fn mount_html(server: &MockServer, route: &str, body: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .expect(times)
        .mount(server)
        .await;
}

fn record(crawler: &Crawler, url: &str) -> UrlRecord {
    crawler
        .store()
        .get(url)
        .unwrap()
        .unwrap_or_else(|| panic!("{} is not in the store", url))
}

#[tokio::test]
async fn test_crawl_follows_links_once() {
    let mock_server = MockServer::start().await;

    mount_html(
        &mock_server,
        "/",
        r##"<html><body>
            <a href="/page1">One</a>
            <a href="/page2">Two</a>
            <a href="/page1#top">One again</a>
            <a href="/page2/">Two again</a>
            <a href="mailto:someone@example.com">Mail</a>
        </body></html>"##,
        1,
    )
    .await;
    mount_html(
        &mock_server,
        "/page1",
        r#"<html><body><a href="/">Home</a><a href="page2">Two</a></body></html>"#,
        1,
    )
    .await;
    mount_html(&mock_server, "/page2", "<html><body>Leaf</body></html>", 1).await;

    let crawler = create_crawler(
        create_test_config(),
        Arc::new(OnceController::default()),
        Arc::new(MemoryStore::new()),
    );
    let seed = loc(&mock_server, "/");
    assert_eq!(crawler.add_seeds([&seed, &seed]).await.unwrap(), 1);
    run(&crawler).await;

    let stats = crawler.stats().unwrap();
    assert_eq!(stats.known, 3);
    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.done, 3);

    let page1 = record(&crawler, &loc(&mock_server, "/page1"));
    assert_eq!(page1.depth, 1);
    assert_eq!(page1.visit_count, 1);
    assert_eq!(page1.status, UrlStatus::Fetched);
    assert!(page1.last_visit.is_some());
    assert!(page1.done);
}

#[tokio::test]
async fn test_failed_fetch_retried_then_retired() {
    let mock_server = MockServer::start().await;

    mount_html(
        &mock_server,
        "/",
        r#"<html><body><a href="/missing">Gone</a></body></html>"#,
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&mock_server)
        .await;

    let crawler = create_crawler(
        create_test_config(),
        Arc::new(OnceController::default()),
        Arc::new(MemoryStore::new()),
    );
    crawler.add_seeds([loc(&mock_server, "/")]).await.unwrap();
    run(&crawler).await;

    let missing = record(&crawler, &loc(&mock_server, "/missing"));
    assert_eq!(missing.status, UrlStatus::Error);
    assert_eq!(missing.error_count, 2);
    assert_eq!(missing.visit_count, 0);
    assert!(missing.done);

    let stats = crawler.stats().unwrap();
    assert_eq!(stats.known, 2);
    assert_eq!(stats.fetched, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.done, 2);
}

#[tokio::test]
async fn test_redirect_target_is_crawled() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/landing"))
        .mount(&mock_server)
        .await;
    mount_html(&mock_server, "/landing", "<html><body>Here</body></html>", 2).await;

    let crawler = create_crawler(
        create_test_config(),
        Arc::new(OnceController::default()),
        Arc::new(MemoryStore::new()),
    );
    crawler.add_seeds([loc(&mock_server, "/start")]).await.unwrap();
    run(&crawler).await;

    let start = record(&crawler, &loc(&mock_server, "/start"));
    assert_eq!(start.status, UrlStatus::Redirected);
    assert_eq!(start.visit_count, 1);
    assert!(start.done);

    let landing = record(&crawler, &loc(&mock_server, "/landing"));
    assert_eq!(landing.status, UrlStatus::Fetched);
    assert_eq!(landing.depth, 1);
    assert!(landing.done);
}

#[tokio::test]
async fn test_task_filters_and_depth() {
    let mock_server = MockServer::start().await;

    mount_html(
        &mock_server,
        "/",
        r#"<html><body>
            <a href="/d1">Deeper</a>
            <a href="/private/notes">Private</a>
            <a href="https://elsewhere.invalid/">Elsewhere</a>
        </body></html>"#,
        1,
    )
    .await;
    mount_html(
        &mock_server,
        "/d1",
        r#"<html><body><a href="/d2">Deepest</a></body></html>"#,
        1,
    )
    .await;
    mount_html(&mock_server, "/d2", "<html></html>", 0).await;
    mount_html(&mock_server, "/private/notes", "<html></html>", 0).await;

    let task = TaskConfig {
        seeds: vec![loc(&mock_server, "/")],
        allow: vec![format!("{}/*", mock_server.uri())],
        disallow: vec!["*/private/*".to_string()],
        max_depth: 1,
        revisit_secs: 0,
    };
    let controller = Arc::new(Mux::from_task(&task).unwrap());
    let crawler = create_crawler(
        create_test_config(),
        controller,
        Arc::new(MemoryStore::new()),
    );
    crawler.add_seeds(&task.seeds).await.unwrap();
    run(&crawler).await;

    let store = crawler.store();
    assert!(store.exist(&loc(&mock_server, "/d1")).unwrap());
    assert!(!store.exist(&loc(&mock_server, "/d2")).unwrap());
    assert!(!store.exist(&loc(&mock_server, "/private/notes")).unwrap());
    assert!(!store.exist("https://elsewhere.invalid/").unwrap());
    assert_eq!(crawler.stats().unwrap().done, 2);
}

#[tokio::test]
async fn test_cancelled_request_retired_without_error() {
    let mock_server = MockServer::start().await;

    mount_html(
        &mock_server,
        "/",
        r#"<html><body><a href="/skip">Skip me</a></body></html>"#,
        1,
    )
    .await;
    mount_html(&mock_server, "/skip", "<html></html>", 0).await;

    let mut mux = Mux::new();
    mux.allow("*").unwrap();
    mux.add_preparer("*/skip", |request| request.cancel())
        .unwrap();

    let crawler = create_crawler(
        create_test_config(),
        Arc::new(mux),
        Arc::new(MemoryStore::new()),
    );
    crawler.add_seeds([loc(&mock_server, "/")]).await.unwrap();
    run(&crawler).await;

    let skipped = record(&crawler, &loc(&mock_server, "/skip"));
    assert!(skipped.done);
    assert_eq!(skipped.visit_count, 0);
    assert_eq!(skipped.error_count, 0);
}

#[tokio::test]
async fn test_handler_sees_decoded_pages() {
    let mock_server = MockServer::start().await;

    mount_html(
        &mock_server,
        "/",
        r#"<html><head><title>Front</title></head><body><a href="/about">About</a></body></html>"#,
        1,
    )
    .await;
    mount_html(
        &mock_server,
        "/about",
        "<html><head><title>About us</title></head><body></body></html>",
        1,
    )
    .await;

    let titles = Arc::new(Mutex::new(Vec::new()));
    let mut mux = Mux::new();
    mux.allow("*").unwrap();
    {
        let titles = Arc::clone(&titles);
        mux.add_handler("*", move |response| {
            titles
                .lock()
                .unwrap()
                .extend(response.find_text("title"));
        })
        .unwrap();
    }

    let crawler = create_crawler(
        create_test_config(),
        Arc::new(mux),
        Arc::new(MemoryStore::new()),
    );
    crawler.add_seeds([loc(&mock_server, "/")]).await.unwrap();
    run(&crawler).await;

    let mut titles = titles.lock().unwrap().clone();
    titles.sort();
    assert_eq!(titles, vec!["About us".to_string(), "Front".to_string()]);
}

#[tokio::test]
async fn test_revisit_until_times_reached() {
    let mock_server = MockServer::start().await;

    mount_html(&mock_server, "/feed", "<html><body>news</body></html>", 3).await;

    let mut mux = Mux::new();
    mux.allow("*").unwrap();
    mux.set_times("*/feed", 3).unwrap();
    mux.set_duration("*/feed", Duration::ZERO).unwrap();

    let mut config = create_test_config();
    config.client.cache_max_bytes = 0;
    let crawler = create_crawler(config, Arc::new(mux), Arc::new(MemoryStore::new()));
    crawler.add_seeds([loc(&mock_server, "/feed")]).await.unwrap();
    run(&crawler).await;

    let feed = record(&crawler, &loc(&mock_server, "/feed"));
    assert_eq!(feed.visit_count, 3);
    assert!(feed.done);
}

#[tokio::test]
async fn test_host_interval_spaces_fetches() {
    let mock_server = MockServer::start().await;

    mount_html(
        &mock_server,
        "/",
        r#"<html><body><a href="/a">A</a><a href="/b">B</a></body></html>"#,
        1,
    )
    .await;
    mount_html(&mock_server, "/a", "<html></html>", 1).await;
    mount_html(&mock_server, "/b", "<html></html>", 1).await;

    let mut mux = Mux::new();
    mux.allow("*").unwrap();
    mux.set_interval("*", Duration::from_millis(150)).unwrap();

    let crawler = create_crawler(
        create_test_config(),
        Arc::new(mux),
        Arc::new(MemoryStore::new()),
    );
    crawler.add_seeds([loc(&mock_server, "/")]).await.unwrap();

    let started = Instant::now();
    run(&crawler).await;
    // Three fetches to one host need at least two intervals
    assert!(started.elapsed() >= Duration::from_millis(280));
    assert_eq!(crawler.stats().unwrap().fetched, 3);
}

#[tokio::test]
async fn test_stop_leaves_pending_urls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html></html>")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&mock_server)
        .await;

    let crawler = Arc::new(create_crawler(
        create_test_config(),
        Arc::new(OnceController::default()),
        Arc::new(MemoryStore::new()),
    ));
    let slow = loc(&mock_server, "/slow");
    crawler.add_seeds([&slow]).await.unwrap();

    let runner = {
        let crawler = Arc::clone(&crawler);
        tokio::spawn(async move { crawler.crawl().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    crawler.stop();

    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("stop did not end the crawl")
        .unwrap()
        .unwrap();

    assert!(!record(&crawler, &slow).done);
    assert_eq!(crawler.store().pending().unwrap(), vec![slow]);
}

#[tokio::test]
async fn test_resume_from_sqlite_store() {
    let mock_server = MockServer::start().await;
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("crawl.db");

    let root = loc(&mock_server, "/");
    let finished = loc(&mock_server, "/finished");

    // An interrupted run: the root is pending, one page is already done
    {
        let store = SqliteStore::new(&db_path).unwrap();
        store.put_if_absent(UrlRecord::new(root.as_str(), 0)).unwrap();
        let mut done = UrlRecord::new(finished.as_str(), 1);
        done.done = true;
        store.put_if_absent(done).unwrap();
        store.close().unwrap();
    }

    mount_html(
        &mock_server,
        "/",
        r#"<html><body><a href="/finished">Old</a><a href="/fresh">New</a></body></html>"#,
        1,
    )
    .await;
    mount_html(&mock_server, "/finished", "<html></html>", 0).await;
    mount_html(&mock_server, "/fresh", "<html></html>", 1).await;

    let store = Arc::new(SqliteStore::new(&db_path).unwrap());
    let crawler = create_crawler(
        create_test_config(),
        Arc::new(OnceController::default()),
        store,
    );
    run(&crawler).await;

    let stats = crawler.stats().unwrap();
    assert_eq!(stats.known, 3);
    assert_eq!(stats.fetched, 2);
    assert_eq!(stats.done, 3);

    // The progress survives in the database
    let reopened = SqliteStore::new(&db_path).unwrap();
    assert!(reopened.is_finished().unwrap());
    assert!(reopened.pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_store_finishes_immediately() {
    let crawler = create_crawler(
        create_test_config(),
        Arc::new(OnceController::default()),
        Arc::new(MemoryStore::new()),
    );
    run(&crawler).await;
    assert_eq!(crawler.stats().unwrap().known, 0);
}
