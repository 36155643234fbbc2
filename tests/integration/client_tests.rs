//! Integration tests for the HTTP client
//!
//! These tests exercise caching, revalidation, content decoding and charset
//! handling of `HttpClient` against a mock server.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use trawl::config::ClientConfig;
use trawl::{Client, FetchError, HttpClient, Request};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(server: &MockServer, route: &str) -> Request {
    Request::get(Url::parse(&format!("{}{}", server.uri(), route)).unwrap())
}

#[tokio::test]
async fn test_fresh_response_served_from_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>cached</body></html>", "text/html")
                .insert_header("cache-control", "max-age=300"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(&ClientConfig::default()).unwrap();

    let mut first = client
        .execute(&request(&mock_server, "/cached"))
        .await
        .unwrap();
    assert!(!first.from_cache);
    // The pool receives the body once it has been read to the end
    first.decode("utf-8").await.unwrap();

    let mut second = client
        .execute(&request(&mock_server, "/cached"))
        .await
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(second.status, 200);
    second.decode("utf-8").await.unwrap();
    assert_eq!(second.text(), "<html><body>cached</body></html>");
}

#[tokio::test]
async fn test_no_cache_is_revalidated_with_etag() {
    let mock_server = MockServer::start().await;

    // Registered first so it wins for conditional requests
    Mock::given(method("GET"))
        .and(path("/validate"))
        .and(header("if-none-match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304).insert_header("etag", "\"v1\""))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/validate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("original body", "text/plain")
                .insert_header("cache-control", "no-cache")
                .insert_header("etag", "\"v1\""),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(&ClientConfig::default()).unwrap();

    let mut first = client
        .execute(&request(&mock_server, "/validate"))
        .await
        .unwrap();
    first.decode("utf-8").await.unwrap();
    assert!(!first.from_cache);

    let mut second = client
        .execute(&request(&mock_server, "/validate"))
        .await
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(second.status, 200);
    second.decode("utf-8").await.unwrap();
    assert_eq!(second.text(), "original body");
}

#[tokio::test]
async fn test_uncacheable_response_always_fetched() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("secret", "text/plain")
                .insert_header("cache-control", "no-store"),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(&ClientConfig::default()).unwrap();
    for _ in 0..2 {
        let mut response = client
            .execute(&request(&mock_server, "/private"))
            .await
            .unwrap();
        assert!(!response.from_cache);
        response.decode("utf-8").await.unwrap();
    }
    assert_eq!(client.cache().map(|c| c.len()), Some(0));
}

#[tokio::test]
async fn test_meta_charset_transcoded_to_utf8() {
    let mock_server = MockServer::start().await;

    let html = "<html><head><meta charset=\"gbk\"><title>标题</title></head>\
                <body><p>你好，世界</p></body></html>";
    let (bytes, _, _) = encoding_rs::GBK.encode(html);

    Mock::given(method("GET"))
        .and(path("/gbk"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(bytes.into_owned())
                .insert_header("content-type", "text/html"),
        )
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(&ClientConfig::default()).unwrap();
    let mut response = client
        .execute(&request(&mock_server, "/gbk"))
        .await
        .unwrap();
    response.decode("utf-8").await.unwrap();

    assert_eq!(response.charset.as_deref(), Some("gbk"));
    assert!(response.certain_charset);
    assert!(response.charset_decoded);
    assert_eq!(response.find_text("p"), vec!["你好，世界".to_string()]);
    assert_eq!(response.find_text("title"), vec!["标题".to_string()]);
}

#[tokio::test]
async fn test_gzip_body_decompressed() {
    let mock_server = MockServer::start().await;

    let html = "<html><body><a href=\"/next\">next</a></body></html>";
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(html.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    Mock::given(method("GET"))
        .and(path("/gzip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(compressed)
                .insert_header("content-type", "text/html; charset=utf-8")
                .insert_header("content-encoding", "gzip"),
        )
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(&ClientConfig::default()).unwrap();
    let mut response = client
        .execute(&request(&mock_server, "/gzip"))
        .await
        .unwrap();
    response.decode("utf-8").await.unwrap();

    assert!(response.is_html());
    assert_eq!(response.text(), html);
    assert_eq!(response.find_attr("a", "href"), vec!["/next".to_string()]);
}

#[tokio::test]
async fn test_redirect_followed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("location", "/new"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("moved here", "text/plain"))
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(&ClientConfig::default()).unwrap();
    let response = client
        .execute(&request(&mock_server, "/old"))
        .await
        .unwrap();

    assert!(response.is_redirected());
    assert_eq!(response.url.path(), "/new");
    assert_eq!(response.request_url.path(), "/old");
}

#[tokio::test]
async fn test_error_status_returned_as_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(&ClientConfig::default()).unwrap();
    match client.execute(&request(&mock_server, "/missing")).await {
        Err(FetchError::Status(e)) => assert_eq!(e.code(), 404),
        other => panic!("expected a status error, got {:?}", other.map(|r| r.status)),
    }
}

#[tokio::test]
async fn test_oversized_body_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![b'a'; 4096], "text/plain"))
        .mount(&mock_server)
        .await;

    let config = ClientConfig {
        max_body_bytes: 1024,
        ..ClientConfig::default()
    };
    let client = HttpClient::new(&config).unwrap();
    let mut response = client
        .execute(&request(&mock_server, "/big"))
        .await
        .unwrap();

    assert!(response.decode("utf-8").await.is_err());
    assert!(response.body_error.is_some());
    assert!(response.content.len() <= 1024);
}
