use url::Url;

/// Returns the rate-limiting key of a URL: its host plus any explicit port
///
/// Two servers on the same host but different ports are spaced independently.
/// Default ports never appear because normalization strips them.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use trawl::url::host_key;
///
/// let url = Url::parse("https://example.com/path").unwrap();
/// assert_eq!(host_key(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(host_key(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}
