use crate::{UrlError, UrlResult};
use url::Url;

/// Normalizes a URL into the canonical form used as the URL store key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Accept only the http and https schemes (scheme is lower-cased by parsing)
/// 3. Require a host; the host is lower-cased and IDNA-encoded to ASCII
/// 4. Drop the default port of the scheme (80 for http, 443 for https)
/// 5. Clean the path:
///    - Remove dot segments (. and ..)
///    - Collapse repeated slashes
///    - Remove trailing slash (except for root /)
///    - Empty path becomes /
/// 6. Remove the fragment
///
/// Normalization is idempotent: normalizing a normalized URL returns it unchanged.
///
/// # Arguments
///
/// * `url_str` - The URL string to normalize
///
/// # Returns
///
/// * `Ok(Url)` - Normalized URL
/// * `Err(UrlError)` - Failed to parse or normalize the URL
///
/// # Examples
///
/// ```
/// use trawl::url::normalize_url;
///
/// let url = normalize_url("HTTP://Example.COM:80/a/./b/#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/a/b");
/// ```
pub fn normalize_url(url_str: &str) -> UrlResult<Url> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize(url)
}

/// Resolves `href` against `base` and normalizes the result
pub fn normalize_ref(base: &Url, href: &str) -> UrlResult<Url> {
    let url = base
        .join(href.trim())
        .map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize(url)
}

/// Normalizes an already parsed URL in place
pub fn normalize(mut url: Url) -> UrlResult<Url> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingHost),
    }

    // Default ports and host case are already handled by the parser
    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            // Skip empty segments (from multiple slashes) and current directory markers
            "" | "." => continue,
            ".." => {
                normalized_segments.pop();
            }
            _ => normalized_segments.push(segment),
        }
    }

    if normalized_segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", normalized_segments.join("/"))
}
