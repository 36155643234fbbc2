use crate::cache::{header_time, CacheControl};
use crate::client::body::Body;
use crate::client::charset::{
    canonical_name, charset_param, is_html_media, lookup, media_type, sniff_meta_charset,
    transcode, PREVIEW_LEN,
};
use crate::client::Request;
use crate::state::UrlRecord;
use crate::BodyError;
use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use reqwest::header::{HeaderMap, CONTENT_LOCATION, CONTENT_TYPE, LAST_MODIFIED};
use scraper::{Html, Selector};
use std::borrow::Cow;
use std::sync::{Mutex, MutexGuard};
use url::Url;

/// A refresh directive from a `Refresh` header or `<meta http-equiv="refresh">`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refresh {
    /// Delay before the refresh
    pub seconds: u64,

    /// Target; `None` reloads the same document
    pub url: Option<Url>,
}

/// Parses a refresh value such as `5; url=/next`
pub fn parse_refresh(value: &str, base: &Url) -> Option<Refresh> {
    let value = value.trim();
    let (delay, rest) = match value.find([';', ',']) {
        Some(i) => (&value[..i], Some(&value[i + 1..])),
        None => (value, None),
    };

    let seconds = delay.trim().parse::<f64>().ok().filter(|s| *s >= 0.0)? as u64;

    let url = rest.and_then(|rest| {
        let rest = rest.trim();
        let target = match (rest.get(..3), rest.get(3..)) {
            (Some(key), Some(tail)) if key.eq_ignore_ascii_case("url") => {
                tail.trim_start().strip_prefix('=')?.trim()
            }
            _ => rest,
        };
        let target = target.trim_matches(|c| c == '"' || c == '\'');
        if target.is_empty() {
            None
        } else {
            base.join(target).ok()
        }
    });

    Some(Refresh { seconds, url })
}

/// The outcome of one fetch
///
/// A response starts with only its head read. `decode` resolves the charset and
/// fills `content` with the body as UTF-8 (for text) or as raw bytes.
#[derive(Debug)]
pub struct Response {
    /// URL that was requested
    pub request_url: Url,

    /// URL the content was served from after redirects
    pub url: Url,

    pub status: u16,
    pub headers: HeaderMap,

    /// Lower-cased media type without parameters
    pub content_type: Option<String>,

    /// Canonical name of the resolved charset
    pub charset: Option<String>,

    /// The charset was declared rather than assumed
    pub certain_charset: bool,

    /// `content` was transcoded to UTF-8
    pub charset_decoded: bool,

    /// Decoded body, filled by `decode`
    pub content: Vec<u8>,

    pub cache_control: Option<CacheControl>,
    pub refresh: Option<Refresh>,
    pub content_location: Option<Url>,

    /// When the response head was received
    pub timestamp: DateTime<Utc>,

    /// Served from the cache pool, possibly after revalidation
    pub from_cache: bool,

    /// Snapshot of the URL record taken when the request was made
    pub record: UrlRecord,

    pub body: Body,

    /// Error met while reading the body; the response is still usable
    pub body_error: Option<BodyError>,

    decoded: bool,
}

impl Response {
    /// Creates a response from its head
    ///
    /// # Arguments
    ///
    /// * `request` - The request this response answers
    /// * `url` - Final URL after redirects
    /// * `status` - Status code
    /// * `headers` - Response headers
    /// * `body` - Unread body
    /// * `timestamp` - When the head was received
    pub fn new(
        request: &Request,
        url: Url,
        status: u16,
        headers: HeaderMap,
        body: Body,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(media_type)
            .filter(|m| !m.is_empty());
        let refresh = headers
            .get("refresh")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_refresh(v, &url));
        let content_location = headers
            .get(CONTENT_LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| url.join(v).ok());

        Self {
            request_url: request.url.clone(),
            url,
            status,
            headers,
            content_type,
            charset: None,
            certain_charset: false,
            charset_decoded: false,
            content: Vec::new(),
            cache_control: None,
            refresh,
            content_location,
            timestamp,
            from_cache: false,
            record: request.record.clone(),
            body,
            body_error: None,
            decoded: false,
        }
    }

    /// True if the content is HTML
    pub fn is_html(&self) -> bool {
        self.content_type.as_deref().is_some_and(is_html_media)
    }

    /// True if the content is text that a charset applies to
    pub fn is_text(&self) -> bool {
        match self.content_type.as_deref() {
            None => true,
            Some(media) => {
                media.starts_with("text/")
                    || media.ends_with("+xml")
                    || matches!(
                        media,
                        "application/xml" | "application/json" | "application/javascript"
                    )
            }
        }
    }

    /// True if the final URL differs from the requested one
    pub fn is_redirected(&self) -> bool {
        self.request_url != self.url
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded
    }

    /// `Last-Modified` reported by the server
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        header_time(&self.headers, LAST_MODIFIED.as_str())
    }

    /// Resolves the charset and reads the whole body into `content`
    ///
    /// The charset comes from the `Content-Type` header, else from a `<meta>`
    /// tag in the first bytes of an HTML body, else `default_charset`. Non
    /// UTF-8 text is transcoded. Calling this again is a no-op that repeats
    /// the first outcome.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - `content` holds the full body
    /// * `Err(BodyError)` - The body could not be read or decoded; the error is
    ///   also kept in `body_error` and `content` holds what was read
    pub async fn decode(&mut self, default_charset: &str) -> Result<(), BodyError> {
        if self.decoded {
            return self.body_error.clone().map_or(Ok(()), Err);
        }
        self.decoded = true;

        let result = self.read_and_decode(default_charset).await;
        if let Err(e) = &result {
            self.body_error = Some(e.clone());
        }
        result
    }

    async fn read_and_decode(&mut self, default_charset: &str) -> Result<(), BodyError> {
        if self.content_type.is_none() {
            let preview = self.body.preview(PREVIEW_LEN).await?;
            if looks_like_html(preview) {
                self.content_type = Some("text/html".to_string());
            }
        }

        // Binary content is delivered as is
        let encoding = if self.is_text() {
            let (encoding, certain) = self.resolve_charset(default_charset).await?;
            self.charset = Some(canonical_name(encoding));
            self.certain_charset = certain;
            encoding
        } else {
            encoding_rs::UTF_8
        };

        let mut content = std::mem::take(&mut self.content);
        let read = self.body.read_to_end(&mut content).await;
        self.content = content;
        read?;

        if encoding != encoding_rs::UTF_8 {
            let (text, _) = transcode(&self.content, encoding);
            self.content = text.into_bytes();
            self.charset_decoded = true;
        }

        if self.refresh.is_none() && self.is_html() {
            self.refresh = self.meta_refresh();
        }
        Ok(())
    }

    async fn resolve_charset(
        &mut self,
        default_charset: &str,
    ) -> Result<(&'static Encoding, bool), BodyError> {
        let declared = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_param)
            .and_then(|label| lookup(&label));
        if let Some(encoding) = declared {
            return Ok((encoding, true));
        }

        if self.is_html() {
            let preview = self.body.preview(PREVIEW_LEN).await?;
            let sniffed = sniff_meta_charset(preview).and_then(|label| lookup(&label));
            if let Some(encoding) = sniffed {
                // A byte stream cannot really be UTF-16 if its meta tag was readable
                if encoding == encoding_rs::UTF_16LE || encoding == encoding_rs::UTF_16BE {
                    return Ok((encoding_rs::UTF_8, true));
                }
                return Ok((encoding, true));
            }
        }

        Ok((lookup(default_charset).unwrap_or(encoding_rs::UTF_8), false))
    }

    fn meta_refresh(&self) -> Option<Refresh> {
        let doc = self.document()?;
        let selector = Selector::parse("meta[http-equiv][content]").ok()?;
        doc.select(&selector)
            .filter(|el| {
                el.value()
                    .attr("http-equiv")
                    .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh"))
            })
            .filter_map(|el| el.value().attr("content"))
            .find_map(|content| parse_refresh(content, &self.url))
    }

    /// The content as text, replacing invalid UTF-8
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Parses the content as an HTML document
    ///
    /// Returns `None` unless the response is HTML and has been decoded.
    pub fn document(&self) -> Option<Html> {
        if !self.decoded || !self.is_html() {
            return None;
        }
        Some(Html::parse_document(&self.text()))
    }

    /// Text of every element matching a CSS selector, whitespace-trimmed
    pub fn find_text(&self, selector: &str) -> Vec<String> {
        let (Some(doc), Ok(selector)) = (self.document(), Selector::parse(selector)) else {
            return Vec::new();
        };
        doc.select(&selector)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .collect()
    }

    /// Value of `attr` on every element matching a CSS selector
    pub fn find_attr(&self, selector: &str, attr: &str) -> Vec<String> {
        let (Some(doc), Ok(selector)) = (self.document(), Selector::parse(selector)) else {
            return Vec::new();
        };
        doc.select(&selector)
            .filter_map(|el| el.value().attr(attr))
            .map(str::to_string)
            .collect()
    }

    /// Takes the content buffer out, leaving the response empty
    pub fn take_content(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.content)
    }
}

/// True if leading bytes look like the start of an HTML document
fn looks_like_html(preview: &[u8]) -> bool {
    let text = String::from_utf8_lossy(&preview[..preview.len().min(512)]);
    let lower = text.trim_start_matches('\u{feff}').trim_start().to_ascii_lowercase();
    ["<!doctype html", "<html", "<head", "<body"]
        .iter()
        .any(|tag| lower.starts_with(tag))
}

/// Recycles content buffers between responses
///
/// Handlers take a buffer with `acquire` before decoding a response and give
/// it back with `release` once the controller is done with the response.
#[derive(Debug)]
pub struct ResponsePool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
}

impl ResponsePool {
    pub fn new(max_pooled: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::new()),
            max_pooled,
        }
    }

    fn buffers(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns an empty buffer, reusing a released one when possible
    pub fn acquire(&self) -> Vec<u8> {
        self.buffers().pop().unwrap_or_default()
    }

    /// Clears a buffer and keeps it for reuse
    pub fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        let mut buffers = self.buffers();
        if buffers.len() < self.max_pooled {
            buffers.push(buffer);
        }
    }

    /// Number of buffers waiting for reuse
    pub fn len(&self) -> usize {
        self.buffers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
