//! Charset and content-type helpers
//!
//! Charsets are resolved in order of authority: the `Content-Type` header, a
//! `<meta>` declaration near the top of an HTML document, then a configured
//! default.

use encoding_rs::Encoding;
use scraper::{Html, Selector};

/// Bytes of an HTML body inspected for a `<meta>` charset declaration
pub const PREVIEW_LEN: usize = 1024;

/// Returns the lower-cased media type of a `Content-Type` value
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Extracts the `charset` parameter of a `Content-Type` value
pub fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_ascii_lowercase())
    })
}

/// True for media types the crawler treats as HTML
pub fn is_html_media(media_type: &str) -> bool {
    matches!(media_type, "text/html" | "application/xhtml+xml")
}

/// Looks for `<meta charset>` or `<meta http-equiv="Content-Type">` in a preview
///
/// The preview is parsed leniently; a truncated document is fine.
pub fn sniff_meta_charset(preview: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(preview);
    let doc = Html::parse_document(&text);

    let meta_charset = Selector::parse("meta[charset]").ok()?;
    if let Some(charset) = doc
        .select(&meta_charset)
        .filter_map(|el| el.value().attr("charset"))
        .map(|v| v.trim().to_ascii_lowercase())
        .find(|v| !v.is_empty())
    {
        return Some(charset);
    }

    let http_equiv = Selector::parse("meta[http-equiv][content]").ok()?;
    doc.select(&http_equiv)
        .filter(|el| {
            el.value()
                .attr("http-equiv")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("content-type"))
        })
        .filter_map(|el| el.value().attr("content"))
        .find_map(charset_param)
}

/// Finds the encoding for a charset label, if it is known
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Canonical lower-case name of an encoding, e.g. `gbk` or `utf-8`
pub fn canonical_name(encoding: &'static Encoding) -> String {
    encoding.name().to_ascii_lowercase()
}

/// Transcodes `bytes` from `encoding` into UTF-8
///
/// Malformed sequences are replaced; the returned flag reports whether that
/// happened.
pub fn transcode(bytes: &[u8], encoding: &'static Encoding) -> (String, bool) {
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    (text.into_owned(), had_errors)
}
