//! Link extraction from HTML pages
//!
//! This module finds the URLs a page refers to:
//! - `href` of `<a>` and `<link>` elements
//! - `src` of `<script>`, `<img>` and `<iframe>` elements (optional)
//!
//! Every URL is resolved against the page URL (or its `<base href>`) and
//! normalized, so fragments are stripped and only HTTP(S) URLs survive.

use crate::url::normalize_ref;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Elements and the attribute that carries their URL
const HREF_ELEMENTS: &[(&str, &str)] = &[("a", "href")];

const ALL_ELEMENTS: &[(&str, &str)] = &[
    ("a", "href"),
    ("link", "href"),
    ("script", "src"),
    ("img", "src"),
    ("iframe", "src"),
];

/// Extracts links from HTML documents
#[derive(Debug, Clone, Copy)]
pub struct LinkExtractor {
    elements: &'static [(&'static str, &'static str)],
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::hrefs()
    }
}

impl LinkExtractor {
    /// Extracts only anchor `href`s, the links a visitor can follow
    pub fn hrefs() -> Self {
        Self {
            elements: HREF_ELEMENTS,
        }
    }

    /// Extracts every `href`/`src` bearing element, including resources
    pub fn all() -> Self {
        Self {
            elements: ALL_ELEMENTS,
        }
    }

    /// Extracts links from an HTML document
    ///
    /// # Link Extraction Rules
    ///
    /// **Skipped:**
    /// - `javascript:`, `mailto:`, `tel:` and `data:` references
    /// - Fragment-only references (same page anchors)
    /// - `<a download>` anchors
    /// - Anything that does not resolve to an HTTP(S) URL
    ///
    /// Duplicates are reported once, in document order.
    ///
    /// # Arguments
    ///
    /// * `html` - The HTML content
    /// * `base` - URL of the page, used to resolve relative references
    ///
    /// # Returns
    ///
    /// The normalized absolute URLs found in the document
    ///
    /// # Example
    ///
    /// ```
    /// use trawl::crawler::LinkExtractor;
    /// use url::Url;
    ///
    /// let html = r#"<a href="/page#top">Link</a><img src="/logo.png">"#;
    /// let base = Url::parse("https://example.com/").unwrap();
    /// let links = LinkExtractor::hrefs().extract(html, &base);
    /// assert_eq!(links.len(), 1);
    /// assert_eq!(links[0].as_str(), "https://example.com/page");
    /// ```
    pub fn extract(&self, html: &str, base: &Url) -> Vec<Url> {
        let document = Html::parse_document(html);
        let base = document_base(&document, base);

        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for &(tag, attr) in self.elements {
            let Ok(selector) = Selector::parse(&format!("{}[{}]", tag, attr)) else {
                continue;
            };
            for element in document.select(&selector) {
                if tag == "a" && element.value().attr("download").is_some() {
                    continue;
                }
                let Some(url) = element.value().attr(attr).and_then(|v| resolve_link(v, &base))
                else {
                    continue;
                };
                if seen.insert(url.to_string()) {
                    links.push(url);
                }
            }
        }

        links
    }
}

/// Returns the `<base href>` of a document, resolved against the page URL
fn document_base(document: &Html, page: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| page.join(href.trim()).ok())
        })
        .unwrap_or_else(|| page.clone())
}

/// Resolves a reference to a normalized absolute URL
///
/// Returns None if the reference should be skipped.
fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    normalize_ref(base, href).ok()
}
