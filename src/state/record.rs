use crate::state::UrlStatus;
use chrono::{DateTime, Utc};

/// Crawl metadata kept for one normalized URL
///
/// The store holds exactly one record per normalized URL. Stages never share a
/// record by reference: they read a snapshot and write back through
/// `UrlStore::update_func`.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlRecord {
    /// Normalized URL, the store key
    pub loc: String,

    /// Link distance from the nearest seed
    pub depth: u32,

    pub status: UrlStatus,

    /// Completed successful fetches
    pub visit_count: u32,

    /// Failed fetches
    pub error_count: u32,

    pub last_visit: Option<DateTime<Utc>>,

    /// Last-Modified reported by the server on the latest fetch
    pub last_modified: Option<DateTime<Utc>>,

    /// Priority of the latest schedule; higher is sooner
    pub score: i32,

    /// Earliest time the URL may be fetched again
    pub next_eligible: Option<DateTime<Utc>>,

    /// Retired from scheduling; terminal
    pub done: bool,
}

impl UrlRecord {
    /// Creates a fresh record with `Init` status
    pub fn new(loc: impl Into<String>, depth: u32) -> Self {
        Self {
            loc: loc.into(),
            depth,
            status: UrlStatus::Init,
            visit_count: 0,
            error_count: 0,
            last_visit: None,
            last_modified: None,
            score: 0,
            next_eligible: None,
            done: false,
        }
    }

    /// Records a successful fetch
    pub fn mark_fetched(&mut self, at: DateTime<Utc>, last_modified: Option<DateTime<Utc>>) {
        self.status = UrlStatus::Fetched;
        self.visit_count += 1;
        self.last_visit = Some(at);
        if last_modified.is_some() {
            self.last_modified = last_modified;
        }
    }

    /// Records a failed fetch
    pub fn mark_error(&mut self) {
        self.status = UrlStatus::Error;
        self.error_count += 1;
    }
}
