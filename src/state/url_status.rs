/// URL status definitions for tracking crawl progress
///
/// This module defines every status a URL record moves through during a crawl.
use std::fmt;

/// Represents the current status of a URL in the crawl pipeline
///
/// The normal cycle is `Init -> Waiting -> Enqueued -> Sieving -> Fetched|Error`,
/// returning to `Waiting` whenever the controller asks for a revisit.
/// `Redirected` marks the original URL of a redirect chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UrlStatus {
    /// Record created, not yet scheduled
    #[default]
    Init,

    /// Scheduled by the controller, on its way into the wait queue
    Waiting,

    /// Held by the wait queue
    Enqueued,

    /// Picked up by a request maker, request in flight
    Sieving,

    /// Last fetch succeeded
    Fetched,

    /// Last fetch of this URL ended at a different URL
    Redirected,

    /// Last fetch failed
    Error,
}

impl UrlStatus {
    /// Returns true while the URL is inside the pipeline
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Waiting | Self::Enqueued | Self::Sieving)
    }

    /// Returns true if the last fetch attempt has completed
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Fetched | Self::Redirected | Self::Error)
    }

    /// Converts the status to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Waiting => "waiting",
            Self::Enqueued => "enqueued",
            Self::Sieving => "sieving",
            Self::Fetched => "fetched",
            Self::Redirected => "redirected",
            Self::Error => "error",
        }
    }

    /// Parses a status from a database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "init" => Some(Self::Init),
            "waiting" => Some(Self::Waiting),
            "enqueued" => Some(Self::Enqueued),
            "sieving" => Some(Self::Sieving),
            "fetched" => Some(Self::Fetched),
            "redirected" => Some(Self::Redirected),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all() -> [Self; 7] {
        [
            Self::Init,
            Self::Waiting,
            Self::Enqueued,
            Self::Sieving,
            Self::Fetched,
            Self::Redirected,
            Self::Error,
        ]
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
