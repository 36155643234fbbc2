use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, AGE, CACHE_CONTROL, DATE, ETAG, EXPIRES, LAST_MODIFIED};
use std::collections::HashMap;
use std::time::Duration;

/// Status codes whose responses may be stored at all
const CACHEABLE_STATUSES: [u16; 5] = [200, 203, 206, 300, 301];

/// Largest `Age` header honored, in seconds
const MAX_AGE_HEADER_SECS: u64 = i32::MAX as u64;

/// How a cached response may be reused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheType {
    /// Reusable until it expires
    Normal,

    /// Must be revalidated with the origin before every reuse
    NeedValidate,
}

/// Cache metadata derived from a response's headers
#[derive(Debug, Clone, PartialEq)]
pub struct CacheControl {
    pub cache_type: CacheType,

    /// Value of the `Date` header, or the response time if absent
    pub date: DateTime<Utc>,

    /// When the response was received
    pub response_time: DateTime<Utc>,

    /// Corrected age of the response when it was received
    pub initial_age: Duration,

    /// Freshness lifetime
    pub max_age: Duration,

    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl CacheControl {
    /// Parses cache metadata from a response
    ///
    /// # Arguments
    ///
    /// * `status` - Response status code
    /// * `headers` - Response headers
    /// * `response_time` - When the response was received, the reference "now"
    ///
    /// # Returns
    ///
    /// `None` if the response may not be cached: its status is not cacheable,
    /// it carries `no-store`, or no freshness lifetime can be derived.
    pub fn parse(status: u16, headers: &HeaderMap, response_time: DateTime<Utc>) -> Option<Self> {
        if !CACHEABLE_STATUSES.contains(&status) {
            return None;
        }

        let date = header_time(headers, DATE.as_str()).unwrap_or(response_time);
        let directives = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(parse_directives)
            .collect::<HashMap<_, _>>();

        // s-maxage applies to shared caches and wins when present and valid
        let seconds = directives
            .get("s-maxage")
            .and_then(|v| parse_seconds(v))
            .or_else(|| directives.get("max-age").and_then(|v| parse_seconds(v)));

        let mut max_age = match seconds {
            Some(s) => Some(Duration::from_secs(s)),
            None => header_time(headers, EXPIRES.as_str())
                .and_then(|expires| (expires - date).to_std().ok()),
        };

        let mut cache_type = CacheType::Normal;
        if directives.contains_key("no-store") {
            return None;
        } else if directives.contains_key("no-cache") {
            max_age = Some(Duration::ZERO);
            cache_type = CacheType::NeedValidate;
        } else if directives.contains_key("must-revalidate") {
            max_age = Some(Duration::ZERO);
        }
        let max_age = max_age?;

        let header_age = headers
            .get(AGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_seconds)
            .map(|s| Duration::from_secs(s.min(MAX_AGE_HEADER_SECS)))
            .unwrap_or(Duration::ZERO);
        let apparent_age = (response_time - date).to_std().unwrap_or(Duration::ZERO);

        Some(Self {
            cache_type,
            date,
            response_time,
            initial_age: apparent_age.max(header_age),
            max_age,
            etag: headers
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            last_modified: header_time(headers, LAST_MODIFIED.as_str()),
        })
    }

    /// Age of the cached response at `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        let resident = (now - self.response_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.initial_age.saturating_add(resident)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) > self.max_age
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// True if the origin must confirm the response before it is reused at `now`
    pub fn need_validate_at(&self, now: DateTime<Utc>) -> bool {
        match self.cache_type {
            CacheType::NeedValidate => true,
            CacheType::Normal => self.is_expired_at(now),
        }
    }

    pub fn need_validate(&self) -> bool {
        self.need_validate_at(Utc::now())
    }
}

/// Splits a `Cache-Control` value into lower-cased directive names and values
fn parse_directives(value: &str) -> Vec<(String, String)> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((name, val)) => (
                name.trim().to_ascii_lowercase(),
                val.trim().trim_matches('"').to_string(),
            ),
            None => (part.to_ascii_lowercase(), String::new()),
        })
        .collect()
}

fn parse_seconds(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

/// Parses an HTTP-date header
pub fn header_time(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
}

/// Parses an IMF-fixdate such as `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Formats a time as an IMF-fixdate
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_max_age_freshness() {
        let h = headers(&[("cache-control", "public, max-age=100")]);
        let cc = CacheControl::parse(200, &h, t0()).unwrap();

        assert_eq!(cc.cache_type, CacheType::Normal);
        assert_eq!(cc.max_age, Duration::from_secs(100));
        assert!(!cc.need_validate_at(t0() + chrono::Duration::seconds(50)));
        assert!(cc.need_validate_at(t0() + chrono::Duration::seconds(150)));
    }

    #[test]
    fn test_no_store() {
        let h = headers(&[("cache-control", "no-store, max-age=100")]);
        assert!(CacheControl::parse(200, &h, t0()).is_none());
    }

    #[test]
    fn test_no_cache_needs_validation() {
        let h = headers(&[("cache-control", "no-cache"), ("etag", "\"v1\"")]);
        let cc = CacheControl::parse(200, &h, t0()).unwrap();
        assert_eq!(cc.cache_type, CacheType::NeedValidate);
        assert_eq!(cc.max_age, Duration::ZERO);
        assert_eq!(cc.etag.as_deref(), Some("\"v1\""));
        assert!(cc.need_validate_at(t0()));
    }

    #[test]
    fn test_must_revalidate() {
        let h = headers(&[("cache-control", "max-age=60, must-revalidate")]);
        let cc = CacheControl::parse(200, &h, t0()).unwrap();
        assert_eq!(cc.cache_type, CacheType::Normal);
        assert_eq!(cc.max_age, Duration::ZERO);
    }

    #[test]
    fn test_uncacheable_status() {
        let h = headers(&[("cache-control", "max-age=100")]);
        assert!(CacheControl::parse(404, &h, t0()).is_none());
        assert!(CacheControl::parse(301, &h, t0()).is_some());
    }

    #[test]
    fn test_no_lifetime_is_uncacheable() {
        assert!(CacheControl::parse(200, &HeaderMap::new(), t0()).is_none());
        let h = headers(&[("cache-control", "public")]);
        assert!(CacheControl::parse(200, &h, t0()).is_none());
    }

    #[test]
    fn test_s_maxage_preferred() {
        let h = headers(&[("cache-control", "max-age=10, s-maxage=300")]);
        let cc = CacheControl::parse(200, &h, t0()).unwrap();
        assert_eq!(cc.max_age, Duration::from_secs(300));

        let h = headers(&[("cache-control", "max-age=300, s-maxage=10")]);
        let cc = CacheControl::parse(200, &h, t0()).unwrap();
        assert_eq!(cc.max_age, Duration::from_secs(10));

        let h = headers(&[("cache-control", "max-age=300, s-maxage=bogus")]);
        let cc = CacheControl::parse(200, &h, t0()).unwrap();
        assert_eq!(cc.max_age, Duration::from_secs(300));
    }

    #[test]
    fn test_expires_minus_date() {
        let h = headers(&[
            ("date", "Fri, 01 Mar 2024 12:00:00 GMT"),
            ("expires", "Fri, 01 Mar 2024 12:10:00 GMT"),
        ]);
        let cc = CacheControl::parse(200, &h, t0()).unwrap();
        assert_eq!(cc.date, t0());
        assert_eq!(cc.max_age, Duration::from_secs(600));
    }

    #[test]
    fn test_age_accounts_for_header_and_residence() {
        let h = headers(&[
            ("date", "Fri, 01 Mar 2024 11:59:50 GMT"),
            ("age", "30"),
            ("cache-control", "max-age=60"),
        ]);
        let cc = CacheControl::parse(200, &h, t0()).unwrap();
        // Header age beats the 10s apparent age
        assert_eq!(cc.initial_age, Duration::from_secs(30));
        assert_eq!(
            cc.age_at(t0() + chrono::Duration::seconds(20)),
            Duration::from_secs(50)
        );
        assert!(!cc.is_expired_at(t0() + chrono::Duration::seconds(30)));
        assert!(cc.is_expired_at(t0() + chrono::Duration::seconds(31)));
    }

    #[test]
    fn test_huge_age_header_is_clamped() {
        let h = headers(&[
            ("age", "18446744073709551615"),
            ("cache-control", "max-age=60"),
        ]);
        let cc = CacheControl::parse(200, &h, t0()).unwrap();
        assert_eq!(cc.initial_age, Duration::from_secs(i32::MAX as u64));
        assert!(cc.is_expired_at(t0() + chrono::Duration::seconds(1)));
        assert!(cc.need_validate_at(t0() + chrono::Duration::days(365 * 100)));
    }

    #[test]
    fn test_age_saturates() {
        let h = headers(&[("cache-control", "max-age=60")]);
        let mut cc = CacheControl::parse(200, &h, t0()).unwrap();
        cc.initial_age = Duration::MAX;
        assert_eq!(
            cc.age_at(t0() + chrono::Duration::seconds(10)),
            Duration::MAX
        );
        assert!(cc.is_expired_at(t0() + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_validators_captured() {
        let h = headers(&[
            ("cache-control", "max-age=5"),
            ("last-modified", "Thu, 29 Feb 2024 08:00:00 GMT"),
        ]);
        let cc = CacheControl::parse(200, &h, t0()).unwrap();
        assert_eq!(
            cc.last_modified,
            Some(Utc.with_ymd_and_hms(2024, 2, 29, 8, 0, 0).unwrap())
        );
        assert_eq!(cc.etag, None);
    }

    #[test]
    fn test_http_date_roundtrip() {
        let formatted = format_http_date(t0());
        assert_eq!(formatted, "Fri, 01 Mar 2024 12:00:00 GMT");
        assert_eq!(parse_http_date(&formatted), Some(t0()));
    }
}
