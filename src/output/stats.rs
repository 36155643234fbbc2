//! Statistics generation from the URL store
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from a URL store.

use crate::state::UrlStatus;
use crate::store::{StoreResult, StoreStats, UrlStore};
use std::fmt::Write;

/// Crawl statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStatistics {
    /// Aggregate counters of the store
    pub totals: StoreStats,

    /// Count of URLs by their last status, statuses without URLs omitted
    pub by_status: Vec<(UrlStatus, u64)>,
}

/// Loads statistics from a store
///
/// # Arguments
///
/// * `store` - The URL store to query
///
/// # Returns
///
/// * `Ok(CrawlStatistics)` - Successfully loaded statistics
/// * `Err(StoreError)` - Failed to query statistics
pub fn load_statistics(store: &dyn UrlStore) -> StoreResult<CrawlStatistics> {
    let totals = store.stats()?;
    let mut by_status: Vec<_> = store
        .count_by_status()?
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .collect();
    // Largest groups first
    by_status.sort_by(|a, b| b.1.cmp(&a.1));

    Ok(CrawlStatistics { totals, by_status })
}

fn percentage(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Renders statistics as the text printed by the CLI
pub fn format_statistics(stats: &CrawlStatistics) -> String {
    let totals = &stats.totals;
    let mut out = String::new();

    let _ = writeln!(out, "=== Crawl Statistics ===\n");
    let _ = writeln!(out, "Overview:");
    let _ = writeln!(out, "  URLs known: {}", totals.known);
    let _ = writeln!(out, "  URLs fetched: {}", totals.fetched);
    let _ = writeln!(out, "  URLs with errors: {}", totals.errors);
    let _ = writeln!(out, "  URLs done: {}", totals.done);
    let _ = writeln!(out);

    if !stats.by_status.is_empty() {
        let _ = writeln!(out, "URLs by Status:");
        for (status, count) in &stats.by_status {
            let _ = writeln!(
                out,
                "  {}: {} ({:.1}%)",
                status.to_db_string(),
                count,
                percentage(*count, totals.known)
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(
        out,
        "Progress: {:.1}% ({} / {} URLs done)",
        percentage(totals.done, totals.known),
        totals.done,
        totals.known
    );
    out
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    print!("{}", format_statistics(stats));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UrlRecord;
    use crate::store::MemoryStore;
    use chrono::Utc;

    #[test]
    fn test_load_statistics() {
        let store = MemoryStore::new();
        for loc in ["http://a.com/1", "http://a.com/2", "http://a.com/3"] {
            store.put_if_absent(UrlRecord::new(loc, 0)).unwrap();
        }
        store
            .update_func("http://a.com/1", &mut |r| {
                r.mark_fetched(Utc::now(), None);
                r.done = true;
            })
            .unwrap();
        store
            .update_func("http://a.com/2", &mut |r| r.mark_error())
            .unwrap();

        let stats = load_statistics(&store).unwrap();
        assert_eq!(
            stats.totals,
            StoreStats {
                known: 3,
                fetched: 1,
                errors: 1,
                done: 1,
            }
        );
        assert_eq!(stats.by_status.len(), 3);
        assert!(stats.by_status.contains(&(UrlStatus::Init, 1)));
    }

    #[test]
    fn test_format_statistics() {
        let stats = CrawlStatistics {
            totals: StoreStats {
                known: 4,
                fetched: 3,
                errors: 1,
                done: 2,
            },
            by_status: vec![(UrlStatus::Fetched, 3), (UrlStatus::Error, 1)],
        };

        let text = format_statistics(&stats);
        assert!(text.contains("URLs known: 4"));
        assert!(text.contains("fetched: 3 (75.0%)"));
        assert!(text.contains("error: 1 (25.0%)"));
        assert!(text.contains("Progress: 50.0% (2 / 4 URLs done)"));
    }

    #[test]
    fn test_format_empty_statistics() {
        let text = format_statistics(&CrawlStatistics::default());
        assert!(text.contains("Progress: 0.0% (0 / 0 URLs done)"));
        assert!(!text.contains("URLs by Status"));
    }
}
