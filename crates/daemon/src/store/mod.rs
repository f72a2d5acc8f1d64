// Metadata store: SQLite persistence for tracked documents, the capped
// audit log, and the in-flight status counter.

pub mod logs;
pub mod meta_db;
pub mod status;
pub mod tracked;

pub use meta_db::MetaDb;

use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width RFC 3339 (microseconds, `Z` suffix), so lexicographic
/// order in SQL matches chronological order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::format_ts;

    #[test]
    fn format_ts_is_fixed_width() {
        let a = format_ts("2026-08-01T12:00:00Z".parse().unwrap());
        let b = format_ts("2026-08-01T12:00:00.000123Z".parse().unwrap());
        assert_eq!(a.len(), b.len());
        assert_eq!(a, "2026-08-01T12:00:00.000000Z");
    }

    #[test]
    fn format_ts_orders_lexicographically() {
        let earlier = format_ts("2026-08-01T12:00:00.000009Z".parse().unwrap());
        let later = format_ts("2026-08-01T12:00:00.000010Z".parse().unwrap());
        assert!(earlier < later);
    }
}
