//! Per-domain reconciliation services.
//!
//! Each service decides per read whether the local store answers, or the
//! remote source must be consulted and the result written back. Writes always
//! go remote-first; the local store and derived caches only change after the
//! remote accepts.

pub mod expenses;
pub mod lookups;
pub mod receipts;
pub mod response_log;
pub mod stats;
pub mod tags;

use chrono::{DateTime, Datelike, Months, Utc};

pub use expenses::ExpenseService;
pub use lookups::LookupService;
pub use receipts::ReceiptCache;
pub use response_log::{CallCriteria, RemoteCallLog};
pub use stats::StatsService;
pub use tags::TagsService;

/// `[start, end)` of the trailing month window covered by a page.
///
/// Page 1 covers the most recent `page_months` calendar months ending now;
/// each further page steps the window back by `page_months`.
pub(crate) fn month_window(now_millis: i64, page_no: u32, page_months: u32) -> (i64, i64) {
    let now = DateTime::<Utc>::from_timestamp_millis(now_millis).unwrap_or_default();
    let start = now
        .checked_sub_months(Months::new(page_months * page_no))
        .unwrap_or(now);
    let end = now
        .checked_sub_months(Months::new(page_months * page_no.saturating_sub(1)))
        .unwrap_or(now);
    (start.timestamp_millis(), end.timestamp_millis())
}

/// Calendar year of an epoch-millisecond timestamp.
pub(crate) fn year_of(millis: i64) -> i64 {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .year() as i64
}
