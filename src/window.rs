//! Window batching
//!
//! Splits a date range into contiguous sub-ranges no longer than an endpoint's
//! maximum span. Only the heart-rate endpoint is span limited today.

use chrono::Days;

use crate::types::DateRange;

/// Heart-rate requests may cover at most this many calendar days
pub const HEARTRATE_MAX_SPAN_DAYS: u32 = 7;

/// Split `range` into ordered, non-overlapping sub-ranges of at most
/// `max_span_days` calendar days each.
///
/// With no limit, or when the range already fits, the input comes back as the
/// only element. The last sub-range is clipped to the range end.
pub fn split(range: DateRange, max_span_days: Option<u32>) -> Vec<DateRange> {
    let span = match max_span_days {
        Some(span) if span > 0 && range.day_count() > i64::from(span) => span,
        _ => return vec![range],
    };

    let mut windows = Vec::new();
    let mut cursor = range.start();
    while cursor <= range.end() {
        let tentative_end = cursor
            .checked_add_days(Days::new(u64::from(span - 1)))
            .unwrap_or(range.end());
        let window_end = tentative_end.min(range.end());
        // cursor <= window_end always holds here
        if let Ok(window) = DateRange::new(cursor, window_end) {
            windows.push(window);
        }
        match window_end.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
    }
    windows
}
