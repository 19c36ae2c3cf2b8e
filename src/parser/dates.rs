use std::sync::LazyLock;

use chrono::{Datelike, Months, NaiveDate};
use regex::Regex;

use crate::error::SyncError;
use crate::model::{is_missing, ActivityRecord, DateRange};

static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").unwrap());
static WEEKDAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:mon|tue|tues|wed|wednes|thu|thur|thurs|fri|sat|satur|sun)(?:day)?\.?,?\s+")
        .unwrap()
});

/// Accepted input formats, tried in order.
const FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
];

/// Parse one raw date string. No year inference: a string without a
/// four-digit year is rejected.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    if is_missing(raw) {
        return None;
    }
    let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = WEEKDAY_RE.replace(&cleaned, "");
    let cleaned = ORDINAL_RE.replace_all(&cleaned, "$1");
    let cleaned = cleaned.trim().trim_end_matches('.');

    FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(cleaned, f).ok())
        .filter(|d| d.year() >= 1900)
}

/// Resolve both dates of a record, or say which one needs review.
pub fn resolve(record: &ActivityRecord) -> Result<DateRange, SyncError> {
    let start = parse_date(&record.start_date_raw).ok_or_else(|| SyncError::InvalidDate {
        field: "Start Date",
        raw: record.start_date_raw.clone(),
    })?;
    let end = parse_date(&record.end_date_raw).ok_or_else(|| SyncError::InvalidDate {
        field: "End Date",
        raw: record.end_date_raw.clone(),
    })?;
    if end < start {
        return Err(SyncError::InvalidDate {
            field: "End Date",
            raw: format!("{} (before Start Date {})", record.end_date_raw, record.start_date_raw),
        });
    }
    Ok(DateRange { start, end })
}

/// Canonical bucket label, e.g. "July - 2025".
pub fn month_label(date: NaiveDate) -> String {
    date.format("%B - %Y").to_string()
}

/// Month labels covering `[start, end]` inclusive, oldest first.
///
/// Callers must reject `end < start`; this returns an empty list for it.
pub fn month_buckets(start: NaiveDate, end: NaiveDate) -> Vec<String> {
    let Some(mut cursor) = start.with_day(1) else {
        return Vec::new();
    };
    let Some(last) = end.with_day(1) else {
        return Vec::new();
    };

    let mut labels = Vec::new();
    while cursor <= last {
        labels.push(month_label(cursor));
        match cursor.checked_add_months(Months::new(1)) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    labels
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NOT_FOUND;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parses_common_formats() {
        assert_eq!(parse_date("2025-07-15"), Some(d(2025, 7, 15)));
        assert_eq!(parse_date("July 15, 2025"), Some(d(2025, 7, 15)));
        assert_eq!(parse_date("Jul 15, 2025"), Some(d(2025, 7, 15)));
        assert_eq!(parse_date("15 July 2025"), Some(d(2025, 7, 15)));
        assert_eq!(parse_date("07/15/2025"), Some(d(2025, 7, 15)));
        assert_eq!(parse_date("Tuesday, July 15th, 2025"), Some(d(2025, 7, 15)));
        assert_eq!(parse_date("  September   2,  2025 "), Some(d(2025, 9, 2)));
    }

    #[test]
    fn rejects_garbage_and_sentinel() {
        assert_eq!(parse_date(NOT_FOUND), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("next week"), None);
        assert_eq!(parse_date("July 15"), None);
        assert_eq!(parse_date("2025-13-01"), None);
    }

    #[test]
    fn buckets_span_inclusive_months() {
        let labels = month_buckets(d(2025, 7, 15), d(2025, 9, 2));
        assert_eq!(labels, vec!["July - 2025", "August - 2025", "September - 2025"]);
    }

    #[test]
    fn buckets_cross_year_boundary() {
        let labels = month_buckets(d(2025, 12, 30), d(2026, 1, 2));
        assert_eq!(labels, vec!["December - 2025", "January - 2026"]);
    }

    #[test]
    fn single_day_is_one_bucket() {
        assert_eq!(month_buckets(d(2025, 2, 3), d(2025, 2, 3)), vec!["February - 2025"]);
    }

    #[test]
    fn reversed_range_is_empty() {
        assert!(month_buckets(d(2025, 9, 1), d(2025, 7, 1)).is_empty());
    }

    #[test]
    fn resolve_reports_the_bad_field() {
        let mut r = ActivityRecord::empty("");
        r.end_date_raw = "2025-07-20".into();
        let err = resolve(&r).unwrap_err();
        assert!(err.to_string().contains("Start Date"));

        r.start_date_raw = "2025-07-21".into();
        let err = resolve(&r).unwrap_err();
        assert!(err.to_string().contains("End Date"));

        r.end_date_raw = "July 25, 2025".into();
        let range = resolve(&r).unwrap();
        assert_eq!(range.start, d(2025, 7, 21));
        assert_eq!(range.end, d(2025, 7, 25));
    }
}
