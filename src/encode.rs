use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::ActivityRecord;

/// Initial status written into column 0 of every new row.
pub const INITIAL_STATUS: &str = "Pending";

pub const MONTH_HEADER: [&str; 11] = [
    "Status",
    "Date Received",
    "Organization",
    "Activity Title",
    "Description",
    "Start Date",
    "End Date",
    "Time",
    "Venue",
    "Implementation",
    "Document",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Cell {
    Text(String),
    Hyperlink { url: String, text: String },
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    /// Formula string for formula-like cells, `None` for plain text.
    pub fn formula(&self) -> Option<String> {
        match self {
            Cell::Text(_) => None,
            Cell::Hyperlink { url, text } => Some(hyperlink_formula(url, text)),
        }
    }

    /// What a user sees typed into the cell.
    pub fn rendered(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Hyperlink { url, text } => hyperlink_formula(url, text),
        }
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('"', "\"\"")
}

pub fn hyperlink_formula(url: &str, text: &str) -> String {
    format!("=HYPERLINK(\"{}\",\"{}\")", escape_quotes(url), escape_quotes(text))
}

/// Render a record into the 11 monthly-bucket columns.
pub fn encode_row(record: &ActivityRecord, sent_date: DateTime<Utc>, link: &str) -> Vec<Cell> {
    vec![
        Cell::text(INITIAL_STATUS),
        Cell::text(sent_date.format("%Y-%m-%d %H:%M").to_string()),
        Cell::text(&record.organization),
        Cell::text(&record.title),
        Cell::text(&record.description),
        Cell::text(&record.start_date_raw),
        Cell::text(&record.end_date_raw),
        Cell::text(&record.time),
        Cell::text(&record.venue),
        Cell::text(&record.implementation_type),
        Cell::Hyperlink {
            url: link.to_string(),
            text: "View Document".to_string(),
        },
    ]
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hyperlink_escapes_quotes() {
        let cell = Cell::Hyperlink {
            url: "https://x/a\"b".into(),
            text: "L".into(),
        };
        assert_eq!(cell.rendered(), "=HYPERLINK(\"https://x/a\"\"b\",\"L\")");
    }

    #[test]
    fn hyperlink_escapes_label_too() {
        assert_eq!(
            hyperlink_formula("u", "say \"hi\""),
            "=HYPERLINK(\"u\",\"say \"\"hi\"\"\")"
        );
    }

    #[test]
    fn plain_text_has_no_formula() {
        assert_eq!(Cell::text("=1+1").formula(), None);
        assert_eq!(Cell::text("=1+1").rendered(), "=1+1");
    }

    #[test]
    fn row_has_eleven_columns_with_status_first() {
        let mut r = ActivityRecord::empty("");
        r.organization = "Chess Club".into();
        let sent = Utc.with_ymd_and_hms(2025, 7, 1, 8, 30, 0).unwrap();
        let row = encode_row(&r, sent, "https://docs/x");
        assert_eq!(row.len(), MONTH_HEADER.len());
        assert_eq!(row[0], Cell::text(INITIAL_STATUS));
        assert_eq!(row[1], Cell::text("2025-07-01 08:30"));
        assert_eq!(row[2], Cell::text("Chess Club"));
        assert!(matches!(&row[10], Cell::Hyperlink { url, .. } if url == "https://docs/x"));
    }
}
