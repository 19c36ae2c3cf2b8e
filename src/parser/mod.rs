pub mod dates;
pub mod rich;
pub mod table;

use chrono::{DateTime, Utc};

use crate::encode::encode_row;
use crate::error::SyncError;
use crate::link::LinkBuilder;
use crate::model::{is_missing, ActivityRecord, DateRange, ParsedResult};

/// Extract, validate and date-resolve one message body.
///
/// Missing organization or title is an error; an unusable date range is
/// held for review; a body with no recognizable form rows is skipped.
/// `sent_date` is only shown in the row; `received_at` is what gets logged.
pub fn process_message(
    message_id: &str,
    subject: &str,
    html: &str,
    sent_date: DateTime<Utc>,
    received_at: DateTime<Utc>,
    links: &dyn LinkBuilder,
) -> ParsedResult {
    let record = table::extract(html);

    if is_blank(&record) {
        return ParsedResult::Skipped {
            message_id: message_id.to_string(),
            subject: subject.to_string(),
            reason: "no request form found".to_string(),
            received_at,
        };
    }
    if let Err(e) = check_required(&record) {
        return ParsedResult::Error {
            message_id: message_id.to_string(),
            subject: subject.to_string(),
            error: e.to_string(),
            received_at: Some(received_at),
        };
    }
    match dates::resolve(&record) {
        Ok(range) => success(message_id, record, range, sent_date, received_at, links),
        Err(e) => ParsedResult::Held {
            message_id: message_id.to_string(),
            reason: e.to_string(),
            record,
            received_at,
        },
    }
}

pub fn check_required(record: &ActivityRecord) -> Result<(), SyncError> {
    if is_missing(&record.organization) {
        return Err(SyncError::MissingRequiredField {
            field: "Organization",
        });
    }
    if is_missing(&record.title) {
        return Err(SyncError::MissingRequiredField { field: "Title" });
    }
    Ok(())
}

/// Route a validated record to its month buckets and encode its row.
pub fn success(
    message_id: &str,
    record: ActivityRecord,
    range: DateRange,
    sent_date: DateTime<Utc>,
    received_at: DateTime<Utc>,
    links: &dyn LinkBuilder,
) -> ParsedResult {
    let link = links.build(&record);
    ParsedResult::Success {
        message_id: message_id.to_string(),
        month_buckets: dates::month_buckets(range.start, range.end),
        row_cells: encode_row(&record, sent_date, &link),
        record,
        received_at,
    }
}

fn is_blank(record: &ActivityRecord) -> bool {
    [
        &record.organization,
        &record.title,
        &record.description,
        &record.start_date_raw,
        &record.end_date_raw,
        &record.time,
        &record.venue,
        &record.implementation_type,
    ]
    .iter()
    .all(|v| is_missing(v))
}

// ── Tests ──
