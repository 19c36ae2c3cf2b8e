//! The sync log: one row per processed message, append-only.
//!
//! The log is the only durable cursor. Its max timestamp bounds the next
//! query and its ids form the dedup set.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::encode::Cell;
use crate::error::StoreError;
use crate::model::{AuditLogEntry, LogStatus, ParsedResult};
use crate::store::{ReadRange, TabularStore};

pub const LOG_BUCKET: &str = "Sync Log";
pub const LOG_HEADER: [&str; 5] = ["Timestamp", "Message ID", "Status", "Organization", "Title"];

// ── Reading ──

/// All log entries, oldest row first. A row with an unreadable timestamp
/// still counts as processed; it just has no say in the watermark.
pub async fn read_entries(
    store: &dyn TabularStore,
    doc_id: &str,
) -> Result<Vec<AuditLogEntry>, StoreError> {
    let mut values = store
        .read_values(doc_id, &[ReadRange::new(LOG_BUCKET, LOG_HEADER.len())])
        .await?;
    let rows = values.pop().unwrap_or_default();
    Ok(rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| parse_row(i, row))
        .collect())
}

fn parse_row(index: usize, row: &[String]) -> Option<AuditLogEntry> {
    let col = |i: usize| row.get(i).map(|s| s.trim()).unwrap_or_default();
    if index == 0 && col(0) == LOG_HEADER[0] {
        return None;
    }
    if col(1).is_empty() {
        return None;
    }
    let timestamp = match DateTime::parse_from_rfc3339(col(0)) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(_) => {
            warn!(
                "Sync log row {}: bad timestamp {:?}, keeping {} out of the watermark",
                index + 1,
                col(0),
                col(1)
            );
            None
        }
    };
    Some(AuditLogEntry {
        timestamp,
        message_id: col(1).to_string(),
        status: LogStatus::parse(col(2)),
        organization: col(3).to_string(),
        title: col(4).to_string(),
    })
}

// ── Writing ──

/// Log entries for one macro-batch. Errors are included only when
/// `log_errors` is set; `manual` marks successes written with supplied dates.
pub fn outcome_entries(
    results: &[ParsedResult],
    log_errors: bool,
    manual: bool,
    run_start: DateTime<Utc>,
) -> Vec<AuditLogEntry> {
    results
        .iter()
        .filter_map(|result| match result {
            ParsedResult::Success {
                message_id,
                record,
                received_at,
                ..
            } => Some(AuditLogEntry {
                timestamp: Some(*received_at),
                message_id: message_id.clone(),
                status: if manual {
                    LogStatus::SuccessManual
                } else {
                    LogStatus::Success
                },
                organization: record.organization.clone(),
                title: record.title.clone(),
            }),
            ParsedResult::Held {
                message_id,
                reason,
                record,
                received_at,
                ..
            } => Some(AuditLogEntry {
                timestamp: Some(*received_at),
                message_id: message_id.clone(),
                status: LogStatus::Held(reason.clone()),
                organization: record.organization.clone(),
                title: record.title.clone(),
            }),
            ParsedResult::Skipped {
                message_id,
                subject,
                reason,
                received_at,
            } => Some(AuditLogEntry {
                timestamp: Some(*received_at),
                message_id: message_id.clone(),
                status: LogStatus::Skipped(reason.clone()),
                organization: String::new(),
                title: subject.clone(),
            }),
            ParsedResult::Error {
                message_id,
                subject,
                error,
                received_at,
            } if log_errors => Some(AuditLogEntry {
                timestamp: Some(received_at.unwrap_or(run_start)),
                message_id: message_id.clone(),
                status: LogStatus::Error(error.clone()),
                organization: String::new(),
                title: subject.clone(),
            }),
            ParsedResult::Error { .. } => None,
        })
        .collect()
}

pub fn entry_row(entry: &AuditLogEntry) -> Vec<Cell> {
    vec![
        Cell::text(entry.timestamp.map(|t| t.to_rfc3339()).unwrap_or_default()),
        Cell::text(&entry.message_id),
        Cell::text(entry.status.render()),
        Cell::text(&entry.organization),
        Cell::text(&entry.title),
    ]
}

pub async fn append(
    store: &dyn TabularStore,
    doc_id: &str,
    entries: &[AuditLogEntry],
) -> Result<(), StoreError> {
    if entries.is_empty() {
        return Ok(());
    }
    store
        .append_values(doc_id, LOG_BUCKET, entries.iter().map(entry_row).collect())
        .await
}

// ── Reports ──

/// Latest entry per message id, in first-seen order.
fn latest_by_id(entries: &[AuditLogEntry]) -> Vec<&AuditLogEntry> {
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, &AuditLogEntry> = HashMap::new();
    for entry in entries {
        if latest.insert(entry.message_id.as_str(), entry).is_none() {
            order.push(entry.message_id.as_str());
        }
    }
    order.into_iter().filter_map(|id| latest.get(id).copied()).collect()
}

/// Messages whose most recent log row is still HELD.
pub fn still_held(entries: &[AuditLogEntry]) -> Vec<AuditLogEntry> {
    latest_by_id(entries)
        .into_iter()
        .filter(|e| matches!(e.status, LogStatus::Held(_)))
        .cloned()
        .collect()
}

/// Human-readable held-item report with remediation steps; `None` when
/// nothing is waiting for review.
pub fn held_report(held: &[AuditLogEntry]) -> Option<String> {
    if held.is_empty() {
        return None;
    }
    let mut out = format!("{} request(s) held for review:\n", held.len());
    for e in held {
        let reason = match &e.status {
            LogStatus::Held(r) => r.as_str(),
            _ => "",
        };
        out.push_str(&format!(
            "  - {} ({}) [{}]: {}\n",
            e.title, e.organization, e.message_id, reason
        ));
    }
    out.push_str(
        "Check the dates in each request, then run:\n  \
         activity_sync reprocess <MESSAGE_ID> --start YYYY-MM-DD --end YYYY-MM-DD",
    );
    Some(out)
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LogStats {
    pub success: usize,
    pub manual: usize,
    pub held: usize,
    pub errors: usize,
    pub skipped: usize,
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Counts by latest status per message.
pub fn stats(entries: &[AuditLogEntry]) -> LogStats {
    let mut s = LogStats {
        last_timestamp: entries.iter().filter_map(|e| e.timestamp).max(),
        ..Default::default()
    };
    for e in latest_by_id(entries) {
        match e.status {
            LogStatus::Success => s.success += 1,
            LogStatus::SuccessManual => s.manual += 1,
            LogStatus::Held(_) => s.held += 1,
            LogStatus::Error(_) => s.errors += 1,
            LogStatus::Skipped(_) => s.skipped += 1,
        }
    }
    s
}

// ── Tests ──
