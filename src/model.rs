use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::encode::Cell;

/// Placeholder stored for any field the extractor could not find.
pub const NOT_FOUND: &str = "N/A";

/// Structured fields pulled from one request email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    pub organization: String,
    pub title: String,
    pub description: String,
    pub start_date_raw: String,
    pub end_date_raw: String,
    pub time: String,
    pub venue: String,
    pub implementation_type: String,
    #[serde(skip)]
    pub raw_html: String,
}

impl ActivityRecord {
    pub fn empty(raw_html: &str) -> Self {
        ActivityRecord {
            organization: NOT_FOUND.to_string(),
            title: NOT_FOUND.to_string(),
            description: NOT_FOUND.to_string(),
            start_date_raw: NOT_FOUND.to_string(),
            end_date_raw: NOT_FOUND.to_string(),
            time: NOT_FOUND.to_string(),
            venue: NOT_FOUND.to_string(),
            implementation_type: NOT_FOUND.to_string(),
            raw_html: raw_html.to_string(),
        }
    }
}

pub fn is_missing(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v == NOT_FOUND
}

// ── Tasks ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Fetching,
    Parsing,
    BuildingRequest,
    Writing,
    Done,
    Held,
    Skipped,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Held | TaskStatus::Skipped | TaskStatus::Error
        )
    }

    /// Whether moving from `self` to `next` keeps the task moving forward.
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next > self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailTask {
    pub id: String,
    pub subject: String,
    pub status: TaskStatus,
    pub error: Option<String>,
}

impl EmailTask {
    pub fn queued(id: &str) -> Self {
        EmailTask {
            id: id.to_string(),
            subject: String::new(),
            status: TaskStatus::Queued,
            error: None,
        }
    }

    /// Apply a patch. Backward transitions are dropped; returns whether the
    /// task changed.
    pub fn apply(&mut self, patch: &TaskPatch) -> bool {
        let mut changed = false;
        if let Some(next) = patch.status {
            if !self.status.can_advance_to(next) {
                return false;
            }
            self.status = next;
            changed = true;
        }
        if let Some(subject) = &patch.subject {
            self.subject = subject.clone();
            changed = true;
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
            changed = true;
        }
        changed
    }
}

/// Partial update for an [`EmailTask`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub subject: Option<String>,
    pub error: Option<String>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        TaskPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ── Parse outcomes ──

#[derive(Debug, Clone)]
pub enum ParsedResult {
    Success {
        message_id: String,
        record: ActivityRecord,
        month_buckets: Vec<String>,
        row_cells: Vec<Cell>,
        received_at: DateTime<Utc>,
    },
    Held {
        message_id: String,
        reason: String,
        record: ActivityRecord,
        received_at: DateTime<Utc>,
    },
    Error {
        message_id: String,
        subject: String,
        error: String,
        received_at: Option<DateTime<Utc>>,
    },
    /// Matched the filter but carries no request form.
    Skipped {
        message_id: String,
        subject: String,
        reason: String,
        received_at: DateTime<Utc>,
    },
}

impl ParsedResult {
    pub fn message_id(&self) -> &str {
        match self {
            ParsedResult::Success { message_id, .. }
            | ParsedResult::Held { message_id, .. }
            | ParsedResult::Error { message_id, .. }
            | ParsedResult::Skipped { message_id, .. } => message_id,
        }
    }
}

/// Resolved date range of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

// ── Destination ──

#[derive(Debug, Clone, PartialEq)]
pub struct DestinationBucket {
    pub name: String,
    pub id: i64,
    pub header_schema: Vec<&'static str>,
    pub last_row_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogStatus {
    Success,
    SuccessManual,
    Held(String),
    Error(String),
    Skipped(String),
}

impl LogStatus {
    pub fn render(&self) -> String {
        match self {
            LogStatus::Success => "SUCCESS".to_string(),
            LogStatus::SuccessManual => "SUCCESS (manual dates)".to_string(),
            LogStatus::Held(reason) => format!("HELD: {}", reason),
            LogStatus::Error(e) => format!("ERROR: {}", e),
            LogStatus::Skipped(reason) => format!("SKIPPED: {}", reason),
        }
    }

    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(reason) = raw.strip_prefix("HELD:") {
            LogStatus::Held(reason.trim().to_string())
        } else if let Some(e) = raw.strip_prefix("ERROR:") {
            LogStatus::Error(e.trim().to_string())
        } else if let Some(reason) = raw.strip_prefix("SKIPPED:") {
            LogStatus::Skipped(reason.trim().to_string())
        } else if raw == "SUCCESS (manual dates)" {
            LogStatus::SuccessManual
        } else {
            LogStatus::Success
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditLogEntry {
    /// Receive time of the message; `None` when the stored cell is unreadable.
    pub timestamp: Option<DateTime<Utc>>,
    pub message_id: String,
    pub status: LogStatus,
    pub organization: String,
    pub title: String,
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_moves_forward_only() {
        let mut t = EmailTask::queued("m1");
        assert!(t.apply(&TaskPatch::status(TaskStatus::Parsing)));
        assert!(!t.apply(&TaskPatch::status(TaskStatus::Fetching)));
        assert_eq!(t.status, TaskStatus::Parsing);
        assert!(t.apply(&TaskPatch::status(TaskStatus::Held)));
        assert!(!t.apply(&TaskPatch::status(TaskStatus::Done)));
        assert_eq!(t.status, TaskStatus::Held);
    }

    #[test]
    fn early_exit_from_parsing_to_error() {
        let mut t = EmailTask::queued("m1");
        t.apply(&TaskPatch::status(TaskStatus::Parsing));
        assert!(t.apply(&TaskPatch::status(TaskStatus::Error).with_error("boom")));
        assert_eq!(t.error.as_deref(), Some("boom"));
    }

    #[test]
    fn log_status_round_trips_through_text() {
        let held = LogStatus::Held("Invalid Start Date".into());
        assert_eq!(LogStatus::parse(&held.render()), held);
        assert_eq!(LogStatus::parse("SUCCESS"), LogStatus::Success);
    }
}
