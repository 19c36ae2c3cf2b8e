use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use crate::audit;
use crate::error::{StoreError, SyncError};
use crate::model::AuditLogEntry;
use crate::store::TabularStore;

/// Where the previous runs left off.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorState {
    /// Max readable logged timestamp.
    pub watermark: Option<DateTime<Utc>>,
    /// Every logged message id.
    pub seen: HashSet<String>,
}

impl CursorState {
    pub fn from_entries(entries: &[AuditLogEntry]) -> Self {
        CursorState {
            watermark: entries.iter().filter_map(|e| e.timestamp).max(),
            seen: entries.iter().map(|e| e.message_id.clone()).collect(),
        }
    }
}

/// Read the sync log into a cursor. A log bucket that does not exist yet
/// means a first run.
pub async fn load(store: &dyn TabularStore, doc_id: &str) -> Result<CursorState, SyncError> {
    match audit::read_entries(store, doc_id).await {
        Ok(entries) => {
            let state = CursorState::from_entries(&entries);
            info!(
                "Sync log: {} processed message(s), watermark {}",
                state.seen.len(),
                state
                    .watermark
                    .map(|w| w.to_rfc3339())
                    .unwrap_or_else(|| "none".into())
            );
            Ok(state)
        }
        Err(StoreError::BucketNotFound(name)) => {
            warn!("No '{}' bucket yet, starting from scratch", name);
            Ok(CursorState::default())
        }
        Err(e) => Err(SyncError::LogRead(e)),
    }
}

/// Manual override first, then the log watermark, else unbounded.
pub fn lower_bound(
    since: Option<NaiveDate>,
    watermark: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    since
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .or(watermark)
}

/// Mail search query: sender, each required phrase, optional lower bound.
pub fn build_query(sender: &str, phrases: &[String], after: Option<DateTime<Utc>>) -> String {
    let mut terms = Vec::with_capacity(phrases.len() + 2);
    if !sender.trim().is_empty() {
        terms.push(format!("from:{}", sender.trim()));
    }
    for phrase in phrases {
        let p = phrase.trim().replace('"', "");
        if !p.is_empty() {
            terms.push(format!("\"{}\"", p));
        }
    }
    if let Some(t) = after {
        terms.push(format!("after:{}", t.timestamp()));
    }
    terms.join(" ")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::LogStatus;
    use crate::store::sqlite::SqliteStore;

    #[test]
    fn query_terms() {
        let after = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let q = build_query(
            "osa@school.edu",
            &["Activity Request Form".into(), "Request for Approval".into()],
            Some(after),
        );
        assert_eq!(
            q,
            "from:osa@school.edu \"Activity Request Form\" \"Request for Approval\" after:1751328000"
        );
        assert_eq!(build_query("a@b.c", &[], None), "from:a@b.c");
    }

    #[test]
    fn manual_override_beats_watermark() {
        let wm = Utc.with_ymd_and_hms(2025, 8, 9, 10, 30, 0).unwrap();
        let since = NaiveDate::from_ymd_opt(2025, 1, 1);
        assert_eq!(
            lower_bound(since, Some(wm)),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(lower_bound(None, Some(wm)), Some(wm));
        assert_eq!(lower_bound(None, None), None);
    }

    #[test]
    fn watermark_is_max_timestamp() {
        let e = |id: &str, h: u32| AuditLogEntry {
            timestamp: Some(Utc.with_ymd_and_hms(2025, 7, 1, h, 0, 0).unwrap()),
            message_id: id.into(),
            status: LogStatus::Success,
            organization: String::new(),
            title: String::new(),
        };
        let state = CursorState::from_entries(&[e("a", 5), e("b", 9), e("c", 2)]);
        assert_eq!(state.watermark, Some(Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap()));
        assert_eq!(state.seen.len(), 3);

        let mut unreadable = e("d", 11);
        unreadable.timestamp = None;
        let state = CursorState::from_entries(&[e("a", 5), unreadable]);
        assert_eq!(state.watermark, Some(Utc.with_ymd_and_hms(2025, 7, 1, 5, 0, 0).unwrap()));
        assert!(state.seen.contains("d"));
    }

    #[tokio::test]
    async fn missing_log_bucket_means_fresh_start() {
        let store = SqliteStore::in_memory().unwrap();
        let state = load(&store, "doc").await.unwrap();
        assert_eq!(state, CursorState::default());
    }
}
