//! Mail source: filtered, paginated discovery of request emails and
//! retrieval of their HTML bodies.

pub mod gmail;

use std::collections::HashSet;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::error::SourceError;
use crate::observer::TaskObserver;

#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

/// MIME part tree as returned by the mail API (`format=full`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub id: String,
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: MessagePart,
}

impl MailMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn subject(&self) -> String {
        self.header("Subject").unwrap_or_default().to_string()
    }

    /// `Date` header, falling back to the server's receive time.
    pub fn sent_date(&self) -> Option<DateTime<Utc>> {
        self.date_header().or_else(|| self.internal_date())
    }

    /// Server receive time, the clock the `after:` search term filters on.
    /// Falls back to the `Date` header.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.internal_date().or_else(|| self.date_header())
    }

    fn date_header(&self) -> Option<DateTime<Utc>> {
        let date = self.header("Date")?;
        DateTime::parse_from_rfc2822(date.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    fn internal_date(&self) -> Option<DateTime<Utc>> {
        self.internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }

    /// First `text/html` body, or `text/plain` when there is no HTML part.
    pub fn html_body(&self) -> Option<String> {
        find_body(&self.payload, "text/html").or_else(|| find_body(&self.payload, "text/plain"))
    }
}

fn find_body(part: &MessagePart, mime: &str) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case(mime) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            return decode_url_safe_base64(data);
        }
    }
    part.parts.iter().find_map(|p| find_body(p, mime))
}

/// Decode URL-safe base64 with or without padding.
pub fn decode_url_safe_base64(data: &str) -> Option<String> {
    let trimmed = data.trim_end_matches('=');
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

#[async_trait]
pub trait MailSource: Send + Sync {
    async fn query(
        &self,
        filter: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, SourceError>;

    async fn get(&self, id: &str) -> Result<MailMessage, SourceError>;
}

/// Collect candidate ids across pages, skipping any in `seen`, up to `cap`.
///
/// Order is the source's (newest first for Gmail).
pub async fn discover(
    source: &dyn MailSource,
    filter: &str,
    seen: &HashSet<String>,
    page_size: usize,
    cap: usize,
    observer: &dyn TaskObserver,
) -> Result<Vec<String>, SourceError> {
    let mut found: Vec<String> = Vec::new();
    let mut fresh: HashSet<String> = HashSet::new();
    let mut token: Option<String> = None;
    let mut scanned = 0usize;

    loop {
        let page = source.query(filter, page_size, token.as_deref()).await?;
        scanned += page.ids.len();
        for id in page.ids {
            if found.len() >= cap {
                break;
            }
            if seen.contains(&id) || !fresh.insert(id.clone()) {
                continue;
            }
            found.push(id);
        }

        let msg = format!("Scanned {} messages, {} new so far", scanned, found.len());
        info!("{}", msg);
        observer.status(&msg);

        if found.len() >= cap {
            info!("Reached candidate cap of {}", cap);
            break;
        }
        match page.next_page_token {
            Some(t) if !t.is_empty() => token = Some(t),
            _ => break,
        }
    }

    Ok(found)
}

// ── Tests ──


#[cfg(test)]
mod tests {
    use super::fake::FakeMailSource;
    use super::*;
    use crate::observer::TaskBoard;
    use chrono::TimeZone;

    fn source_with(n: usize) -> FakeMailSource {
        let mut src = FakeMailSource::default();
        for i in 0..n {
            let sent = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(i as i64);
            src.push_html(&format!("m{:04}", i), "s", sent, "<p>x</p>");
        }
        src
    }

    #[tokio::test]
    async fn pages_until_exhausted_and_skips_seen() {
        let src = source_with(7);
        let board = TaskBoard::default();
        let seen: HashSet<String> = ["m0006".to_string(), "m0001".to_string()].into();
        let ids = discover(&src, "q", &seen, 3, 1000, &board).await.unwrap();
        assert_eq!(ids, vec!["m0005", "m0004", "m0003", "m0002", "m0000"]);
        assert_eq!(src.filters.lock().unwrap().len(), 3);
        assert_eq!(board.statuses().len(), 3);
    }

    #[tokio::test]
    async fn stops_at_cap() {
        let src = source_with(10);
        let board = TaskBoard::default();
        let ids = discover(&src, "q", &HashSet::new(), 4, 6, &board).await.unwrap();
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], "m0009");
        assert_eq!(src.filters.lock().unwrap().len(), 2);
    }

    #[test]
    fn html_part_is_preferred() {
        let mut src = FakeMailSource::default();
        let sent = Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap();
        src.push_html("a", "Subj", sent, "<table></table>");
        let msg = &src.messages["a"];
        assert_eq!(msg.html_body().as_deref(), Some("<table></table>"));
        assert_eq!(msg.subject(), "Subj");
        assert_eq!(msg.sent_date(), Some(sent));
    }

    #[test]
    fn receive_time_wins_over_date_header() {
        let mut src = FakeMailSource::default();
        let sent = Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap();
        let received = Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap();
        src.push_skewed("a", "Subj", sent, received, "<p>x</p>");
        let msg = &src.messages["a"];
        assert_eq!(msg.sent_date(), Some(sent));
        assert_eq!(msg.received_at(), Some(received));

        let mut no_internal = msg.clone();
        no_internal.internal_date = None;
        assert_eq!(no_internal.received_at(), Some(sent));
    }

    #[test]
    fn padded_base64_decodes() {
        assert_eq!(decode_url_safe_base64("aGk=").as_deref(), Some("hi"));
        assert_eq!(decode_url_safe_base64("aGk").as_deref(), Some("hi"));
    }
}
