//! Gmail API v1 source.

use async_trait::async_trait;
use serde::Deserialize;

use super::{MailMessage, MailSource, MessagePage};
use crate::error::SourceError;
use crate::http::{send_with_retry, RetryPolicy};

const MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

pub struct GmailSource {
    client: reqwest::Client,
    access_token: String,
    retry: RetryPolicy,
}

impl GmailSource {
    pub fn new(access_token: &str) -> Self {
        GmailSource {
            client: reqwest::Client::new(),
            access_token: access_token.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, SourceError> {
        let resp = send_with_retry(request.bearer_auth(&self.access_token), &self.retry).await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::AuthExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl MailSource for GmailSource {
    async fn query(
        &self,
        filter: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, SourceError> {
        let mut params = vec![
            ("q", filter.to_string()),
            ("maxResults", page_size.to_string()),
        ];
        if let Some(t) = page_token {
            params.push(("pageToken", t.to_string()));
        }
        let resp = self.send(self.client.get(MESSAGES_URL).query(&params)).await?;
        let list: MessageListResponse = resp.json().await?;
        Ok(MessagePage {
            ids: list.messages.into_iter().map(|m| m.id).collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn get(&self, id: &str) -> Result<MailMessage, SourceError> {
        let resp = self
            .send(
                self.client
                    .get(format!("{}/{}", MESSAGES_URL, id))
                    .query(&[("format", "full")]),
            )
            .await?;
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_response_without_messages() {
        let list: MessageListResponse = serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(list.messages.is_empty());
        assert!(list.next_page_token.is_none());
    }

    #[test]
    fn full_message_shape() {
        let raw = r#"{
            "id": "18f0",
            "internalDate": "1751360400000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [{"name": "Subject", "value": "Activity Request"}],
                "parts": [
                    {"mimeType": "text/html", "body": {"size": 11, "data": "PGI-aGk8L2I-"}}
                ]
            }
        }"#;
        let msg: MailMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.subject(), "Activity Request");
        assert_eq!(msg.html_body().as_deref(), Some("<b>hi</b>"));
        assert_eq!(msg.id, "18f0");
        assert_eq!(msg.sent_date().map(|d| d.timestamp()), Some(1_751_360_400));
        assert_eq!(msg.received_at(), msg.sent_date());
    }
}
