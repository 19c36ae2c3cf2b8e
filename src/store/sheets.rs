//! Google Sheets API v4 backend.
//!
//! A bucket is a sheet (tab); bucket ids are sheet ids. Mutations go
//! through `spreadsheets.batchUpdate`, which Google applies atomically.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    BucketRef, Color, MutationOp, MutationReply, ReadRange, Structure, TabularStore,
};
use crate::encode::Cell;
use crate::error::StoreError;
use crate::http::{send_with_retry, RetryPolicy};

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Appended values are stored as typed, never re-parsed as numbers,
/// dates or formulas.
const APPEND_PARAMS: [(&str, &str); 2] = [
    ("valueInputOption", "RAW"),
    ("insertDataOption", "INSERT_ROWS"),
];

// ── API response types ──

#[derive(Debug, Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    replies: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddSheetReply {
    add_sheet: SheetEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    value_ranges: Vec<ValueRange>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

// ── Client ──

pub struct SheetsStore {
    client: reqwest::Client,
    access_token: String,
    retry: RetryPolicy,
}

impl SheetsStore {
    pub fn new(access_token: &str) -> Self {
        SheetsStore {
            client: reqwest::Client::new(),
            access_token: access_token.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let resp = send_with_retry(request.bearer_auth(&self.access_token), &self.retry).await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        Err(StoreError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl TabularStore for SheetsStore {
    async fn get_structure(&self, doc_id: &str) -> Result<Structure, StoreError> {
        let resp = self
            .send(
                self.client
                    .get(format!("{}/{}", API_BASE, doc_id))
                    .query(&[("fields", "sheets.properties(sheetId,title)")]),
            )
            .await?;
        let parsed: SpreadsheetResponse = resp.json().await?;
        Ok(Structure {
            buckets: parsed
                .sheets
                .into_iter()
                .map(|s| BucketRef {
                    name: s.properties.title,
                    id: s.properties.sheet_id,
                })
                .collect(),
        })
    }

    async fn batch_mutate(
        &self,
        doc_id: &str,
        ops: Vec<MutationOp>,
    ) -> Result<Vec<MutationReply>, StoreError> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let mut requests = Vec::new();
        let mut owners = Vec::new();
        for (i, op) in ops.iter().enumerate() {
            for r in to_requests(op) {
                requests.push(r);
                owners.push(i);
            }
        }
        debug!("batchUpdate: {} ops -> {} requests", ops.len(), requests.len());

        let resp = self
            .send(
                self.client
                    .post(format!("{}/{}:batchUpdate", API_BASE, doc_id))
                    .json(&json!({ "requests": requests })),
            )
            .await?;
        let parsed: BatchUpdateResponse = resp.json().await?;

        let mut replies = vec![MutationReply::Empty; ops.len()];
        for (raw, owner) in parsed.replies.into_iter().zip(owners) {
            if raw.get("addSheet").is_some() {
                let reply: AddSheetReply = serde_json::from_value(raw)?;
                replies[owner] = MutationReply::AddBucket(BucketRef {
                    name: reply.add_sheet.properties.title,
                    id: reply.add_sheet.properties.sheet_id,
                });
            }
        }
        Ok(replies)
    }

    async fn read_values(
        &self,
        doc_id: &str,
        ranges: &[ReadRange],
    ) -> Result<Vec<Vec<Vec<String>>>, StoreError> {
        if ranges.is_empty() {
            return Ok(Vec::new());
        }
        let mut query: Vec<(&str, String)> = ranges.iter().map(|r| ("ranges", r.a1())).collect();
        query.push(("majorDimension", "ROWS".to_string()));
        query.push(("valueRenderOption", "FORMULA".to_string()));

        let result = self
            .send(
                self.client
                    .get(format!("{}/{}/values:batchGet", API_BASE, doc_id))
                    .query(&query),
            )
            .await;
        let resp = match result {
            Err(StoreError::Api { status: 400, message }) if message.contains("Unable to parse range") => {
                let missing = ranges
                    .iter()
                    .find(|r| message.contains(&r.bucket))
                    .unwrap_or(&ranges[0]);
                return Err(StoreError::BucketNotFound(missing.bucket.clone()));
            }
            other => other?,
        };
        let parsed: BatchGetResponse = resp.json().await?;
        if parsed.value_ranges.len() != ranges.len() {
            return Err(StoreError::Invalid(format!(
                "asked for {} ranges, got {}",
                ranges.len(),
                parsed.value_ranges.len()
            )));
        }
        Ok(parsed
            .value_ranges
            .into_iter()
            .map(|vr| {
                vr.values
                    .into_iter()
                    .map(|row| row.into_iter().map(value_to_string).collect())
                    .collect()
            })
            .collect())
    }

    async fn append_values(
        &self,
        doc_id: &str,
        bucket: &str,
        rows: Vec<Vec<Cell>>,
    ) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let range = ReadRange::new(bucket, rows.iter().map(Vec::len).max().unwrap_or(1));
        let mut url = url::Url::parse(&format!("{}/{}/values", API_BASE, doc_id))
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Invalid("spreadsheet URL cannot be a base".into()))?
            .push(&format!("{}:append", range.a1()));

        let values: Vec<Vec<String>> = rows
            .iter()
            .map(|row| row.iter().map(Cell::rendered).collect())
            .collect();
        self.send(
            self.client
                .post(url)
                .query(&APPEND_PARAMS)
                .json(&json!({ "values": values })),
        )
        .await?;
        Ok(())
    }
}

fn value_to_string(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn color_json(c: Color) -> Value {
    json!({
        "red": c.0 as f64 / 255.0,
        "green": c.1 as f64 / 255.0,
        "blue": c.2 as f64 / 255.0,
    })
}

fn cell_json(cell: &Cell) -> Value {
    match cell.formula() {
        Some(f) => json!({ "userEnteredValue": { "formulaValue": f } }),
        None => json!({ "userEnteredValue": { "stringValue": cell.rendered() } }),
    }
}

fn column_range(bucket_id: i64, column: usize) -> Value {
    json!({
        "sheetId": bucket_id,
        "startRowIndex": 1,
        "startColumnIndex": column,
        "endColumnIndex": column + 1,
    })
}

/// Sheets `batchUpdate` requests for one op. Column widths fan out to one
/// request per column.
fn to_requests(op: &MutationOp) -> Vec<Value> {
    match op {
        MutationOp::AddBucket { name } => {
            vec![json!({ "addSheet": { "properties": { "title": name } } })]
        }
        MutationOp::AppendDimension { bucket_id, rows } => vec![json!({
            "appendDimension": { "sheetId": bucket_id, "dimension": "ROWS", "length": rows }
        })],
        MutationOp::UpdateCells {
            bucket_id,
            start_row,
            start_col,
            rows,
        } => vec![json!({
            "updateCells": {
                "start": { "sheetId": bucket_id, "rowIndex": start_row, "columnIndex": start_col },
                "rows": rows
                    .iter()
                    .map(|r| json!({ "values": r.iter().map(cell_json).collect::<Vec<_>>() }))
                    .collect::<Vec<_>>(),
                "fields": "userEnteredValue",
            }
        })],
        MutationOp::FormatHeader {
            bucket_id,
            columns,
            style,
        } => {
            let align = if style.centered { "CENTER" } else { "LEFT" };
            vec![json!({
                "repeatCell": {
                    "range": {
                        "sheetId": bucket_id,
                        "startRowIndex": 0,
                        "endRowIndex": 1,
                        "startColumnIndex": 0,
                        "endColumnIndex": columns,
                    },
                    "cell": {
                        "userEnteredFormat": {
                            "backgroundColor": color_json(style.background),
                            "horizontalAlignment": align,
                            "textFormat": {
                                "foregroundColor": color_json(style.foreground),
                                "bold": style.bold,
                            },
                        }
                    },
                    "fields": "userEnteredFormat(backgroundColor,textFormat,horizontalAlignment)",
                }
            })]
        }
        MutationOp::FreezeRows { bucket_id, rows } => vec![json!({
            "updateSheetProperties": {
                "properties": { "sheetId": bucket_id, "gridProperties": { "frozenRowCount": rows } },
                "fields": "gridProperties.frozenRowCount",
            }
        })],
        MutationOp::ColumnWidths { bucket_id, widths } => widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                json!({
                    "updateDimensionProperties": {
                        "range": {
                            "sheetId": bucket_id,
                            "dimension": "COLUMNS",
                            "startIndex": i,
                            "endIndex": i + 1,
                        },
                        "properties": { "pixelSize": w },
                        "fields": "pixelSize",
                    }
                })
            })
            .collect(),
        MutationOp::Validation {
            bucket_id,
            column,
            values,
        } => vec![json!({
            "setDataValidation": {
                "range": column_range(*bucket_id, *column),
                "rule": {
                    "condition": {
                        "type": "ONE_OF_LIST",
                        "values": values
                            .iter()
                            .map(|v| json!({ "userEnteredValue": v }))
                            .collect::<Vec<_>>(),
                    },
                    "showCustomUi": true,
                    "strict": true,
                },
            }
        })],
        MutationOp::ConditionalFormat {
            bucket_id,
            column,
            value,
            background,
        } => vec![json!({
            "addConditionalFormatRule": {
                "rule": {
                    "ranges": [column_range(*bucket_id, *column)],
                    "booleanRule": {
                        "condition": {
                            "type": "TEXT_EQ",
                            "values": [{ "userEnteredValue": value }],
                        },
                        "format": { "backgroundColor": color_json(*background) },
                    },
                },
                "index": 0,
            }
        })],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyperlink_cells_become_formulas() {
        let v = cell_json(&Cell::Hyperlink {
            url: "https://x/a\"b".into(),
            text: "L".into(),
        });
        assert_eq!(
            v["userEnteredValue"]["formulaValue"],
            "=HYPERLINK(\"https://x/a\"\"b\",\"L\")"
        );
        let t = cell_json(&Cell::text("plain"));
        assert_eq!(t["userEnteredValue"]["stringValue"], "plain");
    }

    #[test]
    fn column_widths_fan_out() {
        let reqs = to_requests(&MutationOp::ColumnWidths {
            bucket_id: 7,
            widths: vec![100, 200, 300],
        });
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[2]["updateDimensionProperties"]["properties"]["pixelSize"], 300);
        assert_eq!(reqs[2]["updateDimensionProperties"]["range"]["startIndex"], 2);
    }

    #[test]
    fn appends_are_raw() {
        assert!(APPEND_PARAMS.contains(&("valueInputOption", "RAW")));
    }

    #[test]
    fn add_sheet_reply_shape() {
        let raw = json!({ "addSheet": { "properties": { "sheetId": 42, "title": "July - 2025", "index": 3 } } });
        let reply: AddSheetReply = serde_json::from_value(raw).unwrap();
        assert_eq!(reply.add_sheet.properties.sheet_id, 42);
    }

    #[test]
    fn header_style_colors_are_fractions() {
        let reqs = to_requests(&MutationOp::FormatHeader {
            bucket_id: 1,
            columns: 5,
            style: crate::store::HeaderStyle {
                background: Color(255, 0, 0),
                foreground: Color::WHITE,
                bold: true,
                centered: true,
            },
        });
        let fmt = &reqs[0]["repeatCell"]["cell"]["userEnteredFormat"];
        assert_eq!(fmt["backgroundColor"]["red"], 1.0);
        assert_eq!(fmt["horizontalAlignment"], "CENTER");
        assert_eq!(fmt["textFormat"]["bold"], true);
    }
}
