//! Tabular destination: a document made of named buckets (sheets) of cells.
//!
//! Backends:
//! - sheets: Google Sheets API v4
//! - sqlite: local file / in-memory store with the same semantics

pub mod sheets;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::encode::{Cell, MONTH_HEADER};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRef {
    pub name: String,
    pub id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Structure {
    pub buckets: Vec<BucketRef>,
}

impl Structure {
    pub fn find(&self, name: &str) -> Option<&BucketRef> {
        self.buckets.iter().find(|b| b.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color(pub u8, pub u8, pub u8);

impl Color {
    pub const WHITE: Color = Color(0xFF, 0xFF, 0xFF);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeaderStyle {
    pub background: Color,
    pub foreground: Color,
    pub bold: bool,
    pub centered: bool,
}

/// One entry of a grouped `batch_mutate` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    AddBucket {
        name: String,
    },
    AppendDimension {
        bucket_id: i64,
        rows: usize,
    },
    UpdateCells {
        bucket_id: i64,
        start_row: usize,
        start_col: usize,
        rows: Vec<Vec<Cell>>,
    },
    FormatHeader {
        bucket_id: i64,
        columns: usize,
        style: HeaderStyle,
    },
    FreezeRows {
        bucket_id: i64,
        rows: usize,
    },
    ColumnWidths {
        bucket_id: i64,
        widths: Vec<u32>,
    },
    Validation {
        bucket_id: i64,
        column: usize,
        values: Vec<String>,
    },
    ConditionalFormat {
        bucket_id: i64,
        column: usize,
        value: String,
        background: Color,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationReply {
    AddBucket(BucketRef),
    Empty,
}

/// Leading `columns` columns of a bucket, all rows unless limited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRange {
    pub bucket: String,
    pub columns: usize,
    pub rows: Option<usize>,
}

impl ReadRange {
    pub fn new(bucket: &str, columns: usize) -> Self {
        ReadRange {
            bucket: bucket.to_string(),
            columns: columns.max(1),
            rows: None,
        }
    }

    /// Only the first `rows` rows.
    pub fn limit(mut self, rows: usize) -> Self {
        self.rows = Some(rows.max(1));
        self
    }

    /// A1 notation, e.g. `'July - 2025'!A:K` or `'July - 2025'!A1:K1`.
    pub fn a1(&self) -> String {
        let bucket = self.bucket.replace('\'', "''");
        let last = column_letter(self.columns - 1);
        match self.rows {
            Some(n) => format!("'{}'!A1:{}{}", bucket, last, n),
            None => format!("'{}'!A:{}", bucket, last),
        }
    }
}

/// Zero-based column index to spreadsheet letters (0 → A, 26 → AA).
pub fn column_letter(mut index: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[async_trait]
pub trait TabularStore: Send + Sync {
    async fn get_structure(&self, doc_id: &str) -> Result<Structure, StoreError>;

    /// Apply all ops atomically; one reply per op, in order.
    async fn batch_mutate(
        &self,
        doc_id: &str,
        ops: Vec<MutationOp>,
    ) -> Result<Vec<MutationReply>, StoreError>;

    /// Rows of each range up to its last non-empty row. A missing bucket is
    /// [`StoreError::BucketNotFound`].
    async fn read_values(
        &self,
        doc_id: &str,
        ranges: &[ReadRange],
    ) -> Result<Vec<Vec<Vec<String>>>, StoreError>;

    async fn append_values(
        &self,
        doc_id: &str,
        bucket: &str,
        rows: Vec<Vec<Cell>>,
    ) -> Result<(), StoreError>;
}

/// Current data row count (header included) of each named bucket. Every
/// column of the row is read, so a row with a blank status still counts.
pub async fn row_counts(
    store: &dyn TabularStore,
    doc_id: &str,
    buckets: &[String],
) -> Result<HashMap<String, usize>, StoreError> {
    if buckets.is_empty() {
        return Ok(HashMap::new());
    }
    let ranges: Vec<ReadRange> = buckets
        .iter()
        .map(|b| ReadRange::new(b, MONTH_HEADER.len()))
        .collect();
    let values = store.read_values(doc_id, &ranges).await?;
    Ok(buckets
        .iter()
        .cloned()
        .zip(values.iter().map(|rows| rows.len()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(10), "K");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(27), "AB");
    }

    #[test]
    fn a1_quotes_bucket_names() {
        assert_eq!(ReadRange::new("July - 2025", 11).a1(), "'July - 2025'!A:K");
        assert_eq!(ReadRange::new("Bob's", 1).a1(), "'Bob''s'!A:A");
        assert_eq!(ReadRange::new("Sync Log", 5).limit(1).a1(), "'Sync Log'!A1:E1");
    }

    #[tokio::test]
    async fn blank_status_cell_still_counts_the_row() {
        let store = SqliteStore::in_memory().unwrap();
        let replies = store
            .batch_mutate("doc", vec![MutationOp::AddBucket { name: "July - 2025".into() }])
            .await
            .unwrap();
        let MutationReply::AddBucket(july) = &replies[0] else {
            panic!("expected AddBucket reply");
        };
        let row = |status: &str, id: &str| vec![Cell::text(status), Cell::text(id)];
        store
            .batch_mutate(
                "doc",
                vec![MutationOp::UpdateCells {
                    bucket_id: july.id,
                    start_row: 0,
                    start_col: 0,
                    rows: vec![row("Status", "Header"), row("Approved", "a"), row("", "b")],
                }],
            )
            .await
            .unwrap();

        let status_only = store
            .read_values("doc", &[ReadRange::new("July - 2025", 1)])
            .await
            .unwrap();
        assert_eq!(status_only[0].len(), 2);

        let counts = row_counts(&store, "doc", &["July - 2025".to_string()]).await.unwrap();
        assert_eq!(counts["July - 2025"], 3);
    }
}
