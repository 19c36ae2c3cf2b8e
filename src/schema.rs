use std::collections::HashMap;

use tracing::{info, warn};

use crate::audit::{LOG_BUCKET, LOG_HEADER};
use crate::encode::{Cell, MONTH_HEADER};
use crate::error::StoreError;
use crate::store::{
    BucketRef, Color, HeaderStyle, MutationOp, MutationReply, ReadRange, TabularStore,
};

/// Closed set of review statuses offered in column 0 of monthly buckets.
pub const STATUS_VALUES: [(&str, Color); 5] = [
    ("Pending", Color(0xFF, 0xF2, 0xCC)),
    ("Approved", Color(0xD9, 0xEA, 0xD3)),
    ("For Revision", Color(0xFC, 0xE5, 0xCD)),
    ("Disapproved", Color(0xF4, 0xCC, 0xCC)),
    ("Cancelled", Color(0xD9, 0xD9, 0xD9)),
];

pub const HEADER_STYLE: HeaderStyle = HeaderStyle {
    background: Color(0x1F, 0x38, 0x64),
    foreground: Color::WHITE,
    bold: true,
    centered: true,
};

const MONTH_WIDTHS: [u32; 11] = [110, 140, 200, 220, 320, 120, 120, 140, 180, 140, 130];
const LOG_WIDTHS: [u32; 5] = [190, 180, 260, 200, 240];

/// Make sure every named bucket exists and is provisioned. Missing ones are
/// created in one grouped mutation, then styled in a second one together
/// with any existing bucket whose header row is still blank. Provisioned
/// buckets are never touched.
pub async fn ensure_buckets(
    store: &dyn TabularStore,
    doc_id: &str,
    required: &[String],
) -> Result<HashMap<String, BucketRef>, StoreError> {
    let structure = store.get_structure(doc_id).await?;
    let mut known: HashMap<String, BucketRef> = HashMap::new();
    let mut existing: Vec<BucketRef> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    for name in required {
        match structure.find(name) {
            Some(b) if !known.contains_key(name) => {
                known.insert(name.clone(), b.clone());
                existing.push(b.clone());
            }
            Some(_) => {}
            None if !missing.contains(name) => missing.push(name.clone()),
            None => {}
        }
    }

    let mut pending = headerless(store, doc_id, &existing).await?;
    if !pending.is_empty() {
        let names: Vec<&str> = pending.iter().map(|b| b.name.as_str()).collect();
        warn!("Bucket(s) without a header, provisioning again: {}", names.join(", "));
    }

    if !missing.is_empty() {
        info!("Creating bucket(s): {}", missing.join(", "));
        let adds = missing
            .iter()
            .map(|name| MutationOp::AddBucket { name: name.clone() })
            .collect();
        let replies = store.batch_mutate(doc_id, adds).await?;

        let mut created: Vec<BucketRef> = Vec::with_capacity(missing.len());
        for reply in replies {
            if let MutationReply::AddBucket(b) = reply {
                created.push(b);
            }
        }
        if created.len() != missing.len() {
            return Err(StoreError::Invalid(format!(
                "asked for {} new bucket(s), got {} id(s) back",
                missing.len(),
                created.len()
            )));
        }
        for b in &created {
            known.insert(b.name.clone(), b.clone());
        }
        pending.extend(created);
    }

    if !pending.is_empty() {
        let ops: Vec<MutationOp> = pending.iter().flat_map(provisioning_ops).collect();
        store.batch_mutate(doc_id, ops).await?;
    }
    Ok(known)
}

/// Existing buckets whose first row is blank: created, never provisioned.
async fn headerless(
    store: &dyn TabularStore,
    doc_id: &str,
    buckets: &[BucketRef],
) -> Result<Vec<BucketRef>, StoreError> {
    if buckets.is_empty() {
        return Ok(Vec::new());
    }
    let ranges: Vec<ReadRange> = buckets
        .iter()
        .map(|b| ReadRange::new(&b.name, header_for(&b.name).len()).limit(1))
        .collect();
    let values = store.read_values(doc_id, &ranges).await?;
    Ok(buckets
        .iter()
        .zip(values)
        .filter(|(_, rows)| {
            rows.first()
                .map_or(true, |row| row.iter().all(|c| c.trim().is_empty()))
        })
        .map(|(b, _)| b.clone())
        .collect())
}

fn header_for(bucket: &str) -> &'static [&'static str] {
    if bucket == LOG_BUCKET {
        &LOG_HEADER
    } else {
        &MONTH_HEADER
    }
}

/// Header, styling, frozen row, widths and (monthly buckets only) status
/// validation for a freshly created bucket.
pub fn provisioning_ops(bucket: &BucketRef) -> Vec<MutationOp> {
    let is_log = bucket.name == LOG_BUCKET;
    let header = header_for(&bucket.name);
    let widths: &[u32] = if is_log { &LOG_WIDTHS } else { &MONTH_WIDTHS };

    let mut ops = vec![
        MutationOp::UpdateCells {
            bucket_id: bucket.id,
            start_row: 0,
            start_col: 0,
            rows: vec![header.iter().map(|h| Cell::text(*h)).collect()],
        },
        MutationOp::FormatHeader {
            bucket_id: bucket.id,
            columns: header.len(),
            style: HEADER_STYLE,
        },
        MutationOp::FreezeRows {
            bucket_id: bucket.id,
            rows: 1,
        },
        MutationOp::ColumnWidths {
            bucket_id: bucket.id,
            widths: widths.to_vec(),
        },
    ];
    if !is_log {
        ops.push(MutationOp::Validation {
            bucket_id: bucket.id,
            column: 0,
            values: STATUS_VALUES.iter().map(|(v, _)| v.to_string()).collect(),
        });
        ops.extend(STATUS_VALUES.iter().map(|(value, color)| MutationOp::ConditionalFormat {
            bucket_id: bucket.id,
            column: 0,
            value: value.to_string(),
            background: *color,
        }));
    }
    ops
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;

    const DOC: &str = "doc";

    #[tokio::test]
    async fn creates_only_missing_buckets() {
        let store = SqliteStore::in_memory().unwrap();
        let first = ensure_buckets(&store, DOC, &["July - 2025".into(), LOG_BUCKET.into()])
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = ensure_buckets(
            &store,
            DOC,
            &["July - 2025".into(), "August - 2025".into(), "August - 2025".into()],
        )
        .await
        .unwrap();
        assert_eq!(second["July - 2025"], first["July - 2025"]);
        assert_eq!(store.get_structure(DOC).await.unwrap().buckets.len(), 3);

        // Existing buckets are not re-styled.
        let july = store.formats(DOC, "July - 2025").unwrap();
        assert_eq!(july.iter().filter(|(k, _)| k == "header_style").count(), 1);
    }

    #[tokio::test]
    async fn new_month_bucket_gets_header_and_rules() {
        let store = SqliteStore::in_memory().unwrap();
        ensure_buckets(&store, DOC, &["July - 2025".into()]).await.unwrap();

        let rows = store
            .read_values(DOC, &[ReadRange::new("July - 2025", MONTH_HEADER.len())])
            .await
            .unwrap();
        assert_eq!(rows[0].len(), 1);
        assert_eq!(rows[0][0], MONTH_HEADER.map(String::from).to_vec());
        assert_eq!(store.frozen_rows(DOC, "July - 2025").unwrap(), 1);

        let formats = store.formats(DOC, "July - 2025").unwrap();
        let kinds: Vec<&str> = formats.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(kinds.iter().filter(|k| **k == "conditional_format").count(), 5);
        assert!(kinds.contains(&"validation"));
        assert!(formats[0].1.contains("\"bold\":true"));
    }

    #[tokio::test]
    async fn headerless_bucket_is_provisioned_again() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .batch_mutate(DOC, vec![MutationOp::AddBucket { name: LOG_BUCKET.into() }])
            .await
            .unwrap();
        assert!(store.formats(DOC, LOG_BUCKET).unwrap().is_empty());

        ensure_buckets(&store, DOC, &[LOG_BUCKET.into()]).await.unwrap();
        let rows = store
            .read_values(DOC, &[ReadRange::new(LOG_BUCKET, LOG_HEADER.len())])
            .await
            .unwrap();
        assert_eq!(rows[0][0], LOG_HEADER.map(String::from).to_vec());
        assert_eq!(store.frozen_rows(DOC, LOG_BUCKET).unwrap(), 1);

        ensure_buckets(&store, DOC, &[LOG_BUCKET.into()]).await.unwrap();
        assert_eq!(store.formats(DOC, LOG_BUCKET).unwrap().len(), 2);
    }

    #[test]
    fn log_bucket_has_no_status_rules() {
        let ops = provisioning_ops(&BucketRef {
            name: LOG_BUCKET.into(),
            id: 7,
        });
        assert_eq!(ops.len(), 4);
        assert!(matches!(&ops[3], MutationOp::ColumnWidths { widths, .. } if widths.len() == 5));
    }
}
