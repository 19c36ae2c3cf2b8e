use std::collections::HashMap;

use tracing::info;

use crate::encode::{Cell, MONTH_HEADER};
use crate::error::StoreError;
use crate::model::{DestinationBucket, ParsedResult};
use crate::store::{row_counts, BucketRef, MutationOp, TabularStore};

/// Rows bound for one bucket within a macro-batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketGroup {
    pub bucket: String,
    pub message_ids: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// A contiguous block of rows at a fixed offset.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedWrite {
    pub bucket: String,
    pub bucket_id: i64,
    pub start_row: usize,
    pub message_ids: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchPlan {
    pub writes: Vec<PlannedWrite>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn row_total(&self) -> usize {
        self.writes.iter().map(|w| w.rows.len()).sum()
    }

    /// One grow + one write per bucket.
    pub fn ops(&self) -> Vec<MutationOp> {
        let mut ops = Vec::with_capacity(self.writes.len() * 2);
        for w in &self.writes {
            ops.push(MutationOp::AppendDimension {
                bucket_id: w.bucket_id,
                rows: w.rows.len(),
            });
            ops.push(MutationOp::UpdateCells {
                bucket_id: w.bucket_id,
                start_row: w.start_row,
                start_col: 0,
                rows: w.rows.clone(),
            });
        }
        ops
    }
}

/// Group successful results by month bucket, first-seen order. A record
/// spanning several months lands in each of them.
pub fn group_by_bucket(results: &[ParsedResult]) -> Vec<BucketGroup> {
    let mut groups: Vec<BucketGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for result in results {
        let ParsedResult::Success {
            message_id,
            month_buckets,
            row_cells,
            ..
        } = result
        else {
            continue;
        };
        for bucket in month_buckets {
            let i = *index.entry(bucket.clone()).or_insert_with(|| {
                groups.push(BucketGroup {
                    bucket: bucket.clone(),
                    message_ids: Vec::new(),
                    rows: Vec::new(),
                });
                groups.len() - 1
            });
            groups[i].message_ids.push(message_id.clone());
            groups[i].rows.push(row_cells.clone());
        }
    }
    groups
}

/// Month buckets touched by the successes of a batch.
pub fn touched_buckets(results: &[ParsedResult]) -> Vec<String> {
    group_by_bucket(results).into_iter().map(|g| g.bucket).collect()
}

/// Snapshot each bucket's current extent. Row counts are read fresh.
pub async fn load_targets(
    store: &dyn TabularStore,
    doc_id: &str,
    names: &[String],
    buckets: &HashMap<String, BucketRef>,
) -> Result<HashMap<String, DestinationBucket>, StoreError> {
    let counts = row_counts(store, doc_id, names).await?;
    names
        .iter()
        .map(|name| {
            let bucket = buckets
                .get(name)
                .ok_or_else(|| StoreError::BucketNotFound(name.clone()))?;
            Ok((
                name.clone(),
                DestinationBucket {
                    name: name.clone(),
                    id: bucket.id,
                    header_schema: MONTH_HEADER.to_vec(),
                    last_row_index: counts.get(name).copied().unwrap_or(0),
                },
            ))
        })
        .collect()
}

/// Assign each group the offset right after its bucket's current rows.
pub fn plan(
    groups: Vec<BucketGroup>,
    targets: &HashMap<String, DestinationBucket>,
) -> Result<BatchPlan, StoreError> {
    let mut writes = Vec::with_capacity(groups.len());
    for g in groups {
        let target = targets
            .get(&g.bucket)
            .ok_or_else(|| StoreError::BucketNotFound(g.bucket.clone()))?;
        let width = target.header_schema.len();
        if let Some(row) = g.rows.iter().find(|r| r.len() > width) {
            return Err(StoreError::Invalid(format!(
                "row of {} cells does not fit the {} columns of '{}'",
                row.len(),
                width,
                target.name
            )));
        }
        writes.push(PlannedWrite {
            bucket_id: target.id,
            start_row: target.last_row_index,
            bucket: g.bucket,
            message_ids: g.message_ids,
            rows: g.rows,
        });
    }
    Ok(BatchPlan { writes })
}

/// Plan and commit all successes of a macro-batch in a single
/// `batch_mutate`. Buckets must already exist.
pub async fn execute(
    store: &dyn TabularStore,
    doc_id: &str,
    results: &[ParsedResult],
    buckets: &HashMap<String, BucketRef>,
) -> Result<BatchPlan, StoreError> {
    let groups = group_by_bucket(results);
    if groups.is_empty() {
        return Ok(BatchPlan::default());
    }
    let names: Vec<String> = groups.iter().map(|g| g.bucket.clone()).collect();
    let targets = load_targets(store, doc_id, &names, buckets).await?;
    let plan = plan(groups, &targets)?;

    for w in &plan.writes {
        info!(
            "{}: {} row(s) at {}..{} [{}]",
            w.bucket,
            w.rows.len(),
            w.start_row,
            w.start_row + w.rows.len(),
            w.message_ids.join(", ")
        );
    }
    store.batch_mutate(doc_id, plan.ops()).await?;
    Ok(plan)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::model::ActivityRecord;
    use crate::schema::ensure_buckets;
    use crate::store::sqlite::SqliteStore;
    use crate::store::ReadRange;

    const DOC: &str = "doc";

    fn success(id: &str, months: &[&str]) -> ParsedResult {
        ParsedResult::Success {
            message_id: id.into(),
            record: ActivityRecord::empty(""),
            month_buckets: months.iter().map(|m| m.to_string()).collect(),
            row_cells: vec![Cell::text("Pending"), Cell::text(id)],
            received_at: Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn multi_month_record_goes_to_each_bucket() {
        let results = vec![
            success("a", &["July - 2025", "August - 2025"]),
            ParsedResult::Error {
                message_id: "x".into(),
                subject: String::new(),
                error: "e".into(),
                received_at: None,
            },
            success("b", &["August - 2025"]),
        ];
        let groups = group_by_bucket(&results);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].message_ids, vec!["a"]);
        assert_eq!(groups[1].bucket, "August - 2025");
        assert_eq!(groups[1].message_ids, vec!["a", "b"]);
    }

    #[test]
    fn offsets_are_consecutive_from_current_count() {
        let results: Vec<_> = (0..4).map(|i| success(&format!("m{}", i), &["July - 2025"])).collect();
        let targets: HashMap<String, DestinationBucket> = [(
            "July - 2025".to_string(),
            DestinationBucket {
                name: "July - 2025".into(),
                id: 3,
                header_schema: MONTH_HEADER.to_vec(),
                last_row_index: 7,
            },
        )]
        .into();
        let plan = plan(group_by_bucket(&results), &targets).unwrap();
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].start_row, 7);
        assert_eq!(plan.row_total(), 4);
        assert_eq!(
            plan.ops()[0],
            MutationOp::AppendDimension { bucket_id: 3, rows: 4 }
        );
    }

    #[tokio::test]
    async fn consecutive_batches_never_overlap() {
        let store = SqliteStore::in_memory().unwrap();
        let buckets = ensure_buckets(&store, DOC, &["July - 2025".into()]).await.unwrap();

        let first: Vec<_> = (0..3).map(|i| success(&format!("a{}", i), &["July - 2025"])).collect();
        let p1 = execute(&store, DOC, &first, &buckets).await.unwrap();
        assert_eq!(p1.writes[0].start_row, 1);

        let second: Vec<_> = (0..2).map(|i| success(&format!("b{}", i), &["July - 2025"])).collect();
        let p2 = execute(&store, DOC, &second, &buckets).await.unwrap();
        assert_eq!(p2.writes[0].start_row, 4);

        let rows = store
            .read_values(DOC, &[ReadRange::new("July - 2025", 2)])
            .await
            .unwrap();
        let ids: Vec<&str> = rows[0][1..].iter().map(|r| r[1].as_str()).collect();
        assert_eq!(ids, vec!["a0", "a1", "a2", "b0", "b1"]);
    }

    #[tokio::test]
    async fn unknown_bucket_fails_before_writing() {
        let store = SqliteStore::in_memory().unwrap();
        let err = execute(&store, DOC, &[success("a", &["May - 2025"])], &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound(_)));
    }
}
