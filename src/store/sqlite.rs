use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Transaction};

use super::{BucketRef, MutationOp, MutationReply, ReadRange, Structure, TabularStore};
use crate::encode::Cell;
use crate::error::StoreError;

/// Grid size of a freshly created bucket, matching a new spreadsheet tab.
const DEFAULT_GRID_ROWS: usize = 1000;

/// Tabular store kept in SQLite. One `batch_mutate` call is one transaction,
/// so a failing op leaves the document untouched.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {:?}", dir))?;
            }
        }
        let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        init_schema(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Invalid("store connection lock poisoned".into()))
    }

    /// Recorded formatting ops of a bucket as `(kind, json)` pairs.
    pub fn formats(&self, doc_id: &str, bucket: &str) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.lock()?;
        let id = bucket_id(&conn, doc_id, bucket)?
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let mut stmt =
            conn.prepare("SELECT kind, params FROM bucket_formats WHERE bucket_id = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn frozen_rows(&self, doc_id: &str, bucket: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: Option<i64> = conn
            .query_row(
                "SELECT frozen_rows FROM buckets WHERE doc_id = ?1 AND name = ?2",
                rusqlite::params![doc_id, bucket],
                |r| r.get(0),
            )
            .optional()?;
        n.map(|n| n as usize)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))
    }
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS buckets (
            id          INTEGER PRIMARY KEY,
            doc_id      TEXT NOT NULL,
            name        TEXT NOT NULL,
            grid_rows   INTEGER NOT NULL,
            frozen_rows INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(doc_id, name)
        );

        CREATE TABLE IF NOT EXISTS cells (
            bucket_id INTEGER NOT NULL REFERENCES buckets(id),
            row_idx   INTEGER NOT NULL,
            col_idx   INTEGER NOT NULL,
            value     TEXT NOT NULL,
            formula   TEXT,
            PRIMARY KEY (bucket_id, row_idx, col_idx)
        );

        CREATE TABLE IF NOT EXISTS bucket_formats (
            id        INTEGER PRIMARY KEY,
            bucket_id INTEGER NOT NULL REFERENCES buckets(id),
            kind      TEXT NOT NULL,
            params    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_formats_bucket ON bucket_formats(bucket_id);
        ",
    )
}

fn bucket_id(conn: &Connection, doc_id: &str, name: &str) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM buckets WHERE doc_id = ?1 AND name = ?2",
            rusqlite::params![doc_id, name],
            |r| r.get(0),
        )
        .optional()?)
}

/// Rows up to the last one with a non-empty cell among the first `columns`.
fn data_rows(conn: &Connection, bucket_id: i64, columns: usize) -> Result<usize, StoreError> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(row_idx) FROM cells WHERE bucket_id = ?1 AND col_idx < ?2 AND value != ''",
        rusqlite::params![bucket_id, columns.min(i64::MAX as usize) as i64],
        |r| r.get(0),
    )?;
    Ok(max.map(|m| m as usize + 1).unwrap_or(0))
}

fn grid_rows(tx: &Transaction<'_>, bucket_id: i64) -> Result<usize, StoreError> {
    let n: Option<i64> = tx
        .query_row("SELECT grid_rows FROM buckets WHERE id = ?1", [bucket_id], |r| r.get(0))
        .optional()?;
    n.map(|n| n as usize)
        .ok_or_else(|| StoreError::Api {
            status: 400,
            message: format!("No grid with id: {}", bucket_id),
        })
}

fn write_cells(
    tx: &Transaction<'_>,
    bucket_id: i64,
    start_row: usize,
    start_col: usize,
    rows: &[Vec<Cell>],
) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO cells (bucket_id, row_idx, col_idx, value, formula)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            stmt.execute(rusqlite::params![
                bucket_id,
                (start_row + r) as i64,
                (start_col + c) as i64,
                cell.rendered(),
                cell.formula(),
            ])?;
        }
    }
    Ok(())
}

fn record_format(
    tx: &Transaction<'_>,
    bucket_id: i64,
    kind: &str,
    op: &MutationOp,
) -> Result<(), StoreError> {
    grid_rows(tx, bucket_id)?;
    tx.execute(
        "INSERT INTO bucket_formats (bucket_id, kind, params) VALUES (?1, ?2, ?3)",
        rusqlite::params![bucket_id, kind, serde_json::to_string(op)?],
    )?;
    Ok(())
}

fn apply_op(tx: &Transaction<'_>, doc_id: &str, op: &MutationOp) -> Result<MutationReply, StoreError> {
    match op {
        MutationOp::AddBucket { name } => {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM buckets WHERE doc_id = ?1 AND name = ?2",
                    rusqlite::params![doc_id, name],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::Api {
                    status: 400,
                    message: format!(
                        "Invalid requests[0].addSheet: A sheet with the name \"{}\" already exists. Please enter another name.",
                        name
                    ),
                });
            }
            tx.execute(
                "INSERT INTO buckets (doc_id, name, grid_rows) VALUES (?1, ?2, ?3)",
                rusqlite::params![doc_id, name, DEFAULT_GRID_ROWS as i64],
            )?;
            Ok(MutationReply::AddBucket(BucketRef {
                name: name.clone(),
                id: tx.last_insert_rowid(),
            }))
        }
        MutationOp::AppendDimension { bucket_id, rows } => {
            let grid = grid_rows(tx, *bucket_id)?;
            tx.execute(
                "UPDATE buckets SET grid_rows = ?1 WHERE id = ?2",
                rusqlite::params![(grid + rows) as i64, bucket_id],
            )?;
            Ok(MutationReply::Empty)
        }
        MutationOp::UpdateCells {
            bucket_id,
            start_row,
            start_col,
            rows,
        } => {
            let grid = grid_rows(tx, *bucket_id)?;
            if start_row + rows.len() > grid {
                return Err(StoreError::Api {
                    status: 400,
                    message: format!(
                        "Range ({}:{}) exceeds grid limits. Max rows: {}",
                        start_row,
                        start_row + rows.len(),
                        grid
                    ),
                });
            }
            write_cells(tx, *bucket_id, *start_row, *start_col, rows)?;
            Ok(MutationReply::Empty)
        }
        MutationOp::FreezeRows { bucket_id, rows } => {
            grid_rows(tx, *bucket_id)?;
            tx.execute(
                "UPDATE buckets SET frozen_rows = ?1 WHERE id = ?2",
                rusqlite::params![*rows as i64, bucket_id],
            )?;
            Ok(MutationReply::Empty)
        }
        MutationOp::FormatHeader { bucket_id, .. } => {
            record_format(tx, *bucket_id, "header_style", op)?;
            Ok(MutationReply::Empty)
        }
        MutationOp::ColumnWidths { bucket_id, .. } => {
            record_format(tx, *bucket_id, "column_widths", op)?;
            Ok(MutationReply::Empty)
        }
        MutationOp::Validation { bucket_id, .. } => {
            record_format(tx, *bucket_id, "validation", op)?;
            Ok(MutationReply::Empty)
        }
        MutationOp::ConditionalFormat { bucket_id, .. } => {
            record_format(tx, *bucket_id, "conditional_format", op)?;
            Ok(MutationReply::Empty)
        }
    }
}

#[async_trait]
impl TabularStore for SqliteStore {
    async fn get_structure(&self, doc_id: &str) -> Result<Structure, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name, id FROM buckets WHERE doc_id = ?1 ORDER BY id")?;
        let buckets = stmt
            .query_map([doc_id], |row| {
                Ok(BucketRef {
                    name: row.get(0)?,
                    id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Structure { buckets })
    }

    async fn batch_mutate(
        &self,
        doc_id: &str,
        ops: Vec<MutationOp>,
    ) -> Result<Vec<MutationReply>, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut replies = Vec::with_capacity(ops.len());
        for op in &ops {
            replies.push(apply_op(&tx, doc_id, op)?);
        }
        tx.commit()?;
        Ok(replies)
    }

    async fn read_values(
        &self,
        doc_id: &str,
        ranges: &[ReadRange],
    ) -> Result<Vec<Vec<Vec<String>>>, StoreError> {
        let conn = self.lock()?;
        let mut out = Vec::with_capacity(ranges.len());
        for range in ranges {
            let id = bucket_id(&conn, doc_id, &range.bucket)?
                .ok_or_else(|| StoreError::BucketNotFound(range.bucket.clone()))?;
            let mut n = data_rows(&conn, id, range.columns)?;
            if let Some(limit) = range.rows {
                n = n.min(limit);
            }
            let mut rows = vec![Vec::<String>::new(); n];
            let mut stmt = conn.prepare(
                "SELECT row_idx, col_idx, value FROM cells
                 WHERE bucket_id = ?1 AND col_idx < ?2 AND row_idx < ?3 AND value != ''
                 ORDER BY row_idx, col_idx",
            )?;
            let cells = stmt
                .query_map(rusqlite::params![id, range.columns as i64, n as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)? as usize,
                        row.get::<_, i64>(1)? as usize,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (r, c, value) in cells {
                let row = &mut rows[r];
                if row.len() <= c {
                    row.resize(c + 1, String::new());
                }
                row[c] = value;
            }
            out.push(rows);
        }
        Ok(out)
    }

    async fn append_values(
        &self,
        doc_id: &str,
        bucket: &str,
        rows: Vec<Vec<Cell>>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let id = bucket_id(&conn, doc_id, bucket)?
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let tx = conn.unchecked_transaction()?;
        let start = data_rows(&tx, id, usize::MAX)?;
        let grid = grid_rows(&tx, id)?;
        if start + rows.len() > grid {
            tx.execute(
                "UPDATE buckets SET grid_rows = ?1 WHERE id = ?2",
                rusqlite::params![(start + rows.len()) as i64, id],
            )?;
        }
        write_cells(&tx, id, start, 0, &rows)?;
        tx.commit()?;
        Ok(())
    }
}

// ── Tests ──
