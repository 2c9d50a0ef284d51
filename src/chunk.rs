//! Fixed-size batch iteration over a row stream.

use std::collections::HashMap;

use crate::engine::BoxedRows;
use crate::table::{DType, Table};
use crate::{ReadOptions, ReadResult};

/// Cursor yielding fixed-size row batches; the final batch may be shorter.
///
/// The underlying stream stays open for the cursor's lifetime and is
/// released exactly once when the cursor is dropped. Once the source is
/// exhausted, [`TableChunks::next_batch`] keeps returning `Ok(None)`.
pub struct TableChunks {
    rows: BoxedRows,
    batch_size: usize,
    /// Global index of the next unread row.
    next_row: usize,
    /// Rows left under the `nrows` budget, shared across batches.
    remaining: Option<usize>,
    dtypes: HashMap<String, DType>,
    done: bool,
}

impl TableChunks {
    pub(crate) fn new(rows: BoxedRows, batch_size: usize, options: &ReadOptions) -> TableChunks {
        TableChunks {
            rows,
            batch_size,
            next_row: 0,
            remaining: options.nrows,
            dtypes: options.dtypes.clone(),
            done: false,
        }
    }

    /// Column names of the underlying stream.
    pub fn headers(&self) -> &[String] {
        self.rows.headers()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fetch the next batch, or `None` once the input is exhausted. Batch
    /// `k` starts at global row `k * batch_size`; each batch's column types
    /// are inferred from its own rows.
    pub async fn next_batch(&mut self) -> ReadResult<Option<Table>> {
        if self.done {
            return Ok(None);
        }
        let want = match self.remaining {
            Some(remaining) => self.batch_size.min(remaining),
            None => self.batch_size,
        };
        let mut rows = Vec::with_capacity(want.min(1024));
        while rows.len() < want {
            match self.rows.next_row().await? {
                Some(row) => rows.push(row),
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if let Some(remaining) = &mut self.remaining {
            *remaining -= rows.len();
            if *remaining == 0 {
                self.done = true;
            }
        }
        if rows.is_empty() {
            self.done = true;
            return Ok(None);
        }
        let headers = self.rows.headers().to_vec();
        let start = self.next_row;
        self.next_row += rows.len();
        Ok(Some(Table::from_rows(&headers, rows, &self.dtypes, start)?))
    }
}
