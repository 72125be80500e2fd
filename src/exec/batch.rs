//! Columnar batches
//!
//! The unit of data flow between physical operators: one value buffer per
//! column, all sharing a row count, with column identity carried as an
//! optional table binding plus a name. Operators preserve cross-column row
//! alignment in every batch they emit.

use crate::types::Value;

/// Default rows per batch
pub const DEFAULT_BATCH_SIZE: usize = 1024;
/// Smallest configurable batch size
pub const MIN_BATCH_SIZE: usize = 64;
/// Largest configurable batch size
pub const MAX_BATCH_SIZE: usize = 8192;

/// Clamp a requested batch size into the supported range
pub fn clamp_batch_size(size: usize) -> usize {
    size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}

// ============================================================================
// Columns
// ============================================================================

/// One column buffer inside a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchColumn {
    /// Table binding the column came from, None for computed columns
    pub table: Option<String>,
    pub name: String,
    pub values: Vec<Value>,
}

impl BatchColumn {
    pub fn new(table: Option<String>, name: impl Into<String>) -> Self {
        BatchColumn {
            table,
            name: name.into(),
            values: Vec::new(),
        }
    }
}

// ============================================================================
// Batch
// ============================================================================

/// A batch of rows in columnar form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub columns: Vec<BatchColumn>,
    pub row_count: usize,
}

impl Batch {
    pub fn new(columns: Vec<BatchColumn>) -> Self {
        let row_count = columns.first().map(|c| c.values.len()).unwrap_or(0);
        debug_assert!(columns.iter().all(|c| c.values.len() == row_count));
        Batch { columns, row_count }
    }

    /// An empty batch sharing this batch's column layout
    pub fn empty_like(&self) -> Batch {
        Batch {
            columns: self
                .columns
                .iter()
                .map(|c| BatchColumn::new(c.table.clone(), c.name.clone()))
                .collect(),
            row_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Find a column by optional qualifier and name. A qualified lookup
    /// matches binding and name; an unqualified lookup takes the first
    /// column with the name.
    pub fn find_column(&self, table: Option<&str>, name: &str) -> Option<usize> {
        match table {
            Some(table) => self
                .columns
                .iter()
                .position(|c| c.name == name && c.table.as_deref() == Some(table)),
            None => self.columns.iter().position(|c| c.name == name),
        }
    }

    /// Value at (row, column found by qualifier/name)
    pub fn value_at(&self, table: Option<&str>, name: &str, row: usize) -> Option<&Value> {
        self.find_column(table, name)
            .and_then(|idx| self.columns[idx].values.get(row))
    }

    /// Materialize one row across all columns
    pub fn row(&self, idx: usize) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| c.values.get(idx).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Append row `idx` of `other` to this batch (layouts must match)
    pub fn push_row_from(&mut self, other: &Batch, idx: usize) {
        for (dst, src) in self.columns.iter_mut().zip(other.columns.iter()) {
            dst.values
                .push(src.values.get(idx).cloned().unwrap_or(Value::Null));
        }
        self.row_count += 1;
    }

    /// Append a fully null row
    pub fn push_null_row(&mut self) {
        for col in &mut self.columns {
            col.values.push(Value::Null);
        }
        self.row_count += 1;
    }

    /// Keep only the selected row positions, preserving order
    pub fn gather(&self, selection: &[usize]) -> Batch {
        let columns = self
            .columns
            .iter()
            .map(|c| BatchColumn {
                table: c.table.clone(),
                name: c.name.clone(),
                values: selection
                    .iter()
                    .map(|&i| c.values.get(i).cloned().unwrap_or(Value::Null))
                    .collect(),
            })
            .collect();
        Batch {
            columns,
            row_count: selection.len(),
        }
    }

    /// Concatenate batches with identical layouts into one
    pub fn concat(batches: Vec<Batch>) -> Batch {
        let mut iter = batches.into_iter();
        let Some(mut first) = iter.next() else {
            return Batch::default();
        };
        for batch in iter {
            for (dst, src) in first.columns.iter_mut().zip(batch.columns.into_iter()) {
                dst.values.extend(src.values);
            }
            first.row_count += batch.row_count;
        }
        first
    }

    /// Split into chunks of at most `size` rows
    pub fn chunks(self, size: usize) -> Vec<Batch> {
        if self.row_count <= size {
            return vec![self];
        }
        let mut out = Vec::new();
        let mut start = 0;
        while start < self.row_count {
            let end = (start + size).min(self.row_count);
            let selection: Vec<usize> = (start..end).collect();
            out.push(self.gather(&selection));
            start = end;
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================
