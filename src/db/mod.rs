//! Database handle
//!
//! The coordinator: catalog of in-memory tables (append-only row store
//! with a delete bitmap), the on-handle index registry and advisor, the
//! result cache, and the buffer cache for reading flushed column files.
//! A handle is single-threaded; callers serialize externally. Reads run
//! parse -> validate -> plan -> optimize -> execute -> materialize, with
//! the result cache consulted first; writes bypass the cache and
//! invalidate every entry tagged with the touched table.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::cache::ResultCache;
use crate::error::{Error, ErrorCode, Result};
use crate::exec::batch::{clamp_batch_size, Batch, BatchColumn, DEFAULT_BATCH_SIZE};
use crate::exec::eval::{eval, RowContext};
use crate::exec::operators::{run, Cancellation, ScanSource};
use crate::index::{IndexAdvisor, IndexInstance, IndexKind, IndexManager, Strategy};
use crate::parser::ast::{
    BinaryOp, CreateIndexStmt, CreateTableStmt, DeleteStmt, Expr, IndexKindAst, InsertStmt,
    Literal, SelectStmt, Stmt, UpdateStmt,
};
use crate::parser::grammar::parse;
use crate::plan::{build_select, optimize, CatalogInfo, PlanNode};
use crate::schema::{ColumnDef, Schema};
use crate::storage::buffer::BufferCache;
use crate::storage::column::{decode_page, ColumnWriter};
use crate::storage::format::crc32;
use crate::storage::table::{column_file_path, TableReader, TableWriter};
use crate::types::{DataType, RowId, Value};
use crate::util::BitVec;

/// Default buffer cache capacity: 256 pages of 64 KiB
const DEFAULT_BUFFER_CAPACITY: usize = 256 * 64 * 1024;

// ============================================================================
// Query Results
// ============================================================================

/// Materialized result of a read query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Value at (row, column); Null when out of bounds
    pub fn get(&self, row: usize, column: usize) -> Value {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Position of a result column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Approximate heap footprint, used by the result cache bounds
    pub fn byte_size(&self) -> usize {
        let cells: usize = self
            .rows
            .iter()
            .flat_map(|r| r.iter())
            .map(|v| v.byte_size())
            .sum();
        let names: usize = self.columns.iter().map(|c| c.len() + 8).sum();
        cells + names + 64
    }

    fn from_batch(batch: Batch) -> QueryResult {
        let columns = batch.columns.iter().map(|c| c.name.clone()).collect();
        let rows = (0..batch.row_count).map(|i| batch.row(i)).collect();
        QueryResult { columns, rows }
    }
}

// ============================================================================
// Stored Tables
// ============================================================================

/// One table: append-only row store plus a delete bitmap.
///
/// UPDATE rewrites rows in place and DELETE marks the bitmap; `compact`
/// rewrites the store dropping deleted rows.
struct StoredTable {
    schema: Schema,
    rows: Vec<Vec<Value>>,
    deleted: BitVec,
}

impl StoredTable {
    fn new(schema: Schema) -> Self {
        StoredTable {
            schema,
            rows: Vec::new(),
            deleted: BitVec::new(0),
        }
    }

    fn visible_row_count(&self) -> u64 {
        (self.rows.len() - self.deleted.count_ones()) as u64
    }

    fn is_visible(&self, row: usize) -> bool {
        !self.deleted.get(row)
    }

    /// Row as a name -> value map for row-at-a-time evaluation
    fn row_map(&self, row: usize) -> HashMap<String, Value> {
        self.schema
            .column_names()
            .into_iter()
            .zip(self.rows[row].iter().cloned())
            .collect()
    }
}

// ============================================================================
// Database
// ============================================================================

/// An embeddable analytical database handle
pub struct Database {
    path: PathBuf,
    tables: HashMap<String, StoredTable>,
    indexes: IndexManager,
    advisor: IndexAdvisor,
    result_cache: ResultCache,
    buffer_cache: BufferCache,
    cancellation: Cancellation,
    batch_size: usize,
}

impl Database {
    /// Open a database rooted at a directory; the directory is created
    /// if missing. Catalog persistence is out of scope, so the handle
    /// starts with an empty catalog and `flush` materializes tables as
    /// `.lyta`/`.lycol` files under the root.
    pub fn open(path: impl Into<PathBuf>) -> Result<Database> {
        let path = path.into();
        std::fs::create_dir_all(&path)?;
        Ok(Database {
            path,
            tables: HashMap::new(),
            indexes: IndexManager::new(),
            advisor: IndexAdvisor::new(),
            result_cache: ResultCache::default(),
            buffer_cache: BufferCache::new(DEFAULT_BUFFER_CAPACITY),
            cancellation: Cancellation::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Flush and drop the handle
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    /// Cancellation flag shared with running queries; a host may set it
    /// from another thread to abort at the next batch boundary.
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    /// Configure the vectorized batch size (clamped to [64, 8192])
    pub fn set_batch_size(&mut self, size: usize) {
        self.batch_size = clamp_batch_size(size);
    }

    // ====================================================================
    // Catalog
    // ====================================================================

    pub fn create_table(&mut self, name: &str, schema: Schema) -> Result<()> {
        if self.tables.contains_key(name) {
            return Err(Error::with_message(
                ErrorCode::Conflict,
                format!("table already exists: {}", name),
            ));
        }
        self.tables.insert(name.to_string(), StoredTable::new(schema));
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        if self.tables.remove(name).is_none() {
            return Err(Error::with_message(
                ErrorCode::Name,
                format!("no such table: {}", name),
            ));
        }
        self.indexes.drop_table_indexes(name);
        self.result_cache.invalidate(name);
        Ok(())
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn table_schema(&self, name: &str) -> Result<&Schema> {
        self.tables
            .get(name)
            .map(|t| &t.schema)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, format!("no such table: {}", name)))
    }

    pub fn table_row_count(&self, name: &str) -> Result<u64> {
        self.tables
            .get(name)
            .map(|t| t.visible_row_count())
            .ok_or_else(|| Error::with_message(ErrorCode::Name, format!("no such table: {}", name)))
    }

    // ====================================================================
    // Writes
    // ====================================================================

    /// Insert one row. The write is atomic: every value is validated
    /// against the schema before anything mutates.
    pub fn insert_row(&mut self, table: &str, values: Vec<Value>) -> Result<()> {
        let stored = self
            .tables
            .get(table)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, format!("no such table: {}", table)))?;

        validate_row(&stored.schema, &values)?;

        let stored = self.tables.get_mut(table).unwrap();
        let row_id = stored.rows.len() as RowId;
        stored.rows.push(values);
        stored.deleted.push(false);

        let row_map = stored.row_map(row_id as usize);
        self.indexes
            .on_insert(table, row_id, &|col| row_map.get(col).cloned())?;
        self.result_cache.invalidate(table);
        Ok(())
    }

    /// Update rows matching the predicate; returns rows changed
    pub fn update_rows(
        &mut self,
        table: &str,
        predicate: Option<&Expr>,
        assignments: &[(String, Expr)],
    ) -> Result<u64> {
        let stored = self
            .tables
            .get(table)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, format!("no such table: {}", table)))?;

        // Resolve assignment targets up front.
        let mut targets = Vec::with_capacity(assignments.len());
        for (column, _) in assignments {
            let idx = stored.schema.column_index(column).ok_or_else(|| {
                Error::with_message(ErrorCode::Name, format!("no such column: {}", column))
            })?;
            targets.push(idx);
        }

        // Compute replacement rows before mutating anything.
        let mut changes: Vec<(usize, Vec<Value>)> = Vec::new();
        for row in 0..stored.rows.len() {
            if !stored.is_visible(row) {
                continue;
            }
            let row_map = stored.row_map(row);
            if !matches_predicate(predicate, &row_map)? {
                continue;
            }
            let mut new_row = stored.rows[row].clone();
            for ((_, expr), &idx) in assignments.iter().zip(targets.iter()) {
                new_row[idx] = eval(expr, &RowContext::Map(&row_map), None)?;
            }
            validate_row(&stored.schema, &new_row)?;
            changes.push((row, new_row));
        }

        let stored = self.tables.get_mut(table).unwrap();
        let changed = changes.len() as u64;
        for (row, new_row) in changes {
            stored.rows[row] = new_row;
            self.indexes.on_delete(table, row as RowId);
            let row_map = stored.row_map(row);
            self.indexes
                .on_insert(table, row as RowId, &|col| row_map.get(col).cloned())?;
        }
        if changed > 0 {
            self.result_cache.invalidate(table);
        }
        Ok(changed)
    }

    /// Delete rows matching the predicate; returns rows removed
    pub fn delete_rows(&mut self, table: &str, predicate: Option<&Expr>) -> Result<u64> {
        let stored = self
            .tables
            .get(table)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, format!("no such table: {}", table)))?;

        let mut doomed = Vec::new();
        for row in 0..stored.rows.len() {
            if !stored.is_visible(row) {
                continue;
            }
            if matches_predicate(predicate, &stored.row_map(row))? {
                doomed.push(row);
            }
        }

        let stored = self.tables.get_mut(table).unwrap();
        for &row in &doomed {
            stored.deleted.set(row, true);
            self.indexes.on_delete(table, row as RowId);
        }
        if !doomed.is_empty() {
            self.result_cache.invalidate(table);
        }
        Ok(doomed.len() as u64)
    }

    // ====================================================================
    // Indexes
    // ====================================================================

    /// Create an index and bulk-load it from the current rows
    pub fn create_index(
        &mut self,
        name: &str,
        table: &str,
        columns: Vec<String>,
        kind: IndexKind,
    ) -> Result<()> {
        let stored = self
            .tables
            .get(table)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, format!("no such table: {}", table)))?;
        for column in &columns {
            if stored.schema.find_column(column).is_none() {
                return Err(Error::with_message(
                    ErrorCode::Name,
                    format!("no such column: {}.{}", table, column),
                ));
            }
        }

        self.indexes.create_index(name, table, columns, kind)?;

        // Bulk load.
        let rows: Vec<(RowId, HashMap<String, Value>)> = stored
            .rows
            .iter()
            .enumerate()
            .filter(|(row, _)| stored.is_visible(*row))
            .map(|(row, _)| (row as RowId, stored.row_map(row)))
            .collect();
        let result = self
            .indexes
            .rebuild(table, &mut rows.into_iter());
        if result.is_err() {
            // A failed bulk load must not leave a half-built index.
            let _ = self.indexes.drop_index(name);
        }
        result
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.indexes.drop_index(name)
    }

    pub fn index_manager(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn advisor(&mut self) -> &mut IndexAdvisor {
        &mut self.advisor
    }

    // ====================================================================
    // Queries
    // ====================================================================

    /// Execute a read query end to end, consulting the result cache
    pub fn query(&mut self, sql: &str) -> Result<Rc<QueryResult>> {
        let stmt = parse(sql)?;
        let Stmt::Select(select) = stmt else {
            return Err(Error::with_message(
                ErrorCode::Type,
                "write statements go through execute()",
            ));
        };

        if let Some(cached) = self.result_cache.get(sql) {
            return Ok(cached);
        }

        let result = Rc::new(self.run_select(&select)?);

        let tables: BTreeSet<String> = select_tables(&select);
        self.result_cache.put(sql, Rc::clone(&result), tables);
        Ok(result)
    }

    /// Execute a write statement; returns affected rows (DDL returns 0)
    pub fn execute(&mut self, sql: &str) -> Result<u64> {
        match parse(sql)? {
            Stmt::Select(_) => Err(Error::with_message(
                ErrorCode::Type,
                "read statements go through query()",
            )),
            Stmt::Insert(stmt) => self.execute_insert(&stmt),
            Stmt::Update(stmt) => self.execute_update(&stmt),
            Stmt::Delete(stmt) => self.execute_delete(&stmt),
            Stmt::CreateTable(stmt) => self.execute_create_table(&stmt),
            Stmt::CreateIndex(stmt) => self.execute_create_index(&stmt),
            Stmt::DropTable(stmt) => {
                match self.drop_table(&stmt.name) {
                    Err(ref e) if e.code() == ErrorCode::Name && stmt.if_exists => Ok(0),
                    Err(e) => Err(e),
                    Ok(()) => Ok(0),
                }
            }
            Stmt::DropIndex(stmt) => {
                match self.drop_index(&stmt.name) {
                    Err(ref e) if e.code() == ErrorCode::Name && stmt.if_exists => Ok(0),
                    Err(e) => Err(e),
                    Ok(()) => Ok(0),
                }
            }
        }
    }

    /// Run a SELECT through plan, optimize, and the operator pipeline
    fn run_select(&mut self, select: &SelectStmt) -> Result<QueryResult> {
        // FROM-less SELECT evaluates the output list against no rows.
        if select.from.is_none() {
            return self.run_select_without_from(select);
        }

        let plan = build_select(select, self)?;
        let plan = optimize(plan, self);

        let restriction = self.plan_index_restriction(&plan)?;
        let source = ScanView {
            db: self,
            restriction,
        };
        let batch = run(&plan, &source, self.batch_size, &self.cancellation)?;
        Ok(QueryResult::from_batch(batch))
    }

    fn run_select_without_from(&self, select: &SelectStmt) -> Result<QueryResult> {
        let empty = HashMap::new();
        let ctx = RowContext::Map(&empty);
        let mut columns = Vec::new();
        let mut row = Vec::new();
        for column in &select.columns {
            match column {
                crate::parser::ast::ResultColumn::Star => {
                    return Err(Error::with_message(
                        ErrorCode::Parse,
                        "SELECT * requires a FROM clause",
                    ))
                }
                crate::parser::ast::ResultColumn::Expr { expr, alias } => {
                    columns.push(
                        alias
                            .clone()
                            .unwrap_or_else(|| crate::plan::expr_label(expr)),
                    );
                    row.push(eval(expr, &ctx, None)?);
                }
            }
        }
        Ok(QueryResult {
            columns,
            rows: vec![row],
        })
    }

    /// Consult the advisor for a single-table filter; a winning index
    /// strategy restricts the scan to the row ids the indexes return
    /// (the filter still runs for residual predicates).
    ///
    /// A lone indexed conjunct races its index against the scan. Two or
    /// more indexed conjuncts additionally cost an index intersection:
    /// when that estimate beats the scan, every conjunct's row set is
    /// fetched and intersected.
    fn plan_index_restriction(
        &mut self,
        plan: &PlanNode,
    ) -> Result<Option<(String, Vec<RowId>)>> {
        let Some((binding, table, predicate)) = find_filtered_scan(plan) else {
            return Ok(None);
        };
        let stored = match self.tables.get(table) {
            Some(stored) => stored,
            None => return Ok(None),
        };
        let table_size = stored.visible_row_count();

        // Conjuncts a single-column index can answer for this scan.
        let mut candidates: Vec<IndexCandidate> = Vec::new();
        for conjunct in conjuncts_of(predicate) {
            let Some((column, op, value)) = simple_comparison(conjunct, binding) else {
                continue;
            };
            let index_names = self.indexes.indexes_on_column(table, &column);
            let Some(index_name) = index_names.into_iter().next() else {
                continue;
            };
            let Some(instance) = self.indexes.instance(&index_name) else {
                continue;
            };
            let usable = op == "="
                || (matches!(op, "<" | ">" | "<=" | ">=") && instance.supports_range());
            if !usable {
                continue;
            }
            candidates.push(IndexCandidate {
                column,
                op,
                value,
                index_name,
            });
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        let stats = self.indexes.stats_for(table);
        let full_cost = crate::index::advisor::full_scan_cost(table_size).estimated_cost;

        // With several indexed conjuncts, intersecting their row sets
        // competes against the scan.
        if candidates.len() >= 2 {
            let predicates: Vec<(String, String)> = candidates
                .iter()
                .map(|c| (c.column.clone(), c.op.to_string()))
                .collect();
            let estimate =
                self.advisor
                    .estimate_intersection_cost(&predicates, table_size, &stats);
            if let Some(estimate) = estimate {
                if estimate.estimated_cost < full_cost {
                    return self.intersect_candidates(binding, table_size, &candidates);
                }
            }
        }

        // Otherwise take the cheapest winning single-index strategy.
        let mut best: Option<(usize, f64)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            let recommendation =
                self.advisor
                    .recommend(&candidate.column, candidate.op, table_size, &stats);
            if recommendation.strategy == Strategy::FullScan {
                continue;
            }
            let cost = recommendation
                .estimates
                .first()
                .map(|c| c.estimated_cost)
                .unwrap_or(f64::INFINITY);
            if best.map_or(true, |(_, best_cost)| cost < best_cost) {
                best = Some((i, cost));
            }
        }
        let Some((idx, _)) = best else {
            return Ok(None);
        };

        let candidate = &candidates[idx];
        let Some(instance) = self.indexes.instance(&candidate.index_name) else {
            return Ok(None);
        };
        let Some(rows) = index_lookup(instance, candidate.op, &candidate.value) else {
            return Ok(None);
        };
        self.advisor.learn_from_execution(
            &candidate.column,
            candidate.op,
            table_size.max(1),
            rows.len() as u64,
        );
        Ok(Some((binding.to_string(), rows)))
    }

    /// Fetch each candidate's row set from its index and intersect them,
    /// most recently fetched against the running result. An empty
    /// intermediate short-circuits.
    fn intersect_candidates(
        &mut self,
        binding: &str,
        table_size: u64,
        candidates: &[IndexCandidate],
    ) -> Result<Option<(String, Vec<RowId>)>> {
        let mut result: Option<Vec<RowId>> = None;
        for candidate in candidates {
            let Some(instance) = self.indexes.instance(&candidate.index_name) else {
                return Ok(None);
            };
            let Some(rows) = index_lookup(instance, candidate.op, &candidate.value) else {
                return Ok(None);
            };
            self.advisor.learn_from_execution(
                &candidate.column,
                candidate.op,
                table_size.max(1),
                rows.len() as u64,
            );
            let merged = match result {
                None => rows,
                Some(acc) => intersect_sorted(&acc, &rows),
            };
            let empty = merged.is_empty();
            result = Some(merged);
            if empty {
                break;
            }
        }
        Ok(result.map(|rows| (binding.to_string(), rows)))
    }

    // ====================================================================
    // Persistence
    // ====================================================================

    /// Write every table to its `.lyta` manifest and `.lycol` companion
    /// files under the database root, and write dirty buffered pages
    /// through.
    pub fn flush(&mut self) -> Result<()> {
        let names = self.list_tables();
        for name in names {
            self.flush_table(&name)?;
        }
        self.buffer_cache.flush_all(&mut |_, _| Ok(()))?;
        Ok(())
    }

    fn flush_table(&mut self, name: &str) -> Result<()> {
        let stored = self
            .tables
            .get(name)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, format!("no such table: {}", name)))?;

        let filepath = self.path.join(format!("{}.lyta", name));
        let mut writer = TableWriter::new(&filepath, stored.schema.clone(), &self.path);

        for (idx, def) in stored.schema.columns().iter().enumerate() {
            let mut column_writer = ColumnWriter::new(idx as u32, def.data_type);
            for row in 0..stored.rows.len() {
                if !stored.is_visible(row) {
                    continue;
                }
                column_writer.append_value(&stored.rows[row][idx])?;
            }
            let finalized = column_writer.finalize()?;
            let codec = finalized
                .pages
                .first()
                .map(|p| p.header.codec)
                .unwrap_or_default();
            writer.write_column_pages_with_stats(
                idx as u32,
                finalized.pages,
                finalized.row_count,
                codec,
                Some(finalized.stats),
            )?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Rewrite every row store, dropping deleted rows, and rebuild the
    /// affected indexes (row ids shift).
    pub fn compact(&mut self) -> Result<()> {
        let names = self.list_tables();
        for name in names {
            let stored = self.tables.get_mut(&name).unwrap();
            if stored.deleted.count_ones() == 0 {
                continue;
            }
            let deleted = std::mem::take(&mut stored.deleted);
            let rows = std::mem::take(&mut stored.rows);
            stored.rows = rows
                .into_iter()
                .enumerate()
                .filter(|(row, _)| !deleted.get(*row))
                .map(|(_, row)| row)
                .collect();
            stored.deleted = BitVec::new(stored.rows.len());

            let stored = self.tables.get(&name).unwrap();
            let rebuilt: Vec<(RowId, HashMap<String, Value>)> = (0..stored.rows.len())
                .map(|row| (row as RowId, stored.row_map(row)))
                .collect();
            self.indexes.rebuild(&name, &mut rebuilt.into_iter())?;
            self.result_cache.invalidate(&name);
        }
        Ok(())
    }

    /// Read a row range from the flushed snapshot of a table, pulling
    /// pages through the buffer cache.
    pub fn read_flushed_rows(
        &mut self,
        table: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<Vec<Value>>> {
        let schema = self.table_schema(table)?.clone();
        let filepath = self.path.join(format!("{}.lyta", table));
        let reader = TableReader::open(&filepath, schema.clone())?;

        let end = (start + count).min(reader.row_count());
        if start >= end {
            return Ok(Vec::new());
        }

        let mut columns: Vec<Vec<Value>> = Vec::with_capacity(schema.num_columns());
        for idx in 0..schema.num_columns() {
            let data_type = schema[idx].data_type;
            let col_path = column_file_path(&self.path, table, idx as u32);
            let mut values = Vec::new();
            for page in reader.read_column_pages(idx as u32)? {
                // Frame the page for the 64 KiB buffer pool and key it by
                // a digest of its location.
                let page_key = page_cache_key(&col_path, page.header.page_id);
                let cached = self.buffer_cache.get(page_key).map(|b| b.to_vec());
                let body = match cached {
                    Some(frame) => frame[..page.body.len()].to_vec(),
                    None => {
                        let mut frame = page.body.clone();
                        frame.resize(crate::storage::PAGE_SIZE, 0);
                        self.buffer_cache.put(page_key, frame, &mut |_, _| Ok(()))?;
                        page.body.clone()
                    }
                };
                values.extend(decode_page(data_type, &page.header, &body)?);
            }
            columns.push(values);
        }

        let mut rows = Vec::with_capacity((end - start) as usize);
        for row in start..end {
            rows.push(
                columns
                    .iter()
                    .map(|c| c.get(row as usize).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
        }
        Ok(rows)
    }

    /// Result cache statistics
    pub fn cache_stats(&self) -> crate::cache::ResultCacheStats {
        self.result_cache.stats()
    }

    /// Empty the result cache
    pub fn clear_result_cache(&mut self) {
        self.result_cache.clear();
    }

    /// Buffer cache statistics
    pub fn buffer_stats(&self) -> crate::storage::BufferCacheStats {
        self.buffer_cache.stats()
    }

    // ====================================================================
    // Statement Execution
    // ====================================================================

    fn execute_insert(&mut self, stmt: &InsertStmt) -> Result<u64> {
        let schema = self.table_schema(&stmt.table)?.clone();

        // Map the statement's column list onto schema positions.
        let positions: Vec<usize> = match &stmt.columns {
            None => (0..schema.num_columns()).collect(),
            Some(columns) => columns
                .iter()
                .map(|name| {
                    schema.column_index(name).ok_or_else(|| {
                        Error::with_message(
                            ErrorCode::Name,
                            format!("no such column: {}.{}", stmt.table, name),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        let empty = HashMap::new();
        let ctx = RowContext::Map(&empty);
        let mut inserted = 0u64;
        for row_exprs in &stmt.rows {
            if row_exprs.len() != positions.len() {
                return Err(Error::with_message(
                    ErrorCode::Type,
                    format!(
                        "insert arity mismatch: {} values for {} columns",
                        row_exprs.len(),
                        positions.len()
                    ),
                ));
            }
            let mut values = vec![Value::Null; schema.num_columns()];
            for (expr, &pos) in row_exprs.iter().zip(positions.iter()) {
                values[pos] = eval(expr, &ctx, None)?;
            }
            self.insert_row(&stmt.table, values)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    fn execute_update(&mut self, stmt: &UpdateStmt) -> Result<u64> {
        let assignments: Vec<(String, Expr)> = stmt
            .assignments
            .iter()
            .map(|a| (a.column.clone(), a.expr.clone()))
            .collect();
        self.update_rows(&stmt.table, stmt.where_clause.as_deref(), &assignments)
    }

    fn execute_delete(&mut self, stmt: &DeleteStmt) -> Result<u64> {
        self.delete_rows(&stmt.table, stmt.where_clause.as_deref())
    }

    fn execute_create_table(&mut self, stmt: &CreateTableStmt) -> Result<u64> {
        if self.tables.contains_key(&stmt.table) && stmt.if_not_exists {
            return Ok(0);
        }
        let mut schema = Schema::default();
        for col in &stmt.columns {
            schema.add_column(ColumnDef {
                name: col.name.clone(),
                data_type: col.data_type,
                nullable: col.nullable,
            })?;
        }
        self.create_table(&stmt.table, schema)?;
        Ok(0)
    }

    fn execute_create_index(&mut self, stmt: &CreateIndexStmt) -> Result<u64> {
        let kind = match stmt.kind {
            IndexKindAst::BTree => IndexKind::BTree,
            IndexKindAst::Hash => IndexKind::Hash,
            IndexKindAst::Bitmap => IndexKind::Bitmap,
        };
        self.create_index(&stmt.index, &stmt.table, stmt.columns.clone(), kind)?;
        Ok(0)
    }
}

// ============================================================================
// Planner and Executor Integration
// ============================================================================

impl CatalogInfo for Database {
    fn columns_of(&self, table: &str) -> Option<Vec<String>> {
        self.tables.get(table).map(|t| t.schema.column_names())
    }

    fn row_count_of(&self, table: &str) -> u64 {
        self.tables
            .get(table)
            .map(|t| t.visible_row_count())
            .unwrap_or(0)
    }
}

/// Scan source over the handle's tables, optionally restricting one
/// binding to the row ids an index produced.
struct ScanView<'a> {
    db: &'a Database,
    restriction: Option<(String, Vec<RowId>)>,
}

impl ScanSource for ScanView<'_> {
    fn scan(
        &self,
        table: &str,
        binding: &str,
        columns: Option<&[String]>,
        batch_size: usize,
    ) -> Result<Vec<Batch>> {
        let stored = self.db.tables.get(table).ok_or_else(|| {
            Error::with_message(ErrorCode::Name, format!("no such table: {}", table))
        })?;

        let wanted: Vec<usize> = match columns {
            None => (0..stored.schema.num_columns()).collect(),
            Some(names) => names
                .iter()
                .filter_map(|name| stored.schema.column_index(name))
                .collect(),
        };

        let mut batch_columns: Vec<BatchColumn> = wanted
            .iter()
            .map(|&idx| BatchColumn::new(Some(binding.to_string()), stored.schema[idx].name.clone()))
            .collect();

        let restricted = self
            .restriction
            .as_ref()
            .filter(|(b, _)| b == binding)
            .map(|(_, rows)| rows);

        let mut push_row = |row: usize| {
            for (slot, &idx) in batch_columns.iter_mut().zip(wanted.iter()) {
                slot.values
                    .push(stored.rows[row].get(idx).cloned().unwrap_or(Value::Null));
            }
        };

        match restricted {
            Some(rows) => {
                for &row in rows {
                    let row = row as usize;
                    if row < stored.rows.len() && stored.is_visible(row) {
                        push_row(row);
                    }
                }
            }
            None => {
                for row in 0..stored.rows.len() {
                    if stored.is_visible(row) {
                        push_row(row);
                    }
                }
            }
        }

        Ok(Batch::new(batch_columns).chunks(batch_size))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// One WHERE conjunct a single-column index can answer
struct IndexCandidate {
    column: String,
    op: &'static str,
    value: Value,
    index_name: String,
}

/// Row ids an index returns for `op value`, sorted and deduplicated.
/// None when the index kind cannot answer the operator.
fn index_lookup(instance: &IndexInstance, op: &str, value: &Value) -> Option<Vec<RowId>> {
    let mut rows = match op {
        "=" => instance.search(value),
        "<" if instance.supports_range() => instance.search_less(value),
        ">" if instance.supports_range() => instance.search_greater(value),
        "<=" if instance.supports_range() => {
            let mut rows = instance.search_less(value);
            rows.extend(instance.search(value));
            rows
        }
        ">=" if instance.supports_range() => {
            let mut rows = instance.search_greater(value);
            rows.extend(instance.search(value));
            rows
        }
        _ => return None,
    };
    rows.sort_unstable();
    rows.dedup();
    Some(rows)
}

/// Intersection of two sorted row-id sets
fn intersect_sorted(a: &[RowId], b: &[RowId]) -> Vec<RowId> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Cache key for a page of a flushed column file
fn page_cache_key(path: &Path, page_id: u64) -> u64 {
    let digest = crc32(path.to_string_lossy().as_bytes()) as u64;
    (digest << 32) | (page_id & 0xFFFF_FFFF)
}

fn validate_row(schema: &Schema, values: &[Value]) -> Result<()> {
    if values.len() != schema.num_columns() {
        return Err(Error::with_message(
            ErrorCode::Type,
            format!(
                "row arity mismatch: {} values for {} columns",
                values.len(),
                schema.num_columns()
            ),
        ));
    }
    for (value, def) in values.iter().zip(schema.columns()) {
        if value.is_null() {
            if !def.nullable {
                return Err(Error::with_message(
                    ErrorCode::Type,
                    format!("column {} is NOT NULL", def.name),
                ));
            }
            continue;
        }
        let ok = match def.data_type {
            DataType::Text => matches!(value, Value::Text(_)),
            DataType::Bool => matches!(value, Value::Boolean(_)),
            DataType::Float32 | DataType::Float64 => value.is_numeric(),
            _ => matches!(value, Value::Integer(_)),
        };
        if !ok {
            return Err(Error::with_message(
                ErrorCode::Type,
                format!("value {} does not fit column {} ({})", value, def.name, def.data_type),
            ));
        }
    }
    Ok(())
}

fn matches_predicate(predicate: Option<&Expr>, row: &HashMap<String, Value>) -> Result<bool> {
    match predicate {
        None => Ok(true),
        Some(expr) => Ok(eval(expr, &RowContext::Map(row), None)?.to_bool() == Some(true)),
    }
}

/// Tables a SELECT reads, for cache tagging
fn select_tables(select: &SelectStmt) -> BTreeSet<String> {
    let mut tables = BTreeSet::new();
    if let Some(from) = &select.from {
        tables.insert(from.name.clone());
    }
    for join in &select.joins {
        tables.insert(join.table.name.clone());
    }
    tables
}

/// Find a Filter directly over a Scan anywhere in the plan
fn find_filtered_scan(plan: &PlanNode) -> Option<(&str, &str, &Expr)> {
    match plan {
        PlanNode::Filter { child, predicate } => match child.as_ref() {
            PlanNode::Scan { table, binding, .. } => Some((binding, table, predicate)),
            other => find_filtered_scan(other),
        },
        PlanNode::Project { child, .. }
        | PlanNode::Aggregate { child, .. }
        | PlanNode::Sort { child, .. }
        | PlanNode::Limit { child, .. } => find_filtered_scan(child),
        PlanNode::Join { left, right, .. } => {
            find_filtered_scan(left).or_else(|| find_filtered_scan(right))
        }
        PlanNode::Scan { .. } => None,
    }
}

fn conjuncts_of(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            let mut out = conjuncts_of(left);
            out.extend(conjuncts_of(right));
            out
        }
        other => vec![other],
    }
}

/// Match `column op literal` (either side) against a scan binding
fn simple_comparison<'a>(expr: &'a Expr, binding: &str) -> Option<(String, &'static str, Value)> {
    let Expr::Binary { op, left, right } = expr else {
        return None;
    };
    let op_str = match op {
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        _ => return None,
    };

    let as_column = |e: &'a Expr| match e {
        Expr::Column(col) if col.table.as_deref() == Some(binding) => Some(col.column.clone()),
        _ => None,
    };
    let as_literal = |e: &Expr| match e {
        Expr::Literal(lit) => Some(match lit {
            Literal::Null => Value::Null,
            Literal::Integer(i) => Value::Integer(*i),
            Literal::Float(f) => Value::Real(*f),
            Literal::String(s) => Value::Text(s.clone()),
            Literal::Bool(b) => Value::Boolean(*b),
        }),
        _ => None,
    };

    if let (Some(column), Some(value)) = (as_column(left), as_literal(right)) {
        return Some((column, op_str, value));
    }
    if let (Some(column), Some(value)) = (as_column(right), as_literal(left)) {
        // Flip the comparison when the literal is on the left.
        let flipped = match op_str {
            "<" => ">",
            ">" => "<",
            "<=" => ">=",
            ">=" => "<=",
            other => other,
        };
        return Some((column, flipped, value));
    }
    None
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, db)
    }

    fn seeded() -> (tempfile::TempDir, Database) {
        let (dir, mut db) = db();
        db.execute(
            "CREATE TABLE employees (emp_id BIGINT NOT NULL, dept_id BIGINT, salary DOUBLE)",
        )
        .unwrap();
        db.execute("CREATE TABLE departments (dept_id BIGINT, name VARCHAR)")
            .unwrap();
        db.execute(
            "INSERT INTO employees VALUES (1, 10, 80000.0), (2, 10, 75000.0), \
             (3, 10, 95000.0), (4, 20, 60000.0), (5, 30, 55000.0)",
        )
        .unwrap();
        db.execute(
            "INSERT INTO departments VALUES (10, 'engineering'), (20, 'sales'), (40, 'legal')",
        )
        .unwrap();
        (dir, db)
    }

    #[test]
    fn test_create_insert_select() {
        let (_dir, mut db) = seeded();
        let result = db.query("SELECT emp_id, salary FROM employees WHERE salary > 70000").unwrap();
        assert_eq!(result.row_count(), 3);
        assert_eq!(result.columns, vec!["emp_id", "salary"]);
    }

    #[test]
    fn test_select_star_expansion() {
        let (_dir, mut db) = seeded();
        let result = db.query("SELECT * FROM departments").unwrap();
        assert_eq!(result.columns, vec!["dept_id", "name"]);
        assert_eq!(result.row_count(), 3);
    }

    #[test]
    fn test_inner_join() {
        let (_dir, mut db) = seeded();
        let result = db
            .query(
                "SELECT e.emp_id, d.name FROM employees e \
                 JOIN departments d ON e.dept_id = d.dept_id",
            )
            .unwrap();
        // Employee 5 (dept 30) has no department; dept 40 has no employee.
        assert_eq!(result.row_count(), 4);
        let names: BTreeSet<String> = result
            .rows
            .iter()
            .map(|r| r[1].to_text())
            .collect();
        assert_eq!(
            names,
            ["engineering", "sales"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn test_left_join_emits_null_for_miss() {
        let (_dir, mut db) = seeded();
        let result = db
            .query(
                "SELECT e.emp_id, d.name FROM employees e \
                 LEFT JOIN departments d ON e.dept_id = d.dept_id",
            )
            .unwrap();
        assert_eq!(result.row_count(), 5);
        let unmatched: Vec<&Vec<Value>> = result
            .rows
            .iter()
            .filter(|r| r[0] == Value::Integer(5))
            .collect();
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0][1], Value::Null);
    }

    #[test]
    fn test_group_by_having() {
        let (_dir, mut db) = seeded();
        let result = db
            .query(
                "SELECT dept_id FROM employees GROUP BY dept_id HAVING COUNT(*) > 2",
            )
            .unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows[0][0], Value::Integer(10));
    }

    #[test]
    fn test_order_by_limit() {
        let (_dir, mut db) = seeded();
        let result = db
            .query("SELECT emp_id FROM employees ORDER BY salary DESC LIMIT 2")
            .unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows[0][0], Value::Integer(3));
        assert_eq!(result.rows[1][0], Value::Integer(1));
    }

    #[test]
    fn test_update_and_delete() {
        let (_dir, mut db) = seeded();
        let changed = db
            .execute("UPDATE employees SET salary = salary + 1000 WHERE dept_id = 10")
            .unwrap();
        assert_eq!(changed, 3);
        let result = db
            .query("SELECT salary FROM employees WHERE emp_id = 1")
            .unwrap();
        assert_eq!(result.rows[0][0], Value::Real(81000.0));

        let removed = db.execute("DELETE FROM employees WHERE dept_id = 20").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.table_row_count("employees").unwrap(), 4);
    }

    #[test]
    fn test_result_cache_roundtrip_and_invalidation() {
        let (_dir, mut db) = seeded();
        let first = db.query("SELECT COUNT(*) FROM employees").unwrap();
        assert_eq!(first.rows[0][0], Value::Integer(5));

        // Second run hits the cache.
        db.query("SELECT COUNT(*) FROM employees").unwrap();
        assert_eq!(db.cache_stats().hits, 1);

        // A write invalidates; the next read sees the new count.
        db.execute("INSERT INTO employees VALUES (6, 20, 50000.0)").unwrap();
        let second = db.query("SELECT COUNT(*) FROM employees").unwrap();
        assert_eq!(second.rows[0][0], Value::Integer(6));
    }

    #[test]
    fn test_insert_validation_atomicity() {
        let (_dir, mut db) = seeded();
        // Arity mismatch fails without inserting anything.
        let err = db.execute("INSERT INTO employees VALUES (9, 10)").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Type);
        // NOT NULL violation.
        let err = db
            .execute("INSERT INTO employees VALUES (NULL, 10, 1.0)")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Type);
        assert_eq!(db.table_row_count("employees").unwrap(), 5);
    }

    #[test]
    fn test_unknown_names() {
        let (_dir, mut db) = seeded();
        assert_eq!(
            db.query("SELECT * FROM missing").unwrap_err().code(),
            ErrorCode::Name
        );
        assert_eq!(
            db.query("SELECT bogus FROM employees").unwrap_err().code(),
            ErrorCode::Name
        );
    }

    #[test]
    fn test_index_backed_equality_query() {
        let (_dir, mut db) = seeded();
        db.execute("CREATE INDEX dept_idx ON employees (dept_id) USING HASH")
            .unwrap();
        let result = db
            .query("SELECT emp_id FROM employees WHERE dept_id = 10")
            .unwrap();
        assert_eq!(result.row_count(), 3);

        // Index results match the unindexed scan.
        db.execute("DROP INDEX dept_idx").unwrap();
        let unindexed = db
            .query("SELECT emp_id FROM employees WHERE dept_id = 10")
            .unwrap();
        let a: BTreeSet<i64> = result.rows.iter().map(|r| r[0].to_i64()).collect();
        let b: BTreeSet<i64> = unindexed.rows.iter().map(|r| r[0].to_i64()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_index_intersection_route() {
        let (_dir, mut db) = db();
        db.execute("CREATE TABLE events (a BIGINT, b BIGINT)").unwrap();
        // 512 rows; both columns cycle through 64 distinct values, so the
        // intersection estimate beats the scan and each single index.
        let values: Vec<String> = (0..512)
            .map(|i| format!("({}, {})", i % 64, (i / 8) % 64))
            .collect();
        db.execute(&format!("INSERT INTO events VALUES {}", values.join(", ")))
            .unwrap();
        db.execute("CREATE INDEX a_idx ON events (a)").unwrap();
        db.execute("CREATE INDEX b_idx ON events (b)").unwrap();

        // a = 3 has rows {3, 67, 131, ...}; b = 0 has rows 0..8; only
        // row 3 satisfies both.
        let indexed = db
            .query("SELECT a, b FROM events WHERE a = 3 AND b = 0")
            .unwrap();
        assert_eq!(indexed.row_count(), 1);
        assert_eq!(indexed.rows[0][0], Value::Integer(3));
        assert_eq!(indexed.rows[0][1], Value::Integer(0));

        // Both intersected predicates fed the advisor's memory.
        assert!(db.advisor().learned_patterns() >= 2);

        // Same answer without any index.
        db.execute("DROP INDEX a_idx").unwrap();
        db.execute("DROP INDEX b_idx").unwrap();
        db.clear_result_cache();
        let scanned = db
            .query("SELECT a, b FROM events WHERE a = 3 AND b = 0")
            .unwrap();
        assert_eq!(scanned.rows, indexed.rows);
    }

    #[test]
    fn test_index_intersection_disjoint_predicates_empty() {
        let (_dir, mut db) = db();
        db.execute("CREATE TABLE events (a BIGINT, b BIGINT)").unwrap();
        let values: Vec<String> = (0..512)
            .map(|i| format!("({}, {})", i % 64, i % 64))
            .collect();
        db.execute(&format!("INSERT INTO events VALUES {}", values.join(", ")))
            .unwrap();
        db.execute("CREATE INDEX a_idx ON events (a)").unwrap();
        db.execute("CREATE INDEX b_idx ON events (b)").unwrap();

        // a and b always agree, so differing equality predicates can
        // never intersect.
        let result = db
            .query("SELECT COUNT(*) FROM events WHERE a = 3 AND b = 4")
            .unwrap();
        assert_eq!(result.rows[0][0], Value::Integer(0));
    }

    #[test]
    fn test_btree_range_query_through_index() {
        let (_dir, mut db) = seeded();
        db.execute("CREATE INDEX sal_idx ON employees (salary)").unwrap();
        let result = db
            .query("SELECT emp_id FROM employees WHERE salary > 70000.0")
            .unwrap();
        let ids: BTreeSet<i64> = result.rows.iter().map(|r| r[0].to_i64()).collect();
        assert_eq!(ids, [1i64, 2, 3].into_iter().collect());
    }

    #[test]
    fn test_flush_and_read_back() {
        let (_dir, mut db) = seeded();
        db.flush().unwrap();
        let rows = db.read_flushed_rows("employees", 0, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::Integer(1));

        // Second read served from the buffer cache.
        db.read_flushed_rows("employees", 0, 2).unwrap();
        assert!(db.buffer_stats().hits > 0);
    }

    #[test]
    fn test_compact_drops_deleted_rows() {
        let (_dir, mut db) = seeded();
        db.execute("DELETE FROM employees WHERE dept_id = 10").unwrap();
        db.compact().unwrap();
        assert_eq!(db.table_row_count("employees").unwrap(), 2);
        let result = db.query("SELECT COUNT(*) FROM employees").unwrap();
        assert_eq!(result.rows[0][0], Value::Integer(2));
    }

    #[test]
    fn test_drop_table_invalidates() {
        let (_dir, mut db) = seeded();
        db.query("SELECT COUNT(*) FROM departments").unwrap();
        db.execute("DROP TABLE departments").unwrap();
        assert!(db.query("SELECT COUNT(*) FROM departments").is_err());
        assert!(!db.list_tables().contains(&"departments".to_string()));
    }

    #[test]
    fn test_from_less_select() {
        let (_dir, mut db) = db();
        let result = db.query("SELECT 1 + 2, UPPER('abc')").unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows[0][0], Value::Integer(3));
        assert_eq!(result.rows[0][1], Value::Text("ABC".into()));
    }
}
