//! Physical operators
//!
//! A pulled pipeline over columnar batches: scan, filter, project, hash
//! join, aggregate, sort, and limit. Each operator's `next` returns the
//! following batch or None at end of stream, and checks the cancellation
//! flag between batches. Row order across columns is preserved by every
//! operator; only Sort establishes a global order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::error::{Error, ErrorCode, Result};
use crate::exec::aggregate::AggregateState;
use crate::exec::batch::{Batch, BatchColumn};
use crate::exec::eval::{eval, eval_selection, RowContext};
use crate::index::encode_composite_key;
use crate::parser::ast::{AggregateFunc, BinaryOp, Expr, JoinType, SortOrder};
use crate::plan::{expr_label, OutputColumn, PlanNode, SortKey};
use crate::types::{total_order, Value};

// ============================================================================
// Cancellation
// ============================================================================

/// Host-settable abort flag checked between batches
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Cancellation::default()
    }

    /// Request the running query to stop at the next batch boundary
    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, AtomicOrdering::Relaxed);
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::with_message(ErrorCode::Interrupted, "query cancelled"))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Scan Source
// ============================================================================

/// Supplies table batches to scan operators.
///
/// Implementations must return at least one (possibly empty) batch so the
/// column layout is always known downstream.
pub trait ScanSource {
    fn scan(
        &self,
        table: &str,
        binding: &str,
        columns: Option<&[String]>,
        batch_size: usize,
    ) -> Result<Vec<Batch>>;
}

// ============================================================================
// Operator Tree
// ============================================================================

/// Physical operator, one variant per plan node kind
pub enum Operator {
    Scan(ScanOp),
    Filter(FilterOp),
    Project(ProjectOp),
    HashJoin(HashJoinOp),
    Aggregate(AggregateOp),
    Sort(SortOp),
    Limit(LimitOp),
}

impl Operator {
    /// Pull the next batch, or None at end of stream
    pub fn next(&mut self, cancel: &Cancellation) -> Result<Option<Batch>> {
        cancel.check()?;
        match self {
            Operator::Scan(op) => op.next(),
            Operator::Filter(op) => op.next(cancel),
            Operator::Project(op) => op.next(cancel),
            Operator::HashJoin(op) => op.next(cancel),
            Operator::Aggregate(op) => op.next(cancel),
            Operator::Sort(op) => op.next(cancel),
            Operator::Limit(op) => op.next(cancel),
        }
    }
}

/// Build the operator tree for a plan
pub fn build(plan: &PlanNode, source: &dyn ScanSource, batch_size: usize) -> Result<Operator> {
    Ok(match plan {
        PlanNode::Scan {
            table,
            binding,
            columns,
        } => Operator::Scan(ScanOp {
            batches: source
                .scan(table, binding, columns.as_deref(), batch_size)?
                .into_iter(),
        }),

        PlanNode::Filter { child, predicate } => Operator::Filter(FilterOp {
            child: Box::new(build(child, source, batch_size)?),
            predicate: predicate.clone(),
        }),

        PlanNode::Project {
            child,
            columns,
            distinct,
        } => Operator::Project(ProjectOp {
            child: Box::new(build(child, source, batch_size)?),
            columns: columns.clone(),
            distinct: *distinct,
            distinct_seen: HashMap::new(),
        }),

        PlanNode::Join {
            left,
            right,
            predicate,
            kind,
            algorithm: _,
        } => {
            // RIGHT executes as LEFT with the inputs swapped.
            let (probe_plan, build_plan, kind) = match kind {
                JoinType::Right => (right.as_ref(), left.as_ref(), JoinType::Left),
                other => (left.as_ref(), right.as_ref(), *other),
            };
            let (probe_keys, build_keys) =
                extract_equi_keys(predicate, &probe_plan.bindings(), &build_plan.bindings())?;
            Operator::HashJoin(HashJoinOp {
                probe: Box::new(build(probe_plan, source, batch_size)?),
                build_side: Box::new(build(build_plan, source, batch_size)?),
                probe_keys,
                build_keys,
                kind,
                state: None,
                probe_columns: None,
                tail_done: false,
            })
        }

        PlanNode::Aggregate {
            child,
            group_by,
            output,
            having,
            distinct,
        } => Operator::Aggregate(AggregateOp {
            child: Box::new(build(child, source, batch_size)?),
            group_by: group_by.clone(),
            output: output.clone(),
            having: having.clone(),
            distinct: *distinct,
            done: false,
        }),

        PlanNode::Sort {
            child,
            keys,
            top_k,
        } => Operator::Sort(SortOp {
            child: Box::new(build(child, source, batch_size)?),
            keys: keys.clone(),
            top_k: *top_k,
            batch_size,
            pending: None,
        }),

        PlanNode::Limit {
            child,
            limit,
            offset,
        } => Operator::Limit(LimitOp {
            child: Box::new(build(child, source, batch_size)?),
            to_skip: *offset,
            remaining: *limit,
        }),
    })
}

/// Execute a plan to a single materialized batch
pub fn run(
    plan: &PlanNode,
    source: &dyn ScanSource,
    batch_size: usize,
    cancel: &Cancellation,
) -> Result<Batch> {
    let mut operator = build(plan, source, batch_size)?;
    let mut batches = Vec::new();
    while let Some(batch) = operator.next(cancel)? {
        batches.push(batch);
    }
    Ok(Batch::concat(batches))
}

// ============================================================================
// Scan
// ============================================================================

/// Streams pre-chunked table batches
pub struct ScanOp {
    batches: std::vec::IntoIter<Batch>,
}

impl ScanOp {
    fn next(&mut self) -> Result<Option<Batch>> {
        Ok(self.batches.next())
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Evaluates a predicate into a selection vector and gathers survivors
pub struct FilterOp {
    child: Box<Operator>,
    predicate: Expr,
}

impl FilterOp {
    fn next(&mut self, cancel: &Cancellation) -> Result<Option<Batch>> {
        match self.child.next(cancel)? {
            None => Ok(None),
            Some(batch) => {
                let selection = eval_selection(&self.predicate, &batch)?;
                Ok(Some(batch.gather(&selection)))
            }
        }
    }
}

// ============================================================================
// Project
// ============================================================================

/// Evaluates output expressions, rebuilding the column map
pub struct ProjectOp {
    child: Box<Operator>,
    columns: Vec<OutputColumn>,
    distinct: bool,
    distinct_seen: HashMap<String, ()>,
}

impl ProjectOp {
    fn next(&mut self, cancel: &Cancellation) -> Result<Option<Batch>> {
        let Some(batch) = self.child.next(cancel)? else {
            return Ok(None);
        };

        let mut columns: Vec<BatchColumn> = self
            .columns
            .iter()
            .map(|c| BatchColumn::new(None, c.name.clone()))
            .collect();
        for row in 0..batch.row_count {
            let mut values = Vec::with_capacity(self.columns.len());
            for output in &self.columns {
                values.push(eval(&output.expr, &RowContext::Batch(&batch, row), None)?);
            }
            if self.distinct {
                let key = encode_composite_key(&values);
                if self.distinct_seen.insert(key, ()).is_some() {
                    continue;
                }
            }
            for (col, value) in columns.iter_mut().zip(values) {
                col.values.push(value);
            }
        }
        Ok(Some(Batch::new(columns)))
    }
}

// ============================================================================
// Hash Join
// ============================================================================

struct JoinBuildState {
    batch: Batch,
    table: HashMap<String, Vec<usize>>,
    matched: Vec<bool>,
}

/// Hash join: materializes the build side into a key table and streams
/// the probe side through it. INNER and LEFT are supported natively;
/// RIGHT runs as LEFT with swapped inputs, and FULL appends unmatched
/// build rows after the probe side is exhausted.
pub struct HashJoinOp {
    probe: Box<Operator>,
    build_side: Box<Operator>,
    probe_keys: Vec<Expr>,
    build_keys: Vec<Expr>,
    kind: JoinType,
    state: Option<JoinBuildState>,
    probe_columns: Option<Vec<BatchColumn>>,
    tail_done: bool,
}

impl HashJoinOp {
    fn next(&mut self, cancel: &Cancellation) -> Result<Option<Batch>> {
        if self.state.is_none() {
            self.build_table(cancel)?;
        }

        if let Some(probe_batch) = self.probe.next(cancel)? {
            let out = self.probe_batch(&probe_batch)?;
            return Ok(Some(out));
        }

        // FULL join tail: build rows no probe row matched.
        if self.kind == JoinType::Full && !self.tail_done {
            self.tail_done = true;
            let state = self.state.as_ref().unwrap();
            let mut out = self.output_layout(None);
            let probe_cols = out.columns.len() - state.batch.columns.len();
            for (row, matched) in state.matched.iter().enumerate() {
                if !matched {
                    for col in out.columns.iter_mut().take(probe_cols) {
                        col.values.push(Value::Null);
                    }
                    for (col, src) in out
                        .columns
                        .iter_mut()
                        .skip(probe_cols)
                        .zip(state.batch.columns.iter())
                    {
                        col.values.push(src.values[row].clone());
                    }
                    out.row_count += 1;
                }
            }
            if out.row_count > 0 {
                return Ok(Some(out));
            }
        }

        Ok(None)
    }

    fn build_table(&mut self, cancel: &Cancellation) -> Result<()> {
        let mut batches = Vec::new();
        while let Some(batch) = self.build_side.next(cancel)? {
            batches.push(batch);
        }
        let batch = Batch::concat(batches);

        let mut table: HashMap<String, Vec<usize>> = HashMap::new();
        for row in 0..batch.row_count {
            if let Some(key) = self.join_key(&self.build_keys, &batch, row)? {
                table.entry(key).or_default().push(row);
            }
        }
        let matched = vec![false; batch.row_count];
        self.state = Some(JoinBuildState {
            batch,
            table,
            matched,
        });
        Ok(())
    }

    /// NULL in any key component never matches
    fn join_key(&self, keys: &[Expr], batch: &Batch, row: usize) -> Result<Option<String>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = eval(key, &RowContext::Batch(batch, row), None)?;
            if value.is_null() {
                return Ok(None);
            }
            values.push(value);
        }
        Ok(Some(encode_composite_key(&values)))
    }

    /// Output layout: probe columns then build columns. For the FULL
    /// tail the probe layout comes from the batches probed earlier.
    fn output_layout(&self, probe: Option<&Batch>) -> Batch {
        let state = self.state.as_ref().unwrap();
        let mut columns = Vec::new();
        let probe_columns = match probe {
            Some(probe) => Some(&probe.columns),
            None => self.probe_columns.as_ref(),
        };
        if let Some(probe_columns) = probe_columns {
            for col in probe_columns {
                columns.push(BatchColumn::new(col.table.clone(), col.name.clone()));
            }
        }
        for col in &state.batch.columns {
            columns.push(BatchColumn::new(col.table.clone(), col.name.clone()));
        }
        Batch {
            columns,
            row_count: 0,
        }
    }

    fn probe_batch(&mut self, probe: &Batch) -> Result<Batch> {
        if self.probe_columns.is_none() {
            self.probe_columns = Some(
                probe
                    .columns
                    .iter()
                    .map(|c| BatchColumn::new(c.table.clone(), c.name.clone()))
                    .collect(),
            );
        }
        let mut out = self.output_layout(Some(probe));
        let probe_cols = probe.columns.len();

        // Borrow the build state immutably while collecting matches.
        let mut match_marks = Vec::new();
        {
            let state = self.state.as_ref().unwrap();
            for row in 0..probe.row_count {
                let matches = match self.join_key(&self.probe_keys, probe, row)? {
                    Some(key) => state.table.get(&key).map(|v| v.as_slice()).unwrap_or(&[]),
                    None => &[],
                };

                if matches.is_empty() {
                    if matches!(self.kind, JoinType::Left | JoinType::Full) {
                        for (idx, col) in out.columns.iter_mut().enumerate() {
                            if idx < probe_cols {
                                col.values.push(probe.columns[idx].values[row].clone());
                            } else {
                                col.values.push(Value::Null);
                            }
                        }
                        out.row_count += 1;
                    }
                    continue;
                }

                for &build_row in matches {
                    match_marks.push(build_row);
                    for (idx, col) in out.columns.iter_mut().enumerate() {
                        if idx < probe_cols {
                            col.values.push(probe.columns[idx].values[row].clone());
                        } else {
                            col.values.push(
                                state.batch.columns[idx - probe_cols].values[build_row].clone(),
                            );
                        }
                    }
                    out.row_count += 1;
                }
            }
        }

        let state = self.state.as_mut().unwrap();
        for build_row in match_marks {
            state.matched[build_row] = true;
        }
        Ok(out)
    }
}

/// Split an equi-join predicate into aligned probe/build key lists
fn extract_equi_keys(
    predicate: &Expr,
    probe_bindings: &[String],
    build_bindings: &[String],
) -> Result<(Vec<Expr>, Vec<Expr>)> {
    let mut probe_keys = Vec::new();
    let mut build_keys = Vec::new();

    for conjunct in split_conjuncts(predicate) {
        let Expr::Binary {
            op: BinaryOp::Eq,
            left,
            right,
        } = conjunct
        else {
            return Err(Error::with_message(
                ErrorCode::Type,
                "join predicates must be equality comparisons",
            ));
        };

        let left_side = side_of(left, probe_bindings, build_bindings);
        let right_side = side_of(right, probe_bindings, build_bindings);
        match (left_side, right_side) {
            (Side::Probe, Side::Build) => {
                probe_keys.push((**left).clone());
                build_keys.push((**right).clone());
            }
            (Side::Build, Side::Probe) => {
                probe_keys.push((**right).clone());
                build_keys.push((**left).clone());
            }
            _ => {
                return Err(Error::with_message(
                    ErrorCode::Type,
                    "join predicate must compare the two join sides",
                ))
            }
        }
    }

    if probe_keys.is_empty() {
        return Err(Error::with_message(
            ErrorCode::Type,
            "join requires at least one equality predicate",
        ));
    }
    Ok((probe_keys, build_keys))
}

#[derive(PartialEq, Clone, Copy)]
enum Side {
    Probe,
    Build,
    Mixed,
}

fn side_of(expr: &Expr, probe_bindings: &[String], build_bindings: &[String]) -> Side {
    let mut columns = Vec::new();
    expr.collect_columns(&mut columns);
    let mut probe = false;
    let mut build = false;
    for col in columns {
        match col.table {
            Some(table) if probe_bindings.contains(&table) => probe = true,
            Some(table) if build_bindings.contains(&table) => build = true,
            _ => {}
        }
    }
    match (probe, build) {
        (true, false) => Side::Probe,
        (false, true) => Side::Build,
        _ => Side::Mixed,
    }
}

fn split_conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            let mut out = split_conjuncts(left);
            out.extend(split_conjuncts(right));
            out
        }
        other => vec![other],
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// Hash aggregation: groups by the grouping tuple, folds accumulators,
/// evaluates outputs and HAVING over the finalized groups.
pub struct AggregateOp {
    child: Box<Operator>,
    group_by: Vec<Expr>,
    output: Vec<OutputColumn>,
    having: Option<Expr>,
    distinct: bool,
    done: bool,
}

struct Group {
    representative: HashMap<String, Value>,
    states: Vec<AggregateState>,
}

impl AggregateOp {
    fn next(&mut self, cancel: &Cancellation) -> Result<Option<Batch>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        // The aggregate calls to fold, collected across output and HAVING.
        let mut agg_exprs: Vec<(String, AggregateFunc, Option<Expr>)> = Vec::new();
        for column in &self.output {
            collect_aggregates(&column.expr, &mut agg_exprs);
        }
        if let Some(having) = &self.having {
            collect_aggregates(having, &mut agg_exprs);
        }

        let mut groups: Vec<(String, Group)> = Vec::new();
        let mut group_index: HashMap<String, usize> = HashMap::new();

        while let Some(batch) = self.child.next(cancel)? {
            for row in 0..batch.row_count {
                let ctx = RowContext::Batch(&batch, row);
                let mut key_values = Vec::with_capacity(self.group_by.len());
                for expr in &self.group_by {
                    key_values.push(eval(expr, &ctx, None)?);
                }
                let key = encode_composite_key(&key_values);

                let idx = match group_index.get(&key) {
                    Some(&idx) => idx,
                    None => {
                        let representative = representative_row(&batch, row);
                        let states = agg_exprs
                            .iter()
                            .map(|(_, func, arg)| {
                                AggregateState::new(*func, arg.is_none())
                            })
                            .collect();
                        groups.push((
                            key.clone(),
                            Group {
                                representative,
                                states,
                            },
                        ));
                        group_index.insert(key, groups.len() - 1);
                        groups.len() - 1
                    }
                };

                let group = &mut groups[idx].1;
                for ((_, _, arg), state) in agg_exprs.iter().zip(group.states.iter_mut()) {
                    let value = match arg {
                        Some(arg) => eval(arg, &ctx, None)?,
                        None => Value::Null,
                    };
                    state.step(&value);
                }
            }
        }

        // Without GROUP BY a single accumulator row is emitted even over
        // empty input.
        if groups.is_empty() && self.group_by.is_empty() {
            groups.push((
                String::new(),
                Group {
                    representative: HashMap::new(),
                    states: agg_exprs
                        .iter()
                        .map(|(_, func, arg)| AggregateState::new(*func, arg.is_none()))
                        .collect(),
                },
            ));
        }

        let mut columns: Vec<BatchColumn> = self
            .output
            .iter()
            .map(|c| BatchColumn::new(None, c.name.clone()))
            .collect();
        let mut distinct_seen: HashMap<String, ()> = HashMap::new();
        let mut row_count = 0usize;

        for (_, group) in &groups {
            let mut aggregates = HashMap::new();
            for ((label, _, _), state) in agg_exprs.iter().zip(group.states.iter()) {
                aggregates.insert(label.clone(), state.finalize());
            }

            let ctx = RowContext::Map(&group.representative);
            if let Some(having) = &self.having {
                let keep = eval(having, &ctx, Some(&aggregates))?;
                if keep.to_bool() != Some(true) {
                    continue;
                }
            }

            let mut values = Vec::with_capacity(self.output.len());
            for output in &self.output {
                let value = match eval(&output.expr, &ctx, Some(&aggregates)) {
                    Ok(v) => v,
                    // The empty-input single group has no source row to
                    // resolve columns against.
                    Err(_) if group.representative.is_empty() => Value::Null,
                    Err(e) => return Err(e),
                };
                values.push(value);
            }
            if self.distinct {
                let key = encode_composite_key(&values);
                if distinct_seen.insert(key, ()).is_some() {
                    continue;
                }
            }
            for (col, value) in columns.iter_mut().zip(values) {
                col.values.push(value);
            }
            row_count += 1;
        }

        Ok(Some(Batch {
            columns,
            row_count,
        }))
    }
}

/// Capture one row as a lookup map keyed by both qualified and bare names
fn representative_row(batch: &Batch, row: usize) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    for col in &batch.columns {
        let value = col.values.get(row).cloned().unwrap_or(Value::Null);
        if let Some(table) = &col.table {
            out.insert(format!("{}.{}", table, col.name), value.clone());
        }
        out.entry(col.name.clone()).or_insert(value);
    }
    out
}

/// Collect unique aggregate calls by label
fn collect_aggregates(expr: &Expr, out: &mut Vec<(String, AggregateFunc, Option<Expr>)>) {
    match expr {
        Expr::Aggregate { func, arg } => {
            let label = expr_label(expr);
            if !out.iter().any(|(l, _, _)| *l == label) {
                out.push((label, *func, arg.as_deref().cloned()));
            }
        }
        Expr::Literal(_) | Expr::Column(_) => {}
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => collect_aggregates(expr, out),
        Expr::Binary { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::Like { expr, pattern, .. } => {
            collect_aggregates(expr, out);
            collect_aggregates(pattern, out);
        }
        Expr::In { expr, list, .. } => {
            collect_aggregates(expr, out);
            for e in list {
                collect_aggregates(e, out);
            }
        }
        Expr::Function { args, .. } => {
            for e in args {
                collect_aggregates(e, out);
            }
        }
    }
}

// ============================================================================
// Sort
// ============================================================================

/// Materializes the input, computes a sort permutation over the keys, and
/// reorders every column. With `top_k` only the first k rows survive.
pub struct SortOp {
    child: Box<Operator>,
    keys: Vec<SortKey>,
    top_k: Option<u64>,
    batch_size: usize,
    pending: Option<std::vec::IntoIter<Batch>>,
}

impl SortOp {
    fn next(&mut self, cancel: &Cancellation) -> Result<Option<Batch>> {
        if self.pending.is_none() {
            let mut batches = Vec::new();
            while let Some(batch) = self.child.next(cancel)? {
                batches.push(batch);
            }
            let input = Batch::concat(batches);

            // One key vector per sort key, aligned with the input rows.
            let mut key_columns: Vec<Vec<Value>> = Vec::with_capacity(self.keys.len());
            for key in &self.keys {
                let mut values = Vec::with_capacity(input.row_count);
                for row in 0..input.row_count {
                    values.push(eval(&key.expr, &RowContext::Batch(&input, row), None)?);
                }
                key_columns.push(values);
            }

            let mut permutation: Vec<usize> = (0..input.row_count).collect();
            let keys = &self.keys;
            permutation.sort_by(|&a, &b| {
                for (key, values) in keys.iter().zip(key_columns.iter()) {
                    let ord = total_order(&values[a], &values[b]);
                    let ord = match key.order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });

            if let Some(top_k) = self.top_k {
                permutation.truncate(top_k as usize);
            }

            let sorted = input.gather(&permutation);
            self.pending = Some(sorted.chunks(self.batch_size).into_iter());
        }

        Ok(self.pending.as_mut().unwrap().next())
    }
}

// ============================================================================
// Limit
// ============================================================================

/// Skips `offset` rows, then emits at most `limit`
pub struct LimitOp {
    child: Box<Operator>,
    to_skip: u64,
    remaining: u64,
}

impl LimitOp {
    fn next(&mut self, cancel: &Cancellation) -> Result<Option<Batch>> {
        loop {
            if self.remaining == 0 {
                return Ok(None);
            }
            let Some(batch) = self.child.next(cancel)? else {
                return Ok(None);
            };

            let skip = (self.to_skip as usize).min(batch.row_count);
            self.to_skip -= skip as u64;
            let take = ((batch.row_count - skip) as u64).min(self.remaining) as usize;
            if take == 0 {
                if batch.row_count == 0 {
                    // Propagate layout-only batches untouched.
                    return Ok(Some(batch));
                }
                continue;
            }
            self.remaining -= take as u64;
            let selection: Vec<usize> = (skip..skip + take).collect();
            return Ok(Some(batch.gather(&selection)));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
