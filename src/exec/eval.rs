//! Expression evaluation
//!
//! Scalar evaluation of an expression tree against one row, and the
//! vectorized wrapper that produces a value (or selection bit) per batch
//! row. NULL follows three-valued logic throughout; arithmetic runs in
//! f64 and narrows back to integers when both operands are integral.

use std::collections::HashMap;

use crate::error::{Error, ErrorCode, Result};
use crate::exec::batch::Batch;
use crate::parser::ast::{BinaryOp, Expr, UnaryOp};
use crate::plan::expr_label;
use crate::types::{compare_values, logic_and, logic_not, logic_or, Value};

// ============================================================================
// Row Context
// ============================================================================

/// Where column references resolve during evaluation
pub enum RowContext<'a> {
    /// A batch position
    Batch(&'a Batch, usize),
    /// A name -> value map (row-at-a-time outer API, aggregate groups)
    Map(&'a HashMap<String, Value>),
}

impl<'a> RowContext<'a> {
    fn lookup(&self, table: Option<&str>, name: &str) -> Option<Value> {
        match self {
            RowContext::Batch(batch, row) => batch
                .value_at(table, name, *row)
                // Computed columns drop their qualifier; fall back to the
                // bare name so ORDER BY can see projection output.
                .or_else(|| batch.value_at(None, name, *row))
                .cloned(),
            RowContext::Map(map) => {
                if let Some(table) = table {
                    if let Some(v) = map.get(&format!("{}.{}", table, name)) {
                        return Some(v.clone());
                    }
                }
                map.get(name).cloned()
            }
        }
    }
}

// ============================================================================
// Scalar Evaluation
// ============================================================================

/// Evaluate an expression against one row.
///
/// `aggregates` supplies finalized aggregate values by label for
/// expressions evaluated above an aggregation (HAVING, aggregate output).
pub fn eval(
    expr: &Expr,
    row: &RowContext,
    aggregates: Option<&HashMap<String, Value>>,
) -> Result<Value> {
    match expr {
        Expr::Literal(lit) => Ok(literal_value(lit)),

        Expr::Column(col) => row
            .lookup(col.table.as_deref(), &col.column)
            .ok_or_else(|| {
                Error::with_message(ErrorCode::Name, format!("no such column: {}", col))
            }),

        Expr::Unary { op, expr } => {
            let value = eval(expr, row, aggregates)?;
            match op {
                UnaryOp::Not => Ok(bool_value(logic_not(value.to_bool()))),
                UnaryOp::Neg => match value {
                    Value::Null => Ok(Value::Null),
                    Value::Integer(i) => Ok(Value::Integer(-i)),
                    Value::Real(f) => Ok(Value::Real(-f)),
                    other => Err(Error::with_message(
                        ErrorCode::Type,
                        format!("cannot negate {}", other),
                    )),
                },
            }
        }

        Expr::Binary { op, left, right } => {
            // AND/OR evaluate both sides for three-valued combination.
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                let l = eval(left, row, aggregates)?.to_bool();
                let r = eval(right, row, aggregates)?.to_bool();
                let combined = match op {
                    BinaryOp::And => logic_and(l, r),
                    _ => logic_or(l, r),
                };
                return Ok(bool_value(combined));
            }

            let l = eval(left, row, aggregates)?;
            let r = eval(right, row, aggregates)?;
            eval_binary(*op, &l, &r)
        }

        Expr::Like {
            expr,
            pattern,
            negated,
        } => {
            let value = eval(expr, row, aggregates)?;
            let pattern = eval(pattern, row, aggregates)?;
            if value.is_null() || pattern.is_null() {
                return Ok(Value::Null);
            }
            let matched = like_match(&value.to_text(), &pattern.to_text());
            Ok(Value::Boolean(matched != *negated))
        }

        Expr::In {
            expr,
            list,
            negated,
        } => {
            let value = eval(expr, row, aggregates)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for candidate in list {
                let candidate = eval(candidate, row, aggregates)?;
                if candidate.is_null() {
                    saw_null = true;
                    continue;
                }
                if compare_values(&value, &candidate) == Some(std::cmp::Ordering::Equal) {
                    return Ok(Value::Boolean(!negated));
                }
            }
            if saw_null {
                return Ok(Value::Null);
            }
            Ok(Value::Boolean(*negated))
        }

        Expr::IsNull { expr, negated } => {
            let value = eval(expr, row, aggregates)?;
            Ok(Value::Boolean(value.is_null() != *negated))
        }

        Expr::Function { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, row, aggregates)?);
            }
            eval_function(name, &values)
        }

        Expr::Aggregate { .. } => {
            let label = expr_label(expr);
            if let Some(aggregates) = aggregates {
                if let Some(value) = aggregates.get(&label) {
                    return Ok(value.clone());
                }
            }
            Err(Error::with_message(
                ErrorCode::Type,
                format!("aggregate {} outside an aggregation context", label),
            ))
        }
    }
}

fn literal_value(lit: &crate::parser::ast::Literal) -> Value {
    use crate::parser::ast::Literal;
    match lit {
        Literal::Null => Value::Null,
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Float(f) => Value::Real(*f),
        Literal::String(s) => Value::Text(s.clone()),
        Literal::Bool(b) => Value::Boolean(*b),
    }
}

fn bool_value(b: Option<bool>) -> Value {
    match b {
        Some(b) => Value::Boolean(b),
        None => Value::Null,
    }
}

// ============================================================================
// Binary Operators
// ============================================================================

fn eval_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    if op.is_comparison() {
        let result = compare_values(left, right).map(|ord| match op {
            BinaryOp::Eq => ord == std::cmp::Ordering::Equal,
            BinaryOp::Ne => ord != std::cmp::Ordering::Equal,
            BinaryOp::Lt => ord == std::cmp::Ordering::Less,
            BinaryOp::Le => ord != std::cmp::Ordering::Greater,
            BinaryOp::Gt => ord == std::cmp::Ordering::Greater,
            BinaryOp::Ge => ord != std::cmp::Ordering::Less,
            _ => unreachable!(),
        });
        return Ok(bool_value(result));
    }

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        BinaryOp::Add => {
            // Text concatenation when either side is a string.
            if matches!(left, Value::Text(_)) || matches!(right, Value::Text(_)) {
                return Ok(Value::Text(format!("{}{}", left.to_text(), right.to_text())));
            }
            Ok(numeric_result(left, right, left.to_f64() + right.to_f64()))
        }
        BinaryOp::Sub => Ok(numeric_result(left, right, left.to_f64() - right.to_f64())),
        BinaryOp::Mul => Ok(numeric_result(left, right, left.to_f64() * right.to_f64())),
        BinaryOp::Div => {
            let divisor = right.to_f64();
            if divisor == 0.0 {
                return Err(Error::with_message(ErrorCode::Arithmetic, "division by zero"));
            }
            Ok(Value::Real(left.to_f64() / divisor))
        }
        BinaryOp::Mod => {
            let divisor = right.to_i64();
            if divisor == 0 {
                return Err(Error::with_message(ErrorCode::Arithmetic, "modulo by zero"));
            }
            Ok(Value::Integer(left.to_i64() % divisor))
        }
        _ => Err(Error::with_message(
            ErrorCode::Internal,
            format!("unexpected operator {}", op.symbol()),
        )),
    }
}

/// Arithmetic runs in f64; both-integer operands narrow back to i64
fn numeric_result(left: &Value, right: &Value, result: f64) -> Value {
    if matches!(left, Value::Integer(_)) && matches!(right, Value::Integer(_)) {
        Value::Integer(result as i64)
    } else {
        Value::Real(result)
    }
}

// ============================================================================
// LIKE
// ============================================================================

/// LIKE matching: `%` spans any length, `_` one character. A pattern
/// without wildcards degenerates to a substring match.
pub fn like_match(value: &str, pattern: &str) -> bool {
    if !pattern.contains('%') && !pattern.contains('_') {
        return value.contains(pattern);
    }
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_rec(&value, &pattern)
}

fn like_rec(value: &[char], pattern: &[char]) -> bool {
    match pattern.first() {
        None => value.is_empty(),
        Some('%') => {
            // Greedily try every split point.
            for skip in 0..=value.len() {
                if like_rec(&value[skip..], &pattern[1..]) {
                    return true;
                }
            }
            false
        }
        Some('_') => !value.is_empty() && like_rec(&value[1..], &pattern[1..]),
        Some(&c) => value.first() == Some(&c) && like_rec(&value[1..], &pattern[1..]),
    }
}

// ============================================================================
// Built-in Functions
// ============================================================================

fn eval_function(name: &str, args: &[Value]) -> Result<Value> {
    let arity = |expected: std::ops::RangeInclusive<usize>| -> Result<()> {
        if expected.contains(&args.len()) {
            Ok(())
        } else {
            Err(Error::with_message(
                ErrorCode::Type,
                format!("wrong argument count for {}", name.to_uppercase()),
            ))
        }
    };

    match name.to_uppercase().as_str() {
        "UPPER" => {
            arity(1..=1)?;
            null_or(&args[0], |v| Value::Text(v.to_text().to_uppercase()))
        }
        "LOWER" => {
            arity(1..=1)?;
            null_or(&args[0], |v| Value::Text(v.to_text().to_lowercase()))
        }
        "LENGTH" => {
            arity(1..=1)?;
            null_or(&args[0], |v| {
                Value::Integer(v.to_text().chars().count() as i64)
            })
        }
        "SUBSTR" | "SUBSTRING" => {
            arity(2..=3)?;
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            let s: Vec<char> = args[0].to_text().chars().collect();
            // 1-indexed start position.
            let start = (args[1].to_i64().max(1) as usize).saturating_sub(1);
            let len = args
                .get(2)
                .map(|v| v.to_i64().max(0) as usize)
                .unwrap_or(usize::MAX);
            let out: String = s.iter().skip(start).take(len).collect();
            Ok(Value::Text(out))
        }
        "ROUND" => {
            arity(1..=2)?;
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            let digits = args.get(1).map(|v| v.to_i64()).unwrap_or(0);
            let factor = 10f64.powi(digits as i32);
            Ok(Value::Real((args[0].to_f64() * factor).round() / factor))
        }
        "ABS" => {
            arity(1..=1)?;
            match &args[0] {
                Value::Null => Ok(Value::Null),
                Value::Integer(i) => Ok(Value::Integer(i.abs())),
                other => Ok(Value::Real(other.to_f64().abs())),
            }
        }
        "COALESCE" => {
            arity(1..=usize::MAX)?;
            for arg in args {
                if !arg.is_null() {
                    return Ok(arg.clone());
                }
            }
            Ok(Value::Null)
        }
        other => Err(Error::with_message(
            ErrorCode::Name,
            format!("unknown function: {}", other),
        )),
    }
}

fn null_or(value: &Value, f: impl Fn(&Value) -> Value) -> Result<Value> {
    if value.is_null() {
        Ok(Value::Null)
    } else {
        Ok(f(value))
    }
}

// ============================================================================
// Vectorized Wrappers
// ============================================================================

/// Evaluate an expression for every batch row
pub fn eval_batch(expr: &Expr, batch: &Batch) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(batch.row_count);
    for row in 0..batch.row_count {
        out.push(eval(expr, &RowContext::Batch(batch, row), None)?);
    }
    Ok(out)
}

/// Evaluate a predicate into the selected row positions
pub fn eval_selection(predicate: &Expr, batch: &Batch) -> Result<Vec<usize>> {
    let mut selected = Vec::new();
    for row in 0..batch.row_count {
        let value = eval(predicate, &RowContext::Batch(batch, row), None)?;
        if value.to_bool() == Some(true) {
            selected.push(row);
        }
    }
    Ok(selected)
}

// ============================================================================
// Tests
// ============================================================================
