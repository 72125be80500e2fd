//! Core value and type system
//!
//! Defines the tagged `Value` used throughout expression evaluation and row
//! materialization, the on-disk `DataType` set, and the comparison semantics
//! shared by the executor and the indexes: numeric comparison runs in f64
//! when either side is numeric, string comparison is byte-wise, and any
//! comparison involving NULL is NULL.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, ErrorCode, Result};

// ============================================================================
// Numeric Type Aliases
// ============================================================================

/// Row identifier within a table
pub type RowId = u64;

/// Page identifier within a column file
pub type PageId = u64;

/// Column identifier within a table
pub type ColumnId = u32;

// ============================================================================
// Data Types
// ============================================================================

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Int32 = 0,
    Int64 = 1,
    Float32 = 2,
    Float64 = 3,
    Text = 4,
    Bool = 5,
    Date32 = 6,
    Timestamp = 7,
}

impl DataType {
    /// Fixed slot size in bytes inside a page body. Strings carry a u32
    /// length prefix followed by their bytes; the prefix is the fixed part.
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::Int32 | DataType::Float32 | DataType::Date32 => 4,
            DataType::Int64 | DataType::Float64 | DataType::Timestamp => 8,
            DataType::Bool => 1,
            DataType::Text => 4,
        }
    }

    /// True for the integer-backed types (delta/bitpack candidates)
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int32 | DataType::Int64 | DataType::Date32 | DataType::Timestamp
        )
    }

    /// True for any numeric type
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Decode a type tag from its on-disk byte
    pub fn from_u8(tag: u8) -> Result<DataType> {
        match tag {
            0 => Ok(DataType::Int32),
            1 => Ok(DataType::Int64),
            2 => Ok(DataType::Float32),
            3 => Ok(DataType::Float64),
            4 => Ok(DataType::Text),
            5 => Ok(DataType::Bool),
            6 => Ok(DataType::Date32),
            7 => Ok(DataType::Timestamp),
            _ => Err(Error::with_message(
                ErrorCode::InvalidFrame,
                format!("unknown data type tag {}", tag),
            )),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int32 => "INT",
            DataType::Int64 => "BIGINT",
            DataType::Float32 => "FLOAT",
            DataType::Float64 => "DOUBLE",
            DataType::Text => "VARCHAR",
            DataType::Bool => "BOOL",
            DataType::Date32 => "DATE",
            DataType::Timestamp => "TIMESTAMP",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Value
// ============================================================================

/// Dynamic tagged value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// NULL value
    #[default]
    Null,
    /// Integer value (64-bit signed)
    Integer(i64),
    /// Real value (64-bit IEEE 754)
    Real(f64),
    /// Text value (UTF-8 string)
    Text(String),
    /// Boolean value
    Boolean(bool),
}

impl Value {
    /// Check if value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for Integer and Real
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Real(_))
    }

    /// Convert to f64; NULL and non-numeric text become 0.0
    pub fn to_f64(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Integer(i) => *i as f64,
            Value::Real(f) => *f,
            Value::Text(s) => s.parse().unwrap_or(0.0),
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Convert to i64 (truncating)
    pub fn to_i64(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Integer(i) => *i,
            Value::Real(f) => *f as i64,
            Value::Text(s) => s.parse().unwrap_or(0),
            Value::Boolean(b) => *b as i64,
        }
    }

    /// Render as text. NULL renders as the empty string; result rows use
    /// `render()` instead, which distinguishes NULL.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => {
                if *b {
                    "true".to_string()
                } else {
                    "false".to_string()
                }
            }
        }
    }

    /// Render for result output, mapping NULL to the literal "NULL"
    pub fn render(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            other => other.to_text(),
        }
    }

    /// Truthiness under three-valued logic: None for NULL
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Value::Null => None,
            Value::Integer(i) => Some(*i != 0),
            Value::Real(f) => Some(*f != 0.0),
            Value::Text(s) => Some(!s.is_empty()),
            Value::Boolean(b) => Some(*b),
        }
    }

    /// Heap footprint estimate used by the result cache
    pub fn byte_size(&self) -> usize {
        match self {
            Value::Null => 1,
            Value::Integer(_) | Value::Real(_) => 8,
            Value::Text(s) => s.len() + 4,
            Value::Boolean(_) => 1,
        }
    }

    /// The natural storage type of this value, None for NULL
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(DataType::Int64),
            Value::Real(_) => Some(DataType::Float64),
            Value::Text(_) => Some(DataType::Text),
            Value::Boolean(_) => Some(DataType::Bool),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// Compare two values under SQL semantics.
///
/// Returns None when either side is NULL. Numeric comparison is performed
/// in f64 when either side is numeric; strings compare byte-wise; booleans
/// compare as false < true.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match (a, b) {
        (Value::Text(x), Value::Text(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        _ => {
            let x = a.to_f64();
            let y = b.to_f64();
            x.partial_cmp(&y)
        }
    }
}

/// Total order over values for sorting: NULL sorts first, then numerics,
/// text, booleans. Used by ORDER BY and the B-tree key order.
pub fn total_order(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    compare_values(a, b).unwrap_or_else(|| a.render().cmp(&b.render()))
}

// ============================================================================
// Three-Valued Logic
// ============================================================================

/// Three-valued AND: null ∧ false = false, null ∧ true = null
pub fn logic_and(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

/// Three-valued OR: null ∨ true = true, null ∨ false = null
pub fn logic_or(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

/// Three-valued NOT: ¬null = null
pub fn logic_not(a: Option<bool>) -> Option<bool> {
    a.map(|v| !v)
}

// ============================================================================
// Tests
// ============================================================================
