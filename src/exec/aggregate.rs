//! Aggregate accumulators
//!
//! COUNT, SUM, AVG, MIN, and MAX fold values across a group. COUNT(*)
//! counts rows; every other aggregate skips NULL inputs. SUM over
//! integers narrows back to an integer at finalize; AVG divides at
//! finalize and is NULL over an empty group.

use crate::parser::ast::AggregateFunc;
use crate::types::{compare_values, Value};

// ============================================================================
// Aggregate State
// ============================================================================

/// State maintained while folding one aggregate over a group
#[derive(Debug, Clone)]
pub enum AggregateState {
    /// COUNT(*) or COUNT(x)
    Count { count: i64, count_star: bool },

    /// SUM(x)
    Sum {
        sum: f64,
        has_value: bool,
        is_integer: bool,
    },

    /// AVG(x)
    Avg { sum: f64, count: i64 },

    /// MIN(x)
    Min { value: Option<Value> },

    /// MAX(x)
    Max { value: Option<Value> },
}

impl AggregateState {
    /// Create the initial state for a function; `count_star` marks
    /// COUNT(*) which counts rows rather than non-null values.
    pub fn new(func: AggregateFunc, count_star: bool) -> Self {
        match func {
            AggregateFunc::Count => AggregateState::Count {
                count: 0,
                count_star,
            },
            AggregateFunc::Sum => AggregateState::Sum {
                sum: 0.0,
                has_value: false,
                is_integer: true,
            },
            AggregateFunc::Avg => AggregateState::Avg { sum: 0.0, count: 0 },
            AggregateFunc::Min => AggregateState::Min { value: None },
            AggregateFunc::Max => AggregateState::Max { value: None },
        }
    }

    /// Fold one input value into the state
    pub fn step(&mut self, value: &Value) {
        match self {
            AggregateState::Count { count, count_star } => {
                if *count_star || !value.is_null() {
                    *count += 1;
                }
            }

            AggregateState::Sum {
                sum,
                has_value,
                is_integer,
            } => {
                if value.is_null() {
                    return;
                }
                *has_value = true;
                match value {
                    Value::Integer(n) => *sum += *n as f64,
                    other => {
                        *sum += other.to_f64();
                        *is_integer = false;
                    }
                }
            }

            AggregateState::Avg { sum, count } => {
                if value.is_null() {
                    return;
                }
                *sum += value.to_f64();
                *count += 1;
            }

            AggregateState::Min { value: current } => {
                if value.is_null() {
                    return;
                }
                let replace = match current {
                    None => true,
                    Some(cur) => {
                        compare_values(value, cur) == Some(std::cmp::Ordering::Less)
                    }
                };
                if replace {
                    *current = Some(value.clone());
                }
            }

            AggregateState::Max { value: current } => {
                if value.is_null() {
                    return;
                }
                let replace = match current {
                    None => true,
                    Some(cur) => {
                        compare_values(value, cur) == Some(std::cmp::Ordering::Greater)
                    }
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
        }
    }

    /// Produce the final aggregate value
    pub fn finalize(&self) -> Value {
        match self {
            AggregateState::Count { count, .. } => Value::Integer(*count),

            AggregateState::Sum {
                sum,
                has_value,
                is_integer,
            } => {
                if !*has_value {
                    Value::Null
                } else if *is_integer && sum.abs() <= i64::MAX as f64 {
                    Value::Integer(*sum as i64)
                } else {
                    Value::Real(*sum)
                }
            }

            AggregateState::Avg { sum, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Real(*sum / *count as f64)
                }
            }

            AggregateState::Min { value } => value.clone().unwrap_or(Value::Null),

            AggregateState::Max { value } => value.clone().unwrap_or(Value::Null),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
