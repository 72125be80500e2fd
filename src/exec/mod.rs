//! Vectorized execution
//!
//! Columnar batches, the expression evaluator, aggregate accumulators,
//! and the pulled operator pipeline.

pub mod aggregate;
pub mod batch;
pub mod eval;
pub mod operators;

pub use aggregate::AggregateState;
pub use batch::{Batch, BatchColumn, DEFAULT_BATCH_SIZE};
pub use eval::{eval, eval_batch, eval_selection, RowContext};
pub use operators::{build, run, Cancellation, Operator, ScanSource};
