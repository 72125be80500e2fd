//! LyraDB - embeddable analytical database engine
//!
//! Columnar storage with adaptive page codecs, a SQL front end with a
//! vectorized executor, secondary indexes with a cost-based advisor, and
//! two caches: a 2Q page buffer and a TTL+LRU query result cache.
//!
//! A `Database` handle is single-threaded; callers serialize access
//! externally. Durability is promised on clean finalize only.

pub mod cache;
pub mod codec;
pub mod db;
pub mod error;
pub mod exec;
pub mod index;
pub mod parser;
pub mod plan;
pub mod schema;
pub mod storage;
pub mod types;
pub mod util;

// Re-export the main public types
pub use db::{Database, QueryResult};
pub use error::{Error, ErrorCode, Result};
pub use schema::{ColumnDef, Schema};
pub use types::{DataType, Value};

pub use exec::Cancellation;
pub use index::IndexKind;
