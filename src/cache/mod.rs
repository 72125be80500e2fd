//! Caches
//!
//! The query result cache; the page buffer cache lives in
//! `crate::storage::buffer`.

pub mod result;

pub use result::{fingerprint, normalize_query, ResultCache, ResultCacheStats};
