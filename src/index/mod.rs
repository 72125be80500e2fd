//! Secondary indexes
//!
//! Ordered (B-tree), hash (single- and multi-column), and bitmap indexes,
//! plus the registry that owns them and the cost-based advisor. The
//! registry lives on the database handle; index build and lookup paths
//! receive it as a context parameter rather than reaching for globals.

pub mod advisor;
pub mod bitmap;
pub mod btree;
pub mod hash;

pub use advisor::{CostEstimate, IndexAdvisor, IndexStats, Recommendation, Strategy};
pub use bitmap::BitmapIndex;
pub use btree::BTreeIndex;
pub use hash::{encode_composite_key, HashIndex};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::error::{Error, ErrorCode, Result};
use crate::types::{total_order, RowId, Value};

// ============================================================================
// Index Keys
// ============================================================================

/// A column value usable as an index key: totally ordered and hashable,
/// with numeric equality across Integer and Real.
#[derive(Debug, Clone)]
pub struct IndexKey(pub Value);

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        total_order(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        total_order(&self.0, &other.0)
    }
}

impl Hash for IndexKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Integer(3) and Real(3.0) compare equal, so numerics hash
        // through their f64 bits.
        match &self.0 {
            Value::Null => 0u8.hash(state),
            Value::Integer(i) => {
                1u8.hash(state);
                (*i as f64).to_bits().hash(state);
            }
            Value::Real(f) => {
                1u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::Text(s) => {
                2u8.hash(state);
                s.hash(state);
            }
            Value::Boolean(b) => {
                3u8.hash(state);
                b.hash(state);
            }
        }
    }
}

// ============================================================================
// Index Kinds and Metadata
// ============================================================================

/// Index structure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    BTree,
    Hash,
    Bitmap,
}

impl IndexKind {
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::BTree => "btree",
            IndexKind::Hash => "hash",
            IndexKind::Bitmap => "bitmap",
        }
    }
}

/// Registry record for one index
#[derive(Debug, Clone)]
pub struct IndexMetadata {
    pub index_name: String,
    pub table_name: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
    pub cardinality: u64,
}

impl IndexMetadata {
    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }
}

/// Concrete index structure behind a registry entry
#[derive(Debug)]
pub enum IndexInstance {
    BTree(BTreeIndex<IndexKey>),
    Hash(HashIndex<IndexKey>),
    CompositeHash(HashIndex<String>),
    Bitmap(BitmapIndex<IndexKey>),
}

impl IndexInstance {
    /// Row ids under an equality key (single-column kinds)
    pub fn search(&self, key: &Value) -> Vec<RowId> {
        match self {
            IndexInstance::BTree(tree) => tree.search(&IndexKey(key.clone())),
            IndexInstance::Hash(hash) => hash.search(&IndexKey(key.clone())),
            IndexInstance::Bitmap(bitmap) => bitmap.search(&IndexKey(key.clone())),
            IndexInstance::CompositeHash(_) => Vec::new(),
        }
    }

    /// Row ids under a composite equality key
    pub fn search_composite(&self, values: &[Value]) -> Vec<RowId> {
        match self {
            IndexInstance::CompositeHash(hash) => hash.search(&encode_composite_key(values)),
            _ => Vec::new(),
        }
    }

    /// Row ids for keys in `[lo, hi]` (ordered kinds only)
    pub fn search_range(&self, lo: &Value, hi: &Value) -> Vec<RowId> {
        match self {
            IndexInstance::BTree(tree) => {
                tree.range(&IndexKey(lo.clone()), &IndexKey(hi.clone()))
            }
            _ => Vec::new(),
        }
    }

    /// Row ids for keys strictly below `key` (ordered kinds only)
    pub fn search_less(&self, key: &Value) -> Vec<RowId> {
        match self {
            IndexInstance::BTree(tree) => tree.less_than(&IndexKey(key.clone())),
            _ => Vec::new(),
        }
    }

    /// Row ids for keys strictly above `key` (ordered kinds only)
    pub fn search_greater(&self, key: &Value) -> Vec<RowId> {
        match self {
            IndexInstance::BTree(tree) => tree.greater_than(&IndexKey(key.clone())),
            _ => Vec::new(),
        }
    }

    /// True when the kind answers range predicates directly
    pub fn supports_range(&self) -> bool {
        matches!(self, IndexInstance::BTree(_))
    }

    /// Distinct-key count currently held
    pub fn cardinality(&self) -> u64 {
        match self {
            IndexInstance::BTree(tree) => tree.distinct_keys() as u64,
            IndexInstance::Hash(hash) => hash.len() as u64,
            IndexInstance::CompositeHash(hash) => hash.len() as u64,
            IndexInstance::Bitmap(bitmap) => bitmap.cardinality() as u64,
        }
    }

    fn insert(&mut self, keys: &[Value], row: RowId) -> Result<()> {
        match self {
            IndexInstance::BTree(tree) => {
                tree.insert(IndexKey(keys[0].clone()), row);
                Ok(())
            }
            IndexInstance::Hash(hash) => hash.insert(IndexKey(keys[0].clone()), row),
            IndexInstance::CompositeHash(hash) => hash.insert(encode_composite_key(keys), row),
            IndexInstance::Bitmap(bitmap) => {
                bitmap.insert(IndexKey(keys[0].clone()), row);
                Ok(())
            }
        }
    }

    fn remove_row(&mut self, row: RowId) {
        match self {
            IndexInstance::BTree(tree) => {
                tree.remove_row(row);
            }
            IndexInstance::Hash(hash) => {
                hash.remove_row(row);
            }
            IndexInstance::CompositeHash(hash) => {
                hash.remove_row(row);
            }
            IndexInstance::Bitmap(bitmap) => {
                bitmap.remove_row(row);
            }
        }
    }

    fn clear(&mut self) {
        match self {
            IndexInstance::BTree(tree) => tree.clear(),
            IndexInstance::Hash(hash) => hash.clear(),
            IndexInstance::CompositeHash(hash) => hash.clear(),
            IndexInstance::Bitmap(bitmap) => bitmap.clear(),
        }
    }
}

// ============================================================================
// Index Manager
// ============================================================================

/// Cardinality below which a bitmap index is recommended
const BITMAP_CARDINALITY_LIMIT: u64 = 100;
/// Cardinality above which equality lookups favor a hash index
const HASH_CARDINALITY_FLOOR: u64 = 10_000;

struct RegisteredIndex {
    metadata: IndexMetadata,
    instance: IndexInstance,
}

/// Registry of all indexes owned by one database handle
#[derive(Default)]
pub struct IndexManager {
    indexes: HashMap<String, RegisteredIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        IndexManager::default()
    }

    /// Create an index of the given kind; multi-column requests build a
    /// composite hash regardless of kind.
    pub fn create_index(
        &mut self,
        index_name: &str,
        table_name: &str,
        columns: Vec<String>,
        kind: IndexKind,
    ) -> Result<()> {
        if self.indexes.contains_key(index_name) {
            return Err(Error::with_message(
                ErrorCode::Conflict,
                format!("index already exists: {}", index_name),
            ));
        }
        if columns.is_empty() {
            return Err(Error::with_message(
                ErrorCode::Type,
                "index needs at least one column",
            ));
        }

        let instance = if columns.len() > 1 {
            IndexInstance::CompositeHash(HashIndex::new())
        } else {
            match kind {
                IndexKind::BTree => IndexInstance::BTree(BTreeIndex::new()),
                IndexKind::Hash => IndexInstance::Hash(HashIndex::new()),
                IndexKind::Bitmap => IndexInstance::Bitmap(BitmapIndex::new()),
            }
        };

        self.indexes.insert(
            index_name.to_string(),
            RegisteredIndex {
                metadata: IndexMetadata {
                    index_name: index_name.to_string(),
                    table_name: table_name.to_string(),
                    columns,
                    kind,
                    cardinality: 0,
                },
                instance,
            },
        );
        Ok(())
    }

    /// Drop an index atomically
    pub fn drop_index(&mut self, index_name: &str) -> Result<()> {
        self.indexes
            .remove(index_name)
            .map(|_| ())
            .ok_or_else(|| {
                Error::with_message(ErrorCode::Name, format!("index not found: {}", index_name))
            })
    }

    pub fn exists(&self, index_name: &str) -> bool {
        self.indexes.contains_key(index_name)
    }

    pub fn metadata(&self, index_name: &str) -> Result<&IndexMetadata> {
        self.indexes
            .get(index_name)
            .map(|e| &e.metadata)
            .ok_or_else(|| {
                Error::with_message(ErrorCode::Name, format!("index not found: {}", index_name))
            })
    }

    pub fn instance(&self, index_name: &str) -> Option<&IndexInstance> {
        self.indexes.get(index_name).map(|e| &e.instance)
    }

    /// Names of all indexes on a table
    pub fn indexes_on(&self, table_name: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .indexes
            .values()
            .filter(|e| e.metadata.table_name == table_name)
            .map(|e| e.metadata.index_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names of all single-column indexes on a column
    pub fn indexes_on_column(&self, table_name: &str, column: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .indexes
            .values()
            .filter(|e| {
                e.metadata.table_name == table_name
                    && e.metadata.columns.len() == 1
                    && e.metadata.columns[0] == column
            })
            .map(|e| e.metadata.index_name.clone())
            .collect();
        names.sort();
        names
    }

    /// Advisor-facing statistics for every index on a table
    pub fn stats_for(&self, table_name: &str) -> Vec<IndexStats> {
        self.indexes
            .values()
            .filter(|e| e.metadata.table_name == table_name)
            .map(|e| IndexStats {
                index_name: e.metadata.index_name.clone(),
                column_name: e.metadata.columns[0].clone(),
                cardinality: e.metadata.cardinality.max(e.instance.cardinality()),
                is_composite: e.metadata.is_composite(),
            })
            .collect()
    }

    pub fn update_statistics(&mut self, index_name: &str, cardinality: u64) -> Result<()> {
        let entry = self.indexes.get_mut(index_name).ok_or_else(|| {
            Error::with_message(ErrorCode::Name, format!("index not found: {}", index_name))
        })?;
        entry.metadata.cardinality = cardinality;
        Ok(())
    }

    /// Update every index on a table for one inserted row
    pub fn on_insert(
        &mut self,
        table_name: &str,
        row: RowId,
        column_value: &dyn Fn(&str) -> Option<Value>,
    ) -> Result<()> {
        for entry in self.indexes.values_mut() {
            if entry.metadata.table_name != table_name {
                continue;
            }
            let keys: Vec<Value> = entry
                .metadata
                .columns
                .iter()
                .map(|c| column_value(c).unwrap_or(Value::Null))
                .collect();
            entry.instance.insert(&keys, row)?;
            entry.metadata.cardinality = entry.instance.cardinality();
        }
        Ok(())
    }

    /// Remove one row id from every index on a table
    pub fn on_delete(&mut self, table_name: &str, row: RowId) {
        for entry in self.indexes.values_mut() {
            if entry.metadata.table_name == table_name {
                entry.instance.remove_row(row);
            }
        }
    }

    /// Rebuild every index on a table from a full row iterator
    pub fn rebuild(
        &mut self,
        table_name: &str,
        rows: &mut dyn Iterator<Item = (RowId, HashMap<String, Value>)>,
    ) -> Result<()> {
        let mut names = Vec::new();
        for entry in self.indexes.values_mut() {
            if entry.metadata.table_name == table_name {
                entry.instance.clear();
                names.push(entry.metadata.index_name.clone());
            }
        }
        if names.is_empty() {
            return Ok(());
        }
        for (row, values) in rows {
            self.on_insert(table_name, row, &|col| values.get(col).cloned())?;
        }
        Ok(())
    }

    /// Drop every index on a table (table drop path)
    pub fn drop_table_indexes(&mut self, table_name: &str) {
        self.indexes
            .retain(|_, e| e.metadata.table_name != table_name);
    }

    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    pub fn all_indexes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Heuristic kind recommendation for a new index
    pub fn recommend_kind(cardinality: u64, is_range_query: bool) -> IndexKind {
        if cardinality < BITMAP_CARDINALITY_LIMIT {
            return IndexKind::Bitmap;
        }
        if is_range_query {
            return IndexKind::BTree;
        }
        if cardinality > HASH_CARDINALITY_FLOOR {
            return IndexKind::Hash;
        }
        IndexKind::BTree
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_btree() -> IndexManager {
        let mut mgr = IndexManager::new();
        mgr.create_index("age_idx", "people", vec!["age".to_string()], IndexKind::BTree)
            .unwrap();
        mgr
    }

    #[test]
    fn test_duplicate_index_conflicts() {
        let mut mgr = manager_with_btree();
        let err = mgr
            .create_index("age_idx", "people", vec!["age".to_string()], IndexKind::Hash)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[test]
    fn test_drop_unknown_index() {
        let mut mgr = IndexManager::new();
        let err = mgr.drop_index("nope").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Name);
    }

    #[test]
    fn test_registry_lookups() {
        let mut mgr = manager_with_btree();
        mgr.create_index("name_idx", "people", vec!["name".to_string()], IndexKind::Hash)
            .unwrap();
        mgr.create_index("other_idx", "orders", vec!["id".to_string()], IndexKind::BTree)
            .unwrap();

        assert_eq!(mgr.indexes_on("people"), vec!["age_idx", "name_idx"]);
        assert_eq!(mgr.indexes_on_column("people", "age"), vec!["age_idx"]);
        assert_eq!(mgr.index_count(), 3);
        assert_eq!(mgr.metadata("other_idx").unwrap().table_name, "orders");
    }

    #[test]
    fn test_insert_and_search_through_manager() {
        let mut mgr = manager_with_btree();
        for (row, age) in [30i64, 25, 30, 40].iter().enumerate() {
            mgr.on_insert("people", row as RowId, &|col| {
                (col == "age").then(|| Value::Integer(*age))
            })
            .unwrap();
        }
        let instance = mgr.instance("age_idx").unwrap();
        let mut rows = instance.search(&Value::Integer(30));
        rows.sort_unstable();
        assert_eq!(rows, vec![0, 2]);
    }

    #[test]
    fn test_composite_index_from_multiple_columns() {
        let mut mgr = IndexManager::new();
        mgr.create_index(
            "combo_idx",
            "t",
            vec!["a".to_string(), "b".to_string()],
            IndexKind::Hash,
        )
        .unwrap();
        mgr.on_insert("t", 9, &|col| match col {
            "a" => Some(Value::Integer(1)),
            "b" => Some(Value::Text("x".into())),
            _ => None,
        })
        .unwrap();

        let instance = mgr.instance("combo_idx").unwrap();
        let rows = instance.search_composite(&[Value::Integer(1), Value::Text("x".into())]);
        assert_eq!(rows, vec![9]);
        assert!(instance
            .search_composite(&[Value::Integer(1), Value::Text("y".into())])
            .is_empty());
    }

    #[test]
    fn test_delete_removes_from_indexes() {
        let mut mgr = manager_with_btree();
        mgr.on_insert("people", 5, &|_| Some(Value::Integer(30))).unwrap();
        mgr.on_delete("people", 5);
        assert!(mgr
            .instance("age_idx")
            .unwrap()
            .search(&Value::Integer(30))
            .is_empty());
    }

    #[test]
    fn test_recommendation_heuristics() {
        assert_eq!(IndexManager::recommend_kind(50, false), IndexKind::Bitmap);
        assert_eq!(IndexManager::recommend_kind(5000, true), IndexKind::BTree);
        assert_eq!(IndexManager::recommend_kind(50_000, false), IndexKind::Hash);
        assert_eq!(IndexManager::recommend_kind(5000, false), IndexKind::BTree);
    }

    #[test]
    fn test_index_key_numeric_equality() {
        use std::collections::hash_map::DefaultHasher;
        let a = IndexKey(Value::Integer(3));
        let b = IndexKey(Value::Real(3.0));
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }
}
