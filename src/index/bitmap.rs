//! Bitmap index
//!
//! One growable bitset per distinct key, indexed by row id. Equality
//! lookups, unions, intersections, and negation reduce to bitwise
//! operations over the key bitmaps. Intended for columns with fewer than
//! about a thousand distinct values.

use std::collections::BTreeMap;

use crate::types::RowId;
use crate::util::BitVec;

/// Cardinality ceiling above which a bitmap index stops being a good idea
pub const RECOMMENDED_MAX_CARDINALITY: usize = 1000;

/// Bitmap index mapping keys to row-id bitsets
#[derive(Debug, Clone, Default)]
pub struct BitmapIndex<K> {
    bitmaps: BTreeMap<K, BitVec>,
    max_rows: usize,
}

impl<K: Ord + Clone> BitmapIndex<K> {
    pub fn new() -> Self {
        BitmapIndex {
            bitmaps: BTreeMap::new(),
            max_rows: 0,
        }
    }

    /// Mark `row` under `key`; bitmaps grow on demand
    pub fn insert(&mut self, key: K, row: RowId) {
        let row = row as usize;
        self.max_rows = self.max_rows.max(row + 1);
        self.bitmaps.entry(key).or_default().set(row, true);
    }

    /// Row ids marked under a key
    pub fn search(&self, key: &K) -> Vec<RowId> {
        match self.bitmaps.get(key) {
            Some(bitmap) => bitmap.ones().into_iter().map(|i| i as RowId).collect(),
            None => Vec::new(),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.bitmaps.contains_key(key)
    }

    /// Union: rows matching any of the given keys
    pub fn any_of(&self, keys: &[K]) -> Vec<RowId> {
        let mut result = BitVec::new(self.max_rows);
        for key in keys {
            if let Some(bitmap) = self.bitmaps.get(key) {
                for idx in bitmap.ones() {
                    result.set(idx, true);
                }
            }
        }
        result.ones().into_iter().map(|i| i as RowId).collect()
    }

    /// Intersection: rows matching all of the given keys. An absent key
    /// short-circuits to the empty set.
    pub fn all_of(&self, keys: &[K]) -> Vec<RowId> {
        if keys.is_empty() {
            return Vec::new();
        }
        let mut result: Option<BitVec> = None;
        for key in keys {
            let Some(bitmap) = self.bitmaps.get(key) else {
                return Vec::new();
            };
            result = Some(match result {
                None => bitmap.clone(),
                Some(acc) => {
                    let mut next = BitVec::new(self.max_rows);
                    for idx in bitmap.ones() {
                        if acc.get(idx) {
                            next.set(idx, true);
                        }
                    }
                    next
                }
            });
        }
        result
            .map(|b| b.ones().into_iter().map(|i| i as RowId).collect())
            .unwrap_or_default()
    }

    /// Negation: all known rows not marked under the key
    pub fn not(&self, key: &K) -> Vec<RowId> {
        let excluded = self.bitmaps.get(key);
        (0..self.max_rows)
            .filter(|&row| excluded.map(|b| !b.get(row)).unwrap_or(true))
            .map(|row| row as RowId)
            .collect()
    }

    /// All distinct keys in sorted order
    pub fn distinct_keys(&self) -> Vec<K> {
        self.bitmaps.keys().cloned().collect()
    }

    /// Drop a key entirely; returns the number of rows that were marked
    pub fn remove_key(&mut self, key: &K) -> usize {
        self.bitmaps
            .remove(key)
            .map(|b| b.count_ones())
            .unwrap_or(0)
    }

    /// Clear a row id under every key; returns clears performed
    pub fn remove_row(&mut self, row: RowId) -> usize {
        let row = row as usize;
        let mut removed = 0;
        for bitmap in self.bitmaps.values_mut() {
            if bitmap.get(row) {
                bitmap.set(row, false);
                removed += 1;
            }
        }
        removed
    }

    /// Number of distinct keys
    pub fn cardinality(&self) -> usize {
        self.bitmaps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmaps.is_empty()
    }

    pub fn clear(&mut self) {
        self.bitmaps.clear();
        self.max_rows = 0;
    }

    /// Approximate resident size of the key bitmaps
    pub fn memory_usage(&self) -> usize {
        self.bitmaps.values().map(|b| b.as_bytes().len()).sum()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn build() -> BitmapIndex<String> {
        let mut index = BitmapIndex::new();
        for (row, color) in ["red", "blue", "red", "green", "blue", "red"]
            .iter()
            .enumerate()
        {
            index.insert(color.to_string(), row as RowId);
        }
        index
    }

    #[test]
    fn test_search() {
        let index = build();
        assert_eq!(index.search(&"red".to_string()), vec![0, 2, 5]);
        assert_eq!(index.search(&"green".to_string()), vec![3]);
        assert!(index.search(&"purple".to_string()).is_empty());
        assert_eq!(index.cardinality(), 3);
    }

    #[test]
    fn test_union() {
        let index = build();
        let rows = index.any_of(&["red".to_string(), "green".to_string()]);
        assert_eq!(rows, vec![0, 2, 3, 5]);
    }

    #[test]
    fn test_intersection_disjoint_keys_empty() {
        let index = build();
        // A single row has one color, so distinct keys never intersect.
        assert!(index
            .all_of(&["red".to_string(), "blue".to_string()])
            .is_empty());
        // Same key intersected with itself is itself.
        assert_eq!(
            index.all_of(&["red".to_string(), "red".to_string()]),
            vec![0, 2, 5]
        );
    }

    #[test]
    fn test_intersection_missing_key_short_circuits() {
        let index = build();
        assert!(index
            .all_of(&["red".to_string(), "missing".to_string()])
            .is_empty());
    }

    #[test]
    fn test_not() {
        let index = build();
        assert_eq!(index.not(&"red".to_string()), vec![1, 3, 4]);
        assert_eq!(index.not(&"missing".to_string()), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_grows_beyond_initial_rows() {
        let mut index = BitmapIndex::new();
        index.insert(1i64, 5_000_000);
        assert_eq!(index.search(&1), vec![5_000_000]);
    }

    #[test]
    fn test_remove_row_and_key() {
        let mut index = build();
        assert_eq!(index.remove_row(2), 1);
        assert_eq!(index.search(&"red".to_string()), vec![0, 5]);
        assert_eq!(index.remove_key(&"blue".to_string()), 2);
        assert!(!index.contains(&"blue".to_string()));
    }

    #[test]
    fn test_distinct_keys_sorted() {
        let index = build();
        assert_eq!(
            index.distinct_keys(),
            vec!["blue".to_string(), "green".to_string(), "red".to_string()]
        );
    }
}
