//! Query result cache
//!
//! TTL + LRU cache keyed by a fingerprint of the normalized query text.
//! Entries are tagged with the tables they read so a write can invalidate
//! exactly the affected results. Both an entry-count bound and a total
//! byte bound are enforced at insert time.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::db::QueryResult;
use crate::parser::tokenizer::is_keyword;

/// Default entry TTL
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
/// Default maximum entry count
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
/// Default maximum total bytes
pub const DEFAULT_MAX_BYTES: usize = 100 * 1024 * 1024;

// ============================================================================
// Fingerprints
// ============================================================================

/// Normalize query text: trim, collapse whitespace runs, and case-fold
/// keywords, leaving string literals untouched.
pub fn normalize_query(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.trim().chars().peekable();
    let mut pending_space = false;
    let mut word = String::new();

    let flush_word = |word: &mut String, out: &mut String| {
        if word.is_empty() {
            return;
        }
        if is_keyword(word) {
            out.push_str(&word.to_uppercase());
        } else {
            out.push_str(word);
        }
        word.clear();
    };

    while let Some(c) = chars.next() {
        if c == '\'' || c == '"' {
            flush_word(&mut word, &mut out);
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            // Copy the literal verbatim, honoring backslash escapes.
            out.push(c);
            while let Some(inner) = chars.next() {
                out.push(inner);
                if inner == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                    continue;
                }
                if inner == c {
                    break;
                }
            }
            continue;
        }

        if c.is_whitespace() {
            flush_word(&mut word, &mut out);
            pending_space = !out.is_empty();
            continue;
        }

        if c.is_alphanumeric() || c == '_' {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            word.push(c);
            continue;
        }

        flush_word(&mut word, &mut out);
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }
    flush_word(&mut word, &mut out);
    out
}

/// Stable fingerprint of the normalized query text (FNV-1a, hex)
pub fn fingerprint(sql: &str) -> String {
    let normalized = normalize_query(sql);
    let mut hash: u64 = 0xCBF2_9CE4_8422_2325;
    for byte in normalized.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hex::encode(hash.to_be_bytes())
}

// ============================================================================
// Cache
// ============================================================================

/// Statistics counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

struct CacheEntry {
    result: Rc<QueryResult>,
    created: Instant,
    tables: BTreeSet<String>,
    bytes: usize,
}

/// TTL + LRU result cache with table-granular invalidation
pub struct ResultCache {
    entries: HashMap<String, CacheEntry>,
    // LRU order: front is oldest, back is most recent.
    access_order: Vec<String>,
    table_to_keys: HashMap<String, HashSet<String>>,
    max_entries: usize,
    max_bytes: usize,
    bytes_used: usize,
    ttl: Duration,
    enabled: bool,
    stats: ResultCacheStats,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL, DEFAULT_MAX_BYTES)
    }
}

impl ResultCache {
    pub fn new(max_entries: usize, ttl: Duration, max_bytes: usize) -> Self {
        ResultCache {
            entries: HashMap::new(),
            access_order: Vec::new(),
            table_to_keys: HashMap::new(),
            max_entries,
            max_bytes,
            bytes_used: 0,
            ttl,
            enabled: true,
            stats: ResultCacheStats::default(),
        }
    }

    /// Look up a query; a hit promotes the entry to MRU, an expired entry
    /// is discarded.
    pub fn get(&mut self, sql: &str) -> Option<Rc<QueryResult>> {
        if !self.enabled {
            self.stats.misses += 1;
            return None;
        }
        let key = fingerprint(sql);

        let expired = match self.entries.get(&key) {
            None => {
                self.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.created.elapsed() > self.ttl,
        };
        if expired {
            self.remove_entry(&key);
            self.stats.misses += 1;
            return None;
        }

        // Promote to MRU.
        if let Some(pos) = self.access_order.iter().position(|k| k == &key) {
            let key = self.access_order.remove(pos);
            self.access_order.push(key);
        }
        self.stats.hits += 1;
        self.entries.get(&key).map(|e| Rc::clone(&e.result))
    }

    /// Insert a result tagged with the tables it read
    pub fn put(&mut self, sql: &str, result: Rc<QueryResult>, tables: BTreeSet<String>) {
        if !self.enabled {
            return;
        }
        let key = fingerprint(sql);
        let bytes = result.byte_size();

        // A single result larger than the cache is not worth holding.
        if bytes > self.max_bytes {
            return;
        }

        if self.entries.contains_key(&key) {
            self.remove_entry(&key);
        }
        while self.entries.len() >= self.max_entries
            || (self.bytes_used + bytes > self.max_bytes && !self.entries.is_empty())
        {
            if !self.evict_lru() {
                break;
            }
        }

        for table in &tables {
            self.table_to_keys
                .entry(table.clone())
                .or_default()
                .insert(key.clone());
        }
        self.bytes_used += bytes;
        self.entries.insert(
            key.clone(),
            CacheEntry {
                result,
                created: Instant::now(),
                tables,
                bytes,
            },
        );
        self.access_order.push(key);
    }

    /// Drop every entry tagged with a table; returns entries removed
    pub fn invalidate(&mut self, table: &str) -> usize {
        let Some(keys) = self.table_to_keys.remove(table) else {
            return 0;
        };
        let mut removed = 0;
        for key in keys {
            if self.remove_entry(&key) {
                removed += 1;
            }
        }
        self.stats.invalidations += removed as u64;
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
        self.table_to_keys.clear();
        self.bytes_used = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn stats(&self) -> ResultCacheStats {
        self.stats
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn evict_lru(&mut self) -> bool {
        let Some(key) = self.access_order.first().cloned() else {
            return false;
        };
        self.remove_entry(&key);
        self.stats.evictions += 1;
        true
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        self.bytes_used -= entry.bytes;
        if let Some(pos) = self.access_order.iter().position(|k| k == key) {
            self.access_order.remove(pos);
        }
        for table in &entry.tables {
            if let Some(keys) = self.table_to_keys.get_mut(table) {
                keys.remove(key);
                if keys.is_empty() {
                    self.table_to_keys.remove(table);
                }
            }
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn result(n: i64) -> Rc<QueryResult> {
        Rc::new(QueryResult {
            columns: vec!["n".to_string()],
            rows: vec![vec![Value::Integer(n)]],
        })
    }

    fn tables(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalization() {
        assert_eq!(
            normalize_query("  select  *\n FROM   t  "),
            "SELECT * FROM t"
        );
        // String literals keep their spacing and case.
        assert_eq!(
            normalize_query("select 'Hello  World' from t"),
            "SELECT 'Hello  World' FROM t"
        );
        // Identifiers keep their case.
        assert_eq!(normalize_query("select MyCol from T"), "SELECT MyCol FROM T");
    }

    #[test]
    fn test_fingerprint_stability() {
        let a = fingerprint("SELECT * FROM t");
        let b = fingerprint("  select   *   from t  ");
        let c = fingerprint("SELECT * FROM u");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hit_and_promote() {
        let mut cache = ResultCache::default();
        cache.put("SELECT 1", result(1), tables(&["t"]));
        assert!(cache.get("SELECT 1").is_some());
        assert!(cache.get("select  1").is_some());
        assert!(cache.get("SELECT 2").is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = ResultCache::new(10, Duration::from_millis(0), 1 << 20);
        cache.put("SELECT 1", result(1), tables(&["t"]));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("SELECT 1").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_entry_count_bound() {
        let mut cache = ResultCache::new(2, DEFAULT_TTL, 1 << 20);
        cache.put("q1", result(1), tables(&["t"]));
        cache.put("q2", result(2), tables(&["t"]));
        cache.put("q3", result(3), tables(&["t"]));
        assert_eq!(cache.len(), 2);
        // q1 was the LRU and is gone.
        assert!(cache.get("q1").is_none());
        assert!(cache.get("q3").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_order_respects_access() {
        let mut cache = ResultCache::new(2, DEFAULT_TTL, 1 << 20);
        cache.put("q1", result(1), tables(&["t"]));
        cache.put("q2", result(2), tables(&["t"]));
        // Touch q1 so q2 becomes the LRU.
        cache.get("q1");
        cache.put("q3", result(3), tables(&["t"]));
        assert!(cache.get("q1").is_some());
        assert!(cache.get("q2").is_none());
    }

    #[test]
    fn test_invalidation_by_table() {
        let mut cache = ResultCache::default();
        cache.put("q1", result(1), tables(&["employees"]));
        cache.put("q2", result(2), tables(&["employees", "departments"]));
        cache.put("q3", result(3), tables(&["departments"]));

        assert_eq!(cache.invalidate("employees"), 2);
        assert!(cache.get("q1").is_none());
        assert!(cache.get("q2").is_none());
        assert!(cache.get("q3").is_some());
    }

    #[test]
    fn test_byte_bound() {
        let small = result(1);
        let bytes = small.byte_size();
        let mut cache = ResultCache::new(100, DEFAULT_TTL, bytes * 2);
        cache.put("q1", result(1), tables(&["t"]));
        cache.put("q2", result(2), tables(&["t"]));
        cache.put("q3", result(3), tables(&["t"]));
        assert!(cache.bytes_used() <= bytes * 2);
        assert!(cache.len() <= 2);
    }

    #[test]
    fn test_clear() {
        let mut cache = ResultCache::default();
        cache.put("q1", result(1), tables(&["t"]));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.bytes_used(), 0);
        assert!(cache.get("q1").is_none());
    }
}
