//! Buffer cache
//!
//! Fixed-byte-capacity pool of uniformly sized page frames with a two-queue
//! ("2Q") replacement policy. A page enters the probation list at MRU on
//! first access and is promoted to the protected list when touched again;
//! eviction takes the probation LRU, falling back to the protected LRU.
//! Pinned frames are never eviction candidates, and a dirty victim is
//! written through before discard.

use std::collections::{HashMap, VecDeque};

use bitflags::bitflags;

use crate::error::{Error, ErrorCode, Result};
use crate::storage::format::PAGE_SIZE;
use crate::types::PageId;

bitflags! {
    /// Per-frame state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const DIRTY = 0x01;
    }
}

// ============================================================================
// Page Frame
// ============================================================================

/// One resident page
#[derive(Debug)]
struct Frame {
    data: Vec<u8>,
    flags: FrameFlags,
    pin_count: u32,
}

impl Frame {
    fn new(data: Vec<u8>) -> Self {
        Frame {
            data,
            flags: FrameFlags::empty(),
            pin_count: 0,
        }
    }

    fn is_dirty(&self) -> bool {
        self.flags.contains(FrameFlags::DIRTY)
    }
}

/// Which 2Q list a page currently lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueLevel {
    Probation,
    Protected,
}

// ============================================================================
// Buffer Cache
// ============================================================================

/// Statistics for cache observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writebacks: u64,
}

/// Two-queue page cache with a byte capacity
pub struct BufferCache {
    capacity_bytes: usize,
    page_size: usize,
    frames: HashMap<PageId, Frame>,
    levels: HashMap<PageId, QueueLevel>,
    // Both queues keep MRU at the front, LRU at the back.
    probation: VecDeque<PageId>,
    protected: VecDeque<PageId>,
    stats: BufferCacheStats,
}

impl BufferCache {
    /// Create a cache bounded by `capacity_bytes`, holding `page_size`
    /// frames (default 64 KiB).
    pub fn new(capacity_bytes: usize) -> Self {
        Self::with_page_size(capacity_bytes, PAGE_SIZE)
    }

    pub fn with_page_size(capacity_bytes: usize, page_size: usize) -> Self {
        BufferCache {
            capacity_bytes,
            page_size,
            frames: HashMap::new(),
            levels: HashMap::new(),
            probation: VecDeque::new(),
            protected: VecDeque::new(),
            stats: BufferCacheStats::default(),
        }
    }

    /// Look up a page, recording the access in the 2Q lists
    pub fn get(&mut self, page_id: PageId) -> Option<&[u8]> {
        if self.frames.contains_key(&page_id) {
            self.stats.hits += 1;
            self.touch(page_id);
            self.frames.get(&page_id).map(|f| f.data.as_slice())
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Insert a page, evicting as needed to stay within capacity.
    ///
    /// `writeback` receives any dirty victim before it is discarded.
    /// Fails with `Capacity` when every resident page is pinned.
    pub fn put(
        &mut self,
        page_id: PageId,
        data: Vec<u8>,
        writeback: &mut dyn FnMut(PageId, &[u8]) -> Result<()>,
    ) -> Result<()> {
        if self.frames.contains_key(&page_id) {
            let frame = self.frames.get_mut(&page_id).unwrap();
            frame.data = data;
            self.touch(page_id);
            return Ok(());
        }

        while (self.frames.len() + 1) * self.page_size > self.capacity_bytes {
            self.evict_one(writeback)?;
        }

        self.frames.insert(page_id, Frame::new(data));
        self.levels.insert(page_id, QueueLevel::Probation);
        self.probation.push_front(page_id);
        Ok(())
    }

    /// Pin a page so it cannot be evicted
    pub fn pin(&mut self, page_id: PageId) -> Result<()> {
        let frame = self
            .frames
            .get_mut(&page_id)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, "page not resident"))?;
        frame.pin_count += 1;
        Ok(())
    }

    /// Release one pin on a page
    pub fn unpin(&mut self, page_id: PageId) -> Result<()> {
        let frame = self
            .frames
            .get_mut(&page_id)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, "page not resident"))?;
        if frame.pin_count == 0 {
            return Err(Error::with_message(
                ErrorCode::Internal,
                "unpin of an unpinned page",
            ));
        }
        frame.pin_count -= 1;
        Ok(())
    }

    /// Mark a page as modified
    pub fn mark_dirty(&mut self, page_id: PageId) -> Result<()> {
        let frame = self
            .frames
            .get_mut(&page_id)
            .ok_or_else(|| Error::with_message(ErrorCode::Name, "page not resident"))?;
        frame.flags.insert(FrameFlags::DIRTY);
        Ok(())
    }

    /// Write every dirty page through and mark it clean
    pub fn flush_all(&mut self, writeback: &mut dyn FnMut(PageId, &[u8]) -> Result<()>) -> Result<()> {
        let dirty: Vec<PageId> = self
            .frames
            .iter()
            .filter(|(_, f)| f.is_dirty())
            .map(|(&id, _)| id)
            .collect();
        for page_id in dirty {
            let frame = self.frames.get_mut(&page_id).unwrap();
            writeback(page_id, &frame.data)?;
            frame.flags.remove(FrameFlags::DIRTY);
            self.stats.writebacks += 1;
        }
        Ok(())
    }

    /// Bytes currently resident
    pub fn resident_bytes(&self) -> usize {
        self.frames.len() * self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.frames.len()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn stats(&self) -> BufferCacheStats {
        self.stats
    }

    /// True if the page sits in the protected list
    pub fn is_protected(&self, page_id: PageId) -> bool {
        self.levels.get(&page_id) == Some(&QueueLevel::Protected)
    }

    /// Drop everything without writing back
    pub fn clear(&mut self) {
        self.frames.clear();
        self.levels.clear();
        self.probation.clear();
        self.protected.clear();
    }

    /// Record an access: probation pages promote to protected, protected
    /// pages move to the protected MRU position.
    fn touch(&mut self, page_id: PageId) {
        match self.levels.get(&page_id) {
            Some(QueueLevel::Probation) => {
                remove_from(&mut self.probation, page_id);
                self.protected.push_front(page_id);
                self.levels.insert(page_id, QueueLevel::Protected);
            }
            Some(QueueLevel::Protected) => {
                remove_from(&mut self.protected, page_id);
                self.protected.push_front(page_id);
            }
            None => {}
        }
    }

    /// Evict one unpinned page, preferring the probation LRU
    fn evict_one(&mut self, writeback: &mut dyn FnMut(PageId, &[u8]) -> Result<()>) -> Result<()> {
        let victim = self
            .pick_victim(QueueLevel::Probation)
            .or_else(|| self.pick_victim(QueueLevel::Protected));

        let Some(victim) = victim else {
            return Err(Error::with_message(
                ErrorCode::Capacity,
                "buffer cache full of pinned pages",
            ));
        };

        let frame = self.frames.remove(&victim).unwrap();
        if frame.is_dirty() {
            writeback(victim, &frame.data)?;
            self.stats.writebacks += 1;
        }
        match self.levels.remove(&victim) {
            Some(QueueLevel::Probation) => remove_from(&mut self.probation, victim),
            Some(QueueLevel::Protected) => remove_from(&mut self.protected, victim),
            None => {}
        }
        self.stats.evictions += 1;
        Ok(())
    }

    /// LRU-most unpinned page of a list, scanning from the back
    fn pick_victim(&self, level: QueueLevel) -> Option<PageId> {
        let queue = match level {
            QueueLevel::Probation => &self.probation,
            QueueLevel::Protected => &self.protected,
        };
        queue
            .iter()
            .rev()
            .find(|id| self.frames.get(id).map(|f| f.pin_count == 0).unwrap_or(false))
            .copied()
    }
}

fn remove_from(queue: &mut VecDeque<PageId>, page_id: PageId) {
    if let Some(pos) = queue.iter().position(|&id| id == page_id) {
        queue.remove(pos);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn no_writeback() -> impl FnMut(PageId, &[u8]) -> Result<()> {
        |_, _| Ok(())
    }

    fn cache(pages: usize) -> BufferCache {
        BufferCache::with_page_size(pages * 1024, 1024)
    }

    #[test]
    fn test_capacity_invariant() {
        let mut cache = cache(3);
        let mut wb = no_writeback();
        for id in 0..10u64 {
            cache.put(id, vec![0u8; 1024], &mut wb).unwrap();
            assert!(cache.resident_bytes() <= cache.capacity_bytes());
        }
        assert_eq!(cache.page_count(), 3);
    }

    #[test]
    fn test_2q_promotion() {
        let mut cache = cache(4);
        let mut wb = no_writeback();
        cache.put(1, vec![1u8; 1024], &mut wb).unwrap();
        cache.put(2, vec![2u8; 1024], &mut wb).unwrap();

        // Single access only enters probation at insert.
        assert!(!cache.is_protected(1));

        // A second access promotes to protected.
        assert!(cache.get(1).is_some());
        assert!(cache.is_protected(1));
        assert!(!cache.is_protected(2));
    }

    #[test]
    fn test_eviction_prefers_probation() {
        let mut cache = cache(2);
        let mut wb = no_writeback();
        cache.put(1, vec![0u8; 1024], &mut wb).unwrap();
        cache.put(2, vec![0u8; 1024], &mut wb).unwrap();
        cache.get(1); // promote page 1

        // Inserting page 3 must evict the probation LRU (page 2),
        // keeping the protected page resident.
        cache.put(3, vec![0u8; 1024], &mut wb).unwrap();
        assert!(cache.get(1).is_some());
        assert!(cache.frames.contains_key(&3));
        assert!(!cache.frames.contains_key(&2));
    }

    #[test]
    fn test_pinned_pages_never_evicted() {
        let mut cache = cache(2);
        let mut wb = no_writeback();
        cache.put(1, vec![0u8; 1024], &mut wb).unwrap();
        cache.put(2, vec![0u8; 1024], &mut wb).unwrap();
        cache.pin(1).unwrap();
        cache.pin(2).unwrap();

        let err = cache.put(3, vec![0u8; 1024], &mut wb).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Capacity);

        cache.unpin(2).unwrap();
        cache.put(3, vec![0u8; 1024], &mut wb).unwrap();
        assert!(cache.frames.contains_key(&1));
        assert!(!cache.frames.contains_key(&2));
    }

    #[test]
    fn test_dirty_victim_written_back() {
        let mut cache = cache(1);
        let mut written: Vec<(PageId, Vec<u8>)> = Vec::new();
        let mut wb = |id: PageId, data: &[u8]| {
            written.push((id, data.to_vec()));
            Ok(())
        };
        cache.put(1, vec![7u8; 1024], &mut wb).unwrap();
        cache.mark_dirty(1).unwrap();
        cache.put(2, vec![8u8; 1024], &mut wb).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, 1);
        assert_eq!(written[0].1, vec![7u8; 1024]);
    }

    #[test]
    fn test_flush_all_clears_dirty() {
        let mut cache = cache(4);
        let count = std::cell::Cell::new(0usize);
        {
            let mut wb = |_: PageId, _: &[u8]| Ok(());
            cache.put(1, vec![0u8; 1024], &mut wb).unwrap();
            cache.put(2, vec![0u8; 1024], &mut wb).unwrap();
        }
        cache.mark_dirty(1).unwrap();
        cache.mark_dirty(2).unwrap();
        let mut wb = |_: PageId, _: &[u8]| {
            count.set(count.get() + 1);
            Ok(())
        };
        cache.flush_all(&mut wb).unwrap();
        assert_eq!(count.get(), 2);
        // Second flush writes nothing.
        cache.flush_all(&mut wb).unwrap();
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_hit_miss_statistics() {
        let mut cache = cache(2);
        let mut wb = no_writeback();
        assert!(cache.get(1).is_none());
        cache.put(1, vec![0u8; 1024], &mut wb).unwrap();
        assert!(cache.get(1).is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
