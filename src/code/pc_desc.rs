//! Pc descriptors map offsets in a compiled method's instructions to debug information.
//! Lookups are frequent during stack walking and usually repeat the previous query, so
//! each method keeps a small cache in front of its sorted table.

use crate::util::constants::PC_DESC_CACHE_SIZE;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Debug information for one pc offset of a compiled method.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PcDesc {
    pc_offset: i32,
    scope_decode_offset: i32,
    obj_decode_offset: i32,
    flags: u8,
}

const FLAG_SHOULD_REEXECUTE: u8 = 1 << 0;
const FLAG_IS_METHOD_HANDLE_INVOKE: u8 = 1 << 1;
const FLAG_RETURN_OOP: u8 = 1 << 2;

impl PcDesc {
    pub fn new(pc_offset: i32, scope_decode_offset: i32, obj_decode_offset: i32) -> Self {
        PcDesc {
            pc_offset,
            scope_decode_offset,
            obj_decode_offset,
            flags: 0,
        }
    }

    fn sentinel() -> Self {
        PcDesc::new(-1, 0, 0)
    }

    pub fn pc_offset(&self) -> i32 {
        self.pc_offset
    }

    pub fn scope_decode_offset(&self) -> i32 {
        self.scope_decode_offset
    }

    pub fn obj_decode_offset(&self) -> i32 {
        self.obj_decode_offset
    }

    fn with_flag(mut self, flag: u8, on: bool) -> Self {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
        self
    }

    pub fn with_should_reexecute(self, on: bool) -> Self {
        self.with_flag(FLAG_SHOULD_REEXECUTE, on)
    }

    pub fn with_method_handle_invoke(self, on: bool) -> Self {
        self.with_flag(FLAG_IS_METHOD_HANDLE_INVOKE, on)
    }

    pub fn with_return_oop(self, on: bool) -> Self {
        self.with_flag(FLAG_RETURN_OOP, on)
    }

    pub fn should_reexecute(&self) -> bool {
        self.flags & FLAG_SHOULD_REEXECUTE != 0
    }

    pub fn is_method_handle_invoke(&self) -> bool {
        self.flags & FLAG_IS_METHOD_HANDLE_INVOKE != 0
    }

    pub fn return_oop(&self) -> bool {
        self.flags & FLAG_RETURN_OOP != 0
    }
}

/// Recently found descriptors, stored as table index plus one (zero is empty). Entries are
/// read and written without synchronisation beyond the atomics themselves: two threads
/// updating the cache at once may lose an insertion, which only costs a later search.
struct PcDescCache {
    last: AtomicUsize,
    ring: [AtomicUsize; PC_DESC_CACHE_SIZE],
}

impl PcDescCache {
    fn new() -> Self {
        PcDescCache {
            last: AtomicUsize::new(0),
            ring: Default::default(),
        }
    }

    fn reset(&self) {
        self.last.store(0, Ordering::Relaxed);
        for entry in &self.ring {
            entry.store(0, Ordering::Relaxed);
        }
    }

    /// Put `index` at the front of the ring, evicting the oldest entry.
    fn add(&self, index: usize) {
        for i in (1..PC_DESC_CACHE_SIZE).rev() {
            let previous = self.ring[i - 1].load(Ordering::Relaxed);
            self.ring[i].store(previous, Ordering::Relaxed);
        }
        self.ring[0].store(index + 1, Ordering::Relaxed);
        self.last.store(index + 1, Ordering::Relaxed);
    }
}

/// Counters of where lookups were answered.
#[derive(Debug, Default)]
pub struct PcDescStats {
    pub last_hits: AtomicUsize,
    pub ring_hits: AtomicUsize,
    pub searches: AtomicUsize,
}

/// The sorted pc descriptors of one compiled method with their lookup cache.
pub struct PcDescTable {
    /// Sorted by strictly increasing pc offset. Index 0 is a sentinel with offset -1, so
    /// every real descriptor has a predecessor for approximate matching.
    descs: Box<[PcDesc]>,
    cache: PcDescCache,
    stats: PcDescStats,
}

impl PcDescTable {
    /// Build a table. Descriptors are sorted by pc offset. Duplicate offsets are fatal.
    pub fn new(mut descs: Vec<PcDesc>) -> Self {
        descs.sort_by_key(|d| d.pc_offset);
        descs.retain(|d| d.pc_offset >= 0);
        for pair in descs.windows(2) {
            guarantee!(
                pair[0].pc_offset < pair[1].pc_offset,
                "duplicate pc descriptor for offset {}",
                pair[0].pc_offset
            );
        }
        let mut table = Vec::with_capacity(descs.len() + 1);
        table.push(PcDesc::sentinel());
        table.extend(descs);
        PcDescTable {
            descs: table.into_boxed_slice(),
            cache: PcDescCache::new(),
            stats: PcDescStats::default(),
        }
    }

    /// The real descriptors, without the sentinel.
    pub fn descs(&self) -> &[PcDesc] {
        &self.descs[1..]
    }

    pub fn len(&self) -> usize {
        self.descs.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes the table takes, sentinel included.
    pub fn size_in_bytes(&self) -> usize {
        self.descs.len() * std::mem::size_of::<PcDesc>()
    }

    pub fn stats(&self) -> &PcDescStats {
        &self.stats
    }

    fn matches(&self, index: usize, pc_offset: i32, approximate: bool) -> bool {
        if index == 0 || index >= self.descs.len() {
            return false;
        }
        if approximate {
            self.descs[index - 1].pc_offset < pc_offset && pc_offset <= self.descs[index].pc_offset
        } else {
            self.descs[index].pc_offset == pc_offset
        }
    }

    fn cached(&self, entry: &AtomicUsize, pc_offset: i32, approximate: bool) -> Option<usize> {
        let stored = entry.load(Ordering::Relaxed);
        if stored != 0 && self.matches(stored - 1, pc_offset, approximate) {
            Some(stored - 1)
        } else {
            None
        }
    }

    /// Find the descriptor for `pc_offset`. An exact lookup wants the descriptor at that
    /// offset. An approximate lookup wants the first descriptor at or after it, provided the
    /// previous one is before it.
    pub fn find(&self, pc_offset: i32, approximate: bool) -> Option<&PcDesc> {
        if self.is_empty() {
            return None;
        }
        if let Some(index) = self.cached(&self.cache.last, pc_offset, approximate) {
            self.stats.last_hits.fetch_add(1, Ordering::Relaxed);
            return Some(&self.descs[index]);
        }
        for entry in &self.cache.ring {
            if let Some(index) = self.cached(entry, pc_offset, approximate) {
                self.stats.ring_hits.fetch_add(1, Ordering::Relaxed);
                self.cache.last.store(index + 1, Ordering::Relaxed);
                return Some(&self.descs[index]);
            }
        }

        self.stats.searches.fetch_add(1, Ordering::Relaxed);
        let index = 1 + self.descs[1..].partition_point(|d| d.pc_offset < pc_offset);
        if self.matches(index, pc_offset, approximate) {
            self.cache.add(index);
            Some(&self.descs[index])
        } else {
            None
        }
    }

    /// Forget all cached lookups.
    pub fn reset_cache(&self) {
        self.cache.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PcDescTable {
        PcDescTable::new(vec![
            PcDesc::new(24, 3, 0),
            PcDesc::new(0, 1, 0),
            PcDesc::new(8, 2, 0).with_should_reexecute(true),
            PcDesc::new(40, 4, 0),
            PcDesc::new(56, 5, 0),
            PcDesc::new(72, 6, 0),
        ])
    }

    #[test]
    fn exact_lookup() {
        let table = table();
        assert_eq!(table.len(), 6);
        let desc = table.find(8, false).unwrap();
        assert_eq!(desc.scope_decode_offset(), 2);
        assert!(desc.should_reexecute());
        assert!(table.find(9, false).is_none());
        assert!(table.find(100, false).is_none());
    }

    #[test]
    fn approximate_lookup() {
        let table = table();
        // the first descriptor at or after the offset
        assert_eq!(table.find(9, true).unwrap().pc_offset(), 24);
        assert_eq!(table.find(24, true).unwrap().pc_offset(), 24);
        assert_eq!(table.find(0, true).unwrap().pc_offset(), 0);
        assert!(table.find(73, true).is_none());
    }

    #[test]
    fn cache_hits() {
        let table = table();
        table.find(40, false);
        table.find(40, false);
        assert_eq!(table.stats().searches.load(Ordering::Relaxed), 1);
        assert_eq!(table.stats().last_hits.load(Ordering::Relaxed), 1);

        table.find(56, false);
        table.find(40, false);
        assert_eq!(table.stats().ring_hits.load(Ordering::Relaxed), 1);

        // five distinct lookups push the first one out of the ring
        for offset in [0, 8, 24, 56, 72] {
            table.find(offset, false);
        }
        let searches = table.stats().searches.load(Ordering::Relaxed);
        table.find(40, false);
        assert_eq!(table.stats().searches.load(Ordering::Relaxed), searches + 1);

        table.reset_cache();
        table.find(40, false);
        assert_eq!(table.stats().searches.load(Ordering::Relaxed), searches + 2);
    }

    #[test]
    fn empty_table() {
        let table = PcDescTable::new(vec![]);
        assert!(table.find(0, true).is_none());
        assert!(table.is_empty());
    }
}
