use super::{CodeCache, CodeCacheGuard};
use crate::code::{BlobType, NMethodState};
use crate::util::conversions::bytes_to_formatted_string;
use crate::vm::VMBinding;

use enum_map::EnumMap;
use std::fmt;

/// Count and total size of the blobs of one type.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobTypeStats {
    pub count: usize,
    pub bytes: usize,
}

/// A snapshot of the code cache's occupancy.
#[derive(Clone, Debug, Default)]
pub struct CodeCacheStats {
    pub blobs: EnumMap<BlobType, BlobTypeStats>,
    pub nmethods_in_use: usize,
    pub nmethods_not_entrant: usize,
    pub nmethods_zombie: usize,
    pub nmethods_unloaded: usize,
    pub scavenge_roots: usize,
    pub saved_nmethods: usize,
    pub capacity: usize,
    pub max_capacity: usize,
    pub allocated: usize,
    pub largest_free_block: usize,
    pub free_blocks: usize,
    pub full_count: usize,
}

impl CodeCacheStats {
    pub fn total_blobs(&self) -> usize {
        self.blobs.values().map(|s| s.count).sum()
    }

    pub fn total_bytes(&self) -> usize {
        self.blobs.values().map(|s| s.bytes).sum()
    }
}

impl fmt::Display for CodeCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "CodeCache: size={} committed={} used={} free={} largest_free_block={} free_blocks={}",
            bytes_to_formatted_string(self.max_capacity),
            bytes_to_formatted_string(self.capacity),
            bytes_to_formatted_string(self.allocated),
            bytes_to_formatted_string(self.capacity - self.allocated),
            bytes_to_formatted_string(self.largest_free_block),
            self.free_blocks
        )?;
        write!(
            f,
            " blobs={} nmethods: in_use={} not_entrant={} zombie={} unloaded={} scavenge_roots={} saved={} full_count={}",
            self.total_blobs(),
            self.nmethods_in_use,
            self.nmethods_not_entrant,
            self.nmethods_zombie,
            self.nmethods_unloaded,
            self.scavenge_roots,
            self.saved_nmethods,
            self.full_count
        )?;
        for (ty, stats) in self.blobs.iter() {
            if stats.count > 0 {
                write!(
                    f,
                    "\n  {:<24} {:>6} {:>10}",
                    ty.name(),
                    stats.count,
                    bytes_to_formatted_string(stats.bytes)
                )?;
            }
        }
        Ok(())
    }
}

impl<VM: VMBinding> CodeCache<VM> {
    pub fn stats(&self, guard: &mut CodeCacheGuard) -> CodeCacheStats {
        let mut stats = CodeCacheStats::default();
        for blob in self.blobs(guard) {
            let entry = &mut stats.blobs[blob.blob_type()];
            entry.count += 1;
            entry.bytes += blob.size();
            if let Some(nm) = blob.as_nmethod() {
                if nm.is_unloaded() {
                    stats.nmethods_unloaded += 1;
                    continue;
                }
                match nm.state() {
                    NMethodState::Alive => stats.nmethods_in_use += 1,
                    NMethodState::NotEntrant => stats.nmethods_not_entrant += 1,
                    NMethodState::Zombie => stats.nmethods_zombie += 1,
                }
            }
        }
        let registry = self.registry(guard);
        stats.scavenge_roots = registry.scavenge_roots.iter().count();
        stats.saved_nmethods = registry.saved_nmethods.iter().count();
        stats.capacity = self.heap.capacity();
        stats.max_capacity = self.heap.max_capacity();
        stats.allocated = self.heap.allocated_capacity();
        stats.largest_free_block = self.heap.largest_free_block();
        stats.free_blocks = self.heap.free_block_count();
        stats.full_count = self.full_count();
        stats
    }
}

#[cfg(test)]
mod tests {
    use crate::code::{BlobKind, BlobType, CodeBuffer};
    use crate::util::test_util::mock_vm::*;

    #[test]
    fn stats_by_type_and_state() {
        let cache = small_code_cache();
        let mut guard = cache.lock();
        let a = cache
            .new_nmethod(&mut guard, nmethod_descriptor(1, 64, vec![Some(young_object(1))]))
            .unwrap();
        let b = cache
            .new_nmethod(&mut guard, nmethod_descriptor(2, 64, vec![]))
            .unwrap();
        cache
            .new_blob(&mut guard, BlobKind::Exception, CodeBuffer::new("exception"))
            .unwrap();
        assert!(cache.make_not_entrant(&b));

        let stats = cache.stats(&mut guard);
        assert_eq!(stats.blobs[BlobType::NMethod].count, 2);
        assert_eq!(
            stats.blobs[BlobType::NMethod].bytes,
            a.total_size() + b.total_size()
        );
        assert_eq!(stats.blobs[BlobType::Exception].count, 1);
        assert_eq!(stats.total_blobs(), 3);
        assert_eq!(stats.nmethods_in_use, 1);
        assert_eq!(stats.nmethods_not_entrant, 1);
        assert_eq!(stats.scavenge_roots, 1);
        assert!(stats.allocated >= stats.total_bytes());
        let text = stats.to_string();
        assert!(text.contains("nmethod"));
        assert!(text.contains("exception"));
        cache.print_summary(&mut guard);
    }
}
