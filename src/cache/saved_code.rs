//! Speculative disconnection. When the cache fills up, old compiled methods are
//! detached from their methods but kept in the heap. A method that is called again gets
//! its code back with [`CodeCache::reanimate_saved_code`]. Code nobody asks for is
//! retired by the sweeper.

use super::{CodeCache, CodeCacheGuard};
use crate::code::NMethodRef;
use crate::util::MethodRef;
use crate::vm::{Collection, VMBinding};

use itertools::Itertools;
use std::sync::atomic::Ordering;

impl<VM: VMBinding> CodeCache<VM> {
    /// Detach `nm` from its method and keep it on the saved list. Returns false if `nm`
    /// is not in use, is OSR code or is already disconnected.
    pub fn speculatively_disconnect(&self, guard: &mut CodeCacheGuard, nm: &NMethodRef) -> bool {
        if !nm.is_in_use() || nm.is_osr_method() || nm.is_speculatively_disconnected() {
            return false;
        }
        let registry = self.registry(guard);
        if let Some(method) = nm.method() {
            Self::clear_method_code(registry, method, nm);
        }
        nm.set_speculatively_disconnected(true);
        registry.saved_nmethods.push(nm);
        debug!("Speculatively disconnected {}", nm);
        true
    }

    /// Reconnect saved code for `method`, if there is any still in use.
    pub fn reanimate_saved_code(
        &self,
        guard: &mut CodeCacheGuard,
        method: MethodRef,
    ) -> Option<NMethodRef> {
        let registry = self.registry(guard);
        let nm = registry
            .saved_nmethods
            .iter()
            .find(|nm| nm.is_in_use() && nm.method() == Some(method))?;
        registry.saved_nmethods.remove(&nm);
        nm.set_speculatively_disconnected(false);
        registry
            .method_code
            .insert(method, std::sync::Arc::downgrade(nm.blob()));
        debug!("Reanimated {}", nm);
        Some(nm)
    }

    /// Drop `nm` from the saved list. Returns whether it was there.
    pub fn remove_saved_code(&self, guard: &mut CodeCacheGuard, nm: &NMethodRef) -> bool {
        let removed = self.registry(guard).saved_nmethods.remove(nm);
        nm.set_speculatively_disconnected(false);
        removed
    }

    pub fn saved_nmethods(&self, guard: &mut CodeCacheGuard) -> Vec<NMethodRef> {
        self.registry(guard).saved_nmethods.iter().collect()
    }

    /// React to an allocation of `failed_size` bytes that did not fit. The VM is told,
    /// and with code cache flushing on, the older half of the methods in use is
    /// disconnected so the sweeper can reclaim what is not used again.
    pub fn handle_full_code_cache(&self, guard: &mut CodeCacheGuard, failed_size: usize) {
        let count = self.full_count.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            "Code cache is full: {} bytes requested, {} of {} committed, largest free block {} (occurrence {})",
            failed_size,
            self.heap.capacity(),
            self.heap.max_capacity(),
            self.heap.largest_free_block(),
            count
        );
        <VM::VMCollection as Collection>::code_cache_full(failed_size);

        if !self.options.use_code_cache_flushing {
            return;
        }
        let candidates = self
            .alive_nmethods(guard)
            .into_iter()
            .filter(|nm| {
                nm.is_in_use() && !nm.is_osr_method() && !nm.is_speculatively_disconnected()
            })
            .sorted_by_key(|nm| nm.compile_id())
            .collect::<Vec<_>>();
        let mut disconnected = 0;
        for nm in &candidates[..candidates.len() / 2] {
            if self.speculatively_disconnect(guard, nm) {
                disconnected += 1;
            }
        }
        self.last_disconnect_traversal
            .store(self.traversal_count(), Ordering::Release);
        info!(
            "Disconnected {} of {} nmethods to free code cache space",
            disconnected,
            candidates.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::util::test_util::mock_vm::*;
    use crate::CodeCache;

    #[test]
    fn disconnect_and_reanimate() {
        let cache = small_code_cache();
        let mut guard = cache.lock();
        let nm = cache
            .new_nmethod(&mut guard, nmethod_descriptor(1, 64, vec![]))
            .unwrap();
        assert!(cache.speculatively_disconnect(&mut guard, &nm));
        assert!(!cache.speculatively_disconnect(&mut guard, &nm));
        assert_eq!(cache.method_code(&mut guard, method(1)), None);
        assert_eq!(cache.saved_nmethods(&mut guard), vec![nm.clone()]);

        assert_eq!(cache.reanimate_saved_code(&mut guard, method(2)), None);
        assert_eq!(cache.reanimate_saved_code(&mut guard, method(1)), Some(nm.clone()));
        assert!(!nm.is_speculatively_disconnected());
        assert_eq!(cache.method_code(&mut guard, method(1)), Some(nm.clone()));
        assert!(cache.saved_nmethods(&mut guard).is_empty());
        assert!(!cache.remove_saved_code(&mut guard, &nm));
    }

    #[test]
    fn full_cache_disconnects_older_half() {
        let mut options = small_options();
        options.use_code_cache_flushing = true;
        let cache = CodeCache::<MockVM>::new(options).unwrap();
        let mut guard = cache.lock();
        let nmethods: Vec<_> = (1..=4)
            .map(|i| {
                cache
                    .new_nmethod(&mut guard, nmethod_descriptor(i, 64, vec![]))
                    .unwrap()
            })
            .collect();
        let before = code_cache_full_count();
        cache.handle_full_code_cache(&mut guard, 1 << 20);
        assert!(code_cache_full_count() > before);
        assert!(cache.full_count() >= 1);
        let saved = cache.saved_nmethods(&mut guard);
        assert_eq!(saved, vec![nmethods[0].clone(), nmethods[1].clone()]);
        assert!(!nmethods[2].is_speculatively_disconnected());
    }
}
