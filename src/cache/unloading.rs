//! Hooks the collector calls on the code cache.

use super::{CodeCache, CodeCacheGuard, Registry};
use crate::code::NMethodRef;
use crate::util::ObjectReference;
use crate::vm::VMBinding;

use std::sync::atomic::Ordering;

impl<VM: VMBinding> CodeCache<VM> {
    /// After marking, unload every alive method whose oop table refers to an object for
    /// which `is_alive` returns false. The oops of the remaining methods are passed to
    /// `keep_alive`. Returns how many methods were unloaded.
    ///
    /// Unloading only sets state. The sweeper frees the methods later, so calling this
    /// again with the same predicate changes nothing.
    pub fn do_unloading<F, K>(
        &self,
        guard: &mut CodeCacheGuard,
        is_alive: &F,
        mut keep_alive: K,
        unloading_occurred: bool,
    ) -> usize
    where
        F: Fn(ObjectReference) -> bool,
        K: FnMut(ObjectReference),
    {
        self.check_safepoint(guard);
        let mut unloaded = 0;
        for nm in self.nmethods(guard) {
            if nm.is_zombie() || nm.is_unloaded() {
                continue;
            }
            if nm.do_unloading::<VM, F>(is_alive, unloading_occurred) {
                if self.make_unloaded(self.registry(guard), &nm) {
                    unloaded += 1;
                }
            } else {
                nm.oops_do(|slot| {
                    if let Some(object) = slot.load() {
                        keep_alive(object);
                    }
                });
            }
        }
        if unloaded > 0 {
            debug!("Unloaded {} nmethods", unloaded);
        }
        unloaded
    }

    fn make_unloaded(&self, registry: &mut Registry, nm: &NMethodRef) -> bool {
        let was_in_use = nm.is_in_use();
        let method = nm.method();
        if !nm.make_unloaded() {
            return false;
        }
        if was_in_use {
            self.set_needs_cache_clean(true);
        }
        if nm.is_osr_method() {
            nm.invalidate_osr_entry();
        }
        Self::detach(registry, method, nm);
        debug!("Unloaded {}", nm);
        true
    }

    /// Called at the start of a collection.
    pub fn gc_prologue(&self, guard: &mut CodeCacheGuard) {
        self.check_safepoint(guard);
        if self.options.verify_code_cache_often {
            self.verify(guard);
        }
    }

    /// Called at the end of a collection, after objects moved. Rewrites embedded oops,
    /// prunes the scavenge root list and clears the cache-clean request.
    pub fn gc_epilogue(&self, guard: &mut CodeCacheGuard) {
        self.check_safepoint(guard);
        for nm in self.alive_nmethods(guard) {
            nm.fix_oop_relocations::<VM>();
        }
        self.set_needs_cache_clean(false);
        self.prune_scavenge_root_nmethods(guard);
        if self.options.verify_code_cache_often {
            self.verify(guard);
        }
    }

    /// Update the oop tables of all alive methods with `forward`, which returns where an
    /// object moved to, and rewrite the embedded copies. Returns how many embedded oops
    /// changed.
    pub fn fix_oop_relocations<F>(&self, guard: &mut CodeCacheGuard, mut forward: F) -> usize
    where
        F: FnMut(ObjectReference) -> ObjectReference,
    {
        let mut patched = 0;
        for nm in self.alive_nmethods(guard) {
            nm.oops_do(|slot| {
                if let Some(object) = slot.load() {
                    slot.store(Some(forward(object)));
                }
            });
            patched += nm.fix_oop_relocations::<VM>();
        }
        patched
    }

    /// Start a cycle in which collector threads claim methods with
    /// [`CodeCache::test_set_oops_do_mark`].
    pub fn oops_do_marking_prologue(&self, guard: &mut CodeCacheGuard) {
        self.check_safepoint(guard);
        guarantee!(
            !self.oops_do_marking.swap(true, Ordering::AcqRel),
            "oops-do marking already active"
        );
    }

    /// Claim `nm` for this marking cycle. Takes no lock. Returns true for exactly one
    /// caller per method and cycle.
    pub fn test_set_oops_do_mark(&self, nm: &NMethodRef) -> bool {
        guarantee!(
            self.oops_do_marking.load(Ordering::Acquire),
            "oops-do marking is not active"
        );
        if nm.test_set_oops_do_mark() {
            return false;
        }
        self.oops_do_marked.push(nm.clone());
        true
    }

    /// End the marking cycle and clear every claim. Returns how many methods were claimed.
    pub fn oops_do_marking_epilogue(&self, guard: &mut CodeCacheGuard) -> usize {
        self.check_safepoint(guard);
        let mut claimed = 0;
        while let Some(nm) = self.oops_do_marked.pop() {
            nm.clear_oops_do_mark();
            claimed += 1;
        }
        guarantee!(
            self.oops_do_marking.swap(false, Ordering::AcqRel),
            "oops-do marking was not active"
        );
        claimed
    }
}

#[cfg(test)]
mod tests {
    use crate::code::NMethodState;
    use crate::util::test_util::mock_vm::*;
    use crate::util::ObjectReference;
    use crate::Safepoint;

    #[test]
    fn unload_methods_with_dead_oops() {
        let cache = small_code_cache();
        let safepoint = unsafe { Safepoint::new() };
        let mut guard = cache.lock_at_safepoint(&safepoint);
        let live = cache
            .new_nmethod(&mut guard, nmethod_descriptor(1, 64, vec![Some(old_object(1))]))
            .unwrap();
        let dead = cache
            .new_nmethod(&mut guard, nmethod_descriptor(2, 64, vec![Some(old_object(2)), None]))
            .unwrap();

        let is_alive = |o: ObjectReference| o != old_object(2);
        let mut kept = vec![];
        assert_eq!(cache.do_unloading(&mut guard, &is_alive, |o| kept.push(o), true), 1);
        assert_eq!(kept, vec![old_object(1)]);
        assert!(dead.is_unloaded());
        assert_eq!(dead.state(), NMethodState::Alive);
        assert!(dead.method().is_none());
        assert!(live.is_in_use());
        assert!(cache.needs_cache_clean());
        assert_eq!(cache.method_code(&mut guard, method(2)), None);

        assert_eq!(cache.do_unloading(&mut guard, &is_alive, |_| {}, true), 0);
        assert!(dead.is_unloaded());
        assert!(live.is_in_use());

        cache.gc_epilogue(&mut guard);
        assert!(!cache.needs_cache_clean());
    }

    #[test]
    fn dead_exception_types_are_dropped() {
        let cache = small_code_cache();
        let safepoint = unsafe { Safepoint::new() };
        let mut guard = cache.lock_at_safepoint(&safepoint);
        let nm = cache
            .new_nmethod(&mut guard, nmethod_descriptor(1, 64, vec![]))
            .unwrap();
        let pc = nm.blob().insts_begin();
        nm.add_handler_for_exception_and_pc(klass(5), pc, pc + 8usize);
        nm.add_handler_for_exception_and_pc(boot_klass(1), pc, pc + 16usize);

        let is_alive = |o: ObjectReference| o != old_object(5);
        cache.do_unloading(&mut guard, &is_alive, |_| {}, false);
        assert_eq!(nm.exception_cache().type_count(), 2);
        cache.do_unloading(&mut guard, &is_alive, |_| {}, true);
        assert_eq!(nm.exception_cache().type_count(), 1);
        assert_eq!(
            nm.handler_for_exception_and_pc(boot_klass(1), pc),
            Some(pc + 16usize)
        );
        assert!(nm.is_in_use());
    }

    #[test]
    fn forwarding_rewrites_embedded_oops() {
        let cache = small_code_cache();
        let safepoint = unsafe { Safepoint::new() };
        let mut guard = cache.lock_at_safepoint(&safepoint);
        let nm = cache
            .new_nmethod(
                &mut guard,
                nmethod_descriptor(1, 64, vec![Some(young_object(1)), Some(old_object(1))]),
            )
            .unwrap();
        nm.verify_oop_relocations();
        let patched = cache.fix_oop_relocations(&mut guard, |o| {
            if o == young_object(1) {
                old_object(7)
            } else {
                o
            }
        });
        assert_eq!(patched, 1);
        assert_eq!(nm.oop_at(0), Some(old_object(7)));
        nm.verify_oop_relocations();

        cache.gc_epilogue(&mut guard);
        assert!(!nm.on_scavenge_root_list());
    }

    #[test]
    fn oops_do_claims() {
        let cache = small_code_cache();
        let safepoint = unsafe { Safepoint::new() };
        let mut guard = cache.lock_at_safepoint(&safepoint);
        let a = cache
            .new_nmethod(&mut guard, nmethod_descriptor(1, 64, vec![]))
            .unwrap();
        let b = cache
            .new_nmethod(&mut guard, nmethod_descriptor(2, 64, vec![]))
            .unwrap();
        cache.oops_do_marking_prologue(&mut guard);
        assert!(cache.test_set_oops_do_mark(&a));
        assert!(!cache.test_set_oops_do_mark(&a));
        assert!(cache.test_set_oops_do_mark(&b));
        assert_eq!(cache.oops_do_marking_epilogue(&mut guard), 2);
        assert!(!a.oops_do_marked());

        cache.oops_do_marking_prologue(&mut guard);
        assert!(cache.test_set_oops_do_mark(&a));
        assert_eq!(cache.oops_do_marking_epilogue(&mut guard), 1);
    }
}
