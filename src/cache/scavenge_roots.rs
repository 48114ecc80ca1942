//! The scavenge root list: compiled methods whose oop tables may refer to objects in
//! the generation a scavenge collects. A scavenge visits these methods instead of the
//! whole code cache.

use super::{CodeCache, CodeCacheGuard, Registry};
use crate::code::NMethodRef;
use crate::vm::VMBinding;

impl<VM: VMBinding> CodeCache<VM> {
    pub(super) fn add_scavenge_root(registry: &mut Registry, nm: &NMethodRef) {
        if !nm.on_scavenge_root_list() {
            nm.set_on_scavenge_root_list(true);
            registry.scavenge_roots.push(nm);
        }
    }

    pub fn add_scavenge_root_nmethod(&self, guard: &mut CodeCacheGuard, nm: &NMethodRef) {
        Self::add_scavenge_root(self.registry(guard), nm);
    }

    pub fn drop_scavenge_root_nmethod(&self, guard: &mut CodeCacheGuard, nm: &NMethodRef) {
        let registry = self.registry(guard);
        registry.scavenge_roots.remove(nm);
        nm.set_on_scavenge_root_list(false);
    }

    /// Drop methods that no longer need to be scavenge roots: zombies, unloaded methods,
    /// and methods whose oops were all promoted. Returns how many were dropped.
    ///
    /// Must not run while a scavenge is walking the list.
    pub fn prune_scavenge_root_nmethods(&self, guard: &mut CodeCacheGuard) -> usize {
        let registry = self.registry(guard);
        let before = registry.scavenge_roots.len();
        registry.scavenge_roots.retain(|nm| {
            let keep =
                !nm.is_zombie() && !nm.is_unloaded() && nm.detect_scavenge_root_oops::<VM>();
            if !keep {
                trace!("Pruned scavenge root {}", nm);
                nm.set_on_scavenge_root_list(false);
            }
            keep
        });
        before - registry.scavenge_roots.len()
    }

    /// Apply `f` to every scavenge root that is neither a zombie nor unloaded.
    pub fn scavenge_root_nmethods_do<F>(&self, guard: &mut CodeCacheGuard, mut f: F)
    where
        F: FnMut(&NMethodRef),
    {
        for nm in self.scavenge_root_nmethods(guard) {
            if !nm.is_zombie() && !nm.is_unloaded() {
                f(&nm);
            }
        }
    }

    /// A snapshot of the scavenge root list.
    pub fn scavenge_root_nmethods(&self, guard: &mut CodeCacheGuard) -> Vec<NMethodRef> {
        self.registry(guard).scavenge_roots.iter().collect()
    }

    pub fn nof_scavenge_roots(&self, guard: &mut CodeCacheGuard) -> usize {
        self.registry(guard).scavenge_roots.iter().count()
    }
}
