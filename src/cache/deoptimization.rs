//! Marking compiled methods whose assumptions no longer hold, and retiring them.
//!
//! What makes a dependency invalid is decided by the VM and passed in as a predicate.
//! Marking only sets a flag. [`CodeCache::make_marked_nmethods_not_entrant`] and
//! [`CodeCache::make_marked_nmethods_zombies`] act on the marks.

use super::{CodeCache, CodeCacheGuard};
use crate::code::{Dependency, NMethodRef};
use crate::util::{KlassRef, MethodRef};
use crate::vm::VMBinding;

impl<VM: VMBinding> CodeCache<VM> {
    fn mark_alive_where<F>(&self, guard: &mut CodeCacheGuard, mut should_mark: F) -> usize
    where
        F: FnMut(&NMethodRef) -> bool,
    {
        let mut marked = 0;
        for nm in self.alive_nmethods(guard) {
            if !nm.is_marked_for_deoptimization() && should_mark(&nm) {
                nm.mark_for_deoptimization();
                marked += 1;
            }
        }
        marked
    }

    /// Mark every alive method with a dependency for which `is_violated` returns true.
    /// Returns how many methods were newly marked.
    pub fn mark_for_deoptimization<F>(&self, guard: &mut CodeCacheGuard, is_violated: F) -> usize
    where
        F: Fn(&Dependency) -> bool,
    {
        let marked = self.mark_alive_where(guard, |nm| nm.check_dependency_on(&is_violated));
        debug!("Marked {} nmethods for deoptimization", marked);
        marked
    }

    /// Like [`CodeCache::mark_for_deoptimization`], but only look at the methods whose
    /// dependencies have one of `klasses` as context, typically a new class's
    /// superclasses.
    pub fn mark_for_deoptimization_in_context<F>(
        &self,
        guard: &mut CodeCacheGuard,
        klasses: &[KlassRef],
        is_violated: F,
    ) -> usize
    where
        F: Fn(&Dependency) -> bool,
    {
        let mut marked = 0;
        for klass in klasses {
            for nm in self.dependents_of(guard, *klass) {
                if nm.is_alive()
                    && !nm.is_marked_for_deoptimization()
                    && nm.check_dependency_on(|dep| {
                        dep.context_type() == Some(*klass) && is_violated(dep)
                    })
                {
                    nm.mark_for_deoptimization();
                    marked += 1;
                }
            }
        }
        debug!(
            "Marked {} nmethods for deoptimization in {} contexts",
            marked,
            klasses.len()
        );
        marked
    }

    /// Mark every alive method that is, or depends on, a method `is_obsolete` reports as
    /// redefined.
    pub fn mark_for_evol_deoptimization<F>(
        &self,
        guard: &mut CodeCacheGuard,
        is_obsolete: F,
    ) -> usize
    where
        F: Fn(MethodRef) -> bool,
    {
        self.mark_alive_where(guard, |nm| nm.is_evol_dependent_on(&is_obsolete))
    }

    /// Mark every alive method with a dependency naming `method`.
    pub fn mark_dependents_on_method(
        &self,
        guard: &mut CodeCacheGuard,
        method: MethodRef,
    ) -> usize {
        self.mark_alive_where(guard, |nm| nm.is_dependent_on_method(method))
    }

    pub fn mark_all_nmethods_for_deoptimization(&self, guard: &mut CodeCacheGuard) -> usize {
        self.mark_alive_where(guard, |_| true)
    }

    /// Make every marked method that is still in use not entrant. Returns how many
    /// transitions this call performed.
    pub fn make_marked_nmethods_not_entrant(&self, guard: &mut CodeCacheGuard) -> usize {
        self.alive_nmethods(guard)
            .iter()
            .filter(|nm| nm.is_marked_for_deoptimization())
            .filter(|nm| self.make_not_entrant(nm))
            .count()
    }

    /// At a safepoint, turn marked methods into zombies where no activation can remain,
    /// and make the rest not entrant. Returns how many methods changed state.
    pub fn make_marked_nmethods_zombies(&self, guard: &mut CodeCacheGuard) -> usize {
        self.check_safepoint(guard);
        let traversal = self.traversal_count();
        let mut changed = 0;
        for nm in self.alive_nmethods(guard) {
            if !nm.is_marked_for_deoptimization() {
                continue;
            }
            let done = if nm.is_not_entrant() && nm.can_not_entrant_be_converted(traversal) {
                self.make_zombie(guard, &nm)
            } else {
                self.make_not_entrant(&nm)
            };
            if done {
                changed += 1;
            }
        }
        changed
    }

    /// Count the dependencies of alive methods that `is_violated` reports as broken.
    /// Each one is logged.
    pub fn check_all_dependencies<F>(&self, guard: &mut CodeCacheGuard, is_violated: F) -> usize
    where
        F: Fn(&Dependency) -> bool,
    {
        let mut violations = 0;
        for nm in self.alive_nmethods(guard) {
            for dep in nm.dependencies() {
                if is_violated(dep) {
                    warn!("Dependency {} of {} is violated", dep, nm);
                    violations += 1;
                }
            }
        }
        violations
    }
}
