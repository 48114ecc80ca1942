//! The sweeper moves dead compiled code towards being freed, a step per visit.
//!
//! A not entrant method may still have activations, so it only becomes a zombie once a
//! full stack traversal has passed without finding it on any stack. The VM reports the
//! pcs it found on thread stacks with [`Sweeper::mark_active_nmethods`] at each
//! safepoint. Zombies are marked for reclamation on one sweep and freed on the next, so
//! inline caches that still refer to them can be cleaned in between. Locked methods are
//! left alone.

use crate::cache::{CodeCache, CodeCacheGuard};
use crate::code::NMethodRef;
use crate::util::Address;
use crate::vm::VMBinding;

use std::ops::AddAssign;

/// What a sweep did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub visited: usize,
    pub skipped_locked: usize,
    pub made_not_entrant: usize,
    pub zombified: usize,
    pub marked_for_reclamation: usize,
    pub flushed: usize,
}

impl AddAssign for SweepStats {
    fn add_assign(&mut self, other: SweepStats) {
        self.visited += other.visited;
        self.skipped_locked += other.skipped_locked;
        self.made_not_entrant += other.made_not_entrant;
        self.zombified += other.zombified;
        self.marked_for_reclamation += other.marked_for_reclamation;
        self.flushed += other.flushed;
    }
}

/// Drives the reclamation of compiled methods in a [`CodeCache`].
#[derive(Default)]
pub struct Sweeper {
    sweeps: usize,
    totals: SweepStats,
}

impl Sweeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new stack traversal and stamp every method containing one of
    /// `active_pcs`. Must run at a safepoint. Returns how many pcs were in compiled code.
    pub fn mark_active_nmethods<VM, I>(
        &self,
        cache: &CodeCache<VM>,
        guard: &mut CodeCacheGuard,
        active_pcs: I,
    ) -> usize
    where
        VM: VMBinding,
        I: IntoIterator<Item = Address>,
    {
        cache.check_safepoint(guard);
        let traversal = cache.next_traversal();
        let mut found = 0;
        for pc in active_pcs {
            if let Some(nm) = cache.find_blob_unsafe(pc).and_then(NMethodRef::from_blob) {
                nm.mark_as_seen_on_stack(traversal);
                found += 1;
            }
        }
        trace!("Stack traversal {} found {} compiled frames", traversal, found);
        found
    }

    /// Visit every compiled method once and advance it as far as it may go.
    pub fn sweep<VM: VMBinding>(
        &mut self,
        cache: &CodeCache<VM>,
        guard: &mut CodeCacheGuard,
    ) -> SweepStats {
        let traversal = cache.traversal_count();
        let mut stats = SweepStats::default();
        for nm in cache.nmethods(guard) {
            stats.visited += 1;
            if nm.is_locked_by_vm() {
                stats.skipped_locked += 1;
                continue;
            }
            if nm.is_zombie() {
                if nm.is_marked_for_reclamation() {
                    if cache.flush_nmethod(guard, &nm) {
                        stats.flushed += 1;
                    }
                } else {
                    nm.mark_for_reclamation();
                    stats.marked_for_reclamation += 1;
                }
            } else if nm.is_unloaded() {
                if cache.make_zombie(guard, &nm) {
                    stats.zombified += 1;
                }
            } else if nm.is_not_entrant() {
                if nm.can_not_entrant_be_converted(traversal) && cache.make_zombie(guard, &nm) {
                    stats.zombified += 1;
                }
            } else if nm.is_speculatively_disconnected()
                && traversal > cache.last_disconnect_traversal() + 2
            {
                cache.remove_saved_code(guard, &nm);
                if cache.make_not_entrant(&nm) {
                    stats.made_not_entrant += 1;
                }
            }
        }
        self.sweeps += 1;
        self.totals += stats;
        debug!("Sweep {} at traversal {}: {:?}", self.sweeps, traversal, stats);
        stats
    }

    /// How many sweeps ran.
    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    /// The sum of all sweeps.
    pub fn totals(&self) -> SweepStats {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::NMethodLocker;
    use crate::util::test_util::mock_vm::*;
    use crate::Safepoint;

    fn traverse(sweeper: &Sweeper, cache: &CodeCache<MockVM>, pcs: &[Address]) {
        let safepoint = unsafe { Safepoint::new() };
        let mut guard = cache.lock_at_safepoint(&safepoint);
        sweeper.mark_active_nmethods(cache, &mut guard, pcs.iter().copied());
    }

    #[test]
    fn not_entrant_to_freed() {
        let cache = small_code_cache();
        let mut sweeper = Sweeper::new();
        let nm = {
            let mut guard = cache.lock();
            cache
                .new_nmethod(&mut guard, nmethod_descriptor(1, 64, vec![]))
                .unwrap()
        };
        let pc = nm.entry_point();
        assert!(cache.make_not_entrant(&nm));

        // Seen on a stack: must stay not entrant.
        traverse(&sweeper, &cache, &[pc]);
        traverse(&sweeper, &cache, &[pc]);
        let stats = sweeper.sweep(&cache, &mut cache.lock());
        assert_eq!(stats.zombified, 0);
        assert!(nm.is_not_entrant());

        traverse(&sweeper, &cache, &[]);
        traverse(&sweeper, &cache, &[]);
        assert_eq!(sweeper.sweep(&cache, &mut cache.lock()).zombified, 1);
        assert!(nm.is_zombie());
        assert_eq!(
            sweeper
                .sweep(&cache, &mut cache.lock())
                .marked_for_reclamation,
            1
        );
        assert_eq!(sweeper.sweep(&cache, &mut cache.lock()).flushed, 1);
        assert!(nm.blob().is_freed());
        assert_eq!(cache.nof_nmethods(), 0);
        assert_eq!(sweeper.sweeps(), 4);
        assert_eq!(sweeper.totals().flushed, 1);
    }

    #[test]
    fn locked_zombie_is_kept() {
        let cache = small_code_cache();
        let mut sweeper = Sweeper::new();
        let mut guard = cache.lock();
        let nm = cache
            .new_nmethod(&mut guard, nmethod_descriptor(1, 64, vec![]))
            .unwrap();
        assert!(cache.make_not_entrant(&nm));
        assert!(cache.make_zombie(&mut guard, &nm));
        let locker = NMethodLocker::new_zombie_ok(nm.clone());
        for _ in 0..3 {
            assert_eq!(sweeper.sweep(&cache, &mut guard).skipped_locked, 1);
        }
        assert!(!nm.blob().is_freed());
        drop(locker);
        sweeper.sweep(&cache, &mut guard);
        assert_eq!(sweeper.sweep(&cache, &mut guard).flushed, 1);
    }

    #[test]
    fn unloaded_becomes_zombie() {
        let cache = small_code_cache();
        let mut sweeper = Sweeper::new();
        let safepoint = unsafe { Safepoint::new() };
        let mut guard = cache.lock_at_safepoint(&safepoint);
        let nm = cache
            .new_nmethod(&mut guard, nmethod_descriptor(1, 64, vec![Some(old_object(1))]))
            .unwrap();
        cache.do_unloading(&mut guard, &|_| false, |_| {}, true);
        assert!(nm.is_unloaded());
        assert_eq!(sweeper.sweep(&cache, &mut guard).zombified, 1);
        assert!(nm.is_zombie());
    }

    #[test]
    fn unused_saved_code_is_retired() {
        let mut options = small_options();
        options.use_code_cache_flushing = true;
        let cache = CodeCache::<MockVM>::new(options).unwrap();
        let mut sweeper = Sweeper::new();
        let (old, young) = {
            let mut guard = cache.lock();
            let old = cache
                .new_nmethod(&mut guard, nmethod_descriptor(1, 64, vec![]))
                .unwrap();
            let young = cache
                .new_nmethod(&mut guard, nmethod_descriptor(2, 64, vec![]))
                .unwrap();
            cache.handle_full_code_cache(&mut guard, 1024);
            (old, young)
        };
        assert!(old.is_speculatively_disconnected());
        assert!(!young.is_speculatively_disconnected());
        assert_eq!(sweeper.sweep(&cache, &mut cache.lock()).made_not_entrant, 0);
        for _ in 0..3 {
            traverse(&sweeper, &cache, &[]);
        }
        assert_eq!(sweeper.sweep(&cache, &mut cache.lock()).made_not_entrant, 1);
        assert!(old.is_not_entrant());
        assert!(!old.is_speculatively_disconnected());
        assert!(young.is_in_use());
    }
}
