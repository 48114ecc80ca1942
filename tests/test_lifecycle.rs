mod common;

use codecache::util::Address;
use codecache::{NMethodLocker, NMethodState, Safepoint, Sweeper};
use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn concurrent_not_entrant_has_one_winner() {
    let cache = code_cache();
    for round in 0..20 {
        let nm = {
            let mut guard = cache.lock();
            cache.new_nmethod(&mut guard, descriptor(round, vec![])).unwrap()
        };
        let wins = AtomicUsize::new(0);
        crossbeam::scope(|s| {
            for _ in 0..2 {
                s.spawn(|_| {
                    if cache.make_not_entrant(&nm) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(nm.state(), NMethodState::NotEntrant);
    }
}

#[test]
fn zombie_transition_races_lockers() {
    let cache = code_cache();
    for round in 0..50 {
        let nm = {
            let mut guard = cache.lock();
            cache.new_nmethod(&mut guard, descriptor(round, vec![])).unwrap()
        };
        assert!(cache.make_not_entrant(&nm));
        let zombified = AtomicUsize::new(0);
        let (locker, locked_zombie) = crossbeam::scope(|s| {
            for _ in 0..2 {
                s.spawn(|_| {
                    if cache.make_zombie(&mut cache.lock(), &nm) {
                        zombified.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
            s.spawn(|_| {
                let locker = NMethodLocker::new_zombie_ok(nm.clone());
                let locked_zombie = locker.is_zombie();
                (locker, locked_zombie)
            })
            .join()
            .unwrap()
        })
        .unwrap();
        // The transition wins only if it saw no lockers, so a lock taken before it keeps
        // the method out of the zombie state.
        let zombified = zombified.load(Ordering::SeqCst);
        assert!(zombified <= 1);
        assert_eq!(zombified == 1, locked_zombie);
        assert_eq!(nm.is_zombie(), locked_zombie);

        drop(locker);
        if !nm.is_zombie() {
            assert!(cache.make_zombie(&mut cache.lock(), &nm));
        }
        let flushed = AtomicUsize::new(0);
        crossbeam::scope(|s| {
            for _ in 0..3 {
                s.spawn(|_| {
                    if cache.flush_nmethod(&mut cache.lock(), &nm) {
                        flushed.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        })
        .unwrap();
        assert_eq!(flushed.load(Ordering::SeqCst), 1);
        assert!(nm.blob().is_freed());
    }
}

#[test]
fn states_only_move_forward() {
    let cache = code_cache();
    let mut guard = cache.lock();
    let nm = cache.new_nmethod(&mut guard, descriptor(1, vec![])).unwrap();
    let mut seen = vec![nm.state()];

    assert!(!cache.make_zombie(&mut guard, &nm));
    seen.push(nm.state());
    assert!(cache.make_not_entrant(&nm));
    seen.push(nm.state());
    assert!(cache.make_zombie(&mut guard, &nm));
    seen.push(nm.state());
    assert!(!cache.make_not_entrant(&nm));
    seen.push(nm.state());

    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last(), Some(&NMethodState::Zombie));
}

#[test]
fn locked_zombie_slot_is_not_reused() {
    let cache = code_cache();
    let mut sweeper = Sweeper::new();
    let mut guard = cache.lock();
    let nm = cache.new_nmethod(&mut guard, descriptor(1, vec![])).unwrap();
    let size = nm.total_size();
    let slot = nm.blob().header_begin();
    assert!(cache.make_not_entrant(&nm));
    assert!(cache.make_zombie(&mut guard, &nm));

    let locker = NMethodLocker::new_zombie_ok(nm.clone());
    for _ in 0..4 {
        sweeper.sweep(&cache, &mut guard);
    }
    assert!(!cache.flush_nmethod(&mut guard, &nm));
    let mut others = vec![];
    for _ in 0..8 {
        let blob = cache.allocate(&mut guard, size).unwrap();
        assert_ne!(blob.header_begin(), slot);
        others.push(blob);
    }
    assert!(cache.find_blob(slot).is_some());

    drop(locker);
    assert_eq!(sweeper.sweep(&cache, &mut guard).marked_for_reclamation, 1);
    assert_eq!(sweeper.sweep(&cache, &mut guard).flushed, 1);
    assert!(nm.blob().is_freed());
    let reused = cache.allocate(&mut guard, size).unwrap();
    assert_eq!(reused.header_begin(), slot);
    for blob in others.iter().chain([&reused]) {
        cache.free(&mut guard, blob);
    }
}

#[test]
#[should_panic]
fn locking_a_zombie_is_fatal() {
    let cache = code_cache();
    let mut guard = cache.lock();
    let nm = cache.new_nmethod(&mut guard, descriptor(1, vec![])).unwrap();
    assert!(cache.make_not_entrant(&nm));
    assert!(cache.make_zombie(&mut guard, &nm));
    let _locker = NMethodLocker::new(nm);
}

fn traverse(sweeper: &Sweeper, cache: &codecache::CodeCache<TestVM>, pcs: &[Address]) {
    let safepoint = unsafe { Safepoint::new() };
    let mut guard = cache.lock_at_safepoint(&safepoint);
    sweeper.mark_active_nmethods(cache, &mut guard, pcs.iter().copied());
}

#[test]
fn sweeper_respects_stack_activity() {
    let cache = code_cache();
    let mut sweeper = Sweeper::new();
    let nm = {
        let mut guard = cache.lock();
        cache.new_nmethod(&mut guard, descriptor(1, vec![])).unwrap()
    };
    let pc = nm.verified_entry_point();
    assert!(cache.make_not_entrant(&nm));
    for _ in 0..5 {
        traverse(&sweeper, &cache, &[pc]);
    }
    assert_eq!(sweeper.sweep(&cache, &mut cache.lock()).zombified, 0);
    traverse(&sweeper, &cache, &[]);
    traverse(&sweeper, &cache, &[]);
    assert_eq!(sweeper.sweep(&cache, &mut cache.lock()).zombified, 1);
}

#[test]
fn stale_handles_do_not_reach_reused_space() {
    let cache = code_cache();
    let mut guard = cache.lock();
    let nm = cache
        .new_nmethod(&mut guard, descriptor(1, vec![Some(old(1))]))
        .unwrap();
    let size = nm.total_size();
    let slot = nm.blob().header_begin();
    assert!(cache.make_not_entrant(&nm));
    assert!(cache.make_zombie(&mut guard, &nm));
    assert!(cache.flush_nmethod(&mut guard, &nm));

    let reused = cache.allocate(&mut guard, size).unwrap();
    cache.commit(&mut guard, &reused);
    assert_eq!(reused.header_begin(), slot);
    let words = |blob: &codecache::CodeBlobRef| -> Vec<usize> {
        (0..blob.size() / 8)
            .map(|i| unsafe { (blob.header_begin() + i * 8).load::<usize>() })
            .collect()
    };
    let before = words(&reused);
    let mut visited = 0;
    nm.oops_do(|slot| {
        visited += 1;
        slot.store(Some(old(77)));
    });
    assert_eq!(visited, 0);
    assert_eq!(nm.oop_at(0), None);
    assert_eq!(words(&reused), before);

    // Handles outlive the cache without touching the released mapping.
    let pending = cache.allocate(&mut guard, 256).unwrap();
    drop(guard);
    drop(cache);
    assert!(pending.is_freed());
    assert!(reused.is_freed());
    assert_eq!(pending.oop_slots().count(), 0);
    assert_eq!(nm.oop_at(0), None);
}
