mod common;

use codecache::util::ObjectReference;
use codecache::{CodeCache, CodeCacheGuard, NMethodState, Safepoint};
use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn prune_drops_dead_scavenge_roots() {
    let cache = code_cache();
    let mut guard = cache.lock();
    let nmethods: Vec<_> = (0..3)
        .map(|i| {
            cache
                .new_nmethod(&mut guard, descriptor(i, vec![Some(young(i))]))
                .unwrap()
        })
        .collect();
    for nm in &nmethods {
        cache.add_scavenge_root_nmethod(&mut guard, nm);
    }
    assert_eq!(cache.nof_scavenge_roots(&mut guard), 3);

    let dead = &nmethods[1];
    assert!(cache.make_not_entrant(dead));
    assert!(cache.make_zombie(&mut guard, dead));
    dead.oops_do(|slot| slot.store(Some(old(1))));
    assert!(dead.is_zombie());
    assert!(!dead.detect_scavenge_root_oops::<TestVM>());

    assert_eq!(cache.prune_scavenge_root_nmethods(&mut guard), 1);
    assert_eq!(
        cache.scavenge_root_nmethods(&mut guard),
        vec![nmethods[0].clone(), nmethods[2].clone()]
    );
    assert!(!dead.on_scavenge_root_list());
    assert!(nmethods[0].on_scavenge_root_list());
}

fn snapshot(
    cache: &CodeCache<TestVM>,
    guard: &mut CodeCacheGuard,
) -> Vec<(u32, NMethodState, bool)> {
    cache
        .nmethods(guard)
        .iter()
        .map(|nm| (nm.compile_id(), nm.state(), nm.is_unloaded()))
        .collect()
}

#[test]
fn unloading_is_idempotent() {
    let cache = code_cache();
    let safepoint = unsafe { Safepoint::new() };
    let mut guard = cache.lock_at_safepoint(&safepoint);
    for i in 0..6 {
        cache
            .new_nmethod(&mut guard, descriptor(i, vec![Some(old(i)), Some(old(100 + i))]))
            .unwrap();
    }
    let is_alive = |o: ObjectReference| o != old(2) && o != old(104);

    assert_eq!(cache.do_unloading(&mut guard, &is_alive, |_| {}, true), 2);
    let once = snapshot(&cache, &mut guard);
    assert_eq!(cache.do_unloading(&mut guard, &is_alive, |_| {}, true), 0);
    let twice = snapshot(&cache, &mut guard);
    assert_eq!(once, twice);
    assert_eq!(once.iter().filter(|(_, _, unloaded)| *unloaded).count(), 2);
    cache.verify(&mut guard);
}

#[test]
fn epilogue_rewrites_moved_oops() {
    let cache = code_cache();
    let safepoint = unsafe { Safepoint::new() };
    let mut guard = cache.lock_at_safepoint(&safepoint);
    let nm = cache
        .new_nmethod(&mut guard, descriptor(1, vec![Some(young(1)), None]))
        .unwrap();
    assert!(nm.on_scavenge_root_list());

    cache.gc_prologue(&mut guard);
    // A scavenge copies the object and updates the table in place.
    cache.scavenge_root_nmethods_do(&mut guard, |nm| {
        nm.oops_do(|slot| {
            if slot.load() == Some(young(1)) {
                slot.store(Some(old(9)));
            }
        })
    });
    cache.gc_epilogue(&mut guard);

    nm.verify_oop_relocations();
    assert_eq!(nm.oop_at(0), Some(old(9)));
    assert_eq!(nm.oop_at(1), None);
    assert!(!nm.on_scavenge_root_list());
}

#[test]
fn parallel_oops_do_claims_each_method_once() {
    let cache = code_cache();
    let safepoint = unsafe { Safepoint::new() };
    let mut guard = cache.lock_at_safepoint(&safepoint);
    for i in 0..32 {
        cache.new_nmethod(&mut guard, descriptor(i, vec![])).unwrap();
    }
    let nmethods = cache.nmethods(&mut guard);
    cache.oops_do_marking_prologue(&mut guard);
    let claims = AtomicUsize::new(0);
    crossbeam::scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                for nm in &nmethods {
                    if cache.test_set_oops_do_mark(nm) {
                        claims.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    })
    .unwrap();
    assert_eq!(claims.load(Ordering::SeqCst), 32);
    assert_eq!(cache.oops_do_marking_epilogue(&mut guard), 32);
    assert!(nmethods.iter().all(|nm| !nm.oops_do_marked()));
}
