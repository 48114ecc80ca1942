use criterion::{BatchSize, Criterion};

use codecache::util::test_util::mock_vm::*;
use codecache::{Safepoint, Sweeper};

pub fn bench(c: &mut Criterion) {
    c.bench_function("sweep 128 not entrant nmethods", |b| {
        b.iter_batched(
            || {
                let cache = small_code_cache();
                {
                    let mut guard = cache.lock();
                    for i in 0..128 {
                        let nm = cache
                            .new_nmethod(&mut guard, nmethod_descriptor(i, 64, vec![]))
                            .unwrap();
                        cache.make_not_entrant(&nm);
                    }
                }
                cache
            },
            |cache| {
                let mut sweeper = Sweeper::new();
                let safepoint = unsafe { Safepoint::new() };
                let mut guard = cache.lock_at_safepoint(&safepoint);
                // Two stack walks without compiled frames let not entrant code retire.
                sweeper.mark_active_nmethods(&cache, &mut guard, None);
                sweeper.mark_active_nmethods(&cache, &mut guard, None);
                for _ in 0..3 {
                    sweeper.sweep(&cache, &mut guard);
                }
                sweeper.totals()
            },
            BatchSize::SmallInput,
        )
    });
}
