use criterion::Criterion;

use codecache::util::test_util::mock_vm::*;

pub fn bench(c: &mut Criterion) {
    let cache = small_code_cache();

    c.bench_function("buffer blob install and free", |b| {
        b.iter(|| {
            let mut guard = cache.lock();
            let blob = cache.new_buffer_blob(&mut guard, "bench", 256).unwrap();
            cache.free(&mut guard, &blob);
        })
    });

    c.bench_function("nmethod install and flush", |b| {
        let mut id = 0;
        b.iter(|| {
            id += 1;
            let desc = nmethod_descriptor(id, 128, vec![Some(old_object(id % 64))]);
            let mut guard = cache.lock();
            let nm = cache.new_nmethod(&mut guard, desc).unwrap();
            assert!(cache.make_not_entrant(&nm));
            assert!(cache.make_zombie(&mut guard, &nm));
            assert!(cache.flush_nmethod(&mut guard, &nm));
        })
    });
}
