use criterion::Criterion;

use codecache::util::test_util::mock_vm::*;

pub fn bench(c: &mut Criterion) {
    let cache = small_code_cache();
    let nmethods: Vec<_> = {
        let mut guard = cache.lock();
        (0..256)
            .map(|i| {
                cache
                    .new_nmethod(&mut guard, nmethod_descriptor(i, 256, vec![]))
                    .unwrap()
            })
            .collect()
    };
    let pcs: Vec<_> = nmethods
        .iter()
        .map(|nm| nm.verified_entry_point() + 100usize)
        .collect();

    c.bench_function("find_blob", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % pcs.len();
            cache.find_blob(pcs[i])
        })
    });

    c.bench_function("find_nmethod and pc desc", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % pcs.len();
            let nm = cache.find_nmethod(pcs[i]).unwrap();
            nm.find_pc_desc(nm.verified_entry_point() + 24usize, false)
                .is_some()
        })
    });
}
