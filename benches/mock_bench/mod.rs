use criterion::Criterion;

pub mod alloc;
pub mod find_blob;
pub mod sweep;

/// Run the benchmark named by `CODECACHE_BENCH`, or all of them.
pub fn bench(c: &mut Criterion) {
    let name = std::env::var("CODECACHE_BENCH").unwrap_or_default();
    match name.as_str() {
        "alloc" => alloc::bench(c),
        "find_blob" => find_blob::bench(c),
        "sweep" => sweep::bench(c),
        "" => {
            alloc::bench(c);
            find_blob::bench(c);
            sweep::bench(c);
        }
        _ => panic!("Unknown benchmark {:?}", name),
    }
}
