use crate::util::Address;

/// VM-specific methods for reacting to code cache events.
pub trait Collection {
    /// The code cache could not satisfy an allocation of `failed_size` bytes even after
    /// growing to its reserved size. The binding typically stops compiling or schedules a
    /// collection that cleans the cache. The default does nothing.
    ///
    /// Arguments:
    /// * `failed_size`: The size of the request that failed.
    fn code_cache_full(_failed_size: usize) {}

    /// Make freshly written instructions in `[start, start + size)` visible to instruction
    /// fetch. Called exactly once per blob when it is committed, and after relocations are
    /// patched. Bindings with their own cache maintenance routine can override it.
    fn flush_icache(start: Address, size: usize) {
        crate::util::memory::flush_icache(start, size)
    }
}
