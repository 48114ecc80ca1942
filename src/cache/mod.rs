//! The code cache: the registry of every blob in the code heap.
//!
//! Lookups by address ([`CodeCache::find_blob`]) take no lock and may run from signal
//! handlers and stack walkers while other threads install and free code. Everything that
//! changes the registry needs a [`CodeCacheGuard`], which proves that the caller either
//! holds the code cache lock or runs while all managed threads are stopped at a
//! safepoint.

mod deoptimization;
mod saved_code;
mod scavenge_roots;
mod stats;
mod unloading;
mod verify;

pub use self::stats::{BlobTypeStats, CodeCacheStats};

use crate::code::{
    BlobKind, BlobLayout, CodeBlob, CodeBlobRef, CodeBuffer, NMethod, NMethodDescriptor,
    NMethodList, NMethodRef,
};
use crate::heap::CodeHeap;
use crate::util::conversions;
use crate::util::options::Options;
use crate::util::{Address, KlassRef, MethodRef};
use crate::vm::{Collection, VMBinding};

use crossbeam::epoch;
use crossbeam::queue::SegQueue;
use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// How the holder of a [`CodeCacheGuard`] excludes other mutators of the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exclusion {
    /// The holder took the code cache lock.
    Locked,
    /// All managed threads are stopped at a safepoint.
    Safepoint,
}

/// Proof that every managed thread is stopped at a safepoint. Created by the VM's
/// safepoint synchroniser and passed to [`CodeCache::lock_at_safepoint`].
pub struct Safepoint {
    _private: (),
}

impl Safepoint {
    /// # Safety
    /// The caller must guarantee that every managed thread is parked at a safepoint, and
    /// stays parked while this value exists.
    pub unsafe fn new() -> Self {
        Safepoint { _private: () }
    }
}

/// The registry state behind the code cache lock.
#[derive(Default)]
struct Registry {
    /// The code installed for each method's normal entry.
    method_code: HashMap<MethodRef, Weak<CodeBlob>>,
    /// On-stack-replacement code per method, newest first.
    osr_nmethods: HashMap<MethodRef, NMethodList>,
    /// The methods whose dependencies have each class as context.
    dependents: HashMap<KlassRef, NMethodList>,
    /// Methods whose oop table may refer to objects a scavenge moves.
    scavenge_roots: NMethodList,
    /// Methods disconnected from their method while the cache was full.
    saved_nmethods: NMethodList,
}

/// Exclusive access to the registry of one [`CodeCache`]. Every call that changes the
/// registry takes one.
///
/// A thread must not block at a safepoint while holding a guard it obtained with
/// [`CodeCache::lock`].
pub struct CodeCacheGuard<'a> {
    registry: MutexGuard<'a, Registry>,
    exclusion: Exclusion,
    cache: *const (),
}

impl CodeCacheGuard<'_> {
    pub fn exclusion(&self) -> Exclusion {
        self.exclusion
    }

    pub fn is_at_safepoint(&self) -> bool {
        self.exclusion == Exclusion::Safepoint
    }
}

/// A code cache for the VM `VM`. Owns the code heap and every blob in it.
pub struct CodeCache<VM: VMBinding> {
    heap: CodeHeap,
    options: Arc<Options>,
    registry: Mutex<Registry>,

    nof_blobs: AtomicUsize,
    nof_nmethods: AtomicUsize,
    nof_adapters: AtomicUsize,
    nof_nmethods_with_dependencies: AtomicUsize,

    /// Completed stack traversals of the sweeper.
    traversals: AtomicUsize,
    /// The traversal at which code was last disconnected because the cache was full.
    last_disconnect_traversal: AtomicUsize,
    /// Set when a method in use was unloaded. Cleared by the GC epilogue.
    needs_cache_clean: AtomicBool,
    full_count: AtomicUsize,

    oops_do_marking: AtomicBool,
    oops_do_marked: SegQueue<NMethodRef>,

    phantom: PhantomData<VM>,
}

impl<VM: VMBinding> CodeCache<VM> {
    /// Create a code cache and its heap from `options`.
    pub fn new(options: Options) -> Result<Self> {
        if !options.is_consistent() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "initial code cache size {} exceeds the reserved size {}",
                    options.initial_code_cache_size, options.reserved_code_cache_size
                ),
            ));
        }
        let heap = CodeHeap::new(
            options.reserved_code_cache_size,
            options.initial_code_cache_size,
            options.code_cache_segment_size,
            options.code_cache_min_block_length,
            options.code_cache_exec_permission,
        )?;
        Ok(CodeCache {
            heap,
            options: Arc::new(options),
            registry: Mutex::new(Registry::default()),
            nof_blobs: AtomicUsize::new(0),
            nof_nmethods: AtomicUsize::new(0),
            nof_adapters: AtomicUsize::new(0),
            nof_nmethods_with_dependencies: AtomicUsize::new(0),
            traversals: AtomicUsize::new(0),
            last_disconnect_traversal: AtomicUsize::new(0),
            needs_cache_clean: AtomicBool::new(false),
            full_count: AtomicUsize::new(0),
            oops_do_marking: AtomicBool::new(false),
            oops_do_marked: SegQueue::new(),
            phantom: PhantomData,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn heap(&self) -> &CodeHeap {
        &self.heap
    }

    /// Take the code cache lock. The holder must not block for a safepoint while it
    /// keeps the guard, since the safepoint side takes the same lock.
    pub fn lock(&self) -> CodeCacheGuard<'_> {
        CodeCacheGuard {
            registry: self.lock_registry(),
            exclusion: Exclusion::Locked,
            cache: self.identity(),
        }
    }

    /// Get exclusive access while the world is stopped.
    pub fn lock_at_safepoint(&self, _safepoint: &Safepoint) -> CodeCacheGuard<'_> {
        CodeCacheGuard {
            registry: self.lock_registry(),
            exclusion: Exclusion::Safepoint,
            cache: self.identity(),
        }
    }

    // A fatal error raised under the lock poisons it. Later callers still get the registry
    // so that the first failure is the one reported.
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn identity(&self) -> *const () {
        self as *const Self as *const ()
    }

    fn check_guard(&self, guard: &CodeCacheGuard) {
        guarantee!(
            guard.cache == self.identity(),
            "code cache guard used with another code cache"
        );
    }

    pub(crate) fn check_safepoint(&self, guard: &CodeCacheGuard) {
        self.check_guard(guard);
        guarantee!(
            guard.is_at_safepoint(),
            "operation requires a safepoint, but the guard was obtained by locking"
        );
    }

    fn registry<'g>(&self, guard: &'g mut CodeCacheGuard) -> &'g mut Registry {
        self.check_guard(guard);
        &mut guard.registry
    }

    /// Allocate `size` bytes in the heap, growing it as needed. Requests that can never
    /// fit fail without growing.
    fn allocate_space(&self, guard: &mut CodeCacheGuard, size: usize) -> Option<Address> {
        self.check_guard(guard);
        if self.is_oversize(guard, size) {
            return None;
        }
        loop {
            if let Some(space) = self.heap.allocate(size) {
                debug!("Code cache allocated {} bytes at {}", size, space);
                return Some(space);
            }
            if !self.heap.expand_by(self.options.code_cache_expansion_size) {
                self.handle_full_code_cache(guard, size);
                return None;
            }
        }
    }

    /// Report a request that can never fit, before any size arithmetic on it.
    fn is_oversize(&self, guard: &mut CodeCacheGuard, size: usize) -> bool {
        if size <= self.heap.max_capacity() {
            return false;
        }
        debug!(
            "Code cache allocation of {} bytes exceeds the reserved size {}",
            size,
            self.heap.max_capacity()
        );
        self.handle_full_code_cache(guard, size);
        true
    }

    /// Allocate an uncommitted buffer blob of `size` bytes in total. The blob must be
    /// passed to [`CodeCache::commit`] or [`CodeCache::free`].
    pub fn allocate(&self, guard: &mut CodeCacheGuard, size: usize) -> Option<CodeBlobRef> {
        self.check_guard(guard);
        if self.is_oversize(guard, size) {
            return None;
        }
        let layout = BlobLayout::for_total_size(size);
        let space = self.allocate_space(guard, layout.size)?;
        Some(self.adopt(CodeBlob::install(
            space,
            CodeBuffer::new("allocation"),
            BlobKind::Buffer,
            layout,
            &[],
        )))
    }

    /// Make a freshly installed blob the owner of its heap block. Lookups skip it until it
    /// is committed, and [`CodeCache::free`] or dropping the cache marks it freed.
    fn adopt(&self, blob: CodeBlob) -> CodeBlobRef {
        let blob = Arc::new(blob);
        self.heap
            .set_owner(blob.header_begin(), Arc::into_raw(blob.clone()) as usize);
        blob
    }

    /// Make a blob visible to lookups. The instruction cache is flushed for the blob's
    /// content before it is published. Committing a blob twice is fatal.
    pub fn commit(&self, guard: &mut CodeCacheGuard, blob: &CodeBlobRef) {
        self.check_guard(guard);
        guarantee!(
            self.heap.find_start(blob.header_begin()) == Some(blob.header_begin()),
            "committing {} which is not a code heap allocation",
            blob
        );
        <VM::VMCollection as Collection>::flush_icache(blob.content_begin(), blob.content_size());
        guarantee!(blob.mark_published(), "{} committed twice", blob);

        self.nof_blobs.fetch_add(1, Ordering::Relaxed);
        if let Some(nm) = blob.as_nmethod() {
            self.nof_nmethods.fetch_add(1, Ordering::Relaxed);
            if nm.has_dependencies() {
                self.nof_nmethods_with_dependencies
                    .fetch_add(1, Ordering::Relaxed);
            }
        } else if blob.is_adapter_blob() {
            self.nof_adapters.fetch_add(1, Ordering::Relaxed);
        }

        debug!("Committed {}", blob);

        #[cfg(feature = "extreme_assertions")]
        self.verify(guard);
    }

    /// Return a blob's space to the heap. The blob stays valid as a handle, but its code
    /// must not be used again. Freeing a locked compiled method is fatal.
    pub fn free(&self, guard: &mut CodeCacheGuard, blob: &CodeBlobRef) {
        self.check_guard(guard);
        if let Some(nm) = blob.as_nmethod() {
            guarantee!(!nm.is_locked_by_vm(), "freeing locked {}", blob);
        }
        guarantee!(!blob.is_freed(), "double free of {}", blob);
        let start = blob.header_begin();
        let owner = self.heap.owner(start);
        guarantee!(
            owner == Arc::as_ptr(blob) as usize,
            "owner word of {} does not refer to it",
            blob
        );
        let was_published = blob.mark_freed();
        self.heap.set_owner(start, 0);
        // Lock-free readers may still be looking at the blob.
        let owner = unsafe { Arc::from_raw(owner as *const CodeBlob) };
        epoch::pin().defer(move || drop(owner));
        if was_published {
            self.nof_blobs.fetch_sub(1, Ordering::Relaxed);
            if let Some(nm) = blob.as_nmethod() {
                self.nof_nmethods.fetch_sub(1, Ordering::Relaxed);
                if nm.has_dependencies() {
                    self.nof_nmethods_with_dependencies
                        .fetch_sub(1, Ordering::Relaxed);
                }
            } else if blob.is_adapter_blob() {
                self.nof_adapters.fetch_sub(1, Ordering::Relaxed);
            }
        }
        self.heap.deallocate(start);
        debug!("Freed {}", blob);

        #[cfg(feature = "extreme_assertions")]
        self.verify(guard);
    }

    /// Install and commit a blob built from `buffer`. Compiled methods are installed with
    /// [`CodeCache::new_nmethod`] instead.
    pub fn new_blob(
        &self,
        guard: &mut CodeCacheGuard,
        kind: BlobKind,
        buffer: CodeBuffer,
    ) -> Option<CodeBlobRef> {
        guarantee!(
            !matches!(kind, BlobKind::NMethod(_)),
            "compiled methods are installed with new_nmethod"
        );
        let layout = BlobLayout::compute(&buffer, 0);
        let space = self.allocate_space(guard, layout.size)?;
        let blob = self.adopt(CodeBlob::install(space, buffer, kind, layout, &[]));
        self.commit(guard, &blob);
        Some(blob)
    }

    /// Install a committed buffer blob with `size` bytes of zeroed instructions.
    pub fn new_buffer_blob(
        &self,
        guard: &mut CodeCacheGuard,
        name: &str,
        size: usize,
    ) -> Option<CodeBlobRef> {
        let mut buffer = CodeBuffer::new(name);
        buffer.insts = vec![0; size];
        self.new_blob(guard, BlobKind::Buffer, buffer)
    }

    /// Install a compiled method. Normal entries become the method's code, OSR entries go
    /// on the method's OSR list. The method is registered under the context class of each
    /// of its dependencies, and on the scavenge root list if its oops need it.
    pub fn new_nmethod(
        &self,
        guard: &mut CodeCacheGuard,
        desc: NMethodDescriptor,
    ) -> Option<NMethodRef> {
        let (nm, buffer, oops) = NMethod::new(desc, self.options.exception_cache_size);
        let layout = BlobLayout::compute(&buffer, oops.len());
        let space = self.allocate_space(guard, layout.size)?;
        let blob = self.adopt(CodeBlob::install(
            space,
            buffer,
            BlobKind::NMethod(nm),
            layout,
            &oops,
        ));
        let nm = match NMethodRef::from_blob(blob) {
            Some(nm) => nm,
            None => unreachable!(),
        };
        self.commit(guard, nm.blob());

        let registry = self.registry(guard);
        for klass in nm.dependency_context_types() {
            registry.dependents.entry(klass).or_default().push(&nm);
        }
        if let Some(method) = nm.method() {
            if nm.is_osr_method() {
                registry
                    .osr_nmethods
                    .entry(method)
                    .or_default()
                    .push_front(&nm);
            } else {
                registry.method_code.insert(method, Arc::downgrade(nm.blob()));
            }
        }
        if nm.detect_scavenge_root_oops::<VM>() {
            if self.options.scavenge_roots_in_code {
                Self::add_scavenge_root(registry, &nm);
            } else {
                warn!("{} embeds scavengable oops but scavenge roots in code are off", nm);
            }
        }
        debug!("Installed {}", nm);
        Some(nm)
    }

    /// The blob containing `addr`, if committed. Takes no lock. Finding a zombie that is
    /// not locked is fatal: the caller is looking at code that may be freed at any time.
    pub fn find_blob(&self, addr: Address) -> Option<CodeBlobRef> {
        let blob = self.find_blob_unsafe(addr)?;
        if let Some(nm) = blob.as_nmethod() {
            guarantee!(
                !nm.is_zombie() || nm.is_locked_by_vm(),
                "unsafe access to zombie {}",
                blob
            );
        }
        Some(blob)
    }

    /// Like [`CodeCache::find_blob`], but also returns zombies.
    pub fn find_blob_unsafe(&self, addr: Address) -> Option<CodeBlobRef> {
        let start = self.heap.find_start(addr)?;
        let blob = self.blob_at(start)?;
        if blob.blob_contains(addr) {
            trace!("find_blob({}) = {}", addr, blob);
            Some(blob)
        } else {
            None
        }
    }

    /// The compiled method containing `addr`.
    pub fn find_nmethod(&self, addr: Address) -> Option<NMethodRef> {
        self.find_blob(addr).and_then(NMethodRef::from_blob)
    }

    /// The published blob whose heap block starts at `start`.
    fn blob_at(&self, start: Address) -> Option<CodeBlobRef> {
        let _guard = epoch::pin();
        let owner = self.heap.owner(start);
        if owner == 0 {
            return None;
        }
        // The owner word holds a strong count that `free` releases only after every
        // thread pinned now has unpinned.
        let blob = unsafe {
            Arc::increment_strong_count(owner as *const CodeBlob);
            Arc::from_raw(owner as *const CodeBlob)
        };
        if blob.is_published() {
            Some(blob)
        } else {
            None
        }
    }

    /// Is `addr` in the committed part of the code heap?
    pub fn contains(&self, addr: Address) -> bool {
        self.heap.contains(addr)
    }

    /// All committed blobs, in address order.
    pub fn blobs(&self, guard: &mut CodeCacheGuard) -> Vec<CodeBlobRef> {
        self.check_guard(guard);
        self.heap
            .iter()
            .filter_map(|start| self.blob_at(start))
            .collect()
    }

    /// All compiled methods, in address order.
    pub fn nmethods(&self, guard: &mut CodeCacheGuard) -> Vec<NMethodRef> {
        self.blobs(guard)
            .into_iter()
            .filter_map(NMethodRef::from_blob)
            .collect()
    }

    /// Compiled methods that are neither zombies nor unloaded.
    pub fn alive_nmethods(&self, guard: &mut CodeCacheGuard) -> Vec<NMethodRef> {
        let mut nmethods = self.nmethods(guard);
        nmethods.retain(|nm| nm.is_alive());
        nmethods
    }

    pub fn blobs_do<F>(&self, guard: &mut CodeCacheGuard, f: F)
    where
        F: FnMut(&CodeBlobRef),
    {
        self.blobs(guard).iter().for_each(f);
    }

    pub fn nmethods_do<F>(&self, guard: &mut CodeCacheGuard, f: F)
    where
        F: FnMut(&NMethodRef),
    {
        self.nmethods(guard).iter().for_each(f);
    }

    pub fn alive_nmethods_do<F>(&self, guard: &mut CodeCacheGuard, f: F)
    where
        F: FnMut(&NMethodRef),
    {
        self.alive_nmethods(guard).iter().for_each(f);
    }

    /// The code installed for `method`'s normal entry, if it is still in use.
    pub fn method_code(
        &self,
        guard: &mut CodeCacheGuard,
        method: MethodRef,
    ) -> Option<NMethodRef> {
        let registry = self.registry(guard);
        registry
            .method_code
            .get(&method)
            .and_then(Weak::upgrade)
            .filter(|blob| !blob.is_freed())
            .and_then(NMethodRef::from_blob)
            .filter(|nm| nm.is_in_use())
    }

    /// Make `nm` the code for its method's normal entry. Returns the code it replaced.
    pub fn set_method_code(
        &self,
        guard: &mut CodeCacheGuard,
        nm: &NMethodRef,
    ) -> Option<NMethodRef> {
        guarantee!(!nm.is_osr_method(), "{} is an OSR method", nm);
        let method = nm.method()?;
        let registry = self.registry(guard);
        registry
            .method_code
            .insert(method, Arc::downgrade(nm.blob()))
            .and_then(|old| old.upgrade())
            .and_then(NMethodRef::from_blob)
            .filter(|old| old != nm)
    }

    fn clear_method_code(registry: &mut Registry, method: MethodRef, nm: &NMethodRef) {
        if let Some(current) = registry.method_code.get(&method) {
            if current.as_ptr() == Arc::as_ptr(nm.blob()) {
                registry.method_code.remove(&method);
            }
        }
    }

    pub fn add_osr_nmethod(&self, guard: &mut CodeCacheGuard, nm: &NMethodRef) {
        guarantee!(nm.is_osr_method(), "{} is not an OSR method", nm);
        if let Some(method) = nm.method() {
            self.registry(guard)
                .osr_nmethods
                .entry(method)
                .or_default()
                .push_front(nm);
        }
    }

    /// Remove `nm` from its method's OSR list. Returns whether it was there.
    pub fn remove_osr_nmethod(&self, guard: &mut CodeCacheGuard, nm: &NMethodRef) -> bool {
        let registry = self.registry(guard);
        Self::remove_osr(registry, nm)
    }

    fn remove_osr(registry: &mut Registry, nm: &NMethodRef) -> bool {
        let mut removed = false;
        registry.osr_nmethods.retain(|_, list| {
            removed |= list.remove(nm);
            !list.is_empty()
        });
        removed
    }

    /// Find OSR code for `method` at `bci`. With `match_level`, only code compiled at
    /// exactly `comp_level` qualifies. Otherwise the highest level at or above
    /// `comp_level` wins.
    pub fn lookup_osr_nmethod(
        &self,
        guard: &mut CodeCacheGuard,
        method: MethodRef,
        bci: i32,
        comp_level: i32,
        match_level: bool,
    ) -> Option<NMethodRef> {
        let registry = self.registry(guard);
        let list = registry.osr_nmethods.get(&method)?;
        let mut best: Option<NMethodRef> = None;
        for nm in list.iter() {
            if !nm.is_in_use() || nm.osr_entry_bci() != bci {
                continue;
            }
            if match_level {
                if nm.comp_level() == comp_level {
                    return Some(nm);
                }
            } else if best
                .as_ref()
                .map_or(true, |b| nm.comp_level() > b.comp_level())
            {
                best = Some(nm);
            }
        }
        best.filter(|b| b.comp_level() >= comp_level)
    }

    /// Stop new calls into `nm`. Takes no lock. Returns false if `nm` was not alive, or
    /// another thread made it not entrant first.
    pub fn make_not_entrant(&self, nm: &NMethodRef) -> bool {
        if !nm.make_not_entrant(self.traversal_count()) {
            return false;
        }
        if nm.is_osr_method() {
            nm.invalidate_osr_entry();
        }
        debug!("Made not entrant: {}", nm);
        true
    }

    /// Turn a not entrant (or unloaded) method into a zombie and detach it from its
    /// method and the dependency index. Returns false if `nm` is locked or not in a state
    /// that can become a zombie.
    pub fn make_zombie(&self, guard: &mut CodeCacheGuard, nm: &NMethodRef) -> bool {
        let method = nm.method();
        if !nm.make_zombie() {
            return false;
        }
        let registry = self.registry(guard);
        Self::detach(registry, method, nm);
        debug!("Made zombie: {}", nm);
        true
    }

    /// Remove `nm` from the method code table, the OSR lists and the dependency index, and
    /// forget its method.
    fn detach(registry: &mut Registry, method: Option<MethodRef>, nm: &NMethodRef) {
        Self::flush_dependencies(registry, nm);
        if let Some(method) = method {
            Self::clear_method_code(registry, method, nm);
        }
        if nm.is_osr_method() {
            Self::remove_osr(registry, nm);
        }
        nm.clear_method();
    }

    fn flush_dependencies(registry: &mut Registry, nm: &NMethodRef) {
        if !nm.set_has_flushed_dependencies() {
            return;
        }
        for klass in nm.dependency_context_types() {
            if let Some(list) = registry.dependents.get_mut(&klass) {
                list.remove(nm);
                if list.is_empty() {
                    registry.dependents.remove(&klass);
                }
            }
        }
    }

    /// Free a zombie or unloaded method. Returns false if it is locked or another thread
    /// already claimed it.
    pub fn flush_nmethod(&self, guard: &mut CodeCacheGuard, nm: &NMethodRef) -> bool {
        guarantee!(
            nm.is_zombie() || nm.is_unloaded(),
            "flushing {} which is still alive",
            nm
        );
        if !nm.try_claim_for_flush() {
            return false;
        }
        nm.exception_cache().clear();
        let registry = self.registry(guard);
        let method = nm.method();
        Self::detach(registry, method, nm);
        if nm.on_scavenge_root_list() {
            registry.scavenge_roots.remove(nm);
            nm.set_on_scavenge_root_list(false);
        }
        if nm.is_speculatively_disconnected() {
            registry.saved_nmethods.remove(nm);
            nm.set_speculatively_disconnected(false);
        }
        self.free(guard, nm.blob());
        debug!("Flushed {}", nm);
        true
    }

    /// The methods whose dependencies have `klass` as context.
    pub fn dependents_of(
        &self,
        guard: &mut CodeCacheGuard,
        klass: KlassRef,
    ) -> Vec<NMethodRef> {
        self.registry(guard)
            .dependents
            .get(&klass)
            .map(|list| list.iter().collect())
            .unwrap_or_default()
    }

    pub fn nof_blobs(&self) -> usize {
        self.nof_blobs.load(Ordering::Relaxed)
    }

    pub fn nof_nmethods(&self) -> usize {
        self.nof_nmethods.load(Ordering::Relaxed)
    }

    pub fn nof_adapters(&self) -> usize {
        self.nof_adapters.load(Ordering::Relaxed)
    }

    pub fn nof_nmethods_with_dependencies(&self) -> usize {
        self.nof_nmethods_with_dependencies.load(Ordering::Relaxed)
    }

    /// Committed bytes of the code heap.
    pub fn capacity(&self) -> usize {
        self.heap.capacity()
    }

    /// Reserved bytes of the code heap.
    pub fn max_capacity(&self) -> usize {
        self.heap.max_capacity()
    }

    pub fn unallocated_capacity(&self) -> usize {
        self.heap.unallocated_capacity()
    }

    pub fn largest_free_block(&self) -> usize {
        self.heap.largest_free_block()
    }

    /// Is less than the configured minimum of the reserved space left?
    pub fn is_almost_full(&self) -> bool {
        self.heap.max_capacity() - self.heap.allocated_capacity()
            < self.options.code_cache_minimum_free_space
    }

    /// How many allocations failed because the cache was full.
    pub fn full_count(&self) -> usize {
        self.full_count.load(Ordering::Relaxed)
    }

    /// Does the code cache hold inline caches to clean after a method in use was unloaded?
    pub fn needs_cache_clean(&self) -> bool {
        self.needs_cache_clean.load(Ordering::Acquire)
    }

    pub fn set_needs_cache_clean(&self, on: bool) {
        self.needs_cache_clean.store(on, Ordering::Release);
    }

    /// The number of completed sweeper stack traversals.
    pub fn traversal_count(&self) -> usize {
        self.traversals.load(Ordering::Acquire)
    }

    pub(crate) fn next_traversal(&self) -> usize {
        self.traversals.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn last_disconnect_traversal(&self) -> usize {
        self.last_disconnect_traversal.load(Ordering::Acquire)
    }

    /// Log a summary of the code cache at info level.
    pub fn print_summary(&self, guard: &mut CodeCacheGuard) {
        let stats = self.stats(guard);
        info!("{}", stats);
        debug!(
            "Code heap [{}, {}) committed up to {}, {} free",
            self.heap.low_boundary(),
            self.heap.high_boundary(),
            self.heap.high(),
            conversions::bytes_to_formatted_string(self.heap.unallocated_capacity())
        );
    }
}

impl<VM: VMBinding> Drop for CodeCache<VM> {
    fn drop(&mut self) {
        let starts: Vec<Address> = self.heap.iter().collect();
        for start in starts {
            let owner = self.heap.owner(start);
            if owner != 0 {
                self.heap.set_owner(start, 0);
                let blob = unsafe { Arc::from_raw(owner as *const CodeBlob) };
                blob.mark_freed();
            }
        }
    }
}
