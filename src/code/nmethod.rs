use super::blob::{CodeBlob, CodeBlobRef, CodeBuffer, OopSlot};
use super::dependencies::{DepArgument, Dependency};
use super::exception_cache::ExceptionCache;
use super::pc_desc::{PcDesc, PcDescTable};
use crate::util::constants::{
    INVALID_OSR_ENTRY_BCI, INVOCATION_ENTRY_BCI, PC_DESC_UPPER_OFFSET_LIMIT,
};
use crate::util::{Address, KlassRef, MethodRef, ObjectReference};
use crate::vm::{Collection, ObjectModel, VMBinding};

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// The lifecycle state of a compiled method. States only move forward:
/// `Alive` → `NotEntrant` → `Zombie`. Unloading is tracked separately, see
/// [`NMethod::is_unloaded`].
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NMethodState {
    /// Installed and callable.
    Alive = 0,
    /// New calls are refused. Activations already on a stack may still run.
    NotEntrant = 1,
    /// No activations remain. The method waits for the sweeper to free it.
    Zombie = 2,
}

impl NMethodState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => NMethodState::Alive,
            1 => NMethodState::NotEntrant,
            2 => NMethodState::Zombie,
            _ => unreachable!("bad nmethod state {}", raw),
        }
    }
}

/// Offsets of a compiled method's entry points. `entry`, `verified_entry` and
/// `osr_entry` are relative to the instructions. The handlers are relative to the stubs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryOffsets {
    pub entry: u32,
    pub verified_entry: u32,
    pub osr_entry: u32,
    pub exception_handler: Option<u32>,
    pub deopt_handler: Option<u32>,
}

/// A faulting instruction that the compiled code expects (a null check folded into a load,
/// for example) and where execution continues. Both are offsets into the instructions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImplicitException {
    pub exec_offset: u32,
    pub continuation_offset: u32,
}

/// Everything the compiler hands over to install a compiled method.
#[derive(Clone, Debug)]
pub struct NMethodDescriptor {
    pub method: MethodRef,
    pub compile_id: u32,
    pub comp_level: i32,
    /// The bytecode index of an on-stack-replacement entry, or [`INVOCATION_ENTRY_BCI`]
    /// for a normal method entry.
    pub entry_bci: i32,
    pub buffer: CodeBuffer,
    pub entry_offsets: EntryOffsets,
    /// The initial oop table. Relocations refer to it by index.
    pub oops: Vec<Option<ObjectReference>>,
    pub pc_descs: Vec<PcDesc>,
    pub dependencies: Vec<Dependency>,
    pub implicit_exceptions: Vec<ImplicitException>,
}

impl NMethodDescriptor {
    pub fn new(method: MethodRef, buffer: CodeBuffer) -> Self {
        NMethodDescriptor {
            method,
            compile_id: 0,
            comp_level: 0,
            entry_bci: INVOCATION_ENTRY_BCI,
            buffer,
            entry_offsets: EntryOffsets::default(),
            oops: vec![],
            pc_descs: vec![],
            dependencies: vec![],
            implicit_exceptions: vec![],
        }
    }

    pub fn is_osr(&self) -> bool {
        self.entry_bci != INVOCATION_ENTRY_BCI
    }
}

/// The high bit of the lock word. Set once the sweeper has claimed the method for
/// freeing; no lock may be taken after that.
const LOCK_FLUSHED: usize = 1 << (usize::BITS - 1);
/// Set in the lock word when the method becomes a zombie, in the same atomic step that
/// sees no lockers. Only zombie-ok lockers may lock after that.
const LOCK_ZOMBIE: usize = 1 << (usize::BITS - 2);
const LOCK_COUNT_MASK: usize = !(LOCK_FLUSHED | LOCK_ZOMBIE);

/// A compiled method: the metadata of a [`CodeBlob`] of kind
/// [`BlobKind::NMethod`](super::BlobKind::NMethod).
///
/// Everything here is shared between mutator threads, the collector and the sweeper, so
/// every mutable field is atomic. State changes are compare-and-swap and never go
/// backwards. Operations that need the blob's code or oop table are on [`NMethodRef`].
pub struct NMethod {
    method: AtomicUsize,
    compile_id: u32,
    comp_level: i32,
    osr: bool,
    entry_bci: AtomicI32,
    entry_offsets: EntryOffsets,

    state: AtomicU8,
    unloaded: AtomicBool,
    /// Locker count, plus the [`LOCK_ZOMBIE`] and [`LOCK_FLUSHED`] bits.
    lock_word: AtomicUsize,
    stack_traversal_mark: AtomicUsize,

    marked_for_deoptimization: AtomicBool,
    marked_for_reclamation: AtomicBool,
    has_flushed_dependencies: AtomicBool,
    speculatively_disconnected: AtomicBool,
    on_scavenge_root_list: AtomicBool,
    oops_do_mark: AtomicBool,

    pc_descs: PcDescTable,
    dependencies: Box<[Dependency]>,
    implicit_exceptions: Box<[ImplicitException]>,
    exception_cache: ExceptionCache,
}

impl NMethod {
    /// Build the metadata of a compiled method. Returns the code buffer and oop table for
    /// installing the blob.
    pub(crate) fn new(
        desc: NMethodDescriptor,
        exception_cache_size: usize,
    ) -> (NMethod, CodeBuffer, Vec<Option<ObjectReference>>) {
        let mut implicit_exceptions = desc.implicit_exceptions;
        implicit_exceptions.sort_by_key(|e| e.exec_offset);
        let nm = NMethod {
            method: AtomicUsize::new(desc.method.to_word()),
            compile_id: desc.compile_id,
            comp_level: desc.comp_level,
            osr: desc.entry_bci != INVOCATION_ENTRY_BCI,
            entry_bci: AtomicI32::new(desc.entry_bci),
            entry_offsets: desc.entry_offsets,
            state: AtomicU8::new(NMethodState::Alive as u8),
            unloaded: AtomicBool::new(false),
            lock_word: AtomicUsize::new(0),
            stack_traversal_mark: AtomicUsize::new(0),
            marked_for_deoptimization: AtomicBool::new(false),
            marked_for_reclamation: AtomicBool::new(false),
            has_flushed_dependencies: AtomicBool::new(false),
            speculatively_disconnected: AtomicBool::new(false),
            on_scavenge_root_list: AtomicBool::new(false),
            oops_do_mark: AtomicBool::new(false),
            pc_descs: PcDescTable::new(desc.pc_descs),
            dependencies: desc.dependencies.into_boxed_slice(),
            implicit_exceptions: implicit_exceptions.into_boxed_slice(),
            exception_cache: ExceptionCache::new(exception_cache_size),
        };
        (nm, desc.buffer, desc.oops)
    }

    /// The method this code was compiled for. `None` once the method is a zombie or unloaded.
    pub fn method(&self) -> Option<MethodRef> {
        MethodRef::from_word(self.method.load(Ordering::Acquire))
    }

    pub(crate) fn clear_method(&self) {
        self.method.store(0, Ordering::Release);
    }

    pub fn compile_id(&self) -> u32 {
        self.compile_id
    }

    pub fn comp_level(&self) -> i32 {
        self.comp_level
    }

    pub fn is_osr_method(&self) -> bool {
        self.osr
    }

    /// The OSR entry bci. [`INVALID_OSR_ENTRY_BCI`] once the entry is invalidated.
    pub fn osr_entry_bci(&self) -> i32 {
        debug_assert!(self.osr);
        self.entry_bci.load(Ordering::Acquire)
    }

    /// Stop OSR lookups from finding this method.
    pub fn invalidate_osr_entry(&self) {
        debug_assert!(self.osr);
        self.entry_bci.store(INVALID_OSR_ENTRY_BCI, Ordering::Release);
    }

    pub fn entry_offsets(&self) -> &EntryOffsets {
        &self.entry_offsets
    }

    pub fn state(&self) -> NMethodState {
        if self.lock_word.load(Ordering::Acquire) & LOCK_ZOMBIE != 0 {
            return NMethodState::Zombie;
        }
        NMethodState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Alive and not unloaded. Only methods in use may be entered.
    pub fn is_in_use(&self) -> bool {
        self.state() == NMethodState::Alive && !self.is_unloaded()
    }

    /// Neither a zombie nor unloaded.
    pub fn is_alive(&self) -> bool {
        self.state() != NMethodState::Zombie && !self.is_unloaded()
    }

    pub fn is_not_entrant(&self) -> bool {
        self.state() == NMethodState::NotEntrant
    }

    pub fn is_zombie(&self) -> bool {
        self.state() == NMethodState::Zombie
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded.load(Ordering::Acquire)
    }

    /// Move from `Alive` to `NotEntrant`, recording `traversal` as the last stack
    /// traversal this method was seen in. Returns false if the method was not alive.
    pub(crate) fn make_not_entrant(&self, traversal: usize) -> bool {
        if self.state() != NMethodState::Alive {
            return false;
        }
        self.mark_as_seen_on_stack(traversal);
        self.state
            .compare_exchange(
                NMethodState::Alive as u8,
                NMethodState::NotEntrant as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Zombie` from `NotEntrant`, or from `Alive` when unloaded. Refused while
    /// the method is locked.
    pub(crate) fn make_zombie(&self) -> bool {
        match self.state() {
            NMethodState::NotEntrant => {}
            NMethodState::Alive if self.is_unloaded() => {}
            _ => return false,
        }
        // Neither not entrant nor unloaded is ever undone, so only the lock word can still
        // refuse the transition.
        let claimed = self
            .lock_word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                if word & (LOCK_COUNT_MASK | LOCK_ZOMBIE | LOCK_FLUSHED) == 0 {
                    Some(word | LOCK_ZOMBIE)
                } else {
                    None
                }
            })
            .is_ok();
        if claimed {
            self.state.store(NMethodState::Zombie as u8, Ordering::Release);
        }
        claimed
    }

    pub(crate) fn make_unloaded(&self) -> bool {
        self.unloaded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn stack_traversal_mark(&self) -> usize {
        self.stack_traversal_mark.load(Ordering::Acquire)
    }

    pub fn mark_as_seen_on_stack(&self, traversal: usize) {
        self.stack_traversal_mark.store(traversal, Ordering::Release);
    }

    /// Can a not entrant method become a zombie at `traversal`? Only once a full stack
    /// traversal has gone by without seeing it.
    pub fn can_not_entrant_be_converted(&self, traversal: usize) -> bool {
        debug_assert!(self.is_not_entrant());
        self.stack_traversal_mark() + 1 < traversal
    }

    pub(crate) fn lock(&self, zombie_ok: bool) {
        let result = self
            .lock_word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                if word & LOCK_FLUSHED != 0 || (!zombie_ok && word & LOCK_ZOMBIE != 0) {
                    None
                } else {
                    Some(word + 1)
                }
            });
        if let Err(word) = result {
            if word & LOCK_FLUSHED != 0 {
                fatal!("locking flushed nmethod {}", self.compile_id);
            }
            fatal!("locking zombie nmethod {}", self.compile_id);
        }
    }

    pub(crate) fn unlock(&self) {
        let result = self
            .lock_word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                if word & LOCK_COUNT_MASK == 0 {
                    None
                } else {
                    Some(word - 1)
                }
            });
        guarantee!(
            result.is_ok(),
            "unbalanced unlock of nmethod {}",
            self.compile_id
        );
    }

    /// The number of outstanding [`NMethodLocker`](super::NMethodLocker)s.
    pub fn lock_count(&self) -> usize {
        self.lock_word.load(Ordering::Acquire) & LOCK_COUNT_MASK
    }

    /// Is the method pinned by a locker? Locked methods are neither zombified nor freed.
    pub fn is_locked_by_vm(&self) -> bool {
        self.lock_count() > 0
    }

    /// Claim the method for freeing. Fails if it is locked or already claimed.
    pub(crate) fn try_claim_for_flush(&self) -> bool {
        self.lock_word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                if word & (LOCK_COUNT_MASK | LOCK_FLUSHED) == 0 {
                    Some(word | LOCK_FLUSHED)
                } else {
                    None
                }
            })
            .is_ok()
    }

    pub fn is_flushed(&self) -> bool {
        self.lock_word.load(Ordering::Acquire) & LOCK_FLUSHED != 0
    }

    pub fn is_marked_for_deoptimization(&self) -> bool {
        self.marked_for_deoptimization.load(Ordering::Acquire)
    }

    pub fn mark_for_deoptimization(&self) {
        self.marked_for_deoptimization.store(true, Ordering::Release);
    }

    pub fn is_marked_for_reclamation(&self) -> bool {
        self.marked_for_reclamation.load(Ordering::Acquire)
    }

    pub(crate) fn mark_for_reclamation(&self) {
        debug_assert!(self.is_zombie() || self.is_unloaded());
        self.marked_for_reclamation.store(true, Ordering::Release);
    }

    pub fn has_flushed_dependencies(&self) -> bool {
        self.has_flushed_dependencies.load(Ordering::Acquire)
    }

    /// Returns true the first time only.
    pub(crate) fn set_has_flushed_dependencies(&self) -> bool {
        !self.has_flushed_dependencies.swap(true, Ordering::AcqRel)
    }

    pub fn is_speculatively_disconnected(&self) -> bool {
        self.speculatively_disconnected.load(Ordering::Acquire)
    }

    pub(crate) fn set_speculatively_disconnected(&self, on: bool) {
        self.speculatively_disconnected.store(on, Ordering::Release);
    }

    pub fn on_scavenge_root_list(&self) -> bool {
        self.on_scavenge_root_list.load(Ordering::Acquire)
    }

    pub(crate) fn set_on_scavenge_root_list(&self, on: bool) {
        self.on_scavenge_root_list.store(on, Ordering::Release);
    }

    /// Mark the method as visited in the current oops-do marking cycle. Returns true if it
    /// was already marked.
    pub fn test_set_oops_do_mark(&self) -> bool {
        self.oops_do_mark.swap(true, Ordering::AcqRel)
    }

    pub fn oops_do_marked(&self) -> bool {
        self.oops_do_mark.load(Ordering::Acquire)
    }

    pub(crate) fn clear_oops_do_mark(&self) {
        self.oops_do_mark.store(false, Ordering::Release);
    }

    pub fn pc_descs(&self) -> &PcDescTable {
        &self.pc_descs
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    /// Is any dependency of this method violated, according to `is_violated`?
    pub fn check_dependency_on<F>(&self, mut is_violated: F) -> bool
    where
        F: FnMut(&Dependency) -> bool,
    {
        self.dependencies.iter().any(|dep| is_violated(dep))
    }

    /// Does this method depend on a method that `is_obsolete` reports as redefined? The
    /// compiled method itself counts, as do evol_method dependencies.
    pub fn is_evol_dependent_on<F>(&self, mut is_obsolete: F) -> bool
    where
        F: FnMut(MethodRef) -> bool,
    {
        if self.method().is_some_and(&mut is_obsolete) {
            return true;
        }
        self.dependencies.iter().any(|dep| {
            dep.args().iter().any(|arg| match arg {
                DepArgument::Method(m) => is_obsolete(*m),
                _ => false,
            })
        })
    }

    /// Does this method have a dependency naming `method`?
    pub fn is_dependent_on_method(&self, method: MethodRef) -> bool {
        self.dependencies
            .iter()
            .any(|dep| dep.args().contains(&DepArgument::Method(method)))
    }

    /// The klasses this method's dependencies are indexed under.
    pub fn dependency_context_types(&self) -> impl Iterator<Item = KlassRef> + '_ {
        self.dependencies.iter().filter_map(Dependency::context_type)
    }

    pub fn dependencies_size(&self) -> usize {
        self.dependencies.iter().map(Dependency::size_in_bytes).sum()
    }

    pub fn implicit_exceptions(&self) -> &[ImplicitException] {
        &self.implicit_exceptions
    }

    /// The continuation offset for an implicit exception at `exec_offset`.
    pub fn continuation_offset_for(&self, exec_offset: u32) -> Option<u32> {
        self.implicit_exceptions
            .binary_search_by_key(&exec_offset, |e| e.exec_offset)
            .ok()
            .map(|i| self.implicit_exceptions[i].continuation_offset)
    }

    pub fn exception_cache(&self) -> &ExceptionCache {
        &self.exception_cache
    }
}

/// A compiled method in the code cache: a shared handle to a blob known to be an nmethod.
///
/// Derefs to the method's [`NMethod`] metadata and adds the operations that need the
/// blob's code or oop table.
#[derive(Clone)]
pub struct NMethodRef(CodeBlobRef);

impl NMethodRef {
    /// Returns `None` if the blob is not a compiled method.
    pub fn from_blob(blob: CodeBlobRef) -> Option<Self> {
        if blob.is_nmethod() {
            Some(NMethodRef(blob))
        } else {
            None
        }
    }

    pub fn blob(&self) -> &CodeBlobRef {
        &self.0
    }

    pub fn into_blob(self) -> CodeBlobRef {
        self.0
    }

    pub fn ptr_eq(a: &NMethodRef, b: &NMethodRef) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub fn entry_point(&self) -> Address {
        self.0.insts_begin() + self.entry_offsets().entry as usize
    }

    pub fn verified_entry_point(&self) -> Address {
        self.0.insts_begin() + self.entry_offsets().verified_entry as usize
    }

    pub fn osr_entry_point(&self) -> Option<Address> {
        if self.is_osr_method() {
            Some(self.0.insts_begin() + self.entry_offsets().osr_entry as usize)
        } else {
            None
        }
    }

    pub fn exception_begin(&self) -> Option<Address> {
        self.entry_offsets()
            .exception_handler
            .map(|offset| self.0.stubs_begin() + offset as usize)
    }

    pub fn deopt_handler_begin(&self) -> Option<Address> {
        self.entry_offsets()
            .deopt_handler
            .map(|offset| self.0.stubs_begin() + offset as usize)
    }

    /// Find the pc descriptor for `pc`, which must be in the method's code. See
    /// [`PcDescTable::find`] for what `approximate` means.
    pub fn find_pc_desc(&self, pc: Address, approximate: bool) -> Option<&PcDesc> {
        if !self.0.code_contains(pc) && pc != self.0.code_end() {
            return None;
        }
        let offset = pc - self.0.code_begin();
        if offset > PC_DESC_UPPER_OFFSET_LIMIT {
            return None;
        }
        self.pc_descs().find(offset as i32, approximate)
    }

    /// Where to continue after an expected fault at `pc`.
    pub fn continuation_for_implicit_exception(&self, pc: Address) -> Option<Address> {
        if !self.0.code_contains(pc) {
            return None;
        }
        let offset = (pc - self.0.code_begin()) as u32;
        self.continuation_offset_for(offset)
            .map(|c| self.0.code_begin() + c as usize)
    }

    /// A cached handler for `exception_type` thrown at `pc`.
    pub fn handler_for_exception_and_pc(
        &self,
        exception_type: KlassRef,
        pc: Address,
    ) -> Option<Address> {
        self.exception_cache().handler_for(exception_type, pc)
    }

    pub fn add_handler_for_exception_and_pc(
        &self,
        exception_type: KlassRef,
        pc: Address,
        handler: Address,
    ) {
        debug_assert!(self.0.content_contains(handler));
        self.exception_cache().add(exception_type, pc, handler);
    }

    /// The handler for `exception_type` thrown at `pc`. On a miss, `walk` searches the
    /// exception table and a handler it finds is cached.
    pub fn handler_for_exception_and_pc_or_compute<F>(
        &self,
        exception_type: KlassRef,
        pc: Address,
        walk: F,
    ) -> Option<Address>
    where
        F: FnOnce() -> Option<Address>,
    {
        self.exception_cache().handler_or_compute(exception_type, pc, walk)
    }

    /// The object in slot `index` of the oop table. `None` for a null slot, and for every
    /// slot once the method was flushed.
    pub fn oop_at(&self, index: usize) -> Option<ObjectReference> {
        self.0.oop_slot(index).and_then(|slot| slot.load())
    }

    /// Visit every slot of the oop table. The closure may update slots. A flushed method
    /// has no slots left to visit.
    pub fn oops_do<F>(&self, mut f: F)
    where
        F: FnMut(&OopSlot),
    {
        for slot in self.0.oop_slots() {
            f(&slot);
        }
    }

    /// Does the oop table refer to an object the VM may move in a scavenge?
    pub fn detect_scavenge_root_oops<VM: VMBinding>(&self) -> bool {
        self.0.oop_slots().any(|slot| {
            slot.load()
                .is_some_and(<VM::VMObjectModel as ObjectModel>::is_scavengable)
        })
    }

    /// Clean up after a collection that may have freed objects this method refers to.
    /// Exception cache entries for unloaded types are dropped when `unloading_occurred`.
    /// Returns true if the oop table refers to a dead object, meaning the method must be
    /// unloaded.
    pub fn do_unloading<VM: VMBinding, F>(&self, is_alive: &F, unloading_occurred: bool) -> bool
    where
        F: Fn(ObjectReference) -> bool,
    {
        debug_assert!(self.is_alive());
        if unloading_occurred {
            self.exception_cache().retain_types(|klass| {
                <VM::VMObjectModel as ObjectModel>::klass_holder(klass)
                    .map_or(true, |holder| is_alive(holder))
            });
        }
        for slot in self.0.oop_slots() {
            if let Some(object) = slot.load() {
                if !is_alive(object) {
                    debug!("{} refers to dead object {}", self, object);
                    return true;
                }
            }
        }
        false
    }

    /// Rewrite the object references embedded in instructions from the oop table, after
    /// the collector moved objects. Returns how many were patched.
    pub fn fix_oop_relocations<VM: VMBinding>(&self) -> usize {
        let patched = self.0.patch_oop_immediates();
        if patched > 0 {
            <VM::VMCollection as Collection>::flush_icache(
                self.0.insts_begin(),
                self.0.insts_size(),
            );
        }
        patched
    }

    /// Check that embedded references match the oop table.
    pub fn verify_oop_relocations(&self) {
        self.0.verify_oop_immediates();
    }

    pub fn total_size(&self) -> usize {
        self.0.size()
    }

    pub fn scopes_pcs_size(&self) -> usize {
        self.pc_descs().size_in_bytes()
    }
}

impl Deref for NMethodRef {
    type Target = NMethod;

    fn deref(&self) -> &NMethod {
        match self.0.as_nmethod() {
            Some(nm) => nm,
            None => unreachable!(),
        }
    }
}

impl PartialEq for NMethodRef {
    fn eq(&self, other: &Self) -> bool {
        NMethodRef::ptr_eq(self, other)
    }
}

impl Eq for NMethodRef {}

impl fmt::Display for NMethodRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "nmethod {}{} {} ({:?}) [{}, {})",
            self.compile_id(),
            if self.is_osr_method() { "%" } else { "" },
            self.0.name(),
            self.state(),
            self.0.header_begin(),
            self.0.end()
        )
    }
}

impl fmt::Debug for NMethodRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NMethodRef({})", self)
    }
}

impl AsRef<CodeBlob> for NMethodRef {
    fn as_ref(&self) -> &CodeBlob {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::blob::CodeBuffer;

    fn nmethod() -> NMethod {
        let desc = NMethodDescriptor::new(MethodRef::from_raw(0x100), CodeBuffer::new("m"));
        NMethod::new(desc, 4).0
    }

    #[test]
    fn forward_only_transitions() {
        let nm = nmethod();
        assert!(nm.is_in_use());
        assert!(!nm.make_zombie());
        assert!(nm.make_not_entrant(3));
        assert_eq!(nm.stack_traversal_mark(), 3);
        assert!(!nm.make_not_entrant(4));
        assert!(!nm.is_in_use());
        assert!(nm.is_alive());
        assert!(nm.make_zombie());
        assert!(!nm.make_zombie());
        assert!(!nm.make_not_entrant(5));
        assert_eq!(nm.state(), NMethodState::Zombie);
        assert!(!nm.is_alive());
    }

    #[test]
    fn unloaded_alive_may_become_zombie() {
        let nm = nmethod();
        assert!(nm.make_unloaded());
        assert!(!nm.make_unloaded());
        assert!(!nm.is_in_use());
        assert!(!nm.is_alive());
        assert_eq!(nm.state(), NMethodState::Alive);
        assert!(nm.make_zombie());
    }

    #[test]
    fn locked_method_is_not_zombified() {
        let nm = nmethod();
        assert!(nm.make_not_entrant(0));
        nm.lock(false);
        assert!(!nm.make_zombie());
        assert!(!nm.try_claim_for_flush());
        nm.unlock();
        assert!(nm.make_zombie());
        assert!(nm.try_claim_for_flush());
        assert!(nm.is_flushed());
        assert_eq!(nm.lock_count(), 0);
    }

    #[test]
    fn zombie_takes_only_zombie_ok_locks() {
        let nm = nmethod();
        assert!(nm.make_not_entrant(0));
        assert!(nm.make_zombie());
        nm.lock(true);
        assert_eq!(nm.lock_count(), 1);
        assert!(!nm.try_claim_for_flush());
        nm.unlock();
        assert_eq!(nm.state(), NMethodState::Zombie);
        assert!(nm.try_claim_for_flush());
    }

    #[test]
    #[should_panic(expected = "locking zombie")]
    fn plain_lock_of_zombie() {
        let nm = nmethod();
        assert!(nm.make_not_entrant(0));
        assert!(nm.make_zombie());
        nm.lock(false);
    }

    #[test]
    #[should_panic]
    fn unbalanced_unlock() {
        nmethod().unlock();
    }

    #[test]
    #[should_panic]
    fn lock_after_flush_claim() {
        let nm = nmethod();
        assert!(nm.try_claim_for_flush());
        nm.lock(true);
    }

    #[test]
    fn not_entrant_conversion_waits_a_traversal() {
        let nm = nmethod();
        assert!(nm.make_not_entrant(7));
        assert!(!nm.can_not_entrant_be_converted(7));
        assert!(!nm.can_not_entrant_be_converted(8));
        assert!(nm.can_not_entrant_be_converted(9));
    }

    #[test]
    fn dependency_queries() {
        let m = MethodRef::from_raw(0x200);
        let k = KlassRef::from_raw(0x300);
        let mut desc = NMethodDescriptor::new(MethodRef::from_raw(0x100), CodeBuffer::new("d"));
        desc.dependencies = vec![
            Dependency::unique_concrete_method(k, m),
            Dependency::leaf_type(k),
        ];
        let nm = NMethod::new(desc, 4).0;
        assert!(nm.is_dependent_on_method(m));
        assert!(!nm.is_dependent_on_method(MethodRef::from_raw(0x208)));
        assert!(nm.is_evol_dependent_on(|x| x == m));
        assert!(nm.is_evol_dependent_on(|x| x == MethodRef::from_raw(0x100)));
        assert!(!nm.is_evol_dependent_on(|_| false));
        assert_eq!(nm.dependency_context_types().collect::<Vec<_>>(), vec![k, k]);
        assert!(nm.check_dependency_on(|d| d.context_type() == Some(k)));
    }

    #[test]
    fn implicit_exception_lookup() {
        let mut desc = NMethodDescriptor::new(MethodRef::from_raw(0x100), CodeBuffer::new("i"));
        desc.implicit_exceptions = vec![
            ImplicitException {
                exec_offset: 20,
                continuation_offset: 60,
            },
            ImplicitException {
                exec_offset: 4,
                continuation_offset: 48,
            },
        ];
        let nm = NMethod::new(desc, 4).0;
        assert_eq!(nm.continuation_offset_for(4), Some(48));
        assert_eq!(nm.continuation_offset_for(20), Some(60));
        assert_eq!(nm.continuation_offset_for(8), None);
    }

    #[test]
    fn osr_entry_invalidation() {
        let mut desc = NMethodDescriptor::new(MethodRef::from_raw(0x100), CodeBuffer::new("o"));
        desc.entry_bci = 12;
        assert!(desc.is_osr());
        let nm = NMethod::new(desc, 4).0;
        assert!(nm.is_osr_method());
        assert_eq!(nm.osr_entry_bci(), 12);
        nm.invalidate_osr_entry();
        assert_eq!(nm.osr_entry_bci(), INVALID_OSR_ENTRY_BCI);
        assert!(nm.is_osr_method());
    }
}
