use super::nmethod::NMethod;
use super::oop_map::OopMapSet;
use super::relocation::{self, RelocIterator, Relocation};
use crate::util::constants::{BYTES_IN_WORD, CODE_ENTRY_ALIGNMENT};
use crate::util::conversions::raw_align_up;
use crate::util::{Address, ObjectReference};

use enum_map::Enum;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, IntoStaticStr};

/// A shared handle to a blob. The code heap holds one of these for every committed blob
/// until the blob is freed.
pub type CodeBlobRef = Arc<CodeBlob>;

/// The category of a blob, for statistics and for the tag in the blob's header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BlobType {
    NMethod,
    Buffer,
    Adapter,
    MethodHandlesAdapter,
    RuntimeStub,
    Deoptimization,
    UncommonTrap,
    Exception,
    Safepoint,
}

const BLOB_TAG_MAGIC: u32 = 0xB10B_0000;

impl BlobType {
    pub(crate) fn tag(self) -> u32 {
        BLOB_TAG_MAGIC | self as u32
    }

    pub(crate) fn from_tag(tag: u32) -> Option<BlobType> {
        if tag & 0xFFFF_0000 != BLOB_TAG_MAGIC {
            return None;
        }
        BlobType::iter().nth((tag & 0xFFFF) as usize)
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// What a blob is, with the data particular to that kind.
pub enum BlobKind {
    /// A compiled method.
    NMethod(NMethod),
    /// Scratch code, such as interpreter pieces or code being assembled.
    Buffer,
    /// An adapter between the interpreter's and compiled code's calling conventions.
    Adapter,
    /// An adapter for method handle invocation.
    MethodHandlesAdapter,
    /// A stub calling into the runtime.
    RuntimeStub { caller_must_gc_arguments: bool },
    /// The entry points used when deoptimizing a frame. Offsets are into the instructions.
    Deoptimization {
        unpack_offset: u32,
        unpack_with_exception_offset: u32,
        unpack_with_reexecution_offset: u32,
    },
    /// The stub entered on an uncommon trap.
    UncommonTrap,
    /// The stub that dispatches exceptions thrown from compiled code.
    Exception,
    /// The stub a thread enters when stopped at a safepoint poll.
    Safepoint,
}

impl BlobKind {
    pub fn blob_type(&self) -> BlobType {
        match self {
            BlobKind::NMethod(_) => BlobType::NMethod,
            BlobKind::Buffer => BlobType::Buffer,
            BlobKind::Adapter => BlobType::Adapter,
            BlobKind::MethodHandlesAdapter => BlobType::MethodHandlesAdapter,
            BlobKind::RuntimeStub { .. } => BlobType::RuntimeStub,
            BlobKind::Deoptimization { .. } => BlobType::Deoptimization,
            BlobKind::UncommonTrap => BlobType::UncommonTrap,
            BlobKind::Exception => BlobType::Exception,
            BlobKind::Safepoint => BlobType::Safepoint,
        }
    }
}

/// Compiler output that a blob is built from.
#[derive(Clone, Debug, Default)]
pub struct CodeBuffer {
    pub name: String,
    /// Constants the instructions refer to.
    pub consts: Vec<u8>,
    /// The instructions.
    pub insts: Vec<u8>,
    /// Out-of-line stubs: exception and deoptimization handlers, call trampolines.
    pub stubs: Vec<u8>,
    pub relocations: Vec<Relocation>,
    pub oop_maps: Option<OopMapSet>,
    /// Frame size in words.
    pub frame_size: usize,
    /// Offset in the instructions after which the frame is fully built.
    pub frame_complete_offset: Option<u32>,
}

impl CodeBuffer {
    pub fn new(name: impl Into<String>) -> Self {
        CodeBuffer {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// The header every blob starts with in the code heap.
#[repr(C)]
#[derive(Copy, Clone)]
struct BlobHeader {
    tag: u32,
    header_size: u32,
    size: u64,
}

/// Bytes of the header at the start of every blob.
pub const BLOB_HEADER_SIZE: usize = std::mem::size_of::<BlobHeader>();

const_assert_eq!(BLOB_HEADER_SIZE, 16);

/// Where each section of a blob sits, as byte offsets from the start of the blob.
///
/// A blob is laid out as header, relocations, constants, instructions, stubs and, for
/// compiled methods, the oop table. Constants and instructions start on a code entry
/// boundary. Everything else is word aligned.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobLayout {
    pub size: usize,
    pub relocation_offset: usize,
    pub relocation_size: usize,
    pub consts_offset: usize,
    pub consts_size: usize,
    pub insts_offset: usize,
    pub insts_size: usize,
    pub stubs_offset: usize,
    pub stubs_size: usize,
    pub oops_offset: usize,
    pub oops_count: usize,
}

impl BlobLayout {
    pub fn compute(buffer: &CodeBuffer, oops_count: usize) -> Self {
        let relocation_offset = BLOB_HEADER_SIZE;
        let relocation_size = relocation::encoded_size(&buffer.relocations);
        let consts_offset = raw_align_up(relocation_offset + relocation_size, CODE_ENTRY_ALIGNMENT);
        let insts_offset = raw_align_up(consts_offset + buffer.consts.len(), CODE_ENTRY_ALIGNMENT);
        let stubs_offset = raw_align_up(insts_offset + buffer.insts.len(), BYTES_IN_WORD);
        let oops_offset = raw_align_up(stubs_offset + buffer.stubs.len(), BYTES_IN_WORD);
        let size = oops_offset + oops_count * BYTES_IN_WORD;
        BlobLayout {
            size,
            relocation_offset,
            relocation_size,
            consts_offset,
            consts_size: buffer.consts.len(),
            insts_offset,
            insts_size: buffer.insts.len(),
            stubs_offset,
            stubs_size: buffer.stubs.len(),
            oops_offset,
            oops_count,
        }
    }

    /// A layout with only instruction space, `size` bytes in total.
    pub(crate) fn for_total_size(size: usize) -> Self {
        let size = raw_align_up(size.max(BLOB_HEADER_SIZE), BYTES_IN_WORD);
        BlobLayout {
            size,
            relocation_offset: BLOB_HEADER_SIZE,
            consts_offset: BLOB_HEADER_SIZE,
            insts_offset: BLOB_HEADER_SIZE,
            insts_size: size - BLOB_HEADER_SIZE,
            stubs_offset: size,
            oops_offset: size,
            ..Default::default()
        }
    }
}

/// A reference slot in a compiled method's oop table. The collector reads and updates
/// slots through [`OopSlot::load`] and [`OopSlot::store`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OopSlot(Address);

impl OopSlot {
    pub fn address(&self) -> Address {
        self.0
    }

    pub fn load(&self) -> Option<ObjectReference> {
        let word = unsafe { self.0.atomic_load::<AtomicUsize>(Ordering::Relaxed) };
        ObjectReference::option_from_word(word)
    }

    pub fn store(&self, object: Option<ObjectReference>) {
        let word = ObjectReference::option_to_word(object);
        unsafe { self.0.atomic_store::<AtomicUsize>(word, Ordering::Relaxed) }
    }
}

const BLOB_UNPUBLISHED: u8 = 0;
const BLOB_PUBLISHED: u8 = 1;
const BLOB_FREED: u8 = 2;

/// A piece of generated code in the code heap, with its metadata.
///
/// The machine code, relocations and oop table live in the heap at
/// `[header_begin, end)`. Everything else lives in this struct.
pub struct CodeBlob {
    name: String,
    kind: BlobKind,
    header_begin: Address,
    layout: BlobLayout,
    frame_size: usize,
    frame_complete_offset: Option<u32>,
    oop_maps: Option<OopMapSet>,
    publication: AtomicU8,
}

impl CodeBlob {
    /// Write a blob into `space`, which must have room for `layout.size` bytes.
    pub(crate) fn install(
        space: Address,
        buffer: CodeBuffer,
        kind: BlobKind,
        layout: BlobLayout,
        oops: &[Option<ObjectReference>],
    ) -> CodeBlob {
        debug_assert_eq!(oops.len(), layout.oops_count);
        unsafe {
            space.store(BlobHeader {
                tag: kind.blob_type().tag(),
                header_size: BLOB_HEADER_SIZE as u32,
                size: layout.size as u64,
            });
        }
        relocation::write_relocations(space + layout.relocation_offset, &buffer.relocations);
        for (offset, bytes) in [
            (layout.consts_offset, &buffer.consts),
            (layout.insts_offset, &buffer.insts),
            (layout.stubs_offset, &buffer.stubs),
        ] {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    bytes.as_ptr(),
                    (space + offset).to_mut_ptr::<u8>(),
                    bytes.len(),
                );
            }
        }

        let blob = CodeBlob {
            name: buffer.name,
            kind,
            header_begin: space,
            layout,
            frame_size: buffer.frame_size,
            frame_complete_offset: buffer.frame_complete_offset,
            oop_maps: buffer.oop_maps,
            publication: AtomicU8::new(BLOB_UNPUBLISHED),
        };
        for (slot, oop) in blob.oop_slots().zip(oops) {
            slot.store(*oop);
        }
        blob.check_relocations();
        blob.patch_oop_immediates();
        blob
    }

    fn check_relocations(&self) {
        for reloc in self.relocations() {
            let end = reloc.offset() as usize
                + match reloc {
                    Relocation::Oop { .. } => BYTES_IN_WORD,
                    _ => 1,
                };
            guarantee!(
                end <= self.layout.insts_size,
                "relocation {:?} outside the instructions of {}",
                reloc,
                self.name
            );
            if let Relocation::Oop { index, .. } = reloc {
                guarantee!(
                    (index as usize) < self.layout.oops_count,
                    "relocation {:?} refers past the oop table of {}",
                    reloc,
                    self.name
                );
            }
        }
    }

    /// Write the current oop table values into the immediates that embed them. Returns how
    /// many immediates changed.
    pub(crate) fn patch_oop_immediates(&self) -> usize {
        let mut patched = 0;
        for reloc in self.relocations() {
            if let Relocation::Oop { offset, index } = reloc {
                let at = self.insts_begin() + offset as usize;
                let value = self.oop_word(index as usize);
                if relocation::read_immediate(at) != value {
                    relocation::write_immediate(at, value);
                    patched += 1;
                }
            }
        }
        patched
    }

    fn oop_word(&self, index: usize) -> usize {
        ObjectReference::option_to_word(self.oop_slot(index).and_then(|slot| slot.load()))
    }

    /// Check that every embedded immediate matches its oop table slot.
    pub(crate) fn verify_oop_immediates(&self) {
        for reloc in self.relocations() {
            if let Relocation::Oop { offset, index } = reloc {
                let at = self.insts_begin() + offset as usize;
                let expected = self.oop_word(index as usize);
                guarantee!(
                    relocation::read_immediate(at) == expected,
                    "stale embedded oop at {} in {}",
                    at,
                    self
                );
            }
        }
    }

    /// Check the in-heap header against this blob.
    pub(crate) fn verify_header(&self) {
        let header = unsafe { self.header_begin.load::<BlobHeader>() };
        guarantee!(
            BlobType::from_tag(header.tag) == Some(self.blob_type()),
            "blob header tag {:#x} does not match {}",
            header.tag,
            self
        );
        guarantee!(
            header.size as usize == self.layout.size
                && header.header_size as usize == BLOB_HEADER_SIZE,
            "blob header size {} does not match {}",
            header.size,
            self
        );
    }

    pub(crate) fn mark_published(&self) -> bool {
        self.publication
            .compare_exchange(
                BLOB_UNPUBLISHED,
                BLOB_PUBLISHED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Mark the blob freed. Returns whether it was published.
    pub(crate) fn mark_freed(&self) -> bool {
        let previous = self.publication.swap(BLOB_FREED, Ordering::AcqRel);
        guarantee!(previous != BLOB_FREED, "double free of {}", self);
        previous == BLOB_PUBLISHED
    }

    /// Is the blob committed and visible to lookups?
    pub fn is_published(&self) -> bool {
        self.publication.load(Ordering::Acquire) == BLOB_PUBLISHED
    }

    /// Has the blob's space been returned to the heap? Holders of a freed blob may still
    /// read its metadata, but not its code.
    pub fn is_freed(&self) -> bool {
        self.publication.load(Ordering::Acquire) == BLOB_FREED
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &BlobKind {
        &self.kind
    }

    pub fn blob_type(&self) -> BlobType {
        self.kind.blob_type()
    }

    pub fn as_nmethod(&self) -> Option<&NMethod> {
        match &self.kind {
            BlobKind::NMethod(nm) => Some(nm),
            _ => None,
        }
    }

    pub fn is_nmethod(&self) -> bool {
        matches!(self.kind, BlobKind::NMethod(_))
    }

    pub fn is_buffer_blob(&self) -> bool {
        matches!(self.kind, BlobKind::Buffer)
    }

    pub fn is_adapter_blob(&self) -> bool {
        matches!(self.kind, BlobKind::Adapter)
    }

    pub fn is_method_handles_adapter_blob(&self) -> bool {
        matches!(self.kind, BlobKind::MethodHandlesAdapter)
    }

    pub fn is_runtime_stub(&self) -> bool {
        matches!(self.kind, BlobKind::RuntimeStub { .. })
    }

    pub fn is_deoptimization_stub(&self) -> bool {
        matches!(self.kind, BlobKind::Deoptimization { .. })
    }

    pub fn is_uncommon_trap_stub(&self) -> bool {
        matches!(self.kind, BlobKind::UncommonTrap)
    }

    pub fn is_exception_stub(&self) -> bool {
        matches!(self.kind, BlobKind::Exception)
    }

    pub fn is_safepoint_stub(&self) -> bool {
        matches!(self.kind, BlobKind::Safepoint)
    }

    /// Does a runtime stub need the collector to visit its caller's outgoing arguments?
    pub fn caller_must_gc_arguments(&self) -> bool {
        matches!(
            self.kind,
            BlobKind::RuntimeStub {
                caller_must_gc_arguments: true
            }
        )
    }

    pub fn layout(&self) -> &BlobLayout {
        &self.layout
    }

    pub fn header_begin(&self) -> Address {
        self.header_begin
    }

    pub fn header_size(&self) -> usize {
        BLOB_HEADER_SIZE
    }

    pub fn end(&self) -> Address {
        self.header_begin + self.layout.size
    }

    pub fn size(&self) -> usize {
        self.layout.size
    }

    pub fn relocation_begin(&self) -> Address {
        self.header_begin + self.layout.relocation_offset
    }

    pub fn relocation_end(&self) -> Address {
        self.relocation_begin() + self.layout.relocation_size
    }

    pub fn relocation_size(&self) -> usize {
        self.layout.relocation_size
    }

    /// The relocation records. Empty once the blob was freed.
    pub fn relocations(&self) -> RelocIterator<'_> {
        if self.is_freed() {
            return RelocIterator::new(&[]);
        }
        let bytes = unsafe {
            std::slice::from_raw_parts(
                self.relocation_begin().to_ptr::<u8>(),
                self.layout.relocation_size,
            )
        };
        RelocIterator::new(bytes)
    }

    pub fn content_begin(&self) -> Address {
        self.consts_begin()
    }

    pub fn content_end(&self) -> Address {
        self.stubs_end()
    }

    pub fn content_size(&self) -> usize {
        self.content_end() - self.content_begin()
    }

    pub fn consts_begin(&self) -> Address {
        self.header_begin + self.layout.consts_offset
    }

    pub fn consts_end(&self) -> Address {
        self.consts_begin() + self.layout.consts_size
    }

    pub fn consts_size(&self) -> usize {
        self.layout.consts_size
    }

    pub fn insts_begin(&self) -> Address {
        self.header_begin + self.layout.insts_offset
    }

    pub fn insts_end(&self) -> Address {
        self.insts_begin() + self.layout.insts_size
    }

    pub fn insts_size(&self) -> usize {
        self.layout.insts_size
    }

    pub fn code_begin(&self) -> Address {
        self.insts_begin()
    }

    pub fn code_end(&self) -> Address {
        self.insts_end()
    }

    pub fn stubs_begin(&self) -> Address {
        self.header_begin + self.layout.stubs_offset
    }

    pub fn stubs_end(&self) -> Address {
        self.stubs_begin() + self.layout.stubs_size
    }

    pub fn stubs_size(&self) -> usize {
        self.layout.stubs_size
    }

    pub fn oops_begin(&self) -> Address {
        self.header_begin + self.layout.oops_offset
    }

    pub fn oops_end(&self) -> Address {
        self.oops_begin() + self.oops_size()
    }

    pub fn oops_size(&self) -> usize {
        self.layout.oops_count * BYTES_IN_WORD
    }

    pub fn oops_count(&self) -> usize {
        self.layout.oops_count
    }

    /// The slot at `index` of the oop table. `None` if the index is out of range or the
    /// blob was freed, as its space may belong to another blob by now.
    pub fn oop_slot(&self, index: usize) -> Option<OopSlot> {
        if index >= self.layout.oops_count || self.is_freed() {
            return None;
        }
        Some(OopSlot(self.oops_begin() + index * BYTES_IN_WORD))
    }

    /// The slots of the oop table, or none at all once the blob was freed. Slots must not
    /// be kept beyond the caller's exclusion against [`crate::CodeCache::free`].
    pub fn oop_slots(&self) -> impl Iterator<Item = OopSlot> + '_ {
        let count = if self.is_freed() {
            0
        } else {
            self.layout.oops_count
        };
        (0..count).map(move |i| OopSlot(self.oops_begin() + i * BYTES_IN_WORD))
    }

    pub fn blob_contains(&self, addr: Address) -> bool {
        addr.is_in_range(self.header_begin, self.end())
    }

    pub fn content_contains(&self, addr: Address) -> bool {
        addr.is_in_range(self.content_begin(), self.content_end())
    }

    pub fn code_contains(&self, addr: Address) -> bool {
        addr.is_in_range(self.code_begin(), self.code_end())
    }

    /// Frame size in words.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frame_complete_offset(&self) -> Option<u32> {
        self.frame_complete_offset
    }

    pub fn oop_maps(&self) -> Option<&OopMapSet> {
        self.oop_maps.as_ref()
    }
}

impl fmt::Display for CodeBlob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} [{}, {})",
            self.blob_type().name(),
            self.name,
            self.header_begin,
            self.end()
        )
    }
}

impl fmt::Debug for CodeBlob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CodeBlob({})", self)
    }
}
