//! A binding for tests. Objects and classes are plain numbers: the address of an object
//! decides which generation it is in, and every class is kept alive by an object at the
//! same address, except the low "boot" classes which are never unloaded.

use crate::cache::CodeCache;
use crate::code::{CodeBuffer, NMethodDescriptor, PcDesc, Relocation};
use crate::util::constants::INVOCATION_ENTRY_BCI;
use crate::util::options::Options;
use crate::util::{Address, KlassRef, MethodRef, ObjectReference};
use crate::vm::{Collection, ObjectModel, VMBinding};

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Object addresses in this range belong to the young generation.
pub const YOUNG_SPACE: Range<usize> = 0x1000_0000..0x2000_0000;
/// Object addresses in this range belong to the old generation.
pub const OLD_SPACE: Range<usize> = 0x2000_0000..0x3000_0000;
/// Classes below this address have no holder and are never unloaded.
pub const BOOT_KLASS_LIMIT: usize = 0x1_0000;

static CODE_CACHE_FULL_COUNT: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
pub struct MockVM;

impl VMBinding for MockVM {
    type VMObjectModel = MockVM;
    type VMCollection = MockVM;
}

impl ObjectModel for MockVM {
    fn is_scavengable(object: ObjectReference) -> bool {
        YOUNG_SPACE.contains(&object.to_raw_address().as_usize())
    }

    fn klass_holder(klass: KlassRef) -> Option<ObjectReference> {
        if klass.to_address().as_usize() < BOOT_KLASS_LIMIT {
            None
        } else {
            ObjectReference::from_raw_address(klass.to_address())
        }
    }
}

impl Collection for MockVM {
    fn code_cache_full(_failed_size: usize) {
        CODE_CACHE_FULL_COUNT.fetch_add(1, Ordering::SeqCst);
    }
}

/// How many times any mock code cache reported itself full.
pub fn code_cache_full_count() -> usize {
    CODE_CACHE_FULL_COUNT.load(Ordering::SeqCst)
}

/// The `n`th object of the young generation.
pub fn young_object(n: usize) -> ObjectReference {
    object_at(YOUNG_SPACE.start + n * 16)
}

/// The `n`th object of the old generation.
pub fn old_object(n: usize) -> ObjectReference {
    object_at(OLD_SPACE.start + n * 16)
}

fn object_at(raw: usize) -> ObjectReference {
    ObjectReference::from_raw_address(unsafe { Address::from_usize(raw) }).unwrap()
}

/// A class kept alive by the old object at the same address.
pub fn klass(n: usize) -> KlassRef {
    KlassRef::from_raw(OLD_SPACE.start + n * 16)
}

/// A class that is never unloaded.
pub fn boot_klass(n: usize) -> KlassRef {
    KlassRef::from_raw(0x100 + n * 16)
}

pub fn method(n: usize) -> MethodRef {
    MethodRef::from_raw(0x4000_0000 + n * 16)
}

/// Options for a small cache that tests can fill up quickly.
pub fn small_options() -> Options {
    let mut options = Options::builtin_defaults();
    options.reserved_code_cache_size = 256 * 1024;
    options.initial_code_cache_size = 64 * 1024;
    options.code_cache_expansion_size = 32 * 1024;
    options
}

pub fn small_code_cache() -> CodeCache<MockVM> {
    CodeCache::new(small_options()).unwrap()
}

/// A compiled method with `insts_size` bytes of code, one immediate oop per entry of `oops`
/// and a few pc descriptors.
pub fn nmethod_descriptor(
    method_id: usize,
    insts_size: usize,
    oops: Vec<Option<ObjectReference>>,
) -> NMethodDescriptor {
    let mut buffer = CodeBuffer::new(format!("method{}", method_id));
    buffer.insts = vec![0x90; insts_size.max(oops.len() * 16 + 16)];
    buffer.stubs = vec![0xcc; 16];
    for index in 0..oops.len() {
        buffer.relocations.push(Relocation::Oop {
            offset: (index * 16) as u32,
            index: index as u32,
        });
    }
    let mut desc = NMethodDescriptor::new(method(method_id), buffer);
    desc.compile_id = method_id as u32;
    desc.entry_bci = INVOCATION_ENTRY_BCI;
    desc.oops = oops;
    desc.pc_descs = vec![
        PcDesc::new(0, 0, 0),
        PcDesc::new(8, 4, 0),
        PcDesc::new(24, 8, 1),
        PcDesc::new(40, 12, 2),
    ];
    desc
}
