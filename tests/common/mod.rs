#![allow(dead_code)]

use codecache::code::{CodeBuffer, NMethodDescriptor, PcDesc, Relocation};
use codecache::util::options::Options;
use codecache::util::{Address, KlassRef, MethodRef, ObjectReference};
use codecache::vm::{Collection, ObjectModel, VMBinding};
use codecache::CodeCache;

/// Objects below this address are in the nursery.
pub const NURSERY_END: usize = 0x2000_0000;

#[derive(Default)]
pub struct TestVM;

impl VMBinding for TestVM {
    type VMObjectModel = TestVM;
    type VMCollection = TestVM;
}

impl ObjectModel for TestVM {
    fn is_scavengable(object: ObjectReference) -> bool {
        object.to_raw_address().as_usize() < NURSERY_END
    }

    fn klass_holder(klass: KlassRef) -> Option<ObjectReference> {
        ObjectReference::from_raw_address(klass.to_address())
    }
}

impl Collection for TestVM {}

pub fn young(n: usize) -> ObjectReference {
    object(0x1000_0000 + n * 16)
}

pub fn old(n: usize) -> ObjectReference {
    object(NURSERY_END + n * 16)
}

fn object(raw: usize) -> ObjectReference {
    ObjectReference::from_raw_address(unsafe { Address::from_usize(raw) }).unwrap()
}

pub fn method(n: usize) -> MethodRef {
    MethodRef::from_raw(0x7000_0000 + n * 16)
}

pub fn options() -> Options {
    let mut options = Options::builtin_defaults();
    options.reserved_code_cache_size = 1 << 20;
    options.initial_code_cache_size = 128 << 10;
    options
}

pub fn code_cache() -> CodeCache<TestVM> {
    CodeCache::new(options()).unwrap()
}

/// A compiled method for `method(id)` whose code embeds each of `oops`.
pub fn descriptor(id: usize, oops: Vec<Option<ObjectReference>>) -> NMethodDescriptor {
    let mut buffer = CodeBuffer::new(format!("test{}", id));
    buffer.insts = vec![0x90; 64 + oops.len() * 8];
    for index in 0..oops.len() {
        buffer.relocations.push(Relocation::Oop {
            offset: (64 + index * 8) as u32,
            index: index as u32,
        });
    }
    let mut desc = NMethodDescriptor::new(method(id), buffer);
    desc.compile_id = id as u32;
    desc.oops = oops;
    desc.pc_descs = vec![PcDesc::new(4, 0, 0), PcDesc::new(32, 8, 0)];
    desc
}
