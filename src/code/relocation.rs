//! Relocation records describe the places in generated instructions that the code cache
//! must revisit after the code is installed: embedded object references, calls, safepoint
//! polls and pointers into the blob itself.
//!
//! Records are stored in the blob's relocation section as fixed-size plain-old-data
//! entries, in the order the compiler emitted them.

use crate::util::Address;
use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct RelocRecord {
    kind: u32,
    offset: u32,
    data: u32,
    _reserved: u32,
}

/// The bytes one relocation occupies in a blob.
pub const RELOCATION_RECORD_SIZE: usize = std::mem::size_of::<RelocRecord>();

const KIND_OOP: u32 = 1;
const KIND_CALL: u32 = 2;
const KIND_POLL: u32 = 3;
const KIND_POLL_RETURN: u32 = 4;
const KIND_INTERNAL: u32 = 5;

/// One relocation. Offsets are relative to the start of the blob's instructions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Relocation {
    /// A word-sized immediate at `offset` holding the object in slot `index` of the
    /// compiled method's oop table.
    Oop { offset: u32, index: u32 },
    /// A call instruction.
    Call { offset: u32 },
    /// A safepoint poll.
    Poll { offset: u32 },
    /// A safepoint poll on method return.
    PollReturn { offset: u32 },
    /// A pointer to `target`, another offset in the same instructions.
    Internal { offset: u32, target: u32 },
}

impl Relocation {
    /// The offset of the relocated instruction.
    pub fn offset(&self) -> u32 {
        match *self {
            Relocation::Oop { offset, .. }
            | Relocation::Call { offset }
            | Relocation::Poll { offset }
            | Relocation::PollReturn { offset }
            | Relocation::Internal { offset, .. } => offset,
        }
    }

    fn encode(&self) -> RelocRecord {
        let (kind, data) = match *self {
            Relocation::Oop { index, .. } => (KIND_OOP, index),
            Relocation::Call { .. } => (KIND_CALL, 0),
            Relocation::Poll { .. } => (KIND_POLL, 0),
            Relocation::PollReturn { .. } => (KIND_POLL_RETURN, 0),
            Relocation::Internal { target, .. } => (KIND_INTERNAL, target),
        };
        RelocRecord {
            kind,
            offset: self.offset(),
            data,
            _reserved: 0,
        }
    }

    fn decode(record: &RelocRecord) -> Relocation {
        let offset = record.offset;
        match record.kind {
            KIND_OOP => Relocation::Oop {
                offset,
                index: record.data,
            },
            KIND_CALL => Relocation::Call { offset },
            KIND_POLL => Relocation::Poll { offset },
            KIND_POLL_RETURN => Relocation::PollReturn { offset },
            KIND_INTERNAL => Relocation::Internal {
                offset,
                target: record.data,
            },
            kind => fatal!("corrupt relocation record of kind {} at offset {}", kind, offset),
        }
    }
}

/// The bytes needed to store `relocations`.
pub fn encoded_size(relocations: &[Relocation]) -> usize {
    relocations.len() * RELOCATION_RECORD_SIZE
}

/// Write `relocations` to `dst`, which must have room for [`encoded_size`] bytes and be
/// aligned to 4 bytes.
pub(crate) fn write_relocations(dst: Address, relocations: &[Relocation]) {
    let records: Vec<RelocRecord> = relocations.iter().map(Relocation::encode).collect();
    let bytes: &[u8] = bytemuck::cast_slice(&records);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.to_mut_ptr::<u8>(), bytes.len());
    }
}

/// Iterates over the relocations stored in a relocation section.
pub struct RelocIterator<'a> {
    records: std::slice::Iter<'a, RelocRecord>,
}

impl<'a> RelocIterator<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        RelocIterator {
            records: bytemuck::cast_slice::<u8, RelocRecord>(bytes).iter(),
        }
    }
}

impl Iterator for RelocIterator<'_> {
    type Item = Relocation;

    fn next(&mut self) -> Option<Relocation> {
        self.records.next().map(Relocation::decode)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

/// The word-sized immediate an oop relocation patches.
pub(crate) fn read_immediate(at: Address) -> usize {
    unsafe { std::ptr::read_unaligned(at.to_ptr::<usize>()) }
}

pub(crate) fn write_immediate(at: Address, value: usize) {
    unsafe { std::ptr::write_unaligned(at.to_mut_ptr::<usize>(), value) }
}
