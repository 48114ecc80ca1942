//! Code blobs and compiled methods.
//!
//! A [`CodeBlob`] is a piece of generated code in the code heap together with its
//! metadata. Compiled methods are blobs of kind [`BlobKind::NMethod`] and are usually
//! handled through [`NMethodRef`]. The per-method tables (pc descriptors, exception
//! handler caches, dependencies, relocations, oop maps) live in the submodules.

mod blob;
mod dependencies;
mod exception_cache;
mod nmethod;
mod nmethod_list;
mod nmethod_locker;
mod oop_map;
mod pc_desc;
mod relocation;

pub use self::blob::{
    BlobKind, BlobLayout, BlobType, CodeBlob, CodeBlobRef, CodeBuffer, OopSlot, BLOB_HEADER_SIZE,
};
pub use self::dependencies::{DepArgument, Dependency, DependencyType};
pub use self::exception_cache::ExceptionCache;
pub use self::nmethod::{
    EntryOffsets, ImplicitException, NMethod, NMethodDescriptor, NMethodRef, NMethodState,
};
pub use self::nmethod_list::NMethodList;
pub use self::nmethod_locker::NMethodLocker;
pub use self::oop_map::{OopMap, OopMapLocation, OopMapSet, OopMapValue, OopMapValueKind};
pub use self::pc_desc::{PcDesc, PcDescStats, PcDescTable};
pub use self::relocation::{RelocIterator, Relocation, RELOCATION_RECORD_SIZE};
