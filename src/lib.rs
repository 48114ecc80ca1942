//! A managed code cache for just-in-time compiled code.
//!
//! The crate manages a bounded, executable memory arena holding machine-code objects
//! (code blobs) produced by a just-in-time compiler. Compiled methods (nmethods) are
//! tracked through a forward-only lifecycle (alive → not entrant → zombie, plus an
//! orthogonal unloaded flag) relative to a garbage-collected object heap. The cache
//! coordinates safe reclamation with a collector and a background sweeper, and keeps
//! auxiliary indices (exception handler caches, pc-descriptor caches, dependency lists,
//! scavenge roots, speculatively disconnected code) under a strict locking discipline.
//!
//! The main entry point is [`CodeCache`]. A VM plugs in its object model and collection
//! policy by implementing [`vm::VMBinding`].
//!
//! Structural mutation requires a [`CodeCacheGuard`], obtained either by locking the
//! cache or by proving the process is at a safepoint (see [`Safepoint`]). Lookups such as
//! [`CodeCache::find_blob`] are lock-free and may be used from fault handlers.

#[macro_use]
extern crate log;
#[cfg(any(test, feature = "mock_test"))]
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate static_assertions;

#[macro_use]
pub mod util;
pub mod cache;
pub mod code;
pub mod heap;
pub mod sweeper;
pub mod vm;

pub use crate::cache::{
    BlobTypeStats, CodeCache, CodeCacheGuard, CodeCacheStats, Exclusion, Safepoint,
};
pub use crate::code::{
    BlobKind, BlobType, CodeBlob, CodeBlobRef, CodeBuffer, NMethod, NMethodDescriptor,
    NMethodLocker, NMethodRef, NMethodState,
};
pub use crate::sweeper::{SweepStats, Sweeper};
