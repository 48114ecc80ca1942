//! Utilities shared by the arena, the code blobs and the registry.

/// Macros for fatal invariant checks.
#[macro_use]
pub mod macros;

/// An abstract address and object reference type.
pub mod address;
/// Constants used in the code cache.
pub mod constants;
/// Alignment and unit conversion helpers.
pub mod conversions;
/// The built-in logger.
pub mod logger;
/// Reserving, committing and releasing executable memory.
pub mod memory;
/// Opaque identities of VM class and method metadata.
pub mod opaque;
/// Code cache options.
pub mod options;
/// Test utilities. We need this module for `MockVM` in criterion benches, which does not include code with `cfg(test)`.
#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
pub use self::opaque::{KlassRef, MethodRef};
