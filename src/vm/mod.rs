//! The interfaces a VM implements so the code cache can ask about the managed heap.
//!
//! The code cache never interprets objects or classes. It asks the binding whether an
//! embedded reference lives in the generation being scavenged, which object keeps a
//! class loaded, and it notifies the binding when the cache fills up. Everything that
//! changes from call to call (liveness during one collection, forwarding of moved
//! objects, dependency changes) is passed to the relevant call as a closure instead.

mod collection;
mod object_model;
mod vmbinding;

pub use self::collection::Collection;
pub use self::object_model::ObjectModel;
pub use self::vmbinding::VMBinding;
