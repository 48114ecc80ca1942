use crate::util::{KlassRef, ObjectReference};

/// VM-specific questions about objects and classes referenced from compiled code.
pub trait ObjectModel {
    /// Is `object` in the part of the heap a scavenge collects? Compiled methods that
    /// embed such references are tracked on the scavenge root list.
    ///
    /// Arguments:
    /// * `object`: A reference embedded in compiled code.
    fn is_scavengable(object: ObjectReference) -> bool;

    /// The object whose liveness decides whether `klass` is still loaded, usually its
    /// class loader. Returns `None` for classes that are never unloaded.
    ///
    /// Arguments:
    /// * `klass`: A class referenced from compiled code, such as an exception type.
    fn klass_holder(klass: KlassRef) -> Option<ObjectReference>;
}
