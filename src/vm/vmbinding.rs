use super::{Collection, ObjectModel};

/// The `VMBinding` trait associates the code cache with the VM-specific traits.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync + Default,
{
    /// How the code cache classifies objects and classes of this VM.
    type VMObjectModel: ObjectModel;
    /// How the code cache talks to the collector and the platform of this VM.
    type VMCollection: Collection;
}
